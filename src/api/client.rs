use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ApiError, NotebookBackend};
use crate::config::ApiConfig;
use crate::models::{Block, Label, Notebook, NotebookPatch, PositionedBlock};

/// REST client for the notebook API
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateBlockBody<'a> {
    block: &'a Block,
    position: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateBlocksBody<'a> {
    blocks: &'a [PositionedBlock],
}

/// The list endpoint answers either a bare array or `{ "blocks": [...] }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum BlockList {
    Bare(Vec<Block>),
    Wrapped { blocks: Vec<Block> },
}

impl HttpBackend {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, ApiError> {
        // Normalize URL - ensure no trailing slash
        let base_url = base_url.trim_end_matches('/').to_string();

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ApiError::InvalidUrl(
                "URL must start with http:// or https://".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self { client, base_url })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self, ApiError> {
        Self::new(
            config.base_url.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Build full URL for a path
    fn url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn blocks_path(notebook_id: Uuid) -> String {
        format!("notebooks/{}/blocks", notebook_id)
    }

    /// Map non-success statuses onto `ApiError`.
    async fn check(response: Response, what: &str) -> Result<Response, ApiError> {
        match response.status() {
            StatusCode::NOT_FOUND => Err(ApiError::NotFound(what.to_string())),
            status if !status.is_success() => Err(ApiError::Server {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
            _ => Ok(response),
        }
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl NotebookBackend for HttpBackend {
    async fn get_notebook(&self, notebook_id: Uuid) -> Result<Notebook, ApiError> {
        let path = format!("notebooks/{}", notebook_id);
        let response = self.client.get(self.url(&path)).send().await?;
        let response = Self::check(response, &path).await?;
        Self::read_json(response).await
    }

    async fn list_blocks(&self, notebook_id: Uuid) -> Result<Vec<Block>, ApiError> {
        let path = Self::blocks_path(notebook_id);
        let response = self.client.get(self.url(&path)).send().await?;
        let response = Self::check(response, &path).await?;
        let blocks = match Self::read_json::<BlockList>(response).await? {
            BlockList::Bare(blocks) => blocks,
            BlockList::Wrapped { blocks } => blocks,
        };
        log::debug!(
            "API: fetched {} block(s) for notebook {}",
            blocks.len(),
            notebook_id
        );
        Ok(blocks)
    }

    async fn create_block(
        &self,
        notebook_id: Uuid,
        block: &Block,
        position: usize,
    ) -> Result<(), ApiError> {
        let path = Self::blocks_path(notebook_id);
        let response = self
            .client
            .post(self.url(&path))
            .json(&CreateBlockBody { block, position })
            .send()
            .await?;
        Self::check(response, &path).await?;
        Ok(())
    }

    async fn delete_block(&self, notebook_id: Uuid, block_id: &str) -> Result<(), ApiError> {
        let path = format!("{}/{}", Self::blocks_path(notebook_id), block_id);
        let response = self.client.delete(self.url(&path)).send().await?;

        match response.status() {
            // Already gone is as good as deleted
            StatusCode::NOT_FOUND => {
                log::debug!("API: block {} already absent from notebook {}", block_id, notebook_id);
                Ok(())
            }
            _ => {
                Self::check(response, &path).await?;
                Ok(())
            }
        }
    }

    async fn update_blocks(
        &self,
        notebook_id: Uuid,
        blocks: &[PositionedBlock],
    ) -> Result<(), ApiError> {
        let path = Self::blocks_path(notebook_id);
        let response = self
            .client
            .put(self.url(&path))
            .json(&UpdateBlocksBody { blocks })
            .send()
            .await?;
        Self::check(response, &path).await?;
        Ok(())
    }

    async fn update_notebook(
        &self,
        notebook_id: Uuid,
        patch: &NotebookPatch,
    ) -> Result<Notebook, ApiError> {
        let path = format!("notebooks/{}", notebook_id);
        let response = self
            .client
            .patch(self.url(&path))
            .json(patch)
            .send()
            .await?;
        let response = Self::check(response, &path).await?;
        Self::read_json(response).await
    }

    async fn list_labels(&self) -> Result<Vec<Label>, ApiError> {
        let response = self.client.get(self.url("labels")).send().await?;
        let response = Self::check(response, "labels").await?;
        Self::read_json(response).await
    }
}
