//! In-process backend. Used by the CLI's offline replay and by tests, which
//! inspect the recorded call log and inject failures or latency.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{ApiError, NotebookBackend};
use crate::models::{Block, Label, Notebook, NotebookPatch, PositionedBlock};

/// One recorded backend call
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    GetNotebook(Uuid),
    ListBlocks(Uuid),
    CreateBlock { block_id: String, position: usize },
    DeleteBlock { block_id: String },
    UpdateBlocks { blocks: Vec<(String, usize)> },
    UpdateNotebook(NotebookPatch),
    ListLabels,
}

impl BackendCall {
    /// Whether this call writes block content.
    pub fn is_block_write(&self) -> bool {
        matches!(
            self,
            Self::CreateBlock { .. } | Self::DeleteBlock { .. } | Self::UpdateBlocks { .. }
        )
    }
}

impl std::fmt::Display for BackendCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GetNotebook(id) => write!(f, "GET notebook {}", id),
            Self::ListBlocks(id) => write!(f, "GET blocks of {}", id),
            Self::CreateBlock { block_id, position } => {
                write!(f, "CREATE {} @{}", block_id, position)
            }
            Self::DeleteBlock { block_id } => write!(f, "DELETE {}", block_id),
            Self::UpdateBlocks { blocks } => {
                let ids: Vec<String> = blocks
                    .iter()
                    .map(|(id, position)| format!("{}@{}", id, position))
                    .collect();
                write!(f, "UPDATE [{}]", ids.join(", "))
            }
            Self::UpdateNotebook(patch) => write!(f, "PATCH notebook {:?}", patch),
            Self::ListLabels => f.write_str("GET labels"),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredNotebook {
    notebook: Notebook,
    blocks: Vec<Block>,
}

#[derive(Debug, Default)]
struct Inner {
    notebooks: HashMap<Uuid, StoredNotebook>,
    labels: Vec<Label>,
    calls: Vec<BackendCall>,
    /// Number of upcoming write calls that fail
    fail_writes: usize,
    /// Block list reads fail while set
    fail_block_reads: bool,
    latency: Option<Duration>,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    inner: Mutex<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_notebook(&self, notebook: Notebook, blocks: Vec<Block>) {
        let mut inner = self.inner.lock();
        inner
            .notebooks
            .insert(notebook.id, StoredNotebook { notebook, blocks });
    }

    pub fn set_labels(&self, labels: Vec<Label>) {
        self.inner.lock().labels = labels;
    }

    pub fn blocks(&self, notebook_id: Uuid) -> Vec<Block> {
        self.inner
            .lock()
            .notebooks
            .get(&notebook_id)
            .map(|n| n.blocks.clone())
            .unwrap_or_default()
    }

    pub fn notebook(&self, notebook_id: Uuid) -> Option<Notebook> {
        self.inner
            .lock()
            .notebooks
            .get(&notebook_id)
            .map(|n| n.notebook.clone())
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.inner.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().calls.clear();
    }

    /// Make the next `count` write calls fail with a server error.
    pub fn fail_next_writes(&self, count: usize) {
        self.inner.lock().fail_writes = count;
    }

    pub fn set_fail_block_reads(&self, fail: bool) {
        self.inner.lock().fail_block_reads = fail;
    }

    /// Delay every call by `latency` (tokio time, so paused clocks apply).
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.inner.lock().latency = latency;
    }

    async fn delay(&self) {
        let latency = self.inner.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Record a read and decide whether it fails.
    fn begin_read(&self, call: BackendCall) -> Result<(), ApiError> {
        let mut inner = self.inner.lock();
        let is_block_read = matches!(call, BackendCall::ListBlocks(_));
        inner.calls.push(call);
        if is_block_read && inner.fail_block_reads {
            return Err(ApiError::Server {
                status: 503,
                message: "injected read failure".to_string(),
            });
        }
        Ok(())
    }

    /// Record a write and decide whether it fails.
    fn begin_write(&self, call: BackendCall) -> Result<(), ApiError> {
        let mut inner = self.inner.lock();
        inner.calls.push(call);
        if inner.fail_writes > 0 {
            inner.fail_writes -= 1;
            return Err(ApiError::Server {
                status: 500,
                message: "injected write failure".to_string(),
            });
        }
        Ok(())
    }

    fn with_notebook<T>(
        &self,
        notebook_id: Uuid,
        f: impl FnOnce(&mut StoredNotebook) -> Result<T, ApiError>,
    ) -> Result<T, ApiError> {
        let mut inner = self.inner.lock();
        let stored = inner
            .notebooks
            .get_mut(&notebook_id)
            .ok_or_else(|| ApiError::NotFound(format!("notebooks/{}", notebook_id)))?;
        f(stored)
    }
}

#[async_trait]
impl NotebookBackend for MemoryBackend {
    async fn get_notebook(&self, notebook_id: Uuid) -> Result<Notebook, ApiError> {
        self.delay().await;
        self.begin_read(BackendCall::GetNotebook(notebook_id))?;
        self.with_notebook(notebook_id, |stored| Ok(stored.notebook.clone()))
    }

    async fn list_blocks(&self, notebook_id: Uuid) -> Result<Vec<Block>, ApiError> {
        self.delay().await;
        self.begin_read(BackendCall::ListBlocks(notebook_id))?;
        self.with_notebook(notebook_id, |stored| Ok(stored.blocks.clone()))
    }

    async fn create_block(
        &self,
        notebook_id: Uuid,
        block: &Block,
        position: usize,
    ) -> Result<(), ApiError> {
        self.delay().await;
        self.begin_write(BackendCall::CreateBlock {
            block_id: block.id.clone(),
            position,
        })?;
        self.with_notebook(notebook_id, |stored| {
            if stored.blocks.iter().any(|b| b.id == block.id) {
                return Err(ApiError::Server {
                    status: 409,
                    message: format!("block {} already exists", block.id),
                });
            }
            let position = position.min(stored.blocks.len());
            stored.blocks.insert(position, block.clone());
            Ok(())
        })
    }

    async fn delete_block(&self, notebook_id: Uuid, block_id: &str) -> Result<(), ApiError> {
        self.delay().await;
        self.begin_write(BackendCall::DeleteBlock {
            block_id: block_id.to_string(),
        })?;
        self.with_notebook(notebook_id, |stored| {
            stored.blocks.retain(|b| b.id != block_id);
            Ok(())
        })
    }

    async fn update_blocks(
        &self,
        notebook_id: Uuid,
        blocks: &[PositionedBlock],
    ) -> Result<(), ApiError> {
        self.delay().await;
        self.begin_write(BackendCall::UpdateBlocks {
            blocks: blocks
                .iter()
                .map(|p| (p.block.id.clone(), p.position))
                .collect(),
        })?;
        self.with_notebook(notebook_id, |stored| {
            for positioned in blocks {
                let Some(index) = stored.blocks.iter().position(|b| b.id == positioned.block.id)
                else {
                    return Err(ApiError::NotFound(format!("block {}", positioned.block.id)));
                };
                stored.blocks.remove(index);
                let position = positioned.position.min(stored.blocks.len());
                stored.blocks.insert(position, positioned.block.clone());
            }
            Ok(())
        })
    }

    async fn update_notebook(
        &self,
        notebook_id: Uuid,
        patch: &NotebookPatch,
    ) -> Result<Notebook, ApiError> {
        self.delay().await;
        self.begin_write(BackendCall::UpdateNotebook(patch.clone()))?;
        self.with_notebook(notebook_id, |stored| {
            stored.notebook.apply(patch);
            Ok(stored.notebook.clone())
        })
    }

    async fn list_labels(&self) -> Result<Vec<Label>, ApiError> {
        self.delay().await;
        self.begin_read(BackendCall::ListLabels)?;
        Ok(self.inner.lock().labels.clone())
    }
}
