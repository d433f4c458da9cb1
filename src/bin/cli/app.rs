use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use dashfrog_lib::api::HttpBackend;
use dashfrog_lib::config::AppConfig;
use dashfrog_lib::filters::Filter;
use dashfrog_lib::models::Block;

/// Shared state for CLI commands. The config file is only read by
/// commands that talk to the backend or run a session.
pub struct App {
    config_path: Option<PathBuf>,
}

impl App {
    pub fn new(path: Option<&Path>) -> Self {
        Self {
            config_path: path.map(Path::to_path_buf),
        }
    }

    /// Load configuration from the `--config` path, or the default location
    pub fn config(&self) -> Result<AppConfig> {
        let config_path = match &self.config_path {
            Some(path) => path.clone(),
            None => AppConfig::default_path().context("Failed to locate config directory")?,
        };
        let config = AppConfig::load(&config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
        log::debug!("CLI: using config {}", config_path.display());
        Ok(config)
    }

    pub fn backend(&self, config: &AppConfig) -> Result<Arc<HttpBackend>> {
        let backend = HttpBackend::from_config(&config.api)
            .with_context(|| format!("Invalid API base URL {}", config.api.base_url))?;
        Ok(Arc::new(backend))
    }
}

/// Read a block document: either a bare array or `{"blocks": [...]}`.
pub fn read_blocks(path: &Path) -> Result<Vec<Block>> {
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum Document {
        Bare(Vec<Block>),
        Wrapped { blocks: Vec<Block> },
    }

    let text = read_input(path)?;
    let document: Document = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a block document", path.display()))?;
    Ok(match document {
        Document::Bare(blocks) => blocks,
        Document::Wrapped { blocks } => blocks,
    })
}

pub fn read_filters(path: &Path) -> Result<Vec<Filter>> {
    let text = read_input(path)?;
    serde_json::from_str(&text).with_context(|| format!("{} is not a filter list", path.display()))
}

/// Read a file, or stdin when `path` is "-"
fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        std::io::Read::read_to_string(&mut std::io::stdin(), &mut buf)
            .context("Failed to read stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}
