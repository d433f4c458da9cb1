//! Backend contract for notebooks and their blocks.
//!
//! The session only talks to [`NotebookBackend`]; [`HttpBackend`] speaks the
//! REST API and [`MemoryBackend`] keeps everything in process.

mod client;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Block, Label, Notebook, NotebookPatch, PositionedBlock};

pub use client::HttpBackend;
pub use memory::{BackendCall, MemoryBackend};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Resource not found: {0}")]
    NotFound(String),
    #[error("Server error: {status} - {message}")]
    Server { status: u16, message: String },
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[async_trait]
pub trait NotebookBackend: Send + Sync {
    async fn get_notebook(&self, notebook_id: Uuid) -> Result<Notebook, ApiError>;

    /// All blocks of a notebook, in document order.
    async fn list_blocks(&self, notebook_id: Uuid) -> Result<Vec<Block>, ApiError>;

    async fn create_block(
        &self,
        notebook_id: Uuid,
        block: &Block,
        position: usize,
    ) -> Result<(), ApiError>;

    async fn delete_block(&self, notebook_id: Uuid, block_id: &str) -> Result<(), ApiError>;

    /// Batch update of pre-existing blocks with their new positions.
    async fn update_blocks(
        &self,
        notebook_id: Uuid,
        blocks: &[PositionedBlock],
    ) -> Result<(), ApiError>;

    async fn update_notebook(
        &self,
        notebook_id: Uuid,
        patch: &NotebookPatch,
    ) -> Result<Notebook, ApiError>;

    async fn list_labels(&self) -> Result<Vec<Label>, ApiError>;
}
