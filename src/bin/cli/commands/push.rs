use std::path::Path;

use anyhow::{Context, Result};
use uuid::Uuid;

use dashfrog_lib::api::NotebookBackend;
use dashfrog_lib::sync::{block_ids, diff_blocks, NotebookSession};

use crate::app::{read_blocks, App};
use crate::commands::diff::print_diff;
use crate::OutputFormat;

pub async fn run(
    app: &App,
    notebook_id: Uuid,
    path: &Path,
    title: Option<String>,
    dry_run: bool,
    format: &OutputFormat,
) -> Result<()> {
    let blocks = read_blocks(path)?;
    let config = app.config()?;
    let backend = app.backend(&config)?;

    if dry_run {
        let remote = backend
            .list_blocks(notebook_id)
            .await
            .with_context(|| format!("Failed to fetch blocks of notebook {}", notebook_id))?;
        let diff = diff_blocks(&remote, &blocks, &block_ids(&remote));
        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&diff)?),
            OutputFormat::Plain => print_diff(&diff),
        }
        return Ok(());
    }

    let session = NotebookSession::new(backend, config.sync_config());
    session
        .open(notebook_id)
        .await
        .with_context(|| format!("Failed to open notebook {}", notebook_id))?;
    session.blocks_changed(blocks)?;
    if let Some(title) = title {
        session.title_changed(title)?;
    }
    let report = session.force_save(None).await.context("Sync failed")?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Plain => {
            if report.is_noop() {
                println!("Notebook {} is up to date.", notebook_id);
            } else {
                println!(
                    "Synced notebook {}: {} created, {} updated, {} deleted, {} field(s) in {} ms",
                    notebook_id,
                    report.created,
                    report.updated,
                    report.deleted,
                    report.fields_written,
                    report.duration_ms
                );
            }
        }
    }
    Ok(())
}
