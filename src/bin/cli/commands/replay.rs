use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use dashfrog_lib::api::{BackendCall, MemoryBackend};
use dashfrog_lib::models::Notebook;
use dashfrog_lib::sync::{FlushReport, NotebookSession};

use crate::app::{read_blocks, App};
use crate::OutputFormat;

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct Step {
    document: String,
    calls: Vec<String>,
    report: Option<FlushReport>,
}

/// Feed documents to a session backed by the in-memory store and report the
/// backend calls each one causes.
pub async fn run(
    app: &App,
    documents: &[PathBuf],
    debounce_ms: Option<u64>,
    format: &OutputFormat,
) -> Result<()> {
    let Some((seed, edits)) = documents.split_first() else {
        return Ok(());
    };

    let backend = Arc::new(MemoryBackend::new());
    let notebook = Notebook::new("Replay".to_string());
    let notebook_id = notebook.id;
    backend.insert_notebook(notebook, read_blocks(seed)?);

    let mut config = app.config()?.sync_config();
    if let Some(ms) = debounce_ms {
        config.debounce = Duration::from_millis(ms);
    }
    let session = NotebookSession::new(backend.clone(), config.clone());
    session.open(notebook_id).await.context("Failed to open replay notebook")?;

    let mut steps = Vec::new();
    for path in edits {
        backend.clear_calls();
        session.blocks_changed(read_blocks(path)?)?;

        let report = match debounce_ms {
            Some(_) => {
                let mut status = session.subscribe();
                tokio::time::sleep(config.debounce).await;
                // Wait for the debounced flush to finish
                status
                    .wait_for(|s| !s.has_unsaved_changes || s.last_error.is_some())
                    .await
                    .context("Session closed during replay")?;
                None
            }
            None => Some(session.force_save(None).await?),
        };

        steps.push(Step {
            document: path.display().to_string(),
            calls: backend
                .calls()
                .iter()
                .filter(|c| c.is_block_write())
                .map(BackendCall::to_string)
                .collect(),
            report,
        });
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&steps)?),
        OutputFormat::Plain => {
            for step in &steps {
                println!("{}", step.document);
                if step.calls.is_empty() {
                    println!("    (no writes)");
                }
                for call in &step.calls {
                    println!("    {}", call);
                }
            }
            println!("\nFinal document: {} block(s)", backend.blocks(notebook_id).len());
        }
    }
    Ok(())
}
