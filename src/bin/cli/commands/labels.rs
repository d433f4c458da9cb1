use anyhow::{Context, Result};

use dashfrog_lib::blocks::LabelCatalog;

use crate::app::App;
use crate::OutputFormat;

pub async fn run(app: &App, format: &OutputFormat) -> Result<()> {
    let config = app.config()?;
    let backend = app.backend(&config)?;
    let catalog = LabelCatalog::fetch(backend.as_ref())
        .await
        .context("Failed to fetch labels")?;

    match format {
        OutputFormat::Json => {
            let output: Vec<serde_json::Value> = catalog
                .names()
                .map(|name| {
                    serde_json::json!({
                        "name": name,
                        "values": catalog.values(name),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            if catalog.is_empty() {
                println!("No labels found.");
                return Ok(());
            }
            for name in catalog.names() {
                println!("{:<24} {}", name, catalog.values(name).join(", "));
            }
        }
    }
    Ok(())
}
