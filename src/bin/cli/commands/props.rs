use std::path::Path;

use anyhow::Result;
use chrono::Utc;

use dashfrog_lib::blocks::{BlockQuery, BlockSettings, LabelCatalog, NotebookContext};
use dashfrog_lib::models::Block;
use dashfrog_lib::timewindow::{RelativeWindow, TimeWindowConfig};

use crate::app::{read_blocks, read_filters};
use crate::OutputFormat;

pub fn run(
    blocks: &Path,
    filters: Option<&Path>,
    window: &str,
    format: &OutputFormat,
) -> Result<()> {
    let blocks = read_blocks(blocks)?;
    let notebook_filters = match filters {
        Some(path) => read_filters(path)?,
        None => Vec::new(),
    };
    let window = TimeWindowConfig::relative(window.parse::<RelativeWindow>()?);
    let ctx = NotebookContext::new(
        window.resolve_at(Utc::now()),
        notebook_filters,
        LabelCatalog::default(),
    );

    let mut data_blocks = Vec::new();
    collect_settings(&blocks, &mut data_blocks);

    match format {
        OutputFormat::Json => {
            let output: Vec<serde_json::Value> = data_blocks
                .iter()
                .map(|settings| {
                    let (query, error) = match BlockQuery::build(settings, &ctx) {
                        Ok(query) => (Some(query), None),
                        Err(e) => (None, Some(e.to_string())),
                    };
                    serde_json::json!({
                        "settings": settings,
                        "query": query,
                        "error": error,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            if data_blocks.is_empty() {
                println!("No data blocks found.");
                return Ok(());
            }
            for settings in &data_blocks {
                let title = if settings.title.is_empty() {
                    "(untitled)"
                } else {
                    settings.title.as_str()
                };
                println!("{} [{}] {}", settings.block_id, settings.kind, title);
                match BlockQuery::build(settings, &ctx) {
                    Ok(query) => {
                        if let Some(metric) = &query.metric {
                            println!("    metric: {}", metric.name);
                        }
                        if let Some(flow) = &query.flow_name {
                            println!("    flow: {}", flow);
                        }
                        for filter in &query.filters {
                            println!("    filter: {}", filter);
                        }
                        if !query.group_by.is_empty() {
                            println!("    group by: {}", query.group_by.join(", "));
                        }
                        if let Some(limit) = query.limit {
                            println!("    limit: {}", limit);
                        }
                    }
                    Err(e) => println!("    not queryable: {}", e),
                }
            }
        }
    }
    Ok(())
}

fn collect_settings(blocks: &[Block], out: &mut Vec<BlockSettings>) {
    for block in blocks {
        if let Some(settings) = BlockSettings::from_block(block) {
            out.push(settings);
        }
        collect_settings(&block.children, out);
    }
}
