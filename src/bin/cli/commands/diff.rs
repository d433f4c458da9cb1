use std::path::Path;

use anyhow::Result;

use dashfrog_lib::sync::{block_ids, diff_blocks, BlockDiff};

use crate::app::read_blocks;
use crate::OutputFormat;

pub fn run(previous: &Path, current: &Path, format: &OutputFormat) -> Result<()> {
    let previous = read_blocks(previous)?;
    let current = read_blocks(current)?;
    // Everything in the previous document is assumed to exist remotely
    let diff = diff_blocks(&previous, &current, &block_ids(&previous));

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&diff)?),
        OutputFormat::Plain => print_diff(&diff),
    }
    Ok(())
}

pub fn print_diff(diff: &BlockDiff) {
    if diff.is_empty() {
        println!("No changes.");
        return;
    }
    for p in &diff.to_create {
        println!("+ {:<36} {:<16} @{}", p.block.id, p.block.block_type, p.position);
    }
    for id in &diff.to_delete_ids {
        println!("- {}", id);
    }
    for p in &diff.to_update {
        println!("~ {:<36} {:<16} @{}", p.block.id, p.block.block_type, p.position);
    }
    println!(
        "\n{} to create, {} to delete, {} to update",
        diff.to_create.len(),
        diff.to_delete_ids.len(),
        diff.to_update.len()
    );
}
