mod app;
mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "dashfrog-cli", about = "DashFrog notebook block sync tools", version)]
struct Cli {
    /// Config file (default: <config dir>/dashfrog/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "plain")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Plain,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Show the create/delete/update operations between two block documents
    Diff {
        /// Last synced document (JSON)
        previous: PathBuf,
        /// Current editor document (JSON, "-" for stdin)
        current: PathBuf,
    },

    /// Sync a block document to a notebook on the backend
    Push {
        /// Notebook id
        #[arg(long)]
        notebook: Uuid,
        /// Block document (JSON, "-" for stdin)
        blocks: PathBuf,
        /// Also set the notebook title
        #[arg(long)]
        title: Option<String>,
        /// Only print the operations, do not write
        #[arg(long)]
        dry_run: bool,
    },

    /// Replay a sequence of documents against an in-memory backend
    Replay {
        /// Documents in edit order; the first one seeds the notebook
        #[arg(required = true, num_args = 2..)]
        documents: Vec<PathBuf>,
        /// Let the debounce timer flush, with this idle time, instead of
        /// force-saving after each document
        #[arg(long)]
        debounce_ms: Option<u64>,
    },

    /// Resolve a time window preset or an absolute range
    Window {
        /// Relative preset (5m, 15m, 30m, 1h, 3h, 6h, 12h, 24h, 2d, 7d, 30d)
        preset: Option<String>,
        /// Absolute start (RFC 3339)
        #[arg(long, requires = "end", conflicts_with = "preset")]
        start: Option<String>,
        /// Absolute end (RFC 3339)
        #[arg(long, requires = "start")]
        end: Option<String>,
    },

    /// Show data block settings and the queries they produce
    Props {
        /// Block document (JSON, "-" for stdin)
        blocks: PathBuf,
        /// Notebook-level filters (JSON list)
        #[arg(long)]
        filters: Option<PathBuf>,
        /// Notebook time window preset
        #[arg(long, default_value = "1h")]
        window: String,
    },

    /// List labels known to the backend
    Labels,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let app = app::App::new(cli.config.as_deref());

    match cli.command {
        Command::Diff { previous, current } => {
            commands::diff::run(&previous, &current, &cli.format)?;
        }
        Command::Push {
            notebook,
            blocks,
            title,
            dry_run,
        } => {
            commands::push::run(&app, notebook, &blocks, title, dry_run, &cli.format).await?;
        }
        Command::Replay {
            documents,
            debounce_ms,
        } => {
            commands::replay::run(&app, &documents, debounce_ms, &cli.format).await?;
        }
        Command::Window { preset, start, end } => {
            commands::window::run(preset.as_deref(), start.as_deref(), end.as_deref(), &cli.format)?;
        }
        Command::Props {
            blocks,
            filters,
            window,
        } => {
            commands::props::run(&blocks, filters.as_deref(), &window, &cli.format)?;
        }
        Command::Labels => {
            commands::labels::run(&app, &cli.format).await?;
        }
    }

    Ok(())
}
