use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use tabviz_core::Aggregation;

use crate::config::{ExtractionMode, ProviderChoice};

#[derive(Parser, Debug)]
#[command(
    name = "tabviz",
    about = "Turn survey sheets and scanned tables into typed datasets with chart suggestions"
)]
pub struct Cli {
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    pub verbose: bool,
    /// local, openai, anthropic or gemini (overrides TABVIZ_PROVIDER)
    #[arg(long, global = true)]
    pub provider: Option<ProviderChoice>,
    #[arg(long, global = true)]
    pub model: Option<String>,
    /// SQLite cache path, or :memory: (overrides TABVIZ_CACHE)
    #[arg(long, global = true)]
    pub cache: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Extract, normalize and summarize a document.
    Process {
        file: PathBuf,
        /// auto, canonical or generic (overrides TABVIZ_MODE)
        #[arg(long)]
        mode: Option<ExtractionMode>,
        #[command(flatten)]
        view: ViewArgs,
    },
    /// Summarize a JSON array of rows already on disk.
    Analyze {
        file: PathBuf,
        /// Map the rows onto the household schema first.
        #[arg(long, default_value_t = false)]
        canonical: bool,
        #[command(flatten)]
        view: ViewArgs,
    },
    Cache {
        #[command(subcommand)]
        action: CacheCommand,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ViewArgs {
    /// Column to chart; defaults to the first column that suits a pie chart.
    #[arg(long)]
    pub column: Option<String>,
    /// Numeric column aggregated per category instead of counting rows.
    #[arg(long)]
    pub value: Option<String>,
    #[arg(long, default_value = "count")]
    pub agg: Aggregation,
    /// Rows shown in the preview table.
    #[arg(long, default_value_t = 20)]
    pub rows: usize,
    /// Print the dataset and metadata as JSON instead of tables.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// Entry count, stored bytes and cached files.
    Info,
    /// Remove expired and unreadable entries.
    Cleanup,
    /// Remove every cache entry.
    Clear,
}
