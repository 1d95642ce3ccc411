use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::search::SearchMode;

#[derive(Debug, Parser)]
#[command(
    name = "docrank",
    version,
    about = "Hybrid keyword and semantic search over markdown documentation"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build the index from a directory of markdown files (full rebuild)
    Index(IndexArgs),
    /// Search the index
    Search(SearchArgs),
    /// Show what is currently indexed
    Status(StatusArgs),
}

#[derive(Debug, Args)]
pub struct IndexArgs {
    /// Directory to scan for .md and .mdx files
    pub dir: PathBuf,

    /// Package name recorded on every chunk
    #[arg(long, short)]
    pub package: String,

    /// Output the build report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Search mode (defaults to hybrid when vector search is available)
    #[arg(long, short, value_enum)]
    pub mode: Option<SearchMode>,

    /// Only return hits from this package (can be repeated)
    #[arg(long = "package", short)]
    pub packages: Vec<String>,

    /// Number of results to return
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}
