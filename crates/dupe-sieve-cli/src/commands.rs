use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "dupe-sieve")]
#[command(
    about = "Finds duplicate, partial and superseded copies of text files",
    long_about = None
)]
pub struct Cli {
    /// Configuration file to use instead of ./Config.*
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan the configured (or given) paths and run detection
    Detect {
        /// Root directories; overrides root_paths from the configuration
        paths: Vec<String>,
        /// Write one row per file to this CSV file
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Write groups and edges to this JSON file
        #[arg(long)]
        json: Option<PathBuf>,
        /// Skip content hashing; only name-based relations are found
        #[arg(long)]
        no_hash: bool,
    },
    /// Show how file names are parsed
    Parse {
        names: Vec<String>,
    },
    /// Print configuration values
    PrintConfig,
}
