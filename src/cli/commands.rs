//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: classify one input table
//! - batch: classify every table matching one or more glob patterns
//! - status: summarize an existing output table

use clap::{Args, Parser, Subcommand};
use floodnel::domain::Platform;
use std::path::PathBuf;

/// Floodnel - classify flood posts for non-economic loss with a vision model
#[derive(Parser, Debug)]
#[command(name = "floodnel")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Classify the pending rows of one CSV file
    Run {
        /// Input CSV
        input: PathBuf,

        /// Output CSV (default: <input stem>_<marker>.csv next to the input)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        args: ClassifyArgs,
    },

    /// Classify every CSV matching the given glob patterns, one after another
    Batch {
        /// Glob patterns, e.g. "data/tiktok/*.csv"
        #[arg(required = true)]
        patterns: Vec<String>,

        #[command(flatten)]
        args: ClassifyArgs,
    },

    /// Show progress and failures recorded in an output CSV
    Status {
        /// Output CSV written by a previous run
        output: PathBuf,

        /// Source platform (tiktok, twitter)
        #[arg(short, long)]
        platform: Platform,
    },
}

/// Options shared by `run` and `batch`; each overrides the config file
#[derive(Args, Debug, Clone)]
pub struct ClassifyArgs {
    /// Source platform (tiktok, twitter)
    #[arg(short, long)]
    pub platform: Platform,

    /// Skip this many rows from the start of the table
    #[arg(long)]
    pub start_offset: Option<usize>,

    /// Consider at most this many rows after the offset
    #[arg(long)]
    pub max_rows: Option<usize>,

    /// Maximum rows classified at the same time
    #[arg(short = 'j', long)]
    pub max_concurrent: Option<usize>,

    /// Discard any existing output instead of resuming from it
    #[arg(long)]
    pub overwrite: bool,

    /// Model name
    #[arg(short, long)]
    pub model: Option<String>,

    /// Classification service base URL
    #[arg(long)]
    pub base_url: Option<String>,

    /// Directory relative media paths are resolved against
    #[arg(long)]
    pub media_root: Option<PathBuf>,
}
