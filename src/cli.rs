use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "reelkeeper")]
#[command(author, version, about = "Video ingest pipeline")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ingest one or more video files
    Ingest {
        /// Files to ingest
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Maximum number of files processed at once
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,

        /// Process files even if their checksum is already known
        #[arg(long)]
        force: bool,

        /// Enable a step for this run (repeatable)
        #[arg(long = "enable", value_name = "STEP")]
        enable: Vec<String>,

        /// Disable a step for this run (repeatable)
        #[arg(long = "disable", value_name = "STEP")]
        disable: Vec<String>,

        /// Print the batch summary as JSON
        #[arg(long)]
        json: bool,

        /// Stream progress events to stderr as JSON lines
        #[arg(long)]
        events: bool,
    },

    /// List the ingest steps and whether they are enabled
    Steps {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },
}
