use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "pagecounts")]
#[command(about = "Fetch, verify and aggregate hourly pagecount dumps", long_about = None)]
pub struct Cli {
    /// Only touch days whose YYYYMMDD stamp contains this text
    #[arg(short, long, global = true)]
    pub day: Option<String>,

    /// Override the configured first day (YYYYMMDD)
    #[arg(long, global = true)]
    pub start: Option<String>,

    /// Override the configured last day (YYYYMMDD)
    #[arg(long, global = true)]
    pub end: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Fetch, verify, aggregate and persist every pending day of the range
    Run,
    /// Download missing snapshot files without aggregating
    Fetch,
    /// Check local snapshot files against the published checksums
    Verify {
        /// Where to write the names of files that failed verification
        #[arg(long, default_value = "bad_checksums.txt")]
        bad_list: PathBuf,
    },
    /// Aggregate the snapshot files already on disk
    Aggregate,
    /// Pull rows for a list of articles out of the daily artifacts
    Extract {
        /// Newline-delimited article names
        keywords: PathBuf,
        /// Restrict matches to these domains (repeatable)
        #[arg(long = "domain")]
        domains: Vec<String>,
        /// Write CSV here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print configuration values
    PrintConfig,
}
