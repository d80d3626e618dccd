//! CLI argument parsing for the trace log analyzer

use crate::analyzer::DEFAULT_THRESHOLD_MS;
use crate::config::DEFAULT_LOG_PATH;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "coastline")]
#[command(version)]
#[command(about = "Report slow calls recorded in a coastline trace log", long_about = None)]
pub struct Cli {
    /// Trace log to analyse
    #[arg(value_name = "FILE", default_value = DEFAULT_LOG_PATH)]
    pub file: PathBuf,

    /// Report calls that took longer than this many milliseconds
    #[arg(short = 't', long = "threshold", value_name = "MS", default_value_t = DEFAULT_THRESHOLD_MS)]
    pub threshold: f64,

    /// Enable debug logging to stderr
    #[arg(long = "debug")]
    pub debug: bool,
}
