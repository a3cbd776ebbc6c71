//! Command-line interface of the system role

use clap::Parser;
use std::path::PathBuf;

/// Baseline system for the HOBBIT benchmark protocol
///
/// Reads the session and broker location from the environment variables the
/// platform sets (HOBBIT_SESSION_ID, HOBBIT_RABBIT_HOST, RABBITMQ_PORT).
#[derive(Debug, Parser)]
#[command(name = "hs", about = "Mean-value baseline system for HOBBIT benchmarks", version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(short = 'l', long = "log-level", help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)")]
    pub log_level: Option<String>,
}
