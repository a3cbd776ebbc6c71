//! Command-line interface of the benchmark role

use clap::Parser;
use std::path::PathBuf;

/// Benchmark controller for the HOBBIT benchmark protocol
///
/// Reads the session, broker location, experiment URI and benchmark parameter
/// model from the environment variables the platform sets.
#[derive(Debug, Parser)]
#[command(name = "hb", about = "Wine quality benchmark controller", version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(short = 'l', long = "log-level", help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)")]
    pub log_level: Option<String>,

    /// Dataset file, instead of the one named by the parameter model
    #[arg(short, long, help = "Dataset file (overrides the parameter model)")]
    pub dataset: Option<PathBuf>,

    /// Shuffle seed, instead of the one in the parameter model
    #[arg(short, long, help = "Shuffle seed (overrides the parameter model)")]
    pub seed: Option<u64>,
}
