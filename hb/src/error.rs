//! Benchmark controller errors

use std::path::PathBuf;

use hobbitcore::{ConnectError, SetupError};
use thiserror::Error;

/// Failure to load or split a dataset file
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Failed to read dataset {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Dataset has no header line")]
    Empty,
}

/// Problems with the benchmark parameter model
#[derive(Debug, Error)]
pub enum ParameterError {
    #[error("Parameter model is not valid JSON")]
    Json(#[from] serde_json::Error),

    #[error("Parameter {0} is not set")]
    Missing(String),

    #[error("Seed is not an unsigned integer: {0}")]
    InvalidSeed(String),

    #[error("Unknown dataset IRI {0}")]
    UnknownDataset(String),
}

#[derive(Debug, Error)]
pub enum BenchmarkError {
    #[error("Could not connect to the broker")]
    Connect(#[from] ConnectError),

    #[error("Communication setup failed")]
    Setup(#[from] SetupError),

    #[error("Dataset preparation failed")]
    Dataset(#[from] DatasetError),

    #[error("Invalid benchmark parameters")]
    Parameters(#[from] ParameterError),

    #[error("Malformed answer: {0:?}")]
    MalformedAnswer(String),
}
