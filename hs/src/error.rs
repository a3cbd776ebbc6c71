//! System role errors

use hobbitcore::{ConnectError, SetupError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SystemError {
    #[error("Could not connect to the broker")]
    Connect(#[from] ConnectError),

    #[error("Communication setup failed")]
    Setup(#[from] SetupError),

    #[error("Task payload is empty")]
    EmptyTask,

    #[error("Task row has no task id: {0:?}")]
    MissingTaskId(String),
}
