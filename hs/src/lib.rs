//! hobbitsys - the system under test in a HOBBIT benchmark
//!
//! Learns a mean-value baseline from the training data the benchmark sends and
//! answers every task with it.

pub mod cli;
pub mod error;
pub mod predictor;
pub mod system;

pub use error::SystemError;
pub use predictor::{BaselinePredictor, TaskRequest, answer_message, parse_task};
pub use system::{SystemAdapter, SystemState};
