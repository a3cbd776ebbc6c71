//! hobbitbench - the benchmark controller of a HOBBIT experiment
//!
//! Splits a wine quality dataset, trains the system under test with the first
//! part and sends the rest one task at a time, timing every answer. The
//! outcome is reported to the platform as a JSON-LD result document.

pub mod benchmark;
pub mod cli;
pub mod dataset;
pub mod error;
pub mod parameters;
pub mod pipeline;
pub mod result;

pub use benchmark::{BenchmarkController, BenchmarkState};
pub use dataset::Dataset;
pub use error::{BenchmarkError, DatasetError, ParameterError};
pub use parameters::{BenchmarkParameters, DatasetChoice, DatasetSource};
pub use pipeline::{AnswerOutcome, Evaluation, Progress, Task, TaskPipeline, TaskSink};
pub use result::{Kpi, ResultDocument};
