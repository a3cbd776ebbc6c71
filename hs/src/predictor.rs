//! Mean-value baseline predictor and the row formats it reads and writes
//!
//! Training data and tasks arrive as `;`-separated text. The training payload
//! starts with a header line and carries the target value in the last field of
//! every row. A task's first field is its id.

use tracing::{debug, warn};

use crate::error::SystemError;

pub const SEPARATOR: char = ';';

/// Predicts the mean target value seen during training
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BaselinePredictor {
    prediction: f64,
}

impl BaselinePredictor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prediction(&self) -> f64 {
        self.prediction
    }

    /// Learn from a training payload, returning the number of rows used
    ///
    /// Rows whose target does not parse are skipped. Without a single usable
    /// row the previous prediction is kept.
    pub fn train(&mut self, data: &str) -> usize {
        let mut sum = 0.0;
        let mut count = 0usize;

        for (index, line) in data.lines().enumerate().skip(1) {
            if line.trim().is_empty() {
                continue;
            }
            let target = line.rsplit(SEPARATOR).next().unwrap_or_default().trim();
            match target.parse::<f64>() {
                Ok(value) => {
                    sum += value;
                    count += 1;
                }
                Err(_) => warn!(line = index + 1, %target, "Skipping training row without a numeric target"),
            }
        }

        if count == 0 {
            warn!(prediction = self.prediction, "No usable training rows, keeping previous prediction");
            return 0;
        }

        self.prediction = sum / count as f64;
        debug!(rows = count, prediction = self.prediction, "BaselinePredictor::train: done");
        count
    }

    pub fn predict(&self, _task: &TaskRequest) -> f64 {
        self.prediction
    }
}

/// A task as the system sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRequest {
    pub id: String,
    pub row: String,
}

/// Extract the task row and its id
///
/// With more than one line the first is a header and the second is the row.
pub fn parse_task(payload: &str) -> Result<TaskRequest, SystemError> {
    let lines: Vec<&str> = payload.lines().collect();
    let row = match lines.as_slice() {
        [] => return Err(SystemError::EmptyTask),
        [only] => *only,
        [_header, row, ..] => *row,
    };

    let id = row.split(SEPARATOR).next().unwrap_or_default().trim();
    if id.is_empty() {
        return Err(SystemError::MissingTaskId(row.to_string()));
    }

    Ok(TaskRequest {
        id: id.to_string(),
        row: row.to_string(),
    })
}

/// Answer body `<task id>;<value>`; the value always shows a fraction
pub fn answer_message(task_id: &str, value: f64) -> String {
    format!("{task_id}{SEPARATOR}{value:?}")
}
