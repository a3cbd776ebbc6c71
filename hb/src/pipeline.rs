//! Sequential task generation and runtime statistics
//!
//! At most one task is outstanding at any time. The next one goes out only
//! after the current one was answered, its answer failed to parse, or it
//! timed out.

use std::time::Instant;

use async_trait::async_trait;
use hobbitcore::BrokerError;
use tracing::{debug, error, info, warn};

use crate::dataset::{Dataset, SEPARATOR};
use crate::error::BenchmarkError;

/// One test row as sent to the system
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Task {
    pub id: usize,
    /// None for a row that could not be turned into a task
    pub payload: Option<String>,
    pub sent_at: Option<Instant>,
    pub received_at: Option<Instant>,
    pub answer: Option<String>,
    pub timed_out: bool,
}

impl Task {
    /// Elapsed milliseconds between send and answer, if both happened
    pub fn runtime_ms(&self) -> Option<f64> {
        match (self.sent_at, self.received_at, &self.answer) {
            (Some(sent), Some(received), Some(_)) => {
                Some(received.saturating_duration_since(sent).as_secs_f64() * 1000.0)
            }
            _ => None,
        }
    }
}

/// Where tasks are published
#[async_trait]
pub trait TaskSink: Send {
    async fn send_task(&mut self, id: usize, payload: &str) -> Result<(), BrokerError>;
}

/// Result of asking for the next task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Sent(usize),
    /// A task is still outstanding; nothing was sent
    Busy(usize),
    /// Every task has been handled
    Finished,
}

/// What an inbound answer did to the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerOutcome {
    /// Answer for the outstanding task; the loop may advance
    Recorded(usize),
    /// Answer for a task that is not outstanding (expired or unknown); ignored
    Stale(usize),
    /// Unparsable; the outstanding task is given up and the loop may advance
    Malformed,
}

/// Aggregates over the whole test set
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub test_data_size: usize,
    pub error_count: usize,
    /// Milliseconds; NaN without a single successful task
    pub runtime_avg: f64,
    pub runtime_std_dev: f64,
}

/// Mean and population standard deviation over the answered tasks
pub fn evaluate(tasks: &[Task]) -> Evaluation {
    let runtimes: Vec<f64> = tasks.iter().filter_map(Task::runtime_ms).collect();
    let (runtime_avg, runtime_std_dev) = if runtimes.is_empty() {
        (f64::NAN, f64::NAN)
    } else {
        let n = runtimes.len() as f64;
        let avg = runtimes.iter().sum::<f64>() / n;
        let variance = runtimes.iter().map(|r| (r - avg).powi(2)).sum::<f64>() / n;
        (avg, variance.sqrt())
    };

    Evaluation {
        test_data_size: tasks.len(),
        error_count: tasks.len() - runtimes.len(),
        runtime_avg,
        runtime_std_dev,
    }
}

/// Parse `<task id>;<value>[;...]`
pub fn parse_answer(body: &str) -> Result<(usize, String), BenchmarkError> {
    let line = body.lines().find(|l| !l.trim().is_empty()).unwrap_or_default();
    let mut fields = line.split(SEPARATOR);
    let (Some(id), Some(value)) = (fields.next(), fields.next()) else {
        return Err(BenchmarkError::MalformedAnswer(body.to_string()));
    };
    let id = id
        .trim()
        .parse::<usize>()
        .map_err(|_| BenchmarkError::MalformedAnswer(body.to_string()))?;
    Ok((id, value.trim().to_string()))
}

pub struct TaskPipeline {
    tasks: Vec<Task>,
    next: usize,
    outstanding: Option<usize>,
}

impl TaskPipeline {
    /// One task per payload, ids in order from 0
    pub fn new(payloads: Vec<Option<String>>) -> Self {
        let tasks = payloads
            .into_iter()
            .enumerate()
            .map(|(id, payload)| Task {
                id,
                payload,
                ..Task::default()
            })
            .collect();
        Self {
            tasks,
            next: 0,
            outstanding: None,
        }
    }

    pub fn from_dataset(dataset: &Dataset) -> Self {
        Self::new((0..dataset.test().len()).map(|i| dataset.task_message(i)).collect())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn outstanding(&self) -> Option<usize> {
        self.outstanding
    }

    /// Publish the next task unless one is outstanding
    ///
    /// Faulty rows and failed publishes are skipped; they end up counted as
    /// errors.
    pub async fn send_next_task(&mut self, sink: &mut dyn TaskSink) -> Progress {
        if let Some(id) = self.outstanding {
            debug!(id, "TaskPipeline::send_next_task: task outstanding");
            return Progress::Busy(id);
        }

        while self.next < self.tasks.len() {
            let id = self.next;
            self.next += 1;

            let Some(payload) = self.tasks[id].payload.clone() else {
                warn!(id, "Skipping faulty task");
                continue;
            };

            // Stamped before publishing; the answer may arrive before send_task returns
            let sent_at = Instant::now();
            match sink.send_task(id, &payload).await {
                Ok(()) => {
                    self.tasks[id].sent_at = Some(sent_at);
                    self.outstanding = Some(id);
                    info!(id, "Sent task");
                    return Progress::Sent(id);
                }
                Err(e) => error!(id, error = %e, "Failed to send task"),
            }
        }

        info!(tasks = self.tasks.len(), "All tasks generated");
        Progress::Finished
    }

    /// Record an answer received at `at`
    pub fn record_answer(&mut self, body: &str, at: Instant) -> AnswerOutcome {
        let (id, value) = match parse_answer(body) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, outstanding = ?self.outstanding, "Could not parse answer");
                self.outstanding = None;
                return AnswerOutcome::Malformed;
            }
        };

        if self.outstanding != Some(id) {
            warn!(id, outstanding = ?self.outstanding, "Ignoring answer for a task that is not outstanding");
            return AnswerOutcome::Stale(id);
        }

        let task = &mut self.tasks[id];
        task.received_at = Some(at);
        task.answer = Some(value);
        self.outstanding = None;
        debug!(id, "TaskPipeline::record_answer: recorded");
        AnswerOutcome::Recorded(id)
    }

    /// Give up on a task if it is still the outstanding one
    pub fn expire(&mut self, id: usize) -> bool {
        if self.outstanding != Some(id) {
            return false;
        }
        warn!(id, "Task timed out");
        self.tasks[id].timed_out = true;
        self.outstanding = None;
        true
    }

    pub fn evaluate(&self) -> Evaluation {
        evaluate(&self.tasks)
    }
}
