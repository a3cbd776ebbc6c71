//! Dataset loading, the seeded train/test split and the data messages
//!
//! Files are `;`-separated with a header line; the last column is the target.

use std::fs;
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::error::DatasetError;

pub const SEPARATOR: char = ';';

/// Share of rows that go to the training set
pub const TRAIN_SHARE: f64 = 0.9;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    header: String,
    train: Vec<String>,
    test: Vec<String>,
}

impl Dataset {
    /// Read a dataset file and split it
    pub fn load(path: &Path, seed: u64) -> Result<Self, DatasetError> {
        debug!(path = %path.display(), seed, "Dataset::load: called");
        let content = fs::read_to_string(path).map_err(|source| DatasetError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let dataset = Self::parse(&content, seed)?;
        info!(
            path = %path.display(),
            train = dataset.train.len(),
            test = dataset.test.len(),
            "Loaded dataset"
        );
        Ok(dataset)
    }

    /// Split file content; each data row goes to train with probability [`TRAIN_SHARE`]
    ///
    /// The same seed always yields the same split.
    pub fn parse(content: &str, seed: u64) -> Result<Self, DatasetError> {
        let mut lines = content.lines();
        let header = lines
            .next()
            .map(|h| h.trim_end().to_string())
            .filter(|h| !h.is_empty())
            .ok_or(DatasetError::Empty)?;

        let mut rng = StdRng::seed_from_u64(seed);
        let mut train = Vec::new();
        let mut test = Vec::new();
        for line in lines.map(str::trim_end).filter(|l| !l.is_empty()) {
            if rng.random::<f64>() < TRAIN_SHARE {
                train.push(line.to_string());
            } else {
                test.push(line.to_string());
            }
        }

        Ok(Self { header, train, test })
    }

    /// Build from an explicit split
    pub fn from_parts(header: impl Into<String>, train: Vec<String>, test: Vec<String>) -> Self {
        Self {
            header: header.into(),
            train,
            test,
        }
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn train(&self) -> &[String] {
        &self.train
    }

    pub fn test(&self) -> &[String] {
        &self.test
    }

    /// The whole training set as one message, rows prefixed by their index
    pub fn training_message(&self) -> String {
        let mut message = format!("{SEPARATOR}{}\n", self.header);
        for (index, row) in self.train.iter().enumerate() {
            message.push_str(&format!("{index}{SEPARATOR}{row}\n"));
        }
        message
    }

    /// Task message for test row `index`, with the target column removed
    ///
    /// Returns None for a row that has no target to strip.
    pub fn task_message(&self, index: usize) -> Option<String> {
        let row = self.test.get(index)?;
        let (features, _target) = row.rsplit_once(SEPARATOR)?;
        let header = self
            .header
            .rsplit_once(SEPARATOR)
            .map_or(self.header.as_str(), |(columns, _)| columns);
        Some(format!("{SEPARATOR}{header}\n{index}{SEPARATOR}{features}\n"))
    }
}
