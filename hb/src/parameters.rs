//! Benchmark parameters from the platform's JSON-LD parameter model
//!
//! Only the small part of JSON-LD the platform emits is understood: a single
//! node, an array of nodes or a `@graph`, with compact IRIs expanded through
//! string prefixes in `@context`. Values may be plain, `{"@id": ..}` or
//! `{"@value": ..}`, or arrays of those (the first one counts).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info};

use crate::error::ParameterError;

/// Datasets the benchmark can run on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetChoice {
    CortezRed,
    CortezWhite,
}

impl DatasetChoice {
    pub fn from_iri(iri: &str, namespace: &str) -> Result<Self, ParameterError> {
        match iri.strip_prefix(namespace) {
            Some("CortezRed") => Ok(Self::CortezRed),
            Some("CortezWhite") => Ok(Self::CortezWhite),
            _ => Err(ParameterError::UnknownDataset(iri.to_string())),
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            Self::CortezRed => "winequality-red.csv",
            Self::CortezWhite => "winequality-white.csv",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BenchmarkParameters {
    pub dataset: DatasetChoice,
    pub seed: u64,
}

impl BenchmarkParameters {
    /// Read `<namespace>dataset` and `<namespace>seed` from a parameter model
    pub fn parse(model: &str, namespace: &str) -> Result<Self, ParameterError> {
        debug!(len = model.len(), %namespace, "BenchmarkParameters::parse: called");
        let root: Value = serde_json::from_str(model)?;
        let context = Context::from_root(&root);

        let dataset_key = format!("{namespace}dataset");
        let seed_key = format!("{namespace}seed");
        let mut dataset = None;
        let mut seed = None;

        for node in nodes(&root) {
            for (key, value) in node {
                let key = context.expand(key);
                if key == dataset_key && dataset.is_none() {
                    dataset = scalar(value).map(|iri| context.expand(&iri));
                } else if key == seed_key && seed.is_none() {
                    seed = scalar(value);
                }
            }
        }

        let dataset = dataset.ok_or(ParameterError::Missing(dataset_key))?;
        let seed = seed.ok_or(ParameterError::Missing(seed_key))?;
        let seed = seed
            .trim()
            .parse::<u64>()
            .map_err(|_| ParameterError::InvalidSeed(seed.clone()))?;

        Ok(Self {
            dataset: DatasetChoice::from_iri(&dataset, namespace)?,
            seed,
        })
    }
}

/// Where the controller's data comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSource {
    pub path: PathBuf,
    pub seed: u64,
}

impl DatasetSource {
    /// Combine command-line overrides with the parameter model
    ///
    /// The model is only consulted for values not given explicitly.
    pub fn resolve(
        model: &str,
        namespace: &str,
        data_dir: &Path,
        dataset_override: Option<&Path>,
        seed_override: Option<u64>,
    ) -> Result<Self, ParameterError> {
        if let (Some(path), Some(seed)) = (dataset_override, seed_override) {
            return Ok(Self {
                path: path.to_path_buf(),
                seed,
            });
        }

        let parameters = BenchmarkParameters::parse(model, namespace)?;
        let source = Self {
            path: dataset_override
                .map(Path::to_path_buf)
                .unwrap_or_else(|| data_dir.join(parameters.dataset.file_name())),
            seed: seed_override.unwrap_or(parameters.seed),
        };
        info!(path = %source.path.display(), seed = source.seed, "Resolved dataset");
        Ok(source)
    }
}

struct Context {
    prefixes: HashMap<String, String>,
}

impl Context {
    fn from_root(root: &Value) -> Self {
        let prefixes = root
            .get("@context")
            .and_then(Value::as_object)
            .map(|ctx| {
                ctx.iter()
                    .filter_map(|(term, iri)| {
                        let iri = match iri {
                            Value::String(s) => s.clone(),
                            Value::Object(def) => def.get("@id")?.as_str()?.to_string(),
                            _ => return None,
                        };
                        Some((term.clone(), iri))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self { prefixes }
    }

    fn expand(&self, term: &str) -> String {
        if let Some(iri) = self.prefixes.get(term) {
            return iri.clone();
        }
        match term.split_once(':') {
            Some((prefix, local)) if !local.starts_with("//") => match self.prefixes.get(prefix) {
                Some(base) => format!("{base}{local}"),
                None => term.to_string(),
            },
            _ => term.to_string(),
        }
    }
}

fn nodes(root: &Value) -> Vec<&serde_json::Map<String, Value>> {
    match root {
        Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
        Value::Object(obj) => match obj.get("@graph").and_then(Value::as_array) {
            Some(graph) => graph.iter().filter_map(Value::as_object).collect(),
            None => vec![obj],
        },
        _ => Vec::new(),
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => items.first().and_then(scalar),
        Value::Object(obj) => obj.get("@id").or_else(|| obj.get("@value")).and_then(scalar),
        _ => None,
    }
}
