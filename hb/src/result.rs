//! Result document sent with BENCHMARK_FINISHED

use serde_json::{Map, Value, json};

use crate::pipeline::Evaluation;

pub const HOBBIT_VOCAB: &str = "http://w3id.org/hobbit/vocab#";
pub const XSD: &str = "http://www.w3.org/2001/XMLSchema#";

/// One key performance indicator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Kpi {
    pub iri: String,
    pub data_type: Option<String>,
    pub value: String,
}

impl Kpi {
    pub fn double(iri: String, value: f64) -> Self {
        Self {
            iri,
            data_type: Some("xsd:double".to_string()),
            value: format!("{value:?}"),
        }
    }

    pub fn long(iri: String, value: usize) -> Self {
        Self {
            iri,
            data_type: Some("xsd:long".to_string()),
            value: value.to_string(),
        }
    }
}

/// JSON-LD description of an experiment's outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultDocument {
    experiment_uri: String,
    kpis: Vec<Kpi>,
}

impl ResultDocument {
    pub fn new(experiment_uri: impl Into<String>) -> Self {
        Self {
            experiment_uri: experiment_uri.into(),
            kpis: Vec::new(),
        }
    }

    pub fn with_kpi(mut self, kpi: Kpi) -> Self {
        self.kpis.push(kpi);
        self
    }

    /// Runtime average and deviation, test set size and faulty responses
    pub fn from_evaluation(experiment_uri: impl Into<String>, namespace: &str, evaluation: &Evaluation) -> Self {
        Self::new(experiment_uri)
            .with_kpi(Kpi::double(format!("{namespace}avgRuntime"), evaluation.runtime_avg))
            .with_kpi(Kpi::double(format!("{namespace}stdDevRuntime"), evaluation.runtime_std_dev))
            .with_kpi(Kpi::long(format!("{namespace}testDataSize"), evaluation.test_data_size))
            .with_kpi(Kpi::long(format!("{namespace}faultyResponses"), evaluation.error_count))
    }

    pub fn kpis(&self) -> &[Kpi] {
        &self.kpis
    }

    pub fn to_json(&self) -> Value {
        let mut context = Map::new();
        context.insert("hobbit".to_string(), json!(HOBBIT_VOCAB));
        context.insert("xsd".to_string(), json!(XSD));

        let mut document = Map::new();
        for (index, kpi) in self.kpis.iter().enumerate() {
            let term = format!("kpi{index}");
            let mut definition = Map::new();
            definition.insert("@id".to_string(), json!(kpi.iri));
            if let Some(data_type) = &kpi.data_type {
                definition.insert("@type".to_string(), json!(data_type));
            }
            context.insert(term.clone(), Value::Object(definition));
            document.insert(term, json!(kpi.value));
        }

        document.insert("@context".to_string(), Value::Object(context));
        document.insert("@id".to_string(), json!(self.experiment_uri));
        document.insert("@type".to_string(), json!("hobbit:Experiment"));
        Value::Object(document)
    }

    pub fn to_json_ld(&self) -> String {
        self.to_json().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS: &str = "http://example.org/sail-winter-school-2024/benchmark/";

    #[test]
    fn test_document_from_evaluation() {
        let evaluation = Evaluation {
            test_data_size: 4,
            error_count: 1,
            runtime_avg: 200.0,
            runtime_std_dev: f64::NAN,
        };
        let doc = ResultDocument::from_evaluation("http://w3id.org/hobbit/experiments#1", NS, &evaluation);
        let json: Value = serde_json::from_str(&doc.to_json_ld()).unwrap();

        assert_eq!(json["@id"], "http://w3id.org/hobbit/experiments#1");
        assert_eq!(json["@type"], "hobbit:Experiment");
        assert_eq!(json["@context"]["hobbit"], HOBBIT_VOCAB);
        assert_eq!(json["@context"]["kpi0"]["@id"], format!("{NS}avgRuntime"));
        assert_eq!(json["@context"]["kpi0"]["@type"], "xsd:double");
        assert_eq!(json["@context"]["kpi3"]["@id"], format!("{NS}faultyResponses"));
        assert_eq!(json["@context"]["kpi3"]["@type"], "xsd:long");
        assert_eq!(json["kpi0"], "200.0");
        assert_eq!(json["kpi1"], "NaN");
        assert_eq!(json["kpi2"], "4");
        assert_eq!(json["kpi3"], "1");
    }

    #[test]
    fn test_untyped_kpi_has_no_type() {
        let doc = ResultDocument::new("urn:x").with_kpi(Kpi {
            iri: "urn:k".to_string(),
            data_type: None,
            value: "v".to_string(),
        });
        let json = doc.to_json();
        assert!(json["@context"]["kpi0"].get("@type").is_none());
        assert_eq!(json["kpi0"], "v");
    }
}
