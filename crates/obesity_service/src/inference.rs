//! Inference pipeline
//!
//! Resolves the active model and the exact transform it was trained with
//! from one registry snapshot, validates the record, applies the transform
//! and runs the booster. Holds no mutable state, so one pipeline can serve
//! concurrent callers.

use crate::errors::{Result, ServiceError};
use crate::health::HealthReport;
use crate::rules::InputRules;
use obesity_core::drift::{DriftReport, DriftValidator};
use obesity_core::gbdt::argmax_level;
use obesity_core::{FieldKind, ObesityLevel, Record, Schema, StrategyKind, Value};
use obesity_registry::{ActiveModel, ModelRegistry, VersionId};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: ObesityLevel,
    /// Per-class probabilities in `ObesityLevel::ALL` order
    pub probabilities: Vec<f64>,
    pub confidence: f64,
    pub model_name: String,
    pub model_version: VersionId,
    pub transform_version: String,
    pub strategy: StrategyKind,
    pub booster_hash: String,
}

impl Prediction {
    pub fn probability(&self, level: ObesityLevel) -> f64 {
        self.probabilities.get(level.index()).copied().unwrap_or(0.0)
    }
}

pub struct InferencePipeline {
    registry: Arc<ModelRegistry>,
    model_name: String,
    rules: InputRules,
    drift: DriftValidator,
}

impl InferencePipeline {
    pub fn new(registry: Arc<ModelRegistry>, model_name: impl Into<String>) -> Self {
        Self {
            registry,
            model_name: model_name.into(),
            rules: InputRules::default(),
            drift: DriftValidator::default(),
        }
    }

    pub fn with_rules(mut self, rules: InputRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_drift_validator(mut self, drift: DriftValidator) -> Self {
        self.drift = drift;
        self
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    fn active(&self) -> Result<ActiveModel> {
        Ok(self.registry.get_active_bundle(&self.model_name)?)
    }

    /// Classify one record with the active model.
    pub fn predict(&self, record: &Record) -> Result<Prediction> {
        let bundle = self.active()?;
        let prediction = self.predict_with(&bundle, record)?;
        debug!(
            model = %self.model_name,
            version = %prediction.model_version,
            label = %prediction.label,
            confidence = prediction.confidence,
            "Prediction"
        );
        Ok(prediction)
    }

    /// Classify records against one active version. Fails on the first
    /// invalid record, naming its index.
    pub fn predict_batch(&self, records: &[Record]) -> Result<Vec<Prediction>> {
        let bundle = self.active()?;
        let predictions = records
            .iter()
            .enumerate()
            .map(|(index, record)| {
                self.predict_with(&bundle, record).map_err(|err| match err {
                    ServiceError::Schema(source) => ServiceError::BatchRecord { index, source },
                    other => other,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        info!(
            model = %self.model_name,
            version = %bundle.version,
            records = predictions.len(),
            "Batch prediction"
        );
        Ok(predictions)
    }

    fn predict_with(&self, bundle: &ActiveModel, record: &Record) -> Result<Prediction> {
        bundle.transform.validate(record)?;
        self.rules.check(record)?;

        let matrix = bundle.transform.apply(std::slice::from_ref(record))?;
        bundle.artifact.check_matrix(&matrix)?;
        let row = matrix
            .row(0)
            .ok_or_else(|| ServiceError::Input("transform produced no row".into()))?;
        let probabilities = bundle.artifact.booster.predict_proba_row(row)?;
        let label = argmax_level(&probabilities);
        let confidence = probabilities.get(label.index()).copied().unwrap_or(0.0);

        Ok(Prediction {
            label,
            probabilities,
            confidence,
            model_name: bundle.name.clone(),
            model_version: bundle.version,
            transform_version: bundle.transform.version.clone(),
            strategy: bundle.artifact.strategy,
            booster_hash: bundle.artifact.booster_hash.clone(),
        })
    }

    /// Compare a live batch with the active model's training profile.
    /// Advisory: drift is reported, never raised.
    pub fn check_drift(&self, batch: &[Record]) -> Result<DriftReport> {
        let bundle = self.active()?;
        let report = self.drift.check(&bundle.artifact.reference, batch);
        if report.n_drifted > 0 {
            let drifted: Vec<&str> = report.drifted_features().map(|f| f.name.as_str()).collect();
            warn!(
                model = %self.model_name,
                version = %bundle.version,
                verdict = ?report.verdict,
                features = ?drifted,
                "Input drift"
            );
        }
        Ok(report)
    }

    /// Input schema of the active model's transform.
    pub fn input_schema(&self) -> Result<Schema> {
        Ok(self.active()?.transform.schema.clone())
    }

    pub fn health(&self) -> HealthReport {
        HealthReport::check(&self.registry, &self.model_name)
    }
}

/// Read headed CSV rows as records. With a schema, categorical fields keep
/// their text even when it looks numeric.
pub fn read_records<R: Read>(reader: R, schema: Option<&Schema>) -> Result<Vec<Record>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();

    let mut records = Vec::new();
    for row in rdr.records() {
        let row = row?;
        let mut record = Record::new();
        for (name, cell) in headers.iter().zip(row.iter()) {
            let value = match schema.and_then(|s| s.kind_of(name)) {
                Some(FieldKind::Categorical) => match Value::parse_cell(cell) {
                    Value::Number(_) => Value::Text(cell.to_string()),
                    other => other,
                },
                _ => Value::parse_cell(cell),
            };
            record.insert(name.clone(), value);
        }
        records.push(record);
    }
    Ok(records)
}

/// Parse a JSON object or array of objects into records.
pub fn parse_json_records(text: &str) -> Result<Vec<Record>> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    match value {
        serde_json::Value::Array(_) => Ok(serde_json::from_value(value)?),
        serde_json::Value::Object(_) => Ok(vec![serde_json::from_value(value)?]),
        _ => Err(ServiceError::Input(
            "expected a JSON object or an array of objects".into(),
        )),
    }
}
