//! Fit one strategy and package the result as a model artifact.

use crate::deadline::Deadline;
use crate::errors::{Result, TrainerError};
use crate::strategy::Strategy;
use obesity_core::drift::ReferenceProfile;
use obesity_core::features::FeatureMatrix;
use obesity_core::gbdt::argmax_level;
use obesity_core::metrics::ClassificationMetrics;
use obesity_core::{ArtifactParts, ModelArtifact, ObesityLevel};
use std::time::{Duration, Instant};
use tracing::info;

/// Borrowed inputs shared by every strategy of a run.
#[derive(Debug, Clone, Copy)]
pub struct TrainingInputs<'a> {
    pub train: &'a FeatureMatrix,
    pub train_labels: &'a [ObesityLevel],
    pub validation: &'a FeatureMatrix,
    pub validation_labels: &'a [ObesityLevel],
    pub reference: &'a ReferenceProfile,
    pub run_id: &'a str,
}

/// Deterministic trainer with an optional per-strategy time budget.
#[derive(Debug, Clone, Default)]
pub struct Trainer {
    time_limit: Option<Duration>,
}

impl Trainer {
    pub fn new(time_limit: Option<Duration>) -> Self {
        Self { time_limit }
    }

    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit
    }

    fn deadline(&self) -> Deadline {
        match self.time_limit {
            Some(limit) => Deadline::after(limit),
            None => Deadline::unbounded(),
        }
    }

    /// Fit `strategy` on the train matrix and score it on validation.
    pub fn train(&self, strategy: &Strategy, inputs: &TrainingInputs<'_>) -> Result<ModelArtifact> {
        let kind = strategy.kind();
        let fail = |reason: String| TrainerError::Training { strategy: kind, reason };

        if inputs.validation.n_rows() == 0 {
            return Err(fail("validation partition is empty".into()));
        }
        if inputs.validation.n_rows() != inputs.validation_labels.len() {
            return Err(fail("validation rows and labels differ in length".into()));
        }
        if inputs.train.transform_version != inputs.validation.transform_version {
            return Err(fail(format!(
                "train and validation were transformed by different states ({} vs {})",
                inputs.train.transform_version, inputs.validation.transform_version
            )));
        }

        info!(strategy = %kind, rows = inputs.train.n_rows(), "Training strategy");
        let started = Instant::now();
        let booster = strategy.fit(inputs.train, inputs.train_labels, &self.deadline())?;

        let proba = booster
            .predict_proba(inputs.validation)
            .map_err(|e| fail(e.to_string()))?;
        let predictions: Vec<ObesityLevel> = proba.iter().map(|p| argmax_level(p)).collect();
        let metrics = ClassificationMetrics::compute(inputs.validation_labels, &predictions, Some(&proba));

        info!(
            strategy = %kind,
            macro_f1 = metrics.macro_f1,
            accuracy = metrics.accuracy,
            trees = booster.num_trees(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Strategy trained"
        );

        let artifact = ModelArtifact::new(ArtifactParts {
            strategy: kind,
            hyperparameters: strategy.hyperparameters(),
            booster,
            transform_version: inputs.train.transform_version.clone(),
            feature_columns: inputs.train.columns.clone(),
            validation_metrics: metrics,
            reference: inputs.reference.clone(),
            run_id: inputs.run_id.to_string(),
            training_rows: inputs.train.n_rows(),
        })?;
        Ok(artifact)
    }
}
