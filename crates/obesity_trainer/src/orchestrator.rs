//! End-to-end training run
//!
//! Stages, in order: split, fit the transform on the training partition,
//! transform train and validation, train every configured strategy
//! (in parallel when enabled), rank, score the winner on the holdout
//! partition, then register and promote it. One failing strategy never
//! stops the run.

use crate::config::PipelineConfig;
use crate::errors::{Result, StrategyFailure, TrainerError};
use crate::evaluator::{ComparisonTable, Evaluator};
use crate::strategy::Strategy;
use crate::tracking::{JsonlTracker, NullTracker, RunStatus, RunTracker, TrackingEvent};
use crate::trainer::{Trainer, TrainingInputs};
use chrono::Utc;
use obesity_core::drift::ReferenceProfile;
use obesity_core::gbdt::argmax_level;
use obesity_core::metrics::ClassificationMetrics;
use obesity_core::{
    load_csv, split, Dataset, FeatureTransformer, Holdout, ModelArtifact, ObesityLevel, RawTable,
    StrategyKind, TransformState,
};
use obesity_registry::{ModelRegistry, RegistryStorage, VersionId};
use rayon::prelude::*;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Summary of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingOutcome {
    pub run_id: String,
    pub model_name: String,
    pub transform_version: String,
    pub winner: StrategyKind,
    pub version: VersionId,
    pub promoted: bool,
    pub table: ComparisonTable,
    pub holdout_metrics: Option<ClassificationMetrics>,
}

pub struct Orchestrator {
    config: PipelineConfig,
    registry: Arc<ModelRegistry>,
    tracker: Arc<dyn RunTracker>,
    trainer: Trainer,
    evaluator: Evaluator,
}

impl Orchestrator {
    pub fn new(config: PipelineConfig, registry: Arc<ModelRegistry>, tracker: Arc<dyn RunTracker>) -> Self {
        let trainer = Trainer::new(config.training_timeout());
        let evaluator = Evaluator::with_priority(config.strategies.priority.clone());
        Self {
            config,
            registry,
            tracker,
            trainer,
            evaluator,
        }
    }

    /// Open the filesystem registry and tracker named by `config`.
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        let registry = ModelRegistry::open(RegistryStorage::filesystem(&config.registry_dir)?)?;
        let tracker: Arc<dyn RunTracker> = if config.tracking_enabled {
            let tracker = JsonlTracker::new(&config.tracking_path)
                .map_err(|e| TrainerError::Config(format!("cannot open tracking log: {e}")))?;
            Arc::new(tracker)
        } else {
            Arc::new(NullTracker)
        };
        Ok(Self::new(config, Arc::new(registry), tracker))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Load the configured CSV and run.
    pub fn run(&self) -> Result<TrainingOutcome> {
        let table = load_csv(&self.config.data_path, &self.config.target_column)?;
        self.run_on_table(&table)
    }

    pub fn run_on_table(&self, table: &RawTable) -> Result<TrainingOutcome> {
        let started = Instant::now();
        let config = &self.config;

        let parts = split(table, config.split, config.seed)?;
        let transform = FeatureTransformer::fit(&parts.train, &config.transform)?;
        let transform = self.registry.store_transform(transform)?;
        let x_train = transform.apply(parts.train.records())?;
        let x_validation = transform.apply(parts.validation.records())?;
        let reference = ReferenceProfile::capture(&parts.train, config.reference_bins);

        let run_id = new_run_id(&transform.version, config.seed);
        info!(
            run_id = %run_id,
            transform = %transform.version,
            features = x_train.n_features(),
            train = x_train.n_rows(),
            validation = x_validation.n_rows(),
            "Starting training run"
        );

        let inputs = TrainingInputs {
            train: &x_train,
            train_labels: parts.train.labels(),
            validation: &x_validation,
            validation_labels: parts.validation.labels(),
            reference: &reference,
            run_id: &run_id,
        };
        let strategies = config.strategies.strategies();
        let attempts: Vec<(Strategy, Result<ModelArtifact>, Duration)> = if config.parallel {
            strategies
                .into_par_iter()
                .map(|strategy| self.attempt(strategy, &inputs))
                .collect()
        } else {
            strategies
                .into_iter()
                .map(|strategy| self.attempt(strategy, &inputs))
                .collect()
        };

        let mut candidates = Vec::new();
        let mut failures = Vec::new();
        for (strategy, result, elapsed) in attempts {
            let kind = strategy.kind();
            let event = match result {
                Ok(artifact) => {
                    let event = self.run_event(
                        &run_id,
                        &transform.version,
                        &strategy,
                        RunStatus::Succeeded,
                        Some(&artifact),
                        None,
                        elapsed,
                    );
                    candidates.push(artifact);
                    event
                }
                Err(err) => {
                    warn!(strategy = %kind, error = %err, "Strategy failed, continuing with the rest");
                    let failure = StrategyFailure::from_error(kind, &err);
                    let status = if failure.timed_out {
                        RunStatus::TimedOut
                    } else {
                        RunStatus::Failed
                    };
                    let event = self.run_event(
                        &run_id,
                        &transform.version,
                        &strategy,
                        status,
                        None,
                        Some(failure.reason.clone()),
                        elapsed,
                    );
                    failures.push(failure);
                    event
                }
            };
            self.track(&event);
        }

        let selection = match self.evaluator.select(candidates, failures) {
            Ok(selection) => selection,
            Err(err) => {
                error!(run_id = %run_id, error = %err, "No strategy produced a model");
                return Err(err);
            }
        };
        info!("Strategy comparison\n{}", selection.table.render());

        let winner = selection.winner;
        let strategy = winner.strategy;
        // Scored before registration so a failure leaves the registry untouched.
        let holdout_metrics = score_holdout(&transform, &winner, &parts.holdout)?;

        let version = self.registry.register(&config.model_name, winner)?;
        let promoted = if config.promote_winner {
            self.registry.promote(&config.model_name, version)?;
            true
        } else {
            false
        };

        self.track(&TrackingEvent::Comparison {
            run_id: run_id.clone(),
            model_name: config.model_name.clone(),
            table: selection.table.clone(),
            registered_version: Some(version.0),
            promoted,
            holdout_metrics: holdout_metrics.clone(),
            at: Utc::now(),
        });

        info!(
            run_id = %run_id,
            model = %config.model_name,
            %version,
            strategy = %strategy,
            promoted,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Training run complete"
        );

        Ok(TrainingOutcome {
            run_id,
            model_name: config.model_name.clone(),
            transform_version: transform.version.clone(),
            winner: strategy,
            version,
            promoted,
            table: selection.table,
            holdout_metrics,
        })
    }

    fn attempt(
        &self,
        strategy: Strategy,
        inputs: &TrainingInputs<'_>,
    ) -> (Strategy, Result<ModelArtifact>, Duration) {
        let started = Instant::now();
        // Each worker trains on its own copy of the matrices.
        let train = inputs.train.clone();
        let validation = inputs.validation.clone();
        let owned = TrainingInputs {
            train: &train,
            validation: &validation,
            ..*inputs
        };
        let result = self.trainer.train(&strategy, &owned);
        (strategy, result, started.elapsed())
    }

    fn run_event(
        &self,
        run_id: &str,
        transform_version: &str,
        strategy: &Strategy,
        status: RunStatus,
        artifact: Option<&ModelArtifact>,
        error: Option<String>,
        elapsed: Duration,
    ) -> TrackingEvent {
        TrackingEvent::StrategyRun {
            run_id: run_id.to_string(),
            strategy: strategy.kind(),
            status,
            hyperparameters: strategy.hyperparameters(),
            transform_version: transform_version.to_string(),
            booster_hash: artifact.map(|a| a.booster_hash.clone()),
            metrics: artifact.map(|a| a.validation_metrics.clone()),
            error,
            duration_ms: elapsed.as_millis() as u64,
            at: Utc::now(),
        }
    }

    fn track(&self, event: &TrackingEvent) {
        if let Err(err) = self.tracker.record(event) {
            warn!(run_id = event.run_id(), error = %err, "Failed to record tracking event");
        }
    }
}

/// Winner metrics on the holdout partition; `None` when it is empty.
fn score_holdout(
    transform: &TransformState,
    winner: &ModelArtifact,
    holdout: &Dataset<Holdout>,
) -> Result<Option<ClassificationMetrics>> {
    if holdout.is_empty() {
        return Ok(None);
    }
    let x_holdout = transform.apply(holdout.records())?;
    let proba = winner
        .booster
        .predict_proba(&x_holdout)
        .map_err(|e| TrainerError::Training {
            strategy: winner.strategy,
            reason: format!("holdout scoring failed: {e}"),
        })?;
    let predictions: Vec<ObesityLevel> = proba.iter().map(|p| argmax_level(p)).collect();
    let metrics = ClassificationMetrics::compute(holdout.labels(), &predictions, Some(&proba));
    info!(
        strategy = %winner.strategy,
        macro_f1 = metrics.macro_f1,
        accuracy = metrics.accuracy,
        rows = metrics.samples,
        "Holdout evaluation"
    );
    Ok(Some(metrics))
}

/// Short run identifier derived from the transform, seed and start time.
fn new_run_id(transform_version: &str, seed: u64) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(transform_version.as_bytes());
    hasher.update(&seed.to_le_bytes());
    let now = Utc::now();
    hasher.update(&now.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    let digest = hasher.finalize();
    format!("run-{}-{}", now.format("%Y%m%dT%H%M%S"), &hex::encode(digest.as_bytes())[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::XgBoostParams;
    use obesity_core::synthetic::{cohort, CohortSpec};
    use obesity_core::{SplitRatios, TransformConfig};

    fn winner_for(parts: &obesity_core::Split, transform: &TransformState) -> ModelArtifact {
        let x_train = transform.apply(parts.train.records()).unwrap();
        let x_val = transform.apply(parts.validation.records()).unwrap();
        let reference = ReferenceProfile::capture(&parts.train, 10);
        let inputs = TrainingInputs {
            train: &x_train,
            train_labels: parts.train.labels(),
            validation: &x_val,
            validation_labels: parts.validation.labels(),
            reference: &reference,
            run_id: "run-holdout",
        };
        let strategy = Strategy::XgBoost(XgBoostParams {
            n_estimators: 5,
            ..XgBoostParams::default()
        });
        Trainer::default().train(&strategy, &inputs).unwrap()
    }

    fn parts() -> obesity_core::Split {
        let table = cohort(&CohortSpec::new(
            &[(ObesityLevel::Normal, 30), (ObesityLevel::Obese, 30)],
            11,
        ))
        .unwrap();
        split(&table, SplitRatios::default(), 42).unwrap()
    }

    #[test]
    fn test_holdout_scores_winner() {
        let parts = parts();
        let transform = FeatureTransformer::fit(&parts.train, &TransformConfig::default()).unwrap();
        let winner = winner_for(&parts, &transform);

        let metrics = score_holdout(&transform, &winner, &parts.holdout).unwrap().unwrap();
        assert_eq!(metrics.samples, parts.holdout.len());
    }

    #[test]
    fn test_holdout_failure_is_reported_against_winner() {
        let parts = parts();
        let transform = FeatureTransformer::fit(&parts.train, &TransformConfig::default()).unwrap();
        let winner = winner_for(&parts, &transform);
        let narrower = FeatureTransformer::fit(
            &parts.train,
            &TransformConfig {
                derive_bmi: false,
                ..TransformConfig::default()
            },
        )
        .unwrap();

        let err = score_holdout(&narrower, &winner, &parts.holdout).unwrap_err();
        assert!(matches!(
            err,
            TrainerError::Training { strategy: StrategyKind::XgBoost, .. }
        ));
    }
}
