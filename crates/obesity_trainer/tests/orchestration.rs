//! Full training runs: partial and total strategy failure, reproducibility,
//! persistence and tracking.

use anyhow::Result;
use obesity_core::synthetic::{cohort, CohortSpec};
use obesity_core::{ObesityLevel, RawTable, StrategyKind};
use obesity_registry::{ModelRegistry, RegistryStorage, VersionId};
use obesity_trainer::{
    CatBoostParams, JsonlTracker, LightGbmParams, MemoryTracker, Orchestrator, PipelineConfig,
    RunStatus, StrategySettings, TrackingEvent, TrainerError, XgBoostParams,
};
use std::sync::Arc;

const MODEL: &str = "ObesityPredictor-Best";

fn table() -> Result<RawTable> {
    let counts: Vec<(ObesityLevel, usize)> =
        ObesityLevel::ALL.iter().map(|level| (*level, 30)).collect();
    Ok(cohort(&CohortSpec::new(&counts, 5).with_lifestyle())?)
}

/// Small, fast strategies.
fn quick_strategies() -> StrategySettings {
    StrategySettings {
        cat_boost: CatBoostParams {
            iterations: 15,
            ..CatBoostParams::default()
        },
        xg_boost: XgBoostParams {
            n_estimators: 15,
            ..XgBoostParams::default()
        },
        light_gbm: LightGbmParams {
            n_estimators: 15,
            ..LightGbmParams::default()
        },
        ..StrategySettings::default()
    }
}

fn config() -> PipelineConfig {
    PipelineConfig {
        strategies: quick_strategies(),
        training_timeout_secs: 0,
        ..PipelineConfig::default()
    }
}

fn in_memory(config: PipelineConfig) -> (Orchestrator, Arc<MemoryTracker>) {
    let tracker = Arc::new(MemoryTracker::default());
    let orchestrator = Orchestrator::new(config, Arc::new(ModelRegistry::in_memory()), tracker.clone());
    (orchestrator, tracker)
}

#[test]
fn test_run_registers_and_promotes_best_strategy() -> Result<()> {
    let (orchestrator, tracker) = in_memory(config());
    let outcome = orchestrator.run_on_table(&table()?)?;

    assert_eq!(outcome.version, VersionId(1));
    assert!(outcome.promoted);
    assert_eq!(outcome.table.rows.len(), 3);
    assert!(outcome.table.failures.is_empty());
    assert_eq!(outcome.table.winner().map(|r| r.strategy), Some(outcome.winner));

    let active = orchestrator.registry().get_active_bundle(MODEL)?;
    assert_eq!(active.artifact.strategy, outcome.winner);
    assert_eq!(active.transform.version, outcome.transform_version);

    let holdout = outcome.holdout_metrics.expect("holdout metrics");
    assert!((16..=20).contains(&holdout.samples));
    // Labels follow BMI bands, which the derived BMI column exposes.
    assert!(holdout.accuracy > 0.7, "holdout accuracy {}", holdout.accuracy);

    let events = tracker.events();
    assert_eq!(events.len(), 4);
    assert!(matches!(events.last(), Some(TrackingEvent::Comparison { promoted: true, .. })));
    Ok(())
}

#[test]
fn test_failing_strategy_leaves_remaining_candidates() -> Result<()> {
    let mut config = config();
    config.strategies.xg_boost.learning_rate = -1.0;
    let (orchestrator, tracker) = in_memory(config);

    let outcome = orchestrator.run_on_table(&table()?)?;
    assert_eq!(outcome.table.rows.len(), 2);
    assert_eq!(outcome.table.failures.len(), 1);
    assert_eq!(outcome.table.failures[0].strategy, StrategyKind::XgBoost);
    assert_ne!(outcome.winner, StrategyKind::XgBoost);

    let failed = tracker
        .events()
        .into_iter()
        .filter(|e| {
            matches!(
                e,
                TrackingEvent::StrategyRun {
                    strategy: StrategyKind::XgBoost,
                    status: RunStatus::Failed,
                    ..
                }
            )
        })
        .count();
    assert_eq!(failed, 1);
    assert!(tracker.events().iter().any(|e| matches!(
        e,
        TrackingEvent::StrategyRun {
            strategy: StrategyKind::XgBoost,
            booster_hash: None,
            ..
        }
    )));
    Ok(())
}

#[test]
fn test_all_strategies_failing_is_no_candidate() -> Result<()> {
    let mut config = config();
    config.strategies.cat_boost.depth = 0;
    config.strategies.xg_boost.learning_rate = 0.0;
    config.strategies.light_gbm.num_leaves = 1;
    let (orchestrator, _) = in_memory(config);

    match orchestrator.run_on_table(&table()?) {
        Err(TrainerError::NoCandidate { failures }) => {
            let mut kinds: Vec<StrategyKind> = failures.iter().map(|f| f.strategy).collect();
            kinds.sort();
            assert_eq!(kinds, StrategyKind::ALL.to_vec());
        }
        other => panic!("expected NoCandidate, got {:?}", other.map(|o| o.winner)),
    }
    assert!(orchestrator.registry().model_names().is_empty());
    Ok(())
}

#[test]
fn test_same_seed_reproduces_boosters() -> Result<()> {
    let data = table()?;
    let mut config = config();
    config.parallel = false;
    let (first, _) = in_memory(config.clone());
    let (second, _) = in_memory(config);

    let a = first.run_on_table(&data)?;
    let b = second.run_on_table(&data)?;
    assert_eq!(a.transform_version, b.transform_version);
    let hashes = |o: &obesity_trainer::TrainingOutcome| -> Vec<String> {
        o.table.rows.iter().map(|r| r.booster_hash.clone()).collect()
    };
    assert_eq!(hashes(&a), hashes(&b));
    Ok(())
}

#[test]
fn test_filesystem_run_persists_model_and_run_log() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = PipelineConfig {
        registry_dir: dir.path().join("registry"),
        tracking_path: dir.path().join("runs.jsonl"),
        data_path: dir.path().join("cohort.csv"),
        ..config()
    };
    table()?.write_csv(std::fs::File::create(&config.data_path)?, &config.target_column)?;

    let outcome = Orchestrator::from_config(config.clone())?.run()?;
    let second = Orchestrator::from_config(config.clone())?.run()?;
    assert_eq!(second.version, VersionId(2));

    let registry = ModelRegistry::open(RegistryStorage::filesystem(&config.registry_dir)?)?;
    assert_eq!(registry.active_version(MODEL), Some(VersionId(2)));
    assert_eq!(registry.rollback(MODEL)?, outcome.version);

    let events = JsonlTracker::read_all(&config.tracking_path)?;
    let comparisons = events
        .iter()
        .filter(|e| matches!(e, TrackingEvent::Comparison { .. }))
        .count();
    assert_eq!(comparisons, 2);
    assert_eq!(events.len(), 8);

    // Each strategy run links to the artifact it produced.
    for event in &events[..3] {
        match event {
            TrackingEvent::StrategyRun {
                strategy,
                status,
                transform_version,
                booster_hash,
                ..
            } => {
                assert_eq!(*status, RunStatus::Succeeded);
                assert_eq!(transform_version, &outcome.transform_version);
                let row = outcome
                    .table
                    .rows
                    .iter()
                    .find(|r| r.strategy == *strategy)
                    .expect("ranked row");
                assert_eq!(booster_hash.as_deref(), Some(row.booster_hash.as_str()));
            }
            other => panic!("expected a strategy run, got {other:?}"),
        }
    }
    Ok(())
}

#[test]
fn test_unpromoted_winner_stays_inactive() -> Result<()> {
    let (orchestrator, _) = in_memory(PipelineConfig {
        promote_winner: false,
        ..config()
    });
    let outcome = orchestrator.run_on_table(&table()?)?;
    assert!(!outcome.promoted);
    assert_eq!(orchestrator.registry().latest_version(MODEL), Some(VersionId(1)));
    assert_eq!(orchestrator.registry().active_version(MODEL), None);
    Ok(())
}
