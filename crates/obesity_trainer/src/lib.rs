//! Obesity classifier trainer
//!
//! Trains several gradient-boosting strategies on the same transformed
//! data, ranks them on validation metrics, registers the winner and
//! promotes it.
//!
//! - `cart`: histogram tree growers (depth-wise, leaf-wise, symmetric)
//! - `boosting`: multiclass softmax boosting loop
//! - `strategy`: CatBoost-, XGBoost- and LightGBM-style strategies
//! - `trainer`: fit one strategy into a scored artifact
//! - `evaluator`: ranking and selection
//! - `tracking`: experiment run log
//! - `orchestrator`: the full training run

pub mod boosting;
pub mod cart;
pub mod config;
pub mod deadline;
pub mod errors;
pub mod evaluator;
pub mod orchestrator;
pub mod strategy;
pub mod tracking;
pub mod trainer;

pub use config::{PipelineConfig, StrategySettings};
pub use deadline::Deadline;
pub use errors::{Result, StrategyFailure, TrainerError};
pub use evaluator::{ComparisonRow, ComparisonTable, Evaluator, Selection};
pub use orchestrator::{Orchestrator, TrainingOutcome};
pub use strategy::{CatBoostParams, LightGbmParams, Strategy, XgBoostParams};
pub use tracking::{JsonlTracker, MemoryTracker, NullTracker, RunStatus, RunTracker, TrackingEvent};
pub use trainer::{Trainer, TrainingInputs};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
