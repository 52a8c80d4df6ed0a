use obesity_core::{CoreError, SchemaError, StrategyKind};
use obesity_registry::RegistryError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors returned by training, selection and orchestration.
#[derive(Debug, Error)]
pub enum TrainerError {
    #[error("training error ({strategy}): {reason}")]
    Training {
        strategy: StrategyKind,
        reason: String,
    },

    #[error("training timeout ({strategy}): exceeded {limit:?} after {completed_rounds} rounds")]
    Timeout {
        strategy: StrategyKind,
        limit: Duration,
        completed_rounds: usize,
    },

    #[error("no candidate model: all {} strategies failed", failures.len())]
    NoCandidate { failures: Vec<StrategyFailure> },

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for TrainerError {
    fn from(err: config::ConfigError) -> Self {
        TrainerError::Config(err.to_string())
    }
}

impl TrainerError {
    /// Strategy a contained failure belongs to, if any.
    pub fn strategy(&self) -> Option<StrategyKind> {
        match self {
            TrainerError::Training { strategy, .. } | TrainerError::Timeout { strategy, .. } => {
                Some(*strategy)
            }
            _ => None,
        }
    }
}

/// One strategy that produced no artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyFailure {
    pub strategy: StrategyKind,
    pub reason: String,
    pub timed_out: bool,
}

impl StrategyFailure {
    pub fn from_error(strategy: StrategyKind, err: &TrainerError) -> Self {
        Self {
            strategy,
            reason: err.to_string(),
            timed_out: matches!(err, TrainerError::Timeout { .. }),
        }
    }
}

pub type Result<T> = std::result::Result<T, TrainerError>;
