//! Experiment tracking
//!
//! Write-only sink for per-strategy runs and per-run comparisons. Tracking
//! is advisory: callers log a warning on failure and carry on.

use crate::evaluator::ComparisonTable;
use chrono::{DateTime, Utc};
use obesity_core::metrics::ClassificationMetrics;
use obesity_core::StrategyKind;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrackingEvent {
    StrategyRun {
        run_id: String,
        strategy: StrategyKind,
        status: RunStatus,
        hyperparameters: BTreeMap<String, serde_json::Value>,
        /// Transform the strategy was trained against
        transform_version: String,
        /// Hash of the trained booster; `None` when no artifact was produced
        booster_hash: Option<String>,
        metrics: Option<ClassificationMetrics>,
        error: Option<String>,
        duration_ms: u64,
        at: DateTime<Utc>,
    },
    Comparison {
        run_id: String,
        model_name: String,
        table: ComparisonTable,
        registered_version: Option<u32>,
        promoted: bool,
        holdout_metrics: Option<ClassificationMetrics>,
        at: DateTime<Utc>,
    },
}

impl TrackingEvent {
    pub fn run_id(&self) -> &str {
        match self {
            TrackingEvent::StrategyRun { run_id, .. } | TrackingEvent::Comparison { run_id, .. } => run_id,
        }
    }
}

pub trait RunTracker: Send + Sync {
    fn record(&self, event: &TrackingEvent) -> Result<(), TrackingError>;
}

/// Appends one JSON object per line.
pub struct JsonlTracker {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlTracker {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, TrackingError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every event in a log. A missing file reads as empty.
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<TrackingEvent>, TrackingError> {
        let file = match File::open(path.as_ref()) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut events = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            events.push(serde_json::from_str(&line)?);
        }
        Ok(events)
    }
}

impl RunTracker for JsonlTracker {
    fn record(&self, event: &TrackingEvent) -> Result<(), TrackingError> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        let _guard = self.lock.lock();
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullTracker;

impl RunTracker for NullTracker {
    fn record(&self, _event: &TrackingEvent) -> Result<(), TrackingError> {
        Ok(())
    }
}

/// Keeps events in memory; used by tests and embedding callers.
#[derive(Debug, Default)]
pub struct MemoryTracker {
    events: Mutex<Vec<TrackingEvent>>,
}

impl MemoryTracker {
    pub fn events(&self) -> Vec<TrackingEvent> {
        self.events.lock().clone()
    }
}

impl RunTracker for MemoryTracker {
    fn record(&self, event: &TrackingEvent) -> Result<(), TrackingError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}
