//! Registry entry and lifecycle types

use chrono::{DateTime, Utc};
use obesity_core::{ModelArtifact, StrategyKind, TransformState};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Per-name version number, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(pub u32);

impl VersionId {
    pub const FIRST: VersionId = VersionId(1);

    pub fn next(self) -> VersionId {
        VersionId(self.0 + 1)
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl FromStr for VersionId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim().trim_start_matches(['v', 'V']);
        digits
            .parse::<u32>()
            .ok()
            .filter(|v| *v > 0)
            .map(VersionId)
            .ok_or_else(|| format!("invalid version '{s}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    Register,
    Promote,
    Rollback,
}

/// Append-only audit record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub action: LifecycleAction,
    pub version: VersionId,
    pub previous_active: Option<VersionId>,
    pub at: DateTime<Utc>,
}

/// Summary of one registered version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: VersionId,
    pub strategy: StrategyKind,
    pub booster_hash: String,
    pub transform_version: String,
    pub macro_f1: f64,
    pub accuracy: f64,
    pub registered_at: DateTime<Utc>,
}

/// Everything the registry knows about one model name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub name: String,
    pub versions: Vec<VersionInfo>,
    pub active: Option<VersionId>,
    /// Promotion history; the last element is the active version
    pub lineage: Vec<VersionId>,
    pub events: Vec<LifecycleEvent>,
}

impl RegistryEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            versions: Vec::new(),
            active: None,
            lineage: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn latest_version(&self) -> Option<VersionId> {
        self.versions.iter().map(|v| v.version).max()
    }

    pub fn version(&self, version: VersionId) -> Option<&VersionInfo> {
        self.versions.iter().find(|v| v.version == version)
    }

    pub fn previous_active(&self) -> Option<VersionId> {
        self.lineage.len().checked_sub(2).map(|i| self.lineage[i])
    }
}

/// Active artifact together with the transform it was trained against.
///
/// Both come from the same registry snapshot.
#[derive(Debug, Clone)]
pub struct ActiveModel {
    pub name: String,
    pub version: VersionId,
    pub artifact: Arc<ModelArtifact>,
    pub transform: Arc<TransformState>,
}
