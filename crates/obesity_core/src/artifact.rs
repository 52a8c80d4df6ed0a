//! Trained model artifacts
//!
//! An artifact bundles a booster with everything needed to reproduce and
//! audit its predictions: the producing strategy and hyperparameters, the
//! transform version it expects, validation metrics and the training
//! reference profile for drift checks.

use crate::drift::ReferenceProfile;
use crate::errors::{CoreError, SchemaError};
use crate::features::FeatureMatrix;
use crate::gbdt::{Booster, ModelError};
use crate::metrics::ClassificationMetrics;
use crate::serde_canon::hash_canonical_hex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Current artifact format version
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Identifier of a training strategy family.
///
/// Declaration order is the default ranking priority for metric ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    CatBoost,
    XgBoost,
    LightGbm,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 3] = [
        StrategyKind::CatBoost,
        StrategyKind::XgBoost,
        StrategyKind::LightGbm,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::CatBoost => "cat_boost",
            StrategyKind::XgBoost => "xg_boost",
            StrategyKind::LightGbm => "light_gbm",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "catboost" => Ok(StrategyKind::CatBoost),
            "xgboost" => Ok(StrategyKind::XgBoost),
            "lightgbm" => Ok(StrategyKind::LightGbm),
            other => Err(format!("unknown strategy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub strategy: StrategyKind,
    pub hyperparameters: BTreeMap<String, serde_json::Value>,
    pub booster: Booster,
    /// Hash of the booster's canonical JSON
    pub booster_hash: String,
    /// Version of the `TransformState` this booster was trained against
    pub transform_version: String,
    pub feature_columns: Vec<String>,
    pub validation_metrics: ClassificationMetrics,
    pub reference: ReferenceProfile,
    pub run_id: String,
    pub training_rows: usize,
    pub created_at: DateTime<Utc>,
}

pub struct ArtifactParts {
    pub strategy: StrategyKind,
    pub hyperparameters: BTreeMap<String, serde_json::Value>,
    pub booster: Booster,
    pub transform_version: String,
    pub feature_columns: Vec<String>,
    pub validation_metrics: ClassificationMetrics,
    pub reference: ReferenceProfile,
    pub run_id: String,
    pub training_rows: usize,
}

impl ModelArtifact {
    pub fn new(parts: ArtifactParts) -> Result<Self, CoreError> {
        parts.booster.validate()?;
        if parts.feature_columns.len() != parts.booster.n_features {
            return Err(ModelError::FeatureMismatch {
                expected: parts.booster.n_features,
                found: parts.feature_columns.len(),
            }
            .into());
        }
        let booster_hash = parts.booster.hash_hex()?;
        Ok(Self {
            format_version: ARTIFACT_FORMAT_VERSION,
            strategy: parts.strategy,
            hyperparameters: parts.hyperparameters,
            booster: parts.booster,
            booster_hash,
            transform_version: parts.transform_version,
            feature_columns: parts.feature_columns,
            validation_metrics: parts.validation_metrics,
            reference: parts.reference,
            run_id: parts.run_id,
            training_rows: parts.training_rows,
            created_at: Utc::now(),
        })
    }

    /// Hash over the full artifact, used as its storage identity.
    pub fn content_hash(&self) -> Result<String, CoreError> {
        Ok(hash_canonical_hex(self)?)
    }

    /// Re-validate the booster and check its recorded hash.
    pub fn verify(&self) -> Result<(), CoreError> {
        self.booster.validate()?;
        let computed = self.booster.hash_hex()?;
        if computed != self.booster_hash {
            return Err(CoreError::Integrity {
                what: format!("{} booster", self.strategy),
                expected: self.booster_hash.clone(),
                computed,
            });
        }
        Ok(())
    }

    /// Refuse matrices produced by a different transform.
    pub fn check_matrix(&self, matrix: &FeatureMatrix) -> Result<(), SchemaError> {
        if matrix.transform_version != self.transform_version {
            return Err(SchemaError::FingerprintMismatch {
                expected: self.transform_version.clone(),
                found: matrix.transform_version.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gbdt::{Tree, SCALE};
    use crate::types::ObesityLevel;

    fn parts() -> ArtifactParts {
        let mut booster = Booster::new(1, vec![0; ObesityLevel::COUNT]);
        booster.push_round(vec![Tree::constant(SCALE, SCALE / 10); ObesityLevel::COUNT]);
        ArtifactParts {
            strategy: StrategyKind::XgBoost,
            hyperparameters: BTreeMap::new(),
            booster,
            transform_version: "abc".into(),
            feature_columns: vec!["Age".into()],
            validation_metrics: ClassificationMetrics::compute(&[], &[], None),
            reference: ReferenceProfile {
                features: BTreeMap::new(),
                rows: 0,
            },
            run_id: "run-1".into(),
            training_rows: 10,
        }
    }

    #[test]
    fn test_strategy_kind_parsing() {
        assert_eq!("CatBoost".parse::<StrategyKind>(), Ok(StrategyKind::CatBoost));
        assert_eq!("light-gbm".parse::<StrategyKind>(), Ok(StrategyKind::LightGbm));
        assert_eq!("xg_boost".parse::<StrategyKind>(), Ok(StrategyKind::XgBoost));
        assert!("forest".parse::<StrategyKind>().is_err());
        assert!(StrategyKind::CatBoost < StrategyKind::LightGbm);
    }

    #[test]
    fn test_new_records_booster_hash() {
        let artifact = ModelArtifact::new(parts()).unwrap();
        artifact.verify().unwrap();

        let mut tampered = artifact.clone();
        tampered.booster.base_scores[0] = 42;
        assert!(matches!(tampered.verify(), Err(CoreError::Integrity { .. })));
    }

    #[test]
    fn test_column_count_must_match() {
        let mut p = parts();
        p.feature_columns.push("Weight".into());
        assert!(ModelArtifact::new(p).is_err());
    }

    #[test]
    fn test_matrix_version_check() {
        let artifact = ModelArtifact::new(parts()).unwrap();
        let matrix = FeatureMatrix {
            columns: vec!["Age".into()],
            rows: vec![vec![0.0]],
            transform_version: "other".into(),
        };
        assert!(artifact.check_matrix(&matrix).is_err());
    }
}
