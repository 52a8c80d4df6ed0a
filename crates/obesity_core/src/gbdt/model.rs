//! Multiclass boosted ensemble with fixed-point scoring
//!
//! Trees are grouped per boosting round, one tree per class. Raw class
//! scores are accumulated in fixed-point integers exactly as during
//! training; only the final softmax runs in floating point, in a fixed
//! order, so repeated predictions are bit-identical.

use super::tree::Tree;
use crate::features::FeatureMatrix;
use crate::serde_canon::{hash_canonical_hex, to_canonical_json, CanonicalError};
use crate::types::ObesityLevel;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model validation failed: {0}")]
    ValidationFailed(String),

    #[error("Feature count mismatch: model expects {expected}, got {found}")]
    FeatureMismatch { expected: usize, found: usize },

    #[error("Canonical serialization error: {0}")]
    CanonicalError(#[from] CanonicalError),
}

/// Fixed-point scale factor (1e6)
pub const SCALE: i64 = 1_000_000;

/// Current booster format version
pub const BOOSTER_VERSION: i32 = 1;

/// Convert a float to fixed-point, saturating at the i64 range.
pub fn to_fixed(value: f64) -> i64 {
    let scaled = (value * SCALE as f64).round();
    if scaled.is_nan() {
        0
    } else {
        // `as` saturates for out-of-range floats
        scaled as i64
    }
}

pub fn from_fixed(value: i64) -> f64 {
    value as f64 / SCALE as f64
}

/// Contribution of one tree: `leaf * weight / scale`
pub fn tree_contribution(tree: &Tree, features: &[i64], scale: i64) -> i64 {
    let leaf_value = tree.evaluate(features);
    let weighted = (leaf_value as i128 * tree.weight as i128) / scale as i128;
    weighted.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Softmax in a fixed summation order.
pub fn softmax(raw: &[f64]) -> Vec<f64> {
    let max = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = raw.iter().map(|z| (z - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

/// Boosted multiclass ensemble
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booster {
    pub version: i32,
    pub scale: i64,
    pub n_features: usize,

    /// Initial raw score per class (fixed-point log prior)
    pub base_scores: Vec<i64>,

    /// `rounds[r][k]` is the tree for class `k` in round `r`
    pub rounds: Vec<Vec<Tree>>,
}

impl Booster {
    pub fn new(n_features: usize, base_scores: Vec<i64>) -> Self {
        Self {
            version: BOOSTER_VERSION,
            scale: SCALE,
            n_features,
            base_scores,
            rounds: Vec::new(),
        }
    }

    pub fn n_classes(&self) -> usize {
        self.base_scores.len()
    }

    pub fn num_rounds(&self) -> usize {
        self.rounds.len()
    }

    pub fn num_trees(&self) -> usize {
        self.rounds.iter().map(Vec::len).sum()
    }

    pub fn push_round(&mut self, trees: Vec<Tree>) {
        self.rounds.push(trees);
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.version != BOOSTER_VERSION {
            return Err(ModelError::ValidationFailed(format!(
                "Unsupported booster version: {}",
                self.version
            )));
        }
        if self.scale <= 0 {
            return Err(ModelError::ValidationFailed(format!("Invalid scale: {}", self.scale)));
        }
        if self.n_classes() != ObesityLevel::COUNT {
            return Err(ModelError::ValidationFailed(format!(
                "Expected {} classes, found {}",
                ObesityLevel::COUNT,
                self.n_classes()
            )));
        }
        for (r, round) in self.rounds.iter().enumerate() {
            if round.len() != self.n_classes() {
                return Err(ModelError::ValidationFailed(format!(
                    "Round {r} has {} trees, expected {}",
                    round.len(),
                    self.n_classes()
                )));
            }
            for (k, tree) in round.iter().enumerate() {
                tree.validate().map_err(|e| {
                    ModelError::ValidationFailed(format!("Round {r} class {k}: {e}"))
                })?;
                if let Some(idx) = tree.max_feature_idx() {
                    if idx >= self.n_features {
                        return Err(ModelError::ValidationFailed(format!(
                            "Round {r} class {k} splits on feature {idx} of {}",
                            self.n_features
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Raw fixed-point class scores for a fixed-point feature row
    pub fn raw_scores(&self, features: &[i64]) -> Vec<i64> {
        let mut scores = self.base_scores.clone();
        for round in &self.rounds {
            for (k, tree) in round.iter().enumerate() {
                if let Some(score) = scores.get_mut(k) {
                    *score = score.saturating_add(tree_contribution(tree, features, self.scale));
                }
            }
        }
        scores
    }

    /// Class probabilities for one float feature row
    pub fn predict_proba_row(&self, row: &[f64]) -> Result<Vec<f64>, ModelError> {
        if row.len() != self.n_features {
            return Err(ModelError::FeatureMismatch {
                expected: self.n_features,
                found: row.len(),
            });
        }
        let fixed: Vec<i64> = row.iter().map(|v| to_fixed(*v)).collect();
        let raw: Vec<f64> = self
            .raw_scores(&fixed)
            .into_iter()
            .map(|s| s as f64 / self.scale as f64)
            .collect();
        Ok(softmax(&raw))
    }

    pub fn predict_proba(&self, matrix: &FeatureMatrix) -> Result<Vec<Vec<f64>>, ModelError> {
        matrix
            .rows
            .iter()
            .map(|row| self.predict_proba_row(row))
            .collect()
    }

    /// Most probable class per row. Ties resolve to the lower class index.
    pub fn predict(&self, matrix: &FeatureMatrix) -> Result<Vec<ObesityLevel>, ModelError> {
        Ok(self
            .predict_proba(matrix)?
            .iter()
            .map(|p| argmax_level(p))
            .collect())
    }

    /// Serialize to canonical JSON (sorted keys, no whitespace)
    pub fn to_canonical_json(&self) -> Result<String, ModelError> {
        Ok(to_canonical_json(self)?)
    }

    /// Blake3 hash of the canonical form as hex
    pub fn hash_hex(&self) -> Result<String, ModelError> {
        Ok(hash_canonical_hex(self)?)
    }
}

/// Index of the largest probability mapped to its class.
pub fn argmax_level(probabilities: &[f64]) -> ObesityLevel {
    let mut best = 0usize;
    for (i, p) in probabilities.iter().enumerate() {
        if *p > probabilities[best] {
            best = i;
        }
    }
    ObesityLevel::from_index(best).unwrap_or(ObesityLevel::Underweight)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gbdt::tree::Node;

    fn create_test_booster() -> Booster {
        let mut booster = Booster::new(2, vec![0, 0, 0, 0]);
        let split_on = |feature: i32, hi: i64| {
            Tree::new(
                vec![
                    Node::internal(0, feature, 0, 1, 2),
                    Node::leaf(1, 0),
                    Node::leaf(2, hi),
                ],
                SCALE / 2,
            )
        };
        booster.push_round(vec![
            Tree::constant(0, SCALE),
            split_on(0, 2 * SCALE),
            split_on(1, 2 * SCALE),
            Tree::constant(0, SCALE),
        ]);
        booster
    }

    #[test]
    fn test_fixed_conversion() {
        assert_eq!(to_fixed(1.5), 1_500_000);
        assert_eq!(to_fixed(-0.0000004), 0);
        assert_eq!(to_fixed(f64::NAN), 0);
        assert_eq!(to_fixed(1e300), i64::MAX);
        assert_eq!(from_fixed(2_500_000), 2.5);
    }

    #[test]
    fn test_raw_scores_apply_tree_weight() {
        let booster = create_test_booster();
        booster.validate().unwrap();
        // Feature 0 positive: class 1 gets 2.0 * 0.5
        assert_eq!(booster.raw_scores(&[SCALE, -SCALE]), vec![0, SCALE, 0, 0]);
    }

    #[test]
    fn test_predict_and_ties() {
        let booster = create_test_booster();
        let matrix = FeatureMatrix {
            columns: vec!["a".into(), "b".into()],
            rows: vec![vec![1.0, -1.0], vec![-1.0, 1.0], vec![-1.0, -1.0]],
            transform_version: "t".into(),
        };
        let labels = booster.predict(&matrix).unwrap();
        assert_eq!(
            labels,
            vec![ObesityLevel::Normal, ObesityLevel::Overweight, ObesityLevel::Underweight]
        );

        let proba = booster.predict_proba(&matrix).unwrap();
        for p in &proba {
            assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        }
        assert_eq!(proba, booster.predict_proba(&matrix).unwrap());
    }

    #[test]
    fn test_feature_mismatch() {
        let booster = create_test_booster();
        assert!(matches!(
            booster.predict_proba_row(&[1.0]),
            Err(ModelError::FeatureMismatch { expected: 2, found: 1 })
        ));
    }

    #[test]
    fn test_validation_catches_bad_rounds() {
        let mut booster = create_test_booster();
        booster.push_round(vec![Tree::constant(0, SCALE)]);
        assert!(booster.validate().is_err());

        let mut wide = create_test_booster();
        wide.n_features = 1;
        assert!(wide.validate().is_err());
    }

    #[test]
    fn test_hash_changes_with_trees() {
        let a = create_test_booster();
        let mut b = a.clone();
        b.base_scores[0] = 1;
        assert_eq!(a.hash_hex().unwrap(), create_test_booster().hash_hex().unwrap());
        assert_ne!(a.hash_hex().unwrap(), b.hash_hex().unwrap());
        assert!(!a.to_canonical_json().unwrap().contains(' '));
    }
}
