//! Training strategies
//!
//! A closed set of gradient-boosting families. Each variant carries its own
//! hyperparameters and maps them onto a shared boosting plan with a
//! distinct tree-growth policy:
//! - CatBoost: symmetric (oblivious) trees
//! - XGBoost: depth-wise greedy CART over exact thresholds
//! - LightGBM: leaf-wise best-first growth over binned features

use crate::boosting::{fit_softmax, BoostingPlan};
use crate::cart::{GrowthPolicy, TreeParams};
use crate::deadline::Deadline;
use crate::errors::{Result, TrainerError};
use obesity_core::deterministic::derive_seed;
use obesity_core::features::FeatureMatrix;
use obesity_core::gbdt::{to_fixed, Booster, SCALE};
use obesity_core::{ObesityLevel, StrategyKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cap on a single leaf's raw output
const MAX_LEAF_VALUE: i64 = 4 * SCALE;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatBoostParams {
    pub iterations: usize,
    pub learning_rate: f64,
    pub depth: usize,
    pub l2_leaf_reg: f64,
    pub border_count: usize,
    pub min_data_in_leaf: usize,
    pub subsample: f64,
    pub random_seed: u64,
}

impl Default for CatBoostParams {
    fn default() -> Self {
        Self {
            iterations: 80,
            learning_rate: 0.1,
            depth: 4,
            l2_leaf_reg: 3.0,
            border_count: 32,
            min_data_in_leaf: 1,
            subsample: 0.8,
            random_seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct XgBoostParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub reg_lambda: f64,
    pub gamma: f64,
    pub min_child_weight: f64,
    pub subsample: f64,
    /// 0 means exact thresholds over every distinct value
    pub max_bin: usize,
    pub seed: u64,
}

impl Default for XgBoostParams {
    fn default() -> Self {
        Self {
            n_estimators: 80,
            learning_rate: 0.1,
            max_depth: 4,
            reg_lambda: 1.0,
            gamma: 0.0,
            min_child_weight: 1.0,
            subsample: 1.0,
            max_bin: 0,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightGbmParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub num_leaves: usize,
    /// 0 means no depth limit
    pub max_depth: usize,
    pub min_data_in_leaf: usize,
    pub min_sum_hessian_in_leaf: f64,
    pub lambda_l2: f64,
    pub bagging_fraction: f64,
    pub max_bin: usize,
    pub seed: u64,
}

impl Default for LightGbmParams {
    fn default() -> Self {
        Self {
            n_estimators: 80,
            learning_rate: 0.1,
            num_leaves: 15,
            max_depth: 0,
            min_data_in_leaf: 5,
            min_sum_hessian_in_leaf: 1e-3,
            lambda_l2: 0.0,
            bagging_fraction: 1.0,
            max_bin: 63,
            seed: 42,
        }
    }
}

/// A configured training strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Strategy {
    CatBoost(CatBoostParams),
    XgBoost(XgBoostParams),
    LightGbm(LightGbmParams),
}

impl Strategy {
    /// One strategy of each family with default hyperparameters.
    pub fn defaults() -> Vec<Strategy> {
        vec![
            Strategy::CatBoost(CatBoostParams::default()),
            Strategy::XgBoost(XgBoostParams::default()),
            Strategy::LightGbm(LightGbmParams::default()),
        ]
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            Strategy::CatBoost(_) => StrategyKind::CatBoost,
            Strategy::XgBoost(_) => StrategyKind::XgBoost,
            Strategy::LightGbm(_) => StrategyKind::LightGbm,
        }
    }

    /// Hyperparameters as a flat JSON map, recorded on artifacts and runs.
    pub fn hyperparameters(&self) -> BTreeMap<String, serde_json::Value> {
        let value = match self {
            Strategy::CatBoost(p) => serde_json::to_value(p),
            Strategy::XgBoost(p) => serde_json::to_value(p),
            Strategy::LightGbm(p) => serde_json::to_value(p),
        };
        match value {
            Ok(serde_json::Value::Object(map)) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        }
    }

    /// Check hyperparameters without touching data.
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: String| {
            Err(TrainerError::Training {
                strategy: self.kind(),
                reason,
            })
        };
        let (rounds, learning_rate, sample) = match self {
            Strategy::CatBoost(p) => (p.iterations, p.learning_rate, p.subsample),
            Strategy::XgBoost(p) => (p.n_estimators, p.learning_rate, p.subsample),
            Strategy::LightGbm(p) => (p.n_estimators, p.learning_rate, p.bagging_fraction),
        };
        if rounds == 0 {
            return fail("number of boosting rounds must be positive".into());
        }
        if !(learning_rate.is_finite() && learning_rate > 0.0) {
            return fail(format!("learning rate must be positive, got {learning_rate}"));
        }
        if !(sample > 0.0 && sample <= 1.0) {
            return fail(format!("row sample fraction must be in (0, 1], got {sample}"));
        }
        match self {
            Strategy::CatBoost(p) => {
                if p.depth == 0 || p.depth > 10 {
                    return fail(format!("depth must be in 1..=10, got {}", p.depth));
                }
                if p.l2_leaf_reg < 0.0 {
                    return fail("l2_leaf_reg must be non-negative".into());
                }
                if p.border_count < 2 {
                    return fail("border_count must be at least 2".into());
                }
            }
            Strategy::XgBoost(p) => {
                if p.max_depth == 0 {
                    return fail("max_depth must be positive".into());
                }
                if p.reg_lambda < 0.0 || p.gamma < 0.0 || p.min_child_weight < 0.0 {
                    return fail("reg_lambda, gamma and min_child_weight must be non-negative".into());
                }
                if p.max_bin == 1 {
                    return fail("max_bin must be 0 (exact) or at least 2".into());
                }
            }
            Strategy::LightGbm(p) => {
                if p.num_leaves < 2 {
                    return fail(format!("num_leaves must be at least 2, got {}", p.num_leaves));
                }
                if p.lambda_l2 < 0.0 || p.min_sum_hessian_in_leaf < 0.0 {
                    return fail("lambda_l2 and min_sum_hessian_in_leaf must be non-negative".into());
                }
                if p.max_bin < 2 {
                    return fail("max_bin must be at least 2".into());
                }
            }
        }
        Ok(())
    }

    /// Map hyperparameters onto a boosting plan.
    pub fn plan(&self) -> BoostingPlan {
        match self {
            Strategy::CatBoost(p) => BoostingPlan {
                rounds: p.iterations,
                learning_rate: p.learning_rate,
                tree: TreeParams {
                    policy: GrowthPolicy::Symmetric,
                    max_depth: p.depth,
                    max_leaves: usize::MAX,
                    min_samples_leaf: p.min_data_in_leaf.max(1),
                    min_child_weight: 0,
                    lambda: to_fixed(p.l2_leaf_reg),
                    gamma: 0,
                    max_leaf_value: MAX_LEAF_VALUE,
                },
                max_bins: p.border_count,
                subsample: p.subsample,
                seed: derive_seed(p.random_seed, StrategyKind::CatBoost.as_str()),
            },
            Strategy::XgBoost(p) => BoostingPlan {
                rounds: p.n_estimators,
                learning_rate: p.learning_rate,
                tree: TreeParams {
                    policy: GrowthPolicy::DepthWise,
                    max_depth: p.max_depth,
                    max_leaves: usize::MAX,
                    min_samples_leaf: 1,
                    min_child_weight: to_fixed(p.min_child_weight),
                    lambda: to_fixed(p.reg_lambda),
                    gamma: to_fixed(p.gamma),
                    max_leaf_value: MAX_LEAF_VALUE,
                },
                max_bins: if p.max_bin == 0 { usize::MAX } else { p.max_bin },
                subsample: p.subsample,
                seed: derive_seed(p.seed, StrategyKind::XgBoost.as_str()),
            },
            Strategy::LightGbm(p) => BoostingPlan {
                rounds: p.n_estimators,
                learning_rate: p.learning_rate,
                tree: TreeParams {
                    policy: GrowthPolicy::LeafWise,
                    max_depth: if p.max_depth == 0 { usize::MAX } else { p.max_depth },
                    max_leaves: p.num_leaves,
                    min_samples_leaf: p.min_data_in_leaf.max(1),
                    min_child_weight: to_fixed(p.min_sum_hessian_in_leaf),
                    lambda: to_fixed(p.lambda_l2),
                    gamma: 0,
                    max_leaf_value: MAX_LEAF_VALUE,
                },
                max_bins: p.max_bin,
                subsample: p.bagging_fraction,
                seed: derive_seed(p.seed, StrategyKind::LightGbm.as_str()),
            },
        }
    }

    /// Fit a booster on a training matrix.
    pub fn fit(&self, x: &FeatureMatrix, y: &[ObesityLevel], deadline: &Deadline) -> Result<Booster> {
        self.validate()?;
        fit_softmax(self.kind(), &self.plan(), x, y, deadline)
    }
}
