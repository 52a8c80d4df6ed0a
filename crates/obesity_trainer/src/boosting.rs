//! Multiclass softmax gradient boosting
//!
//! Each round computes class probabilities from the current raw scores,
//! fits one tree per class to the softmax gradient and hessian, then adds
//! the shrunk tree outputs. Raw scores are advanced with the same
//! fixed-point `tree_contribution` inference uses.

use crate::cart::{BinnedMatrix, TreeGrower, TreeParams};
use crate::deadline::Deadline;
use crate::errors::{Result, TrainerError};
use obesity_core::deterministic::LcgRng;
use obesity_core::features::FeatureMatrix;
use obesity_core::gbdt::{from_fixed, softmax, to_fixed, tree_contribution, Booster, SCALE};
use obesity_core::{ObesityLevel, StrategyKind};
use tracing::debug;

/// Smallest per-row hessian, keeps leaf denominators positive.
const MIN_HESSIAN: f64 = 1e-6;

/// Strategy-independent description of one boosting run.
#[derive(Debug, Clone)]
pub struct BoostingPlan {
    pub rounds: usize,
    pub learning_rate: f64,
    pub tree: TreeParams,
    pub max_bins: usize,
    /// Fraction of rows sampled per round, in (0, 1]
    pub subsample: f64,
    pub seed: u64,
}

pub fn fit_softmax(
    strategy: StrategyKind,
    plan: &BoostingPlan,
    x: &FeatureMatrix,
    y: &[ObesityLevel],
    deadline: &Deadline,
) -> Result<Booster> {
    let fail = |reason: String| TrainerError::Training { strategy, reason };

    let n = x.n_rows();
    if n == 0 {
        return Err(fail("training matrix is empty".into()));
    }
    if n != y.len() {
        return Err(fail(format!("{} rows but {} labels", n, y.len())));
    }
    for (i, row) in x.rows.iter().enumerate() {
        if row.len() != x.n_features() {
            return Err(fail(format!("row {i} has {} features, expected {}", row.len(), x.n_features())));
        }
        if let Some(j) = row.iter().position(|v| !v.is_finite()) {
            return Err(fail(format!(
                "non-finite value in row {i}, column {}",
                x.columns.get(j).map_or("?", String::as_str)
            )));
        }
    }

    let k_classes = ObesityLevel::COUNT;
    let mut counts = vec![0usize; k_classes];
    for level in y {
        counts[level.index()] += 1;
    }
    if counts.iter().filter(|c| **c > 0).count() < 2 {
        return Err(fail("training labels contain a single class".into()));
    }

    let fixed: Vec<Vec<i64>> = x
        .rows
        .iter()
        .map(|row| row.iter().map(|v| to_fixed(*v)).collect())
        .collect();
    let binned = BinnedMatrix::build(&fixed, plan.max_bins);

    // Smoothed log priors
    let base: Vec<i64> = counts
        .iter()
        .map(|c| to_fixed(((*c as f64 + 1.0) / (n as f64 + k_classes as f64)).ln()))
        .collect();
    let mut booster = Booster::new(x.n_features(), base.clone());
    let mut raw: Vec<Vec<i64>> = vec![base; n];

    let weight = to_fixed(plan.learning_rate);
    let keep = (plan.subsample.clamp(0.0, 1.0) * SCALE as f64) as u64;
    let mut rng = LcgRng::new(plan.seed);
    let all_rows: Vec<usize> = (0..n).collect();
    let mut grad = vec![0i64; n];
    let mut hess = vec![0i64; n];

    for round in 0..plan.rounds {
        if deadline.expired() {
            return Err(TrainerError::Timeout {
                strategy,
                limit: deadline.limit().unwrap_or_default(),
                completed_rounds: round,
            });
        }

        let probs: Vec<Vec<f64>> = raw
            .iter()
            .map(|scores| softmax(&scores.iter().map(|s| from_fixed(*s)).collect::<Vec<_>>()))
            .collect();

        let rows: Vec<usize> = if keep >= SCALE as u64 {
            all_rows.clone()
        } else {
            let sampled: Vec<usize> = (0..n).filter(|_| rng.next_unit_micro() < keep).collect();
            if sampled.is_empty() {
                all_rows.clone()
            } else {
                sampled
            }
        };

        let mut trees = Vec::with_capacity(k_classes);
        for k in 0..k_classes {
            for i in 0..n {
                let p = probs[i][k];
                let target = if y[i].index() == k { 1.0 } else { 0.0 };
                grad[i] = to_fixed(p - target);
                hess[i] = to_fixed((p * (1.0 - p)).max(MIN_HESSIAN)).max(1);
            }
            trees.push(TreeGrower::new(&binned, &grad, &hess, &plan.tree).grow(&rows, weight));
        }

        for (i, scores) in raw.iter_mut().enumerate() {
            for (k, tree) in trees.iter().enumerate() {
                scores[k] = scores[k].saturating_add(tree_contribution(tree, &fixed[i], SCALE));
            }
        }
        booster.push_round(trees);

        if (round + 1) % 10 == 0 {
            debug!(%strategy, round = round + 1, sampled = rows.len(), "Boosting progress");
        }
    }

    booster
        .validate()
        .map_err(|e| fail(format!("invalid booster: {e}")))?;
    Ok(booster)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::GrowthPolicy;
    use std::time::Duration;

    fn matrix(rows: Vec<Vec<f64>>) -> FeatureMatrix {
        FeatureMatrix {
            columns: vec!["a".into(), "b".into()],
            rows,
            transform_version: "test".into(),
        }
    }

    fn plan(rounds: usize) -> BoostingPlan {
        BoostingPlan {
            rounds,
            learning_rate: 0.3,
            tree: TreeParams {
                policy: GrowthPolicy::DepthWise,
                max_depth: 3,
                ..TreeParams::default()
            },
            max_bins: 32,
            subsample: 1.0,
            seed: 7,
        }
    }

    /// Feature `a` alone decides Normal vs Obese.
    fn two_class() -> (FeatureMatrix, Vec<ObesityLevel>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..60 {
            let v = i as f64 / 10.0;
            rows.push(vec![v, (i % 3) as f64]);
            labels.push(if v < 3.0 { ObesityLevel::Normal } else { ObesityLevel::Obese });
        }
        (matrix(rows), labels)
    }

    #[test]
    fn test_fit_learns_separable_classes() {
        let (x, y) = two_class();
        let booster = fit_softmax(StrategyKind::XgBoost, &plan(20), &x, &y, &Deadline::unbounded()).unwrap();
        assert_eq!(booster.num_rounds(), 20);
        assert_eq!(booster.predict(&x).unwrap(), y);

        let proba = booster.predict_proba(&x).unwrap();
        for p in &proba {
            assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_fit_is_deterministic_with_subsampling() {
        let (x, y) = two_class();
        let mut p = plan(10);
        p.subsample = 0.6;
        let a = fit_softmax(StrategyKind::CatBoost, &p, &x, &y, &Deadline::unbounded()).unwrap();
        let b = fit_softmax(StrategyKind::CatBoost, &p, &x, &y, &Deadline::unbounded()).unwrap();
        assert_eq!(a.hash_hex().unwrap(), b.hash_hex().unwrap());
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let (x, y) = two_class();
        let single = vec![ObesityLevel::Normal; y.len()];
        let err = fit_softmax(StrategyKind::LightGbm, &plan(2), &x, &single, &Deadline::unbounded()).unwrap_err();
        assert!(matches!(err, TrainerError::Training { strategy: StrategyKind::LightGbm, .. }));

        let mut nan = x.clone();
        nan.rows[3][1] = f64::NAN;
        let err = fit_softmax(StrategyKind::LightGbm, &plan(2), &nan, &y, &Deadline::unbounded()).unwrap_err();
        assert!(err.to_string().contains("non-finite"));

        let empty = matrix(Vec::new());
        assert!(fit_softmax(StrategyKind::XgBoost, &plan(2), &empty, &[], &Deadline::unbounded()).is_err());
    }

    #[test]
    fn test_expired_deadline_times_out() {
        let (x, y) = two_class();
        let err = fit_softmax(
            StrategyKind::CatBoost,
            &plan(5),
            &x,
            &y,
            &Deadline::after(Duration::ZERO),
        )
        .unwrap_err();
        match err {
            TrainerError::Timeout { strategy, completed_rounds, .. } => {
                assert_eq!(strategy, StrategyKind::CatBoost);
                assert_eq!(completed_rounds, 0);
            }
            other => panic!("expected timeout, got {other}"),
        }
    }
}
