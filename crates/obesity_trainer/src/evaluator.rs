//! Candidate ranking and winner selection

use crate::errors::{Result, StrategyFailure, TrainerError};
use obesity_core::{ModelArtifact, StrategyKind};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub rank: usize,
    pub strategy: StrategyKind,
    pub macro_f1: f64,
    pub accuracy: f64,
    pub weighted_f1: f64,
    pub log_loss: Option<f64>,
    pub booster_hash: String,
}

/// Ranked candidates plus the strategies that produced nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonTable {
    pub rows: Vec<ComparisonRow>,
    pub failures: Vec<StrategyFailure>,
}

impl ComparisonTable {
    pub fn winner(&self) -> Option<&ComparisonRow> {
        self.rows.first()
    }

    /// Aligned plain-text rendering for logs and the CLI.
    pub fn render(&self) -> String {
        let mut out = format!(
            "{:<4} {:<10} {:>8} {:>8} {:>11} {:>8}  {}\n",
            "rank", "strategy", "macro_f1", "accuracy", "weighted_f1", "log_loss", "booster"
        );
        for row in &self.rows {
            let log_loss = row
                .log_loss
                .map_or_else(|| "-".to_string(), |v| format!("{v:.4}"));
            out.push_str(&format!(
                "{:<4} {:<10} {:>8.4} {:>8.4} {:>11.4} {:>8}  {}\n",
                row.rank,
                row.strategy.as_str(),
                row.macro_f1,
                row.accuracy,
                row.weighted_f1,
                log_loss,
                &row.booster_hash[..row.booster_hash.len().min(12)]
            ));
        }
        for failure in &self.failures {
            let status = if failure.timed_out { "timeout" } else { "failed" };
            out.push_str(&format!(
                "{:<4} {:<10} {}: {}\n",
                "-",
                failure.strategy.as_str(),
                status,
                failure.reason
            ));
        }
        out
    }
}

impl fmt::Display for ComparisonTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Outcome of selection: the winning artifact and the full table.
#[derive(Debug, Clone)]
pub struct Selection {
    pub winner: ModelArtifact,
    pub table: ComparisonTable,
}

/// Ranks candidates by macro-F1, then accuracy, then strategy priority.
#[derive(Debug, Clone)]
pub struct Evaluator {
    priority: Vec<StrategyKind>,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self {
            priority: StrategyKind::ALL.to_vec(),
        }
    }
}

impl Evaluator {
    /// Strategies missing from `priority` rank after listed ones, in
    /// declaration order.
    pub fn with_priority(priority: Vec<StrategyKind>) -> Self {
        Self { priority }
    }

    fn priority_of(&self, kind: StrategyKind) -> usize {
        self.priority
            .iter()
            .position(|k| *k == kind)
            .unwrap_or_else(|| {
                self.priority.len()
                    + StrategyKind::ALL.iter().position(|k| *k == kind).unwrap_or(0)
            })
    }

    /// Ordering where `Less` means `a` ranks above `b`.
    pub fn compare(&self, a: &ModelArtifact, b: &ModelArtifact) -> Ordering {
        let (ma, mb) = (&a.validation_metrics, &b.validation_metrics);
        score(mb.macro_f1)
            .total_cmp(&score(ma.macro_f1))
            .then_with(|| score(mb.accuracy).total_cmp(&score(ma.accuracy)))
            .then_with(|| self.priority_of(a.strategy).cmp(&self.priority_of(b.strategy)))
    }

    /// Rank candidates, best first.
    pub fn rank(&self, mut candidates: Vec<ModelArtifact>) -> Vec<ModelArtifact> {
        candidates.sort_by(|a, b| self.compare(a, b));
        candidates
    }

    pub fn table(&self, ranked: &[ModelArtifact], failures: Vec<StrategyFailure>) -> ComparisonTable {
        let rows = ranked
            .iter()
            .enumerate()
            .map(|(i, a)| ComparisonRow {
                rank: i + 1,
                strategy: a.strategy,
                macro_f1: a.validation_metrics.macro_f1,
                accuracy: a.validation_metrics.accuracy,
                weighted_f1: a.validation_metrics.weighted_f1,
                log_loss: a.validation_metrics.log_loss,
                booster_hash: a.booster_hash.clone(),
            })
            .collect();
        ComparisonTable { rows, failures }
    }

    /// Rank and pick the best candidate.
    pub fn select(
        &self,
        candidates: Vec<ModelArtifact>,
        failures: Vec<StrategyFailure>,
    ) -> Result<Selection> {
        if candidates.is_empty() {
            return Err(TrainerError::NoCandidate { failures });
        }
        let ranked = self.rank(candidates);
        let table = self.table(&ranked, failures);
        let Some(winner) = ranked.into_iter().next() else {
            return Err(TrainerError::NoCandidate {
                failures: table.failures,
            });
        };
        info!(
            strategy = %winner.strategy,
            macro_f1 = winner.validation_metrics.macro_f1,
            candidates = table.rows.len(),
            failed = table.failures.len(),
            "Selected best strategy"
        );
        Ok(Selection { winner, table })
    }
}

/// NaN ranks worst.
fn score(value: f64) -> f64 {
    if value.is_nan() {
        f64::NEG_INFINITY
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obesity_core::drift::ReferenceProfile;
    use obesity_core::gbdt::Booster;
    use obesity_core::metrics::ClassificationMetrics;
    use obesity_core::{ArtifactParts, ObesityLevel};
    use std::collections::BTreeMap;

    fn candidate(strategy: StrategyKind, macro_f1: f64, accuracy: f64) -> ModelArtifact {
        let mut metrics =
            ClassificationMetrics::compute(&[ObesityLevel::Normal], &[ObesityLevel::Normal], None);
        metrics.macro_f1 = macro_f1;
        metrics.accuracy = accuracy;
        ModelArtifact::new(ArtifactParts {
            strategy,
            hyperparameters: BTreeMap::new(),
            booster: Booster::new(1, vec![0; ObesityLevel::COUNT]),
            transform_version: "t".into(),
            feature_columns: vec!["x".into()],
            validation_metrics: metrics,
            reference: ReferenceProfile {
                features: BTreeMap::new(),
                rows: 0,
            },
            run_id: "r".into(),
            training_rows: 1,
        })
        .unwrap()
    }

    fn failure(strategy: StrategyKind) -> StrategyFailure {
        StrategyFailure {
            strategy,
            reason: "boom".into(),
            timed_out: false,
        }
    }

    #[test]
    fn test_ranks_by_macro_f1_then_accuracy() {
        let evaluator = Evaluator::default();
        let selection = evaluator
            .select(
                vec![
                    candidate(StrategyKind::CatBoost, 0.80, 0.90),
                    candidate(StrategyKind::XgBoost, 0.85, 0.80),
                    candidate(StrategyKind::LightGbm, 0.80, 0.95),
                ],
                Vec::new(),
            )
            .unwrap();
        let order: Vec<StrategyKind> = selection.table.rows.iter().map(|r| r.strategy).collect();
        assert_eq!(
            order,
            vec![StrategyKind::XgBoost, StrategyKind::LightGbm, StrategyKind::CatBoost]
        );
        assert_eq!(selection.winner.strategy, StrategyKind::XgBoost);
        assert_eq!(selection.table.winner().map(|r| r.rank), Some(1));
    }

    #[test]
    fn test_full_tie_uses_priority() {
        let candidates = vec![
            candidate(StrategyKind::LightGbm, 0.8, 0.8),
            candidate(StrategyKind::CatBoost, 0.8, 0.8),
        ];
        let default = Evaluator::default().select(candidates.clone(), Vec::new()).unwrap();
        assert_eq!(default.winner.strategy, StrategyKind::CatBoost);

        let custom = Evaluator::with_priority(vec![StrategyKind::LightGbm])
            .select(candidates, Vec::new())
            .unwrap();
        assert_eq!(custom.winner.strategy, StrategyKind::LightGbm);
    }

    #[test]
    fn test_nan_ranks_last() {
        let ranked = Evaluator::default().rank(vec![
            candidate(StrategyKind::CatBoost, f64::NAN, 1.0),
            candidate(StrategyKind::XgBoost, 0.1, 0.1),
        ]);
        assert_eq!(ranked[0].strategy, StrategyKind::XgBoost);
    }

    #[test]
    fn test_no_candidates_lists_every_failure() {
        let failures = vec![failure(StrategyKind::CatBoost), failure(StrategyKind::XgBoost)];
        match Evaluator::default().select(Vec::new(), failures.clone()) {
            Err(TrainerError::NoCandidate { failures: listed }) => assert_eq!(listed, failures),
            other => panic!("expected NoCandidate, got {other:?}"),
        }
    }

    #[test]
    fn test_render_lists_failures() {
        let evaluator = Evaluator::default();
        let ranked = evaluator.rank(vec![candidate(StrategyKind::CatBoost, 0.5, 0.5)]);
        let text = evaluator.table(&ranked, vec![failure(StrategyKind::XgBoost)]).render();
        assert!(text.starts_with("rank"));
        assert!(text.contains("cat_boost"));
        assert!(text.contains("xg_boost   failed: boom"));
    }
}
