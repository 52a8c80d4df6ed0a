//! Classification metrics over the closed label set

use crate::types::ObesityLevel;
use serde::{Deserialize, Serialize};

/// Probability floor used by log-loss
const LOG_LOSS_EPS: f64 = 1e-15;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassReport {
    pub label: ObesityLevel,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Rows are true classes, columns predicted classes, in `ObesityLevel` order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn build(y_true: &[ObesityLevel], y_pred: &[ObesityLevel]) -> Self {
        let mut counts = vec![vec![0usize; ObesityLevel::COUNT]; ObesityLevel::COUNT];
        for (t, p) in y_true.iter().zip(y_pred) {
            counts[t.index()][p.index()] += 1;
        }
        Self { counts }
    }

    pub fn get(&self, truth: ObesityLevel, predicted: ObesityLevel) -> usize {
        self.counts[truth.index()][predicted.index()]
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    pub macro_f1: f64,
    pub weighted_f1: f64,
    pub weighted_precision: f64,
    pub weighted_recall: f64,
    /// Present when probabilities were supplied
    pub log_loss: Option<f64>,
    pub per_class: Vec<ClassReport>,
    pub confusion: ConfusionMatrix,
    pub samples: usize,
}

impl ClassificationMetrics {
    /// Compute metrics for predictions against truth.
    ///
    /// Macro averages run over classes that appear in either `y_true` or
    /// `y_pred`; a class with no predictions has precision 0.
    pub fn compute(
        y_true: &[ObesityLevel],
        y_pred: &[ObesityLevel],
        probabilities: Option<&[Vec<f64>]>,
    ) -> Self {
        let n = y_true.len().min(y_pred.len());
        let (y_true, y_pred) = (&y_true[..n], &y_pred[..n]);
        let confusion = ConfusionMatrix::build(y_true, y_pred);

        let mut per_class = Vec::with_capacity(ObesityLevel::COUNT);
        for level in ObesityLevel::ALL {
            let k = level.index();
            let tp = confusion.counts[k][k];
            let support: usize = confusion.counts[k].iter().sum();
            let predicted: usize = confusion.counts.iter().map(|row| row[k]).sum();
            let precision = ratio(tp, predicted);
            let recall = ratio(tp, support);
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };
            per_class.push((
                ClassReport {
                    label: level,
                    precision,
                    recall,
                    f1,
                    support,
                },
                predicted,
            ));
        }

        let correct: usize = (0..ObesityLevel::COUNT).map(|k| confusion.counts[k][k]).sum();
        let accuracy = ratio(correct, n);

        let present: Vec<&ClassReport> = per_class
            .iter()
            .filter(|(r, predicted)| r.support > 0 || *predicted > 0)
            .map(|(r, _)| r)
            .collect();
        let macro_f1 = if present.is_empty() {
            0.0
        } else {
            present.iter().map(|r| r.f1).sum::<f64>() / present.len() as f64
        };

        let weighted = |f: fn(&ClassReport) -> f64| -> f64 {
            if n == 0 {
                return 0.0;
            }
            per_class
                .iter()
                .map(|(r, _)| f(r) * r.support as f64)
                .sum::<f64>()
                / n as f64
        };
        let weighted_f1 = weighted(|r| r.f1);
        let weighted_precision = weighted(|r| r.precision);
        let weighted_recall = weighted(|r| r.recall);

        let log_loss = probabilities.map(|proba| {
            if n == 0 {
                return 0.0;
            }
            let total: f64 = y_true
                .iter()
                .zip(proba)
                .map(|(t, p)| {
                    let q = p.get(t.index()).copied().unwrap_or(0.0);
                    -(q.clamp(LOG_LOSS_EPS, 1.0)).ln()
                })
                .sum();
            total / n as f64
        });

        Self {
            accuracy,
            macro_f1,
            weighted_f1,
            weighted_precision,
            weighted_recall,
            log_loss,
            per_class: per_class.into_iter().map(|(r, _)| r).collect(),
            confusion,
            samples: n,
        }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ObesityLevel::*;

    #[test]
    fn test_perfect_predictions() {
        let y = vec![Underweight, Normal, Overweight, Obese, Normal];
        let m = ClassificationMetrics::compute(&y, &y, None);
        assert_eq!(m.accuracy, 1.0);
        assert_eq!(m.macro_f1, 1.0);
        assert_eq!(m.weighted_f1, 1.0);
        assert_eq!(m.confusion.total(), 5);
        assert_eq!(m.log_loss, None);
    }

    #[test]
    fn test_known_confusion() {
        let y_true = vec![Normal, Normal, Normal, Obese];
        let y_pred = vec![Normal, Normal, Obese, Obese];
        let m = ClassificationMetrics::compute(&y_true, &y_pred, None);

        assert_eq!(m.accuracy, 0.75);
        assert_eq!(m.confusion.get(Normal, Obese), 1);
        let normal = &m.per_class[Normal.index()];
        assert_eq!(normal.precision, 1.0);
        assert!((normal.recall - 2.0 / 3.0).abs() < 1e-12);
        let obese = &m.per_class[Obese.index()];
        assert_eq!(obese.precision, 0.5);
        assert_eq!(obese.recall, 1.0);

        // Only Normal and Obese enter the macro average.
        let expected_macro = (0.8 + 2.0 / 3.0) / 2.0;
        assert!((m.macro_f1 - expected_macro).abs() < 1e-12);
        let expected_weighted = (0.8 * 3.0 + 2.0 / 3.0) / 4.0;
        assert!((m.weighted_f1 - expected_weighted).abs() < 1e-12);
    }

    #[test]
    fn test_log_loss() {
        let y = vec![Normal, Obese];
        let proba = vec![vec![0.0, 0.5, 0.25, 0.25], vec![0.0, 0.0, 0.0, 1.0]];
        let m = ClassificationMetrics::compute(&y, &y, Some(&proba));
        let expected = -(0.5f64.ln() + 1.0f64.ln()) / 2.0;
        assert!((m.log_loss.unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_empty_input() {
        let m = ClassificationMetrics::compute(&[], &[], None);
        assert_eq!(m.accuracy, 0.0);
        assert_eq!(m.macro_f1, 0.0);
        assert_eq!(m.samples, 0);
    }
}
