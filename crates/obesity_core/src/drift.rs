//! Distribution drift between live batches and the training reference
//!
//! A `ReferenceProfile` is captured from the training partition when a
//! model is trained and stored inside its artifact. `DriftValidator`
//! compares a batch of raw records against it feature by feature using a
//! pluggable `DivergenceMetric`, then applies a `DriftPolicy` to reach a
//! verdict. Drift reports are advisory: malformed or partial records are
//! counted as missing values rather than rejected.

use crate::data::{Dataset, Train};
use crate::types::{FieldKind, Record, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Smoothing floor for empty bins in PSI
pub const PSI_EPSILON: f64 = 1e-4;

/// Default number of quantile bins for numeric features
pub const DEFAULT_REFERENCE_BINS: usize = 10;

/// Category bucket for levels absent from the reference
const OTHER_CATEGORY: &str = "__other__";

/// Reference distribution of one feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureProfile {
    Numeric {
        /// Interior cut points; bin `i` holds values `<= edges[i]`
        edges: Vec<f64>,
        proportions: Vec<f64>,
        mean: f64,
        std: f64,
        count: usize,
    },
    Categorical {
        frequencies: BTreeMap<String, f64>,
        count: usize,
    },
}

impl FeatureProfile {
    fn numeric(values: &[f64], bins: usize) -> Self {
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let mut edges: Vec<f64> = Vec::new();
        if !sorted.is_empty() {
            for i in 1..bins.max(1) {
                let pos = (i * sorted.len()) / bins;
                let edge = sorted[pos.min(sorted.len() - 1)];
                if edges.last().map_or(true, |last| edge > *last) {
                    edges.push(edge);
                }
            }
        }
        let proportions = bin_proportions(values, &edges);
        let (mean, std) = mean_std(values);
        FeatureProfile::Numeric {
            edges,
            proportions,
            mean,
            std,
            count: values.len(),
        }
    }

    fn categorical(levels: &[&str]) -> Self {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for level in levels {
            *counts.entry((*level).to_string()).or_insert(0) += 1;
        }
        let total = levels.len().max(1) as f64;
        FeatureProfile::Categorical {
            frequencies: counts
                .into_iter()
                .map(|(k, c)| (k, c as f64 / total))
                .collect(),
            count: levels.len(),
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            FeatureProfile::Numeric { .. } => FieldKind::Numeric,
            FeatureProfile::Categorical { .. } => FieldKind::Categorical,
        }
    }
}

fn bin_index(value: f64, edges: &[f64]) -> usize {
    edges.partition_point(|e| *e < value)
}

fn bin_proportions(values: &[f64], edges: &[f64]) -> Vec<f64> {
    let mut counts = vec![0usize; edges.len() + 1];
    for v in values {
        counts[bin_index(*v, edges)] += 1;
    }
    let total = values.len().max(1) as f64;
    counts.into_iter().map(|c| c as f64 / total).collect()
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Per-feature reference captured from the training partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceProfile {
    pub features: BTreeMap<String, FeatureProfile>,
    pub rows: usize,
}

impl ReferenceProfile {
    /// Capture from training data only.
    pub fn capture(train: &Dataset<Train>, bins: usize) -> Self {
        let bins = bins.max(2);
        let mut features = BTreeMap::new();
        for field in train.schema().fields() {
            let profile = match field.kind {
                FieldKind::Numeric => {
                    let values: Vec<f64> = train
                        .records()
                        .iter()
                        .filter_map(|r| r.get(&field.name).and_then(Value::as_number))
                        .collect();
                    FeatureProfile::numeric(&values, bins)
                }
                FieldKind::Categorical => {
                    let levels: Vec<&str> = train
                        .records()
                        .iter()
                        .filter_map(|r| r.get(&field.name).and_then(Value::as_text))
                        .collect();
                    FeatureProfile::categorical(&levels)
                }
            };
            features.insert(field.name.clone(), profile);
        }
        Self {
            features,
            rows: train.len(),
        }
    }

    /// Summarize a batch against this profile's bins and categories.
    pub fn observe(&self, batch: &[Record]) -> BTreeMap<String, ObservedFeature> {
        let mut out = BTreeMap::new();
        for (name, profile) in &self.features {
            let mut missing = 0usize;
            let observed = match profile {
                FeatureProfile::Numeric { edges, .. } => {
                    let values: Vec<f64> = batch
                        .iter()
                        .filter_map(|r| {
                            let v = r.get(name).and_then(Value::as_number).filter(|v| v.is_finite());
                            if v.is_none() {
                                missing += 1;
                            }
                            v
                        })
                        .collect();
                    let (mean, std) = mean_std(&values);
                    ObservedFeature {
                        proportions: bin_proportions(&values, edges),
                        categories: BTreeMap::new(),
                        mean,
                        std,
                        count: values.len(),
                        missing,
                    }
                }
                FeatureProfile::Categorical { frequencies, .. } => {
                    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
                    for record in batch {
                        match record.get(name).and_then(Value::as_text) {
                            Some(level) if frequencies.contains_key(level) => {
                                *counts.entry(level.to_string()).or_insert(0) += 1
                            }
                            Some(_) => *counts.entry(OTHER_CATEGORY.to_string()).or_insert(0) += 1,
                            None => missing += 1,
                        }
                    }
                    let count: usize = counts.values().sum();
                    let total = count.max(1) as f64;
                    ObservedFeature {
                        proportions: Vec::new(),
                        categories: counts
                            .into_iter()
                            .map(|(k, c)| (k, c as f64 / total))
                            .collect(),
                        mean: 0.0,
                        std: 0.0,
                        count,
                        missing,
                    }
                }
            };
            out.insert(name.clone(), observed);
        }
        out
    }
}

/// Batch-side summary of one feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedFeature {
    /// Numeric bin proportions on the reference edges
    pub proportions: Vec<f64>,
    /// Categorical level frequencies; unseen levels pooled
    pub categories: BTreeMap<String, f64>,
    pub mean: f64,
    pub std: f64,
    pub count: usize,
    pub missing: usize,
}

/// Divergence between a reference feature and an observed batch feature.
pub trait DivergenceMetric: Send + Sync {
    fn name(&self) -> &'static str;

    fn score(&self, reference: &FeatureProfile, observed: &ObservedFeature) -> f64;
}

/// Population stability index over reference bins or categories.
#[derive(Debug, Clone, Copy, Default)]
pub struct PopulationStability;

impl DivergenceMetric for PopulationStability {
    fn name(&self) -> &'static str {
        "psi"
    }

    fn score(&self, reference: &FeatureProfile, observed: &ObservedFeature) -> f64 {
        let pairs: Vec<(f64, f64)> = match reference {
            FeatureProfile::Numeric { proportions, .. } => proportions
                .iter()
                .zip(observed.proportions.iter().chain(std::iter::repeat(&0.0)))
                .map(|(r, o)| (*r, *o))
                .collect(),
            FeatureProfile::Categorical { frequencies, .. } => {
                let mut pairs: Vec<(f64, f64)> = frequencies
                    .iter()
                    .map(|(level, r)| (*r, observed.categories.get(level).copied().unwrap_or(0.0)))
                    .collect();
                pairs.push((
                    0.0,
                    observed.categories.get(OTHER_CATEGORY).copied().unwrap_or(0.0),
                ));
                pairs
            }
        };
        pairs
            .into_iter()
            .map(|(r, o)| {
                let r = r.max(PSI_EPSILON);
                let o = o.max(PSI_EPSILON);
                (o - r) * (o / r).ln()
            })
            .sum()
    }
}

/// Absolute mean shift in reference standard deviations; total variation
/// distance for categorical features.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanShift;

impl DivergenceMetric for MeanShift {
    fn name(&self) -> &'static str {
        "mean_shift"
    }

    fn score(&self, reference: &FeatureProfile, observed: &ObservedFeature) -> f64 {
        match reference {
            FeatureProfile::Numeric { mean, std, .. } => {
                let scale = if *std > 1e-12 { *std } else { 1.0 };
                (observed.mean - mean).abs() / scale
            }
            FeatureProfile::Categorical { frequencies, .. } => {
                let mut levels: Vec<&String> = frequencies.keys().collect();
                levels.extend(observed.categories.keys().filter(|k| !frequencies.contains_key(*k)));
                let sum: f64 = levels
                    .into_iter()
                    .map(|level| {
                        let r = frequencies.get(level).copied().unwrap_or(0.0);
                        let o = observed.categories.get(level).copied().unwrap_or(0.0);
                        (r - o).abs()
                    })
                    .sum();
                sum / 2.0
            }
        }
    }
}

/// Thresholds turning per-feature scores into a verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftPolicy {
    /// Feature is drifted when its score exceeds this
    pub feature_threshold: f64,
    /// A single feature above this flags drift on its own
    pub severe_threshold: f64,
    /// Drift when at least this many features drift (0 disables)
    pub min_drifted_features: usize,
    /// Drift when the drifted share reaches this
    pub max_drift_share: f64,
}

impl Default for DriftPolicy {
    fn default() -> Self {
        Self {
            feature_threshold: 0.2,
            severe_threshold: 1.0,
            min_drifted_features: 1,
            max_drift_share: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftVerdict {
    NoDrift,
    DriftDetected,
}

/// Share of one bin or category level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketShare {
    pub bucket: String,
    pub share: f64,
}

impl BucketShare {
    fn new(bucket: impl Into<String>, share: f64) -> Self {
        Self {
            bucket: bucket.into(),
            share,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDrift {
    pub name: String,
    pub kind: FieldKind,
    pub score: f64,
    pub drifted: bool,
    pub reference_mean: Option<f64>,
    pub observed_mean: Option<f64>,
    /// Reference shares per numeric bin or category level
    pub reference: Vec<BucketShare>,
    /// Batch shares over the same buckets
    pub observed: Vec<BucketShare>,
    pub observed_count: usize,
    pub missing: usize,
}

/// Interval label for each bin of `edges`, e.g. `<= 1.5`, `(1.5, 2]`, `> 2`.
fn bin_labels(edges: &[f64]) -> Vec<String> {
    if edges.is_empty() {
        return vec!["all".to_string()];
    }
    let mut labels = Vec::with_capacity(edges.len() + 1);
    labels.push(format!("<= {}", edges[0]));
    for pair in edges.windows(2) {
        labels.push(format!("({}, {}]", pair[0], pair[1]));
    }
    labels.push(format!("> {}", edges[edges.len() - 1]));
    labels
}

/// Reference and observed shares over the reference buckets. Categorical
/// summaries always end with the pooled unseen-level bucket.
fn bucket_summary(
    profile: &FeatureProfile,
    obs: &ObservedFeature,
) -> (Vec<BucketShare>, Vec<BucketShare>) {
    match profile {
        FeatureProfile::Numeric {
            edges, proportions, ..
        } => {
            let labels = bin_labels(edges);
            let reference = labels
                .iter()
                .zip(proportions)
                .map(|(label, share)| BucketShare::new(label.as_str(), *share))
                .collect();
            let observed = labels
                .iter()
                .enumerate()
                .map(|(i, label)| {
                    BucketShare::new(label.as_str(), obs.proportions.get(i).copied().unwrap_or(0.0))
                })
                .collect();
            (reference, observed)
        }
        FeatureProfile::Categorical { frequencies, .. } => {
            let mut reference: Vec<BucketShare> = frequencies
                .iter()
                .map(|(level, share)| BucketShare::new(level.as_str(), *share))
                .collect();
            reference.push(BucketShare::new(OTHER_CATEGORY, 0.0));
            let observed = reference
                .iter()
                .map(|b| {
                    BucketShare::new(
                        b.bucket.as_str(),
                        obs.categories.get(&b.bucket).copied().unwrap_or(0.0),
                    )
                })
                .collect();
            (reference, observed)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub metric: String,
    pub batch_size: usize,
    pub features: Vec<FeatureDrift>,
    pub n_drifted: usize,
    pub drift_share: f64,
    pub verdict: DriftVerdict,
    pub checked_at: DateTime<Utc>,
}

impl DriftReport {
    pub fn feature(&self, name: &str) -> Option<&FeatureDrift> {
        self.features.iter().find(|f| f.name == name)
    }

    pub fn drifted_features(&self) -> impl Iterator<Item = &FeatureDrift> {
        self.features.iter().filter(|f| f.drifted)
    }
}

/// Compares batches against a reference profile.
pub struct DriftValidator {
    metric: Box<dyn DivergenceMetric>,
    policy: DriftPolicy,
}

impl Default for DriftValidator {
    fn default() -> Self {
        Self::new(Box::new(PopulationStability), DriftPolicy::default())
    }
}

impl DriftValidator {
    pub fn new(metric: Box<dyn DivergenceMetric>, policy: DriftPolicy) -> Self {
        Self { metric, policy }
    }

    pub fn policy(&self) -> &DriftPolicy {
        &self.policy
    }

    /// Score every reference feature against the batch.
    ///
    /// An empty batch carries no evidence and reports `NoDrift`.
    pub fn check(&self, reference: &ReferenceProfile, batch: &[Record]) -> DriftReport {
        let observed = reference.observe(batch);
        let mut features = Vec::with_capacity(reference.features.len());

        for (name, profile) in &reference.features {
            let Some(obs) = observed.get(name) else {
                continue;
            };
            let score = if obs.count == 0 {
                0.0
            } else {
                self.metric.score(profile, obs)
            };
            let drifted = obs.count > 0 && score > self.policy.feature_threshold;
            let (reference_mean, observed_mean) = match profile {
                FeatureProfile::Numeric { mean, .. } => {
                    (Some(*mean), (obs.count > 0).then_some(obs.mean))
                }
                FeatureProfile::Categorical { .. } => (None, None),
            };
            let (reference_shares, observed_shares) = bucket_summary(profile, obs);
            features.push(FeatureDrift {
                name: name.clone(),
                kind: profile.kind(),
                score,
                drifted,
                reference_mean,
                observed_mean,
                reference: reference_shares,
                observed: observed_shares,
                observed_count: obs.count,
                missing: obs.missing,
            });
        }

        let n_drifted = features.iter().filter(|f| f.drifted).count();
        let drift_share = if features.is_empty() {
            0.0
        } else {
            n_drifted as f64 / features.len() as f64
        };
        let severe = features.iter().any(|f| f.score > self.policy.severe_threshold);
        let by_count =
            self.policy.min_drifted_features > 0 && n_drifted >= self.policy.min_drifted_features;
        let by_share = n_drifted > 0 && drift_share >= self.policy.max_drift_share;

        let verdict = if !batch.is_empty() && (severe || by_count || by_share) {
            DriftVerdict::DriftDetected
        } else {
            DriftVerdict::NoDrift
        };

        if verdict == DriftVerdict::DriftDetected {
            warn!(
                metric = self.metric.name(),
                n_drifted,
                drift_share,
                batch = batch.len(),
                "Drift detected"
            );
        } else {
            info!(metric = self.metric.name(), batch = batch.len(), "No drift detected");
        }

        DriftReport {
            metric: self.metric.name().to_string(),
            batch_size: batch.len(),
            features,
            n_drifted,
            drift_share,
            verdict,
            checked_at: Utc::now(),
        }
    }
}
