//! Core of the obesity classification pipeline
//!
//! Provides everything training and inference share, so both sides run the
//! same code on the same types.
//!
//! Modules:
//! - `types`: labels, record values and input schema
//! - `data`: CSV data source and stratified, partition-typed splits
//! - `features`: feature transform fitted on training data only
//! - `gbdt`: fixed-point multiclass tree ensembles
//! - `metrics`: classification metrics
//! - `drift`: reference profiles and batch drift checks
//! - `artifact`: trained model artifacts
//! - `deterministic`: seeded RNG and tie-breaking
//! - `serde_canon`: canonical JSON and content hashing
//! - `synthetic`: generated cohorts for demos and tests

pub mod artifact;
pub mod data;
pub mod deterministic;
pub mod drift;
pub mod errors;
pub mod features;
pub mod gbdt;
pub mod metrics;
pub mod serde_canon;
pub mod synthetic;
pub mod types;

pub use artifact::{ArtifactParts, ModelArtifact, StrategyKind};
pub use data::{
    load_csv, load_csv_reader, split, Dataset, Holdout, Partition, PartitionTag, RawTable, Split,
    SplitRatios, Train, Validation, DEFAULT_TARGET_COLUMN,
};
pub use drift::{
    BucketShare, DivergenceMetric, DriftPolicy, DriftReport, DriftValidator, DriftVerdict,
    FeatureDrift, MeanShift, PopulationStability, ReferenceProfile,
};
pub use errors::{CoreError, Result, SchemaError};
pub use features::{
    FeatureMatrix, FeatureTransformer, TransformConfig, TransformState, UNKNOWN_CATEGORY_CODE,
};
pub use gbdt::{Booster, ModelError};
pub use metrics::ClassificationMetrics;
pub use types::{FieldKind, FieldSpec, ObesityLevel, Record, Schema, Value};

/// Crate version string for artifact metadata
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
