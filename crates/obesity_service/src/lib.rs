//! Obesity classifier inference service
//!
//! Serves the active registry version: validates raw records, applies the
//! transform the model was trained with and returns class probabilities.
//! Also checks live batches for drift against the training profile and
//! reports readiness.

pub mod config;
pub mod errors;
pub mod health;
pub mod inference;
pub mod rules;

pub use config::ServiceConfig;
pub use errors::{Result, ServiceError};
pub use health::{CheckResult, CheckStatus, HealthReport, HealthStatus};
pub use inference::{parse_json_records, read_records, InferencePipeline, Prediction};
pub use rules::{FieldRule, InputRules};
