//! Service configuration
//!
//! Same layering as the trainer: defaults, optional TOML file, then
//! `OBESITY_*` environment variables. Keys the service does not use are
//! ignored, so one file can configure both binaries.

use crate::errors::{Result, ServiceError};
use crate::rules::InputRules;
use config::{Config, Environment, File};
use obesity_core::drift::{DivergenceMetric, DriftPolicy, DriftValidator, MeanShift, PopulationStability};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub registry_dir: PathBuf,
    pub model_name: String,
    pub rules: InputRules,
    pub drift: DriftPolicy,
    /// `psi` or `mean_shift`
    pub drift_metric: String,
    pub log_level: String,
    pub log_format: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            registry_dir: PathBuf::from("data/registry"),
            model_name: "ObesityPredictor-Best".to_string(),
            rules: InputRules::default(),
            drift: DriftPolicy::default(),
            drift_metric: "psi".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl ServiceConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix("OBESITY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: ServiceConfig = settings.try_deserialize()?;
        config.drift_validator()?;
        Ok(config)
    }

    pub fn drift_validator(&self) -> Result<DriftValidator> {
        let metric: Box<dyn DivergenceMetric> = match self.drift_metric.as_str() {
            "psi" => Box::new(PopulationStability),
            "mean_shift" => Box::new(MeanShift),
            other => {
                return Err(ServiceError::Config(format!(
                    "unknown drift metric '{other}', expected 'psi' or 'mean_shift'"
                )))
            }
        };
        Ok(DriftValidator::new(metric, self.drift.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_file_sets_rules_and_metric() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
model_name = "Candidate"
drift_metric = "mean_shift"
seed = 9

[[rules]]
field = "Age"
min = 10.0
max = 90.0

[drift]
feature_threshold = 0.5
"#
        )
        .unwrap();

        let config = ServiceConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.model_name, "Candidate");
        assert_eq!(config.rules.rules().len(), 1);
        assert_eq!(config.rules.rules()[0].max, Some(90.0));
        assert_eq!(config.drift.feature_threshold, 0.5);
        assert_eq!(config.drift.min_drifted_features, DriftPolicy::default().min_drifted_features);
        assert!(config.drift_validator().is_ok());
    }

    #[test]
    fn test_unknown_metric_rejected() {
        let config = ServiceConfig {
            drift_metric: "kl".into(),
            ..ServiceConfig::default()
        };
        assert!(matches!(config.drift_validator(), Err(ServiceError::Config(_))));
    }
}
