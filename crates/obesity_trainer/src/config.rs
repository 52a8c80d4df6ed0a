//! Pipeline configuration
//!
//! Loaded with the `config` crate: built-in defaults, then an optional TOML
//! file, then `OBESITY_*` environment variables (`__` separates nested
//! keys, e.g. `OBESITY_SPLIT__HOLDOUT=0.2`).

use crate::errors::{Result, TrainerError};
use crate::strategy::{CatBoostParams, LightGbmParams, Strategy, XgBoostParams};
use config::{Config, Environment, File};
use obesity_core::drift::DEFAULT_REFERENCE_BINS;
use obesity_core::{SplitRatios, StrategyKind, TransformConfig, DEFAULT_TARGET_COLUMN};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "OBESITY";

/// Default registered model name
pub const DEFAULT_MODEL_NAME: &str = "ObesityPredictor-Best";

/// Which strategies run, their hyperparameters, and their tie-break order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategySettings {
    pub enabled: Vec<StrategyKind>,
    pub priority: Vec<StrategyKind>,
    pub cat_boost: CatBoostParams,
    pub xg_boost: XgBoostParams,
    pub light_gbm: LightGbmParams,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            enabled: StrategyKind::ALL.to_vec(),
            priority: StrategyKind::ALL.to_vec(),
            cat_boost: CatBoostParams::default(),
            xg_boost: XgBoostParams::default(),
            light_gbm: LightGbmParams::default(),
        }
    }
}

impl StrategySettings {
    /// Configured strategies in `enabled` order
    pub fn strategies(&self) -> Vec<Strategy> {
        self.enabled
            .iter()
            .map(|kind| match kind {
                StrategyKind::CatBoost => Strategy::CatBoost(self.cat_boost.clone()),
                StrategyKind::XgBoost => Strategy::XgBoost(self.xg_boost.clone()),
                StrategyKind::LightGbm => Strategy::LightGbm(self.light_gbm.clone()),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub data_path: PathBuf,
    pub target_column: String,
    pub seed: u64,
    pub split: SplitRatios,
    pub transform: TransformConfig,
    pub strategies: StrategySettings,
    /// Per-strategy budget in seconds; 0 disables it
    pub training_timeout_secs: u64,
    pub parallel: bool,
    pub reference_bins: usize,
    pub model_name: String,
    pub registry_dir: PathBuf,
    pub tracking_enabled: bool,
    pub tracking_path: PathBuf,
    pub promote_winner: bool,
    pub log_level: String,
    /// `pretty` or `json`
    pub log_format: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("data/ObesityDataSet.csv"),
            target_column: DEFAULT_TARGET_COLUMN.to_string(),
            seed: 42,
            split: SplitRatios::default(),
            transform: TransformConfig::default(),
            strategies: StrategySettings::default(),
            training_timeout_secs: 300,
            parallel: true,
            reference_bins: DEFAULT_REFERENCE_BINS,
            model_name: DEFAULT_MODEL_NAME.to_string(),
            registry_dir: PathBuf::from("data/registry"),
            tracking_enabled: true,
            tracking_path: PathBuf::from("data/runs.jsonl"),
            promote_winner: true,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from an optional file plus the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: PipelineConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.split.validate()?;
        if self.target_column.trim().is_empty() {
            return Err(TrainerError::Config("target_column must not be empty".into()));
        }
        if self.model_name.trim().is_empty() {
            return Err(TrainerError::Config("model_name must not be empty".into()));
        }
        if self.strategies.enabled.is_empty() {
            return Err(TrainerError::Config("at least one strategy must be enabled".into()));
        }
        if self.reference_bins < 2 {
            return Err(TrainerError::Config("reference_bins must be at least 2".into()));
        }
        if !matches!(self.log_format.as_str(), "pretty" | "json") {
            return Err(TrainerError::Config(format!(
                "log_format must be 'pretty' or 'json', got '{}'",
                self.log_format
            )));
        }
        Ok(())
    }

    pub fn training_timeout(&self) -> Option<Duration> {
        (self.training_timeout_secs > 0).then(|| Duration::from_secs(self.training_timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.target_column, "NObeyesdad");
        assert_eq!(config.seed, 42);
        assert_eq!(config.model_name, "ObesityPredictor-Best");
        assert_eq!(config.strategies.strategies().len(), 3);
        assert_eq!(config.training_timeout(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
data_path = "input.csv"
seed = 7
parallel = false

[split]
train = 0.8
validation = 0.1
holdout = 0.1

[strategies]
enabled = ["light_gbm", "cat_boost"]

[strategies.light_gbm]
num_leaves = 7
"#
        )
        .unwrap();

        let config = PipelineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.data_path, PathBuf::from("input.csv"));
        assert_eq!(config.seed, 7);
        assert!(!config.parallel);
        assert_eq!(config.split.train, 0.8);
        let kinds: Vec<StrategyKind> = config.strategies.strategies().iter().map(Strategy::kind).collect();
        assert_eq!(kinds, vec![StrategyKind::LightGbm, StrategyKind::CatBoost]);
        assert_eq!(config.strategies.light_gbm.num_leaves, 7);
        assert_eq!(config.strategies.light_gbm.max_bin, LightGbmParams::default().max_bin);
        assert_eq!(config.model_name, DEFAULT_MODEL_NAME);
    }

    #[test]
    fn test_environment_overrides() {
        std::env::set_var("OBESITY_REFERENCE_BINS", "12");
        std::env::set_var("OBESITY_TRANSFORM__DERIVE_AGE_GROUP", "false");
        let config = PipelineConfig::load(None).unwrap();
        std::env::remove_var("OBESITY_REFERENCE_BINS");
        std::env::remove_var("OBESITY_TRANSFORM__DERIVE_AGE_GROUP");
        assert_eq!(config.reference_bins, 12);
        assert!(!config.transform.derive_age_group);
    }

    #[test]
    fn test_invalid_ratios_rejected() {
        let config = PipelineConfig {
            split: SplitRatios {
                train: 0.9,
                validation: 0.9,
                holdout: 0.0,
            },
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(TrainerError::Schema(_))));
    }
}
