//! Readiness report for the serving model

use chrono::{DateTime, Utc};
use obesity_core::StrategyKind;
use obesity_registry::{ModelRegistry, VersionId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ready,
    NotReady,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
}

impl CheckResult {
    fn pass(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Pass,
            message: message.into(),
        }
    }

    fn fail(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Fail,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub model_name: String,
    pub active_version: Option<VersionId>,
    pub strategy: Option<StrategyKind>,
    pub transform_version: Option<String>,
    pub registered_versions: usize,
    pub checks: Vec<CheckResult>,
    pub version: String,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    /// Ready when an active version exists and both its artifact and its
    /// transform verify.
    pub fn check(registry: &ModelRegistry, model_name: &str) -> Self {
        let mut checks = Vec::new();
        let mut report = Self {
            status: HealthStatus::NotReady,
            model_name: model_name.to_string(),
            active_version: None,
            strategy: None,
            transform_version: None,
            registered_versions: registry.versions(model_name).len(),
            checks: Vec::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            checked_at: Utc::now(),
        };

        if report.registered_versions == 0 {
            checks.push(CheckResult::fail("registry", "model is not registered"));
            report.checks = checks;
            return report;
        }
        checks.push(CheckResult::pass(
            "registry",
            format!("{} registered versions", report.registered_versions),
        ));

        match registry.get_active_bundle(model_name) {
            Ok(bundle) => {
                report.active_version = Some(bundle.version);
                report.strategy = Some(bundle.artifact.strategy);
                report.transform_version = Some(bundle.transform.version.clone());
                checks.push(CheckResult::pass("active_model", format!("{} active", bundle.version)));

                checks.push(match bundle.artifact.verify() {
                    Ok(()) => CheckResult::pass("artifact", "booster hash verified"),
                    Err(e) => CheckResult::fail("artifact", e.to_string()),
                });
                checks.push(match bundle.transform.verify() {
                    Ok(()) => CheckResult::pass("transform", "transform version verified"),
                    Err(e) => CheckResult::fail("transform", e.to_string()),
                });
            }
            Err(e) => checks.push(CheckResult::fail("active_model", e.to_string())),
        }

        if checks.iter().all(|c| c.status == CheckStatus::Pass) {
            report.status = HealthStatus::Ready;
        }
        report.checks = checks;
        report
    }

    pub fn is_ready(&self) -> bool {
        self.status == HealthStatus::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_registry_is_not_ready() {
        let registry = ModelRegistry::in_memory();
        let report = HealthReport::check(&registry, "ObesityPredictor-Best");
        assert!(!report.is_ready());
        assert_eq!(report.checks.len(), 1);
        assert_eq!(report.checks[0].status, CheckStatus::Fail);
        assert_eq!(report.active_version, None);
    }
}
