//! Plausibility ranges for raw input values
//!
//! Checked before the transform runs. Missing values pass; the transform
//! imputes them.

use obesity_core::{Record, SchemaError, Value};
use serde::{Deserialize, Serialize};

/// Allowed range for one numeric field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    pub field: String,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    /// Reject values equal to `min`
    #[serde(default)]
    pub exclusive_min: bool,
}

impl FieldRule {
    pub fn between(field: &str, min: f64, max: f64) -> Self {
        Self {
            field: field.to_string(),
            min: Some(min),
            max: Some(max),
            exclusive_min: false,
        }
    }

    pub fn positive(field: &str) -> Self {
        Self {
            field: field.to_string(),
            min: Some(0.0),
            max: None,
            exclusive_min: true,
        }
    }

    pub fn allows(&self, value: f64) -> bool {
        let above = match self.min {
            Some(min) if self.exclusive_min => value > min,
            Some(min) => value >= min,
            None => true,
        };
        above && self.max.map_or(true, |max| value <= max)
    }

    /// Interval notation, e.g. `[0, 120]` or `(0, inf)`
    pub fn describe(&self) -> String {
        let open = if self.exclusive_min { '(' } else { '[' };
        let lo = self.min.map_or_else(|| "-inf".to_string(), |v| v.to_string());
        let hi = self.max.map_or_else(|| "inf".to_string(), |v| v.to_string());
        let close = if self.max.is_some() { ']' } else { ')' };
        format!("{open}{lo}, {hi}{close}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputRules {
    rules: Vec<FieldRule>,
}

impl Default for InputRules {
    fn default() -> Self {
        Self {
            rules: vec![
                FieldRule::between("Age", 0.0, 120.0),
                FieldRule::positive("Height"),
                FieldRule::positive("Weight"),
            ],
        }
    }
}

impl InputRules {
    pub fn new(rules: Vec<FieldRule>) -> Self {
        Self { rules }
    }

    pub fn none() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn rules(&self) -> &[FieldRule] {
        &self.rules
    }

    /// First numeric value outside its range. Fields absent from the
    /// record are left to schema validation.
    pub fn check(&self, record: &Record) -> Result<(), SchemaError> {
        for rule in &self.rules {
            if let Some(Value::Number(v)) = record.get(&rule.field) {
                if !rule.allows(*v) {
                    return Err(SchemaError::OutOfRange {
                        field: rule.field.clone(),
                        value: *v,
                        range: rule.describe(),
                    });
                }
            }
        }
        Ok(())
    }
}
