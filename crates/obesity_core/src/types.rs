//! Shared record and label types

use crate::errors::SchemaError;
use crate::serde_canon::{hash_canonical_hex, CanonicalError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Closed, ordered set of obesity classes.
///
/// The declaration order is the class index used by boosters and
/// confusion matrices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ObesityLevel {
    Underweight,
    Normal,
    Overweight,
    Obese,
}

impl ObesityLevel {
    pub const ALL: [ObesityLevel; 4] = [
        ObesityLevel::Underweight,
        ObesityLevel::Normal,
        ObesityLevel::Overweight,
        ObesityLevel::Obese,
    ];

    pub const COUNT: usize = Self::ALL.len();

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ObesityLevel::Underweight => "Underweight",
            ObesityLevel::Normal => "Normal",
            ObesityLevel::Overweight => "Overweight",
            ObesityLevel::Obese => "Obese",
        }
    }

    /// Parse a raw label, folding the seven-level survey vocabulary onto
    /// the four canonical classes. Returns `None` for anything else.
    pub fn parse_label(raw: &str) -> Option<Self> {
        let key = raw.trim().to_ascii_lowercase();
        let level = match key.as_str() {
            "underweight" | "insufficient_weight" => ObesityLevel::Underweight,
            "normal" | "normal_weight" => ObesityLevel::Normal,
            "overweight" | "overweight_level_i" | "overweight_level_ii" => ObesityLevel::Overweight,
            "obese" | "obesity_type_i" | "obesity_type_ii" | "obesity_type_iii" => {
                ObesityLevel::Obese
            }
            _ => return None,
        };
        Some(level)
    }
}

impl fmt::Display for ObesityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObesityLevel {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_label(s).ok_or_else(|| SchemaError::UnknownLabel {
            label: s.to_string(),
            row: 0,
        })
    }
}

/// A single cell of a record.
///
/// Serialized untagged so JSON records read naturally:
/// numbers, strings and `null` for missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Text(String),
    Missing,
}

impl Value {
    /// Interpret a raw CSV cell. Empty cells and common NA markers are missing.
    pub fn parse_cell(raw: &str) -> Value {
        let cell = raw.trim();
        if is_missing_marker(cell) {
            return Value::Missing;
        }
        match cell.parse::<f64>() {
            Ok(v) if v.is_finite() => Value::Number(v),
            _ => Value::Text(cell.to_string()),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Text(_) => "text",
            Value::Missing => "missing",
        }
    }
}

pub(crate) fn is_missing_marker(cell: &str) -> bool {
    cell.is_empty()
        || matches!(
            cell.to_ascii_lowercase().as_str(),
            "na" | "nan" | "null" | "none" | "?"
        )
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Numeric,
    Categorical,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Numeric => f.write_str("numeric"),
            FieldKind::Categorical => f.write_str("categorical"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub fn numeric(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Numeric,
        }
    }

    pub fn categorical(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Categorical,
        }
    }
}

/// Ordered list of input fields (target excluded).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<FieldSpec>,
}

impl Schema {
    pub fn new(fields: Vec<FieldSpec>) -> Result<Self, SchemaError> {
        let mut seen = std::collections::BTreeSet::new();
        for field in &fields {
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateColumn(field.name.clone()));
            }
        }
        Ok(Self { fields })
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn kind_of(&self, name: &str) -> Option<FieldKind> {
        self.field(name).map(|f| f.kind)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Content hash of the field list
    pub fn fingerprint(&self) -> Result<String, CanonicalError> {
        hash_canonical_hex(&self.fields)
    }

    /// Check that a record has exactly these fields with compatible values.
    ///
    /// Missing values are allowed; they are imputed downstream.
    pub fn validate(&self, record: &Record) -> Result<(), SchemaError> {
        for field in &self.fields {
            let value = record
                .get(&field.name)
                .ok_or_else(|| SchemaError::MissingField(field.name.clone()))?;
            match (field.kind, value) {
                (_, Value::Missing) => {}
                (FieldKind::Numeric, Value::Number(v)) => {
                    if !v.is_finite() {
                        return Err(SchemaError::NonFinite {
                            field: field.name.clone(),
                        });
                    }
                }
                (FieldKind::Categorical, Value::Text(_)) => {}
                (expected, other) => {
                    return Err(SchemaError::TypeMismatch {
                        field: field.name.clone(),
                        expected,
                        found: other.kind_name().to_string(),
                    })
                }
            }
        }
        if record.len() != self.fields.len() {
            if let Some(extra) = record.names().find(|n| self.field(n).is_none()) {
                return Err(SchemaError::UnexpectedField(extra.to_string()));
            }
        }
        Ok(())
    }
}

/// One observation keyed by field name.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.fields.insert(name.into(), value)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}
