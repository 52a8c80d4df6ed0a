//! Feature transformation fitted on training data
//!
//! `FeatureTransformer::fit` learns, from the training partition only,
//! per-column imputation fills, standardization parameters and categorical
//! code tables. The resulting `TransformState` is immutable and content
//! addressed: its version is the Blake3 hash of its canonical JSON body.
//! Training and inference both go through `TransformState::apply`, so the
//! two paths cannot diverge.

use crate::data::{Dataset, Train};
use crate::errors::{CoreError, SchemaError};
use crate::serde_canon::{ensure_finite, hash_canonical_hex, CanonicalError};
use crate::types::{FieldKind, Record, Schema, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Encoded value for a categorical level never seen during fit
pub const UNKNOWN_CATEGORY_CODE: f64 = -1.0;

/// Format version of serialized transform states
pub const TRANSFORM_FORMAT_VERSION: u32 = 1;

pub const BMI_COLUMN: &str = "BMI";
pub const AGE_GROUP_COLUMN: &str = "Age_Group";

/// Heights above this are taken to be centimetres.
const CENTIMETRE_HEIGHT_CUTOFF: f64 = 3.0;

/// Which derived columns to compute, and from which fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub derive_bmi: bool,
    pub derive_age_group: bool,
    pub height_field: String,
    pub weight_field: String,
    pub age_field: String,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            derive_bmi: true,
            derive_age_group: true,
            height_field: "Height".to_string(),
            weight_field: "Weight".to_string(),
            age_field: "Age".to_string(),
        }
    }
}

impl TransformConfig {
    /// Disable derivations whose source fields are absent or not numeric.
    fn effective(&self, schema: &Schema) -> Self {
        let numeric = |name: &str| schema.kind_of(name) == Some(FieldKind::Numeric);
        Self {
            derive_bmi: self.derive_bmi && numeric(&self.height_field) && numeric(&self.weight_field),
            derive_age_group: self.derive_age_group && numeric(&self.age_field),
            ..self.clone()
        }
    }
}

/// Fitted parameters for one output column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnTransform {
    /// `(value or fill - center) / scale`
    Numeric {
        name: String,
        fill: f64,
        center: f64,
        scale: f64,
    },
    /// Code lookup; missing takes `fill`, unseen levels take the unknown code
    Categorical {
        name: String,
        codes: BTreeMap<String, u32>,
        fill: String,
    },
}

impl ColumnTransform {
    pub fn name(&self) -> &str {
        match self {
            ColumnTransform::Numeric { name, .. } | ColumnTransform::Categorical { name, .. } => name,
        }
    }

    fn encode(&self, value: &Value) -> f64 {
        match self {
            ColumnTransform::Numeric {
                fill, center, scale, ..
            } => {
                let raw = value.as_number().unwrap_or(*fill);
                (raw - center) / scale
            }
            ColumnTransform::Categorical { codes, fill, .. } => {
                let level = value.as_text().unwrap_or(fill);
                codes
                    .get(level)
                    .map(|c| *c as f64)
                    .unwrap_or(UNKNOWN_CATEGORY_CODE)
            }
        }
    }
}

/// Immutable fitted transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformState {
    /// Content hash of everything below except `created_at`
    pub version: String,
    pub format_version: u32,
    pub schema: Schema,
    pub config: TransformConfig,
    pub columns: Vec<ColumnTransform>,
    pub fitted_rows: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct HashedBody<'a> {
    format_version: u32,
    schema: &'a Schema,
    config: &'a TransformConfig,
    columns: &'a [ColumnTransform],
    fitted_rows: usize,
}

impl TransformState {
    fn compute_version(&self) -> Result<String, CanonicalError> {
        for column in &self.columns {
            if let ColumnTransform::Numeric {
                name,
                fill,
                center,
                scale,
            } = column
            {
                ensure_finite(name, [*fill, *center, *scale])?;
            }
        }
        hash_canonical_hex(&HashedBody {
            format_version: self.format_version,
            schema: &self.schema,
            config: &self.config,
            columns: &self.columns,
            fitted_rows: self.fitted_rows,
        })
    }

    /// Recompute the content hash and compare with `version`.
    pub fn verify(&self) -> Result<(), CoreError> {
        let computed = self.compute_version()?;
        if computed != self.version {
            return Err(CoreError::Integrity {
                what: "transform state".to_string(),
                expected: self.version.clone(),
                computed,
            });
        }
        Ok(())
    }

    /// Output column names in matrix order
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name().to_string()).collect()
    }

    /// Check a raw record against the fitted input schema.
    pub fn validate(&self, record: &Record) -> Result<(), SchemaError> {
        self.schema.validate(record)
    }

    /// Transform records into a feature matrix.
    ///
    /// Every record is validated first; a structurally wrong record fails
    /// the whole call rather than being coerced.
    pub fn apply(&self, records: &[Record]) -> Result<FeatureMatrix, SchemaError> {
        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            self.validate(record)?;
            let augmented = derive(record, &self.config);
            let row: Vec<f64> = self
                .columns
                .iter()
                .map(|column| {
                    let value = augmented.get(column.name()).unwrap_or(&Value::Missing);
                    column.encode(value)
                })
                .collect();
            rows.push(row);
        }
        Ok(FeatureMatrix {
            columns: self.column_names(),
            rows,
            transform_version: self.version.clone(),
        })
    }
}

/// Dense row-major numeric matrix produced by a transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
    pub transform_version: String,
}

impl FeatureMatrix {
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_features(&self) -> usize {
        self.columns.len()
    }

    pub fn row(&self, i: usize) -> Option<&[f64]> {
        self.rows.get(i).map(Vec::as_slice)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// Fits and applies transforms.
pub struct FeatureTransformer;

impl FeatureTransformer {
    /// Fit on the training partition only.
    pub fn fit(train: &Dataset<Train>, config: &TransformConfig) -> Result<TransformState, CoreError> {
        if train.is_empty() {
            return Err(SchemaError::Empty.into());
        }
        let schema = train.schema().clone();
        let config = config.effective(&schema);
        let augmented: Vec<Record> = train.records().iter().map(|r| derive(r, &config)).collect();

        let mut columns: Vec<ColumnTransform> = schema
            .fields()
            .iter()
            .map(|field| fit_column(&field.name, field.kind, &augmented))
            .collect();
        if config.derive_bmi {
            columns.push(fit_column(BMI_COLUMN, FieldKind::Numeric, &augmented));
        }
        if config.derive_age_group {
            columns.push(fit_column(AGE_GROUP_COLUMN, FieldKind::Categorical, &augmented));
        }

        let mut state = TransformState {
            version: String::new(),
            format_version: TRANSFORM_FORMAT_VERSION,
            schema,
            config,
            columns,
            fitted_rows: train.len(),
            created_at: Utc::now(),
        };
        state.version = state.compute_version()?;

        info!(
            version = %state.version,
            columns = state.columns.len(),
            rows = state.fitted_rows,
            "Fitted feature transform"
        );
        Ok(state)
    }

    pub fn apply(state: &TransformState, records: &[Record]) -> Result<FeatureMatrix, SchemaError> {
        state.apply(records)
    }
}

fn fit_column(name: &str, kind: FieldKind, records: &[Record]) -> ColumnTransform {
    match kind {
        FieldKind::Numeric => {
            let mut observed: Vec<f64> = records
                .iter()
                .filter_map(|r| r.get(name).and_then(Value::as_number))
                .collect();
            let fill = median(&mut observed).unwrap_or(0.0);
            let missing = records.len() - observed.len();
            // Statistics over the imputed column.
            let n = records.len() as f64;
            let sum: f64 = observed.iter().sum::<f64>() + fill * missing as f64;
            let center = sum / n;
            let sq: f64 = observed.iter().map(|v| (v - center).powi(2)).sum::<f64>()
                + (fill - center).powi(2) * missing as f64;
            let std = (sq / n).sqrt();
            let scale = if std > 1e-12 { std } else { 1.0 };
            ColumnTransform::Numeric {
                name: name.to_string(),
                fill,
                center,
                scale,
            }
        }
        FieldKind::Categorical => {
            let mut counts: BTreeMap<String, usize> = BTreeMap::new();
            for record in records {
                if let Some(level) = record.get(name).and_then(Value::as_text) {
                    *counts.entry(level.to_string()).or_insert(0) += 1;
                }
            }
            // Mode; ties resolve to the lexicographically smallest level.
            let fill = counts
                .iter()
                .fold(None::<(&String, usize)>, |best, (level, count)| match best {
                    Some((_, c)) if c >= *count => best,
                    _ => Some((level, *count)),
                })
                .map(|(level, _)| level.clone())
                .unwrap_or_default();
            let codes = counts
                .keys()
                .enumerate()
                .map(|(i, level)| (level.clone(), i as u32))
                .collect();
            ColumnTransform::Categorical {
                name: name.to_string(),
                codes,
                fill,
            }
        }
    }
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Body mass index from weight (kg) and height (m, or cm above 3.0).
pub fn body_mass_index(height: f64, weight: f64) -> Option<f64> {
    let metres = if height > CENTIMETRE_HEIGHT_CUTOFF {
        height / 100.0
    } else {
        height
    };
    if metres <= 0.0 || !weight.is_finite() {
        return None;
    }
    Some(weight / (metres * metres))
}

/// Right-closed age bins: (0,18] Teen, (18,30] Young, (30,50] Adult, above Senior.
pub fn age_group(age: f64) -> &'static str {
    if age <= 18.0 {
        "Teen"
    } else if age <= 30.0 {
        "Young"
    } else if age <= 50.0 {
        "Adult"
    } else {
        "Senior"
    }
}

fn derive(record: &Record, config: &TransformConfig) -> Record {
    let mut out = record.clone();
    if config.derive_bmi {
        let height = record.get(&config.height_field).and_then(Value::as_number);
        let weight = record.get(&config.weight_field).and_then(Value::as_number);
        let bmi = match (height, weight) {
            (Some(h), Some(w)) => body_mass_index(h, w).map(Value::Number),
            _ => None,
        };
        out.insert(BMI_COLUMN, bmi.unwrap_or(Value::Missing));
    }
    if config.derive_age_group {
        let group = record
            .get(&config.age_field)
            .and_then(Value::as_number)
            .map(|age| Value::Text(age_group(age).to_string()));
        out.insert(AGE_GROUP_COLUMN, group.unwrap_or(Value::Missing));
    }
    out
}
