//! Tabular data source and stratified partitioning
//!
//! `RawTable` is the loaded table with its inferred schema. `split`
//! partitions it into train/validation/holdout `Dataset`s whose partition
//! is carried in the type, so a feature transform can only be fitted on
//! training data.

use crate::deterministic::{derive_seed, LcgRng};
use crate::errors::{CoreError, SchemaError};
use crate::types::{is_missing_marker, FieldKind, FieldSpec, ObesityLevel, Record, Schema, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Default label column name
pub const DEFAULT_TARGET_COLUMN: &str = "NObeyesdad";

/// Allowed distance of the split ratio sum from 1
pub const RATIO_SUM_TOLERANCE: f64 = 1e-9;

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Train {}
    impl Sealed for super::Validation {}
    impl Sealed for super::Holdout {}
}

/// Marker for one of the three partitions. Sealed.
pub trait Partition: sealed::Sealed + Clone + Send + Sync + 'static {
    const TAG: PartitionTag;
}

#[derive(Debug, Clone, Copy)]
pub struct Train;

#[derive(Debug, Clone, Copy)]
pub struct Validation;

#[derive(Debug, Clone, Copy)]
pub struct Holdout;

impl Partition for Train {
    const TAG: PartitionTag = PartitionTag::Train;
}

impl Partition for Validation {
    const TAG: PartitionTag = PartitionTag::Validation;
}

impl Partition for Holdout {
    const TAG: PartitionTag = PartitionTag::Holdout;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionTag {
    Train,
    Validation,
    Holdout,
}

/// Loaded table: records, labels and the inferred input schema.
#[derive(Debug, Clone)]
pub struct RawTable {
    schema: Arc<Schema>,
    records: Vec<Record>,
    labels: Vec<ObesityLevel>,
}

impl RawTable {
    /// Build a table from in-memory records, validating every record.
    pub fn new(
        schema: Schema,
        records: Vec<Record>,
        labels: Vec<ObesityLevel>,
    ) -> Result<Self, SchemaError> {
        if records.len() != labels.len() {
            return Err(SchemaError::LengthMismatch {
                records: records.len(),
                labels: labels.len(),
            });
        }
        if records.is_empty() {
            return Err(SchemaError::Empty);
        }
        for record in &records {
            schema.validate(record)?;
        }
        Ok(Self {
            schema: Arc::new(schema),
            records,
            labels,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn labels(&self) -> &[ObesityLevel] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn class_counts(&self) -> BTreeMap<ObesityLevel, usize> {
        class_counts(&self.labels)
    }

    /// Share of rows per class.
    pub fn class_distribution(&self) -> BTreeMap<ObesityLevel, f64> {
        let n = self.len().max(1) as f64;
        self.class_counts()
            .into_iter()
            .map(|(level, count)| (level, count as f64 / n))
            .collect()
    }

    /// Write the table back out as CSV with the target as last column.
    pub fn write_csv<W: Write>(&self, writer: W, target_column: &str) -> Result<(), CoreError> {
        let mut wtr = csv::Writer::from_writer(writer);
        let mut header: Vec<&str> = self.schema.fields().iter().map(|f| f.name.as_str()).collect();
        header.push(target_column);
        wtr.write_record(&header)?;

        for (record, label) in self.records.iter().zip(&self.labels) {
            let mut row: Vec<String> = Vec::with_capacity(header.len());
            for field in self.schema.fields() {
                let cell = match record.get(&field.name) {
                    Some(Value::Number(v)) => v.to_string(),
                    Some(Value::Text(s)) => s.clone(),
                    Some(Value::Missing) | None => String::new(),
                };
                row.push(cell);
            }
            row.push(label.as_str().to_string());
            wtr.write_record(&row)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

fn class_counts(labels: &[ObesityLevel]) -> BTreeMap<ObesityLevel, usize> {
    let mut counts = BTreeMap::new();
    for level in labels {
        *counts.entry(*level).or_insert(0) += 1;
    }
    counts
}

/// Load a CSV file with a header row.
///
/// Column kinds are inferred: a column is numeric when every non-missing
/// cell parses as a finite number, categorical otherwise.
pub fn load_csv(path: impl AsRef<Path>, target_column: &str) -> Result<RawTable, CoreError> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)?;
    let table = load_csv_reader(file, target_column)?;
    info!(
        path = %path.display(),
        rows = table.len(),
        fields = table.schema().len(),
        "Loaded data source"
    );
    Ok(table)
}

/// Load CSV from any reader. See [`load_csv`].
pub fn load_csv_reader<R: Read>(reader: R, target_column: &str) -> Result<RawTable, CoreError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
    let mut seen = std::collections::BTreeSet::new();
    for name in &headers {
        if !seen.insert(name.as_str()) {
            return Err(SchemaError::DuplicateColumn(name.clone()).into());
        }
    }
    let target_idx = headers
        .iter()
        .position(|h| h == target_column)
        .ok_or_else(|| SchemaError::MissingTarget(target_column.to_string()))?;

    let mut rows: Vec<Vec<String>> = Vec::new();
    for (i, result) in rdr.records().enumerate() {
        let row = result?;
        // Row numbers are 1-based data rows, header excluded.
        if row.len() != headers.len() {
            return Err(SchemaError::RaggedRow {
                row: i + 1,
                expected: headers.len(),
                found: row.len(),
            }
            .into());
        }
        rows.push(row.iter().map(str::to_string).collect());
    }
    if rows.is_empty() {
        return Err(SchemaError::Empty.into());
    }

    let mut fields = Vec::with_capacity(headers.len() - 1);
    for (col, name) in headers.iter().enumerate() {
        if col == target_idx {
            continue;
        }
        let numeric = rows.iter().all(|row| {
            let cell = row[col].as_str();
            is_missing_marker(cell) || cell.parse::<f64>().map(f64::is_finite).unwrap_or(false)
        });
        let any_value = rows.iter().any(|row| !is_missing_marker(&row[col]));
        let kind = if numeric && any_value {
            FieldKind::Numeric
        } else {
            FieldKind::Categorical
        };
        debug!(field = %name, ?kind, "Inferred column kind");
        fields.push((col, FieldSpec { name: name.clone(), kind }));
    }

    let mut records = Vec::with_capacity(rows.len());
    let mut labels = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let raw_label = row[target_idx].as_str();
        if is_missing_marker(raw_label) {
            return Err(SchemaError::MissingLabel { row: i + 1 }.into());
        }
        let label = ObesityLevel::parse_label(raw_label).ok_or_else(|| SchemaError::UnknownLabel {
            label: raw_label.to_string(),
            row: i + 1,
        })?;
        labels.push(label);

        let record: Record = fields
            .iter()
            .map(|(col, spec)| {
                let cell = row[*col].as_str();
                let value = if is_missing_marker(cell) {
                    Value::Missing
                } else {
                    match spec.kind {
                        FieldKind::Numeric => Value::parse_cell(cell),
                        FieldKind::Categorical => Value::Text(cell.to_string()),
                    }
                };
                (spec.name.clone(), value)
            })
            .collect();
        records.push(record);
    }

    let schema = Schema::new(fields.into_iter().map(|(_, spec)| spec).collect())?;
    Ok(RawTable::new(schema, records, labels)?)
}

/// Immutable, partition-typed slice of a table.
#[derive(Debug, Clone)]
pub struct Dataset<P: Partition> {
    schema: Arc<Schema>,
    records: Vec<Record>,
    labels: Vec<ObesityLevel>,
    _partition: PhantomData<P>,
}

impl<P: Partition> Dataset<P> {
    pub(crate) fn from_parts(schema: Arc<Schema>, records: Vec<Record>, labels: Vec<ObesityLevel>) -> Self {
        Self {
            schema,
            records,
            labels,
            _partition: PhantomData,
        }
    }

    pub fn tag(&self) -> PartitionTag {
        P::TAG
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn labels(&self) -> &[ObesityLevel] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn class_counts(&self) -> BTreeMap<ObesityLevel, usize> {
        class_counts(&self.labels)
    }
}

/// Train/validation/holdout fractions. Must be non-negative and sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitRatios {
    pub train: f64,
    pub validation: f64,
    pub holdout: f64,
}

impl Default for SplitRatios {
    fn default() -> Self {
        Self {
            train: 0.7,
            validation: 0.15,
            holdout: 0.15,
        }
    }
}

impl SplitRatios {
    pub fn new(train: f64, validation: f64, holdout: f64) -> Result<Self, SchemaError> {
        let ratios = Self {
            train,
            validation,
            holdout,
        };
        ratios.validate()?;
        Ok(ratios)
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        let parts = [self.train, self.validation, self.holdout];
        if parts.iter().any(|r| !r.is_finite() || *r < 0.0) {
            return Err(SchemaError::InvalidSplit(format!(
                "ratios must be finite and non-negative, got {:?}",
                parts
            )));
        }
        let sum: f64 = parts.iter().sum();
        if (sum - 1.0).abs() > RATIO_SUM_TOLERANCE {
            return Err(SchemaError::InvalidSplit(format!("ratios sum to {sum}, expected 1")));
        }
        if self.train <= 0.0 {
            return Err(SchemaError::InvalidSplit("train ratio must be positive".into()));
        }
        Ok(())
    }

    /// Per-partition counts for `n` items by largest remainder.
    ///
    /// Remainder ties go to the earlier partition (train, then validation).
    pub fn allocate(&self, n: usize) -> [usize; 3] {
        let exact = [
            n as f64 * self.train,
            n as f64 * self.validation,
            n as f64 * self.holdout,
        ];
        let mut counts = [0usize; 3];
        let mut fractions = [0f64; 3];
        for i in 0..3 {
            let floor = (exact[i] + 1e-9).floor();
            counts[i] = floor as usize;
            fractions[i] = exact[i] - floor;
        }
        let assigned: usize = counts.iter().sum();
        let mut remaining = n.saturating_sub(assigned);
        let mut order = [0usize, 1, 2];
        order.sort_by(|a, b| fractions[*b].total_cmp(&fractions[*a]).then(a.cmp(b)));
        for idx in order.iter().cycle().take(3 * 3) {
            if remaining == 0 {
                break;
            }
            counts[*idx] += 1;
            remaining -= 1;
        }
        counts
    }
}

/// The three disjoint partitions of one table.
#[derive(Debug, Clone)]
pub struct Split {
    pub train: Dataset<Train>,
    pub validation: Dataset<Validation>,
    pub holdout: Dataset<Holdout>,
    pub seed: u64,
}

/// Stratified split: each class is shuffled with its own seeded stream and
/// cut by [`SplitRatios::allocate`]. Rows keep table order within each
/// partition, so the same seed always yields identical partitions.
pub fn split(table: &RawTable, ratios: SplitRatios, seed: u64) -> Result<Split, SchemaError> {
    ratios.validate()?;
    if table.is_empty() {
        return Err(SchemaError::Empty);
    }

    let mut parts: [Vec<usize>; 3] = [Vec::new(), Vec::new(), Vec::new()];
    for level in ObesityLevel::ALL {
        let mut indices: Vec<usize> = table
            .labels
            .iter()
            .enumerate()
            .filter(|(_, l)| **l == level)
            .map(|(i, _)| i)
            .collect();
        if indices.is_empty() {
            continue;
        }
        LcgRng::new(derive_seed(seed, level.as_str())).shuffle(&mut indices);

        let [n_train, n_val, _] = ratios.allocate(indices.len());
        parts[0].extend_from_slice(&indices[..n_train]);
        parts[1].extend_from_slice(&indices[n_train..n_train + n_val]);
        parts[2].extend_from_slice(&indices[n_train + n_val..]);
    }
    for part in parts.iter_mut() {
        part.sort_unstable();
    }

    let take = |idx: &[usize]| -> (Vec<Record>, Vec<ObesityLevel>) {
        idx.iter()
            .map(|&i| (table.records[i].clone(), table.labels[i]))
            .unzip()
    };
    let (train_records, train_labels) = take(&parts[0]);
    let (val_records, val_labels) = take(&parts[1]);
    let (hold_records, hold_labels) = take(&parts[2]);

    info!(
        seed,
        train = train_records.len(),
        validation = val_records.len(),
        holdout = hold_records.len(),
        "Stratified split complete"
    );

    Ok(Split {
        train: Dataset::from_parts(table.schema.clone(), train_records, train_labels),
        validation: Dataset::from_parts(table.schema.clone(), val_records, val_labels),
        holdout: Dataset::from_parts(table.schema.clone(), hold_records, hold_labels),
        seed,
    })
}
