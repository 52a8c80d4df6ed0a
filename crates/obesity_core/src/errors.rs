//! Error types for the obesity core crate

use crate::serde_canon::CanonicalError;
use crate::types::FieldKind;
use thiserror::Error;

/// Structural problems with input data or records.
///
/// Raised at data-source load time and again at inference time, so the
/// messages name the offending field or row.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    /// Target column absent from the source header
    #[error("Target column not found: {0}")]
    MissingTarget(String),

    /// Label outside the closed class set
    #[error("Unknown label '{label}' at row {row}")]
    UnknownLabel { label: String, row: usize },

    /// Label cell empty or missing
    #[error("Missing label at row {row}")]
    MissingLabel { row: usize },

    #[error("Record is missing field '{0}'")]
    MissingField(String),

    #[error("Record has unexpected field '{0}'")]
    UnexpectedField(String),

    #[error("Duplicate column '{0}'")]
    DuplicateColumn(String),

    /// Value kind does not match the schema
    #[error("Field '{field}' expected {expected} value, found {found}")]
    TypeMismatch {
        field: String,
        expected: FieldKind,
        found: String,
    },

    #[error("Field '{field}' is not a finite number")]
    NonFinite { field: String },

    #[error("Field '{field}' value {value} outside allowed range {range}")]
    OutOfRange {
        field: String,
        value: f64,
        range: String,
    },

    #[error("Row {row} has {found} columns, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("Invalid split ratios: {0}")]
    InvalidSplit(String),

    #[error("Dataset is empty")]
    Empty,

    #[error("Label count {labels} does not match record count {records}")]
    LengthMismatch { records: usize, labels: usize },

    /// Feature transform applied to data from a different schema
    #[error("Schema fingerprint mismatch: expected {expected}, found {found}")]
    FingerprintMismatch { expected: String, found: String },
}

/// Errors that can occur in the core crate
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Model error: {0}")]
    Model(#[from] crate::gbdt::ModelError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Canonical serialization error: {0}")]
    Canonical(#[from] CanonicalError),

    /// Stored content does not hash to its recorded identifier
    #[error("Integrity check failed for {what}: expected {expected}, computed {computed}")]
    Integrity {
        what: String,
        expected: String,
        computed: String,
    },
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
