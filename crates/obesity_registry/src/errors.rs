//! Error types for the model registry

use crate::types::VersionId;
use obesity_core::CoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the model registry
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Operation would leave the registry inconsistent (unknown version,
    /// nothing to roll back to, missing transform)
    #[error("Registry consistency error for '{name}': {reason}")]
    Consistency { name: String, reason: String },

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Model '{0}' has no active version")]
    NoActiveVersion(String),

    #[error("Model '{name}' has no version {version}")]
    VersionNotFound { name: String, version: VersionId },

    #[error("Transform not found: {0}")]
    TransformNotFound(String),

    #[error("Invalid model name: {0}")]
    InvalidName(String),

    /// Persisted content failed to parse or verify
    #[error("Corrupted registry file {path}: {reason}")]
    Corrupted { path: PathBuf, reason: String },

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RegistryError {
    pub(crate) fn consistency(name: &str, reason: impl Into<String>) -> Self {
        RegistryError::Consistency {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;
