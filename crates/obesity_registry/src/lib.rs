//! Model registry for the obesity classifier
//!
//! Versions are numbered per model name from 1. Exactly one version per
//! name is active at a time; promote and rollback swap the active pointer
//! atomically with respect to concurrent readers. Fitted transforms are
//! stored alongside, keyed by their content version, so an active model
//! can always be served with the exact transform it was trained against.

pub mod errors;
pub mod registry;
pub mod storage;
pub mod types;

pub use errors::{RegistryError, Result};
pub use registry::ModelRegistry;
pub use storage::RegistryStorage;
pub use types::{
    ActiveModel, LifecycleAction, LifecycleEvent, RegistryEntry, VersionId, VersionInfo,
};
