//! Versioned model registry
//!
//! Each model name owns a slot holding an immutable snapshot (entry plus
//! artifacts) behind an `Arc`. Writers serialize on a per-slot mutex,
//! persist first, then swap in a new snapshot; readers clone the current
//! `Arc` and never observe a half-applied promote or rollback.

use crate::errors::{RegistryError, Result};
use crate::storage::RegistryStorage;
use crate::types::{
    ActiveModel, LifecycleAction, LifecycleEvent, RegistryEntry, VersionId, VersionInfo,
};
use chrono::Utc;
use obesity_core::{ModelArtifact, TransformState};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
struct SlotSnapshot {
    entry: RegistryEntry,
    artifacts: BTreeMap<VersionId, Arc<ModelArtifact>>,
}

struct ModelSlot {
    writer: Mutex<()>,
    current: RwLock<Arc<SlotSnapshot>>,
}

impl ModelSlot {
    fn new(snapshot: SlotSnapshot) -> Self {
        Self {
            writer: Mutex::new(()),
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    fn snapshot(&self) -> Arc<SlotSnapshot> {
        self.current.read().clone()
    }

    fn publish(&self, snapshot: SlotSnapshot) {
        *self.current.write() = Arc::new(snapshot);
    }
}

/// Thread-safe registry of trained models and fitted transforms.
pub struct ModelRegistry {
    storage: RegistryStorage,
    slots: RwLock<HashMap<String, Arc<ModelSlot>>>,
    transforms: RwLock<HashMap<String, Arc<TransformState>>>,
}

impl ModelRegistry {
    /// Open a registry, loading and verifying any persisted state.
    pub fn open(storage: RegistryStorage) -> Result<Self> {
        let mut transforms = HashMap::new();
        for state in storage.load_transforms()? {
            transforms.insert(state.version.clone(), Arc::new(state));
        }

        let mut slots = HashMap::new();
        for entry in storage.load_entries()? {
            let mut artifacts = BTreeMap::new();
            for info in &entry.versions {
                let artifact = storage.load_artifact(&entry.name, info.version)?;
                artifacts.insert(info.version, Arc::new(artifact));
            }
            if let Some(active) = entry.active {
                if !artifacts.contains_key(&active) {
                    return Err(RegistryError::consistency(
                        &entry.name,
                        format!("active version {active} has no artifact"),
                    ));
                }
            }
            slots.insert(
                entry.name.clone(),
                Arc::new(ModelSlot::new(SlotSnapshot { entry, artifacts })),
            );
        }

        if let Some(root) = storage.root() {
            info!(
                root = %root.display(),
                models = slots.len(),
                transforms = transforms.len(),
                "Opened model registry"
            );
        }

        Ok(Self {
            storage,
            slots: RwLock::new(slots),
            transforms: RwLock::new(transforms),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            storage: RegistryStorage::in_memory(),
            slots: RwLock::new(HashMap::new()),
            transforms: RwLock::new(HashMap::new()),
        }
    }

    pub fn storage(&self) -> &RegistryStorage {
        &self.storage
    }

    /// Store a fitted transform under its content version. Idempotent.
    pub fn store_transform(&self, state: TransformState) -> Result<Arc<TransformState>> {
        state.verify()?;
        if let Some(existing) = self.transforms.read().get(&state.version) {
            return Ok(existing.clone());
        }
        self.storage.save_transform(&state)?;
        let state = Arc::new(state);
        let mut transforms = self.transforms.write();
        let stored = transforms
            .entry(state.version.clone())
            .or_insert_with(|| state.clone())
            .clone();
        info!(version = %stored.version, "Stored feature transform");
        Ok(stored)
    }

    pub fn get_transform(&self, version: &str) -> Result<Arc<TransformState>> {
        self.transforms
            .read()
            .get(version)
            .cloned()
            .ok_or_else(|| RegistryError::TransformNotFound(version.to_string()))
    }

    /// Register an artifact as the next version of `name`.
    ///
    /// The transform it was trained against must already be stored.
    pub fn register(&self, name: &str, artifact: ModelArtifact) -> Result<VersionId> {
        validate_name(name)?;
        artifact.verify()?;
        if !self.transforms.read().contains_key(&artifact.transform_version) {
            return Err(RegistryError::consistency(
                name,
                format!(
                    "transform {} is not stored in the registry",
                    artifact.transform_version
                ),
            ));
        }

        let slot = self.slot_or_create(name);
        let _guard = slot.writer.lock();
        let current = slot.snapshot();

        let version = current
            .entry
            .latest_version()
            .map_or(VersionId::FIRST, VersionId::next);
        let mut next = (*current).clone();
        next.entry.versions.push(VersionInfo {
            version,
            strategy: artifact.strategy,
            booster_hash: artifact.booster_hash.clone(),
            transform_version: artifact.transform_version.clone(),
            macro_f1: artifact.validation_metrics.macro_f1,
            accuracy: artifact.validation_metrics.accuracy,
            registered_at: Utc::now(),
        });
        next.entry.events.push(LifecycleEvent {
            action: LifecycleAction::Register,
            version,
            previous_active: next.entry.active,
            at: Utc::now(),
        });

        // Artifact before entry: a crash in between leaves an orphan file,
        // never an entry pointing at nothing.
        self.storage.save_artifact(name, version, &artifact)?;
        self.storage.save_entry(&next.entry)?;

        info!(
            model = name,
            %version,
            strategy = %artifact.strategy,
            macro_f1 = artifact.validation_metrics.macro_f1,
            "Registered model version"
        );
        next.artifacts.insert(version, Arc::new(artifact));
        slot.publish(next);
        Ok(version)
    }

    /// Make `version` the active one. Promoting the active version is a no-op.
    pub fn promote(&self, name: &str, version: VersionId) -> Result<()> {
        let slot = self.slot(name).ok_or_else(|| {
            RegistryError::consistency(name, format!("cannot promote {version}: model is not registered"))
        })?;
        let _guard = slot.writer.lock();
        let current = slot.snapshot();

        if !current.artifacts.contains_key(&version) {
            return Err(RegistryError::consistency(
                name,
                format!("cannot promote {version}: version does not exist"),
            ));
        }
        if current.entry.active == Some(version) {
            info!(model = name, %version, "Version already active");
            return Ok(());
        }

        let mut next = (*current).clone();
        let previous = next.entry.active;
        next.entry.active = Some(version);
        next.entry.lineage.push(version);
        next.entry.events.push(LifecycleEvent {
            action: LifecycleAction::Promote,
            version,
            previous_active: previous,
            at: Utc::now(),
        });
        self.storage.save_entry(&next.entry)?;
        slot.publish(next);

        info!(model = name, %version, previous = ?previous, "Promoted model version");
        Ok(())
    }

    /// Restore the previously active version and return it.
    pub fn rollback(&self, name: &str) -> Result<VersionId> {
        let slot = self.slot(name).ok_or_else(|| {
            RegistryError::consistency(name, "cannot roll back: model is not registered")
        })?;
        let _guard = slot.writer.lock();
        let current = slot.snapshot();

        let Some(target) = current.entry.previous_active() else {
            return Err(RegistryError::consistency(
                name,
                "cannot roll back: no previously active version",
            ));
        };

        let mut next = (*current).clone();
        let abandoned = next.entry.lineage.pop();
        next.entry.active = Some(target);
        next.entry.events.push(LifecycleEvent {
            action: LifecycleAction::Rollback,
            version: target,
            previous_active: abandoned,
            at: Utc::now(),
        });
        self.storage.save_entry(&next.entry)?;
        slot.publish(next);

        warn!(model = name, version = %target, from = ?abandoned, "Rolled back model");
        Ok(target)
    }

    /// Currently active artifact for `name`.
    pub fn get_active(&self, name: &str) -> Result<Arc<ModelArtifact>> {
        Ok(self.get_active_model(name)?.1)
    }

    /// Active artifact and its transform, read from one snapshot.
    pub fn get_active_bundle(&self, name: &str) -> Result<ActiveModel> {
        let (version, artifact) = self.get_active_model(name)?;
        let transform = self.get_transform(&artifact.transform_version)?;
        Ok(ActiveModel {
            name: name.to_string(),
            version,
            artifact,
            transform,
        })
    }

    fn get_active_model(&self, name: &str) -> Result<(VersionId, Arc<ModelArtifact>)> {
        let slot = self
            .slot(name)
            .ok_or_else(|| RegistryError::ModelNotFound(name.to_string()))?;
        let snapshot = slot.snapshot();
        let version = snapshot
            .entry
            .active
            .ok_or_else(|| RegistryError::NoActiveVersion(name.to_string()))?;
        let artifact = snapshot.artifacts.get(&version).cloned().ok_or_else(|| {
            RegistryError::consistency(name, format!("active version {version} has no artifact"))
        })?;
        Ok((version, artifact))
    }

    pub fn get_version(&self, name: &str, version: VersionId) -> Result<Arc<ModelArtifact>> {
        let slot = self
            .slot(name)
            .ok_or_else(|| RegistryError::ModelNotFound(name.to_string()))?;
        let snapshot = slot.snapshot();
        snapshot
            .artifacts
            .get(&version)
            .cloned()
            .ok_or_else(|| RegistryError::VersionNotFound {
                name: name.to_string(),
                version,
            })
    }

    /// Copy of the entry for `name`
    pub fn entry(&self, name: &str) -> Option<RegistryEntry> {
        self.slot(name).map(|slot| slot.snapshot().entry.clone())
    }

    /// Registered versions of `name`, oldest first
    pub fn versions(&self, name: &str) -> Vec<VersionInfo> {
        self.entry(name).map(|e| e.versions).unwrap_or_default()
    }

    pub fn latest_version(&self, name: &str) -> Option<VersionId> {
        self.entry(name).and_then(|e| e.latest_version())
    }

    pub fn active_version(&self, name: &str) -> Option<VersionId> {
        self.slot(name).and_then(|slot| slot.snapshot().entry.active)
    }

    /// Registered model names, sorted
    pub fn model_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.slots.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn slot(&self, name: &str) -> Option<Arc<ModelSlot>> {
        self.slots.read().get(name).cloned()
    }

    fn slot_or_create(&self, name: &str) -> Arc<ModelSlot> {
        if let Some(slot) = self.slot(name) {
            return slot;
        }
        self.slots
            .write()
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(ModelSlot::new(SlotSnapshot {
                    entry: RegistryEntry::new(name),
                    artifacts: BTreeMap::new(),
                }))
            })
            .clone()
    }
}

/// Names become directory names, so keep them to a safe alphabet.
fn validate_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name.len() <= 128
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(RegistryError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_validation() {
        assert!(validate_name("ObesityPredictor-Best").is_ok());
        assert!(validate_name("model_v2.1").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("../etc").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name(".hidden").is_err());
    }

    #[test]
    fn test_unknown_model_errors() {
        let registry = ModelRegistry::in_memory();
        assert!(matches!(
            registry.get_active("missing"),
            Err(RegistryError::ModelNotFound(_))
        ));
        assert!(matches!(
            registry.promote("missing", VersionId(1)),
            Err(RegistryError::Consistency { .. })
        ));
        assert!(matches!(
            registry.rollback("missing"),
            Err(RegistryError::Consistency { .. })
        ));
        assert!(registry.model_names().is_empty());
        assert!(matches!(
            registry.get_transform("nope"),
            Err(RegistryError::TransformNotFound(_))
        ));
    }
}
