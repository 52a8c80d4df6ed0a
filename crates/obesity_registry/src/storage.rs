//! Storage backend for the model registry
//!
//! Filesystem layout under the root directory:
//!
//! ```text
//! transforms/<version>.json        fitted transform states
//! models/<name>/v<N>.json          model artifacts
//! models/<name>/entry.json         lineage, active pointer and events
//! ```
//!
//! Every write goes to a temporary file in the target directory and is
//! renamed into place, so readers never see a partial file. The in-memory
//! backend persists nothing; the registry's own snapshots hold the state.

use crate::errors::{RegistryError, Result};
use crate::types::{RegistryEntry, VersionId};
use obesity_core::{ModelArtifact, TransformState};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

const TRANSFORMS_DIR: &str = "transforms";
const MODELS_DIR: &str = "models";
const ENTRY_FILE: &str = "entry.json";

#[derive(Debug, Clone)]
pub enum RegistryStorage {
    Memory,
    Filesystem { root: PathBuf },
}

impl RegistryStorage {
    pub fn in_memory() -> Self {
        RegistryStorage::Memory
    }

    /// Filesystem backend rooted at `root`, creating directories as needed.
    pub fn filesystem(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(TRANSFORMS_DIR))?;
        fs::create_dir_all(root.join(MODELS_DIR))?;
        Ok(RegistryStorage::Filesystem { root })
    }

    pub fn root(&self) -> Option<&Path> {
        match self {
            RegistryStorage::Memory => None,
            RegistryStorage::Filesystem { root } => Some(root),
        }
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self, RegistryStorage::Filesystem { .. })
    }

    pub(crate) fn save_transform(&self, state: &TransformState) -> Result<()> {
        if let RegistryStorage::Filesystem { root } = self {
            let path = root.join(TRANSFORMS_DIR).join(format!("{}.json", state.version));
            write_json_atomic(&path, state)?;
        }
        Ok(())
    }

    pub(crate) fn load_transforms(&self) -> Result<Vec<TransformState>> {
        let RegistryStorage::Filesystem { root } = self else {
            return Ok(Vec::new());
        };
        let mut states = Vec::new();
        for path in json_files(&root.join(TRANSFORMS_DIR))? {
            let state: TransformState = read_json(&path)?;
            state.verify().map_err(|e| RegistryError::Corrupted {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            states.push(state);
        }
        Ok(states)
    }

    pub(crate) fn save_artifact(
        &self,
        name: &str,
        version: VersionId,
        artifact: &ModelArtifact,
    ) -> Result<()> {
        if let RegistryStorage::Filesystem { root } = self {
            let dir = root.join(MODELS_DIR).join(name);
            fs::create_dir_all(&dir)?;
            write_json_atomic(&dir.join(format!("{version}.json")), artifact)?;
        }
        Ok(())
    }

    pub(crate) fn load_artifact(&self, name: &str, version: VersionId) -> Result<ModelArtifact> {
        let RegistryStorage::Filesystem { root } = self else {
            return Err(RegistryError::VersionNotFound {
                name: name.to_string(),
                version,
            });
        };
        let path = root.join(MODELS_DIR).join(name).join(format!("{version}.json"));
        let artifact: ModelArtifact = read_json(&path)?;
        artifact.verify().map_err(|e| RegistryError::Corrupted {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        Ok(artifact)
    }

    pub(crate) fn save_entry(&self, entry: &RegistryEntry) -> Result<()> {
        if let RegistryStorage::Filesystem { root } = self {
            let dir = root.join(MODELS_DIR).join(&entry.name);
            fs::create_dir_all(&dir)?;
            write_json_atomic(&dir.join(ENTRY_FILE), entry)?;
        }
        Ok(())
    }

    pub(crate) fn load_entries(&self) -> Result<Vec<RegistryEntry>> {
        let RegistryStorage::Filesystem { root } = self else {
            return Ok(Vec::new());
        };
        let mut entries = Vec::new();
        let mut dirs: Vec<PathBuf> = fs::read_dir(root.join(MODELS_DIR))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();
        for dir in dirs {
            let path = dir.join(ENTRY_FILE);
            if path.exists() {
                entries.push(read_json(&path)?);
            }
        }
        Ok(entries)
    }
}

fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    Ok(files)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| RegistryError::Corrupted {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(tmp.as_file_mut(), value)?;
    tmp.as_file_mut().flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| RegistryError::Io(e.error))?;
    debug!(path = %path.display(), "Wrote registry file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RegistryEntry;

    #[test]
    fn test_memory_backend_persists_nothing() {
        let storage = RegistryStorage::in_memory();
        storage.save_entry(&RegistryEntry::new("m")).unwrap();
        assert!(storage.load_entries().unwrap().is_empty());
        assert!(!storage.is_persistent());
        assert!(storage.root().is_none());
    }

    #[test]
    fn test_entry_written_atomically_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let storage = RegistryStorage::filesystem(dir.path()).unwrap();

        let mut entry = RegistryEntry::new("ObesityPredictor-Best");
        entry.lineage.push(VersionId(1));
        entry.active = Some(VersionId(1));
        storage.save_entry(&entry).unwrap();

        let loaded = storage.load_entries().unwrap();
        assert_eq!(loaded, vec![entry]);

        let leftovers: Vec<_> = fs::read_dir(dir.path().join(MODELS_DIR).join("ObesityPredictor-Best"))
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(leftovers.len(), 1, "temporary files must not remain");
    }

    #[test]
    fn test_corrupted_entry_reported_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let storage = RegistryStorage::filesystem(dir.path()).unwrap();
        let model_dir = dir.path().join(MODELS_DIR).join("broken");
        fs::create_dir_all(&model_dir).unwrap();
        fs::write(model_dir.join(ENTRY_FILE), b"{not json").unwrap();

        match storage.load_entries() {
            Err(RegistryError::Corrupted { path, .. }) => assert!(path.ends_with(ENTRY_FILE)),
            other => panic!("expected corruption error, got {other:?}"),
        }
    }
}
