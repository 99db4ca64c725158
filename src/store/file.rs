//! JSON-file record store
//!
//! One `<network-id>.json` file per network in a state directory. Records
//! are written to a temporary file and renamed into place, so a crash never
//! leaves a half-written record behind.

use crate::error::{MeshError, Result};
use crate::model::{NetworkId, NetworkRecord};
use crate::store::Store;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Store persisting records as JSON files
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Open (and create if needed) a state directory
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| {
            MeshError::Store(format!("Failed to create state directory {:?}: {}", dir, e))
        })?;
        Ok(Self { dir })
    }

    /// State directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: NetworkId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }
}

impl Store for JsonFileStore {
    fn load_all(&self) -> Result<Vec<NetworkRecord>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| {
            MeshError::Store(format!("Failed to read state directory {:?}: {}", self.dir, e))
        })?;

        let mut records = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let contents = fs::read_to_string(&path)?;
            let record: NetworkRecord = serde_json::from_str(&contents).map_err(|e| {
                MeshError::Store(format!("Corrupt network record {:?}: {}", path, e))
            })?;
            debug!("Loaded network '{}' from {:?}", record.network.name, path);
            records.push(record);
        }

        Ok(records)
    }

    fn put(&self, record: &NetworkRecord) -> Result<()> {
        let path = self.record_path(record.id());
        let tmp = path.with_extension("json.tmp");
        let encoded = serde_json::to_vec_pretty(record)?;

        let mut file = fs::File::create(&tmp).map_err(|e| {
            MeshError::Store(format!("Failed to create {:?}: {}", tmp, e))
        })?;
        file.write_all(&encoded)?;
        file.sync_all()?;

        fs::rename(&tmp, &path).map_err(|e| {
            MeshError::Store(format!("Failed to move record into place at {:?}: {}", path, e))
        })?;
        Ok(())
    }

    fn delete(&self, id: NetworkId) -> Result<()> {
        let path = self.record_path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Network record {:?} already absent", path);
                Ok(())
            }
            Err(e) => Err(MeshError::Store(format!(
                "Failed to delete {:?}: {}",
                path, e
            ))),
        }
    }
}
