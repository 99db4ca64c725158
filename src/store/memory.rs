//! In-memory record store

use crate::error::{MeshError, Result};
use crate::model::{NetworkId, NetworkRecord};
use crate::store::Store;
use std::collections::HashMap;
use std::sync::RwLock;

/// Store keeping records in process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<NetworkId, NetworkRecord>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Store for MemoryStore {
    fn load_all(&self) -> Result<Vec<NetworkRecord>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.values().cloned().collect())
    }

    fn put(&self, record: &NetworkRecord) -> Result<()> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        records.insert(record.id(), record.clone());
        Ok(())
    }

    fn delete(&self, id: NetworkId) -> Result<()> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        records.remove(&id);
        Ok(())
    }
}

fn poisoned() -> MeshError {
    MeshError::Store("memory store lock poisoned".to_string())
}
