//! Record store
//!
//! The registry treats persistence as an abstract transactional record
//! store holding one [`NetworkRecord`] aggregate per network. `put` replaces
//! a whole record at once, so a transaction is either fully persisted or
//! not at all.

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use crate::error::Result;
use crate::model::{NetworkId, NetworkRecord};

/// Persistence for network aggregates
#[cfg_attr(test, mockall::automock)]
pub trait Store: Send + Sync {
    /// Load every stored network record
    fn load_all(&self) -> Result<Vec<NetworkRecord>>;

    /// Insert or replace a network record
    fn put(&self, record: &NetworkRecord) -> Result<()>;

    /// Remove a network record (no error if absent)
    fn delete(&self, id: NetworkId) -> Result<()>;
}
