// # State Store Trait
//
// Defines the interface for persistent record state.
//
// ## Purpose
//
// The state store is the record of truth for each record:
// - The last known good IP address
// - The last settled status and error category
// - A bounded update history
//
// The engine is its only writer. Each write replaces one record's state
// atomically, so a concurrent `select` never observes a half-applied update.
//
// ## Implementations
//
// - `MemoryStateStore`: process lifetime only
// - `FileStateStore`: versioned JSON file
//
// ## Usage
//
// ```rust,ignore
// use ddns_core::{StateStore, StateUpdate};
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let store = /* StateStore implementation */;
//     let id = /* RecordId */;
//
//     store.update(&id, StateUpdate::success("1.2.3.4".parse()?)).await?;
//     let state = store.select(&id).await?;
//     println!("{:?} {:?}", state.status, state.ip);
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::StateStoreConfig;
use crate::record::{RecordId, RecordState, StateUpdate};

/// Trait for state store implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
///
/// # Trust Level: Trusted (Core Component)
///
/// ## Allowed Capabilities
/// - ✅ Perform I/O for persistent storage (files, databases, etc.)
/// - ✅ Implement locking for per-record atomicity
/// - ✅ Cache state in memory (with explicit flush)
///
/// ## Forbidden Capabilities
/// - ❌ Spawn background tasks without clear lifecycle
/// - ❌ Decide when to update (owned by `DdnsEngine`)
/// - ❌ Persist the in-flight `Updating` status
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Get one record's state
    ///
    /// # Returns
    ///
    /// - `Ok(RecordState)`: The stored state
    /// - `Err(Error::NotFound)`: Nothing stored for this record yet
    /// - `Err(Error)`: Storage error
    async fn select(&self, id: &RecordId) -> Result<RecordState, crate::Error>;

    /// Get every stored record's state, ordered by record id
    async fn select_all(&self) -> Result<Vec<(RecordId, RecordState)>, crate::Error>;

    /// Apply an update to one record
    ///
    /// Creates the record's state if absent. History is trimmed to the
    /// store's limit. Updates carrying `RecordStatus::Updating` are rejected.
    async fn update(&self, id: &RecordId, update: StateUpdate) -> Result<(), crate::Error>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;
}

/// Helper trait for constructing state stores from configuration
#[async_trait]
pub trait StateStoreFactory: Send + Sync {
    /// Create a StateStore instance from configuration
    ///
    /// Async because opening a persistent store may read from disk.
    async fn create(&self, config: &StateStoreConfig) -> Result<Arc<dyn StateStore>, crate::Error>;
}
