// # Memory State Store
//
// In-memory implementation of StateStore.
//
// ## Purpose
//
// Provides a simple, fast state store that doesn't persist across restarts.
// Useful for testing, one-shot runs, or containers where the first cycle
// after a restart re-checking every record is harmless.
//
// ## Crash Behavior
//
// - All state and history is lost on restart/crash
// - Every record starts `Unset` on the next run

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::config::StateStoreConfig;
use crate::record::{RecordId, RecordState, StateUpdate};
use crate::traits::state_store::{StateStore, StateStoreFactory};

/// In-memory state store implementation
///
/// All state lives in a HashMap behind a RwLock; each update is applied
/// under the write lock, so readers never see a half-applied update.
///
/// # Example
///
/// ```rust,no_run
/// use ddns_core::state::MemoryStateStore;
/// use ddns_core::{RecordId, StateStore, StateUpdate};
/// use ddns_core::config::IpVersion;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryStateStore::new(20);
///     let id = RecordId::new("example.com", "www", IpVersion::V4);
///
///     store.update(&id, StateUpdate::success("1.2.3.4".parse()?)).await?;
///
///     let state = store.select(&id).await?;
///     assert_eq!(state.ip, Some("1.2.3.4".parse()?));
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MemoryStateStore {
    inner: Arc<RwLock<HashMap<RecordId, RecordState>>>,
    history_limit: usize,
}

impl MemoryStateStore {
    /// Create a new empty memory state store
    ///
    /// `history_limit` bounds the history kept per record (0 = unbounded).
    pub fn new(history_limit: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            history_limit,
        }
    }

    /// Get the number of records in the store
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Seed a record's state directly (tests and migrations)
    pub async fn insert(&self, id: RecordId, state: RecordState) {
        self.inner.write().await.insert(id, state);
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new(0)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn select(&self, id: &RecordId) -> Result<RecordState, Error> {
        let guard = self.inner.read().await;
        guard
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(id.to_string()))
    }

    async fn select_all(&self) -> Result<Vec<(RecordId, RecordState)>, Error> {
        let guard = self.inner.read().await;
        let mut all: Vec<_> = guard
            .iter()
            .map(|(id, state)| (id.clone(), state.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(all)
    }

    async fn update(&self, id: &RecordId, update: StateUpdate) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        let mut state = guard.get(id).cloned().unwrap_or_default();
        state.apply(update, self.history_limit)?;
        guard.insert(id.clone(), state);
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        // Nothing buffered
        Ok(())
    }
}

/// Factory for `{"type": "memory"}`
pub struct MemoryStateStoreFactory;

#[async_trait]
impl StateStoreFactory for MemoryStateStoreFactory {
    async fn create(&self, config: &StateStoreConfig) -> Result<Arc<dyn StateStore>, Error> {
        match config {
            StateStoreConfig::Memory { history_limit } => {
                Ok(Arc::new(MemoryStateStore::new(*history_limit)))
            }
            other => Err(Error::config(format!(
                "memory factory cannot build a '{}' store",
                other.type_name()
            ))),
        }
    }
}
