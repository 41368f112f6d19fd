//! The persistence coordinator.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::cell::ValueCell;
use crate::error::{Result, StoreError};
use crate::reconcile::spawn_reconciler;
use crate::serializer::OpQueue;
use crate::state::{StateGuard, StoreState};
use crate::storage::ItemStorage;

/// Configuration for a [`PersistentStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum number of storage operations that may be running or queued
    /// at once. Exceeding it fails fast with
    /// [`StoreError::QueueSaturated`] instead of queueing.
    pub max_pending_operations: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_pending_operations: 100,
        }
    }
}

/// An observable value cell kept in sync with a backing store.
///
/// The store holds an in-memory cached value (the authoritative in-process
/// state) and coordinates all traffic to the backing store:
///
/// - `fetch` / `set` / `update` / `persist` are serialized, so exactly one
///   storage operation is in flight at any instant and later calls observe
///   the committed effects of earlier ones;
/// - a lifecycle signal reports whether the store is `Ready`, `Persisting`
///   or `Fetching`, restored to `Ready` on every exit path;
/// - externally-detected changes (for adapters with a change feed) are
///   debounced, re-read and applied straight to the cache.
///
/// The store is created with a default value and does not touch the
/// backing store until asked to; call [`fetch`](Self::fetch) after
/// construction to load previously persisted content.
///
/// Reconciled external changes bypass the serializer on purpose: a change
/// made outside the process should not wait behind a queued local
/// operation. They can therefore race an in-flight `set`, in which case
/// the cache keeps whichever value was written last.
pub struct PersistentStore<T> {
    cell: ValueCell<T>,
    state_tx: watch::Sender<StoreState>,
    queue: OpQueue,
    storage: Arc<dyn ItemStorage<T>>,
    reconciler: Option<JoinHandle<()>>,
}

impl<T> PersistentStore<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a store with the default configuration.
    ///
    /// Must be called within a Tokio runtime when `storage` exposes a
    /// change feed, since observation runs on a background task.
    pub fn new<S>(default_value: T, storage: S) -> Self
    where
        S: ItemStorage<T> + 'static,
    {
        Self::with_config(default_value, storage, StoreConfig::default())
    }

    /// Create a store with an explicit configuration.
    pub fn with_config<S>(default_value: T, storage: S, config: StoreConfig) -> Self
    where
        S: ItemStorage<T> + 'static,
    {
        let storage: Arc<dyn ItemStorage<T>> = Arc::new(storage);
        let cell = ValueCell::new(default_value);
        let (state_tx, _state_rx) = watch::channel(StoreState::Ready);

        // Observing adapters hand out their raw notification feed once;
        // reconciled values are applied straight to the cell.
        let reconciler = storage.change_feed().map(|feed| {
            let read_storage = Arc::clone(&storage);
            let apply_cell = cell.clone();
            spawn_reconciler(
                feed,
                move || {
                    let storage = Arc::clone(&read_storage);
                    async move { storage.get(None).await }
                },
                move |value| apply_cell.set(value),
            )
        });

        Self {
            cell,
            state_tx,
            queue: OpQueue::new(config.max_pending_operations),
            storage,
            reconciler,
        }
    }

    /// Fetch the backing store's content into the cache.
    ///
    /// Returns the value read from storage, or `None` if the storage is
    /// empty, in which case the cache is left untouched.
    pub async fn fetch(&self, cancel: Option<&CancelToken>) -> Result<Option<T>> {
        self.queue
            .run(cancel, || async move {
                let _state = StateGuard::enter(&self.state_tx, StoreState::Fetching);
                let fetched = self
                    .storage
                    .get(cancel)
                    .await
                    .map_err(|source| StoreError::StorageRead { source })?;
                if let Some(value) = &fetched {
                    self.cell.set(value.clone());
                }
                debug!(found = fetched.is_some(), "fetched backing store content");
                Ok(fetched)
            })
            .await
    }

    /// Write `value` to the backing store, then update the cache.
    ///
    /// If the write fails the cache is left unchanged: the cache never
    /// shows a value the storage has not confirmed.
    pub async fn set(&self, value: T, cancel: Option<&CancelToken>) -> Result<()> {
        self.queue
            .run(cancel, || async move {
                let _state = StateGuard::enter(&self.state_tx, StoreState::Persisting);
                self.storage
                    .set(value.clone(), cancel)
                    .await
                    .map_err(|source| StoreError::StorageWrite { source })?;
                self.cell.set(value);
                Ok(())
            })
            .await
    }

    /// Compute a new value from the cached one and persist it.
    ///
    /// The updater runs once exclusive access is granted, against the
    /// cache's value at that moment, so concurrent `update` calls compound
    /// instead of clobbering each other. No fresh storage read is made.
    pub async fn update<F>(&self, updater: F, cancel: Option<&CancelToken>) -> Result<()>
    where
        F: FnOnce(T) -> T,
    {
        self.queue
            .run(cancel, || async move {
                let _state = StateGuard::enter(&self.state_tx, StoreState::Persisting);
                let next = updater(self.cell.get());
                self.storage
                    .set(next.clone(), cancel)
                    .await
                    .map_err(|source| StoreError::StorageWrite { source })?;
                self.cell.set(next);
                Ok(())
            })
            .await
    }

    /// Write the cache's current value to the backing store without
    /// mutating the cache.
    pub async fn persist(&self, cancel: Option<&CancelToken>) -> Result<()> {
        self.queue
            .run(cancel, || async move {
                let _state = StateGuard::enter(&self.state_tx, StoreState::Persisting);
                let value = self.cell.get();
                self.storage
                    .set(value, cancel)
                    .await
                    .map_err(|source| StoreError::StorageWrite { source })?;
                Ok(())
            })
            .await
    }

    /// Set the cached value without persisting it.
    ///
    /// Synchronous and unserialized; useful for optimistic local updates
    /// that will be persisted later with [`persist`](Self::persist).
    pub fn set_cache(&self, value: T) {
        self.cell.set(value);
    }

    /// Update the cached value through a function without persisting it.
    pub fn update_cache(&self, updater: impl FnOnce(T) -> T) {
        self.cell.update(updater);
    }

    /// Get a clone of the cached value.
    pub fn get(&self) -> T {
        self.cell.get()
    }

    /// Subscribe to cached value changes.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.cell.subscribe()
    }

    /// Read-only signal of the store's lifecycle state, for UI and
    /// telemetry consumers.
    pub fn state(&self) -> watch::Receiver<StoreState> {
        self.state_tx.subscribe()
    }

    /// The store's current lifecycle state.
    pub fn current_state(&self) -> StoreState {
        *self.state_tx.borrow()
    }

    /// The underlying backing store adapter.
    pub fn storage(&self) -> &Arc<dyn ItemStorage<T>> {
        &self.storage
    }
}

impl<T> Drop for PersistentStore<T> {
    fn drop(&mut self) {
        if let Some(reconciler) = &self.reconciler {
            reconciler.abort();
        }
    }
}
