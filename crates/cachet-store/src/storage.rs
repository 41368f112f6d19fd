//! Backing store adapter contract.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::cancel::CancelToken;
use crate::error::StorageError;

/// Marker for an externally observed modification of the backing store.
///
/// Raw notifications carry no payload: by the time a notification is
/// processed its payload could already be stale, so the store always
/// re-reads the backing store instead. A single logical write may produce
/// several raw notifications (e.g. separate filesystem events for content
/// and attributes); the reconciliation loop coalesces them.
#[derive(Debug, Clone, Copy)]
pub struct RawChange;

/// Feed of raw change notifications handed out by an observing adapter.
pub type ChangeFeed = mpsc::UnboundedReceiver<RawChange>;

/// A single-item backing store.
///
/// `get` returning `None` means "no value stored". Errors are
/// adapter-specific and cross this boundary boxed; the store maps them to
/// [`StoreError::StorageRead`](crate::StoreError::StorageRead) or
/// [`StoreError::StorageWrite`](crate::StoreError::StorageWrite) depending
/// on the operation.
///
/// Adapters receive the caller's cancellation token and may honor it
/// mid-flight; the store itself only checks it before starting I/O.
#[async_trait]
pub trait ItemStorage<T>: Send + Sync {
    /// Return the stored value, or `None` if the storage is empty.
    async fn get(&self, cancel: Option<&CancelToken>) -> Result<Option<T>, StorageError>;

    /// Save the passed value.
    async fn set(&self, value: T, cancel: Option<&CancelToken>) -> Result<(), StorageError>;

    /// Erase the storage content.
    async fn clear(&self, cancel: Option<&CancelToken>) -> Result<(), StorageError>;

    /// Take the adapter's raw change notification feed, if it observes
    /// externally-originated updates.
    ///
    /// Adapters that support observation return `Some` exactly once; the
    /// default implementation returns `None`.
    fn change_feed(&self) -> Option<ChangeFeed> {
        None
    }
}
