//! Store error types.
//!
//! All storage failures surface to the direct caller; the engine performs
//! no automatic retries. Errors raised during background reconciliation
//! have no caller to reach and are reported through `tracing` instead.

use thiserror::Error;

/// Error produced by a backing store adapter.
///
/// Adapters define their own structured error types and cross the
/// [`ItemStorage`](crate::ItemStorage) boundary as boxed errors, so the
/// engine stays agnostic of the storage medium.
pub type StorageError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Persistent store operation error.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store failed while reading.
    ///
    /// The cached value is left at its last known-good state.
    #[error("failed to read from the backing store")]
    StorageRead {
        #[source]
        source: StorageError,
    },

    /// The backing store failed while writing.
    ///
    /// The cached value is left unchanged; a failed write is never
    /// reflected in the cache.
    #[error("failed to write to the backing store")]
    StorageWrite {
        #[source]
        source: StorageError,
    },

    /// The operation queue is full.
    ///
    /// Rejected immediately, never queued. `pending` is the number of
    /// operations that were already in flight when the call was made.
    #[error("operation queue is saturated ({pending} operations in flight)")]
    QueueSaturated { pending: usize },

    /// The operation's cancellation token fired before any I/O started.
    #[error("operation was cancelled")]
    Cancelled,
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
