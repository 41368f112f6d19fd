//! Observable, persisted single-value stores.
//!
//! A [`PersistentStore`] is an in-memory cached value kept in sync with an
//! external backing store, with subscribers notified on every change. This
//! crate is the persistence coordination engine: it serializes concurrent
//! read/write operations against the backing store, tracks a visible
//! lifecycle state, debounces noisy external-change notifications into
//! single coherent updates, and applies them to the cache without races.
//!
//! Backing stores implement the [`ItemStorage`] trait; ready-made adapters
//! for files, HTTP resources and memory live in the `cachet-adapters`
//! crate.
//!
//! # Example
//!
//! ```ignore
//! use cachet_store::PersistentStore;
//! use cachet_adapters::FileStorage;
//!
//! let store = PersistentStore::new(
//!     Settings::default(),
//!     FileStorage::json("settings.json"),
//! );
//! // Load previously persisted content, if any.
//! store.fetch(None).await?;
//!
//! let mut changes = store.subscribe();
//! store.set(new_settings, None).await?;
//! ```
//!
//! # Architecture
//!
//! - `cell` - the observable in-memory value (notify-on-change)
//! - `state` - the `Ready`/`Persisting`/`Fetching` lifecycle signal
//! - `serializer` - FIFO exclusivity with a bounded pending queue
//! - `reconcile` - coalescing drain loop for external change storms
//! - `store` - the coordinator composing all of the above
//! - `storage` - the backing store adapter contract
//! - `cancel` - cooperative cancellation token
//! - `error` - error types

mod cancel;
mod cell;
mod error;
mod reconcile;
mod serializer;
mod state;
mod storage;
mod store;

// Re-export main types
pub use cancel::CancelToken;
pub use cell::ValueCell;
pub use error::{Result, StorageError, StoreError};
pub use state::StoreState;
pub use storage::{ChangeFeed, ItemStorage, RawChange};
pub use store::{PersistentStore, StoreConfig};
