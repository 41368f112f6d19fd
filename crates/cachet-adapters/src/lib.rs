//! Backing store adapters for cachet stores.
//!
//! Each adapter implements [`cachet_store::ItemStorage`] against a
//! concrete medium:
//!
//! - [`MemoryStorage`] - process memory (tests, placeholders)
//! - [`FileStorage`] - a file, written atomically, with optional change
//!   observation via a polling watcher
//! - [`RestStorage`] - a remote HTTP resource
//!
//! File and REST adapters serialize values through a [`Codec`]; JSON
//! (serde_json) and plain-text codecs are provided.
//!
//! # Example
//!
//! ```ignore
//! use cachet_adapters::FileStorage;
//! use cachet_store::PersistentStore;
//!
//! // Watched: external writes to the file are reconciled into the cache.
//! let storage = FileStorage::<Settings>::json_watched("settings.json");
//! let store = PersistentStore::new(Settings::default(), storage);
//! ```

mod codec;
mod file;
mod memory;
mod rest;

use thiserror::Error;

// Re-export main types
pub use codec::{Codec, CodecError, JsonCodec, TextCodec};
pub use file::{DEFAULT_POLL_INTERVAL, FileStorage, FileStorageError};
pub use memory::MemoryStorage;
pub use rest::{RestStorage, RestStorageError, RestVerbs};

/// Error returned by adapters when an operation's cancellation token had
/// already fired before any I/O started.
#[derive(Debug, Error)]
#[error("operation was cancelled before it started")]
pub struct Cancelled;
