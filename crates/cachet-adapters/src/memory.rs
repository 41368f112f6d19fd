//! In-memory storage adapter.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cachet_store::{CancelToken, ItemStorage, StorageError};

use crate::Cancelled;

/// An in-memory single-item storage.
///
/// Not very useful on its own, but handy for tests and for wiring a
/// persistent store where no real medium is available yet. Clones share
/// the same content.
#[derive(Debug, Clone)]
pub struct MemoryStorage<T> {
    value: Arc<Mutex<Option<T>>>,
}

impl<T> MemoryStorage<T> {
    /// Create an empty storage.
    pub fn new() -> Self {
        Self {
            value: Arc::new(Mutex::new(None)),
        }
    }

    /// Create a storage already holding `value`.
    pub fn with_value(value: T) -> Self {
        Self {
            value: Arc::new(Mutex::new(Some(value))),
        }
    }
}

impl<T> Default for MemoryStorage<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn ensure_not_cancelled(cancel: Option<&CancelToken>) -> Result<(), StorageError> {
    if cancel.is_some_and(CancelToken::is_cancelled) {
        return Err(Cancelled.into());
    }
    Ok(())
}

#[async_trait]
impl<T> ItemStorage<T> for MemoryStorage<T>
where
    T: Clone + Send + Sync,
{
    async fn get(&self, cancel: Option<&CancelToken>) -> Result<Option<T>, StorageError> {
        ensure_not_cancelled(cancel)?;
        Ok(self.value.lock().unwrap().clone())
    }

    async fn set(&self, value: T, cancel: Option<&CancelToken>) -> Result<(), StorageError> {
        ensure_not_cancelled(cancel)?;
        *self.value.lock().unwrap() = Some(value);
        Ok(())
    }

    async fn clear(&self, cancel: Option<&CancelToken>) -> Result<(), StorageError> {
        ensure_not_cancelled(cancel)?;
        *self.value.lock().unwrap() = None;
        Ok(())
    }
}
