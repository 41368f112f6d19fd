//! File storage adapter.
//!
//! Stores the value in a single file, written atomically (temp file +
//! rename) so a crash or power loss never leaves a half-written value
//! behind. Optionally watches the file for externally-originated writes
//! and reports them as raw change notifications.

use std::io;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use cachet_store::{CancelToken, ChangeFeed, ItemStorage, RawChange, StorageError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::Cancelled;
use crate::codec::{Codec, CodecError, JsonCodec, TextCodec};

/// How often a watched file is polled for external changes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// File storage error.
#[derive(Debug, Error)]
pub enum FileStorageError {
    /// File I/O error.
    #[error("failed to {operation} file: {path}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The file content could not be encoded or decoded.
    #[error("failed to encode or decode file content")]
    Codec {
        #[source]
        source: CodecError,
    },
}

/// Watcher bookkeeping shared between the adapter and its polling task.
struct WatchState {
    /// Raw notification feed, handed out once via `change_feed`.
    feed: Mutex<Option<ChangeFeed>>,
    /// Last modification time attributed to this adapter's own writes or
    /// already reported to the feed. Own writes record their mtime here
    /// first so local saves are not echoed back as external changes.
    last_mtime: Arc<Mutex<Option<SystemTime>>>,
    task: JoinHandle<()>,
}

impl Drop for WatchState {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct FileInner<C> {
    path: PathBuf,
    codec: C,
    watch: Option<WatchState>,
}

/// A single-item storage backed by a file.
///
/// Cheap to clone; clones share the watcher (if any).
pub struct FileStorage<T, C = JsonCodec> {
    inner: Arc<FileInner<C>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T, C> Clone for FileStorage<T, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _marker: PhantomData,
        }
    }
}

impl<T, C> FileStorage<T, C>
where
    C: Codec<T>,
{
    /// Create a file storage with an explicit codec, without observation.
    pub fn new(path: impl Into<PathBuf>, codec: C) -> Self {
        Self {
            inner: Arc::new(FileInner {
                path: path.into(),
                codec,
                watch: None,
            }),
            _marker: PhantomData,
        }
    }

    /// Create a file storage that also polls the file for external
    /// changes every `poll_interval`.
    ///
    /// Changes present at construction time are not reported; only writes
    /// observed after the watcher starts are. Several raw notifications
    /// may be emitted for one logical write; consumers are expected to
    /// coalesce them.
    pub fn watched(path: impl Into<PathBuf>, codec: C, poll_interval: Duration) -> Self {
        let path = path.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let last_mtime = Arc::new(Mutex::new(modification_time(&path)));
        let task = spawn_watcher(path.clone(), Arc::clone(&last_mtime), tx, poll_interval);
        Self {
            inner: Arc::new(FileInner {
                path,
                codec,
                watch: Some(WatchState {
                    feed: Mutex::new(Some(rx)),
                    last_mtime,
                    task,
                }),
            }),
            _marker: PhantomData,
        }
    }

    fn io_error(&self, operation: &'static str, source: io::Error) -> FileStorageError {
        FileStorageError::Io {
            operation,
            path: self.inner.path.clone(),
            source,
        }
    }
}

impl<T> FileStorage<T, JsonCodec>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    /// File storage with a pre-configured JSON codec.
    pub fn json(path: impl Into<PathBuf>) -> Self {
        Self::new(path, JsonCodec)
    }

    /// Watched file storage with a pre-configured JSON codec.
    pub fn json_watched(path: impl Into<PathBuf>) -> Self {
        Self::watched(path, JsonCodec, DEFAULT_POLL_INTERVAL)
    }
}

impl FileStorage<String, TextCodec> {
    /// File storage with a pre-configured plain-text (UTF-8) codec.
    pub fn text(path: impl Into<PathBuf>) -> Self {
        Self::new(path, TextCodec)
    }

    /// Watched file storage with a pre-configured plain-text codec.
    pub fn text_watched(path: impl Into<PathBuf>) -> Self {
        Self::watched(path, TextCodec, DEFAULT_POLL_INTERVAL)
    }
}

fn modification_time(path: &std::path::Path) -> Option<SystemTime> {
    std::fs::metadata(path).ok().and_then(|m| m.modified().ok())
}

fn spawn_watcher(
    path: PathBuf,
    last_mtime: Arc<Mutex<Option<SystemTime>>>,
    tx: mpsc::UnboundedSender<RawChange>,
    poll_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(observed) = modification_time(&path) else {
                continue;
            };
            let changed = {
                let mut last = last_mtime.lock().unwrap();
                if *last != Some(observed) {
                    *last = Some(observed);
                    true
                } else {
                    false
                }
            };
            if changed && tx.send(RawChange).is_err() {
                // Feed consumer is gone; stop polling.
                break;
            }
        }
    })
}

#[async_trait]
impl<T, C> ItemStorage<T> for FileStorage<T, C>
where
    T: Send + Sync + 'static,
    C: Codec<T> + Send + Sync + 'static,
{
    async fn get(&self, cancel: Option<&CancelToken>) -> Result<Option<T>, StorageError> {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return Err(Cancelled.into());
        }
        let bytes = match tokio::fs::read(&self.inner.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error("read", e).into()),
        };
        let value = self
            .inner
            .codec
            .decode(&bytes)
            .map_err(|source| FileStorageError::Codec { source })?;
        Ok(Some(value))
    }

    async fn set(&self, value: T, cancel: Option<&CancelToken>) -> Result<(), StorageError> {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return Err(Cancelled.into());
        }
        let bytes = self
            .inner
            .codec
            .encode(&value)
            .map_err(|source| FileStorageError::Codec { source })?;

        if let Some(parent) = self.inner.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| self.io_error("create directory for", e))?;
            }
        }

        // Write to a temp file first, then rename for atomicity.
        let temp_path = self.inner.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&temp_path)
            .await
            .map_err(|e| self.io_error("create", e))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| self.io_error("write", e))?;
        file.sync_all()
            .await
            .map_err(|e| self.io_error("sync", e))?;
        drop(file);

        // Renaming preserves the temp file's mtime, so recording it before
        // the rename leaves the watcher no window in which it could report
        // this adapter's own write as an external change.
        if let Some(watch) = &self.inner.watch {
            *watch.last_mtime.lock().unwrap() = modification_time(&temp_path);
        }
        tokio::fs::rename(&temp_path, &self.inner.path)
            .await
            .map_err(|e| self.io_error("rename into", e))?;

        debug!(path = %self.inner.path.display(), "persisted value to file");
        Ok(())
    }

    async fn clear(&self, cancel: Option<&CancelToken>) -> Result<(), StorageError> {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return Err(Cancelled.into());
        }
        match tokio::fs::remove_file(&self.inner.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(self.io_error("remove", e).into()),
        }
        if let Some(watch) = &self.inner.watch {
            *watch.last_mtime.lock().unwrap() = None;
        }
        Ok(())
    }

    fn change_feed(&self) -> Option<ChangeFeed> {
        self.inner
            .watch
            .as_ref()
            .and_then(|watch| watch.feed.lock().unwrap().take())
    }
}
