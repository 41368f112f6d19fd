//! Change reconciliation loop.
//!
//! Backing stores that support observation emit raw change notifications,
//! and a single logical write can produce a storm of them (different OSes
//! emit separate filesystem events for content and attribute changes, for
//! example). This loop turns that storm into a clean sequence of
//! reconciled values: coalesce the burst, re-read the store, emit once.
//!
//! Invariants:
//! - reads never overlap;
//! - at least one read happens after the last notification, so the final
//!   state is never silently dropped;
//! - a failed read ends the current drain only, never future cycles.

use std::future::Future;

use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::StorageError;
use crate::storage::ChangeFeed;

/// Spawn the reconciliation worker for a store.
///
/// `read` queries the backing store's current content; `apply` receives
/// each reconciled value. The worker exits when the raw feed closes.
pub(crate) fn spawn_reconciler<T, R, Fut, A>(
    mut raw: ChangeFeed,
    read: R,
    apply: A,
) -> JoinHandle<()>
where
    T: Send + 'static,
    R: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = std::result::Result<Option<T>, StorageError>> + Send,
    A: Fn(T) + Send + 'static,
{
    tokio::spawn(async move {
        while raw.recv().await.is_some() {
            // Zero-delay coalescing window: let the rest of a same-tick
            // burst land, then collapse it into a single trigger.
            tokio::task::yield_now().await;
            while raw.try_recv().is_ok() {}

            let mut dirty = true;
            while dirty {
                dirty = false;
                match read().await {
                    Ok(Some(value)) => apply(value),
                    Ok(None) => {
                        // The resource no longer exists; nothing to emit.
                        break;
                    }
                    Err(error) => {
                        warn!(%error, "reconciliation read failed");
                        break;
                    }
                }
                // A notification that arrived during the read must force
                // another read before the loop goes idle.
                while raw.try_recv().is_ok() {
                    dirty = true;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::sync::{Semaphore, mpsc};
    use tokio::time::timeout;

    use super::*;
    use crate::storage::RawChange;

    /// A scripted backing store read: gated by a semaphore permit per
    /// read, returning a counter so each read yields a distinct value.
    fn gated_read(
        gate: Arc<Semaphore>,
        reads: Arc<AtomicUsize>,
    ) -> impl Fn() -> std::pin::Pin<
        Box<dyn Future<Output = Result<Option<usize>, StorageError>> + Send>,
    > + Send
    + 'static {
        move || {
            let gate = Arc::clone(&gate);
            let reads = Arc::clone(&reads);
            Box::pin(async move {
                reads.fetch_add(1, Ordering::SeqCst);
                gate.acquire().await.expect("gate closed").forget();
                Ok(Some(reads.load(Ordering::SeqCst)))
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_into_one_read() {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let gate = Arc::new(Semaphore::new(Semaphore::MAX_PERMITS));
        let reads = Arc::new(AtomicUsize::new(0));

        let worker = spawn_reconciler(raw_rx, gated_read(gate, Arc::clone(&reads)), move |v| {
            let _ = out_tx.send(v);
        });

        for _ in 0..5 {
            raw_tx.send(RawChange).unwrap();
        }

        let value = timeout(Duration::from_secs(1), out_rx.recv())
            .await
            .expect("no reconciled change emitted")
            .unwrap();
        assert_eq!(value, 1);
        assert_eq!(reads.load(Ordering::SeqCst), 1);

        // No further emission for the same burst.
        assert!(
            timeout(Duration::from_millis(100), out_rx.recv())
                .await
                .is_err()
        );
        assert_eq!(reads.load(Ordering::SeqCst), 1);

        drop(raw_tx);
        worker.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_notification_during_read_triggers_second_read() {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let gate = Arc::new(Semaphore::new(0));
        let reads = Arc::new(AtomicUsize::new(0));

        let worker = spawn_reconciler(
            raw_rx,
            gated_read(Arc::clone(&gate), Arc::clone(&reads)),
            move |v| {
                let _ = out_tx.send(v);
            },
        );

        raw_tx.send(RawChange).unwrap();
        // Wait until the first read is in progress (blocked on the gate).
        while reads.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        // This notification lands mid-read and must not be lost.
        raw_tx.send(RawChange).unwrap();
        gate.add_permits(2);

        let first = timeout(Duration::from_secs(1), out_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let second = timeout(Duration::from_secs(1), out_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!((first, second), (1, 2));
        assert_eq!(reads.load(Ordering::SeqCst), 2);

        drop(raw_tx);
        worker.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_error_does_not_suppress_future_cycles() {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let attempts = Arc::new(AtomicUsize::new(0));

        let read = {
            let attempts = Arc::clone(&attempts);
            move || {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        let error: StorageError = "storage unavailable".into();
                        Err(error)
                    } else {
                        Ok(Some(42))
                    }
                }
            }
        };
        let worker = spawn_reconciler(raw_rx, read, move |v| {
            let _ = out_tx.send(v);
        });

        raw_tx.send(RawChange).unwrap();
        // First cycle fails; nothing is emitted.
        assert!(
            timeout(Duration::from_millis(100), out_rx.recv())
                .await
                .is_err()
        );

        raw_tx.send(RawChange).unwrap();
        let value = timeout(Duration::from_secs(1), out_rx.recv())
            .await
            .expect("loop stayed suppressed after a read error")
            .unwrap();
        assert_eq!(value, 42);

        drop(raw_tx);
        worker.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_resource_emits_nothing() {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();

        let worker = spawn_reconciler(
            raw_rx,
            || async { Ok(None::<usize>) },
            move |v| {
                let _ = out_tx.send(v);
            },
        );

        raw_tx.send(RawChange).unwrap();
        assert!(
            timeout(Duration::from_millis(100), out_rx.recv())
                .await
                .is_err()
        );

        drop(raw_tx);
        worker.await.unwrap();
    }
}
