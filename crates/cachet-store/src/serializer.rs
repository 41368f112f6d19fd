//! Operation serializer.
//!
//! At most one storage operation runs at a time per store. Later callers
//! wait in FIFO order behind a fair mutex, and a counted capacity bound
//! rejects new operations outright once too many are in flight, so a
//! stuck storage call cannot grow the queue without limit.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Mutex;

use crate::cancel::CancelToken;
use crate::error::{Result, StoreError};

/// FIFO queue granting exclusive access to the backing store.
pub(crate) struct OpQueue {
    /// Fair mutex: waiters acquire strictly in arrival order.
    lock: Mutex<()>,
    /// Operations currently running or queued.
    in_flight: AtomicUsize,
    /// Maximum in-flight operations before rejecting.
    capacity: usize,
}

/// Decrements the in-flight counter on every exit path.
struct SlotGuard<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

impl OpQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            lock: Mutex::new(()),
            in_flight: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Run `op` with exclusive access to the backing store.
    ///
    /// Fails with [`StoreError::QueueSaturated`] when the capacity bound
    /// is already reached, and with [`StoreError::Cancelled`] when the
    /// token fires before `op` starts. Once `op` is running it is never
    /// interrupted from here; a queued operation always observes the side
    /// effects of all operations enqueued before it.
    pub(crate) async fn run<F, Fut, R>(&self, cancel: Option<&CancelToken>, op: F) -> Result<R>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        if let Some(token) = cancel {
            if token.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
        }

        let previous = self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _slot = SlotGuard {
            counter: &self.in_flight,
        };
        if previous >= self.capacity {
            return Err(StoreError::QueueSaturated { pending: previous });
        }

        let _guard = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => return Err(StoreError::Cancelled),
                guard = self.lock.lock() => guard,
            },
            None => self.lock.lock().await,
        };

        // The token may have fired while this operation held the front of
        // the queue; don't start I/O for a cancelled caller.
        if let Some(token) = cancel {
            if token.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
        }

        op().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    use tokio::sync::Notify;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_operations_run_in_arrival_order() {
        let queue = Arc::new(OpQueue::new(100));
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5 {
            let queue = Arc::clone(&queue);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                queue
                    .run(None, || async {
                        order.lock().unwrap().push(i);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok(())
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_saturated_queue_rejects_immediately() {
        let queue = Arc::new(OpQueue::new(2));
        let release = Arc::new(Notify::new());

        let first = {
            let queue = Arc::clone(&queue);
            let release = Arc::clone(&release);
            tokio::spawn(async move {
                queue
                    .run(None, || async {
                        release.notified().await;
                        Ok(1)
                    })
                    .await
            })
        };
        let second = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.run(None, || async { Ok(2) }).await })
        };
        // Let both occupy the queue before overflowing it.
        tokio::task::yield_now().await;

        let overflow = queue.run(None, || async { Ok(3) }).await;
        assert!(matches!(
            overflow,
            Err(StoreError::QueueSaturated { pending: 2 })
        ));

        release.notify_one();
        assert_eq!(first.await.unwrap().unwrap(), 1);
        assert_eq!(second.await.unwrap().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_operation_can_be_cancelled() {
        let queue = Arc::new(OpQueue::new(100));
        let release = Arc::new(Notify::new());
        let ran = Arc::new(AtomicBool::new(false));

        let first = {
            let queue = Arc::clone(&queue);
            let release = Arc::clone(&release);
            tokio::spawn(async move {
                queue
                    .run(None, || async {
                        release.notified().await;
                        Ok(())
                    })
                    .await
            })
        };

        let token = CancelToken::new();
        let queued = {
            let queue = Arc::clone(&queue);
            let token = token.clone();
            let ran = Arc::clone(&ran);
            tokio::spawn(async move {
                queue
                    .run(Some(&token), || async {
                        ran.store(true, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        token.cancel();
        assert!(matches!(
            queued.await.unwrap(),
            Err(StoreError::Cancelled)
        ));

        release.notify_one();
        first.await.unwrap().unwrap();
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_already_cancelled_token_fails_before_queueing() {
        let queue = OpQueue::new(100);
        let token = CancelToken::new();
        token.cancel();

        let result = queue.run(Some(&token), || async { Ok(()) }).await;
        assert!(matches!(result, Err(StoreError::Cancelled)));
        assert_eq!(queue.in_flight.load(Ordering::SeqCst), 0);
    }
}
