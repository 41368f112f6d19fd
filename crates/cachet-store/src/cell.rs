//! The in-memory authoritative value of a store.

use std::sync::Arc;

use tokio::sync::watch;

/// An observable single-value cell.
///
/// Holds the current cached value and notifies subscribers whenever it
/// changes. Assignments are single, whole-value transitions; subscribers
/// never observe a partially updated value.
///
/// Setting a value equal to the current one is suppressed and does not
/// wake subscribers.
///
/// Clones share the same underlying value.
#[derive(Debug, Clone)]
pub struct ValueCell<T> {
    tx: Arc<watch::Sender<T>>,
}

impl<T> ValueCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a cell holding `initial`.
    pub fn new(initial: T) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Get a clone of the current value.
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Replace the current value, notifying subscribers on inequality.
    ///
    /// The watch channel's internal lock makes the assignment atomic with
    /// respect to concurrent `set` calls from other tasks.
    pub fn set(&self, value: T) {
        self.tx.send_if_modified(|current| {
            if *current != value {
                *current = value;
                true
            } else {
                false
            }
        });
    }

    /// Replace the current value through an update function.
    pub fn update(&self, updater: impl FnOnce(T) -> T) {
        self.set(updater(self.get()));
    }

    /// Subscribe to value changes.
    ///
    /// The receiver immediately holds the current value and is marked
    /// changed afterwards only when the value actually changes.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}
