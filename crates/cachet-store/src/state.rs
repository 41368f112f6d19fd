//! Store lifecycle state.

use tokio::sync::watch;

/// What a store is currently doing.
///
/// Exactly one state holds at any instant. Because every storage
/// operation is serialized, transitions only ever go
/// `Ready -> Persisting -> Ready` or `Ready -> Fetching -> Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreState {
    /// No storage operation is in flight.
    #[default]
    Ready,
    /// A value is being written to the backing store.
    Persisting,
    /// The backing store is being read.
    Fetching,
}

/// Scoped lifecycle transition.
///
/// Entering publishes the non-ready state; dropping restores `Ready`.
/// Tying the restoration to `Drop` guarantees it runs on every exit path
/// of a storage operation, including errors and cancellation.
pub(crate) struct StateGuard<'a> {
    tx: &'a watch::Sender<StoreState>,
}

impl<'a> StateGuard<'a> {
    pub(crate) fn enter(tx: &'a watch::Sender<StoreState>, state: StoreState) -> Self {
        tx.send_replace(state);
        Self { tx }
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        self.tx.send_replace(StoreState::Ready);
    }
}
