//! A supervised task group: the Rust analogue of the original's single asyncio `TaskGroup`
//! (§4.2, §5). Any task that returns an error reports it to the supervisor, which aborts
//! every sibling and tears the group down. "All or nothing": once a group has failed, it
//! cannot be reused.
//!
//! Unlike a bare `tokio::task::JoinSet`, spawning here doesn't require `&mut self`, so many
//! independent call sites (subscribe, dispatch, reconcile, tx-fetch) can all spawn onto the
//! same group concurrently without serializing on a single owner.

use std::sync::{Arc, Mutex};

use tokio::{
    sync::mpsc,
    task::{AbortHandle, JoinHandle},
};

use crate::error::SyncError;

/// A cheap, shareable handle: cloning a `TaskGroup` clones the `Arc`s underneath, not the
/// tracked state, so `spawn` can hand a clone of itself into the very task it spawns in order
/// to abort the rest of the group on that task's failure.
#[derive(Clone)]
pub(crate) struct TaskGroup {
    handles: Arc<Mutex<Vec<AbortHandle>>>,
    failure_tx: mpsc::UnboundedSender<SyncError>,
}

impl TaskGroup {
    /// Returns the group and a receiver that yields the first failure reported by any task
    /// spawned onto it.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SyncError>) {
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();
        (
            Self {
                handles: Arc::new(Mutex::new(Vec::new())),
                failure_tx,
            },
            failure_rx,
        )
    }

    /// Spawns `fut` onto the Tokio runtime, tracking it for cancellation. An `Err` result is
    /// reported to the supervisor, which then aborts every other task in the group — a
    /// cancellation (task aborted) is not itself reported or treated as a failure.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<()>
    where
        F: std::future::Future<Output = Result<(), SyncError>> + Send + 'static,
    {
        let failure_tx = self.failure_tx.clone();
        let group = self.clone();
        let join = tokio::spawn(async move {
            if let Err(err) = fut.await {
                let _ = failure_tx.send(err);
                group.abort_all();
            }
        });
        self.handles.lock().unwrap().push(join.abort_handle());
        join
    }

    /// Aborts every task spawned onto this group so far.
    pub fn abort_all(&self) {
        let handles = std::mem::take(&mut *self.handles.lock().unwrap());
        for handle in handles {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn failing_task_is_reported_once() {
        let (group, mut failures) = TaskGroup::new();
        group.spawn(async { Err(SyncError::invalid_input("boom")) });

        let failure = tokio::time::timeout(Duration::from_secs(1), failures.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(failure, SyncError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn a_failing_task_aborts_its_siblings() {
        let (group, mut failures) = TaskGroup::new();
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran_clone = ran.clone();
        group.spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            ran_clone.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        });
        group.spawn(async { Err(SyncError::invalid_input("boom")) });

        tokio::time::timeout(Duration::from_secs(1), failures.recv())
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn abort_all_stops_a_pending_task() {
        let (group, _failures) = TaskGroup::new();
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran_clone = ran.clone();
        group.spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            ran_clone.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        });

        group.abort_all();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    }
}
