//! Reconcile Work Queue
//!
//! FIFO of Service keys shared by the reconcile workers.
//!
//! - A key waiting in the queue is stored once, however often it is added.
//! - A key is handed to at most one worker at a time. Adding it while a
//!   worker holds it marks it dirty; it is queued again on `done`.
//! - After `shutdown`, adds are ignored and `next` returns `None`.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use tokio::sync::Notify;

use super::types::ServiceKey;

#[derive(Default)]
struct QueueState {
    queue: VecDeque<ServiceKey>,
    dirty: HashSet<ServiceKey>,
    processing: HashSet<ServiceKey>,
    shutting_down: bool,
}

#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        // The state is left consistent after every operation, so a poisoned
        // lock is still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue a key. Returns false if it was ignored (shutdown).
    pub fn add(&self, key: ServiceKey) -> bool {
        let mut state = self.lock();
        if state.shutting_down {
            return false;
        }
        if !state.dirty.insert(key.clone()) {
            return true;
        }
        if state.processing.contains(&key) {
            return true;
        }
        state.queue.push_back(key);
        drop(state);

        self.notify.notify_one();
        true
    }

    /// Wait for the next key, claiming it for the caller.
    pub async fn next(&self) -> Option<ServiceKey> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Release a key claimed by `next`, re-queueing it if it was re-added.
    pub fn done(&self, key: &ServiceKey) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop handing out keys and wake every waiting worker.
    pub fn shutdown(&self) {
        self.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Keys waiting to be claimed
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn key(name: &str) -> ServiceKey {
        ServiceKey::new(name, "billing")
    }

    #[tokio::test]
    async fn test_pending_duplicates_coalesce() {
        let queue = WorkQueue::new();
        queue.add(key("payments"));
        queue.add(key("payments"));
        queue.add(key("ledger"));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.next().await, Some(key("payments")));
        assert_eq!(queue.next().await, Some(key("ledger")));
    }

    #[tokio::test]
    async fn test_key_in_flight_is_not_handed_out_twice() {
        let queue = WorkQueue::new();
        queue.add(key("payments"));

        let claimed = queue.next().await.unwrap();
        queue.add(key("payments"));
        assert!(queue.is_empty(), "re-added key waits for the current pass");

        queue.done(&claimed);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next().await, Some(key("payments")));
    }

    #[tokio::test]
    async fn test_done_without_readd_does_not_requeue() {
        let queue = WorkQueue::new();
        queue.add(key("payments"));

        let claimed = queue.next().await.unwrap();
        queue.done(&claimed);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_waiting_worker_is_woken_by_add() {
        let queue = Arc::new(WorkQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.add(key("payments"));

        let got = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(got, Some(key("payments")));
    }

    #[tokio::test]
    async fn test_shutdown_releases_waiters_and_rejects_adds() {
        let queue = Arc::new(WorkQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.shutdown();

        let got = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(got, None);
        assert!(!queue.add(key("payments")));
        assert!(queue.is_shutting_down());
    }
}
