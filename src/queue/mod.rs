//! Offline action queue.
//!
//! Persists user actions performed while disconnected and replays them in
//! enqueue order once connectivity returns. Every submission carries the
//! action id as an idempotency key; the retry ceiling and the terminal
//! failed list guarantee a poisoned action can neither block the queue nor
//! retry forever.

mod store;

pub use store::{
    ActionStore, FailedAction, JsonFileActionStore, MemoryActionStore, PersistedQueue, QueuedAction,
};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error as ThisError;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::error::Result;

/// Successful submission outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The server accepted the action.
    Accepted,
    /// The server had already processed this id (e.g. a reply was lost
    /// after an earlier success); treated as success.
    Duplicate,
}

/// Submission failures, split by whether a retry can ever succeed.
#[derive(Debug, Clone, ThisError)]
pub enum SubmitError {
    /// Network-class failure; the action stays queued for the next drain.
    #[error("retryable submission failure: {0}")]
    Retryable(String),
    /// Validation/conflict-class failure; the action is terminally failed.
    #[error("action rejected: {0}")]
    Rejected(String),
}

/// Server-side submission endpoint for drained actions.
#[async_trait]
pub trait ActionTransport: Send + Sync {
    /// Submit one action. Implementations must send the action `id` so the
    /// server can de-duplicate resubmissions, and must map a server
    /// duplicate/conflict reply to [`SubmitOutcome::Duplicate`].
    async fn submit(&self, action: &QueuedAction)
    -> std::result::Result<SubmitOutcome, SubmitError>;
}

/// The offline action queue.
pub struct OfflineQueue {
    config: QueueConfig,
    store: Arc<dyn ActionStore>,
    transport: Arc<dyn ActionTransport>,
    /// Single-writer state; mutated only by `enqueue` and the drain loop.
    inner: Mutex<PersistedQueue>,
    online: AtomicBool,
    /// Held by the one running drain.
    drain_lock: Mutex<()>,
    /// A connectivity-up signal that arrived mid-drain, coalesced.
    rerun: AtomicBool,
    /// Wakes an in-flight submission when connectivity drops.
    down: Notify,
}

impl OfflineQueue {
    /// Create a queue, loading persisted state from the store.
    pub async fn new(
        config: QueueConfig,
        store: Arc<dyn ActionStore>,
        transport: Arc<dyn ActionTransport>,
    ) -> Result<Self> {
        let persisted = store.load().await?;
        if !persisted.pending.is_empty() {
            info!(
                pending = persisted.pending.len(),
                "loaded persisted offline actions"
            );
        }

        Ok(Self {
            config,
            store,
            transport,
            inner: Mutex::new(persisted),
            online: AtomicBool::new(false),
            drain_lock: Mutex::new(()),
            rerun: AtomicBool::new(false),
            down: Notify::new(),
        })
    }

    /// Enqueue an action for replay.
    ///
    /// Persists durably and returns; never touches the network.
    pub async fn enqueue(&self, action: QueuedAction) -> Result<()> {
        let mut queue = self.inner.lock().await;
        debug!(id = %action.id, kind = %action.kind, "enqueueing offline action");
        queue.pending.push_back(action);
        self.store.persist(&queue).await
    }

    /// Whether the queue currently considers connectivity up.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Connectivity restored: start a drain task.
    ///
    /// A signal arriving while a drain is already running is coalesced into
    /// at most one follow-up drain, never a second concurrent one.
    pub fn on_connectivity_up(self: &Arc<Self>) {
        self.online.store(true, Ordering::SeqCst);
        let queue = Arc::clone(self);
        tokio::spawn(async move { queue.drain().await });
    }

    /// Connectivity lost: pause draining.
    ///
    /// Any in-flight attempt is abandoned; its action stays at the front of
    /// the queue for the next drain.
    pub fn on_connectivity_down(&self) {
        self.online.store(false, Ordering::SeqCst);
        self.down.notify_waiters();
    }

    /// Snapshot pending actions in enqueue order.
    pub async fn pending(&self) -> Vec<QueuedAction> {
        self.inner.lock().await.pending.iter().cloned().collect()
    }

    /// Snapshot terminally failed actions.
    pub async fn failed_actions(&self) -> Vec<FailedAction> {
        self.inner.lock().await.failed.clone()
    }

    /// Drain the queue now.
    ///
    /// At most one drain runs at a time; concurrent calls are coalesced.
    pub async fn drain(&self) {
        loop {
            let Ok(guard) = self.drain_lock.try_lock() else {
                self.rerun.store(true, Ordering::SeqCst);
                return;
            };
            self.drain_serialized().await;
            drop(guard);

            if !(self.rerun.swap(false, Ordering::SeqCst) && self.is_online()) {
                return;
            }
            debug!("running coalesced follow-up drain");
        }
    }

    /// Process pending actions head to tail while connectivity holds.
    async fn drain_serialized(&self) {
        loop {
            // Arm the down-signal waiter before the online check; a signal
            // landing between the check and the select is not lost.
            let mut down = std::pin::pin!(self.down.notified());
            down.as_mut().enable();

            if !self.is_online() {
                debug!("drain paused: connectivity down");
                return;
            }

            // Bump the attempt counter before submitting so a crash
            // mid-submit still counts against the ceiling.
            let action = {
                let mut queue = self.inner.lock().await;
                let Some(front) = queue.pending.front_mut() else {
                    return;
                };
                front.attempts = front.attempts.saturating_add(1);
                let snapshot = front.clone();
                if let Err(e) = self.store.persist(&queue).await {
                    warn!(error = %e, "failed to persist queue before submit");
                }
                snapshot
            };

            debug!(id = %action.id, attempt = action.attempts, "submitting queued action");

            let outcome = tokio::select! {
                result = self.transport.submit(&action) => result,
                _ = &mut down => {
                    debug!(id = %action.id, "submission abandoned, action stays at front");
                    return;
                }
            };

            match outcome {
                Ok(SubmitOutcome::Accepted) => {
                    self.remove_front(&action.id).await;
                }
                Ok(SubmitOutcome::Duplicate) => {
                    debug!(id = %action.id, "server already processed action, treating as success");
                    self.remove_front(&action.id).await;
                }
                Err(SubmitError::Rejected(reason)) => {
                    // A poisoned action must never block the rest.
                    warn!(id = %action.id, reason = %reason, "action rejected, moving to failed list");
                    self.fail_front(&action.id, &reason).await;
                }
                Err(SubmitError::Retryable(reason)) => {
                    if action.attempts >= self.config.max_attempts {
                        warn!(
                            id = %action.id,
                            attempts = action.attempts,
                            "retry ceiling reached, moving to failed list"
                        );
                        self.fail_front(&action.id, "retry ceiling exceeded").await;
                    } else {
                        // Wait for the next connectivity-up signal instead of
                        // busy-retrying.
                        debug!(id = %action.id, reason = %reason, "retryable failure, pausing drain");
                        return;
                    }
                }
            }
        }
    }

    async fn remove_front(&self, id: &str) {
        let mut queue = self.inner.lock().await;
        if queue.pending.front().map(|a| a.id == id).unwrap_or(false) {
            queue.pending.pop_front();
        }
        if let Err(e) = self.store.persist(&queue).await {
            warn!(error = %e, "failed to persist queue after submit");
        }
    }

    async fn fail_front(&self, id: &str, reason: &str) {
        let mut queue = self.inner.lock().await;
        if queue.pending.front().map(|a| a.id == id).unwrap_or(false) {
            let action = queue.pending.pop_front().expect("front checked above");
            queue.failed.push(FailedAction {
                action,
                error: reason.to_string(),
                failed_at: Utc::now(),
            });
        }
        if let Err(e) = self.store.persist(&queue).await {
            warn!(error = %e, "failed to persist queue after terminal failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as SyncMutex;
    use serde_json::Value;
    use std::collections::VecDeque;

    /// Scripted transport: pops one outcome per submission, records order.
    struct ScriptedTransport {
        outcomes: SyncMutex<VecDeque<std::result::Result<SubmitOutcome, SubmitError>>>,
        submitted: SyncMutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(
            outcomes: Vec<std::result::Result<SubmitOutcome, SubmitError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                outcomes: SyncMutex::new(outcomes.into()),
                submitted: SyncMutex::new(Vec::new()),
            })
        }

        fn submitted_ids(&self) -> Vec<String> {
            self.submitted.lock().clone()
        }
    }

    #[async_trait]
    impl ActionTransport for ScriptedTransport {
        async fn submit(
            &self,
            action: &QueuedAction,
        ) -> std::result::Result<SubmitOutcome, SubmitError> {
            self.submitted.lock().push(action.id.clone());
            self.outcomes
                .lock()
                .pop_front()
                .unwrap_or(Ok(SubmitOutcome::Accepted))
        }
    }

    fn action(id: &str) -> QueuedAction {
        QueuedAction {
            id: id.to_string(),
            kind: "submit_order".to_string(),
            payload: Value::Null,
            enqueued_at: Utc::now(),
            attempts: 0,
            auth_token_ref: None,
        }
    }

    async fn queue_with(
        transport: Arc<ScriptedTransport>,
        store: Arc<dyn ActionStore>,
    ) -> OfflineQueue {
        OfflineQueue::new(QueueConfig::default(), store, transport)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_fifo_drain_empties_queue() {
        let transport = ScriptedTransport::new(vec![]);
        let queue = queue_with(Arc::clone(&transport), Arc::new(MemoryActionStore::new())).await;

        queue.enqueue(action("1")).await.unwrap();
        queue.enqueue(action("2")).await.unwrap();

        queue.online.store(true, Ordering::SeqCst);
        queue.drain().await;

        assert_eq!(transport.submitted_ids(), ["1", "2"]);
        assert!(queue.pending().await.is_empty());
        assert!(queue.failed_actions().await.is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_never_submits_while_offline() {
        let transport = ScriptedTransport::new(vec![]);
        let queue = queue_with(Arc::clone(&transport), Arc::new(MemoryActionStore::new())).await;

        queue.enqueue(action("1")).await.unwrap();
        queue.drain().await; // offline: no-op

        assert!(transport.submitted_ids().is_empty());
        assert_eq!(queue.pending().await.len(), 1);
    }

    #[tokio::test]
    async fn test_retryable_failure_pauses_until_next_up() {
        let transport = ScriptedTransport::new(vec![
            Err(SubmitError::Retryable("timeout".to_string())),
        ]);
        let queue = queue_with(Arc::clone(&transport), Arc::new(MemoryActionStore::new())).await;

        queue.enqueue(action("1")).await.unwrap();
        queue.enqueue(action("2")).await.unwrap();

        queue.online.store(true, Ordering::SeqCst);
        queue.drain().await;

        // Drain stopped at the retryable failure; nothing was skipped.
        assert_eq!(transport.submitted_ids(), ["1"]);
        let pending = queue.pending().await;
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, "1");
        assert_eq!(pending[0].attempts, 1);

        // Next up-signal resumes from the front.
        queue.drain().await;
        assert_eq!(transport.submitted_ids(), ["1", "1", "2"]);
        assert!(queue.pending().await.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_action_does_not_block_queue() {
        let transport = ScriptedTransport::new(vec![
            Err(SubmitError::Rejected("invalid cart".to_string())),
            Ok(SubmitOutcome::Accepted),
        ]);
        let queue = queue_with(Arc::clone(&transport), Arc::new(MemoryActionStore::new())).await;

        queue.enqueue(action("poisoned")).await.unwrap();
        queue.enqueue(action("good")).await.unwrap();

        queue.online.store(true, Ordering::SeqCst);
        queue.drain().await;

        assert_eq!(transport.submitted_ids(), ["poisoned", "good"]);
        assert!(queue.pending().await.is_empty());

        let failed = queue.failed_actions().await;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].action.id, "poisoned");
        assert_eq!(failed[0].error, "invalid cart");
    }

    #[tokio::test]
    async fn test_duplicate_reply_treated_as_success() {
        let transport = ScriptedTransport::new(vec![Ok(SubmitOutcome::Duplicate)]);
        let queue = queue_with(Arc::clone(&transport), Arc::new(MemoryActionStore::new())).await;

        queue.enqueue(action("1")).await.unwrap();
        queue.online.store(true, Ordering::SeqCst);
        queue.drain().await;

        assert!(queue.pending().await.is_empty());
        assert!(queue.failed_actions().await.is_empty());
    }

    #[tokio::test]
    async fn test_retry_ceiling_moves_to_failed() {
        let transport = ScriptedTransport::new(vec![
            Err(SubmitError::Retryable("down".to_string())),
            Err(SubmitError::Retryable("down".to_string())),
            Err(SubmitError::Retryable("down".to_string())),
        ]);
        let store = Arc::new(MemoryActionStore::new());
        let queue = OfflineQueue::new(
            QueueConfig { max_attempts: 3 },
            store,
            transport,
        )
        .await
        .unwrap();

        queue.enqueue(action("doomed")).await.unwrap();
        queue.online.store(true, Ordering::SeqCst);

        // Each up-signal allows one more attempt.
        queue.drain().await;
        queue.drain().await;
        queue.drain().await;

        assert!(queue.pending().await.is_empty());
        let failed = queue.failed_actions().await;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].action.attempts, 3);
        assert_eq!(failed[0].error, "retry ceiling exceeded");
    }

    #[tokio::test(start_paused = true)]
    async fn test_down_mid_submission_leaves_action_at_front() {
        use std::sync::atomic::AtomicU64;
        use std::time::Duration;

        struct SlowTransport {
            started: AtomicU64,
            completed: AtomicU64,
        }

        #[async_trait]
        impl ActionTransport for SlowTransport {
            async fn submit(
                &self,
                _action: &QueuedAction,
            ) -> std::result::Result<SubmitOutcome, SubmitError> {
                self.started.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(10)).await;
                self.completed.fetch_add(1, Ordering::SeqCst);
                Ok(SubmitOutcome::Accepted)
            }
        }

        let transport = Arc::new(SlowTransport {
            started: AtomicU64::new(0),
            completed: AtomicU64::new(0),
        });
        let queue = Arc::new(
            OfflineQueue::new(
                QueueConfig::default(),
                Arc::new(MemoryActionStore::new()),
                Arc::clone(&transport) as Arc<dyn ActionTransport>,
            )
            .await
            .unwrap(),
        );

        queue.enqueue(action("1")).await.unwrap();
        queue.on_connectivity_up();

        // Let the drain task start its submission, then cut connectivity
        // while it is still in flight.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(transport.started.load(Ordering::SeqCst), 1);
        queue.on_connectivity_down();

        // Well past the transport's own completion time: the abandoned
        // submission never finishes and the action stays at the front.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.completed.load(Ordering::SeqCst), 0);

        let pending = queue.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "1");
        assert_eq!(pending[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_persistence_survives_restart() {
        let store: Arc<dyn ActionStore> = Arc::new(MemoryActionStore::new());
        let transport = ScriptedTransport::new(vec![]);

        {
            let queue = queue_with(Arc::clone(&transport), Arc::clone(&store)).await;
            queue.enqueue(action("1")).await.unwrap();
            queue.enqueue(action("2")).await.unwrap();
        }

        // Same identity reactivates: queue reloads and drains in order.
        let queue = queue_with(Arc::clone(&transport), store).await;
        assert_eq!(queue.pending().await.len(), 2);

        queue.online.store(true, Ordering::SeqCst);
        queue.drain().await;
        assert_eq!(transport.submitted_ids(), ["1", "2"]);
    }

    #[tokio::test]
    async fn test_concurrent_drain_coalesced() {
        let transport = ScriptedTransport::new(vec![]);
        let queue = queue_with(Arc::clone(&transport), Arc::new(MemoryActionStore::new())).await;
        queue.online.store(true, Ordering::SeqCst);

        let guard = queue.drain_lock.lock().await;
        queue.drain().await; // cannot run, coalesces
        assert!(queue.rerun.load(Ordering::SeqCst));
        drop(guard);
    }
}
