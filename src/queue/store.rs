//! Durable storage for the offline action queue.
//!
//! The persisted queue is read once at startup and written on every
//! mutation. The JSON file store is the default durable implementation; the
//! in-memory store backs tests and hosts that bring their own persistence.

use std::collections::VecDeque;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A user action queued for replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedAction {
    /// Locally-generated id, stable across retries.
    ///
    /// Doubles as the server-side idempotency key, so a resubmission after a
    /// lost acknowledgement never duplicates the real-world side effect.
    pub id: String,
    /// Action kind (e.g. `submit_order`).
    pub kind: String,
    /// Opaque action payload.
    pub payload: Value,
    /// When the action was enqueued.
    pub enqueued_at: DateTime<Utc>,
    /// Submission attempts so far; monotonically non-decreasing, capped.
    pub attempts: u32,
    /// Reference to the auth token to submit under (never the token itself).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token_ref: Option<String>,
}

impl QueuedAction {
    /// Create a new action with a fresh id.
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: kind.into(),
            payload,
            enqueued_at: Utc::now(),
            attempts: 0,
            auth_token_ref: None,
        }
    }

    /// Attach an auth token reference.
    pub fn with_auth_token_ref(mut self, token_ref: impl Into<String>) -> Self {
        self.auth_token_ref = Some(token_ref.into());
        self
    }
}

/// Terminal record for an action that will never be retried.
///
/// Actions are moved here, never silently dropped, so the host can surface
/// an explicit "action failed" indicator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedAction {
    /// The action as of its last attempt.
    pub action: QueuedAction,
    /// Why it failed.
    pub error: String,
    /// When it was moved to the failed list.
    pub failed_at: DateTime<Utc>,
}

/// The full persisted queue state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedQueue {
    /// Actions awaiting replay, in enqueue order.
    pub pending: VecDeque<QueuedAction>,
    /// Terminal failures.
    pub failed: Vec<FailedAction>,
}

/// Durable storage for the queue.
#[async_trait]
pub trait ActionStore: Send + Sync {
    /// Load the persisted state; an empty store yields the default.
    async fn load(&self) -> Result<PersistedQueue>;

    /// Persist the full state.
    async fn persist(&self, queue: &PersistedQueue) -> Result<()>;
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryActionStore {
    inner: Mutex<PersistedQueue>,
}

impl MemoryActionStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ActionStore for MemoryActionStore {
    async fn load(&self) -> Result<PersistedQueue> {
        Ok(self.inner.lock().clone())
    }

    async fn persist(&self, queue: &PersistedQueue) -> Result<()> {
        *self.inner.lock() = queue.clone();
        Ok(())
    }
}

/// JSON file store.
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// crash mid-write never corrupts the persisted queue.
pub struct JsonFileActionStore {
    path: PathBuf,
}

impl JsonFileActionStore {
    /// Create a store backed by the given file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ActionStore for JsonFileActionStore {
    async fn load(&self) -> Result<PersistedQueue> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| Error::storage(format!("corrupt queue file: {}", e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PersistedQueue::default()),
            Err(e) => Err(Error::storage(format!("failed to read queue file: {}", e))),
        }
    }

    async fn persist(&self, queue: &PersistedQueue) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = serde_json::to_vec_pretty(queue)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
