//! Install-prompt tracker.
//!
//! Tracks whether the client is installable on this device, whether the
//! user has installed it, and when they last declined the prompt. A
//! dismissal starts a cooldown so the prompt does not nag on every visit.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::InstallConfig;
use crate::error::{Error, Result};

/// Installability state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallStatus {
    /// No installability signal received yet.
    Unknown,
    /// The platform reported the client can be installed.
    Installable,
    /// The client is installed on this device.
    Installed,
    /// The user declined the prompt.
    Dismissed,
}

/// The persisted install-prompt state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallState {
    /// Current status.
    pub status: InstallStatus,
    /// When the user last dismissed the prompt; retained across status
    /// changes so the cooldown survives a fresh installability signal.
    pub dismissed_at: Option<DateTime<Utc>>,
}

impl Default for InstallState {
    fn default() -> Self {
        Self {
            status: InstallStatus::Unknown,
            dismissed_at: None,
        }
    }
}

/// Durable storage for install-prompt state.
#[async_trait]
pub trait InstallStore: Send + Sync {
    /// Load the persisted state; an empty store yields the default.
    async fn load(&self) -> Result<InstallState>;

    /// Persist the full state.
    async fn persist(&self, state: &InstallState) -> Result<()>;
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryInstallStore {
    inner: Mutex<InstallState>,
}

impl MemoryInstallStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InstallStore for MemoryInstallStore {
    async fn load(&self) -> Result<InstallState> {
        Ok(self.inner.lock().clone())
    }

    async fn persist(&self, state: &InstallState) -> Result<()> {
        *self.inner.lock() = state.clone();
        Ok(())
    }
}

/// JSON file store.
pub struct JsonFileInstallStore {
    path: PathBuf,
}

impl JsonFileInstallStore {
    /// Create a store backed by the given file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl InstallStore for JsonFileInstallStore {
    async fn load(&self) -> Result<InstallState> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| Error::storage(format!("corrupt install state file: {}", e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(InstallState::default()),
            Err(e) => Err(Error::storage(format!(
                "failed to read install state file: {}",
                e
            ))),
        }
    }

    async fn persist(&self, state: &InstallState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = serde_json::to_vec_pretty(state)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// The install-prompt tracker.
pub struct InstallTracker {
    config: InstallConfig,
    store: Arc<dyn InstallStore>,
    state: RwLock<InstallState>,
}

impl InstallTracker {
    /// Create a tracker, loading persisted state from the store.
    pub async fn new(config: InstallConfig, store: Arc<dyn InstallStore>) -> Result<Self> {
        let state = store.load().await?;
        Ok(Self {
            config,
            store,
            state: RwLock::new(state),
        })
    }

    /// Snapshot the current state.
    pub fn state(&self) -> InstallState {
        self.state.read().clone()
    }

    /// The effective status right now, with the cooldown applied.
    ///
    /// Non-mutating. Inside the cooldown window an installable client still
    /// reports [`InstallStatus::Dismissed`]; once the window elapses a
    /// dismissed client reports [`InstallStatus::Installable`] again.
    pub fn probe(&self) -> InstallStatus {
        let state = self.state.read();
        match state.status {
            InstallStatus::Installable | InstallStatus::Dismissed => {
                if self.in_cooldown(state.dismissed_at) {
                    InstallStatus::Dismissed
                } else {
                    InstallStatus::Installable
                }
            }
            other => other,
        }
    }

    /// Whether the prompt should be shown right now.
    pub fn should_prompt(&self) -> bool {
        self.probe() == InstallStatus::Installable
    }

    fn in_cooldown(&self, dismissed_at: Option<DateTime<Utc>>) -> bool {
        match dismissed_at {
            None => false,
            Some(at) => Utc::now() - at < self.cooldown(),
        }
    }

    /// The platform reported an installability signal.
    ///
    /// Legal from every status except [`InstallStatus::Installed`]. A prior
    /// dismissal keeps its cooldown.
    pub async fn record_installable(&self) -> Result<()> {
        let state = {
            let mut state = self.state.write();
            match state.status {
                InstallStatus::Installed => {
                    return Err(Error::InvalidStateTransition {
                        from: "installed".to_string(),
                        to: "installable".to_string(),
                    });
                }
                InstallStatus::Installable => return Ok(()),
                InstallStatus::Unknown | InstallStatus::Dismissed => {
                    state.status = InstallStatus::Installable;
                    state.clone()
                }
            }
        };

        debug!("client became installable");
        self.store.persist(&state).await
    }

    /// The user declined the install prompt.
    ///
    /// Legal only while installable; starts the cooldown.
    pub async fn record_dismissal(&self) -> Result<()> {
        let state = {
            let mut state = self.state.write();
            if state.status != InstallStatus::Installable {
                return Err(Error::InvalidStateTransition {
                    from: status_name(state.status).to_string(),
                    to: "dismissed".to_string(),
                });
            }
            state.status = InstallStatus::Dismissed;
            state.dismissed_at = Some(Utc::now());
            state.clone()
        };

        info!("install prompt dismissed, cooldown started");
        self.store.persist(&state).await
    }

    /// The client was installed.
    ///
    /// The platform can complete an install from any prior status (e.g.
    /// through browser chrome rather than our prompt), so this is legal
    /// everywhere and clears any pending cooldown.
    pub async fn record_installed(&self) -> Result<()> {
        let state = {
            let mut state = self.state.write();
            if state.status == InstallStatus::Installed {
                return Ok(());
            }
            state.status = InstallStatus::Installed;
            state.dismissed_at = None;
            state.clone()
        };

        info!("client installed");
        self.store.persist(&state).await
    }

    fn cooldown(&self) -> Duration {
        Duration::hours(self.config.dismiss_cooldown_hours as i64)
    }
}

fn status_name(status: InstallStatus) -> &'static str {
    match status {
        InstallStatus::Unknown => "unknown",
        InstallStatus::Installable => "installable",
        InstallStatus::Installed => "installed",
        InstallStatus::Dismissed => "dismissed",
    }
}
