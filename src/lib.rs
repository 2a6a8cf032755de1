//! Real-time notification delivery and offline action replay for a
//! storefront client.
//!
//! The crate is organized around a small set of cooperating components,
//! composed by [`NotifyAgent`]:
//!
//! - [`channel`]: the WebSocket event channel client, one session per
//!   active identity, with identity registration, reconnection backoff,
//!   and socket generations that discard frames from superseded
//!   connections.
//! - [`dispatch`]: the delivery dispatcher, which de-duplicates
//!   redelivered events and walks an alert fallback chain.
//! - [`badge`]: the unread-count reconciler and the device surfaces it
//!   pushes to.
//! - [`queue`]: the durable offline action queue, drained in order when
//!   connectivity returns.
//! - [`install`]: the install-prompt state machine with its dismissal
//!   cooldown.
//!
//! Hosts supply their platform specifics through [`HostBindings`] and
//! interact with the agent only.

pub mod agent;
pub mod badge;
pub mod channel;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod install;
pub mod logging;
pub mod queue;

pub use agent::{HostBindings, NotifyAgent};
pub use badge::{BadgeReconciler, BadgeState, BadgeSurface};
pub use channel::{
    ChannelConnection, ChannelSession, ChannelTransport, ConnectionState, ConnectivityEvent,
    EventChannelClient, WebSocketTransport,
};
pub use config::{
    AgentConfig, ChannelConfig, DispatchConfig, InstallConfig, QueueConfig, ReconnectPolicy,
};
pub use dispatch::{
    AlertChain, AlertMechanism, AlertPresenter, AlertStyle, DeliveryDispatcher, NativeBadgeAlert,
    StickyAlert, TransientAlert,
};
pub use error::{Error, Result};
pub use events::{NotificationEvent, NotificationKind};
pub use install::{InstallState, InstallStatus, InstallStore, InstallTracker, JsonFileInstallStore, MemoryInstallStore};
pub use queue::{
    ActionStore, ActionTransport, FailedAction, JsonFileActionStore, MemoryActionStore,
    OfflineQueue, QueuedAction, SubmitError, SubmitOutcome,
};
