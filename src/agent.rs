//! The notification agent.
//!
//! Top-level facade wiring the channel client, dispatcher, badge
//! reconciler, offline queue, and install tracker together behind the
//! host-supplied platform bindings. The host UI talks to this type only.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::info;

use crate::badge::{BadgeReconciler, BadgeState, BadgeSurface};
use crate::channel::{ChannelSession, ChannelTransport, ConnectivityEvent, EventChannelClient};
use crate::config::AgentConfig;
use crate::dispatch::{
    AlertChain, AlertMechanism, AlertPresenter, DeliveryDispatcher, NativeBadgeAlert, StickyAlert,
    TransientAlert,
};
use crate::error::Result;
use crate::events::NotificationEvent;
use crate::install::{InstallState, InstallStatus, InstallStore, InstallTracker};
use crate::queue::{ActionStore, ActionTransport, FailedAction, OfflineQueue, QueuedAction};

/// Platform hooks the host must supply.
///
/// Everything device- or server-specific enters through this struct; the
/// agent itself is platform-neutral.
pub struct HostBindings {
    /// WebSocket transport to the notification server.
    pub channel_transport: Arc<dyn ChannelTransport>,
    /// Submission endpoint for replayed offline actions.
    pub action_transport: Arc<dyn ActionTransport>,
    /// Durable storage for the offline queue.
    pub action_store: Arc<dyn ActionStore>,
    /// Durable storage for install-prompt state.
    pub install_store: Arc<dyn InstallStore>,
    /// Badge-count surfaces on this device, most reliable first.
    pub badge_surfaces: Vec<Arc<dyn BadgeSurface>>,
    /// Platform alert presenter, if the device has one.
    pub alert_presenter: Option<Arc<dyn AlertPresenter>>,
}

/// The notification agent.
pub struct NotifyAgent {
    badge: Arc<BadgeReconciler>,
    queue: Arc<OfflineQueue>,
    install: InstallTracker,
    channel: EventChannelClient,
    surfaces: Vec<Arc<dyn BadgeSurface>>,
}

impl NotifyAgent {
    /// Build an agent from configuration and host bindings.
    ///
    /// Loads persisted queue and install state; does not open any network
    /// connection until [`activate`](Self::activate).
    pub async fn new(config: AgentConfig, bindings: HostBindings) -> Result<Self> {
        let badge = Arc::new(BadgeReconciler::new());

        let queue = Arc::new(
            OfflineQueue::new(
                config.queue,
                bindings.action_store,
                bindings.action_transport,
            )
            .await?,
        );

        let install = InstallTracker::new(config.install, bindings.install_store).await?;

        // Fallback order: native badge first, then a sticky alert, then the
        // transient silent alert as last resort.
        let mut chain = AlertChain::new();
        if let Some(surface) = bindings.badge_surfaces.first() {
            chain.push(Arc::new(NativeBadgeAlert::new(
                Arc::clone(surface),
                Arc::clone(&badge),
            )) as Arc<dyn AlertMechanism>);
        }
        if let Some(presenter) = &bindings.alert_presenter {
            chain.push(Arc::new(StickyAlert::new(Arc::clone(presenter))) as Arc<dyn AlertMechanism>);
            chain.push(Arc::new(TransientAlert::new(
                Arc::clone(presenter),
                Duration::from_millis(config.dispatch.transient_dismiss_ms),
            )) as Arc<dyn AlertMechanism>);
        }

        let dispatcher = Arc::new(DeliveryDispatcher::new(
            Arc::clone(&badge),
            chain,
            config.dispatch,
        ));

        let channel = EventChannelClient::new(
            config.channel,
            bindings.channel_transport,
            dispatcher,
            Arc::clone(&queue),
        );

        Ok(Self {
            badge,
            queue,
            install,
            channel,
            surfaces: bindings.badge_surfaces,
        })
    }

    /// Activate the agent for an identity.
    ///
    /// Idempotent for the same identity. Activating a different identity
    /// tears the previous session down and clears its badge state first.
    pub async fn activate(&self, identity: &str) {
        match self.channel.session() {
            Some(session) if session.identity == identity => {}
            Some(session) => {
                info!(
                    old_identity = %session.identity,
                    new_identity = identity,
                    "switching identity"
                );
                self.channel.disconnect();
                self.badge.reset().await;
                self.register_surfaces();
            }
            None => self.register_surfaces(),
        }

        self.channel.connect(identity);
    }

    /// Deactivate the current identity: close the channel, clear the badge
    /// state and every surface.
    pub async fn deactivate(&self) {
        self.channel.disconnect();
        self.badge.reset().await;
    }

    /// Snapshot the active channel session, if any.
    pub fn session(&self) -> Option<ChannelSession> {
        self.channel.session()
    }

    /// Subscribe to channel connectivity transitions.
    pub fn subscribe_connectivity(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.channel.subscribe_connectivity()
    }

    /// Snapshot the current badge state.
    pub fn badge_state(&self) -> BadgeState {
        self.badge.get()
    }

    /// Snapshot the local notification list for rendering.
    pub fn notifications(&self) -> Vec<NotificationEvent> {
        self.badge.events()
    }

    /// Mark one notification as read.
    pub async fn mark_read(&self, event_id: &str) {
        self.badge.mark_read(event_id).await;
    }

    /// Mark every notification as read.
    pub async fn mark_all_read(&self) {
        self.badge.mark_all_read().await;
    }

    /// Recount the unread badge from the notification list.
    pub async fn recompute_badge(&self) {
        self.badge.recompute().await;
    }

    /// Enqueue a user action for replay.
    ///
    /// Persists and returns immediately. If the channel is currently up,
    /// a drain is kicked off in the background.
    pub async fn enqueue_action(&self, action: QueuedAction) -> Result<()> {
        self.queue.enqueue(action).await?;

        if self.queue.is_online() {
            let queue = Arc::clone(&self.queue);
            tokio::spawn(async move { queue.drain().await });
        }
        Ok(())
    }

    /// Snapshot pending offline actions in enqueue order.
    pub async fn pending_actions(&self) -> Vec<QueuedAction> {
        self.queue.pending().await
    }

    /// Snapshot terminally failed actions for the host to surface.
    pub async fn failed_actions(&self) -> Vec<FailedAction> {
        self.queue.failed_actions().await
    }

    /// Snapshot the install-prompt state.
    pub fn install_state(&self) -> InstallState {
        self.install.state()
    }

    /// Effective install status with the dismissal cooldown applied.
    pub fn probe_install(&self) -> InstallStatus {
        self.install.probe()
    }

    /// Whether the install prompt should be shown right now.
    pub fn should_prompt_install(&self) -> bool {
        self.install.should_prompt()
    }

    /// The platform reported an installability signal.
    pub async fn record_installable(&self) -> Result<()> {
        self.install.record_installable().await
    }

    /// The user declined the install prompt.
    pub async fn record_install_dismissal(&self) -> Result<()> {
        self.install.record_dismissal().await
    }

    /// The client was installed on this device.
    pub async fn record_installed(&self) -> Result<()> {
        self.install.record_installed().await
    }

    fn register_surfaces(&self) {
        for surface in &self.surfaces {
            self.badge.register_surface(Arc::clone(surface));
        }
    }
}
