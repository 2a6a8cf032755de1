//! Alert mechanisms and the fallback chain.
//!
//! No single alert surface is assumed reliable across devices. Mechanisms
//! are `(probe, attempt)` pairs walked in priority order: the first success
//! ends the chain, and every failure is caught and logged so one broken
//! platform API never silences the rest.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::badge::{BadgeReconciler, BadgeSurface};
use crate::error::Result;
use crate::events::NotificationEvent;

/// Presentation style for platform alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertStyle {
    /// A persistent alert that stays until dismissed.
    Sticky,
    /// A silent alert that is auto-dismissed shortly after presentation.
    TransientSilent,
}

/// Platform notification-presentation hooks supplied by the host.
#[async_trait]
pub trait AlertPresenter: Send + Sync {
    /// Whether the platform can present the given style.
    fn supports(&self, style: AlertStyle) -> bool;

    /// Present an alert; returns a token usable for dismissal.
    async fn present(&self, event: &NotificationEvent, style: AlertStyle) -> Result<String>;

    /// Dismiss a previously presented alert.
    async fn dismiss(&self, token: &str) -> Result<()>;
}

/// One alert mechanism in the fallback chain.
#[async_trait]
pub trait AlertMechanism: Send + Sync {
    /// Mechanism name for logging.
    fn name(&self) -> &'static str;

    /// Capability probe; mechanisms that report false are skipped.
    fn probe(&self) -> bool;

    /// Attempt to alert the user about one event.
    async fn attempt(&self, event: &NotificationEvent) -> Result<()>;
}

/// Ordered chain of alert mechanisms.
#[derive(Clone, Default)]
pub struct AlertChain {
    mechanisms: Vec<Arc<dyn AlertMechanism>>,
}

impl AlertChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self {
            mechanisms: Vec::new(),
        }
    }

    /// Append a mechanism; earlier mechanisms are more reliable and are
    /// tried first.
    pub fn push(&mut self, mechanism: Arc<dyn AlertMechanism>) {
        self.mechanisms.push(mechanism);
    }

    /// Number of mechanisms in the chain.
    pub fn len(&self) -> usize {
        self.mechanisms.len()
    }

    /// Whether the chain has no mechanisms.
    pub fn is_empty(&self) -> bool {
        self.mechanisms.is_empty()
    }

    /// Deliver one event through the chain.
    ///
    /// Returns true if some mechanism succeeded. Failures never propagate to
    /// the caller; the worst outcome is "notification didn't show".
    pub async fn deliver(&self, event: &NotificationEvent) -> bool {
        for mechanism in &self.mechanisms {
            if !mechanism.probe() {
                debug!(mechanism = mechanism.name(), "alert mechanism unavailable");
                continue;
            }

            match mechanism.attempt(event).await {
                Ok(()) => {
                    debug!(mechanism = mechanism.name(), id = %event.id, "alert delivered");
                    return true;
                }
                Err(e) => {
                    warn!(
                        mechanism = mechanism.name(),
                        id = %event.id,
                        error = %e,
                        "alert mechanism failed, falling back"
                    );
                }
            }
        }

        false
    }
}

/// Mechanism (a): bump the native badge-count surface.
pub struct NativeBadgeAlert {
    surface: Arc<dyn BadgeSurface>,
    badge: Arc<BadgeReconciler>,
}

impl NativeBadgeAlert {
    /// Create a badge-count alert over the given native surface.
    pub fn new(surface: Arc<dyn BadgeSurface>, badge: Arc<BadgeReconciler>) -> Self {
        Self { surface, badge }
    }
}

#[async_trait]
impl AlertMechanism for NativeBadgeAlert {
    fn name(&self) -> &'static str {
        "native_badge"
    }

    fn probe(&self) -> bool {
        self.surface.is_available()
    }

    async fn attempt(&self, _event: &NotificationEvent) -> Result<()> {
        self.surface.set_count(self.badge.get().unread_count).await
    }
}

/// Mechanism (b): a persistent alert via the platform presenter.
pub struct StickyAlert {
    presenter: Arc<dyn AlertPresenter>,
}

impl StickyAlert {
    /// Create a sticky alert over the given presenter.
    pub fn new(presenter: Arc<dyn AlertPresenter>) -> Self {
        Self { presenter }
    }
}

#[async_trait]
impl AlertMechanism for StickyAlert {
    fn name(&self) -> &'static str {
        "sticky_alert"
    }

    fn probe(&self) -> bool {
        self.presenter.supports(AlertStyle::Sticky)
    }

    async fn attempt(&self, event: &NotificationEvent) -> Result<()> {
        self.presenter.present(event, AlertStyle::Sticky).await?;
        Ok(())
    }
}

/// Mechanism (c), last resort: a transient silent alert auto-dismissed
/// after a short delay to avoid stacking.
pub struct TransientAlert {
    presenter: Arc<dyn AlertPresenter>,
    dismiss_after: Duration,
}

impl TransientAlert {
    /// Create a transient alert with the given auto-dismiss delay.
    pub fn new(presenter: Arc<dyn AlertPresenter>, dismiss_after: Duration) -> Self {
        Self {
            presenter,
            dismiss_after,
        }
    }
}

#[async_trait]
impl AlertMechanism for TransientAlert {
    fn name(&self) -> &'static str {
        "transient_alert"
    }

    fn probe(&self) -> bool {
        self.presenter.supports(AlertStyle::TransientSilent)
    }

    async fn attempt(&self, event: &NotificationEvent) -> Result<()> {
        let token = self
            .presenter
            .present(event, AlertStyle::TransientSilent)
            .await?;

        let presenter = Arc::clone(&self.presenter);
        let dismiss_after = self.dismiss_after;
        tokio::spawn(async move {
            tokio::time::sleep(dismiss_after).await;
            if let Err(e) = presenter.dismiss(&token).await {
                debug!(error = %e, "failed to dismiss transient alert");
            }
        });

        Ok(())
    }
}
