//! Badge reconciler.
//!
//! Owns the durable unread count and the local notification list it is
//! derived from. The count is never trusted incrementally: `recompute()`
//! recounts from the event list, which is what recovers from missed or
//! duplicated increments after an offline window.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::Result;
use crate::events::NotificationEvent;

/// The durable unread-count state.
#[derive(Debug, Clone, Serialize)]
pub struct BadgeState {
    /// Number of locally-known unread notifications.
    pub unread_count: u64,
    /// When the count was last recomputed from the event list.
    pub last_reconciled_at: DateTime<Utc>,
}

/// A device surface that displays the unread count.
///
/// Surfaces only ever read from the reconciler; a surface that fails to
/// update never blocks the others and is retried on the next `recompute()`.
#[async_trait]
pub trait BadgeSurface: Send + Sync {
    /// Surface name for logging.
    fn name(&self) -> &'static str;

    /// Capability probe; unavailable surfaces are skipped.
    fn is_available(&self) -> bool;

    /// Display the given count.
    async fn set_count(&self, count: u64) -> Result<()>;

    /// Clear the surface on identity deactivation.
    async fn clear(&self) -> Result<()> {
        self.set_count(0).await
    }
}

/// The badge reconciler.
pub struct BadgeReconciler {
    events: RwLock<Vec<NotificationEvent>>,
    state: RwLock<BadgeState>,
    surfaces: RwLock<Vec<Arc<dyn BadgeSurface>>>,
}

impl Default for BadgeReconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl BadgeReconciler {
    /// Create an empty reconciler.
    pub fn new() -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            state: RwLock::new(BadgeState {
                unread_count: 0,
                last_reconciled_at: Utc::now(),
            }),
            surfaces: RwLock::new(Vec::new()),
        }
    }

    /// Register a surface to receive count updates.
    pub fn register_surface(&self, surface: Arc<dyn BadgeSurface>) {
        self.surfaces.write().push(surface);
    }

    /// Insert an event into the local list.
    ///
    /// Returns false if an event with the same id is already known; `id` is
    /// the sole de-duplication key.
    pub fn insert_event(&self, event: NotificationEvent) -> bool {
        let mut events = self.events.write();
        if events.iter().any(|e| e.id == event.id) {
            debug!(id = %event.id, "event already known, skipping insert");
            return false;
        }
        events.push(event);
        true
    }

    /// Increment the unread count by one and push to surfaces.
    pub async fn increment(&self) {
        let count = {
            let mut state = self.state.write();
            state.unread_count += 1;
            state.unread_count
        };
        self.push_to_surfaces(count).await;
    }

    /// Mark one event as read.
    ///
    /// The read flag only transitions false→true; marking an already-read or
    /// unknown event is a no-op. A count that would drift negative forces a
    /// full recompute instead of persisting the violation.
    pub async fn mark_read(&self, event_id: &str) {
        let changed = {
            let mut events = self.events.write();
            match events.iter_mut().find(|e| e.id == event_id) {
                Some(event) if !event.read => {
                    event.read = true;
                    true
                }
                _ => false,
            }
        };

        if !changed {
            return;
        }

        let (count, needs_recompute) = {
            let mut state = self.state.write();
            if state.unread_count == 0 {
                (0, true)
            } else {
                state.unread_count -= 1;
                (state.unread_count, false)
            }
        };

        if needs_recompute {
            warn!(event_id, "unread count underflow, forcing recompute");
            self.recompute().await;
        } else {
            self.push_to_surfaces(count).await;
        }
    }

    /// Mark every event as read.
    pub async fn mark_all_read(&self) {
        {
            let mut events = self.events.write();
            for event in events.iter_mut() {
                event.read = true;
            }
        }
        // Bulk operation: recount rather than trusting deltas.
        self.recompute().await;
    }

    /// Recount unread from the event list and push to all surfaces.
    ///
    /// Called after any bulk operation (reconnect after an offline window,
    /// mark-all) so missed or duplicate increments cannot cause drift.
    pub async fn recompute(&self) {
        let count = {
            let events = self.events.read();
            events.iter().filter(|e| !e.read).count() as u64
        };

        {
            let mut state = self.state.write();
            state.unread_count = count;
            state.last_reconciled_at = Utc::now();
        }

        self.push_to_surfaces(count).await;
    }

    /// Snapshot the current badge state.
    pub fn get(&self) -> BadgeState {
        self.state.read().clone()
    }

    /// Snapshot the local notification list for rendering.
    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.read().clone()
    }

    /// Identity deactivation: clear counts and the event list, clear and
    /// unregister all surfaces.
    pub async fn reset(&self) {
        let surfaces: Vec<_> = std::mem::take(&mut *self.surfaces.write());

        self.events.write().clear();
        {
            let mut state = self.state.write();
            state.unread_count = 0;
            state.last_reconciled_at = Utc::now();
        }

        for surface in surfaces {
            if !surface.is_available() {
                continue;
            }
            if let Err(e) = surface.clear().await {
                warn!(surface = surface.name(), error = %e, "failed to clear badge surface");
            }
        }
    }

    /// Push a count to every registered surface, isolating failures.
    async fn push_to_surfaces(&self, count: u64) {
        let surfaces: Vec<_> = self.surfaces.read().clone();

        for surface in surfaces {
            if !surface.is_available() {
                debug!(surface = surface.name(), "badge surface unavailable");
                continue;
            }
            if let Err(e) = surface.set_count(count).await {
                warn!(surface = surface.name(), count, error = %e, "badge surface update failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NotificationKind;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    struct RecordingSurface {
        available: AtomicBool,
        fail: AtomicBool,
        last_count: AtomicU64,
        updates: AtomicU64,
    }

    impl RecordingSurface {
        fn new() -> Self {
            Self {
                available: AtomicBool::new(true),
                fail: AtomicBool::new(false),
                last_count: AtomicU64::new(0),
                updates: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl BadgeSurface for RecordingSurface {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn is_available(&self) -> bool {
            self.available.load(Ordering::SeqCst)
        }

        async fn set_count(&self, count: u64) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(crate::error::Error::surface("platform rejected update"));
            }
            self.last_count.store(count, Ordering::SeqCst);
            self.updates.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn unread(id: &str) -> NotificationEvent {
        NotificationEvent::new(id, NotificationKind::OrderPlaced)
    }

    #[tokio::test]
    async fn test_increment_and_get() {
        let badge = BadgeReconciler::new();
        badge.insert_event(unread("a"));
        badge.increment().await;

        assert_eq!(badge.get().unread_count, 1);
    }

    #[tokio::test]
    async fn test_insert_dedups_by_id() {
        let badge = BadgeReconciler::new();
        assert!(badge.insert_event(unread("a")));
        assert!(!badge.insert_event(unread("a")));
        assert_eq!(badge.events().len(), 1);
    }

    #[tokio::test]
    async fn test_mark_read_decrements_once() {
        let badge = BadgeReconciler::new();
        badge.insert_event(unread("a"));
        badge.increment().await;
        badge.insert_event(unread("b"));
        badge.increment().await;

        badge.mark_read("a").await;
        assert_eq!(badge.get().unread_count, 1);

        // Read only transitions false→true; a second mark is a no-op.
        badge.mark_read("a").await;
        assert_eq!(badge.get().unread_count, 1);

        badge.mark_read("missing").await;
        assert_eq!(badge.get().unread_count, 1);
    }

    #[tokio::test]
    async fn test_recompute_matches_event_list() {
        let badge = BadgeReconciler::new();
        badge.insert_event(unread("a"));
        badge.insert_event(unread("b"));
        badge.insert_event(unread("c"));
        // Deliberately skip increments to simulate drift.

        badge.recompute().await;
        assert_eq!(badge.get().unread_count, 3);

        badge.mark_read("b").await;
        badge.recompute().await;
        assert_eq!(badge.get().unread_count, 2);
    }

    #[tokio::test]
    async fn test_underflow_forces_recompute() {
        let badge = BadgeReconciler::new();
        // Event present but count never incremented: mark_read would drive
        // the count negative.
        badge.insert_event(unread("a"));
        badge.mark_read("a").await;

        assert_eq!(badge.get().unread_count, 0);
    }

    #[tokio::test]
    async fn test_mark_all_read() {
        let badge = BadgeReconciler::new();
        for id in ["a", "b", "c"] {
            badge.insert_event(unread(id));
            badge.increment().await;
        }

        badge.mark_all_read().await;
        assert_eq!(badge.get().unread_count, 0);
        assert!(badge.events().iter().all(|e| e.read));
    }

    #[tokio::test]
    async fn test_surface_pushes_and_failure_isolation() {
        let badge = BadgeReconciler::new();
        let healthy = Arc::new(RecordingSurface::new());
        let failing = Arc::new(RecordingSurface::new());
        failing.fail.store(true, Ordering::SeqCst);

        // Failing surface is registered first; it must not block the other.
        badge.register_surface(Arc::clone(&failing) as Arc<dyn BadgeSurface>);
        badge.register_surface(Arc::clone(&healthy) as Arc<dyn BadgeSurface>);

        badge.insert_event(unread("a"));
        badge.increment().await;
        assert_eq!(healthy.last_count.load(Ordering::SeqCst), 1);

        // Failed surface catches up on the next recompute.
        failing.fail.store(false, Ordering::SeqCst);
        badge.recompute().await;
        assert_eq!(failing.last_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reset_clears_state_and_surfaces() {
        let badge = BadgeReconciler::new();
        let surface = Arc::new(RecordingSurface::new());
        badge.register_surface(Arc::clone(&surface) as Arc<dyn BadgeSurface>);

        badge.insert_event(unread("a"));
        badge.increment().await;

        badge.reset().await;
        assert_eq!(badge.get().unread_count, 0);
        assert!(badge.events().is_empty());
        assert_eq!(surface.last_count.load(Ordering::SeqCst), 0);

        // Surfaces are unregistered: further changes reach nothing.
        let before = surface.updates.load(Ordering::SeqCst);
        badge.increment().await;
        assert_eq!(surface.updates.load(Ordering::SeqCst), before);
    }
}
