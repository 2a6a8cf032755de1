//! Delivery dispatcher.
//!
//! Consumes normalized events from the channel client, suppresses
//! redelivered duplicates, records new unreads with the badge reconciler,
//! and walks the alert fallback chain.

mod alerts;

pub use alerts::{
    AlertChain, AlertMechanism, AlertPresenter, AlertStyle, NativeBadgeAlert, StickyAlert,
    TransientAlert,
};

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::badge::BadgeReconciler;
use crate::config::DispatchConfig;
use crate::events::NotificationEvent;

/// Bounded recently-seen id set.
///
/// The channel delivers at-least-once; this suppresses redeliveries without
/// growing unboundedly. Eviction is FIFO over the insertion order.
struct SeenIds {
    order: VecDeque<String>,
    set: HashSet<String>,
    capacity: usize,
}

impl SeenIds {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            set: HashSet::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Record an id; returns false if it was already present.
    fn insert(&mut self, id: &str) -> bool {
        if self.set.contains(id) {
            return false;
        }

        if self.order.len() == self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.set.remove(&evicted);
            }
        }

        self.order.push_back(id.to_string());
        self.set.insert(id.to_string());
        true
    }
}

/// The delivery dispatcher.
pub struct DeliveryDispatcher {
    badge: Arc<BadgeReconciler>,
    chain: AlertChain,
    seen: Mutex<SeenIds>,
}

impl DeliveryDispatcher {
    /// Create a dispatcher over the given reconciler and alert chain.
    pub fn new(badge: Arc<BadgeReconciler>, chain: AlertChain, config: DispatchConfig) -> Self {
        Self {
            badge,
            chain,
            seen: Mutex::new(SeenIds::new(config.seen_capacity)),
        }
    }

    /// Consume one event.
    ///
    /// Idempotent with respect to `id`: processing the same id twice neither
    /// double-alerts nor double-counts. Never returns an error; failures
    /// degrade to "notification didn't show".
    pub async fn on_event(&self, event: NotificationEvent) {
        if !self.seen.lock().insert(&event.id) {
            debug!(id = %event.id, "duplicate notification suppressed");
            return;
        }

        // The reconciler dedups by id as well, covering redeliveries that
        // outlive the bounded seen set.
        let novel = self.badge.insert_event(event.clone());
        if !novel {
            return;
        }

        if !event.read {
            self.badge.increment().await;
        }

        if !self.chain.deliver(&event).await {
            warn!(id = %event.id, kind = %event.kind, "no alert mechanism delivered");
        }
    }

    /// The channel reconnected after an offline window.
    ///
    /// Events may have been missed while offline, so the unread count is
    /// recounted from the event list instead of trusting prior increments.
    pub async fn on_reconnect(&self) {
        self.badge.recompute().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::events::NotificationKind;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingMechanism {
        attempts: AtomicU64,
    }

    #[async_trait]
    impl AlertMechanism for CountingMechanism {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn probe(&self) -> bool {
            true
        }

        async fn attempt(&self, _event: &NotificationEvent) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn dispatcher_with_counter() -> (DeliveryDispatcher, Arc<CountingMechanism>) {
        let badge = Arc::new(BadgeReconciler::new());
        let mechanism = Arc::new(CountingMechanism {
            attempts: AtomicU64::new(0),
        });
        let mut chain = AlertChain::new();
        chain.push(Arc::clone(&mechanism) as Arc<dyn AlertMechanism>);

        (
            DeliveryDispatcher::new(badge, chain, DispatchConfig::default()),
            mechanism,
        )
    }

    fn placed(id: &str) -> NotificationEvent {
        NotificationEvent::new(id, NotificationKind::OrderPlaced)
    }

    #[tokio::test]
    async fn test_duplicate_ids_suppressed() {
        let (dispatcher, mechanism) = dispatcher_with_counter();

        // Redelivery scenario: ids ["a", "b", "a", "c"].
        for id in ["a", "b", "a", "c"] {
            dispatcher.on_event(placed(id)).await;
        }

        assert_eq!(mechanism.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(dispatcher.badge.get().unread_count, 3);
        assert_eq!(dispatcher.badge.events().len(), 3);
    }

    #[tokio::test]
    async fn test_idempotent_back_to_back() {
        let (dispatcher, mechanism) = dispatcher_with_counter();

        dispatcher.on_event(placed("a")).await;
        let state_once = dispatcher.badge.get().unread_count;
        dispatcher.on_event(placed("a")).await;

        assert_eq!(dispatcher.badge.get().unread_count, state_once);
        assert_eq!(mechanism.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_already_read_events_do_not_count() {
        let (dispatcher, mechanism) = dispatcher_with_counter();

        let mut event = placed("a");
        event.read = true;
        dispatcher.on_event(event).await;

        assert_eq!(dispatcher.badge.get().unread_count, 0);
        assert_eq!(dispatcher.badge.events().len(), 1);
        assert_eq!(mechanism.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_seen_eviction_still_guarded_by_badge_dedup() {
        let badge = Arc::new(BadgeReconciler::new());
        let dispatcher = DeliveryDispatcher::new(
            Arc::clone(&badge),
            AlertChain::new(),
            DispatchConfig {
                seen_capacity: 2,
                ..Default::default()
            },
        );

        // "a" is evicted from the bounded seen set by "b" and "c"...
        for id in ["a", "b", "c"] {
            dispatcher.on_event(placed(id)).await;
        }
        // ...but the reconciler still knows it.
        dispatcher.on_event(placed("a")).await;

        assert_eq!(badge.get().unread_count, 3);
    }

    #[test]
    fn test_seen_ids_bounded() {
        let mut seen = SeenIds::new(2);
        assert!(seen.insert("a"));
        assert!(seen.insert("b"));
        assert!(!seen.insert("a"));

        assert!(seen.insert("c")); // evicts "a"
        assert!(seen.insert("a"));
        assert_eq!(seen.order.len(), 2);
        assert_eq!(seen.set.len(), 2);
    }

    proptest! {
        /// The seen set never exceeds its capacity and stays consistent with
        /// its eviction order.
        #[test]
        fn seen_ids_invariants(ids in proptest::collection::vec("[a-e]", 0..64), cap in 1usize..8) {
            let mut seen = SeenIds::new(cap);
            for id in &ids {
                seen.insert(id);
            }
            prop_assert!(seen.order.len() <= cap);
            prop_assert_eq!(seen.order.len(), seen.set.len());
            for id in &seen.order {
                prop_assert!(seen.set.contains(id));
            }
        }
    }
}
