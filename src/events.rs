//! Notification events.
//!
//! Defines the normalized notification event delivered over the channel and
//! the kind taxonomy used for classification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Static metadata about a supported notification kind.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct NotificationKindInfo {
    /// Canonical wire name (snake_case).
    pub kind: &'static str,
    /// Human-friendly label.
    pub label: &'static str,
    /// Additional accepted wire names (legacy / aliases).
    pub aliases: &'static [&'static str],
}

const NOTIFICATION_KINDS: &[(NotificationKind, NotificationKindInfo)] = &[
    (
        NotificationKind::OrderPlaced,
        NotificationKindInfo {
            kind: "order_placed",
            label: "Order Placed",
            aliases: &["order.placed", "OrderPlaced"],
        },
    ),
    (
        NotificationKind::OrderConfirmed,
        NotificationKindInfo {
            kind: "order_confirmed",
            label: "Order Confirmed",
            aliases: &["order.confirmed", "OrderConfirmed"],
        },
    ),
    (
        NotificationKind::OrderProcessing,
        NotificationKindInfo {
            kind: "order_processing",
            label: "Order Processing",
            aliases: &["order.processing", "OrderProcessing"],
        },
    ),
    (
        NotificationKind::OrderShipped,
        NotificationKindInfo {
            kind: "order_shipped",
            label: "Order Shipped",
            aliases: &["order.shipped", "OrderShipped"],
        },
    ),
    (
        NotificationKind::OrderDelivered,
        NotificationKindInfo {
            kind: "order_delivered",
            label: "Order Delivered",
            aliases: &["order.delivered", "OrderDelivered"],
        },
    ),
    (
        NotificationKind::OrderCancelled,
        NotificationKindInfo {
            kind: "order_cancelled",
            label: "Order Cancelled",
            aliases: &["order.cancelled", "order_canceled", "OrderCancelled"],
        },
    ),
    (
        NotificationKind::StockLow,
        NotificationKindInfo {
            kind: "stock_low",
            label: "Stock Low",
            aliases: &["stock.low", "StockLow"],
        },
    ),
    (
        NotificationKind::StockOut,
        NotificationKindInfo {
            kind: "stock_out",
            label: "Stock Out",
            aliases: &["stock.out", "out_of_stock", "StockOut"],
        },
    ),
    (
        NotificationKind::Generic,
        NotificationKindInfo {
            kind: "generic",
            label: "Notification",
            aliases: &[],
        },
    ),
];

/// Notification kind taxonomy.
///
/// Unrecognized wire kinds map to [`NotificationKind::Generic`] instead of
/// being dropped, so newer server versions can introduce kinds without
/// breaking older clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Order was placed.
    OrderPlaced,
    /// Order was confirmed by the store.
    OrderConfirmed,
    /// Order is being prepared.
    OrderProcessing,
    /// Order was handed to the carrier.
    OrderShipped,
    /// Order was delivered.
    OrderDelivered,
    /// Order was cancelled.
    OrderCancelled,
    /// Product stock is running low.
    StockLow,
    /// Product is out of stock.
    StockOut,
    /// Anything else, including kinds this client does not know yet.
    #[serde(other)]
    Generic,
}

impl Default for NotificationKind {
    fn default() -> Self {
        Self::Generic
    }
}

impl NotificationKind {
    /// Get the canonical wire name.
    pub fn as_str(&self) -> &'static str {
        self.info().kind
    }

    /// Get a human-friendly label.
    pub fn label(&self) -> &'static str {
        self.info().label
    }

    fn info(&self) -> NotificationKindInfo {
        NOTIFICATION_KINDS
            .iter()
            .find(|(k, _)| k == self)
            .map(|(_, info)| *info)
            .expect("every kind has an info entry")
    }

    /// Parse a wire kind, tolerating legacy aliases and casing/separator
    /// variants. Unknown kinds become [`NotificationKind::Generic`].
    pub fn parse(input: &str) -> Self {
        let normalized = normalize_kind_key(input);
        if normalized.is_empty() {
            return Self::Generic;
        }

        for (kind, info) in NOTIFICATION_KINDS {
            if normalize_kind_key(info.kind) == normalized {
                return *kind;
            }
            for alias in info.aliases {
                if normalize_kind_key(alias) == normalized {
                    return *kind;
                }
            }
        }

        Self::Generic
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn normalize_kind_key(input: &str) -> String {
    let lower = input.trim().to_ascii_lowercase();
    let snakeish = lower.replace('.', "_").replace('-', "_").replace(' ', "_");
    snakeish.chars().filter(|c| *c != '_').collect()
}

/// A normalized notification event.
///
/// Created by the server and delivered over the event channel; the only
/// local mutation is the false→true `read` transition. `id` is the sole
/// de-duplication key across redeliveries and reconnects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Opaque server-assigned unique id.
    pub id: String,
    /// Event classification.
    pub kind: NotificationKind,
    /// Short title for display.
    pub title: String,
    /// Body text for display.
    pub body: String,
    /// Server-side creation time.
    pub created_at: DateTime<Utc>,
    /// Whether the user has seen this event.
    pub read: bool,
    /// Opaque key→value payload (e.g. order number).
    #[serde(default)]
    pub payload: Value,
}

impl NotificationEvent {
    /// Create an unread event with the given id and kind.
    pub fn new(id: impl Into<String>, kind: NotificationKind) -> Self {
        Self {
            id: id.into(),
            kind,
            title: String::new(),
            body: String::new(),
            created_at: Utc::now(),
            read: false,
            payload: Value::Null,
        }
    }

    /// Set title and body.
    pub fn with_text(mut self, title: impl Into<String>, body: impl Into<String>) -> Self {
        self.title = title.into();
        self.body = body.into();
        self
    }

    /// Set the payload.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}
