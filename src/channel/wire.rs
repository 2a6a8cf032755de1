//! Wire shapes for the event channel.
//!
//! Inbound events are accepted in two shapes: the current flat shape and a
//! legacy shape nesting the same fields one level deeper under a
//! `notification` key. Both normalize to [`NotificationEvent`] here, so the
//! rest of the agent never sees the difference. The legacy shape has no
//! documented deprecation point and is accepted indefinitely.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::events::{NotificationEvent, NotificationKind};

/// Registration handshake sent once per connection (and each reconnect).
///
/// The server scopes subsequent events to this identity.
#[derive(Debug, Serialize)]
pub struct RegisterHandshake<'a> {
    #[serde(rename = "type")]
    msg_type: &'static str,
    identity: &'a str,
}

impl<'a> RegisterHandshake<'a> {
    /// Create a handshake for the given identity.
    pub fn new(identity: &'a str) -> Self {
        Self {
            msg_type: "register",
            identity,
        }
    }

    /// Encode to a text frame.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Outbound drained-action submission.
///
/// `id` is the idempotency key: the server must treat a resubmission with a
/// known id as a duplicate, not a second action.
#[derive(Debug, Serialize)]
pub struct ActionSubmission<'a> {
    /// Locally-generated stable action id.
    pub id: &'a str,
    /// Action kind (e.g. `submit_order`).
    pub kind: &'a str,
    /// Opaque action payload.
    pub payload: &'a Value,
}

/// Raw inbound event fields shared by both wire shapes.
#[derive(Debug, Deserialize)]
struct RawEvent {
    id: String,
    #[serde(default)]
    kind: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: String,
    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,
    #[serde(default)]
    read: bool,
    #[serde(default)]
    payload: Value,
}

/// The two accepted inbound shapes.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InboundShape {
    /// Legacy shape: fields nested under a `notification` key.
    Legacy { notification: RawEvent },
    /// Current flat shape.
    Flat(RawEvent),
}

/// Parse and normalize one inbound text frame.
///
/// Returns a protocol error for frames that match neither shape or carry an
/// empty id; callers log and discard per message without touching session
/// state.
pub fn parse_inbound(text: &str) -> Result<NotificationEvent> {
    let shape: InboundShape = serde_json::from_str(text)
        .map_err(|e| Error::protocol(format!("unrecognized inbound shape: {}", e)))?;

    let raw = match shape {
        InboundShape::Legacy { notification } => notification,
        InboundShape::Flat(raw) => raw,
    };

    if raw.id.trim().is_empty() {
        return Err(Error::protocol("inbound event has empty id"));
    }

    Ok(NotificationEvent {
        id: raw.id,
        kind: NotificationKind::parse(&raw.kind),
        title: raw.title,
        body: raw.body,
        created_at: raw.created_at,
        read: raw.read,
        payload: raw.payload,
    })
}
