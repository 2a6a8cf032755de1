//! Event channel: persistent connection, identity registration, wire
//! normalization, reconnect with backoff.

mod client;
mod transport;
pub mod wire;

pub use client::{ChannelSession, ConnectionState, ConnectivityEvent, EventChannelClient};
pub use transport::{ChannelConnection, ChannelTransport, WebSocketTransport};
