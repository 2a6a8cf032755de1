//! Channel transport abstraction.
//!
//! The client talks to the notification server through [`ChannelTransport`],
//! so tests can script connections while production uses the WebSocket
//! implementation below. Transport security is the connection library's
//! concern (`wss://` URLs).

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
};

use crate::error::{Error, Result};

/// Factory for channel connections.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Open a new connection to the notification server.
    async fn connect(&self, url: &str) -> Result<Box<dyn ChannelConnection>>;
}

/// One live bidirectional connection.
#[async_trait]
pub trait ChannelConnection: Send {
    /// Send a text frame.
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Receive the next text frame.
    ///
    /// Returns `Ok(None)` when the server closes the connection cleanly;
    /// transport errors are retried by the caller.
    async fn next_text(&mut self) -> Result<Option<String>>;
}

/// WebSocket transport backed by `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketTransport;

#[async_trait]
impl ChannelTransport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn ChannelConnection>> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| Error::channel(format!("WebSocket connect failed: {}", e)))?;
        Ok(Box::new(WebSocketConnection { ws }))
    }
}

struct WebSocketConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl ChannelConnection for WebSocketConnection {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.ws
            .send(Message::Text(text))
            .await
            .map_err(|e| Error::channel(format!("WebSocket send failed: {}", e)))
    }

    async fn next_text(&mut self) -> Result<Option<String>> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                // Control and binary frames are not part of the event stream.
                Some(Ok(Message::Ping(_)))
                | Some(Ok(Message::Pong(_)))
                | Some(Ok(Message::Binary(_)))
                | Some(Ok(Message::Frame(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Err(e)) => {
                    return Err(Error::channel(format!("WebSocket receive failed: {}", e)));
                }
            }
        }
    }
}
