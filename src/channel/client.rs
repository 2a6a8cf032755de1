//! Event channel client.
//!
//! Owns one logical connection to the notification server per active
//! identity. The run loop is the single ordered task for inbound events:
//! the dispatcher (and through it the badge reconciler) is invoked
//! synchronously from it, so no two events for one identity are ever
//! processed concurrently.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::transport::{ChannelConnection, ChannelTransport};
use crate::channel::wire::{self, RegisterHandshake};
use crate::config::ChannelConfig;
use crate::dispatch::DeliveryDispatcher;
use crate::error::Result;
use crate::queue::OfflineQueue;

/// Broadcast capacity for connectivity events.
const CONNECTIVITY_BROADCAST_CAPACITY: usize = 64;

/// Connection state of the channel session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session, or session torn down.
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Live connection with a registered identity.
    Connected,
    /// Connection lost, backoff/retry in progress.
    Reconnecting,
}

/// Snapshot of the active channel session.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelSession {
    /// The authenticated identity this session is scoped to.
    pub identity: String,
    /// Current connection state.
    pub connection_state: ConnectionState,
    /// Monotonic counter distinguishing successive connections.
    ///
    /// Exactly one generation is live at a time; events tagged with a stale
    /// generation are discarded.
    pub socket_generation: u64,
}

/// Raw connectivity transitions, broadcast to UI observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    /// Channel is up for the given generation.
    Up { generation: u64 },
    /// Channel is down; the generation that was live.
    Down { generation: u64 },
}

/// Session state shared between the client handle and the run loop.
struct SharedSession {
    identity: String,
    state: RwLock<ConnectionState>,
    generation: AtomicU64,
}

impl SharedSession {
    fn new(identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            state: RwLock::new(ConnectionState::Connecting),
            generation: AtomicU64::new(0),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }
}

struct ActiveSession {
    shared: Arc<SharedSession>,
    cancel: CancellationToken,
}

/// The event channel client.
pub struct EventChannelClient {
    config: ChannelConfig,
    transport: Arc<dyn ChannelTransport>,
    dispatcher: Arc<DeliveryDispatcher>,
    queue: Arc<OfflineQueue>,
    connectivity_tx: broadcast::Sender<ConnectivityEvent>,
    active: Mutex<Option<ActiveSession>>,
}

impl EventChannelClient {
    /// Create a new channel client wired to the dispatcher and queue.
    pub fn new(
        config: ChannelConfig,
        transport: Arc<dyn ChannelTransport>,
        dispatcher: Arc<DeliveryDispatcher>,
        queue: Arc<OfflineQueue>,
    ) -> Self {
        let (connectivity_tx, _) = broadcast::channel(CONNECTIVITY_BROADCAST_CAPACITY);

        Self {
            config,
            transport,
            dispatcher,
            queue,
            connectivity_tx,
            active: Mutex::new(None),
        }
    }

    /// Subscribe to connectivity transitions.
    pub fn subscribe_connectivity(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.connectivity_tx.subscribe()
    }

    /// Establish a session for the given identity.
    ///
    /// Idempotent if a session for the same identity is already active. A
    /// session for a different identity is replaced.
    pub fn connect(&self, identity: &str) {
        let mut active = self.active.lock();

        if let Some(session) = active.as_ref() {
            if session.shared.identity == identity {
                debug!(identity, "channel session already active");
                return;
            }
            info!(
                old_identity = %session.shared.identity,
                new_identity = identity,
                "replacing active channel session"
            );
            session.cancel.cancel();
        }

        let shared = Arc::new(SharedSession::new(identity));
        let cancel = CancellationToken::new();

        *active = Some(ActiveSession {
            shared: Arc::clone(&shared),
            cancel: cancel.clone(),
        });
        drop(active);

        info!(identity, "starting channel session");

        let config = self.config.clone();
        let transport = Arc::clone(&self.transport);
        let dispatcher = Arc::clone(&self.dispatcher);
        let queue = Arc::clone(&self.queue);
        let connectivity_tx = self.connectivity_tx.clone();

        tokio::spawn(run_channel(
            config,
            transport,
            shared,
            cancel,
            dispatcher,
            queue,
            connectivity_tx,
        ));
    }

    /// Tear down the active session, if any.
    pub fn disconnect(&self) {
        let session = self.active.lock().take();

        if let Some(session) = session {
            info!(identity = %session.shared.identity, "disconnecting channel session");
            session.cancel.cancel();

            let was_connected = session.shared.state() == ConnectionState::Connected;
            session.shared.set_state(ConnectionState::Disconnected);

            if was_connected {
                let _ = self.connectivity_tx.send(ConnectivityEvent::Down {
                    generation: session.shared.generation(),
                });
            }
            self.queue.on_connectivity_down();
        }
    }

    /// Snapshot the active session, if any.
    pub fn session(&self) -> Option<ChannelSession> {
        self.active.lock().as_ref().map(|s| ChannelSession {
            identity: s.shared.identity.clone(),
            connection_state: s.shared.state(),
            socket_generation: s.shared.generation(),
        })
    }
}

/// Run one identity session: connect, register, pump, reconnect.
///
/// Transport errors are never fatal; the loop retries with exponential
/// backoff for as long as the identity stays active.
async fn run_channel(
    config: ChannelConfig,
    transport: Arc<dyn ChannelTransport>,
    shared: Arc<SharedSession>,
    cancel: CancellationToken,
    dispatcher: Arc<DeliveryDispatcher>,
    queue: Arc<OfflineQueue>,
    connectivity_tx: broadcast::Sender<ConnectivityEvent>,
) {
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        shared.set_state(if attempt == 0 {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting
        });

        match transport.connect(&config.server_url).await {
            Ok(mut conn) => {
                let generation = shared.bump_generation();

                // Register the identity before anything else; the server
                // scopes subsequent events to it.
                let handshake = match RegisterHandshake::new(&shared.identity).encode() {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "failed to encode register handshake");
                        break;
                    }
                };

                if let Err(e) = conn.send_text(handshake).await {
                    warn!(error = %e, generation, "register handshake failed");
                } else {
                    shared.set_state(ConnectionState::Connected);
                    attempt = 0;
                    info!(identity = %shared.identity, generation, "channel connected");

                    let _ = connectivity_tx.send(ConnectivityEvent::Up { generation });
                    queue.on_connectivity_up();

                    // Reconnects after an offline window may have missed
                    // events; recount rather than trust the old count.
                    if generation > 1 {
                        dispatcher.on_reconnect().await;
                    }

                    let outcome =
                        pump_events(conn.as_mut(), generation, &shared, &dispatcher, &cancel).await;

                    if cancel.is_cancelled() {
                        break;
                    }

                    shared.set_state(ConnectionState::Reconnecting);
                    let _ = connectivity_tx.send(ConnectivityEvent::Down { generation });
                    queue.on_connectivity_down();

                    match outcome {
                        Ok(()) => info!(generation, "channel closed by server"),
                        Err(e) => warn!(error = %e, generation, "channel transport error"),
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, attempt, "channel connect failed");
            }
        }

        attempt = attempt.saturating_add(1);
        let delay = config.reconnect.delay_for_attempt(attempt - 1);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "channel backoff");

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    shared.set_state(ConnectionState::Disconnected);
    debug!(identity = %shared.identity, "channel session ended");
}

/// Pump inbound frames until the connection ends or the session is
/// cancelled.
///
/// Frames from a superseded generation are discarded, guaranteeing no
/// out-of-order delivery across a reconnect. Malformed frames are logged
/// and dropped per message.
async fn pump_events(
    conn: &mut dyn ChannelConnection,
    generation: u64,
    shared: &SharedSession,
    dispatcher: &DeliveryDispatcher,
    cancel: &CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => return Ok(()),

            frame = conn.next_text() => match frame {
                Ok(Some(text)) => {
                    if shared.generation() != generation {
                        debug!(generation, "discarding frame from stale generation");
                        return Ok(());
                    }

                    match wire::parse_inbound(&text) {
                        Ok(event) => dispatcher.on_event(event).await,
                        Err(e) => warn!(error = %e, "discarding malformed inbound message"),
                    }
                }
                Ok(None) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }
}
