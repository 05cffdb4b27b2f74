//! Reconnecting WebSocket transport for dashboard clients.
//!
//! Maintains a single connection to the telemetry agent and feeds every
//! decoded frame through the [`EventMultiplexer`]. When the connection
//! drops, reconnects with exponential backoff up to a fixed attempt cap,
//! then raises a one-shot gave-up signal so the UI can tell the user the
//! agent is unreachable.
//!
//! # Example
//!
//! ```rust,ignore
//! use lanpulse_client::{Transport, TransportConfig};
//! use url::Url;
//!
//! let transport = Transport::new(TransportConfig {
//!     url: Url::parse("ws://192.168.1.10:4820/ws")?,
//!     bearer_token: Some("secret".into()),
//!     reconnect: Default::default(),
//! });
//!
//! transport.on("latency-update", |payload| {
//!     println!("latency: {}", payload["millis"]);
//! });
//! transport.connect();
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_util::sync::CancellationToken;
use url::Url;

use lanpulse_core::Frame;

use crate::error::ClientError;
use crate::multiplexer::{BindingId, EventMultiplexer};

// ── ConnectionState ──────────────────────────────────────────────────

/// Observable lifecycle of the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and none being attempted.
    Disconnected,

    /// A handshake is in flight.
    Connecting,

    /// Connected; frames flow and [`Transport::send`] is accepted.
    Open,

    /// Waiting out the backoff before reconnection attempt `attempt`
    /// (1-based).
    Reconnecting { attempt: u32 },
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Backoff policy for reconnection.
///
/// The wait before attempt `n` is `base_delay * 2^(n-1)`; after
/// `max_attempts` consecutive failures the transport gives up.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub base_delay: Duration,

    /// Consecutive failed attempts tolerated before giving up. Default: 5.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_attempts: 5,
        }
    }
}

/// Backoff before reconnection attempt `attempt` (1-based).
fn backoff_delay(attempt: u32, base: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor)
}

// ── TransportConfig ──────────────────────────────────────────────────

/// Connection settings for [`Transport::new`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Full WebSocket endpoint, e.g. `ws://192.168.1.10:4820/ws`.
    pub url: Url,

    /// Credential injected as an `Authorization: Bearer` header on the
    /// upgrade request.
    pub bearer_token: Option<String>,

    /// Backoff policy.
    pub reconnect: ReconnectConfig,
}

// ── Transport ────────────────────────────────────────────────────────

/// One live connection attempt cycle, torn down by `disconnect`.
struct Session {
    generation: u64,
    cancel: CancellationToken,
    /// Sender for the current connection's outbound queue. `None` until
    /// a handshake succeeds; replaced wholesale on every reconnect, so
    /// a message accepted while a connection is dying dies with it
    /// instead of being replayed on the next one.
    outbound: Option<mpsc::UnboundedSender<String>>,
}

struct SessionSlot {
    next_generation: u64,
    active: Option<Session>,
}

struct TransportInner {
    config: TransportConfig,
    multiplexer: EventMultiplexer,
    state_tx: watch::Sender<ConnectionState>,
    gave_up_tx: watch::Sender<bool>,
    session: Mutex<SessionSlot>,
}

/// Handle to the reconnecting transport. Cheap to clone.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

impl Transport {
    pub fn new(config: TransportConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (gave_up_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(TransportInner {
                config,
                multiplexer: EventMultiplexer::new(),
                state_tx,
                gave_up_tx,
                session: Mutex::new(SessionSlot {
                    next_generation: 0,
                    active: None,
                }),
            }),
        }
    }

    // ── Event bindings ───────────────────────────────────────────────

    /// Bind a callback to an event kind. See [`EventMultiplexer::on`].
    pub fn on(&self, kind: &str, callback: impl Fn(&Value) + Send + Sync + 'static) -> BindingId {
        self.inner.multiplexer.on(kind, callback)
    }

    /// Remove a binding. See [`EventMultiplexer::off`].
    pub fn off(&self, kind: &str, id: BindingId) {
        self.inner.multiplexer.off(kind, id);
    }

    pub fn multiplexer(&self) -> &EventMultiplexer {
        &self.inner.multiplexer
    }

    // ── Observation ──────────────────────────────────────────────────

    /// Watch the connection state. The receiver always holds the latest
    /// state; await `changed()` to follow transitions.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn current_state(&self) -> ConnectionState {
        self.inner.state_tx.borrow().clone()
    }

    /// Watch the gave-up signal. Flips to `true` exactly once per
    /// [`connect`](Self::connect) cycle, after the reconnection attempt
    /// cap is exhausted.
    pub fn gave_up(&self) -> watch::Receiver<bool> {
        self.inner.gave_up_tx.subscribe()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Start connecting. No-op if a connection cycle is already running.
    pub fn connect(&self) {
        let mut slot = self.inner.session.lock().expect("session mutex poisoned");
        if slot.active.is_some() {
            tracing::debug!("connect() ignored, transport already running");
            return;
        }

        let generation = slot.next_generation;
        slot.next_generation += 1;

        let cancel = CancellationToken::new();
        slot.active = Some(Session {
            generation,
            cancel: cancel.clone(),
            outbound: None,
        });
        drop(slot);

        self.inner.gave_up_tx.send_replace(false);
        self.inner.state_tx.send_replace(ConnectionState::Connecting);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            run_loop(&inner, &cancel, generation).await;
        });
    }

    /// Tear down the connection and cancel any pending reconnection
    /// timer. Safe to call from any state.
    pub fn disconnect(&self) {
        let session = {
            let mut slot = self.inner.session.lock().expect("session mutex poisoned");
            slot.active.take()
        };
        if let Some(session) = session {
            session.cancel.cancel();
        }
        self.inner
            .state_tx
            .send_replace(ConnectionState::Disconnected);
    }

    /// Send a raw text message to the agent.
    ///
    /// Rejected (not queued) unless the transport is currently
    /// [`ConnectionState::Open`].
    pub fn send(&self, text: impl Into<String>) -> Result<(), ClientError> {
        if *self.inner.state_tx.borrow() != ConnectionState::Open {
            tracing::warn!("send() while transport not open, message dropped");
            return Err(ClientError::NotOpen);
        }
        let slot = self.inner.session.lock().expect("session mutex poisoned");
        match slot.active.as_ref().and_then(|s| s.outbound.as_ref()) {
            // A closed channel means the connection died under us even
            // though the state watch has not flipped yet; the message
            // is rejected, never held for the next connection.
            Some(tx) => tx.send(text.into()).map_err(|_| ClientError::NotOpen),
            None => Err(ClientError::NotOpen),
        }
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: connect → read until drop → backoff → reconnect, giving
/// up after the configured attempt cap.
async fn run_loop(inner: &Arc<TransportInner>, cancel: &CancellationToken, generation: u64) {
    let reconnect = inner.config.reconnect.clone();
    let mut attempt: u32 = 0;

    loop {
        inner.state_tx.send_replace(ConnectionState::Connecting);

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = connect_and_read(inner, cancel, &mut attempt, generation) => result,
        };

        match result {
            Ok(()) => {
                tracing::info!("connection closed by peer, reconnecting");
            }
            Err(e) => {
                tracing::warn!(error = %e, attempt, "connection failed");
            }
        }

        attempt += 1;
        if attempt > reconnect.max_attempts {
            tracing::error!(
                max_attempts = reconnect.max_attempts,
                "reconnection attempt cap reached, giving up"
            );
            inner.state_tx.send_replace(ConnectionState::Reconnecting {
                attempt: reconnect.max_attempts,
            });
            inner.gave_up_tx.send_replace(true);
            break;
        }

        inner
            .state_tx
            .send_replace(ConnectionState::Reconnecting { attempt });

        let delay = backoff_delay(attempt, reconnect.base_delay);
        tracing::info!(delay_ms = delay.as_millis() as u64, attempt, "waiting before reconnect");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    // Free the slot so connect() works again, unless a newer session
    // already took it over.
    let mut slot = inner.session.lock().expect("session mutex poisoned");
    let superseded = slot
        .active
        .as_ref()
        .is_some_and(|s| s.generation != generation);
    if !superseded {
        slot.active = None;
        // A teardown racing a connect failure could otherwise leave the
        // watch stuck at Reconnecting.
        if cancel.is_cancelled() {
            inner.state_tx.send_replace(ConnectionState::Disconnected);
        }
    }
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Establish one WebSocket connection, then pump inbound frames into
/// the multiplexer and outbound messages onto the wire until the
/// connection drops.
///
/// The outbound queue lives and dies with this call: its receiver is
/// local, so anything still queued when the connection ends is dropped,
/// never carried over to the next attempt.
async fn connect_and_read(
    inner: &Arc<TransportInner>,
    cancel: &CancellationToken,
    attempt: &mut u32,
    generation: u64,
) -> Result<(), ClientError> {
    let url = &inner.config.url;
    tracing::info!(url = %url, "connecting");

    let uri: tungstenite::http::Uri = url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| ClientError::InvalidUri(e.to_string()))?;

    let mut request = ClientRequestBuilder::new(uri);
    if let Some(token) = inner.config.bearer_token.as_deref() {
        request = request.with_header("Authorization", format!("Bearer {token}"));
    }

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| ClientError::Connection(e.to_string()))?;

    tracing::info!("connected");

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    {
        let mut slot = inner.session.lock().expect("session mutex poisoned");
        match slot.active.as_mut() {
            Some(session) if session.generation == generation => {
                session.outbound = Some(outbound_tx);
            }
            // disconnect() won the race against the handshake.
            _ => return Ok(()),
        }
    }

    *attempt = 0;
    inner.state_tx.send_replace(ConnectionState::Open);

    let (mut sink, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = sink.send(tungstenite::Message::Close(None)).await;
                return Ok(());
            }
            outbound = outbound_rx.recv() => {
                let Some(text) = outbound else { return Ok(()) };
                sink.send(tungstenite::Message::Text(text.into()))
                    .await
                    .map_err(|e| ClientError::Connection(e.to_string()))?;
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        dispatch_frame(inner, text.as_str());
                    }
                    Some(Ok(tungstenite::Message::Close(_))) | None => {
                        tracing::info!("close frame received");
                        return Ok(());
                    }
                    Some(Err(e)) => {
                        return Err(ClientError::Connection(e.to_string()));
                    }
                    // Ping/Pong/Binary/Frame -- ignore
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

/// Decode one text frame and hand it to the multiplexer. Malformed
/// frames are logged and dropped without tearing down the connection.
fn dispatch_frame(inner: &Arc<TransportInner>, text: &str) {
    match Frame::decode(text) {
        Ok(frame) => {
            inner.multiplexer.dispatch(&frame.event_kind, &frame.payload);
        }
        Err(e) => {
            tracing::debug!(error = %e, "dropping undecodable frame");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn default_reconnect_config() {
        let config = ReconnectConfig::default();
        assert_eq!(config.base_delay, Duration::from_secs(1));
        assert_eq!(config.max_attempts, 5);
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = Duration::from_secs(1);
        assert_eq!(backoff_delay(1, base), Duration::from_secs(1));
        assert_eq!(backoff_delay(2, base), Duration::from_secs(2));
        assert_eq!(backoff_delay(3, base), Duration::from_secs(4));
        assert_eq!(backoff_delay(4, base), Duration::from_secs(8));
        assert_eq!(backoff_delay(5, base), Duration::from_secs(16));
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        let delay = backoff_delay(u32::MAX, Duration::from_secs(1));
        assert!(delay >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn transport_starts_disconnected() {
        let transport = Transport::new(TransportConfig {
            url: Url::parse("ws://127.0.0.1:1/ws").unwrap(),
            bearer_token: None,
            reconnect: ReconnectConfig::default(),
        });
        assert_eq!(transport.current_state(), ConnectionState::Disconnected);
        assert!(!*transport.gave_up().borrow());
    }

    #[tokio::test]
    async fn send_while_not_open_is_rejected() {
        let transport = Transport::new(TransportConfig {
            url: Url::parse("ws://127.0.0.1:1/ws").unwrap(),
            bearer_token: None,
            reconnect: ReconnectConfig::default(),
        });
        let err = transport.send("throughput-test").unwrap_err();
        assert!(matches!(err, ClientError::NotOpen));
    }

    #[tokio::test]
    async fn send_into_a_dying_connection_is_rejected_not_buffered() {
        let transport = Transport::new(TransportConfig {
            url: Url::parse("ws://127.0.0.1:1/ws").unwrap(),
            bearer_token: None,
            reconnect: ReconnectConfig::default(),
        });

        // The window where the connection has died but the state watch
        // still reads Open: the session holds a sender whose receiver
        // went down with the connection.
        {
            let mut slot = transport.inner.session.lock().unwrap();
            let (tx, rx) = mpsc::unbounded_channel::<String>();
            drop(rx);
            slot.active = Some(Session {
                generation: 0,
                cancel: CancellationToken::new(),
                outbound: Some(tx),
            });
        }
        transport.inner.state_tx.send_replace(ConnectionState::Open);

        // The message must be refused outright, not queued for replay
        // on the next connection.
        let err = transport.send("device-scan").unwrap_err();
        assert!(matches!(err, ClientError::NotOpen));
    }
}
