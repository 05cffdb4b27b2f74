// ── HTTP / WebSocket server ──
//
// One liveness route and one subscriber endpoint. The upgrade requires
// an opaque bearer credential (header or query param); its presence is
// checked here, its contents are validated by the auth collaborator
// upstream -- never by this service.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tower_http::trace::TraceLayer;

use lanpulse_core::{EventKind, EventPayload, Frame, ProbeKind};
use lanpulse_probe::ProbeRunner;

use crate::error::AgentError;
use crate::registry::SubscriberRegistry;
use crate::router as command_router;

/// Shared handles for request handlers. Cheap to clone.
#[derive(Clone)]
pub struct ServiceState {
    pub registry: Arc<SubscriberRegistry>,
    pub runner: Arc<dyn ProbeRunner>,
}

/// Bound listener plus routes; `serve` runs until the token cancels.
pub struct AgentServer {
    listener: TcpListener,
    router: Router,
}

impl AgentServer {
    pub async fn bind(addr: SocketAddr, state: ServiceState) -> Result<Self, AgentError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| AgentError::Bind { addr, source })?;
        Ok(Self {
            listener,
            router: app(state),
        })
    }

    /// The actual bound address (useful when binding port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, AgentError> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn serve(self, cancel: CancellationToken) -> Result<(), AgentError> {
        info!(addr = %self.listener.local_addr()?, "agent listening");
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await?;
        Ok(())
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Liveness: a fixed success status, no body semantics beyond
/// "reachable".
async fn health() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
) -> Response {
    // Reject credential-less attempts before the upgrade. The token is
    // opaque here; validation belongs to the auth collaborator.
    if bearer_credential(&headers, &query).is_none() {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

fn bearer_credential(headers: &HeaderMap, query: &WsQuery) -> Option<String> {
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        if let Some(token) = value.to_str().ok().and_then(|s| s.strip_prefix("Bearer ")) {
            if !token.is_empty() {
                return Some(token.to_owned());
            }
        }
    }
    query.token.clone().filter(|token| !token.is_empty())
}

/// Per-connection lifecycle: register, pump outbound frames from the
/// subscriber queue, route inbound commands, deregister on any exit.
async fn handle_socket(state: ServiceState, socket: WebSocket) {
    let (id, mut outbound) = state.registry.register();
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Fast first paint: a one-shot latency probe delivered to this
    // subscriber alone, not broadcast.
    {
        let registry = Arc::clone(&state.registry);
        let runner = Arc::clone(&state.runner);
        tokio::spawn(async move {
            let result = runner.run(ProbeKind::Latency).await;
            let payload = EventPayload::new(result);
            if let Ok(frame) = Frame::event(EventKind::LatencyUpdate, &payload) {
                registry.send_to(id, &frame);
            }
        });
    }

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                command_router::handle_message(&state.registry, &state.runner, id, text.as_str());
            }
            Ok(Message::Close(_)) | Err(_) => break,
            // Binary, ping, pong: not part of the protocol, ignored.
            Ok(_) => {}
        }
    }

    // Deregistering drops the outbound sender, which ends the writer.
    state.registry.deregister(id);
    let _ = writer.await;
    debug!(subscriber = id, "connection closed");
}
