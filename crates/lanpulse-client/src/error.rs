//! Error types for the dashboard client.

use thiserror::Error;

// ── ClientError ──────────────────────────────────────────────────────

/// Errors surfaced by the client transport.
#[derive(Debug, Error)]
pub enum ClientError {
    // ── Endpoint ─────────────────────────────────────────────────────
    /// The endpoint URL is not a valid HTTP URI for the upgrade request.
    #[error("endpoint is not a usable WebSocket URI: {0}")]
    InvalidUri(String),

    // ── Connection ───────────────────────────────────────────────────
    /// The WebSocket handshake or an established connection failed.
    #[error("websocket connection failed: {0}")]
    Connection(String),

    /// An outbound send was attempted while the transport was not open.
    #[error("transport is not open, outbound message dropped")]
    NotOpen,
}
