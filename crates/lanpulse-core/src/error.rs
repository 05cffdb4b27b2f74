// ── Core error types ──
//
// Shared failure modes for the wire protocol. Probe failures are NOT
// errors at this layer -- they travel as `ProbeResult::Error` data.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An inbound text frame was not a valid `{eventKind, payload}` envelope.
    #[error("malformed frame: {0}")]
    MalformedFrame(#[source] serde_json::Error),

    /// An outbound frame could not be serialized (should not happen for
    /// well-formed payloads; surfaced so callers can log rather than panic).
    #[error("frame encoding failed: {0}")]
    FrameEncoding(#[source] serde_json::Error),
}
