// ── Wire protocol ──
//
// JSON text frames: `{"eventKind": "...", "payload": {...}}`.
// Inbound commands are plain text tokens, not JSON -- kept as-is for
// compatibility with existing dashboard clients, but isolated behind
// `ClientCommand` so a typed transport could replace the raw-string
// dispatch without touching probe logic.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::ProbeResult;

/// Event categories produced by the telemetry pipeline.
///
/// The transport performs no filtering by kind; unknown kinds travel
/// through the client multiplexer untouched and no-op when nobody is
/// registered for them.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum EventKind {
    LatencyUpdate,
    ThroughputResult,
    DeviceScanResult,
}

/// The literal inbound command requesting an on-demand throughput test.
pub const THROUGHPUT_TEST_TOKEN: &str = "throughput-test";

/// The literal inbound command requesting an on-demand device scan.
pub const DEVICE_SCAN_TOKEN: &str = "device-scan";

/// The two inbound commands a connection may issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCommand {
    ThroughputTest,
    DeviceScan,
}

impl ClientCommand {
    /// Parse an inbound text message. Matching is exact and
    /// case-sensitive; anything unrecognized yields `None` and is
    /// ignored by the router (not an error).
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            THROUGHPUT_TEST_TOKEN => Some(Self::ThroughputTest),
            DEVICE_SCAN_TOKEN => Some(Self::DeviceScan),
            _ => None,
        }
    }
}

/// Payload envelope carried inside every frame.
///
/// The timestamp is server-assigned at emission, not at probe start.
/// `on_demand` marks command replies so clients can distinguish them
/// from periodic broadcasts of the same kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    /// Unix epoch milliseconds, assigned when the event is emitted.
    pub timestamp: i64,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub on_demand: bool,

    #[serde(flatten)]
    pub result: ProbeResult,
}

impl EventPayload {
    /// Wrap a probe result, stamping the current time.
    pub fn new(result: ProbeResult) -> Self {
        Self {
            timestamp: Utc::now().timestamp_millis(),
            on_demand: false,
            result,
        }
    }

    /// Wrap a probe result as an on-demand command reply.
    pub fn on_demand(result: ProbeResult) -> Self {
        Self {
            timestamp: Utc::now().timestamp_millis(),
            on_demand: true,
            result,
        }
    }
}

/// One `{eventKind, payload}` text frame.
///
/// `event_kind` is a plain string on the wire: clients must hand
/// unknown kinds to their multiplexer rather than reject them, so the
/// decoded form cannot be a closed enum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    pub event_kind: String,
    pub payload: serde_json::Value,
}

impl Frame {
    /// Build a frame from a known event kind and payload envelope.
    pub fn event(kind: EventKind, payload: &EventPayload) -> Result<Self, CoreError> {
        Ok(Self {
            event_kind: kind.to_string(),
            payload: serde_json::to_value(payload).map_err(CoreError::FrameEncoding)?,
        })
    }

    /// Serialize to the JSON text form sent over the socket.
    pub fn encode(&self) -> Result<String, CoreError> {
        serde_json::to_string(self).map_err(CoreError::FrameEncoding)
    }

    /// Decode an inbound text frame. Malformed input is an error the
    /// caller drops silently (logged, never fatal to the connection).
    pub fn decode(text: &str) -> Result<Self, CoreError> {
        serde_json::from_str(text).map_err(CoreError::MalformedFrame)
    }
}
