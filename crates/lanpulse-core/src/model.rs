// ── Domain model for probe results ──
//
// One `ProbeResult` per probe invocation, tagged by kind. Results are
// immutable once produced; the emission timestamp lives in the frame
// envelope (`wire::EventPayload`), not here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which external diagnostic command a probe invocation runs.
///
/// Commands are fixed per kind -- callers never construct command lines,
/// which keeps the command-injection surface closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ProbeKind {
    Latency,
    Throughput,
    DeviceScan,
}

/// Classification of a failed probe invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ProbeErrorKind {
    /// The command could not be spawned (missing binary, permissions).
    Spawn,
    /// The command exited with a non-zero status.
    NonZeroExit,
    /// The command exceeded the supervising timeout.
    Timeout,
    /// The command succeeded but its output matched no known pattern.
    UnparsableOutput,
}

/// The outcome of a single probe invocation.
///
/// Exactly one variant per result. Latency failures never produce the
/// `Error` variant -- the probe substitutes a fallback value instead,
/// because latency is polled on a tight interval and a failing gateway
/// must not cascade into subscriber-facing error events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ProbeResult {
    Latency {
        millis: f64,
    },
    #[serde(rename_all = "camelCase")]
    Throughput {
        download_mbps: f64,
        upload_mbps: f64,
        ping_millis: f64,
    },
    DeviceScan {
        devices: Vec<DeviceRecord>,
    },
    Error {
        kind: ProbeErrorKind,
        message: String,
    },
}

impl ProbeResult {
    /// Returns `true` for the `Error` variant.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// One host observed in a device scan.
///
/// Uniqueness key is `(ip_address, mac_address)`. Records are created
/// fresh on every scan cycle; there is no cross-cycle merging -- each
/// scan's result set fully replaces the previous broadcast payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub ip_address: String,
    pub mac_address: String,
    /// Resolved hostname, empty when the neighbor table had none.
    #[serde(default)]
    pub hostname: String,
    pub observed_at: DateTime<Utc>,
}

impl DeviceRecord {
    /// The `(ip, mac)` dedup key.
    pub fn key(&self) -> (&str, &str) {
        (&self.ip_address, &self.mac_address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn probe_result_latency_wire_shape() {
        let result = ProbeResult::Latency { millis: 23.4 };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "latency", "millis": 23.4 }));
    }

    #[test]
    fn probe_result_throughput_uses_camel_case_fields() {
        let result = ProbeResult::Throughput {
            download_mbps: 94.2,
            upload_mbps: 11.7,
            ping_millis: 18.0,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "throughput",
                "downloadMbps": 94.2,
                "uploadMbps": 11.7,
                "pingMillis": 18.0,
            })
        );
    }

    #[test]
    fn probe_result_error_round_trips() {
        let result = ProbeResult::Error {
            kind: ProbeErrorKind::Timeout,
            message: "speedtest-cli did not finish".into(),
        };
        let json = serde_json::to_string(&result).unwrap();
        let back: ProbeResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
        assert!(back.is_error());
    }

    #[test]
    fn device_record_serializes_camel_case() {
        let record = DeviceRecord {
            ip_address: "192.168.1.42".into(),
            mac_address: "aa:bb:cc:dd:ee:ff".into(),
            hostname: "printer".into(),
            observed_at: Utc::now(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["ipAddress"], "192.168.1.42");
        assert_eq!(json["macAddress"], "aa:bb:cc:dd:ee:ff");
        assert_eq!(json["hostname"], "printer");
    }
}
