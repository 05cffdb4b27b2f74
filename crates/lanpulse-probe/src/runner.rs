// ── Bounded external-process probes ──
//
// Every invocation runs under a supervising `tokio::time::timeout`
// with `kill_on_drop`, so a hung command cannot stall the scheduler
// loop or any on-demand request. Command lines are fixed per probe
// kind; nothing user-provided reaches the argument list.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use lanpulse_core::{ProbeErrorKind, ProbeKind, ProbeResult};

use crate::parse;

/// Latency reported when the ping command fails or its output matches
/// no known pattern. Latency is polled on a tight interval, so failures
/// are masked with this sentinel rather than surfaced as error events.
pub const FALLBACK_LATENCY_MS: f64 = 999.0;

/// Tunables for the production probe. All fields are constructor
/// parameters so the pipeline stays testable without environment
/// coupling.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Fixed, well-known ping target.
    pub ping_target: String,

    /// Fixed echo-request count per latency probe.
    pub ping_count: u32,

    /// Wall-clock ceiling for the latency probe.
    pub latency_timeout: Duration,

    /// Wall-clock ceiling for throughput and device-scan probes. The
    /// speed test legitimately takes tens of seconds.
    pub command_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            ping_target: "1.1.1.1".into(),
            ping_count: 4,
            latency_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(60),
        }
    }
}

/// Seam between the scheduler/router and the external world. The
/// production implementation is [`ProcessProbe`]; tests substitute
/// scripted fakes.
#[async_trait]
pub trait ProbeRunner: Send + Sync {
    /// Run one probe of the given kind. Never fails out of the
    /// pipeline -- failures come back as `ProbeResult::Error` data
    /// (or the latency fallback).
    async fn run(&self, kind: ProbeKind) -> ProbeResult;
}

/// Production probe backed by external diagnostic commands.
pub struct ProcessProbe {
    config: ProbeConfig,
}

impl ProcessProbe {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    async fn latency(&self) -> ProbeResult {
        let count = self.config.ping_count.to_string();
        let args = ["-c", &count, self.config.ping_target.as_str()];

        match capture("ping", &args, self.config.latency_timeout).await {
            Ok(output) => match parse::ping_average_ms(&output) {
                Some(millis) => ProbeResult::Latency { millis },
                None => {
                    debug!("ping output had no rtt summary, using fallback latency");
                    ProbeResult::Latency { millis: FALLBACK_LATENCY_MS }
                }
            },
            Err(e) => {
                debug!(error = %e, "latency probe failed, using fallback latency");
                ProbeResult::Latency { millis: FALLBACK_LATENCY_MS }
            }
        }
    }

    async fn throughput(&self) -> ProbeResult {
        match capture("speedtest-cli", &["--json"], self.config.command_timeout).await {
            Ok(output) => match parse::speedtest_figures(&output) {
                Some((download_mbps, upload_mbps, ping_millis)) => ProbeResult::Throughput {
                    download_mbps,
                    upload_mbps,
                    ping_millis,
                },
                None => InvokeError::Unparsable { command: "speedtest-cli" }.into_result(),
            },
            Err(e) => e.into_result(),
        }
    }

    async fn device_scan(&self) -> ProbeResult {
        match capture("arp", &["-a"], self.config.command_timeout).await {
            // An empty table is a valid successful scan, not an error.
            Ok(output) => ProbeResult::DeviceScan { devices: parse::neighbor_table(&output) },
            Err(e) => e.into_result(),
        }
    }
}

impl Default for ProcessProbe {
    fn default() -> Self {
        Self::new(ProbeConfig::default())
    }
}

#[async_trait]
impl ProbeRunner for ProcessProbe {
    async fn run(&self, kind: ProbeKind) -> ProbeResult {
        debug!(probe = %kind, "running probe");
        match kind {
            ProbeKind::Latency => self.latency().await,
            ProbeKind::Throughput => self.throughput().await,
            ProbeKind::DeviceScan => self.device_scan().await,
        }
    }
}

// ── Invocation ───────────────────────────────────────────────────────

#[derive(Debug, Error)]
enum InvokeError {
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with {status}: {stderr}")]
    NonZeroExit {
        command: &'static str,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("{command} timed out after {}s", ceiling.as_secs())]
    Timeout {
        command: &'static str,
        ceiling: Duration,
    },

    #[error("{command} produced unparsable output")]
    Unparsable { command: &'static str },
}

impl InvokeError {
    fn kind(&self) -> ProbeErrorKind {
        match self {
            Self::Spawn { .. } => ProbeErrorKind::Spawn,
            Self::NonZeroExit { .. } => ProbeErrorKind::NonZeroExit,
            Self::Timeout { .. } => ProbeErrorKind::Timeout,
            Self::Unparsable { .. } => ProbeErrorKind::UnparsableOutput,
        }
    }

    /// Convert the failure into result data for delivery to the
    /// requester. This is the boundary where probe failures stop being
    /// errors.
    fn into_result(self) -> ProbeResult {
        warn!(error = %self, "probe invocation failed");
        ProbeResult::Error {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Run a command to completion, capturing stdout, bounded by `ceiling`.
/// `kill_on_drop` reaps the child when the timeout wins the race.
async fn capture(
    command: &'static str,
    args: &[&str],
    ceiling: Duration,
) -> Result<String, InvokeError> {
    let mut cmd = Command::new(command);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = tokio::time::timeout(ceiling, cmd.output())
        .await
        .map_err(|_| InvokeError::Timeout { command, ceiling })?
        .map_err(|source| InvokeError::Spawn { command, source })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
        return Err(InvokeError::NonZeroExit {
            command,
            status: output.status,
            stderr,
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn capture_reports_missing_binary_as_spawn() {
        let err = capture("lanpulse-no-such-binary", &[], Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ProbeErrorKind::Spawn);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn capture_reports_non_zero_exit() {
        let err = capture("false", &[], Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(err.kind(), ProbeErrorKind::NonZeroExit);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn capture_enforces_the_supervising_timeout() {
        let err = capture("sleep", &["5"], Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ProbeErrorKind::Timeout);
    }

    #[tokio::test]
    async fn latency_probe_never_surfaces_an_error() {
        // An unresolvable target makes ping fail fast; if ping itself is
        // missing the spawn failure takes the same fallback path.
        let probe = ProcessProbe::new(ProbeConfig {
            ping_target: "host.invalid".into(),
            ping_count: 1,
            latency_timeout: Duration::from_secs(5),
            ..ProbeConfig::default()
        });

        let result = probe.run(ProbeKind::Latency).await;
        assert_eq!(result, ProbeResult::Latency { millis: FALLBACK_LATENCY_MS });
    }

    #[test]
    fn invoke_errors_become_error_results() {
        let result = InvokeError::Unparsable { command: "speedtest-cli" }.into_result();
        match result {
            ProbeResult::Error { kind, message } => {
                assert_eq!(kind, ProbeErrorKind::UnparsableOutput);
                assert!(message.contains("speedtest-cli"));
            }
            other => panic!("expected error result, got {other:?}"),
        }
    }
}
