// ── Agent configuration ──
//
// Defaults → TOML file → LANPULSE_* environment, merged via figment.
// Everything the core logic needs is carried as plain values so the
// pipeline stays testable without environment coupling.

use std::path::Path;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use lanpulse_probe::ProbeConfig;

use crate::error::AgentError;
use crate::scheduler::SchedulerConfig;

/// Full agent configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    /// TCP port the HTTP/WebSocket server listens on.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Period of the latency broadcast loop.
    #[serde(default = "default_latency_interval")]
    pub latency_interval_secs: u64,

    /// Period of the device-scan broadcast loop.
    #[serde(default = "default_device_scan_interval")]
    pub device_scan_interval_secs: u64,

    /// Wall-clock ceiling for throughput and device-scan commands.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Fixed ping target for the latency probe.
    #[serde(default = "default_ping_target")]
    pub ping_target: String,

    /// Echo requests per latency probe.
    #[serde(default = "default_ping_count")]
    pub ping_count: u32,
}

fn default_listen_port() -> u16 {
    4820
}
fn default_latency_interval() -> u64 {
    5
}
fn default_device_scan_interval() -> u64 {
    300
}
fn default_probe_timeout() -> u64 {
    60
}
fn default_ping_target() -> String {
    "1.1.1.1".into()
}
fn default_ping_count() -> u32 {
    4
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            latency_interval_secs: default_latency_interval(),
            device_scan_interval_secs: default_device_scan_interval(),
            probe_timeout_secs: default_probe_timeout(),
            ping_target: default_ping_target(),
            ping_count: default_ping_count(),
        }
    }
}

impl AgentConfig {
    /// Load configuration: defaults, then the TOML file (if present),
    /// then `LANPULSE_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, AgentError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.unwrap_or_else(|| Path::new("lanpulse.toml"))))
            .merge(Env::prefixed("LANPULSE_"));

        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AgentError> {
        if self.latency_interval_secs == 0 {
            return Err(invalid("latency_interval_secs", "must be non-zero"));
        }
        if self.device_scan_interval_secs == 0 {
            return Err(invalid("device_scan_interval_secs", "must be non-zero"));
        }
        if self.ping_count == 0 {
            return Err(invalid("ping_count", "must be non-zero"));
        }
        if self.ping_target.trim().is_empty() {
            return Err(invalid("ping_target", "must not be empty"));
        }
        Ok(())
    }

    /// Probe tunables derived from this config.
    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            ping_target: self.ping_target.clone(),
            ping_count: self.ping_count,
            command_timeout: Duration::from_secs(self.probe_timeout_secs),
            ..ProbeConfig::default()
        }
    }

    /// Scheduler intervals derived from this config.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            latency_interval: Duration::from_secs(self.latency_interval_secs),
            device_scan_interval: Duration::from_secs(self.device_scan_interval_secs),
        }
    }
}

fn invalid(field: &str, reason: &str) -> AgentError {
    AgentError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}
