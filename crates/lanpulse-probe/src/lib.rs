//! External diagnostic probes for the lanpulse telemetry pipeline.
//!
//! Each probe is one bounded invocation of a fixed external command
//! (`ping`, `speedtest-cli`, `arp`) whose textual output is folded into
//! a structured [`ProbeResult`](lanpulse_core::ProbeResult) by pattern
//! extraction. Output formats vary by platform and are not part of this
//! service's control surface, so parsing is deliberately tolerant:
//! extract what matches, drop what doesn't, never parse positionally.
//!
//! Probe failures are data, not errors -- nothing in this crate
//! propagates a failure out of the pipeline.

pub mod parse;
mod runner;

pub use runner::{ProbeConfig, ProbeRunner, ProcessProbe, FALLBACK_LATENCY_MS};
