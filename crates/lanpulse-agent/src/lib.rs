//! Network telemetry agent.
//!
//! Periodically probes the local network (latency, attached devices)
//! and fans the results out to every connected WebSocket subscriber;
//! a small per-connection command vocabulary triggers on-demand
//! throughput tests and device scans whose replies go only to the
//! requester.

pub mod config;
pub mod error;
pub mod registry;
pub mod router;
pub mod scheduler;
pub mod server;

pub use config::AgentConfig;
pub use error::AgentError;
pub use registry::{SubscriberId, SubscriberRegistry};
pub use scheduler::{ProbeScheduler, SchedulerConfig};
pub use server::{AgentServer, ServiceState};
