// ── Agent error types ──

use thiserror::Error;

/// Failures that terminate (or prevent) the agent service. Probe
/// failures never appear here -- they travel as result data.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for AgentError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}
