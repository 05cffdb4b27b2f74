//! lanpulse-client: reconnecting WebSocket transport for dashboards.
//!
//! Connects to a lanpulse agent, decodes the tagged event frames it
//! pushes, and routes them to per-kind callbacks. Reconnects with
//! exponential backoff when the agent goes away and raises a gave-up
//! signal once the attempt cap is exhausted.

pub mod error;
pub mod multiplexer;
pub mod transport;

pub use error::ClientError;
pub use multiplexer::{BindingId, EventMultiplexer};
pub use transport::{ConnectionState, ReconnectConfig, Transport, TransportConfig};
