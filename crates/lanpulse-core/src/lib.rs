// lanpulse-core: shared domain model and wire protocol for the telemetry pipeline

pub mod collab;
pub mod error;
pub mod model;
pub mod wire;

pub use error::CoreError;
pub use model::{DeviceRecord, ProbeErrorKind, ProbeKind, ProbeResult};
pub use wire::{ClientCommand, EventKind, EventPayload, Frame};
