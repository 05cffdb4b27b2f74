// ── Inbound command routing ──
//
// Exactly two literal text commands per connection; anything else is
// ignored. Each recognized command spawns its own task so concurrent
// requests from different subscribers never serialize behind each
// other, and the reply goes only to the requester.

use std::sync::Arc;

use tracing::{debug, trace};

use lanpulse_core::{ClientCommand, EventKind, EventPayload, Frame, ProbeKind};
use lanpulse_probe::ProbeRunner;

use crate::registry::{SubscriberId, SubscriberRegistry};

/// Handle one inbound text message from a subscriber.
pub fn handle_message(
    registry: &Arc<SubscriberRegistry>,
    runner: &Arc<dyn ProbeRunner>,
    subscriber: SubscriberId,
    text: &str,
) {
    let Some(command) = ClientCommand::parse(text) else {
        trace!(subscriber, "ignoring unrecognized inbound message");
        return;
    };

    let (kind, event) = match command {
        ClientCommand::ThroughputTest => (ProbeKind::Throughput, EventKind::ThroughputResult),
        ClientCommand::DeviceScan => (ProbeKind::DeviceScan, EventKind::DeviceScanResult),
    };

    let registry = Arc::clone(registry);
    let runner = Arc::clone(runner);

    tokio::spawn(async move {
        debug!(subscriber, probe = %kind, "running on-demand probe");
        let result = runner.run(kind).await;

        // Tagged so the client can tell a command reply from a
        // periodic broadcast of the same kind. Success or Error
        // variant both go back to the requester.
        let payload = EventPayload::on_demand(result);
        match Frame::event(event, &payload) {
            Ok(frame) => {
                if !registry.send_to(subscriber, &frame) {
                    debug!(subscriber, "requester disconnected before reply");
                }
            }
            Err(e) => debug!(error = %e, subscriber, "failed to build reply frame"),
        }
    });
}
