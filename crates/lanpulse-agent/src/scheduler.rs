// ── Probe scheduler ──
//
// Two independent periodic loops (latency, device scan) owned by the
// service instance and cancelled through a shared token. Throughput is
// never scheduled here -- it runs only on demand via the command
// router. Loops are separate tasks: a slow probe delays only its own
// next tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use lanpulse_core::collab::{AccountId, StatSample, TelemetryStore};
use lanpulse_core::{EventKind, EventPayload, Frame, ProbeKind, ProbeResult};
use lanpulse_probe::ProbeRunner;

use crate::registry::SubscriberRegistry;

/// Loop periods. Constructor parameters so tests can run fast ticks
/// deterministically instead of sleeping wall-clock intervals.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub latency_interval: Duration,
    pub device_scan_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            latency_interval: Duration::from_secs(5),
            device_scan_interval: Duration::from_secs(300),
        }
    }
}

/// Optional storage collaborator plus the account its data belongs to.
pub type StoreHandle = (Arc<dyn TelemetryStore>, AccountId);

/// Runs the periodic probe loops and hands results to the registry.
pub struct ProbeScheduler {
    config: SchedulerConfig,
    registry: Arc<SubscriberRegistry>,
    runner: Arc<dyn ProbeRunner>,
    store: Option<Arc<StoreHandle>>,
    cancel: CancellationToken,
}

impl ProbeScheduler {
    pub fn new(
        config: SchedulerConfig,
        registry: Arc<SubscriberRegistry>,
        runner: Arc<dyn ProbeRunner>,
        store: Option<StoreHandle>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            registry,
            runner,
            store: store.map(Arc::new),
            cancel,
        }
    }

    /// Spawn both loops. Handles end when the token is cancelled;
    /// shutdown leaves no armed timer behind.
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        let latency = tokio::spawn(latency_loop(
            self.config.latency_interval,
            Arc::clone(&self.registry),
            Arc::clone(&self.runner),
            self.store.clone(),
            self.cancel.clone(),
        ));
        let scan = tokio::spawn(device_scan_loop(
            self.config.device_scan_interval,
            self.registry,
            self.runner,
            self.cancel,
        ));
        vec![latency, scan]
    }
}

async fn latency_loop(
    period: Duration,
    registry: Arc<SubscriberRegistry>,
    runner: Arc<dyn ProbeRunner>,
    store: Option<Arc<StoreHandle>>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                // No subscribers, no work: skip the probe entirely.
                if registry.subscriber_count() == 0 {
                    continue;
                }

                let result = runner.run(ProbeKind::Latency).await;
                if let Some(ref handle) = store {
                    record_latency_stat(handle, &result).await;
                }

                broadcast(&registry, EventKind::LatencyUpdate, result);
            }
        }
    }
    debug!("latency loop stopped");
}

async fn device_scan_loop(
    period: Duration,
    registry: Arc<SubscriberRegistry>,
    runner: Arc<dyn ProbeRunner>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                if registry.subscriber_count() == 0 {
                    continue;
                }

                match runner.run(ProbeKind::DeviceScan).await {
                    result @ ProbeResult::DeviceScan { .. } => {
                        broadcast(&registry, EventKind::DeviceScanResult, result);
                    }
                    // Scan failures are not broadcast; the next tick retries.
                    ProbeResult::Error { kind, message: reason } => {
                        warn!(%kind, reason, "periodic device scan failed");
                    }
                    other => {
                        warn!(?other, "device scan probe returned unexpected variant");
                    }
                }
            }
        }
    }
    debug!("device scan loop stopped");
}

fn broadcast(registry: &SubscriberRegistry, kind: EventKind, result: ProbeResult) {
    let payload = EventPayload::new(result);
    match Frame::event(kind, &payload) {
        Ok(frame) => {
            let delivered = registry.broadcast(&frame);
            debug!(event = %kind, delivered, "broadcast complete");
        }
        Err(e) => warn!(error = %e, event = %kind, "failed to build broadcast frame"),
    }
}

/// Append a latency figure to the storage collaborator. Storage
/// failures are logged and never interrupt the loop.
async fn record_latency_stat(handle: &StoreHandle, result: &ProbeResult) {
    let ProbeResult::Latency { millis } = result else {
        return;
    };
    let (store, account) = (&handle.0, &handle.1);
    let stat = StatSample {
        recorded_at: Utc::now(),
        latency_ms: *millis,
        download_mbps: None,
        upload_mbps: None,
    };
    if let Err(e) = store.append_stat(account, &stat).await {
        warn!(error = %e, %account, "failed to append latency stat");
    }
}
