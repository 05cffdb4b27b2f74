//! Event multiplexer: per-kind callback registration and dispatch.
//!
//! Dashboards register callbacks against event kinds (`"latency-update"`,
//! `"throughput-result"`, ...). The transport's read loop feeds every
//! decoded frame through [`EventMultiplexer::dispatch`], which invokes
//! the callbacks bound to that kind in registration order.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::warn;

// ── Callback binding ─────────────────────────────────────────────────

/// Handle returned by [`EventMultiplexer::on`], used to unbind later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingId(u64);

type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Default)]
struct MuxInner {
    next_id: u64,
    bindings: HashMap<String, Vec<(BindingId, Callback)>>,
}

// ── EventMultiplexer ─────────────────────────────────────────────────

/// Routes decoded frames to callbacks keyed by event kind.
///
/// Callbacks for one kind run sequentially in registration order; a
/// callback that panics is logged and skipped without affecting the
/// others. Dispatch for a given kind is never re-entered while a
/// callback for that kind is still running, because the transport's
/// single read loop is the only dispatcher.
#[derive(Default)]
pub struct EventMultiplexer {
    inner: Mutex<MuxInner>,
}

impl EventMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a callback to an event kind. Returns a [`BindingId`] that
    /// [`off`](Self::off) accepts to remove this binding again.
    pub fn on(&self, kind: &str, callback: impl Fn(&Value) + Send + Sync + 'static) -> BindingId {
        let mut inner = self.inner.lock().expect("multiplexer mutex poisoned");
        let id = BindingId(inner.next_id);
        inner.next_id += 1;
        inner
            .bindings
            .entry(kind.to_string())
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Remove a binding. Unknown kinds and already-removed bindings are
    /// no-ops.
    pub fn off(&self, kind: &str, id: BindingId) {
        let mut inner = self.inner.lock().expect("multiplexer mutex poisoned");
        if let Some(list) = inner.bindings.get_mut(kind) {
            list.retain(|(bound, _)| *bound != id);
            if list.is_empty() {
                inner.bindings.remove(kind);
            }
        }
    }

    /// Number of callbacks currently bound to `kind`.
    pub fn binding_count(&self, kind: &str) -> usize {
        let inner = self.inner.lock().expect("multiplexer mutex poisoned");
        inner.bindings.get(kind).map_or(0, Vec::len)
    }

    /// Invoke every callback bound to `kind`, in registration order.
    ///
    /// The binding list is snapshotted before any callback runs, so a
    /// callback may call [`on`](Self::on) or [`off`](Self::off) without
    /// deadlocking; such changes take effect from the next dispatch.
    pub fn dispatch(&self, kind: &str, payload: &Value) {
        let snapshot: Vec<Callback> = {
            let inner = self.inner.lock().expect("multiplexer mutex poisoned");
            match inner.bindings.get(kind) {
                Some(list) => list.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
                None => return,
            }
        };

        for callback in snapshot {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(payload))).is_err() {
                warn!(kind, "event callback panicked, continuing with remaining callbacks");
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
