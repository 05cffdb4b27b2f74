// ── Collaborator interfaces ──
//
// Narrow boundaries to systems outside the telemetry pipeline. The
// pipeline never depends on their internal representation, only on
// success/failure of each call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::DeviceRecord;

/// Opaque identifier of the account that owns a dashboard's data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub String);

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Failure surfaced by a storage collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage rejected request: {0}")]
    Rejected(String),
}

/// One historical stat sample appended by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatSample {
    pub recorded_at: DateTime<Utc>,
    pub latency_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_mbps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_mbps: Option<f64>,
}

/// A security event to be recorded against an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEventDraft {
    pub severity: String,
    pub description: String,
}

/// Storage collaborator for historical stats, devices, and security
/// events. All calls are keyed by the owning account.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    async fn create_device(
        &self,
        account: &AccountId,
        device: &DeviceRecord,
    ) -> Result<(), StoreError>;

    async fn update_device(
        &self,
        account: &AccountId,
        device: &DeviceRecord,
    ) -> Result<(), StoreError>;

    async fn delete_device(
        &self,
        account: &AccountId,
        ip_address: &str,
        mac_address: &str,
    ) -> Result<(), StoreError>;

    async fn list_devices(&self, account: &AccountId) -> Result<Vec<DeviceRecord>, StoreError>;

    async fn append_stat(&self, account: &AccountId, stat: &StatSample) -> Result<(), StoreError>;

    async fn list_recent_stats(
        &self,
        account: &AccountId,
        limit: usize,
    ) -> Result<Vec<StatSample>, StoreError>;

    async fn create_security_event(
        &self,
        account: &AccountId,
        event: &SecurityEventDraft,
    ) -> Result<String, StoreError>;

    async fn resolve_security_event(
        &self,
        account: &AccountId,
        event_id: &str,
    ) -> Result<(), StoreError>;
}
