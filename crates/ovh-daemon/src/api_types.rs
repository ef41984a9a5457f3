//! Request/response DTOs for every ovh-daemon HTTP endpoint. No business
//! logic lives here, just the wire shapes `routes.rs` serializes against.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self { error: error.into(), code: code.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub scheduler_running: bool,
    pub monitor_running: bool,
    pub queue_count: usize,
    pub subscription_count: usize,
}

// ---------------------------------------------------------------------------
// Queue CRUD
// ---------------------------------------------------------------------------

/// Body shape shared by `POST /queue` and `PUT /queue/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    pub plan_code: String,
    pub datacenters: Vec<String>,
    #[serde(default)]
    pub options: Vec<String>,
    pub quantity: u32,
    #[serde(rename = "retryInterval")]
    pub retry_interval_secs: u64,
    #[serde(default)]
    pub auto_pay: bool,
    #[serde(default)]
    pub account_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateStatusRequest {
    /// Only "running" | "paused" are accepted transitions over this endpoint.
    pub status: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ScopeQuery {
    pub scope: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PagedQueueQuery {
    pub status: Option<String>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PagedResponse<T: Serialize> {
    pub items: Vec<T>,
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest {
    pub plan_code: String,
    pub ovh_subsidiary: String,
    #[serde(default)]
    pub datacenters: Vec<String>,
    #[serde(default)]
    pub monitor_linux: bool,
    #[serde(default)]
    pub monitor_windows: bool,
    #[serde(default)]
    pub notify_available: bool,
    #[serde(default)]
    pub notify_unavailable: bool,
    #[serde(default)]
    pub account_id: Option<String>,
}

// ---------------------------------------------------------------------------
// /stats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct AccountStats {
    pub queue_count: usize,
    pub purchased: u64,
    pub history_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub by_status: BTreeMap<String, usize>,
    pub total_purchased: u64,
    pub total_history_entries: usize,
    pub per_account: BTreeMap<String, AccountStats>,
}
