//! Wire/persisted data types for the acquisition engine.
//!
//! Every type here is `Serialize + Deserialize`; unknown fields are ignored
//! on read (`#[serde(default)]` on anything optional) and `None`s are
//! omitted on write. No business logic lives here.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Floor enforced on `QueueTask::retry_interval_secs`.
pub const MIN_RETRY_INTERVAL_SECS: u64 = 15;
/// Floor enforced on the availability monitor's tick interval.
pub const MIN_MONITOR_INTERVAL_SECS: u64 = 30;
/// Default availability monitor tick interval.
pub const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 60;
/// Soft cap on `history.json` entries; oldest trimmed past this.
pub const HISTORY_SOFT_CAP: usize = 10_000;
/// Bound on a single subscription's change-event ring buffer.
pub const SUBSCRIPTION_HISTORY_CAP: usize = 200;
/// Bound on the quantity a single task may request.
pub const MAX_TASK_QUANTITY: u32 = 100;

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// OVH API region; selects the endpoint root and signing scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndpointRegion {
    #[serde(rename = "ovh-eu")]
    OvhEu,
    #[serde(rename = "ovh-us")]
    OvhUs,
    #[serde(rename = "ovh-ca")]
    OvhCa,
}

impl EndpointRegion {
    /// REST API root for this region.
    pub fn api_root(self) -> &'static str {
        match self {
            EndpointRegion::OvhEu => "https://eu.api.ovh.com/1.0",
            EndpointRegion::OvhUs => "https://api.us.ovhcloud.com/1.0",
            EndpointRegion::OvhCa => "https://ca.api.ovh.com/1.0",
        }
    }
}

/// An OVH account credential set. Immutable once created; referenced by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub alias: String,
    /// OVH billing subsidiary, e.g. "IE", "FR", "US", "CA".
    pub zone: String,
    pub endpoint_region: EndpointRegion,
    pub application_key: String,
    pub application_secret: String,
    pub consumer_key: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// QueueTask
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

/// A standing purchase intent: "N units of this plan, in these DCs, with
/// these options, on this account, retried at this cadence".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueTask {
    pub id: Uuid,
    pub account_id: String,

    pub plan_code: String,
    /// Ordered by priority; first entry is tried first within a tick.
    pub datacenters: Vec<String>,
    pub options: Vec<String>,

    pub quantity: u32,
    pub retry_interval_secs: u64,
    pub auto_pay: bool,

    pub status: TaskStatus,
    pub retry_count: u64,
    pub failure_count: u64,
    pub purchased: u32,
    pub next_attempt_at: DateTime<Utc>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Set when status transitions to `Failed`; truncated to 500 chars.
    #[serde(default)]
    pub error_message: Option<String>,
}

impl QueueTask {
    /// `purchased == quantity` is the sole definition of "done".
    pub fn is_complete(&self) -> bool {
        self.purchased >= self.quantity
    }
}

// ---------------------------------------------------------------------------
// PurchaseHistoryEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Price {
    pub with_tax: String,
    pub without_tax: String,
    pub tax: String,
    pub currency_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseHistoryEntry {
    pub id: Uuid,
    pub task_id: Uuid,
    pub account_id: String,
    pub plan_code: String,
    pub datacenter: String,
    pub options: Vec<String>,
    pub status: HistoryStatus,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub order_url: Option<String>,
    #[serde(default)]
    pub price: Option<Price>,
    #[serde(default)]
    pub error_message: Option<String>,
    /// n-th success for this task, 1-based. Only meaningful when `status ==
    /// Success`.
    pub sequence: u32,
    pub purchase_time: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Subscription (availability monitor)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Availability {
    Available,
    Unavailable,
    Unknown,
}

impl Availability {
    /// OVH's free-text availability bucket -> tri-state.
    pub fn from_ovh_bucket(bucket: &str) -> Self {
        match bucket {
            "" | "unavailable" => Availability::Unavailable,
            "unknown" => Availability::Unknown,
            _ => Availability::Available,
        }
    }

    pub fn is_available(self) -> bool {
        matches!(self, Availability::Available)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DcStatus {
    pub available: bool,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    BecameAvailable,
    BecameUnavailable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionChangeEvent {
    pub timestamp: DateTime<Utc>,
    pub datacenter: String,
    pub change_type: ChangeType,
    pub old_status: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: Uuid,
    #[serde(default)]
    pub account_id: Option<String>,
    pub plan_code: String,
    pub ovh_subsidiary: String,
    /// Empty means "all known DCs for this plan".
    #[serde(default)]
    pub datacenters: Vec<String>,
    pub monitor_linux: bool,
    pub monitor_windows: bool,
    pub notify_available: bool,
    pub notify_unavailable: bool,
    #[serde(default)]
    pub last_status: BTreeMap<String, DcStatus>,
    /// Bounded ring, oldest dropped past `SUBSCRIPTION_HISTORY_CAP`.
    #[serde(default)]
    pub history: Vec<SubscriptionChangeEvent>,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    pub fn push_history(&mut self, event: SubscriptionChangeEvent) {
        self.history.push(event);
        if self.history.len() > SUBSCRIPTION_HISTORY_CAP {
            let excess = self.history.len() - SUBSCRIPTION_HISTORY_CAP;
            self.history.drain(0..excess);
        }
    }
}

// ---------------------------------------------------------------------------
// Cart (ephemeral, never persisted)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartItem {
    pub item_id: String,
    pub plan_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cart {
    pub cart_id: String,
    pub expiration: DateTime<Utc>,
    pub items: Vec<CartItem>,
}

// ---------------------------------------------------------------------------
// AvailabilityReading (ephemeral, cached briefly by ovh-probe)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityReading {
    pub plan_code: String,
    pub fingerprint: u64,
    pub datacenters: BTreeMap<String, Availability>,
    pub fetched_at: DateTime<Utc>,
}
