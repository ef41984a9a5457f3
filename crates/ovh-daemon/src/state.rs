//! Axum-facing shared state: wraps an `Engine` plus the SSE broadcast bus
//! and the auth config handlers need on every request.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::engine::Engine;

/// Broadcast over the internal event bus and surfaced as SSE events to the
/// (out of scope) web UI.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    TaskUpdated { task_id: Uuid },
    HistoryAppended { entry_id: Uuid },
    SubscriptionChanged { subscription_id: Uuid },
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub bus: broadcast::Sender<BusMsg>,
    pub api_secret_key: Option<String>,
    pub enable_api_key_auth: bool,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        let (bus, _rx) = broadcast::channel(1024);
        Self {
            api_secret_key: engine.config.api_secret_key.clone(),
            enable_api_key_auth: engine.config.enable_api_key_auth,
            engine,
            bus,
        }
    }
}

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_secs()
}

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}
