//! Availability Monitor (C6).
//!
//! An independent polling loop over `Subscription`s, default tick 60s
//! (floor 30s). Pure observation: it never creates orders itself (an
//! operator wanting auto-ordering creates a parallel `QueueTask` in C5).
//! Idempotent `start`/`stop` and a `status()` snapshot, following the same
//! atomic-flag-plus-notify shutdown idiom used for the daemon's heartbeat
//! task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{info, instrument, warn};

use ovh_client::OvhClientPool;
use ovh_notify::Notifier;
use ovh_probe::AvailabilityProber;
use ovh_schemas::{
    Account, Availability, ChangeType, DcStatus, Subscription, SubscriptionChangeEvent,
    DEFAULT_MONITOR_INTERVAL_SECS, MIN_MONITOR_INTERVAL_SECS,
};
use ovh_store::Store;

/// Snapshot returned by `AvailabilityMonitor::status()`.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub running: bool,
    pub subscription_count: usize,
    pub check_interval_secs: u64,
}

pub struct AvailabilityMonitor {
    store: Arc<Store>,
    client_pool: Arc<OvhClientPool>,
    prober: Arc<dyn AvailabilityProber>,
    notifier: Arc<dyn Notifier>,
    interval_secs: u64,
    running: AtomicBool,
    stop_notify: Notify,
}

impl AvailabilityMonitor {
    /// `interval_secs` is floored to `MIN_MONITOR_INTERVAL_SECS`, mirroring
    /// `ovh_config::EngineConfig::from_env`'s own floor on the same value.
    pub fn new(
        store: Arc<Store>,
        client_pool: Arc<OvhClientPool>,
        prober: Arc<dyn AvailabilityProber>,
        notifier: Arc<dyn Notifier>,
        interval_secs: u64,
    ) -> Self {
        Self {
            store,
            client_pool,
            prober,
            notifier,
            interval_secs: interval_secs.max(MIN_MONITOR_INTERVAL_SECS),
            running: AtomicBool::new(false),
            stop_notify: Notify::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> MonitorStatus {
        MonitorStatus {
            running: self.is_running(),
            subscription_count: self.store.subscriptions_snapshot().await.len(),
            check_interval_secs: self.interval_secs,
        }
    }

    pub fn start(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(interval_secs = self.interval_secs, "availability monitor starting");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(self.interval_secs));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !self.running.load(Ordering::SeqCst) {
                            break;
                        }
                        self.run_once().await;
                    }
                    _ = self.stop_notify.notified() => break,
                }
            }
            info!("availability monitor stopped");
        });
    }

    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.stop_notify.notify_waiters();
        }
    }

    /// One pass over every subscription. Public so tests and a debug
    /// "check now" affordance can drive it deterministically.
    pub async fn run_once(&self) {
        let subscriptions = self.store.subscriptions_snapshot().await;
        for subscription in subscriptions {
            self.check_subscription(subscription.id).await;
        }
    }

    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    async fn check_subscription(&self, subscription_id: uuid::Uuid) {
        let lock = self.store.subscription_lock(subscription_id).await;
        let _guard = lock.lock().await;

        let Some(subscription) = self.store.find_subscription(subscription_id).await else {
            return;
        };
        let Some(account) = self.resolve_account(&subscription).await else {
            warn!("no account available to probe subscription, skipping");
            return;
        };
        let client = self.client_pool.get_or_create(&account).await;

        let readings = match self
            .prober
            .probe(&client, &account, &subscription.plan_code, &[], &subscription.datacenters)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "subscription probe failed");
                return;
            }
        };

        let now = Utc::now();
        let mut events = Vec::new();
        let mut new_status = subscription.last_status.clone();

        for (dc, availability) in &readings {
            let available = availability.is_available();
            let previous = subscription.last_status.get(dc);
            let changed = previous.map(|p| p.available != available).unwrap_or(available);

            if changed {
                let change_type =
                    if available { ChangeType::BecameAvailable } else { ChangeType::BecameUnavailable };
                events.push(SubscriptionChangeEvent {
                    timestamp: now,
                    datacenter: dc.clone(),
                    change_type,
                    old_status: previous.map(|p| p.available),
                });

                if available && subscription.notify_available {
                    self.notifier
                        .notify(&format!(
                            "{} available in {dc} ({})",
                            subscription.plan_code, subscription.ovh_subsidiary
                        ))
                        .await;
                } else if !available && subscription.notify_unavailable {
                    self.notifier
                        .notify(&format!(
                            "{} no longer available in {dc} ({})",
                            subscription.plan_code, subscription.ovh_subsidiary
                        ))
                        .await;
                }
            }

            new_status.insert(dc.clone(), DcStatus { available, last_seen_at: now });
        }

        // Persist `lastStatus` on every check, not only on a change, so
        // `last_seen_at` stays current for dashboards reading the
        // subscription between changes.
        let result = self
            .store
            .mutate_subscriptions(|subs| {
                if let Some(s) = subs.iter_mut().find(|s| s.id == subscription_id) {
                    for event in events {
                        s.push_history(event);
                    }
                    s.last_status = new_status;
                }
                Ok(())
            })
            .await;
        if let Err(e) = result {
            warn!(error = %e, "failed to persist subscription status change");
        }
    }

    /// Subscriptions may be account-agnostic (`account_id: None`); falls
    /// back to the first configured account, mirroring the HTTP control
    /// plane's "default account" fallback for unscoped requests.
    async fn resolve_account(&self, subscription: &Subscription) -> Option<Account> {
        if let Some(id) = &subscription.account_id {
            self.store.find_account(id).await
        } else {
            self.store.accounts_snapshot().await.into_iter().next()
        }
    }
}

pub const DEFAULT_INTERVAL_SECS: u64 = DEFAULT_MONITOR_INTERVAL_SECS;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructed_interval_is_floored() {
        // interval floor is exercised through `new`'s .max(...) call; assert
        // the constant relationship holds rather than constructing a full
        // monitor (which needs a store + client pool + prober).
        assert!(MIN_MONITOR_INTERVAL_SECS <= DEFAULT_INTERVAL_SECS);
    }
}
