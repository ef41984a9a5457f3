//! Queue Scheduler (C5) — the central component.
//!
//! One `tokio::spawn`ed 1-second dispatcher per `QueueScheduler`. Each tick
//! loads due task ids, sorts by `createdAt` ascending (fairness tie-break),
//! then drains them concurrently via
//! `futures_util::stream::iter(..).for_each_concurrent(pool_size, ..)`.
//! `tick_one` implements the per-task attempt algorithm step by step.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{stream, StreamExt};
use tokio::sync::{Mutex, Notify};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use ovh_client::{OvhApiError, OvhClientPool};
use ovh_notify::Notifier;
use ovh_order::{CartOrderDriver, OrderError};
use ovh_probe::AvailabilityProber;
use ovh_schemas::{HistoryStatus, PurchaseHistoryEntry, TaskStatus};
use ovh_store::Store;

use crate::backoff::{jitter_seed_for, rate_limit_backoff_secs};
use crate::transition::{decide, TickEffect, TickEvent};

/// Tick cadence of the dispatcher itself (not to be confused with any
/// task's `retryInterval`).
const DISPATCH_INTERVAL: Duration = Duration::from_secs(1);
/// Worker pool cap.
const MAX_POOL_SIZE: usize = 32;

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max).collect();
        out.push_str("...");
        out
    }
}

/// `pool_size = min(32, 2 * account_count)`, floored to 1 so a single
/// account still gets a worker.
pub fn pool_size_for(account_count: usize) -> usize {
    (2 * account_count).clamp(1, MAX_POOL_SIZE)
}

pub struct QueueScheduler {
    store: Arc<Store>,
    client_pool: Arc<OvhClientPool>,
    prober: Arc<dyn AvailabilityProber>,
    order_driver: Arc<dyn CartOrderDriver>,
    notifier: Arc<dyn Notifier>,
    running: AtomicBool,
    stop_notify: Notify,
    /// Consecutive 429s per task, reset on any non-429 outcome. Ephemeral:
    /// lost on restart, which only means the first post-restart 429 backs
    /// off as if it were the first ever.
    rate_limit_streak: Mutex<HashMap<Uuid, u32>>,
}

impl QueueScheduler {
    pub fn new(
        store: Arc<Store>,
        client_pool: Arc<OvhClientPool>,
        prober: Arc<dyn AvailabilityProber>,
        order_driver: Arc<dyn CartOrderDriver>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            client_pool,
            prober,
            order_driver,
            notifier,
            running: AtomicBool::new(false),
            stop_notify: Notify::new(),
            rate_limit_streak: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Idempotent: calling `start` on an already-running scheduler is a
    /// no-op.
    pub fn start(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("queue scheduler starting");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(DISPATCH_INTERVAL);
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
            info!("queue scheduler stopped");
        });
    }

    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.stop_notify.notify_waiters();
        }
    }

    /// One dispatch cycle: find due tasks, fan them out. Public so tests and
    /// the HTTP control plane (a manual "tick now" debug affordance) can
    /// drive a single cycle deterministically.
    pub async fn run_once(&self) {
        let now = Utc::now();
        let mut due: Vec<(Uuid, chrono::DateTime<Utc>)> = self
            .store
            .queue_snapshot()
            .await
            .into_iter()
            .filter(|t| t.status == TaskStatus::Running && t.next_attempt_at <= now)
            .map(|t| (t.id, t.created_at))
            .collect();
        due.sort_by_key(|(_, created_at)| *created_at);

        let account_count = self.store.accounts_snapshot().await.len();
        let pool_size = pool_size_for(account_count);

        stream::iter(due.into_iter().map(|(id, _)| id))
            .for_each_concurrent(pool_size, |id| async move {
                self.tick_one(id).await;
            })
            .await;
    }

    #[instrument(skip(self), fields(task_id = %task_id))]
    async fn tick_one(&self, task_id: Uuid) {
        // Step 1: non-blocking per-task lock. Held elsewhere -> skip, next
        // tick will revisit.
        let lock = self.store.task_lock(task_id).await;
        let _guard = match lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };

        // Step 2: reload; terminal or paused tasks are not this tick's concern.
        let task = match self.store.find_task(task_id).await {
            Some(t) if t.status == TaskStatus::Running => t,
            _ => return,
        };

        // Quantity lowered below what's already purchased while running.
        // No order attempt is needed; just close the task out on this tick.
        if task.is_complete() {
            let now = Utc::now();
            if let Err(e) = self
                .store
                .mutate_queue(|tasks| {
                    if let Some(t) = tasks.iter_mut().find(|t| t.id == task_id) {
                        t.status = TaskStatus::Completed;
                        t.next_attempt_at = now;
                        t.updated_at = now;
                    }
                    Ok(())
                })
                .await
            {
                warn!(error = %e, "failed to persist quantity-reduced completion");
            }
            return;
        }

        let account = match self.store.find_account(&task.account_id).await {
            Some(a) => a,
            None => {
                warn!("account removed mid-flight; failing task closed");
                self.fail_task(task_id, None, "account removed").await;
                return;
            }
        };
        let client = self.client_pool.get_or_create(&account).await;

        // Step 3: probe datacenters in priority order, first available wins.
        let mut chosen_dc: Option<String> = None;
        for dc in &task.datacenters {
            match self
                .prober
                .probe(&client, &account, &task.plan_code, &task.options, std::slice::from_ref(dc))
                .await
            {
                Ok(readings) => {
                    if readings.get(dc).map(|a| a.is_available()).unwrap_or(false) {
                        chosen_dc = Some(dc.clone());
                        break;
                    }
                }
                Err(OvhApiError::Auth { message, .. }) => {
                    self.fail_task(task_id, Some(dc.clone()), &format!("auth error: {message}")).await;
                    return;
                }
                Err(OvhApiError::NotFound { message, .. }) => {
                    self.fail_task(task_id, Some(dc.clone()), &format!("not found: {message}")).await;
                    return;
                }
                Err(e) => {
                    warn!(datacenter = %dc, error = %e, "probe failed for this dc, trying next");
                }
            }
        }

        let Some(dc) = chosen_dc else {
            self.apply_effect(task_id, decide(TickEvent::NoDatacenterAvailable, task.retry_interval_secs, 0))
                .await;
            self.clear_rate_limit_streak(task_id).await;
            return;
        };

        // Steps 5-9: attempt the order.
        let outcome = self
            .order_driver
            .place_order(&account, &task.plan_code, &dc, &task.options, task.auto_pay)
            .await;

        match outcome {
            Ok(order) => {
                self.clear_rate_limit_streak(task_id).await;
                let sequence = task.purchased + 1;
                let completes_task = sequence >= task.quantity;
                let entry = PurchaseHistoryEntry {
                    id: Uuid::new_v4(),
                    task_id,
                    account_id: task.account_id.clone(),
                    plan_code: task.plan_code.clone(),
                    datacenter: dc.clone(),
                    options: task.options.clone(),
                    status: HistoryStatus::Success,
                    order_id: Some(order.order_id.clone()),
                    order_url: Some(order.order_url.clone()),
                    price: order.price.clone(),
                    error_message: order.payment_failed.clone().map(|m| truncate(&m, 500)),
                    sequence,
                    purchase_time: Utc::now(),
                };
                if let Err(e) = self.store.append_history(entry).await {
                    warn!(error = %e, "failed to append success history entry");
                }
                self.apply_effect(task_id, decide(TickEvent::OrderSucceeded { completes_task }, task.retry_interval_secs, 0))
                    .await;
                self.notifier
                    .notify(&format!("purchased unit {sequence} of {} in {dc}", task.plan_code))
                    .await;
            }
            Err(OrderError::NotAvailable) => {
                self.clear_rate_limit_streak(task_id).await;
                self.apply_effect(task_id, decide(TickEvent::StockRace, task.retry_interval_secs, 0)).await;
            }
            Err(OrderError::RateLimit(message)) => {
                warn!(%message, "order rate limited");
                let streak = self.bump_rate_limit_streak(task_id).await;
                let backoff = rate_limit_backoff_secs(task.retry_interval_secs, streak, jitter_seed_for(task_id));
                self.apply_effect(task_id, decide(TickEvent::RateLimited, task.retry_interval_secs, backoff)).await;
            }
            Err(OrderError::Auth(message)) => {
                self.fail_task(task_id, Some(dc), &format!("auth error: {message}")).await;
            }
            Err(OrderError::NotFound(message)) => {
                self.fail_task(task_id, Some(dc), &format!("not found: {message}")).await;
            }
            Err(e @ (OrderError::Conflict(_)
            | OrderError::Server(_)
            | OrderError::CartCreateFailed(_)
            | OrderError::SequenceTimeout
            | OrderError::Other(_))) => {
                warn!(error = %e, "transient order failure, retrying next tick");
                self.clear_rate_limit_streak(task_id).await;
                self.apply_effect(task_id, decide(TickEvent::Transient, task.retry_interval_secs, 0)).await;
            }
        }
    }

    async fn bump_rate_limit_streak(&self, task_id: Uuid) -> u32 {
        let mut streaks = self.rate_limit_streak.lock().await;
        let entry = streaks.entry(task_id).or_insert(0);
        *entry += 1;
        *entry
    }

    async fn clear_rate_limit_streak(&self, task_id: Uuid) {
        self.rate_limit_streak.lock().await.remove(&task_id);
    }

    async fn apply_effect(&self, task_id: Uuid, effect: TickEffect) {
        let now = Utc::now();
        let result = self
            .store
            .mutate_queue(|tasks| {
                if let Some(t) = tasks.iter_mut().find(|t| t.id == task_id) {
                    if effect.increment_retry_count {
                        t.retry_count += 1;
                    }
                    if effect.increment_failure_count {
                        t.failure_count += 1;
                    }
                    if effect.increment_purchased {
                        t.purchased += 1;
                    }
                    if let Some(status) = effect.new_status {
                        t.status = status;
                    }
                    if let Some(delay) = effect.next_attempt_delay_secs {
                        t.next_attempt_at = now + chrono::Duration::seconds(delay as i64);
                    }
                    t.updated_at = now;
                }
                Ok(())
            })
            .await;
        if let Err(e) = result {
            warn!(error = %e, "failed to persist tick effect");
        }
    }

    /// Terminal failure (fatal error or account-removed). Records both the
    /// task's terminal state and a failed history entry: user-visible
    /// failures land in `PurchaseHistoryEntry.errorMessage` *and* the
    /// task's state.
    async fn fail_task(&self, task_id: Uuid, dc: Option<String>, message: &str) {
        let message = truncate(message, 500);
        let now = Utc::now();
        let task = self
            .store
            .mutate_queue(|tasks| {
                let t = tasks.iter_mut().find(|t| t.id == task_id);
                if let Some(t) = t {
                    t.status = TaskStatus::Failed;
                    t.error_message = Some(message.clone());
                    t.updated_at = now;
                    Ok(Some(t.clone()))
                } else {
                    Ok(None)
                }
            })
            .await
            .ok()
            .flatten();

        if let Some(task) = task {
            let entry = PurchaseHistoryEntry {
                id: Uuid::new_v4(),
                task_id,
                account_id: task.account_id,
                plan_code: task.plan_code,
                datacenter: dc.unwrap_or_default(),
                options: task.options,
                status: HistoryStatus::Failed,
                order_id: None,
                order_url: None,
                price: None,
                error_message: Some(message),
                sequence: 0,
                purchase_time: now,
            };
            if let Err(e) = self.store.append_history(entry).await {
                warn!(error = %e, "failed to append failure history entry");
            }
        }
        self.clear_rate_limit_streak(task_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_size_respects_floor_and_cap() {
        assert_eq!(pool_size_for(0), 1);
        assert_eq!(pool_size_for(1), 2);
        assert_eq!(pool_size_for(10), 20);
        assert_eq!(pool_size_for(100), 32);
    }
}
