//! Wires a real `Store` (backed by a temp dir) to a `QueueScheduler` plus
//! scripted fakes, so multi-step acquisition scenarios can be driven end-to-end
//! without any network I/O: compose the real engine pieces around a
//! deterministic probe/order driver instead of hitting the network.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use ovh_client::OvhClientPool;
use ovh_notify::RecordingNotifier;
use ovh_order::CartOrderDriver;
use ovh_probe::AvailabilityProber;
use ovh_schemas::{Account, EndpointRegion, QueueTask, TaskStatus};
use ovh_scheduler::QueueScheduler;
use ovh_store::Store;

pub fn sample_account(id: &str) -> Account {
    Account {
        id: id.to_string(),
        alias: "main".into(),
        zone: "IE".into(),
        endpoint_region: EndpointRegion::OvhEu,
        application_key: "ak".into(),
        application_secret: "as".into(),
        consumer_key: "ck".into(),
        created_at: Utc::now(),
    }
}

/// A `QueueTask` builder with spec-compliant defaults (single dc, 30s retry,
/// no autoPay), tuned per-field by the caller before inserting into a
/// harness's store.
pub struct TaskBuilder {
    task: QueueTask,
}

impl TaskBuilder {
    pub fn new(account_id: &str, plan_code: &str, datacenters: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            task: QueueTask {
                id: Uuid::new_v4(),
                account_id: account_id.to_string(),
                plan_code: plan_code.to_string(),
                datacenters,
                options: vec![],
                quantity: 1,
                retry_interval_secs: 30,
                auto_pay: false,
                status: TaskStatus::Running,
                retry_count: 0,
                failure_count: 0,
                purchased: 0,
                next_attempt_at: now,
                created_at: now,
                updated_at: now,
                error_message: None,
            },
        }
    }

    pub fn quantity(mut self, n: u32) -> Self {
        self.task.quantity = n;
        self
    }

    pub fn retry_interval_secs(mut self, secs: u64) -> Self {
        self.task.retry_interval_secs = secs;
        self
    }

    pub fn auto_pay(mut self, on: bool) -> Self {
        self.task.auto_pay = on;
        self
    }

    pub fn build(self) -> QueueTask {
        self.task
    }
}

/// Bundles a temp-dir-backed `Store`, a `QueueScheduler` wired to scripted
/// fakes, and convenience methods for driving and inspecting ticks.
pub struct ScenarioHarness {
    pub store: Arc<Store>,
    pub scheduler: Arc<QueueScheduler>,
    pub notifier: Arc<RecordingNotifier>,
    _tempdir: tempfile::TempDir,
}

impl ScenarioHarness {
    pub fn new(prober: Arc<dyn AvailabilityProber>, order_driver: Arc<dyn CartOrderDriver>) -> Self {
        let tempdir = tempfile::tempdir().expect("create scenario tempdir");
        let store = Arc::new(Store::load(tempdir.path()).expect("load empty store"));
        let notifier = Arc::new(RecordingNotifier::default());
        let scheduler = Arc::new(QueueScheduler::new(
            store.clone(),
            Arc::new(OvhClientPool::new()),
            prober,
            order_driver,
            notifier.clone(),
        ));
        Self { store, scheduler, notifier, _tempdir: tempdir }
    }

    pub async fn with_account(self, account: Account) -> Self {
        self.store.mutate_accounts(|a| { a.push(account); Ok(()) }).await.unwrap();
        self
    }

    pub async fn with_task(self, task: QueueTask) -> (Self, Uuid) {
        let id = task.id;
        self.store.mutate_queue(|tasks| { tasks.push(task); Ok(()) }).await.unwrap();
        (self, id)
    }

    /// Runs one scheduler dispatch cycle.
    pub async fn tick(&self) {
        self.scheduler.run_once().await;
    }

    /// Forces `task_id` due right now, then ticks — convenient when a
    /// multi-unit task's `nextAttemptAt` has already advanced past "now".
    pub async fn force_due_and_tick(&self, task_id: Uuid) {
        self.store
            .mutate_queue(|tasks| {
                if let Some(t) = tasks.iter_mut().find(|t| t.id == task_id) {
                    t.next_attempt_at = Utc::now();
                }
                Ok(())
            })
            .await
            .unwrap();
        self.tick().await;
    }
}
