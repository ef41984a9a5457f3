//! `Engine` owns every long-lived collaborator and is constructed exactly
//! once at startup; Axum handlers only ever hold an `Arc<Engine>` rather
//! than reaching into module-global mutable state.

use std::sync::Arc;

use ovh_client::OvhClientPool;
use ovh_config::EngineConfig;
use ovh_notify::{NullNotifier, Notifier, TelegramNotifier};
use ovh_order::{CartOrderDriver, OvhCartDriver};
use ovh_probe::{AvailabilityProbe, AvailabilityProber};
use ovh_scheduler::{AvailabilityMonitor, QueueScheduler};
use ovh_store::Store;

pub struct Engine {
    pub config: EngineConfig,
    pub store: Arc<Store>,
    pub client_pool: Arc<OvhClientPool>,
    pub prober: Arc<dyn AvailabilityProber>,
    pub order_driver: Arc<dyn CartOrderDriver>,
    pub notifier: Arc<dyn Notifier>,
    pub scheduler: Arc<QueueScheduler>,
    pub monitor: Arc<AvailabilityMonitor>,
}

impl Engine {
    /// Loads the store from `config.data_dir` and wires every collaborator.
    /// Fails closed exactly like `Store::load`: a corrupt collection file
    /// aborts construction rather than starting with a silently-empty one.
    pub fn new(config: EngineConfig) -> anyhow::Result<Self> {
        let store = Arc::new(Store::load(config.data_dir.clone())?);
        let client_pool = Arc::new(OvhClientPool::new());
        let prober: Arc<dyn AvailabilityProber> = Arc::new(AvailabilityProbe::new());
        let order_driver: Arc<dyn CartOrderDriver> = Arc::new(OvhCartDriver::new());
        let notifier: Arc<dyn Notifier> = build_notifier();

        let scheduler = Arc::new(QueueScheduler::new(
            store.clone(),
            client_pool.clone(),
            prober.clone(),
            order_driver.clone(),
            notifier.clone(),
        ));
        let monitor = Arc::new(AvailabilityMonitor::new(
            store.clone(),
            client_pool.clone(),
            prober.clone(),
            notifier.clone(),
            config.monitor_interval_secs,
        ));

        Ok(Self { config, store, client_pool, prober, order_driver, notifier, scheduler, monitor })
    }

    /// Starts both background loops. Idempotent: each loop guards its own
    /// `start()` against being called twice.
    pub fn start(&self) {
        self.scheduler.clone().start();
        self.monitor.clone().start();
    }

    /// Stops both loops. Does not wait for an in-flight tick to finish —
    /// the loops themselves let a started attempt run to completion.
    pub fn stop(&self) {
        self.scheduler.stop();
        self.monitor.stop();
    }
}

/// `TelegramNotifier` if both `TELEGRAM_BOT_TOKEN` and `TELEGRAM_CHAT_ID`
/// are set, else `NullNotifier`.
fn build_notifier() -> Arc<dyn Notifier> {
    let token = std::env::var("TELEGRAM_BOT_TOKEN").ok().filter(|s| !s.is_empty());
    let chat_id = std::env::var("TELEGRAM_CHAT_ID").ok().filter(|s| !s.is_empty());
    match (token, chat_id) {
        (Some(token), Some(chat_id)) => Arc::new(TelegramNotifier::new(token, chat_id)),
        _ => Arc::new(NullNotifier),
    }
}
