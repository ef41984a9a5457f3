//! Scenario C6: a watched subscription's datacenter flips
//! from unavailable to available between two monitor passes. Expected: a
//! `BecameAvailable` history event is recorded and the configured notifier
//! fires exactly once.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use ovh_client::OvhClientPool;
use ovh_notify::RecordingNotifier;
use ovh_schemas::{Availability, ChangeType, Subscription};
use ovh_scheduler::AvailabilityMonitor;
use ovh_store::Store;
use ovh_testkit::{sample_account, ScriptedProber};

#[tokio::test]
async fn availability_flip_is_recorded_and_notified_once() {
    let tempdir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::load(tempdir.path()).unwrap());
    store.mutate_accounts(|a| { a.push(sample_account("acct_1")); Ok(()) }).await.unwrap();

    let subscription = Subscription {
        id: Uuid::new_v4(),
        account_id: Some("acct_1".to_string()),
        plan_code: "24sk202".to_string(),
        ovh_subsidiary: "IE".to_string(),
        datacenters: vec!["gra".to_string()],
        monitor_linux: true,
        monitor_windows: false,
        notify_available: true,
        notify_unavailable: true,
        last_status: BTreeMap::new(),
        history: vec![],
        created_at: Utc::now(),
    };
    let subscription_id = subscription.id;
    store.mutate_subscriptions(|subs| { subs.push(subscription); Ok(()) }).await.unwrap();

    let prober = Arc::new(ScriptedProber::new());
    prober.script("24sk202", "gra", vec![Availability::Unavailable, Availability::Available]);
    let notifier = Arc::new(RecordingNotifier::default());

    let monitor = AvailabilityMonitor::new(
        store.clone(),
        Arc::new(OvhClientPool::new()),
        prober,
        notifier.clone(),
        30,
    );

    // First pass: still unavailable, no change from the zero-value default
    // (`last_status` starts empty, so "unavailable" is *not* a change —
    // there's nothing to diff against yet).
    monitor.run_once().await;
    let subs = store.subscriptions_snapshot().await;
    assert!(subs[0].history.is_empty(), "first-ever reading seeds last_status, it isn't a change");
    assert_eq!(notifier.sent.lock().unwrap().len(), 0);

    // Second pass: flips to available.
    monitor.run_once().await;
    let subs = store.subscriptions_snapshot().await;
    let sub = subs.iter().find(|s| s.id == subscription_id).unwrap();
    assert_eq!(sub.history.len(), 1);
    assert_eq!(sub.history[0].change_type, ChangeType::BecameAvailable);
    assert_eq!(sub.history[0].datacenter, "gra");
    let sent = notifier.sent.lock().unwrap();
    assert_eq!(sent.len(), 1, "notify_available fires exactly once on the flip");
    assert!(sent[0].contains("available"));

    // Status is available now.
    assert!(sub.last_status.get("gra").unwrap().available);
}
