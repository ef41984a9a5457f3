//! Scenario F: operator pauses a task while an attempt is
//! mid-checkout. Expected: the in-flight attempt finishes and records its
//! outcome; the pause is not clobbered by the attempt's own bookkeeping,
//! and no further ticks touch the task until it's resumed.

use std::sync::Arc;

use ovh_schemas::TaskStatus;
use ovh_testkit::{sample_account, ScenarioHarness, ScriptedOrderDriver, TaskBuilder};

#[tokio::test]
async fn pause_mid_attempt_is_preserved_after_the_attempt_completes() {
    let prober = Arc::new(ovh_testkit::ScriptedProber::always_available());
    let order_driver = Arc::new(ScriptedOrderDriver::new());
    order_driver.push(ovh_testkit::ScriptedOutcome::Ok(ScriptedOrderDriver::succeeding("ord_1")));
    let gate = order_driver.block_first_call();

    // quantity=2 so a single successful unit does not itself complete the
    // task — otherwise the terminal `Completed` transition would mask
    // whether the pause survived.
    let harness = ScenarioHarness::new(prober, order_driver.clone())
        .with_account(sample_account("acct_1"))
        .await;
    let (harness, task_id) = harness
        .with_task(TaskBuilder::new("acct_1", "24sk202", vec!["gra".to_string()]).quantity(2).build())
        .await;

    let harness = Arc::new(harness);
    let tick_handle = {
        let harness = harness.clone();
        tokio::spawn(async move { harness.tick().await })
    };

    order_driver.wait_for_call_started().await;

    // Operator pauses while the attempt is still inside place_order.
    harness
        .store
        .mutate_queue(|tasks| {
            if let Some(t) = tasks.iter_mut().find(|t| t.id == task_id) {
                t.status = TaskStatus::Paused;
            }
            Ok(())
        })
        .await
        .unwrap();

    gate.notify_waiters();
    tick_handle.await.unwrap();

    let task = harness.store.find_task(task_id).await.unwrap();
    assert_eq!(task.purchased, 1, "the in-flight attempt still recorded its outcome");
    assert_eq!(task.status, TaskStatus::Paused, "the pause must survive the attempt's own bookkeeping");

    let history = harness.store.history_snapshot().await;
    assert_eq!(history.len(), 1);

    // A further tick must not pick up a paused task.
    harness.force_due_and_tick(task_id).await;
    assert_eq!(harness.store.history_snapshot().await.len(), 1, "paused task must not be retried");
}
