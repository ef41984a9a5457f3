//! Scenario B: multiple datacenters simultaneously available —
//! the earliest entry in `task.datacenters` must win.

use std::sync::Arc;

use ovh_testkit::{sample_account, ScriptedOrderDriver, ScriptedOutcome, ScenarioHarness, TaskBuilder};

#[tokio::test]
async fn order_is_placed_in_the_highest_priority_available_dc() {
    let prober = Arc::new(ovh_testkit::ScriptedProber::always_available());
    let order_driver = Arc::new(ScriptedOrderDriver::with_outcomes(vec![ScriptedOutcome::Ok(
        ScriptedOrderDriver::succeeding("ord_1"),
    )]));

    let harness = ScenarioHarness::new(prober, order_driver)
        .with_account(sample_account("acct_1"))
        .await;
    let (harness, task_id) = harness
        .with_task(
            TaskBuilder::new("acct_1", "24sk202", vec!["rbx".to_string(), "gra".to_string()]).build(),
        )
        .await;

    harness.tick().await;

    let history = harness.store.history_snapshot().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].datacenter, "rbx", "first-listed dc must win when both are available");

    let task = harness.store.find_task(task_id).await.unwrap();
    assert_eq!(task.purchased, 1);
}
