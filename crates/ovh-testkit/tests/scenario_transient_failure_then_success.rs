//! Scenario D: a 503 on tick 1, success on tick 2. Expected:
//! one success history entry, `failureCount == 1` recorded from the
//! transient branch, and the task still completes.

use std::sync::Arc;

use ovh_order::OrderError;
use ovh_schemas::TaskStatus;
use ovh_testkit::{sample_account, ScenarioHarness, ScriptedOrderDriver, ScriptedOutcome, TaskBuilder};

#[tokio::test]
async fn transient_five_xx_then_success_completes_task_with_failure_count_recorded() {
    let prober = Arc::new(ovh_testkit::ScriptedProber::always_available());
    let order_driver = Arc::new(ScriptedOrderDriver::with_outcomes(vec![
        ScriptedOutcome::Err(OrderError::Server("upstream 503".to_string())),
        ScriptedOutcome::Ok(ScriptedOrderDriver::succeeding("ord_1")),
    ]));

    let harness = ScenarioHarness::new(prober, order_driver)
        .with_account(sample_account("acct_1"))
        .await;
    let (harness, task_id) =
        harness.with_task(TaskBuilder::new("acct_1", "24sk202", vec!["gra".to_string()]).build()).await;

    // Tick 1: transient failure, task stays running.
    harness.tick().await;
    let task = harness.store.find_task(task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Running);
    assert_eq!(task.failure_count, 1);
    assert_eq!(task.purchased, 0);
    assert!(harness.store.history_snapshot().await.is_empty());

    // Tick 2: succeeds.
    harness.force_due_and_tick(task_id).await;
    let task = harness.store.find_task(task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.purchased, 1);
    assert_eq!(task.failure_count, 1, "failure_count from tick 1 is retained, not reset");

    let history = harness.store.history_snapshot().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].sequence, 1);
    assert_eq!(history[0].order_id.as_deref(), Some("ord_1"));
}
