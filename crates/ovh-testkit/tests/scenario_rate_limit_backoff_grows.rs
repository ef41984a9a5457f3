//! repeated 429s must back off further
//! each time rather than retrying at the task's plain `retryInterval`.

use std::sync::Arc;

use chrono::Utc;

use ovh_order::OrderError;
use ovh_schemas::TaskStatus;
use ovh_testkit::{sample_account, ScenarioHarness, ScriptedOrderDriver, ScriptedOutcome, TaskBuilder};

#[tokio::test]
async fn consecutive_429s_push_next_attempt_further_out_each_time() {
    let prober = Arc::new(ovh_testkit::ScriptedProber::always_available());
    let order_driver = Arc::new(ScriptedOrderDriver::with_outcomes(vec![
        ScriptedOutcome::Err(OrderError::RateLimit("too many requests".to_string())),
        ScriptedOutcome::Err(OrderError::RateLimit("too many requests".to_string())),
    ]));

    let harness = ScenarioHarness::new(prober, order_driver)
        .with_account(sample_account("acct_1"))
        .await;
    let (harness, task_id) = harness
        .with_task(
            TaskBuilder::new("acct_1", "24sk202", vec!["gra".to_string()])
                .retry_interval_secs(30)
                .build(),
        )
        .await;

    harness.tick().await;
    let task = harness.store.find_task(task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Running, "rate limiting is never terminal");
    assert_eq!(task.failure_count, 1);
    let first_delay = (task.next_attempt_at - Utc::now()).num_seconds();
    assert!(first_delay >= 28, "first backoff stays near the base retry interval, got {first_delay}");

    harness.force_due_and_tick(task_id).await;
    let task = harness.store.find_task(task_id).await.unwrap();
    assert_eq!(task.failure_count, 2);
    let second_delay = (task.next_attempt_at - Utc::now()).num_seconds();
    assert!(
        second_delay > first_delay,
        "a second consecutive 429 must back off further than the first: {second_delay} vs {first_delay}"
    );

    assert!(harness.store.history_snapshot().await.is_empty(), "429s never record a purchase attempt");
}
