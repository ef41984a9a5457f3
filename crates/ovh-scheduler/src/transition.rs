//! Pure, IO-free QueueTask tick transitions — the state machine governing
//! one tick attempt, stripped of every IO concern (probe call, order call,
//! store write). `scheduler.rs` reduces whatever happened on the wire down
//! to one [`TickEvent`] and asks this module what to do about it: one match
//! arm per edge in the diagram, nothing here touches the clock or the
//! network.

use ovh_schemas::TaskStatus;

/// What happened during one tick attempt for a task, abstracted away from
/// *how* (a 409 vs. a probe-says-unavailable both collapse to the same
/// branches below).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickEvent {
    /// Step 4: none of the task's datacenters read `available` this tick.
    NoDatacenterAvailable,
    /// Step 7: OVH rejected add-to-cart — another buyer won the race.
    StockRace,
    /// Step 6: the order was placed. `completes_task` is
    /// `purchased + 1 == quantity`.
    OrderSucceeded { completes_task: bool },
    /// Step 8: 5xx, network error, or whole-sequence timeout.
    Transient,
    /// 429 from any OVH call in this tick.
    RateLimited,
    /// Step 9: 401/403 or plan/dc not found.
    Fatal,
}

/// The bookkeeping a tick event implies, independent of the actual store
/// write. `next_attempt_delay_secs = None` means "leave nextAttemptAt
/// alone" (the task is terminal this tick, either completed or failed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickEffect {
    pub new_status: Option<TaskStatus>,
    pub increment_retry_count: bool,
    pub increment_failure_count: bool,
    pub increment_purchased: bool,
    pub next_attempt_delay_secs: Option<u64>,
}

/// Maps one [`TickEvent`] to its [`TickEffect`]. `retry_interval_secs` is
/// the task's configured cadence; `rate_limit_backoff_secs` is whatever
/// `backoff::rate_limit_backoff_secs` computed for this attempt (only used
/// by the `RateLimited` arm).
pub fn decide(event: TickEvent, retry_interval_secs: u64, rate_limit_backoff_secs: u64) -> TickEffect {
    match event {
        TickEvent::NoDatacenterAvailable => TickEffect {
            new_status: None,
            increment_retry_count: true,
            increment_failure_count: false,
            increment_purchased: false,
            next_attempt_delay_secs: Some(retry_interval_secs),
        },
        TickEvent::StockRace => TickEffect {
            new_status: None,
            increment_retry_count: true,
            increment_failure_count: true,
            increment_purchased: false,
            next_attempt_delay_secs: Some(retry_interval_secs),
        },
        TickEvent::OrderSucceeded { completes_task } => TickEffect {
            // `None` when the task doesn't complete: the task was already
            // `Running` when this tick picked it up, and forcing it back to
            // `Running` here would clobber a `paused` set by the operator
            // while this attempt was in flight — pause takes effect at the
            // next tick boundary, not by being overwritten by the attempt
            // that was already underway.
            new_status: if completes_task { Some(TaskStatus::Completed) } else { None },
            increment_retry_count: false,
            increment_failure_count: false,
            increment_purchased: true,
            next_attempt_delay_secs: if completes_task { None } else { Some(retry_interval_secs) },
        },
        TickEvent::Transient => TickEffect {
            new_status: None,
            increment_retry_count: false,
            increment_failure_count: true,
            increment_purchased: false,
            next_attempt_delay_secs: Some(retry_interval_secs),
        },
        TickEvent::RateLimited => TickEffect {
            new_status: None,
            increment_retry_count: false,
            increment_failure_count: true,
            increment_purchased: false,
            next_attempt_delay_secs: Some(rate_limit_backoff_secs),
        },
        TickEvent::Fatal => TickEffect {
            new_status: Some(TaskStatus::Failed),
            increment_retry_count: false,
            increment_failure_count: false,
            increment_purchased: false,
            next_attempt_delay_secs: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_dc_available_only_increments_retry_count() {
        let effect = decide(TickEvent::NoDatacenterAvailable, 30, 0);
        assert!(effect.increment_retry_count);
        assert!(!effect.increment_failure_count);
        assert_eq!(effect.next_attempt_delay_secs, Some(30));
    }

    #[test]
    fn stock_race_increments_both_counters() {
        let effect = decide(TickEvent::StockRace, 30, 0);
        assert!(effect.increment_retry_count);
        assert!(effect.increment_failure_count);
    }

    #[test]
    fn order_success_completing_task_clears_next_attempt() {
        let effect = decide(TickEvent::OrderSucceeded { completes_task: true }, 30, 0);
        assert_eq!(effect.new_status, Some(TaskStatus::Completed));
        assert_eq!(effect.next_attempt_delay_secs, None);
        assert!(effect.increment_purchased);
    }

    #[test]
    fn order_success_mid_quantity_leaves_status_untouched() {
        let effect = decide(TickEvent::OrderSucceeded { completes_task: false }, 30, 0);
        assert_eq!(effect.new_status, None, "must not clobber a concurrent pause");
        assert_eq!(effect.next_attempt_delay_secs, Some(30));
    }

    #[test]
    fn rate_limited_uses_backoff_not_retry_interval() {
        let effect = decide(TickEvent::RateLimited, 30, 120);
        assert_eq!(effect.next_attempt_delay_secs, Some(120));
    }

    #[test]
    fn fatal_never_retries() {
        let effect = decide(TickEvent::Fatal, 30, 0);
        assert_eq!(effect.new_status, Some(TaskStatus::Failed));
        assert_eq!(effect.next_attempt_delay_secs, None);
    }

    #[test]
    fn transient_never_transitions_to_failed() {
        let effect = decide(TickEvent::Transient, 30, 0);
        assert_eq!(effect.new_status, None);
    }
}
