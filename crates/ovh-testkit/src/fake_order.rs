//! A scriptable [`CartOrderDriver`] for deterministic scenario tests, same
//! spirit as [`crate::fake_probe::ScriptedProber`]: callers queue up the
//! outcomes they want `place_order` to return, one per call, in order.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::Notify;

use ovh_order::{CartOrderDriver, OrderError, OrderOutcome};
use ovh_schemas::Account;

pub enum ScriptedOutcome {
    Ok(OrderOutcome),
    Err(OrderError),
}

/// Plays back a fixed script of order outcomes, one per `place_order` call.
/// If the script runs dry, the last outcome is repeated (mirrors
/// `ScriptedProber`'s sticky-last-value behavior) so a scenario doesn't
/// have to script more ticks than it cares about.
#[derive(Default)]
pub struct ScriptedOrderDriver {
    script: Mutex<VecDeque<ScriptedOutcome>>,
    last_was_ok: Mutex<bool>,
    /// Set once the first call has started, so a test can synchronize on
    /// "the attempt is in flight" (Scenario F: pause during flight).
    call_started: Notify,
    /// The first call blocks here until released, letting a test mutate
    /// task state mid-attempt before the order "completes".
    release_first_call: Mutex<Option<std::sync::Arc<Notify>>>,
}

impl ScriptedOrderDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcomes(outcomes: Vec<ScriptedOutcome>) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
            ..Self::default()
        }
    }

    pub fn push(&self, outcome: ScriptedOutcome) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn succeeding(order_id: &str) -> OrderOutcome {
        OrderOutcome {
            order_id: order_id.to_string(),
            order_url: format!("https://example.invalid/order/{order_id}"),
            price: None,
            payment_failed: None,
        }
    }

    /// Arranges for the first `place_order` call to block until
    /// `release_first_call` is invoked, so a test can observe the attempt
    /// mid-flight before it resolves (Scenario F).
    pub fn block_first_call(&self) -> std::sync::Arc<Notify> {
        let gate = std::sync::Arc::new(Notify::new());
        *self.release_first_call.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Resolves once the first `place_order` call has started executing.
    pub async fn wait_for_call_started(&self) {
        self.call_started.notified().await;
    }
}

#[async_trait]
impl CartOrderDriver for ScriptedOrderDriver {
    async fn place_order(
        &self,
        _account: &Account,
        _plan_code: &str,
        _datacenter: &str,
        _options: &[String],
        _auto_pay: bool,
    ) -> Result<OrderOutcome, OrderError> {
        self.call_started.notify_waiters();
        if let Some(gate) = self.release_first_call.lock().unwrap().take() {
            gate.notified().await;
        }

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(ScriptedOutcome::Ok(outcome)) => {
                *self.last_was_ok.lock().unwrap() = true;
                Ok(outcome)
            }
            Some(ScriptedOutcome::Err(e)) => {
                *self.last_was_ok.lock().unwrap() = false;
                Err(e)
            }
            None if *self.last_was_ok.lock().unwrap() => {
                Ok(Self::succeeding("ord_repeat"))
            }
            None => Err(OrderError::Server("scripted driver exhausted".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plays_back_outcomes_in_order() {
        let driver = ScriptedOrderDriver::with_outcomes(vec![
            ScriptedOutcome::Err(OrderError::Server("503".into())),
            ScriptedOutcome::Ok(ScriptedOrderDriver::succeeding("ord_1")),
        ]);
        let account = sample_account();

        let first = driver.place_order(&account, "24sk202", "gra", &[], false).await;
        assert!(matches!(first, Err(OrderError::Server(_))));

        let second = driver.place_order(&account, "24sk202", "gra", &[], false).await;
        assert!(matches!(second, Ok(ref o) if o.order_id == "ord_1"));
    }

    fn sample_account() -> Account {
        Account {
            id: "acct_1".into(),
            alias: "main".into(),
            zone: "IE".into(),
            endpoint_region: ovh_schemas::EndpointRegion::OvhEu,
            application_key: "ak".into(),
            application_secret: "as".into(),
            consumer_key: "ck".into(),
            created_at: chrono::Utc::now(),
        }
    }
}
