//! A scriptable [`AvailabilityProber`] with no randomness and no timestamps:
//! every call pops the next scripted reading for a datacenter, keyed
//! deterministically, rather than hitting the network.
//!
//! Scenarios script availability per `(plan_code, datacenter)` key as a
//! queue; once a queue is exhausted, the last value served is repeated
//! (so a test doesn't have to script every tick out to infinity).

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use ovh_client::{OvhApiError, OvhClient};
use ovh_probe::AvailabilityProber;
use ovh_schemas::{Account, Availability};

#[derive(Default)]
pub struct ScriptedProber {
    scripts: Mutex<HashMap<(String, String), VecDeque<Availability>>>,
    /// Sticky last-served value per key, used once a script runs dry.
    last: Mutex<HashMap<(String, String), Availability>>,
}

impl ScriptedProber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a prober where every datacenter reads `Available` on every
    /// call (Scenario B/C's steady-state assumption).
    pub fn always_available() -> Self {
        Self::new()
    }

    /// Scripts the sequence of readings `probe` will return for
    /// `(plan_code, datacenter)`, one per call, in order.
    pub fn script(&self, plan_code: &str, datacenter: &str, readings: Vec<Availability>) {
        self.scripts
            .lock()
            .unwrap()
            .insert((plan_code.to_string(), datacenter.to_string()), readings.into());
    }

    fn next_reading(&self, plan_code: &str, dc: &str) -> Availability {
        let key = (plan_code.to_string(), dc.to_string());
        let mut scripts = self.scripts.lock().unwrap();
        let reading = match scripts.get_mut(&key).and_then(|q| q.pop_front()) {
            Some(r) => r,
            None => *self.last.lock().unwrap().get(&key).unwrap_or(&Availability::Available),
        };
        self.last.lock().unwrap().insert(key, reading);
        reading
    }
}

#[async_trait]
impl AvailabilityProber for ScriptedProber {
    async fn probe(
        &self,
        _client: &OvhClient,
        _account: &Account,
        plan_code: &str,
        _options: &[String],
        datacenters: &[String],
    ) -> Result<BTreeMap<String, Availability>, OvhApiError> {
        Ok(datacenters
            .iter()
            .map(|dc| (dc.clone(), self.next_reading(plan_code, dc)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_readings_are_served_in_order_then_stick() {
        let prober = ScriptedProber::new();
        prober.script("24sk202", "gra", vec![Availability::Unavailable, Availability::Available]);

        let client = OvhClient::new(sample_account());
        let account = sample_account();

        let first = prober
            .probe(&client, &account, "24sk202", &[], &["gra".to_string()])
            .await
            .unwrap();
        assert_eq!(first["gra"], Availability::Unavailable);

        let second = prober
            .probe(&client, &account, "24sk202", &[], &["gra".to_string()])
            .await
            .unwrap();
        assert_eq!(second["gra"], Availability::Available);

        // Script exhausted: keeps repeating the last value.
        let third = prober
            .probe(&client, &account, "24sk202", &[], &["gra".to_string()])
            .await
            .unwrap();
        assert_eq!(third["gra"], Availability::Available);
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
