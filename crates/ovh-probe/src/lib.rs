//! Availability Probe (C4).
//!
//! Given `(plan, options, datacenters)` for an account, returns per-DC
//! availability. Backed by OVH's availability endpoint, which returns one
//! row per plan+option combination (`fqn`); the probe computes the same
//! option-fingerprint for the row and for the caller's requested options to
//! pick the matching row, and returns `unknown` for every DC when no row's
//! fingerprint matches.
//!
//! Results are cached in-memory, bounded to 256 entries, keyed by
//! `(region, plan_code, fingerprint)` with a TTL shorter than any
//! reasonable retry interval — this coalesces duplicate probes issued by
//! the queue scheduler and the availability monitor within one tick, it
//! does not batch across ticks.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;

use ovh_client::{OvhApiError, OvhClient};
use ovh_schemas::{Account, Availability};

/// Seam the scheduler and monitor depend on, so tests can plug in a
/// deterministic fake instead of a live `AvailabilityProbe` + `OvhClient`.
#[async_trait]
pub trait AvailabilityProber: Send + Sync {
    async fn probe(
        &self,
        client: &OvhClient,
        account: &Account,
        plan_code: &str,
        options: &[String],
        datacenters: &[String],
    ) -> Result<BTreeMap<String, Availability>, OvhApiError>;
}

/// Cache entry TTL. Shorter than `MIN_RETRY_INTERVAL_SECS` so a tick never
/// serves a stale reading across its own retry boundary.
pub const CACHE_TTL: Duration = Duration::from_secs(30);
/// Bound on the number of cached `(region, plan, fingerprint)` entries.
pub const CACHE_CAPACITY: usize = 256;

/// Stable hash of the sorted option-code set ("fingerprint").
pub fn fingerprint(options: &[String]) -> u64 {
    let mut sorted: Vec<&str> = options.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    let mut hasher = DefaultHasher::new();
    for opt in sorted {
        opt.hash(&mut hasher);
    }
    hasher.finish()
}

/// Recovers the option-code tokens embedded in an availability row's `fqn`
/// (OVH encodes `<planCode>.<option1>.<option2>...` in the fully-qualified
/// name), so the row's own fingerprint can be compared against the
/// caller's.
fn row_option_codes(plan_code: &str, fqn: &str) -> Vec<String> {
    fqn.strip_prefix(plan_code)
        .unwrap_or(fqn)
        .trim_start_matches('.')
        .split('.')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize)]
struct DatacenterAvailabilityRow {
    datacenter: String,
    availability: String,
}

#[derive(Debug, Deserialize)]
struct AvailabilityRow {
    #[serde(rename = "planCode")]
    plan_code: String,
    fqn: String,
    datacenters: Vec<DatacenterAvailabilityRow>,
}

#[derive(Clone)]
struct CacheEntry {
    inserted_at: Instant,
    readings: BTreeMap<String, Availability>,
}

#[derive(Hash, PartialEq, Eq, Clone)]
struct CacheKey {
    region: &'static str,
    plan_code: String,
    fingerprint: u64,
}

#[derive(Default)]
struct Cache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl Cache {
    fn get(&self, key: &CacheKey) -> Option<BTreeMap<String, Availability>> {
        let entries = self.entries.lock().unwrap();
        entries.get(key).and_then(|e| {
            if e.inserted_at.elapsed() < CACHE_TTL {
                Some(e.readings.clone())
            } else {
                None
            }
        })
    }

    fn put(&self, key: CacheKey, readings: BTreeMap<String, Availability>) {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= CACHE_CAPACITY && !entries.contains_key(&key) {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, v)| v.inserted_at)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
            }
        }
        entries.insert(
            key,
            CacheEntry {
                inserted_at: Instant::now(),
                readings,
            },
        );
    }
}

pub struct AvailabilityProbe {
    cache: Cache,
}

impl Default for AvailabilityProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl AvailabilityProbe {
    pub fn new() -> Self {
        Self { cache: Cache::default() }
    }

    /// Probes availability for `plan_code`/`options` across `datacenters`
    /// (empty means "return whatever the upstream row lists"). Uses the
    /// in-memory cache when fresh; otherwise issues one HTTP call through
    /// `client` and caches the result.
    pub async fn probe(
        &self,
        client: &OvhClient,
        account: &Account,
        plan_code: &str,
        options: &[String],
        datacenters: &[String],
    ) -> Result<BTreeMap<String, Availability>, OvhApiError> {
        let fp = fingerprint(options);
        let key = CacheKey {
            region: region_tag(account),
            plan_code: plan_code.to_string(),
            fingerprint: fp,
        };

        if let Some(cached) = self.cache.get(&key) {
            return Ok(filter_dcs(cached, datacenters));
        }

        let path = format!("/dedicated/server/availabilities?planCode={plan_code}");
        let rows: Vec<AvailabilityRow> = client.do_request::<(), _>(Method::GET, &path, None).await?;

        let mut readings = BTreeMap::new();
        for row in &rows {
            if row.plan_code != plan_code {
                continue;
            }
            if fingerprint(&row_option_codes(plan_code, &row.fqn)) != fp {
                continue;
            }
            for dc in &row.datacenters {
                readings.insert(dc.datacenter.clone(), Availability::from_ovh_bucket(&dc.availability));
            }
        }

        self.cache.put(key, readings.clone());
        Ok(filter_dcs(readings, datacenters))
    }
}

#[async_trait]
impl AvailabilityProber for AvailabilityProbe {
    async fn probe(
        &self,
        client: &OvhClient,
        account: &Account,
        plan_code: &str,
        options: &[String],
        datacenters: &[String],
    ) -> Result<BTreeMap<String, Availability>, OvhApiError> {
        AvailabilityProbe::probe(self, client, account, plan_code, options, datacenters).await
    }
}

fn region_tag(account: &Account) -> &'static str {
    match account.endpoint_region {
        ovh_schemas::EndpointRegion::OvhEu => "ovh-eu",
        ovh_schemas::EndpointRegion::OvhUs => "ovh-us",
        ovh_schemas::EndpointRegion::OvhCa => "ovh-ca",
    }
}

/// Restricts the reading map to the requested DCs (unknown for any DC that
/// never appeared in the upstream response), or returns everything the
/// upstream listed when `datacenters` is empty (subscription "all DCs").
fn filter_dcs(readings: BTreeMap<String, Availability>, datacenters: &[String]) -> BTreeMap<String, Availability> {
    if datacenters.is_empty() {
        return readings;
    }
    datacenters
        .iter()
        .map(|dc| (dc.clone(), *readings.get(dc).unwrap_or(&Availability::Unknown)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_order_independent() {
        let a = fingerprint(&["ram-64g".to_string(), "softraid-2x480".to_string()]);
        let b = fingerprint(&["softraid-2x480".to_string(), "ram-64g".to_string()]);
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_distinguishes_option_sets() {
        let a = fingerprint(&["ram-64g".to_string()]);
        let b = fingerprint(&["ram-128g".to_string()]);
        assert_ne!(a, b);
    }

    #[test]
    fn row_option_codes_strips_plan_prefix() {
        let codes = row_option_codes("24sk202", "24sk202.ram-64g.softraid-2x480");
        assert_eq!(codes, vec!["ram-64g", "softraid-2x480"]);
    }

    #[test]
    fn filter_dcs_returns_unknown_for_unlisted_dc() {
        let mut readings = BTreeMap::new();
        readings.insert("gra".to_string(), Availability::Available);
        let out = filter_dcs(readings, &["gra".to_string(), "sbg".to_string()]);
        assert_eq!(out.get("gra"), Some(&Availability::Available));
        assert_eq!(out.get("sbg"), Some(&Availability::Unknown));
    }

    #[test]
    fn cache_put_then_get_round_trips_within_ttl() {
        let cache = Cache::default();
        let key = CacheKey { region: "ovh-eu", plan_code: "24sk202".to_string(), fingerprint: 1 };
        let mut readings = BTreeMap::new();
        readings.insert("gra".to_string(), Availability::Available);
        cache.put(key.clone(), readings.clone());
        assert_eq!(cache.get(&key), Some(readings));
    }

    #[test]
    fn cache_evicts_oldest_entry_past_capacity() {
        let cache = Cache::default();
        for i in 0..(CACHE_CAPACITY + 1) {
            let key = CacheKey { region: "ovh-eu", plan_code: format!("plan{i}"), fingerprint: i as u64 };
            cache.put(key, BTreeMap::new());
        }
        assert_eq!(cache.entries.lock().unwrap().len(), CACHE_CAPACITY);
    }
}
