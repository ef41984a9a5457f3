//! OVH Client Pool (C1).
//!
//! One authenticated `reqwest::Client` per account, cached by account id.
//! Builds the OVH application-signing headers on every request and maps
//! non-2xx responses onto the typed [`OvhApiError`] taxonomy. Thread-safe;
//! no request caching here (that lives in `ovh-probe`).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::Serialize;
use sha1::{Digest, Sha1};
use tokio::sync::Mutex;

use ovh_schemas::Account;

/// Per-HTTP-call timeout.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(20);

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum OvhApiError {
    /// 401/403 — task should transition to `failed`.
    Auth { status: u16, message: String },
    /// 404 — plan or datacenter configuration is wrong.
    NotFound { status: u16, message: String },
    /// 409 — retry next tick.
    Conflict { status: u16, message: String },
    /// 429 — back off, see `ovh-scheduler`'s backoff helper.
    RateLimit { status: u16, message: String },
    /// 5xx — transient, retry next tick.
    Server { status: u16, message: String },
    /// Any other non-2xx status not covered above.
    Other { status: u16, message: String },
    /// Call exceeded `CALL_TIMEOUT` or the network failed outright.
    Network(String),
}

impl OvhApiError {
    fn from_status(status: StatusCode, body: &str) -> Self {
        let code = status.as_u16();
        let message = truncate(body, 500);
        match code {
            401 | 403 => OvhApiError::Auth { status: code, message },
            404 => OvhApiError::NotFound { status: code, message },
            409 => OvhApiError::Conflict { status: code, message },
            429 => OvhApiError::RateLimit { status: code, message },
            500..=599 => OvhApiError::Server { status: code, message },
            _ => OvhApiError::Other { status: code, message },
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max).collect();
        out.push_str("...");
        out
    }
}

impl std::fmt::Display for OvhApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OvhApiError::Auth { status, message } => write!(f, "auth error ({status}): {message}"),
            OvhApiError::NotFound { status, message } => write!(f, "not found ({status}): {message}"),
            OvhApiError::Conflict { status, message } => write!(f, "conflict ({status}): {message}"),
            OvhApiError::RateLimit { status, message } => write!(f, "rate limited ({status}): {message}"),
            OvhApiError::Server { status, message } => write!(f, "server error ({status}): {message}"),
            OvhApiError::Other { status, message } => write!(f, "unexpected status ({status}): {message}"),
            OvhApiError::Network(msg) => write!(f, "network error: {msg}"),
        }
    }
}

impl std::error::Error for OvhApiError {}

// ---------------------------------------------------------------------------
// Request signing
// ---------------------------------------------------------------------------

/// Builds the `X-Ovh-Signature` header value: `$1$<sha1 hex>` over
/// `app_secret+consumer_key+method+url+body+timestamp`.
fn sign(app_secret: &str, consumer_key: &str, method: &str, url: &str, body: &str, timestamp: i64) -> String {
    let preimage = format!("{app_secret}+{consumer_key}+{method}+{url}+{body}+{timestamp}");
    let mut hasher = Sha1::new();
    hasher.update(preimage.as_bytes());
    format!("$1${}", hex::encode(hasher.finalize()))
}

// ---------------------------------------------------------------------------
// OvhClient
// ---------------------------------------------------------------------------

pub struct OvhClient {
    http: reqwest::Client,
    account: Account,
}

impl OvhClient {
    pub fn new(account: Account) -> Self {
        let http = reqwest::Client::builder()
            .timeout(CALL_TIMEOUT)
            .build()
            .expect("reqwest client builder should not fail with no custom TLS config");
        Self { http, account }
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Issues a signed request against `path` (relative to the account's
    /// region root). Returns the parsed JSON body on 2xx, or a typed
    /// [`OvhApiError`] otherwise. Honors `CALL_TIMEOUT` for the whole call.
    pub async fn do_request<B: Serialize, R: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<R, OvhApiError> {
        let url = format!("{}{}", self.account.endpoint_region.api_root(), path);
        let body_str = match body {
            Some(b) => serde_json::to_string(b).map_err(|e| OvhApiError::Network(e.to_string()))?,
            None => String::new(),
        };

        let timestamp = chrono::Utc::now().timestamp();
        let signature = sign(
            &self.account.application_secret,
            &self.account.consumer_key,
            method.as_str(),
            &url,
            &body_str,
            timestamp,
        );

        let mut req = self
            .http
            .request(method, &url)
            .header("X-Ovh-Application", &self.account.application_key)
            .header("X-Ovh-Consumer", &self.account.consumer_key)
            .header("X-Ovh-Timestamp", timestamp.to_string())
            .header("X-Ovh-Signature", signature)
            .header("Content-Type", "application/json");

        if body.is_some() {
            req = req.body(body_str);
        }

        let resp = tokio::time::timeout(CALL_TIMEOUT, req.send())
            .await
            .map_err(|_| OvhApiError::Network("request timed out".to_string()))?
            .map_err(|e| OvhApiError::Network(e.to_string()))?;

        let status = resp.status();
        let raw = resp.text().await.map_err(|e| OvhApiError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(OvhApiError::from_status(status, &raw));
        }

        if raw.is_empty() {
            // Some OVH endpoints (e.g. assign) return an empty 200 body.
            return serde_json::from_str("null").map_err(|e| OvhApiError::Network(e.to_string()));
        }

        serde_json::from_str(&raw).map_err(|e| OvhApiError::Network(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// OvhClientPool
// ---------------------------------------------------------------------------

/// One client per account, cached by account id. Thread-safe.
#[derive(Default)]
pub struct OvhClientPool {
    clients: Mutex<HashMap<String, Arc<OvhClient>>>,
}

impl OvhClientPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached client for this account, creating one if absent.
    pub async fn get_or_create(&self, account: &Account) -> Arc<OvhClient> {
        let mut clients = self.clients.lock().await;
        clients
            .entry(account.id.clone())
            .or_insert_with(|| Arc::new(OvhClient::new(account.clone())))
            .clone()
    }

    /// Drops a cached client, e.g. after the backing account is deleted.
    pub async fn evict(&self, account_id: &str) {
        self.clients.lock().await.remove(account_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_has_dollar_one_prefix_and_is_stable_for_same_inputs() {
        let a = sign("secret", "consumer", "POST", "https://eu.api.ovh.com/1.0/order/cart", "{}", 1_700_000_000);
        let b = sign("secret", "consumer", "POST", "https://eu.api.ovh.com/1.0/order/cart", "{}", 1_700_000_000);
        assert_eq!(a, b);
        assert!(a.starts_with("$1$"));
        assert_eq!(a.len(), 3 + 40); // $1$ + 40 hex chars (SHA1 digest)
    }

    #[test]
    fn signature_changes_with_timestamp() {
        let a = sign("secret", "consumer", "POST", "url", "{}", 1);
        let b = sign("secret", "consumer", "POST", "url", "{}", 2);
        assert_ne!(a, b);
    }

    #[test]
    fn status_mapping_matches_error_taxonomy() {
        assert!(matches!(
            OvhApiError::from_status(StatusCode::UNAUTHORIZED, ""),
            OvhApiError::Auth { .. }
        ));
        assert!(matches!(
            OvhApiError::from_status(StatusCode::FORBIDDEN, ""),
            OvhApiError::Auth { .. }
        ));
        assert!(matches!(
            OvhApiError::from_status(StatusCode::NOT_FOUND, ""),
            OvhApiError::NotFound { .. }
        ));
        assert!(matches!(
            OvhApiError::from_status(StatusCode::CONFLICT, ""),
            OvhApiError::Conflict { .. }
        ));
        assert!(matches!(
            OvhApiError::from_status(StatusCode::TOO_MANY_REQUESTS, ""),
            OvhApiError::RateLimit { .. }
        ));
        assert!(matches!(
            OvhApiError::from_status(StatusCode::INTERNAL_SERVER_ERROR, ""),
            OvhApiError::Server { .. }
        ));
        assert!(matches!(
            OvhApiError::from_status(StatusCode::BAD_REQUEST, ""),
            OvhApiError::Other { .. }
        ));
    }

    #[tokio::test]
    async fn pool_caches_client_by_account_id() {
        let pool = OvhClientPool::new();
        let account = Account {
            id: "acct_1".into(),
            alias: "main".into(),
            zone: "IE".into(),
            endpoint_region: ovh_schemas::EndpointRegion::OvhEu,
            application_key: "ak".into(),
            application_secret: "as".into(),
            consumer_key: "ck".into(),
            created_at: chrono::Utc::now(),
        };
        let a = pool.get_or_create(&account).await;
        let b = pool.get_or_create(&account).await;
        assert!(Arc::ptr_eq(&a, &b));
    }
}
