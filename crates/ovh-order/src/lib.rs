//! Cart/Order Driver (C3).
//!
//! A stateless protocol wrapper over OVH's order endpoints. One call
//! sequence per order attempt, strictly ordered:
//! create cart -> assign -> add item -> configure options -> validate ->
//! checkout. `CartOrderDriver` is the seam a fake implementation plugs
//! into for tests (mirrors a broker-adapter trait: one trait, one real
//! impl, one deterministic fake).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use ovh_client::{OvhApiError, OvhClient};
use ovh_schemas::{Account, Price};

/// Whole-sequence budget: create cart through checkout must finish inside
/// this. Individual steps still respect
/// `ovh_client::CALL_TIMEOUT` (20s) each.
pub const ORDER_SEQUENCE_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Clone)]
pub enum OrderError {
    CartCreateFailed(String),
    /// OVH rejected the add-to-cart for stock reasons — a race with another
    /// buyer, distinct from "no DC available" at the probe stage even
    /// though the scheduler folds both into the same retry path.
    NotAvailable,
    NotFound(String),
    Auth(String),
    Conflict(String),
    /// 429 from any step. Distinct from `Conflict` so the scheduler can
    /// apply the doubling backoff instead of a plain next-tick retry.
    RateLimit(String),
    Server(String),
    /// The whole create-cart..checkout sequence exceeded
    /// `ORDER_SEQUENCE_TIMEOUT`; the (possibly half-built) cart is abandoned.
    SequenceTimeout,
    Other(String),
}

impl From<OvhApiError> for OrderError {
    fn from(e: OvhApiError) -> Self {
        match e {
            OvhApiError::Auth { message, .. } => OrderError::Auth(message),
            OvhApiError::NotFound { message, .. } => OrderError::NotFound(message),
            OvhApiError::Conflict { message, .. } => OrderError::Conflict(message),
            OvhApiError::RateLimit { message, .. } => OrderError::RateLimit(message),
            OvhApiError::Server { message, .. } => OrderError::Server(message),
            OvhApiError::Network(message) => OrderError::Server(message),
            OvhApiError::Other { message, .. } => OrderError::Other(message),
        }
    }
}

impl std::fmt::Display for OrderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderError::CartCreateFailed(m) => write!(f, "cart create failed: {m}"),
            OrderError::NotAvailable => write!(f, "OVH rejected add-to-cart: not available"),
            OrderError::NotFound(m) => write!(f, "not found: {m}"),
            OrderError::Auth(m) => write!(f, "auth error: {m}"),
            OrderError::Conflict(m) => write!(f, "conflict: {m}"),
            OrderError::RateLimit(m) => write!(f, "rate limited: {m}"),
            OrderError::Server(m) => write!(f, "server error: {m}"),
            OrderError::SequenceTimeout => write!(f, "order sequence exceeded {:?}", ORDER_SEQUENCE_TIMEOUT),
            OrderError::Other(m) => write!(f, "order error: {m}"),
        }
    }
}

impl std::error::Error for OrderError {}

/// Result of a successful order attempt. `payment_failed` records the
/// edge case where autoPay failing at OVH still counts as a secured slot;
/// the failure is surfaced for the history entry only.
#[derive(Debug, Clone)]
pub struct OrderOutcome {
    pub order_id: String,
    pub order_url: String,
    pub price: Option<Price>,
    pub payment_failed: Option<String>,
}

#[async_trait]
pub trait CartOrderDriver: Send + Sync {
    async fn place_order(
        &self,
        account: &Account,
        plan_code: &str,
        datacenter: &str,
        options: &[String],
        auto_pay: bool,
    ) -> Result<OrderOutcome, OrderError>;
}

// ---------------------------------------------------------------------------
// Plan family inference
// ---------------------------------------------------------------------------

/// Which cart sub-endpoint an item goes under. OVH's catalog doesn't expose
/// this as a field on `QueueTask`, so it's inferred from the plan code's
/// naming convention. Kimsufi/eco-series codes ("…sk…") route through
/// `/eco`; everything else (standard dedicated, VPS) through
/// `/baremetalServers`. Recorded as an open decision in DESIGN.md — verify
/// against the live catalog before relying on it for a plan family this
/// heuristic hasn't seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanFamily {
    Eco,
    Standard,
}

pub fn infer_plan_family(plan_code: &str) -> PlanFamily {
    if plan_code.to_ascii_lowercase().contains("sk") {
        PlanFamily::Eco
    } else {
        PlanFamily::Standard
    }
}

impl PlanFamily {
    fn cart_segment(self) -> &'static str {
        match self {
            PlanFamily::Eco => "eco",
            PlanFamily::Standard => "baremetalServers",
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct CreateCartRequest<'a> {
    #[serde(rename = "ovhSubsidiary")]
    ovh_subsidiary: &'a str,
    description: &'a str,
}

#[derive(Deserialize)]
struct CreateCartResponse {
    #[serde(rename = "cartId")]
    cart_id: String,
}

#[derive(Serialize)]
struct ConfigurationItem {
    label: String,
    value: String,
}

#[derive(Serialize)]
struct AddItemRequest {
    #[serde(rename = "planCode")]
    plan_code: String,
    #[serde(rename = "pricingMode")]
    pricing_mode: &'static str,
    quantity: u32,
    duration: &'static str,
    configuration: Vec<ConfigurationItem>,
}

#[derive(Deserialize)]
struct AddItemResponse {
    #[serde(rename = "itemId")]
    item_id: i64,
}

#[derive(Serialize)]
struct ItemConfigurationRequest {
    label: String,
    value: String,
}

#[derive(Deserialize, Default)]
struct CheckoutPreviewResponse {
    prices: Option<CheckoutPrices>,
}

#[derive(Deserialize)]
struct CheckoutPrices {
    #[serde(rename = "withTax")]
    with_tax: PriceValue,
    #[serde(rename = "withoutTax")]
    without_tax: PriceValue,
    tax: PriceValue,
}

#[derive(Deserialize)]
struct PriceValue {
    text: String,
    #[serde(rename = "currencyCode")]
    currency_code: String,
}

#[derive(Serialize)]
struct CheckoutRequest {
    #[serde(rename = "autoPayWithPreferredPaymentMethod")]
    auto_pay_with_preferred_payment_method: bool,
    #[serde(rename = "waiveRetractationPeriod")]
    waive_retractation_period: bool,
}

#[derive(Deserialize)]
struct CheckoutResponse {
    #[serde(rename = "orderId")]
    order_id: i64,
    url: String,
}

#[derive(Deserialize, Clone)]
struct RequiredConfiguration {
    label: String,
    #[serde(default)]
    default_value: Option<String>,
}

// ---------------------------------------------------------------------------
// Production driver
// ---------------------------------------------------------------------------

/// `PlaceOrder(ctx, account, planCode, datacenter, options, autoPay)` wired
/// to live OVH endpoints.
pub struct OvhCartDriver {
    required_config_cache: Mutex<HashMap<String, Vec<RequiredConfiguration>>>,
}

impl Default for OvhCartDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl OvhCartDriver {
    pub fn new() -> Self {
        Self { required_config_cache: Mutex::new(HashMap::new()) }
    }

    async fn required_configurations(
        &self,
        client: &OvhClient,
        plan_code: &str,
    ) -> Result<Vec<RequiredConfiguration>, OrderError> {
        if let Some(cached) = self.required_config_cache.lock().await.get(plan_code) {
            return Ok(cached.clone());
        }
        let path = format!("/order/catalog/public/{plan_code}/requiredConfiguration");
        let configs: Vec<RequiredConfiguration> =
            client.do_request::<(), _>(Method::GET, &path, None).await.unwrap_or_default();
        self.required_config_cache
            .lock()
            .await
            .insert(plan_code.to_string(), configs.clone());
        Ok(configs)
    }

    async fn place_order_inner(
        &self,
        client: &OvhClient,
        account: &Account,
        plan_code: &str,
        datacenter: &str,
        options: &[String],
        auto_pay: bool,
    ) -> Result<OrderOutcome, OrderError> {
        // 1. Create cart.
        let create: CreateCartResponse = client
            .do_request(
                Method::POST,
                "/order/cart",
                Some(&CreateCartRequest { ovh_subsidiary: &account.zone, description: "acquisition-engine" }),
            )
            .await
            .map_err(|e| OrderError::CartCreateFailed(e.to_string()))?;
        let cart_id = create.cart_id;

        // 2. Assign cart to the authenticated user.
        let assign_path = format!("/order/cart/{cart_id}/assign");
        let _: serde_json::Value =
            client.do_request::<(), _>(Method::POST, &assign_path, None).await?;

        // 3. Add item.
        let family = infer_plan_family(plan_code);
        let add_path = format!("/order/cart/{cart_id}/{}", family.cart_segment());
        let add_result: Result<AddItemResponse, OvhApiError> = client
            .do_request(
                Method::POST,
                &add_path,
                Some(&AddItemRequest {
                    plan_code: plan_code.to_string(),
                    pricing_mode: "default",
                    quantity: 1,
                    duration: "P1M",
                    configuration: vec![ConfigurationItem {
                        label: "dedicated_datacenter".to_string(),
                        value: datacenter.to_string(),
                    }],
                }),
            )
            .await;
        let item = match add_result {
            Ok(r) => r,
            Err(OvhApiError::Conflict { .. } | OvhApiError::NotFound { .. }) => {
                return Err(OrderError::NotAvailable)
            }
            Err(e) => return Err(e.into()),
        };

        // 4. Configure required + requested options.
        for required in self.required_configurations(client, plan_code).await? {
            if let Some(default_value) = required.default_value {
                let config_path = format!("/order/cart/{cart_id}/item/{}/configuration", item.item_id);
                let _: serde_json::Value = client
                    .do_request(
                        Method::POST,
                        &config_path,
                        Some(&ItemConfigurationRequest { label: required.label, value: default_value }),
                    )
                    .await?;
            }
        }
        for option in options {
            let config_path = format!("/order/cart/{cart_id}/item/{}/configuration", item.item_id);
            let (label, value) = option
                .split_once(':')
                .unwrap_or(("option", option.as_str()));
            let _: serde_json::Value = client
                .do_request(
                    Method::POST,
                    &config_path,
                    Some(&ItemConfigurationRequest { label: label.to_string(), value: value.to_string() }),
                )
                .await?;
        }

        // 5. Validate cart / price preview.
        let checkout_path = format!("/order/cart/{cart_id}/checkout");
        let preview: CheckoutPreviewResponse =
            client.do_request::<(), _>(Method::GET, &checkout_path, None).await?;
        let price = preview.prices.map(|p| Price {
            currency_code: p.with_tax.currency_code.clone(),
            with_tax: p.with_tax.text,
            without_tax: p.without_tax.text,
            tax: p.tax.text,
        });

        // 6. Checkout.
        let checkout: CheckoutResponse = client
            .do_request(
                Method::POST,
                &checkout_path,
                Some(&CheckoutRequest {
                    auto_pay_with_preferred_payment_method: auto_pay,
                    waive_retractation_period: true,
                }),
            )
            .await?;

        Ok(OrderOutcome {
            order_id: checkout.order_id.to_string(),
            order_url: checkout.url,
            price,
            payment_failed: None,
        })
    }
}

#[async_trait]
impl CartOrderDriver for OvhCartDriver {
    async fn place_order(
        &self,
        account: &Account,
        plan_code: &str,
        datacenter: &str,
        options: &[String],
        auto_pay: bool,
    ) -> Result<OrderOutcome, OrderError> {
        let client = OvhClient::new(account.clone());
        tokio::time::timeout(
            ORDER_SEQUENCE_TIMEOUT,
            self.place_order_inner(&client, account, plan_code, datacenter, options, auto_pay),
        )
        .await
        .unwrap_or(Err(OrderError::SequenceTimeout))
    }
}
