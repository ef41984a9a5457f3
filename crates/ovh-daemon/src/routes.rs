//! Axum router and every HTTP handler for ovh-daemon. `build_router` is the
//! single entry point; `main.rs` attaches middleware (CORS, tracing, the
//! `X-API-Key` gate) after calling it, keeping transport concerns out of the
//! handlers. Handlers are `pub(crate)` so `tests/` can exercise the router
//! directly via `tower::ServiceExt::oneshot`.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{middleware, Json, Router};
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use ovh_schemas::{
    PurchaseHistoryEntry, QueueTask, Subscription, TaskStatus, MAX_TASK_QUANTITY, MIN_RETRY_INTERVAL_SECS,
};

use crate::api_types::{
    AccountStats, ErrorResponse, HealthResponse, PagedQueueQuery, PagedResponse, ScopeQuery,
    StatsResponse, StatusResponse, SubscriptionRequest, TaskRequest, UpdateStatusRequest,
};
use crate::auth::{require_api_key, selected_account};
use crate::engine::Engine;
use crate::state::{uptime_secs, AppState, BusMsg};

pub fn build_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/v1/status", get(status_handler))
        .route("/v1/stream", get(stream))
        .route("/queue", get(list_queue).post(create_task))
        .route("/queue/paged", get(list_queue_paged))
        .route("/queue/clear", delete(clear_queue))
        .route("/queue/:id", put(update_task).delete(delete_task))
        .route("/queue/:id/status", put(update_task_status))
        .route("/queue/:id/restart", put(restart_task))
        .route("/purchase-history", get(list_history).delete(clear_history))
        .route("/stats", get(stats))
        .route(
            "/vps-monitor/subscriptions",
            get(list_subscriptions).post(create_subscription),
        )
        .route(
            "/vps-monitor/subscriptions/:id",
            put(update_subscription).delete(delete_subscription),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new().route("/healthz", get(healthz)).merge(protected).with_state(state)
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

fn bad_request(msg: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(msg, "config_error"))).into_response()
}

fn not_found(what: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(ErrorResponse::new(format!("{what} not found"), "not_found")))
        .into_response()
}

fn conflict(msg: impl Into<String>) -> Response {
    (StatusCode::CONFLICT, Json(ErrorResponse::new(msg, "conflict"))).into_response()
}

fn internal_error(e: anyhow::Error) -> Response {
    tracing::warn!(error = %e, "request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse::new(e.to_string(), "internal_error")))
        .into_response()
}

#[derive(serde::Serialize)]
struct OkResponse {
    ok: bool,
}

// ---------------------------------------------------------------------------
// GET /healthz
// ---------------------------------------------------------------------------

pub(crate) async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse { ok: true, service: "ovh-daemon", version: env!("CARGO_PKG_VERSION") }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/status
// ---------------------------------------------------------------------------

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let queue_count = st.engine.store.queue_snapshot().await.len();
    let subscription_count = st.engine.store.subscriptions_snapshot().await.len();
    (
        StatusCode::OK,
        Json(StatusResponse {
            uptime_secs: uptime_secs(),
            scheduler_running: st.engine.scheduler.is_running(),
            monitor_running: st.engine.monitor.is_running(),
            queue_count,
            subscription_count,
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/stream (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let rx = st.bus.subscribe();
    Sse::new(broadcast_to_sse(rx)).keep_alive(KeepAlive::new()).into_response()
}

fn broadcast_to_sse(rx: broadcast::Receiver<BusMsg>) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    BusMsg::Heartbeat { .. } => "heartbeat",
                    BusMsg::TaskUpdated { .. } => "task_updated",
                    BusMsg::HistoryAppended { .. } => "history_appended",
                    BusMsg::SubscriptionChanged { .. } => "subscription_changed",
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(event_name).data(data)))
            }
            Err(_) => None,
        }
    })
}

// ---------------------------------------------------------------------------
// Scope filtering shared by /queue, /purchase-history, subscriptions
// ---------------------------------------------------------------------------

trait ScopedByAccount {
    fn account_id_ref(&self) -> Option<&str>;
}

impl ScopedByAccount for QueueTask {
    fn account_id_ref(&self) -> Option<&str> {
        Some(&self.account_id)
    }
}

impl ScopedByAccount for PurchaseHistoryEntry {
    fn account_id_ref(&self) -> Option<&str> {
        Some(&self.account_id)
    }
}

impl ScopedByAccount for Subscription {
    fn account_id_ref(&self) -> Option<&str> {
        self.account_id.as_deref()
    }
}

/// `scope=all` returns everything; any other value (including absent)
/// filters to the `X-OVH-Account` context, always keeping account-agnostic
/// entries.
fn filter_by_scope<T: ScopedByAccount>(items: Vec<T>, headers: &HeaderMap, scope: Option<&str>) -> Vec<T> {
    if scope == Some("all") {
        return items;
    }
    let account = selected_account(headers);
    items.into_iter().filter(|i| i.account_id_ref().map(|a| a == account).unwrap_or(true)).collect()
}

fn status_key(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Running => "running",
        TaskStatus::Paused => "paused",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
    }
}

// ---------------------------------------------------------------------------
// GET /queue, POST /queue
// ---------------------------------------------------------------------------

pub(crate) async fn list_queue(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<ScopeQuery>,
) -> impl IntoResponse {
    let tasks = st.engine.store.queue_snapshot().await;
    (StatusCode::OK, Json(filter_by_scope(tasks, &headers, q.scope.as_deref())))
}

pub(crate) async fn list_queue_paged(
    State(st): State<Arc<AppState>>,
    Query(q): Query<PagedQueueQuery>,
) -> impl IntoResponse {
    let mut tasks = st.engine.store.queue_snapshot().await;
    if let Some(status) = &q.status {
        tasks.retain(|t| status_key(t.status) == status);
    }
    let page = q.page.unwrap_or(1).max(1);
    let page_size = q.page_size.unwrap_or(20).clamp(1, 500);
    let total = tasks.len();
    let start = (page - 1) * page_size;
    let page_items: Vec<QueueTask> = tasks.into_iter().skip(start).take(page_size).collect();
    (StatusCode::OK, Json(PagedResponse { items: page_items, page, page_size, total }))
}

fn validate_task_request(body: &TaskRequest) -> Result<(), Response> {
    if body.datacenters.is_empty() {
        return Err(bad_request("datacenters must not be empty"));
    }
    if body.quantity < 1 || body.quantity > MAX_TASK_QUANTITY {
        return Err(bad_request(format!("quantity must be between 1 and {MAX_TASK_QUANTITY}")));
    }
    if body.retry_interval_secs < MIN_RETRY_INTERVAL_SECS {
        return Err(bad_request(format!(
            "retryInterval must be at least {MIN_RETRY_INTERVAL_SECS} seconds"
        )));
    }
    Ok(())
}

pub(crate) async fn create_task(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<TaskRequest>,
) -> Response {
    if let Err(resp) = validate_task_request(&body) {
        return resp;
    }

    let now = Utc::now();
    let task = QueueTask {
        id: Uuid::new_v4(),
        account_id: body.account_id.clone().unwrap_or_else(|| selected_account(&headers)),
        plan_code: body.plan_code,
        datacenters: body.datacenters,
        options: body.options,
        quantity: body.quantity,
        retry_interval_secs: body.retry_interval_secs,
        auto_pay: body.auto_pay,
        status: TaskStatus::Running,
        retry_count: 0,
        failure_count: 0,
        purchased: 0,
        next_attempt_at: now,
        created_at: now,
        updated_at: now,
        error_message: None,
    };

    let result = {
        let task = task.clone();
        st.engine.store.mutate_queue(|tasks| { tasks.push(task); Ok(()) }).await
    };
    match result {
        Ok(()) => {
            let _ = st.bus.send(BusMsg::TaskUpdated { task_id: task.id });
            (StatusCode::CREATED, Json(task)).into_response()
        }
        Err(e) => internal_error(e),
    }
}

/// Non-blocking probe of the per-task lock the scheduler uses for step 1 of
/// its tick algorithm — if it's held, an attempt is in flight right now.
async fn task_in_flight(engine: &Engine, id: Uuid) -> bool {
    let lock = engine.store.task_lock(id).await;
    lock.try_lock().is_err()
}

pub(crate) async fn update_task(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<TaskRequest>,
) -> Response {
    if let Err(resp) = validate_task_request(&body) {
        return resp;
    }
    if task_in_flight(&st.engine, id).await {
        return conflict("task has an attempt in progress");
    }

    let result = st
        .engine
        .store
        .mutate_queue(|tasks| {
            let found = tasks.iter_mut().find(|t| t.id == id);
            Ok(found.map(|t| {
                t.plan_code = body.plan_code.clone();
                t.datacenters = body.datacenters.clone();
                t.options = body.options.clone();
                t.quantity = body.quantity;
                t.retry_interval_secs = body.retry_interval_secs;
                t.auto_pay = body.auto_pay;
                if let Some(account_id) = &body.account_id {
                    t.account_id = account_id.clone();
                }
                t.updated_at = Utc::now();
                t.clone()
            }))
        })
        .await;

    match result {
        Ok(Some(task)) => {
            let _ = st.bus.send(BusMsg::TaskUpdated { task_id: id });
            (StatusCode::OK, Json(task)).into_response()
        }
        Ok(None) => not_found("task"),
        Err(e) => internal_error(e),
    }
}

pub(crate) async fn update_task_status(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateStatusRequest>,
) -> Response {
    let new_status = match body.status.as_str() {
        "running" => TaskStatus::Running,
        "paused" => TaskStatus::Paused,
        other => return bad_request(format!("status {other:?} is not a valid transition target")),
    };

    let Some(current) = st.engine.store.find_task(id).await else {
        return not_found("task");
    };
    if matches!(current.status, TaskStatus::Completed | TaskStatus::Failed) {
        return conflict("a terminal task cannot be paused/resumed directly; use restart");
    }

    let now = Utc::now();
    let result = st
        .engine
        .store
        .mutate_queue(|tasks| {
            let found = tasks.iter_mut().find(|t| t.id == id);
            Ok(found.map(|t| {
                t.status = new_status;
                if new_status == TaskStatus::Running {
                    t.next_attempt_at = now;
                }
                t.updated_at = now;
                t.clone()
            }))
        })
        .await;

    match result {
        Ok(Some(task)) => {
            let _ = st.bus.send(BusMsg::TaskUpdated { task_id: id });
            (StatusCode::OK, Json(task)).into_response()
        }
        Ok(None) => not_found("task"),
        Err(e) => internal_error(e),
    }
}

pub(crate) async fn restart_task(State(st): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    let now = Utc::now();
    let result = st
        .engine
        .store
        .mutate_queue(|tasks| {
            let found = tasks.iter_mut().find(|t| t.id == id);
            Ok(found.map(|t| {
                t.status = TaskStatus::Running;
                t.retry_count = 0;
                t.failure_count = 0;
                t.purchased = 0;
                t.next_attempt_at = now;
                t.updated_at = now;
                t.error_message = None;
                t.clone()
            }))
        })
        .await;

    match result {
        Ok(Some(task)) => {
            let _ = st.bus.send(BusMsg::TaskUpdated { task_id: id });
            (StatusCode::OK, Json(task)).into_response()
        }
        Ok(None) => not_found("task"),
        Err(e) => internal_error(e),
    }
}

pub(crate) async fn delete_task(State(st): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    let result = st
        .engine
        .store
        .mutate_queue(|tasks| {
            let before = tasks.len();
            tasks.retain(|t| t.id != id);
            Ok(before != tasks.len())
        })
        .await;
    match result {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => not_found("task"),
        Err(e) => internal_error(e),
    }
}

pub(crate) async fn clear_queue(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<ScopeQuery>,
) -> Response {
    let all = q.scope.as_deref() == Some("all");
    let account = selected_account(&headers);
    let result = st
        .engine
        .store
        .mutate_queue(|tasks| {
            if all {
                tasks.clear();
            } else {
                tasks.retain(|t| t.account_id != account);
            }
            Ok(())
        })
        .await;
    match result {
        Ok(()) => (StatusCode::OK, Json(OkResponse { ok: true })).into_response(),
        Err(e) => internal_error(e),
    }
}

// ---------------------------------------------------------------------------
// GET/DELETE /purchase-history
// ---------------------------------------------------------------------------

pub(crate) async fn list_history(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<ScopeQuery>,
) -> impl IntoResponse {
    let entries = st.engine.store.history_snapshot().await;
    (StatusCode::OK, Json(filter_by_scope(entries, &headers, q.scope.as_deref())))
}

pub(crate) async fn clear_history(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<ScopeQuery>,
) -> Response {
    let all = q.scope.as_deref() == Some("all");
    let account = selected_account(&headers);
    let result = st.engine.store.clear_history(|e| all || e.account_id == account).await;
    match result {
        Ok(()) => (StatusCode::OK, Json(OkResponse { ok: true })).into_response(),
        Err(e) => internal_error(e),
    }
}

// ---------------------------------------------------------------------------
// GET /stats
// ---------------------------------------------------------------------------

pub(crate) async fn stats(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let tasks = st.engine.store.queue_snapshot().await;
    let history = st.engine.store.history_snapshot().await;

    let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
    let mut per_account: BTreeMap<String, AccountStats> = BTreeMap::new();
    let mut total_purchased = 0u64;

    for t in &tasks {
        *by_status.entry(status_key(t.status).to_string()).or_insert(0) += 1;
        total_purchased += u64::from(t.purchased);
        let entry = per_account.entry(t.account_id.clone()).or_default();
        entry.queue_count += 1;
        entry.purchased += u64::from(t.purchased);
    }
    for e in &history {
        per_account.entry(e.account_id.clone()).or_default().history_count += 1;
    }

    (
        StatusCode::OK,
        Json(StatsResponse {
            by_status,
            total_purchased,
            total_history_entries: history.len(),
            per_account,
        }),
    )
}

// ---------------------------------------------------------------------------
// Subscriptions CRUD
// ---------------------------------------------------------------------------

pub(crate) async fn list_subscriptions(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<ScopeQuery>,
) -> impl IntoResponse {
    let subs = st.engine.store.subscriptions_snapshot().await;
    (StatusCode::OK, Json(filter_by_scope(subs, &headers, q.scope.as_deref())))
}

pub(crate) async fn create_subscription(
    State(st): State<Arc<AppState>>,
    Json(body): Json<SubscriptionRequest>,
) -> Response {
    if body.plan_code.is_empty() || body.ovh_subsidiary.is_empty() {
        return bad_request("planCode and ovhSubsidiary are required");
    }
    let subscription = Subscription {
        id: Uuid::new_v4(),
        account_id: body.account_id,
        plan_code: body.plan_code,
        ovh_subsidiary: body.ovh_subsidiary,
        datacenters: body.datacenters,
        monitor_linux: body.monitor_linux,
        monitor_windows: body.monitor_windows,
        notify_available: body.notify_available,
        notify_unavailable: body.notify_unavailable,
        last_status: BTreeMap::new(),
        history: vec![],
        created_at: Utc::now(),
    };
    let result = {
        let subscription = subscription.clone();
        st.engine
            .store
            .mutate_subscriptions(|subs| { subs.push(subscription); Ok(()) })
            .await
    };
    match result {
        Ok(()) => {
            let _ = st.bus.send(BusMsg::SubscriptionChanged { subscription_id: subscription.id });
            (StatusCode::CREATED, Json(subscription)).into_response()
        }
        Err(e) => internal_error(e),
    }
}

pub(crate) async fn update_subscription(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<SubscriptionRequest>,
) -> Response {
    if body.plan_code.is_empty() || body.ovh_subsidiary.is_empty() {
        return bad_request("planCode and ovhSubsidiary are required");
    }
    let result = st
        .engine
        .store
        .mutate_subscriptions(|subs| {
            let found = subs.iter_mut().find(|s| s.id == id);
            Ok(found.map(|s| {
                s.plan_code = body.plan_code.clone();
                s.ovh_subsidiary = body.ovh_subsidiary.clone();
                s.datacenters = body.datacenters.clone();
                s.monitor_linux = body.monitor_linux;
                s.monitor_windows = body.monitor_windows;
                s.notify_available = body.notify_available;
                s.notify_unavailable = body.notify_unavailable;
                if let Some(account_id) = &body.account_id {
                    s.account_id = Some(account_id.clone());
                }
                s.clone()
            }))
        })
        .await;
    match result {
        Ok(Some(subscription)) => {
            let _ = st.bus.send(BusMsg::SubscriptionChanged { subscription_id: id });
            (StatusCode::OK, Json(subscription)).into_response()
        }
        Ok(None) => not_found("subscription"),
        Err(e) => internal_error(e),
    }
}

pub(crate) async fn delete_subscription(State(st): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    let result = st
        .engine
        .store
        .mutate_subscriptions(|subs| {
            let before = subs.len();
            subs.retain(|s| s.id != id);
            Ok(before != subs.len())
        })
        .await;
    match result {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => not_found("subscription"),
        Err(e) => internal_error(e),
    }
}
