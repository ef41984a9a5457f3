//! In-process scenario tests for ovh-daemon HTTP endpoints.
//!
//! Each test spins up the Axum router without binding a TCP socket and
//! drives it via `tower::ServiceExt::oneshot`. Every test gets its own
//! tempdir-backed store, so none of them observe another's
//! queue/history/subscriptions.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use ovh_config::EngineConfig;
use ovh_daemon::engine::Engine;
use ovh_daemon::state::AppState;
use ovh_daemon::routes;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

fn test_config(data_dir: std::path::PathBuf, enable_auth: bool) -> EngineConfig {
    EngineConfig {
        port: 0,
        api_secret_key: Some("test-secret".to_string()),
        enable_api_key_auth: enable_auth,
        debug: true,
        data_dir,
        cache_dir: std::env::temp_dir(),
        log_dir: std::env::temp_dir(),
        monitor_interval_secs: 60,
    }
}

/// Builds a fresh in-process router (background loops are never started —
/// these are endpoint tests, not scheduling tests) plus a handle to the
/// state behind it for direct store manipulation.
fn make_router(enable_auth: bool) -> (axum::Router, Arc<AppState>) {
    let data_dir = tempfile::tempdir().unwrap().into_path();
    let config = test_config(data_dir, enable_auth);
    let engine = Arc::new(Engine::new(config).unwrap());
    let state = Arc::new(AppState::new(engine));
    (routes::build_router(state.clone()), state)
}

async fn call(router: &axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = router.clone().oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let bytes = resp.into_body().collect().await.expect("body collect failed").to_bytes();
    let json = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
}

fn get_auth(uri: &str, key: &str) -> Request<Body> {
    Request::builder().method("GET").uri(uri).header("x-api-key", key).body(Body::empty()).unwrap()
}

fn json_req(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder().method("DELETE").uri(uri).body(Body::empty()).unwrap()
}

fn sample_task_body() -> Value {
    json!({
        "planCode": "24sk202",
        "datacenters": ["gra", "sbg"],
        "options": [],
        "quantity": 1,
        "retryInterval": 30,
        "autoPay": false,
    })
}

// ---------------------------------------------------------------------------
// /healthz
// ---------------------------------------------------------------------------

#[tokio::test]
async fn healthz_is_reachable_without_an_api_key() {
    let (router, _state) = make_router(true);
    let (status, body) = call(&router, get("/healthz")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
}

// ---------------------------------------------------------------------------
// Auth gate
// ---------------------------------------------------------------------------

#[tokio::test]
async fn protected_route_rejects_missing_api_key_when_auth_enabled() {
    let (router, _state) = make_router(true);
    let (status, body) = call(&router, get("/queue")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthorized");
}

#[tokio::test]
async fn protected_route_accepts_correct_api_key() {
    let (router, _state) = make_router(true);
    let (status, _) = call(&router, get_auth("/queue", "test-secret")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn protected_route_is_open_when_auth_disabled() {
    let (router, _state) = make_router(false);
    let (status, _) = call(&router, get("/queue")).await;
    assert_eq!(status, StatusCode::OK);
}

// ---------------------------------------------------------------------------
// Queue CRUD
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_task_then_list_and_fetch_it_back() {
    let (router, _state) = make_router(false);
    let (status, body) = call(&router, json_req("POST", "/queue", sample_task_body())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "running");
    assert_eq!(body["accountId"], "default");

    let (status, list) = call(&router, get("/queue")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn create_task_rejects_empty_datacenters() {
    let (router, _state) = make_router(false);
    let mut body = sample_task_body();
    body["datacenters"] = json!([]);
    let (status, resp) = call(&router, json_req("POST", "/queue", body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(resp["code"], "config_error");
}

#[tokio::test]
async fn create_task_rejects_quantity_out_of_range() {
    let (router, _state) = make_router(false);
    let mut body = sample_task_body();
    body["quantity"] = json!(0);
    let (status, _) = call(&router, json_req("POST", "/queue", body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn create_task_rejects_retry_interval_below_minimum() {
    let (router, _state) = make_router(false);
    let mut body = sample_task_body();
    body["retryInterval"] = json!(5);
    let (status, _) = call(&router, json_req("POST", "/queue", body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn update_restart_and_delete_a_task() {
    let (router, _state) = make_router(false);
    let (_, created) = call(&router, json_req("POST", "/queue", sample_task_body())).await;
    let id = created["id"].as_str().unwrap();

    let mut updated_body = sample_task_body();
    updated_body["quantity"] = json!(3);
    let (status, updated) = call(&router, json_req("PUT", &format!("/queue/{id}"), updated_body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["quantity"], 3);

    let (status, paused) =
        call(&router, json_req("PUT", &format!("/queue/{id}/status"), json!({"status": "paused"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(paused["status"], "paused");

    let (status, restarted) = call(&router, json_req("PUT", &format!("/queue/{id}/restart"), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(restarted["status"], "running");
    assert_eq!(restarted["failureCount"], 0);

    let (status, _) = call(&router, delete(&format!("/queue/{id}"))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, list) = call(&router, get("/queue")).await;
    assert_eq!(list.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn update_rejects_an_unknown_task_id() {
    let (router, _state) = make_router(false);
    let id = Uuid::new_v4();
    let (status, _) = call(&router, json_req("PUT", &format!("/queue/{id}"), sample_task_body())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn status_update_is_rejected_on_a_terminal_task() {
    let (router, state) = make_router(false);
    let (_, created) = call(&router, json_req("POST", "/queue", sample_task_body())).await;
    let id: Uuid = created["id"].as_str().unwrap().parse().unwrap();

    state
        .engine
        .store
        .mutate_queue(|tasks| {
            if let Some(t) = tasks.iter_mut().find(|t| t.id == id) {
                t.status = ovh_schemas::TaskStatus::Completed;
            }
            Ok(())
        })
        .await
        .unwrap();

    let (status, body) = call(
        &router,
        json_req("PUT", &format!("/queue/{id}/status"), json!({"status": "running"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "conflict");
}

#[tokio::test]
async fn update_conflicts_while_an_attempt_is_in_flight() {
    let (router, state) = make_router(false);
    let (_, created) = call(&router, json_req("POST", "/queue", sample_task_body())).await;
    let id: Uuid = created["id"].as_str().unwrap().parse().unwrap();

    let lock = state.engine.store.task_lock(id).await;
    let _guard = lock.lock().await;

    let (status, body) = call(&router, json_req("PUT", &format!("/queue/{id}"), sample_task_body())).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "conflict");
}

#[tokio::test]
async fn clear_queue_with_scope_self_only_drops_the_active_account() {
    let (router, state) = make_router(false);
    call(&router, json_req("POST", "/queue", sample_task_body())).await;
    state
        .engine
        .store
        .mutate_queue(|tasks| {
            let mut other = tasks[0].clone();
            other.id = Uuid::new_v4();
            other.account_id = "other-account".to_string();
            tasks.push(other);
            Ok(())
        })
        .await
        .unwrap();

    let (status, _) = call(&router, delete("/queue/clear")).await;
    assert_eq!(status, StatusCode::OK);

    let remaining = state.engine.store.queue_snapshot().await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].account_id, "other-account");
}

#[tokio::test]
async fn paged_queue_respects_status_filter_and_page_size() {
    let (router, _state) = make_router(false);
    for _ in 0..3 {
        call(&router, json_req("POST", "/queue", sample_task_body())).await;
    }
    let (status, body) = call(&router, get("/queue/paged?status=running&page=1&page_size=2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    assert_eq!(body["items"].as_array().unwrap().len(), 2);
}

// ---------------------------------------------------------------------------
// Purchase history
// ---------------------------------------------------------------------------

#[tokio::test]
async fn purchase_history_lists_and_clears() {
    let (router, state) = make_router(false);
    state
        .engine
        .store
        .append_history(ovh_schemas::PurchaseHistoryEntry {
            id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            account_id: "default".to_string(),
            plan_code: "24sk202".to_string(),
            datacenter: "gra".to_string(),
            options: vec![],
            status: ovh_schemas::HistoryStatus::Success,
            order_id: Some("ord_1".to_string()),
            order_url: None,
            price: None,
            error_message: None,
            sequence: 1,
            purchase_time: chrono::Utc::now(),
        })
        .await
        .unwrap();

    let (status, list) = call(&router, get("/purchase-history")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (status, _) = call(&router, delete("/purchase-history")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(state.engine.store.history_snapshot().await.is_empty());
}

// ---------------------------------------------------------------------------
// /stats
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stats_aggregates_by_status_and_account() {
    let (router, _state) = make_router(false);
    call(&router, json_req("POST", "/queue", sample_task_body())).await;

    let (status, body) = call(&router, get("/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["by_status"]["running"], 1);
    assert_eq!(body["per_account"]["default"]["queue_count"], 1);
}

// ---------------------------------------------------------------------------
// Subscriptions CRUD
// ---------------------------------------------------------------------------

fn sample_subscription_body() -> Value {
    json!({
        "planCode": "24sk202",
        "ovhSubsidiary": "IE",
        "datacenters": ["gra"],
        "monitorLinux": true,
        "monitorWindows": false,
        "notifyAvailable": true,
        "notifyUnavailable": false,
    })
}

#[tokio::test]
async fn subscription_create_update_delete_round_trip() {
    let (router, _state) = make_router(false);
    let (status, created) =
        call(&router, json_req("POST", "/vps-monitor/subscriptions", sample_subscription_body())).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap();

    let mut updated_body = sample_subscription_body();
    updated_body["monitorWindows"] = json!(true);
    let (status, updated) = call(
        &router,
        json_req("PUT", &format!("/vps-monitor/subscriptions/{id}"), updated_body),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["monitorWindows"], true);

    let (status, _) = call(&router, delete(&format!("/vps-monitor/subscriptions/{id}"))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, list) = call(&router, get("/vps-monitor/subscriptions")).await;
    assert_eq!(list.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn subscription_create_rejects_missing_plan_code() {
    let (router, _state) = make_router(false);
    let mut body = sample_subscription_body();
    body["planCode"] = json!("");
    let (status, _) = call(&router, json_req("POST", "/vps-monitor/subscriptions", body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
