//! ovh-daemon entry point.
//!
//! Thin by design: load config, build the `Engine`, wire middleware, serve.
//! All route handlers live in `routes.rs`; all shared state lives in
//! `state.rs`/`engine.rs`.

use std::fs::File;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use fs2::FileExt;
use ovh_config::EngineConfig;
use ovh_daemon::{engine::Engine, routes, state};
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let config = EngineConfig::from_env()?;
    config.ensure_directories()?;

    // A second daemon pointed at the same data directory would race the
    // first on every write-temp-then-rename; refuse to start rather than
    // corrupt the other's state.
    let _lock_file = acquire_single_instance_lock(&config)?;

    let engine = Arc::new(Engine::new(config.clone())?);
    engine.start();

    let shared = Arc::new(state::AppState::new(engine.clone()));
    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(5));

    let app = routes::build_router(shared)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_layer());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("ovh-daemon listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    engine.stop();
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn acquire_single_instance_lock(config: &EngineConfig) -> anyhow::Result<File> {
    let lock_path = config.data_dir.join(".ovh-daemon.lock");
    let file = File::create(&lock_path)
        .with_context(|| format!("create lock file {}", lock_path.display()))?;
    file.try_lock_exclusive().with_context(|| {
        format!(
            "another ovh-daemon instance already holds {} — refusing to start",
            lock_path.display()
        )
    })?;
    Ok(file)
}

fn cors_layer() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];
    let origins: Vec<HeaderValue> = allowed_origins.iter().filter_map(|o| HeaderValue::from_str(o).ok()).collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(tower_http::cors::Any)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received, draining in-flight attempts");
}
