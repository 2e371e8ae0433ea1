//! beacon-daemon entry point.
//!
//! Thin: loads config and secrets, picks a store, builds the engine and
//! shared state, wires middleware, and serves HTTP. Route handlers live in
//! `routes.rs`; shared state types live in `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use beacon_audit::UnregisteredBuffer;
use beacon_config::{resolve_secrets, BeaconConfig, UnusedKeyPolicy};
use beacon_daemon::{auth::PrivilegedAuth, routes, state};
use beacon_db::{MemoryStore, PgStore, PresenceStore};
use beacon_engine::{EngineSettings, PresenceEngine, SystemClock};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Dev convenience; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let loaded = beacon_config::load_from_env()?;
    let report = beacon_config::report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn)?;
    for ptr in &report.unused_leaf_pointers {
        warn!(pointer = %ptr, "unused config key");
    }
    let cfg = loaded.typed()?;
    info!(config_hash = %loaded.config_hash, "config loaded");

    let secrets = resolve_secrets(&cfg);
    let store = open_store(secrets.database_url.as_deref()).await?;
    let buffer = open_buffer(&cfg).await;

    let engine = Arc::new(PresenceEngine::new(
        store,
        Arc::clone(&buffer),
        Arc::new(SystemClock),
        EngineSettings::from(&cfg),
    ));

    let auth = PrivilegedAuth::from_secrets(&secrets);
    if !auth.is_enabled() {
        warn!(
            env = %cfg.auth.privileged_token_env,
            "no privileged token configured; operator routes will refuse every caller"
        );
    }

    let shared = Arc::new(state::AppState::new(Arc::clone(&engine), auth));

    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));
    state::spawn_audit_forwarder(&engine, shared.bus.clone());

    if cfg.sweep.enabled {
        let schedule = cfg.sweep.schedule()?;
        beacon_engine::spawn_sweep_loop(Arc::clone(&engine), schedule, cfg.sweep.check_interval());
    } else {
        info!("daily sweep disabled");
    }

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env()
        .or_else(|| cfg.daemon.addr.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8899)));
    info!("beacon-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    if let Err(err) = buffer.flush().await {
        warn!(error = %err, "unregistered snapshot not flushed on shutdown");
    }
    info!("beacon-daemon stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// Postgres when a URL is configured, otherwise the in-memory store.
async fn open_store(database_url: Option<&str>) -> anyhow::Result<Arc<dyn PresenceStore>> {
    match database_url {
        Some(url) => {
            let pool = beacon_db::connect(url).await?;
            beacon_db::migrate(&pool).await?;
            info!("store: postgres");
            Ok(Arc::new(PgStore::new(pool)))
        }
        None => {
            warn!("store: memory (no database url configured; state is lost on restart)");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn open_buffer(cfg: &BeaconConfig) -> Arc<UnregisteredBuffer> {
    let capacity = cfg.unregistered.capacity;
    let buffer = match &cfg.unregistered.snapshot_path {
        Some(path) => UnregisteredBuffer::restore(path, capacity).await,
        None => UnregisteredBuffer::in_memory(capacity),
    };
    info!(restored = buffer.len(), capacity, "unregistered buffer ready");
    Arc::new(buffer)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "ctrl_c handler failed; shutting down");
    }
    info!("shutdown requested");
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("BEACON_DAEMON_ADDR").ok()?.parse().ok()
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(tower_http::cors::Any)
}
