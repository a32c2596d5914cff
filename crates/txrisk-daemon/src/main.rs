//! txrisk-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, builds the shared
//! state, wires middleware, and starts the HTTP server. All route handlers
//! live in `routes.rs`; all shared state types live in `state.rs`. Database
//! migrations are an operator action (`txrisk-cli migrate`), never run
//! implicitly on daemon boot.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};
use txrisk_audit::AuditWriter;
use txrisk_config::env::EnvConfig;
use txrisk_daemon::{routes, state};
use txrisk_db::TxRiskDb;
use txrisk_experiments::ExperimentManager;
use txrisk_queue::RedisStreamQueue;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience).
    // Silent if the file does not exist — production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    let env = EnvConfig::from_env().context("load environment config")?;
    init_tracing(&env);

    let pool = txrisk_db::connect(
        &env.database_url,
        &txrisk_db::PoolConfig {
            max_connections: env.db_max_open_conns,
            min_connections: env.db_max_idle_conns,
            max_lifetime: env.db_conn_max_lifetime,
        },
    )
    .await
    .context("connect to database")?;
    let db = TxRiskDb::new(pool);

    let queue = RedisStreamQueue::connect(
        &env.redis_url,
        env.redis_stream_name.clone(),
        env.redis_consumer_group.clone(),
        "transactions-dlq",
    )
    .await
    .context("connect to redis stream queue")?;

    let audit_path = std::env::var("AUDIT_LOG_PATH").unwrap_or_else(|_| "./data/audit.jsonl".to_string());
    let audit_writer = AuditWriter::new(&audit_path, true).context("open audit log")?;

    let shared = Arc::new(state::AppState::new(
        db,
        Arc::new(queue),
        ExperimentManager::new(),
        audit_writer,
    ));

    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8080)));
    info!("txrisk-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing(env: &EnvConfig) {
    let default_level = match env.environment {
        txrisk_config::env::Environment::Production => "info",
        txrisk_config::env::Environment::Development => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("TXRISK_DAEMON_ADDR").ok()?.parse().ok()
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
