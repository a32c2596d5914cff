//! `txrisk-cli serve`: brings up the same ingest + analytics-read HTTP
//! surface as the standalone `txrisk-daemon` binary, for operators who
//! prefer one entry point for every subcommand.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use anyhow::Result;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, Level};
use txrisk_audit::AuditWriter;
use txrisk_config::env::EnvConfig;
use txrisk_daemon::{routes, state};
use txrisk_db::TxRiskDb;
use txrisk_experiments::ExperimentManager;
use txrisk_queue::RedisStreamQueue;

pub async fn run() -> Result<()> {
    let env = EnvConfig::from_env().context("load environment config")?;

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
        env.dead_letter_stream.clone(),
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

    let app = routes::build_router(Arc::clone(&shared)).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    let addr = std::env::var("TXRISK_DAEMON_ADDR")
        .ok()
        .and_then(|s| s.parse::<SocketAddr>().ok())
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8080)));
    info!("txrisk-cli serve listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}
