//! Shared runtime state for txrisk-daemon.
//!
//! All types here are `Clone`-able (via `Arc`). Handlers receive
//! `State<Arc<AppState>>` from Axum; this module owns nothing async itself.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use txrisk_audit::AuditWriter;
use txrisk_db::TxRiskDb;
use txrisk_experiments::ExperimentManager;
use txrisk_ingest::AuditSink;
use txrisk_queue::QueuePort;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// BusMsg — SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    LogLine { level: String, msg: String },
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Cloneable (Arc) handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    /// Static build metadata.
    pub build: BuildInfo,
    /// Persistence (C1).
    pub db: TxRiskDb,
    /// Stream queue port (C2) ingested transactions are published to.
    pub queue: Arc<dyn QueuePort>,
    /// A/B experiment manager (C9).
    pub experiments: ExperimentManager,
    /// Append-only audit sink (best-effort, §7).
    pub audit: Arc<DaemonAuditSink>,
}

impl AppState {
    pub fn new(
        db: TxRiskDb,
        queue: Arc<dyn QueuePort>,
        experiments: ExperimentManager,
        audit_writer: AuditWriter,
    ) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);

        Self {
            bus,
            build: BuildInfo {
                service: "txrisk-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            db,
            queue,
            experiments,
            audit: Arc::new(DaemonAuditSink::new(audit_writer)),
        }
    }
}

/// Adapts an [`AuditWriter`] (which needs `&mut self`) to the [`AuditSink`]
/// port `txrisk-ingest` consumes, guarded by a single mutex — appends are
/// rare relative to ingest traffic and must stay strictly ordered on disk.
pub struct DaemonAuditSink {
    writer: Mutex<AuditWriter>,
}

impl DaemonAuditSink {
    pub fn new(writer: AuditWriter) -> Self {
        Self { writer: Mutex::new(writer) }
    }
}

#[async_trait::async_trait]
impl AuditSink for DaemonAuditSink {
    async fn record(&self, transaction_id: Uuid, event_type: &str, payload: serde_json::Value) {
        let mut guard = self.writer.lock().await;
        if let Err(e) = guard.append(transaction_id, "transaction", event_type, payload) {
            tracing::warn!(transaction_id = %transaction_id, error = %e, "audit append failed; continuing");
        }
    }
}

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}
