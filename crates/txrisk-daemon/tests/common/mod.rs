//! Shared scenario-test scaffolding. Every test in this directory requires a
//! live Postgres reachable via `DATABASE_URL` (see individual test files for
//! the `cargo test -- --ignored` invocation). The stream queue is always the
//! in-memory fake — no Redis instance is needed for these HTTP-layer tests.

use std::sync::Arc;

use axum::{body::Body, http::Request, Router};
use bytes::Bytes;
use http_body_util::BodyExt;
use tower::ServiceExt;
use txrisk_audit::AuditWriter;
use txrisk_daemon::{routes, state::AppState};
use txrisk_db::TxRiskDb;
use txrisk_experiments::ExperimentManager;
use txrisk_queue::InMemoryQueue;
use uuid::Uuid;

pub async fn make_router() -> (Router, sqlx::PgPool) {
    let pool = txrisk_db::connect_from_env().await.expect("connect");
    txrisk_db::migrate(&pool).await.expect("migrate");
    let db = TxRiskDb::new(pool.clone());

    let tmp = tempfile::tempdir().expect("tempdir");
    let audit = AuditWriter::new(tmp.path().join("audit.jsonl"), true).expect("audit writer");
    // Leak the tempdir so the audit log path stays valid for the test's
    // lifetime (each test process is short-lived).
    std::mem::forget(tmp);

    let state = Arc::new(AppState::new(
        db,
        Arc::new(InMemoryQueue::new()),
        ExperimentManager::new(),
        audit,
    ));

    (routes::build_router(state), pool)
}

pub async fn seed_account(pool: &sqlx::PgPool, id: Uuid) {
    sqlx::query(
        "insert into accounts (id, owner, account_type, risk_profile, status) values ($1, $2, $3, $4, $5)",
    )
    .bind(id)
    .bind("test-owner")
    .bind("standard")
    .bind("low")
    .bind("active")
    .execute(pool)
    .await
    .unwrap();
}

pub async fn call(router: Router, req: Request<Body>) -> (axum::http::StatusCode, Bytes) {
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp.into_body().collect().await.expect("body collect failed").to_bytes();
    (status, body)
}

pub fn parse_json(b: Bytes) -> serde_json::Value {
    serde_json::from_slice(&b).expect("body is not valid JSON")
}
