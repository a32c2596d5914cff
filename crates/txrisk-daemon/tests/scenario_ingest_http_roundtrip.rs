//! Requires a live Postgres reachable via `DATABASE_URL`. Run with:
//!   DATABASE_URL=postgres://... cargo test -p txrisk-daemon --test scenario_ingest_http_roundtrip -- --ignored

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use uuid::Uuid;

#[tokio::test]
#[ignore = "requires DATABASE_URL; run against a disposable Postgres instance"]
async fn posting_a_transaction_then_fetching_it_round_trips_through_http() {
    let (router, pool) = common::make_router().await;
    let account_id = Uuid::new_v4();
    common::seed_account(&pool, account_id).await;

    let key = format!("http-idem-{}", Uuid::new_v4());
    let body = serde_json::json!({
        "account_id": account_id,
        "amount": "50.00",
        "currency": "USD",
        "merchant": "Starbucks",
        "merchant_category": "coffee",
        "location": "NYC",
        "country": "US",
        "channel": "pos",
        "idempotency_key": key,
        "metadata": {},
    });

    let req = Request::builder()
        .method("POST")
        .uri("/transactions")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();

    let (status, bytes) = common::call(router.clone(), req).await;
    assert_eq!(status, StatusCode::CREATED);
    let created = common::parse_json(bytes);
    let transaction_id = created["transaction_id"].as_str().unwrap().to_string();

    // Re-posting the same idempotency key must return the same transaction,
    // still as 201, with a non-null message (§6 idempotent replay).
    let req2 = Request::builder()
        .method("POST")
        .uri("/transactions")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    let (status2, bytes2) = common::call(router.clone(), req2).await;
    assert_eq!(status2, StatusCode::CREATED);
    let replay = common::parse_json(bytes2);
    assert_eq!(replay["transaction_id"], transaction_id);
    assert!(!replay["message"].is_null());

    let get_req = Request::builder()
        .method("GET")
        .uri(format!("/transactions/{transaction_id}"))
        .body(Body::empty())
        .unwrap();
    let (get_status, get_bytes) = common::call(router, get_req).await;
    assert_eq!(get_status, StatusCode::OK);
    let fetched = common::parse_json(get_bytes);
    assert_eq!(fetched["id"], transaction_id);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL; run against a disposable Postgres instance"]
async fn health_endpoint_reports_ok_without_a_seeded_account() {
    let (router, _pool) = common::make_router().await;
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, bytes) = common::call(router, req).await;
    assert_eq!(status, StatusCode::OK);
    let body = common::parse_json(bytes);
    assert_eq!(body["ok"], true);
}
