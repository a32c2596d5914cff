//! Axum router and all HTTP handlers for txrisk-daemon (§6 external
//! interfaces).
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. All handlers are `pub(crate)` so the scenario tests in
//! `tests/` can compose the router directly.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use chrono::NaiveDate;
use futures_util::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;
use txrisk_experiments::ExperimentError;
use txrisk_ingest::{ingest, ingest_batch, IngestError, IngestOutcome, IngestRequest};
use txrisk_scoring::ScoringRepo;
use uuid::Uuid;

use crate::{
    api_types::{
        AccountRiskQuery, BatchIngestRequest, BatchIngestResponse, BatchRowResult,
        CreateExperimentRequest, ErrorResponse, HealthResponse, IngestTransactionRequest,
        IngestTransactionResponse, RiskDistributionQuery, RiskSummaryQuery, TopRulesQuery,
        TransactionResponse,
    },
    state::{AppState, BusMsg},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/transactions", post(create_transaction))
        .route("/transactions/batch", post(create_transaction_batch))
        .route("/transactions/:id", get(get_transaction))
        .route("/risk/summary", get(risk_summary))
        .route("/risk/distribution", get(risk_distribution))
        .route("/risk/rules/top", get(risk_rules_top))
        .route("/risk/account/:account_id", get(risk_account))
        .route("/experiments", post(create_experiment))
        .route("/experiments", get(list_experiments))
        .route("/experiments/:id", get(get_experiment))
        .route("/experiments/:id", delete(delete_experiment))
        .route("/experiments/:id/start", post(start_experiment))
        .route("/experiments/:id/pause", post(pause_experiment))
        .route("/experiments/:id/stop", post(stop_experiment))
        .route("/experiments/:id/results", get(experiment_results))
        .route("/experiments/:id/significance", get(experiment_significance))
        .route("/status/stream", get(status_stream))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /transactions
// ---------------------------------------------------------------------------

fn into_ingest_request(req: IngestTransactionRequest) -> IngestRequest {
    IngestRequest {
        account_id: req.account_id,
        amount: req.amount,
        currency: req.currency,
        merchant: req.merchant,
        merchant_category: req.merchant_category,
        location: req.location,
        country: req.country,
        channel: req.channel,
        idempotency_key: req.idempotency_key,
        metadata: req.metadata,
    }
}

fn into_ingest_response(outcome: IngestOutcome) -> IngestTransactionResponse {
    IngestTransactionResponse {
        transaction_id: outcome.transaction_id,
        status: outcome.status,
        idempotency_key: outcome.idempotency_key,
        created_at: outcome.created_at,
        message: outcome.message,
    }
}

/// Maps an `IngestError` to its HTTP status (§7): validation and domain
/// errors are rejected at the API as 400; transient I/O is a 500.
fn ingest_error_response(err: IngestError) -> Response {
    let status = match &err {
        IngestError::Validation(_) | IngestError::AccountInactive(_) | IngestError::AccountNotFound(_) => {
            StatusCode::BAD_REQUEST
        }
        IngestError::TransientIo(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorResponse::new(err.to_string()))).into_response()
}

pub(crate) async fn create_transaction(
    State(st): State<Arc<AppState>>,
    Json(body): Json<IngestTransactionRequest>,
) -> Response {
    let req = into_ingest_request(body);
    match ingest(&st.db, st.queue.as_ref(), st.audit.as_ref(), req).await {
        // Idempotent hit still returns 201 with the original record (§6).
        Ok(outcome) => (StatusCode::CREATED, Json(into_ingest_response(outcome))).into_response(),
        Err(e) => ingest_error_response(e),
    }
}

// ---------------------------------------------------------------------------
// POST /transactions/batch
// ---------------------------------------------------------------------------

pub(crate) async fn create_transaction_batch(
    State(st): State<Arc<AppState>>,
    Json(body): Json<BatchIngestRequest>,
) -> Response {
    let reqs: Vec<IngestRequest> = body.transactions.into_iter().map(into_ingest_request).collect();

    match ingest_batch(&st.db, st.queue.as_ref(), st.audit.as_ref(), reqs).await {
        Ok(rows) => {
            let mut successful = 0usize;
            let mut failed = 0usize;
            let results = rows
                .into_iter()
                .map(|row| match row.result {
                    Ok(outcome) => {
                        successful += 1;
                        BatchRowResult {
                            idempotency_key: row.idempotency_key,
                            outcome: Some(into_ingest_response(outcome)),
                            error: None,
                        }
                    }
                    Err(msg) => {
                        failed += 1;
                        BatchRowResult {
                            idempotency_key: row.idempotency_key,
                            outcome: None,
                            error: Some(msg),
                        }
                    }
                })
                .collect();
            (
                StatusCode::OK,
                Json(BatchIngestResponse { successful, failed, results }),
            )
                .into_response()
        }
        Err(e) => ingest_error_response(e),
    }
}

// ---------------------------------------------------------------------------
// GET /transactions/{id}
// ---------------------------------------------------------------------------

pub(crate) async fn get_transaction(State(st): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    match ScoringRepo::get_transaction(&st.db, id).await {
        Ok(Some(tx)) => (StatusCode::OK, Json(TransactionResponse(tx))).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, Json(ErrorResponse::new("transaction not found"))).into_response(),
        Err(e) => {
            warn!(transaction_id = %id, error = %e, "get_transaction repository error");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse::new(e.to_string()))).into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// /risk/* analytics reads
// ---------------------------------------------------------------------------

fn internal_error(e: impl std::fmt::Display) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse::new(e.to_string()))).into_response()
}

pub(crate) async fn risk_summary(
    State(st): State<Arc<AppState>>,
    Query(q): Query<RiskSummaryQuery>,
) -> Response {
    let date = match q.date {
        Some(raw) => match NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
            Ok(d) => d,
            Err(_) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ErrorResponse::new("date must be YYYY-MM-DD")),
                )
                    .into_response()
            }
        },
        None => chrono::Utc::now().date_naive(),
    };

    match txrisk_db::risk_summary(st.db.pool(), date).await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(e) => internal_error(e),
    }
}

pub(crate) async fn risk_distribution(
    State(st): State<Arc<AppState>>,
    Query(q): Query<RiskDistributionQuery>,
) -> Response {
    match txrisk_db::risk_distribution(st.db.pool(), q.days).await {
        Ok(buckets) => (StatusCode::OK, Json(buckets)).into_response(),
        Err(e) => internal_error(e),
    }
}

pub(crate) async fn risk_rules_top(
    State(st): State<Arc<AppState>>,
    Query(q): Query<TopRulesQuery>,
) -> Response {
    match txrisk_db::top_rules(st.db.pool(), q.days, q.limit).await {
        Ok(rules) => (StatusCode::OK, Json(rules)).into_response(),
        Err(e) => internal_error(e),
    }
}

pub(crate) async fn risk_account(
    State(st): State<Arc<AppState>>,
    Path(account_id): Path<Uuid>,
    Query(q): Query<AccountRiskQuery>,
) -> Response {
    match txrisk_db::account_risk_view(st.db.pool(), account_id, q.limit).await {
        Ok(Some(view)) => (StatusCode::OK, Json(view)).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, Json(ErrorResponse::new("account not found"))).into_response(),
        Err(e) => internal_error(e),
    }
}

// ---------------------------------------------------------------------------
// /experiments
// ---------------------------------------------------------------------------

fn experiment_error_response(err: ExperimentError) -> Response {
    let status = match &err {
        ExperimentError::NotFound(_) => StatusCode::NOT_FOUND,
        ExperimentError::InvalidState { .. } | ExperimentError::InvalidTrafficSplit(_) => {
            StatusCode::CONFLICT
        }
    };
    (status, Json(ErrorResponse::new(err.to_string()))).into_response()
}

pub(crate) async fn create_experiment(
    State(st): State<Arc<AppState>>,
    Json(body): Json<CreateExperimentRequest>,
) -> Response {
    match st
        .experiments
        .create(body.name, body.control_rule_ids, body.test_rule_ids, body.traffic_split)
        .await
    {
        Ok(experiment) => (StatusCode::CREATED, Json(experiment)).into_response(),
        Err(e) => experiment_error_response(e),
    }
}

pub(crate) async fn list_experiments(State(st): State<Arc<AppState>>) -> Response {
    (StatusCode::OK, Json(st.experiments.list().await)).into_response()
}

pub(crate) async fn get_experiment(State(st): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    match st.experiments.get(id).await {
        Ok(experiment) => (StatusCode::OK, Json(experiment)).into_response(),
        Err(e) => experiment_error_response(e),
    }
}

pub(crate) async fn delete_experiment(State(st): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    match st.experiments.delete(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => experiment_error_response(e),
    }
}

pub(crate) async fn start_experiment(State(st): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    match st.experiments.start(id).await {
        Ok(experiment) => (StatusCode::OK, Json(experiment)).into_response(),
        Err(e) => experiment_error_response(e),
    }
}

pub(crate) async fn pause_experiment(State(st): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    match st.experiments.pause(id).await {
        Ok(experiment) => (StatusCode::OK, Json(experiment)).into_response(),
        Err(e) => experiment_error_response(e),
    }
}

pub(crate) async fn stop_experiment(State(st): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    match st.experiments.stop(id).await {
        Ok(experiment) => (StatusCode::OK, Json(experiment)).into_response(),
        Err(e) => experiment_error_response(e),
    }
}

pub(crate) async fn experiment_results(State(st): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    match st.experiments.results(id).await {
        Ok((control, test)) => (
            StatusCode::OK,
            Json(serde_json::json!({ "control": control, "test": test })),
        )
            .into_response(),
        Err(e) => experiment_error_response(e),
    }
}

pub(crate) async fn experiment_significance(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Response {
    match st.experiments.significance(id).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => experiment_error_response(e),
    }
}

// ---------------------------------------------------------------------------
// GET /status/stream (SSE)
// ---------------------------------------------------------------------------

/// Live operator feed: heartbeats and log lines pushed over the internal
/// bus, reframed as Server-Sent Events. One subscriber per connection; a
/// slow reader that falls behind the bus's buffer sees its stream end
/// (`BroadcastStream` yields `Err(Lagged)`, which this filters out as a
/// closed stream rather than replaying stale events).
pub(crate) async fn status_stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    BusMsg::Heartbeat { .. } => "heartbeat",
                    BusMsg::LogLine { .. } => "log",
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(event_name).data(data)))
            }
            Err(_) => None,
        }
    })
}
