//! Request and response types for all txrisk-daemon HTTP endpoints (§6).
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded
//! by Axum and decoded by tests. No business logic lives here.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use txrisk_schemas::{Channel, Transaction, TransactionStatus};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// Error payload (§7: "ingest returns a concise error payload on
// validation/domain errors")
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

// ---------------------------------------------------------------------------
// POST /transactions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct IngestTransactionRequest {
    pub account_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub merchant: String,
    pub merchant_category: String,
    pub location: String,
    pub country: String,
    pub channel: Channel,
    pub idempotency_key: String,
    #[serde(default = "default_metadata")]
    pub metadata: Value,
}

fn default_metadata() -> Value {
    Value::Object(Default::default())
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestTransactionResponse {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

// ---------------------------------------------------------------------------
// POST /transactions/batch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct BatchIngestRequest {
    pub transactions: Vec<IngestTransactionRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchRowResult {
    pub idempotency_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<IngestTransactionResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchIngestResponse {
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<BatchRowResult>,
}

// ---------------------------------------------------------------------------
// GET /transactions/{id}
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct TransactionResponse(pub Transaction);

// ---------------------------------------------------------------------------
// /risk/* analytics reads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RiskSummaryQuery {
    /// `YYYY-MM-DD`; defaults to today (UTC) when absent.
    #[serde(default)]
    pub date: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskDistributionQuery {
    #[serde(default = "default_days")]
    pub days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopRulesQuery {
    #[serde(default = "default_days")]
    pub days: i64,
    #[serde(default = "default_top_rules_limit")]
    pub limit: i64,
}

fn default_days() -> i64 {
    7
}

fn default_top_rules_limit() -> i64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountRiskQuery {
    #[serde(default = "default_account_risk_limit")]
    pub limit: i64,
}

fn default_account_risk_limit() -> i64 {
    20
}

// ---------------------------------------------------------------------------
// /experiments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct CreateExperimentRequest {
    pub name: String,
    #[serde(default)]
    pub control_rule_ids: Vec<String>,
    #[serde(default)]
    pub test_rule_ids: Vec<String>,
    pub traffic_split: f64,
}
