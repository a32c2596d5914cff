//! txrisk-schemas
//!
//! Shared wire/persistence DTOs for the risk-scoring pipeline: the data
//! model of §3 (Account, Transaction, RiskScore, Rule, Experiment,
//! TransactionEvent) plus the CDC envelope shape consumed by txrisk-analytics.
//! Pure data, no behavior.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Standard,
    Premium,
    Business,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskProfile {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Suspended,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub owner: String,
    pub account_type: AccountType,
    pub risk_profile: RiskProfile,
    pub status: AccountStatus,
}

impl Account {
    pub fn is_active(&self) -> bool {
        matches!(self.status, AccountStatus::Active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Online,
    Pos,
    Atm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Processed,
    Flagged,
    Blocked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub account_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub merchant: String,
    pub merchant_category: String,
    pub location: String,
    pub country: String,
    pub channel: Channel,
    pub status: TransactionStatus,
    pub idempotency_key: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringPath {
    Fast,
    Full,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskScore {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub transaction_created_at: DateTime<Utc>,
    pub composite_score: f64,
    pub rule_score: f64,
    pub behavioral_score: f64,
    pub ml_score: Option<f64>,
    pub risk_level: RiskLevel,
    pub rules_triggered: BTreeSet<String>,
    pub anomalies_detected: BTreeSet<String>,
    pub features: Value,
    pub model_version: String,
    pub scoring_path: ScoringPath,
    pub processing_time_ms: i64,
    pub experiment_id: Option<Uuid>,
    pub experiment_group: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComparisonOp {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Neq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompoundOp {
    And,
    Or,
}

/// A rule condition: closed tagged-variant evaluator surface. No
/// interpretive eval of arbitrary expressions (§9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleCondition {
    Threshold {
        field: String,
        op: ComparisonOp,
        value: f64,
    },
    Compound {
        op: CompoundOp,
        children: Vec<RuleCondition>,
    },
    TimeRange {
        field: String,
        start: u8,
        end: u8,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub condition: RuleCondition,
    pub score_impact: f64,
    pub nominal_risk_level: RiskLevel,
    pub priority: i32,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    Draft,
    Running,
    Paused,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentGroup {
    Control,
    Test,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id: Uuid,
    pub name: String,
    pub control_rule_ids: Vec<String>,
    pub test_rule_ids: Vec<String>,
    pub traffic_split: f64,
    pub status: ExperimentStatus,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Queue payload (§3, §6 "Queue on-wire message").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub transaction_id: Uuid,
    pub account_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub merchant: String,
    pub location: String,
    pub country: String,
    pub channel: Channel,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
}

/// Envelope appended to the `transactions` stream: `{ "data": <json> }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEnvelope {
    pub data: TransactionEvent,
}

/// Dead-letter entry shape appended to `transactions-dlq`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEnvelope {
    pub data: TransactionEvent,
    pub error: String,
}

/// CDC input message (Debezium-shaped, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdcSource {
    pub table: String,
    pub lsn: i64,
    #[serde(rename = "txId")]
    pub tx_id: i64,
    pub ts_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CdcOp {
    /// create
    C,
    /// update
    U,
    /// delete
    D,
    /// read/snapshot
    R,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdcMessage {
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub source: CdcSource,
    pub op: CdcOp,
    pub ts_ms: i64,
}
