//! Ingest service (C3, §4.1): validate, dedupe by idempotency key, persist a
//! pending transaction, publish a `TransactionEvent`, emit a best-effort
//! audit record. A thin orchestrator over ports the caller (the daemon, or a
//! test harness) supplies — this crate has no I/O of its own, grounded on
//! the check-then-act shape of an idempotent-consumer guard (see
//! `DESIGN.md`).

use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::warn;
use txrisk_queue::QueuePort;
use txrisk_schemas::{AccountStatus, Channel, Transaction, TransactionEvent, TransactionStatus};
use uuid::Uuid;

pub const MAX_BATCH_SIZE: usize = 1000;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("account {0} is not active")]
    AccountInactive(Uuid),
    #[error("account {0} not found")]
    AccountNotFound(Uuid),
    #[error(transparent)]
    TransientIo(#[from] anyhow::Error),
}

/// A raw ingest request before validation. `channel` is already a typed enum
/// because decoding an unrecognized wire value into it is itself the "channel
/// in enum" check (§4.1) — the HTTP layer that deserializes the JSON body
/// owns that boundary.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub account_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub merchant: String,
    pub merchant_category: String,
    pub location: String,
    pub country: String,
    pub channel: Channel,
    pub idempotency_key: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    /// Present when the idempotency key had already been seen (§4.1: "never
    /// create a duplicate, never republish").
    pub message: Option<&'static str>,
}

/// Persistence port the ingest service needs.
#[async_trait::async_trait]
pub trait IngestRepo: Send + Sync {
    async fn find_by_idempotency_key(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<Transaction>, IngestError>;
    async fn account_status(&self, account_id: Uuid) -> Result<Option<AccountStatus>, IngestError>;
    /// Allocates `id` and `created_at`; returns the persisted pending row.
    async fn insert_pending(&self, new: NewTransaction) -> Result<Transaction, IngestError>;
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub account_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub merchant: String,
    pub merchant_category: String,
    pub location: String,
    pub country: String,
    pub channel: Channel,
    pub idempotency_key: String,
    pub metadata: serde_json::Value,
}

/// Best-effort audit sink: failures never fail ingest (§4.1, §7).
#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, transaction_id: Uuid, event_type: &str, payload: serde_json::Value);
}

pub struct NoopAudit;

#[async_trait::async_trait]
impl AuditSink for NoopAudit {
    async fn record(&self, _transaction_id: Uuid, _event_type: &str, _payload: serde_json::Value) {}
}

pub fn validate(req: &IngestRequest) -> Result<(), IngestError> {
    if req.amount <= Decimal::ZERO {
        return Err(IngestError::Validation("amount must be > 0".into()));
    }
    if req.currency.len() != 3 {
        return Err(IngestError::Validation(
            "currency must be a 3-letter code".into(),
        ));
    }
    if req.idempotency_key.trim().is_empty() {
        return Err(IngestError::Validation(
            "idempotency_key is required".into(),
        ));
    }
    if req.account_id.is_nil() {
        return Err(IngestError::Validation("account_id is required".into()));
    }
    Ok(())
}

/// Ingest one transaction (§4.1). Publish failure does not roll back the DB
/// write: the transaction stays `pending` and a reconciliation sweep
/// (out of scope) is responsible for recovering unpublished events.
pub async fn ingest(
    repo: &dyn IngestRepo,
    queue: &dyn QueuePort,
    audit: &dyn AuditSink,
    req: IngestRequest,
) -> Result<IngestOutcome, IngestError> {
    validate(&req)?;

    if let Some(existing) = repo.find_by_idempotency_key(&req.idempotency_key).await? {
        return Ok(IngestOutcome {
            transaction_id: existing.id,
            status: existing.status,
            idempotency_key: existing.idempotency_key,
            created_at: existing.created_at,
            message: Some("idempotent: existing transaction returned"),
        });
    }

    match repo.account_status(req.account_id).await? {
        Some(AccountStatus::Active) => {}
        Some(_) => return Err(IngestError::AccountInactive(req.account_id)),
        None => return Err(IngestError::AccountNotFound(req.account_id)),
    }

    let tx = repo
        .insert_pending(NewTransaction {
            account_id: req.account_id,
            amount: req.amount,
            currency: req.currency.clone(),
            merchant: req.merchant.clone(),
            merchant_category: req.merchant_category.clone(),
            location: req.location.clone(),
            country: req.country.clone(),
            channel: req.channel,
            idempotency_key: req.idempotency_key.clone(),
            metadata: req.metadata.clone(),
        })
        .await?;

    let event = TransactionEvent {
        transaction_id: tx.id,
        account_id: tx.account_id,
        amount: tx.amount,
        currency: tx.currency.clone(),
        merchant: tx.merchant.clone(),
        location: tx.location.clone(),
        country: tx.country.clone(),
        channel: tx.channel,
        created_at: tx.created_at,
        retry_count: 0,
    };

    if let Err(e) = queue.publish(&event).await {
        warn!(transaction_id = %tx.id, error = %e, "failed to publish transaction event; transaction remains pending");
    }

    audit
        .record(
            tx.id,
            "transaction.ingested",
            serde_json::json!({ "account_id": tx.account_id, "amount": tx.amount.to_string() }),
        )
        .await;

    Ok(IngestOutcome {
        transaction_id: tx.id,
        status: tx.status,
        idempotency_key: tx.idempotency_key,
        created_at: tx.created_at,
        message: None,
    })
}

#[derive(Debug, Clone)]
pub struct BatchRowOutcome {
    pub idempotency_key: String,
    pub result: Result<IngestOutcome, String>,
}

/// Batch variant (§4.1): up to `MAX_BATCH_SIZE` requests, inserted in one DB
/// batch with per-row on-conflict-skip, events published in a single
/// pipelined batch. Individual failures are reported per row rather than
/// failing the whole batch.
pub async fn ingest_batch(
    repo: &dyn IngestRepo,
    queue: &dyn QueuePort,
    audit: &dyn AuditSink,
    reqs: Vec<IngestRequest>,
) -> Result<Vec<BatchRowOutcome>, IngestError> {
    if reqs.len() > MAX_BATCH_SIZE {
        return Err(IngestError::Validation(format!(
            "batch size {} exceeds max {}",
            reqs.len(),
            MAX_BATCH_SIZE
        )));
    }

    let mut outcomes = Vec::with_capacity(reqs.len());
    let mut to_publish: Vec<TransactionEvent> = Vec::new();

    for req in reqs {
        let key = req.idempotency_key.clone();
        match ingest_one_for_batch(repo, audit, req).await {
            Ok((outcome, fresh_tx)) => {
                if let Some(tx) = fresh_tx {
                    to_publish.push(TransactionEvent {
                        transaction_id: tx.id,
                        account_id: tx.account_id,
                        amount: tx.amount,
                        currency: tx.currency,
                        merchant: tx.merchant,
                        location: tx.location,
                        country: tx.country,
                        channel: tx.channel,
                        created_at: tx.created_at,
                        retry_count: 0,
                    });
                }
                outcomes.push(BatchRowOutcome {
                    idempotency_key: key,
                    result: Ok(outcome),
                });
            }
            Err(e) => outcomes.push(BatchRowOutcome {
                idempotency_key: key,
                result: Err(e.to_string()),
            }),
        }
    }

    if !to_publish.is_empty() {
        if let Err(e) = queue.publish_batch(&to_publish).await {
            warn!(count = to_publish.len(), error = %e, "failed to publish batch of transaction events");
        }
    }

    Ok(outcomes)
}

/// Same validate/dedupe/persist/audit steps as [`ingest`], but defers
/// publishing so the batch caller can pipeline every row's event in one call.
/// Returns the fresh `Transaction` only when a new row was actually inserted
/// (idempotent hits must never republish, §4.1).
async fn ingest_one_for_batch(
    repo: &dyn IngestRepo,
    audit: &dyn AuditSink,
    req: IngestRequest,
) -> Result<(IngestOutcome, Option<Transaction>), IngestError> {
    validate(&req)?;

    if let Some(existing) = repo.find_by_idempotency_key(&req.idempotency_key).await? {
        return Ok((
            IngestOutcome {
                transaction_id: existing.id,
                status: existing.status,
                idempotency_key: existing.idempotency_key,
                created_at: existing.created_at,
                message: Some("idempotent: existing transaction returned"),
            },
            None,
        ));
    }

    match repo.account_status(req.account_id).await? {
        Some(AccountStatus::Active) => {}
        Some(_) => return Err(IngestError::AccountInactive(req.account_id)),
        None => return Err(IngestError::AccountNotFound(req.account_id)),
    }

    let tx = repo
        .insert_pending(NewTransaction {
            account_id: req.account_id,
            amount: req.amount,
            currency: req.currency.clone(),
            merchant: req.merchant.clone(),
            merchant_category: req.merchant_category.clone(),
            location: req.location.clone(),
            country: req.country.clone(),
            channel: req.channel,
            idempotency_key: req.idempotency_key.clone(),
            metadata: req.metadata.clone(),
        })
        .await?;

    audit
        .record(
            tx.id,
            "transaction.ingested",
            serde_json::json!({ "account_id": tx.account_id, "amount": tx.amount.to_string() }),
        )
        .await;

    Ok((
        IngestOutcome {
            transaction_id: tx.id,
            status: tx.status,
            idempotency_key: tx.idempotency_key.clone(),
            created_at: tx.created_at,
            message: None,
        },
        Some(tx),
    ))
}

/// Default block timeout used by callers that don't have a tighter deadline
/// of their own (e.g. a reconciliation sweep polling C2 directly).
pub const DEFAULT_BLOCK_TIMEOUT: Duration = Duration::from_millis(100);
