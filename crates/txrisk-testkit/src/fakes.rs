//! In-memory fakes for the persistence ports (`IngestRepo`, `ScoringRepo`):
//! no Postgres, same semantics, so scenario tests in this crate and others
//! can exercise ingest -> queue -> scoring end to end without a live
//! database.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use txrisk_features::{AccountHistory, HistoryEntry};
use txrisk_ingest::{IngestError, IngestRepo, NewTransaction};
use txrisk_rules::baseline_rules;
use txrisk_scoring::{ScoringError, ScoringRepo};
use txrisk_schemas::{
    Account, AccountStatus, RiskProfile, RiskScore, Rule, Transaction, TransactionStatus,
};
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    accounts: HashMap<Uuid, Account>,
    transactions: HashMap<Uuid, Transaction>,
    by_idempotency_key: HashMap<String, Uuid>,
    scores: HashMap<Uuid, RiskScore>,
    rules: Vec<Rule>,
}

/// A single in-memory store shared by both ports (mirrors `TxRiskDb` owning
/// both `IngestRepo` and `ScoringRepo` over one pool).
pub struct FakeRepo {
    inner: Mutex<Inner>,
}

impl Default for FakeRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRepo {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                rules: baseline_rules(),
                ..Default::default()
            }),
        }
    }

    pub fn seed_account(&self, account: Account) {
        self.inner.lock().unwrap().accounts.insert(account.id, account);
    }

    /// Seed a prior, already-processed transaction for an account's rolling
    /// window — used to build up velocity/spending history ahead of a
    /// scenario's transaction under test.
    pub fn seed_history(&self, account_id: Uuid, entry: HistoryEntry, status: TransactionStatus) {
        let id = Uuid::new_v4();
        let tx = Transaction {
            id,
            account_id,
            amount: entry.amount,
            currency: "USD".to_string(),
            merchant: entry.merchant.clone(),
            merchant_category: "general".to_string(),
            location: entry.location.clone(),
            country: entry.country.clone(),
            channel: entry.channel,
            status,
            idempotency_key: format!("seed-{id}"),
            metadata: serde_json::Value::Null,
            created_at: entry.created_at,
            processed_at: Some(entry.created_at),
        };
        self.inner.lock().unwrap().transactions.insert(id, tx);
    }

    pub fn get_transaction(&self, id: Uuid) -> Option<Transaction> {
        self.inner.lock().unwrap().transactions.get(&id).cloned()
    }

    pub fn get_account(&self, id: Uuid) -> Option<Account> {
        self.inner.lock().unwrap().accounts.get(&id).cloned()
    }

    pub fn get_score(&self, transaction_id: Uuid) -> Option<RiskScore> {
        self.inner.lock().unwrap().scores.get(&transaction_id).cloned()
    }

    pub fn transaction_count(&self) -> usize {
        self.inner.lock().unwrap().transactions.len()
    }
}

#[async_trait]
impl IngestRepo for FakeRepo {
    async fn find_by_idempotency_key(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<Transaction>, IngestError> {
        let guard = self.inner.lock().unwrap();
        Ok(guard
            .by_idempotency_key
            .get(idempotency_key)
            .and_then(|id| guard.transactions.get(id))
            .cloned())
    }

    async fn account_status(&self, account_id: Uuid) -> Result<Option<AccountStatus>, IngestError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .accounts
            .get(&account_id)
            .map(|a| a.status))
    }

    async fn insert_pending(&self, new: NewTransaction) -> Result<Transaction, IngestError> {
        let mut guard = self.inner.lock().unwrap();
        if guard.by_idempotency_key.contains_key(&new.idempotency_key) {
            return Err(IngestError::Validation(format!(
                "idempotency_key already exists: {}",
                new.idempotency_key
            )));
        }
        let id = Uuid::new_v4();
        let created_at = Utc::now();
        let tx = Transaction {
            id,
            account_id: new.account_id,
            amount: new.amount,
            currency: new.currency,
            merchant: new.merchant,
            merchant_category: new.merchant_category,
            location: new.location,
            country: new.country,
            channel: new.channel,
            status: TransactionStatus::Pending,
            idempotency_key: new.idempotency_key.clone(),
            metadata: new.metadata,
            created_at,
            processed_at: None,
        };
        guard.by_idempotency_key.insert(new.idempotency_key, id);
        guard.transactions.insert(id, tx.clone());
        Ok(tx)
    }
}

#[async_trait]
impl ScoringRepo for FakeRepo {
    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>, ScoringError> {
        Ok(self.inner.lock().unwrap().transactions.get(&id).cloned())
    }

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, ScoringError> {
        Ok(self.inner.lock().unwrap().accounts.get(&id).cloned())
    }

    async fn account_history(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<AccountHistory, ScoringError> {
        let guard = self.inner.lock().unwrap();
        let entries = guard
            .transactions
            .values()
            .filter(|t| t.account_id == account_id && t.created_at <= now)
            .map(|t| HistoryEntry {
                amount: t.amount,
                location: t.location.clone(),
                merchant: t.merchant.clone(),
                country: t.country.clone(),
                channel: t.channel,
                created_at: t.created_at,
                status: t.status,
            })
            .collect::<Vec<_>>();
        let mut history = AccountHistory { entries };
        history.entries.sort_by_key(|e| e.created_at);
        Ok(history)
    }

    async fn active_rules(&self) -> Result<Vec<Rule>, ScoringError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .rules
            .iter()
            .filter(|r| r.enabled)
            .cloned()
            .collect())
    }

    async fn save_score(
        &self,
        transaction_id: Uuid,
        new_status: TransactionStatus,
        processed_at: DateTime<Utc>,
        score: &RiskScore,
    ) -> Result<(), ScoringError> {
        let mut guard = self.inner.lock().unwrap();
        if let Some(tx) = guard.transactions.get_mut(&transaction_id) {
            tx.status = new_status;
            tx.processed_at = Some(processed_at);
        }
        guard.scores.insert(transaction_id, score.clone());
        Ok(())
    }

    async fn escalate_account_profile(
        &self,
        account_id: Uuid,
        min_profile: RiskProfile,
    ) -> Result<(), ScoringError> {
        let mut guard = self.inner.lock().unwrap();
        if let Some(account) = guard.accounts.get_mut(&account_id) {
            if min_profile > account.risk_profile {
                account.risk_profile = min_profile;
            }
        }
        Ok(())
    }
}

/// A transient-failure-injecting wrapper around `FakeRepo::save_score`, used
/// by the worker retry/dead-letter scenario (S6, §8): throws on the first
/// `fail_count` calls, then delegates.
pub struct FlakyScoringRepo {
    pub inner: Arc<FakeRepo>,
    fail_remaining: Mutex<u32>,
}

impl FlakyScoringRepo {
    /// Wraps the *same* `Arc<FakeRepo>` the harness uses for ingest, so
    /// transactions ingested through one port are visible for scoring
    /// through the other.
    pub fn new(inner: Arc<FakeRepo>, fail_count: u32) -> Self {
        Self {
            inner,
            fail_remaining: Mutex::new(fail_count),
        }
    }
}

#[async_trait]
impl ScoringRepo for FlakyScoringRepo {
    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>, ScoringError> {
        ScoringRepo::get_transaction(&self.inner, id).await
    }

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, ScoringError> {
        ScoringRepo::get_account(&self.inner, id).await
    }

    async fn account_history(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<AccountHistory, ScoringError> {
        ScoringRepo::account_history(&self.inner, account_id, now).await
    }

    async fn active_rules(&self) -> Result<Vec<Rule>, ScoringError> {
        ScoringRepo::active_rules(&self.inner).await
    }

    async fn save_score(
        &self,
        transaction_id: Uuid,
        new_status: TransactionStatus,
        processed_at: DateTime<Utc>,
        score: &RiskScore,
    ) -> Result<(), ScoringError> {
        let mut remaining = self.fail_remaining.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(ScoringError::TransientIo(anyhow::anyhow!(
                "injected transient failure ({remaining} remaining)"
            )));
        }
        drop(remaining);
        self.inner
            .save_score(transaction_id, new_status, processed_at, score)
            .await
    }

    async fn escalate_account_profile(
        &self,
        account_id: Uuid,
        min_profile: RiskProfile,
    ) -> Result<(), ScoringError> {
        ScoringRepo::escalate_account_profile(&self.inner, account_id, min_profile).await
    }
}

pub const DEFAULT_CURRENCY: &str = "USD";

pub fn decimal(v: &str) -> Decimal {
    v.parse().expect("valid decimal literal")
}
