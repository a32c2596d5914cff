//! Postgres persistence (C1, §3, §6): accounts, a month-partitioned
//! transaction table, risk scores, the rules catalog, and the append-only
//! audit log. Implements the `ScoringRepo` port from `txrisk-scoring` and
//! the `IngestRepo` port from `txrisk-ingest` over one pool, using the
//! runtime `sqlx::query()` + `.try_get()` idiom (see `DESIGN.md`).

use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use txrisk_features::{AccountHistory, HistoryEntry};
use txrisk_ingest::{IngestError, IngestRepo, NewTransaction};
use txrisk_scoring::{ScoringError, ScoringRepo};
use txrisk_schemas::{
    Account, AccountStatus, AccountType, Channel, ComparisonOp, CompoundOp, Rule, RiskLevel,
    RiskProfile, RiskScore, RuleCondition, ScoringPath, Transaction, TransactionStatus,
};
use uuid::Uuid;

pub const ENV_DB_URL: &str = "DATABASE_URL";

/// Connection pool settings recognized from the environment (§6).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub max_lifetime: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 25,
            min_connections: 5,
            max_lifetime: Duration::from_secs(300),
        }
    }
}

impl PoolConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("DB_MAX_OPEN_CONNS") {
            if let Ok(n) = v.parse() {
                cfg.max_connections = n;
            }
        }
        if let Ok(v) = std::env::var("DB_MAX_IDLE_CONNS") {
            if let Ok(n) = v.parse() {
                cfg.min_connections = n;
            }
        }
        if let Ok(v) = std::env::var("DB_CONN_MAX_LIFETIME") {
            if let Ok(secs) = v.parse::<u64>() {
                cfg.max_lifetime = Duration::from_secs(secs);
            }
        }
        cfg
    }
}

/// Connect to Postgres using `DATABASE_URL` and the pool-sizing env vars
/// (§6: DB_MAX_OPEN_CONNS / DB_MAX_IDLE_CONNS / DB_CONN_MAX_LIFETIME).
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url, &PoolConfig::from_env()).await
}

pub async fn connect(url: &str, cfg: &PoolConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(cfg.max_connections)
        .min_connections(cfg.min_connections)
        .max_lifetime(cfg.max_lifetime)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_transactions_table: bool,
}

pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1 from information_schema.tables
            where table_schema = 'public' and table_name = 'transactions'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_transactions_table: exists,
    })
}

/// Persistence handle implementing both the scoring and ingest ports over a
/// shared pool — C1 exclusively owns persistence (§3).
#[derive(Clone)]
pub struct TxRiskDb {
    pool: PgPool,
}

impl TxRiskDb {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn account_type_str(t: AccountType) -> &'static str {
    match t {
        AccountType::Standard => "standard",
        AccountType::Premium => "premium",
        AccountType::Business => "business",
    }
}

fn parse_account_type(s: &str) -> Result<AccountType> {
    Ok(match s {
        "standard" => AccountType::Standard,
        "premium" => AccountType::Premium,
        "business" => AccountType::Business,
        other => anyhow::bail!("invalid account_type: {other}"),
    })
}

fn risk_profile_str(p: RiskProfile) -> &'static str {
    match p {
        RiskProfile::Low => "low",
        RiskProfile::Medium => "medium",
        RiskProfile::High => "high",
    }
}

fn parse_risk_profile(s: &str) -> Result<RiskProfile> {
    Ok(match s {
        "low" => RiskProfile::Low,
        "medium" => RiskProfile::Medium,
        "high" => RiskProfile::High,
        other => anyhow::bail!("invalid risk_profile: {other}"),
    })
}

fn account_status_str(s: AccountStatus) -> &'static str {
    match s {
        AccountStatus::Active => "active",
        AccountStatus::Suspended => "suspended",
        AccountStatus::Closed => "closed",
    }
}

fn parse_account_status(s: &str) -> Result<AccountStatus> {
    Ok(match s {
        "active" => AccountStatus::Active,
        "suspended" => AccountStatus::Suspended,
        "closed" => AccountStatus::Closed,
        other => anyhow::bail!("invalid account status: {other}"),
    })
}

fn channel_str(c: Channel) -> &'static str {
    match c {
        Channel::Online => "online",
        Channel::Pos => "pos",
        Channel::Atm => "atm",
    }
}

fn parse_channel(s: &str) -> Result<Channel> {
    Ok(match s {
        "online" => Channel::Online,
        "pos" => Channel::Pos,
        "atm" => Channel::Atm,
        other => anyhow::bail!("invalid channel: {other}"),
    })
}

fn status_str(s: TransactionStatus) -> &'static str {
    match s {
        TransactionStatus::Pending => "pending",
        TransactionStatus::Processed => "processed",
        TransactionStatus::Flagged => "flagged",
        TransactionStatus::Blocked => "blocked",
    }
}

fn parse_status(s: &str) -> Result<TransactionStatus> {
    Ok(match s {
        "pending" => TransactionStatus::Pending,
        "processed" => TransactionStatus::Processed,
        "flagged" => TransactionStatus::Flagged,
        "blocked" => TransactionStatus::Blocked,
        other => anyhow::bail!("invalid transaction status: {other}"),
    })
}

fn risk_level_str(l: RiskLevel) -> &'static str {
    match l {
        RiskLevel::Low => "low",
        RiskLevel::Medium => "medium",
        RiskLevel::High => "high",
        RiskLevel::Critical => "critical",
    }
}

fn parse_risk_level(s: &str) -> Result<RiskLevel> {
    Ok(match s {
        "low" => RiskLevel::Low,
        "medium" => RiskLevel::Medium,
        "high" => RiskLevel::High,
        "critical" => RiskLevel::Critical,
        other => anyhow::bail!("invalid risk level: {other}"),
    })
}

fn scoring_path_str(p: ScoringPath) -> &'static str {
    match p {
        ScoringPath::Fast => "fast",
        ScoringPath::Full => "full",
    }
}

fn parse_scoring_path(s: &str) -> Result<ScoringPath> {
    Ok(match s {
        "fast" => ScoringPath::Fast,
        "full" => ScoringPath::Full,
        other => anyhow::bail!("invalid scoring path: {other}"),
    })
}

fn row_to_account(row: &sqlx::postgres::PgRow) -> Result<Account> {
    Ok(Account {
        id: row.try_get("id")?,
        owner: row.try_get("owner")?,
        account_type: parse_account_type(&row.try_get::<String, _>("account_type")?)?,
        risk_profile: parse_risk_profile(&row.try_get::<String, _>("risk_profile")?)?,
        status: parse_account_status(&row.try_get::<String, _>("status")?)?,
    })
}

fn row_to_transaction(row: &sqlx::postgres::PgRow) -> Result<Transaction> {
    Ok(Transaction {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        merchant: row.try_get("merchant")?,
        merchant_category: row.try_get("merchant_category")?,
        location: row.try_get("location")?,
        country: row.try_get("country")?,
        channel: parse_channel(&row.try_get::<String, _>("channel")?)?,
        status: parse_status(&row.try_get::<String, _>("status")?)?,
        idempotency_key: row.try_get("idempotency_key")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
        processed_at: row.try_get("processed_at")?,
    })
}

const TRANSACTION_COLUMNS: &str = "id, account_id, amount, currency, merchant, merchant_category, \
     location, country, channel, status, idempotency_key, metadata, created_at, processed_at";

// ---------------------------------------------------------------------------
// ScoringRepo (C7 port)
// ---------------------------------------------------------------------------

#[async_trait]
impl ScoringRepo for TxRiskDb {
    async fn get_transaction(&self, id: Uuid) -> std::result::Result<Option<Transaction>, ScoringError> {
        let row = sqlx::query(&format!(
            "select {TRANSACTION_COLUMNS} from transactions where id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("get_transaction failed")
        .map_err(ScoringError::TransientIo)?;

        let Some(row) = row else { return Ok(None) };
        let tx = row_to_transaction(&row).map_err(ScoringError::TransientIo)?;
        Ok(Some(tx))
    }

    async fn get_account(&self, id: Uuid) -> std::result::Result<Option<Account>, ScoringError> {
        let row = sqlx::query("select id, owner, account_type, risk_profile, status from accounts where id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("get_account failed")
            .map_err(ScoringError::TransientIo)?;

        let Some(row) = row else { return Ok(None) };
        let acct = row_to_account(&row).map_err(ScoringError::TransientIo)?;
        Ok(Some(acct))
    }

    async fn account_history(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> std::result::Result<AccountHistory, ScoringError> {
        let since = now - chrono::Duration::days(30);
        let rows = sqlx::query(
            r#"
            select amount, location, merchant, country, channel, created_at, status
            from transactions
            where account_id = $1 and created_at >= $2 and created_at <= $3
            order by created_at asc
            "#,
        )
        .bind(account_id)
        .bind(since)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .context("account_history failed")
        .map_err(ScoringError::TransientIo)?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let entry = (|| -> Result<HistoryEntry> {
                Ok(HistoryEntry {
                    amount: row.try_get("amount")?,
                    location: row.try_get("location")?,
                    merchant: row.try_get("merchant")?,
                    country: row.try_get("country")?,
                    channel: parse_channel(&row.try_get::<String, _>("channel")?)?,
                    created_at: row.try_get("created_at")?,
                    status: parse_status(&row.try_get::<String, _>("status")?)?,
                })
            })()
            .map_err(ScoringError::TransientIo)?;
            entries.push(entry);
        }
        Ok(AccountHistory { entries })
    }

    async fn active_rules(&self) -> std::result::Result<Vec<Rule>, ScoringError> {
        let rows = sqlx::query(
            r#"
            select id, name, condition, score_impact, nominal_risk_level, priority, enabled
            from rules
            where enabled = true
            order by priority asc
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("active_rules failed")
        .map_err(ScoringError::TransientIo)?;

        let mut rules = Vec::with_capacity(rows.len());
        for row in rows {
            let rule = (|| -> Result<Rule> {
                let condition: serde_json::Value = row.try_get("condition")?;
                let condition: RuleCondition = serde_json::from_value(condition)?;
                let score_impact: Decimal = row.try_get("score_impact")?;
                Ok(Rule {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    condition,
                    score_impact: score_impact.to_string().parse::<f64>()?,
                    nominal_risk_level: parse_risk_level(&row.try_get::<String, _>("nominal_risk_level")?)?,
                    priority: row.try_get("priority")?,
                    enabled: row.try_get("enabled")?,
                })
            })()
            .map_err(ScoringError::TransientIo)?;
            rules.push(rule);
        }
        Ok(rules)
    }

    async fn save_score(
        &self,
        transaction_id: Uuid,
        new_status: TransactionStatus,
        processed_at: DateTime<Utc>,
        score: &RiskScore,
    ) -> std::result::Result<(), ScoringError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("save_score begin failed")
            .map_err(ScoringError::TransientIo)?;

        sqlx::query(
            r#"
            update transactions
            set status = $1, processed_at = $2
            where id = $3
            "#,
        )
        .bind(status_str(new_status))
        .bind(processed_at)
        .bind(transaction_id)
        .execute(&mut *tx)
        .await
        .context("save_score transaction update failed")
        .map_err(ScoringError::TransientIo)?;

        let rules_triggered = serde_json::to_value(&score.rules_triggered)
            .context("serialize rules_triggered")
            .map_err(ScoringError::TransientIo)?;
        let anomalies_detected = serde_json::to_value(&score.anomalies_detected)
            .context("serialize anomalies_detected")
            .map_err(ScoringError::TransientIo)?;

        sqlx::query(
            r#"
            insert into risk_scores (
                id, transaction_id, transaction_created_at, composite_score, rule_score,
                behavioral_score, ml_score, risk_level, rules_triggered, anomalies_detected,
                features, model_version, scoring_path, processing_time_ms, experiment_id,
                experiment_group
            ) values (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16
            )
            on conflict (transaction_id, transaction_created_at) do update set
                composite_score = excluded.composite_score,
                rule_score = excluded.rule_score,
                behavioral_score = excluded.behavioral_score,
                ml_score = excluded.ml_score,
                risk_level = excluded.risk_level,
                rules_triggered = excluded.rules_triggered,
                anomalies_detected = excluded.anomalies_detected,
                features = excluded.features,
                model_version = excluded.model_version,
                scoring_path = excluded.scoring_path,
                processing_time_ms = excluded.processing_time_ms,
                experiment_id = excluded.experiment_id,
                experiment_group = excluded.experiment_group
            "#,
        )
        .bind(score.id)
        .bind(score.transaction_id)
        .bind(score.transaction_created_at)
        .bind(score.composite_score)
        .bind(score.rule_score)
        .bind(score.behavioral_score)
        .bind(score.ml_score)
        .bind(risk_level_str(score.risk_level))
        .bind(rules_triggered)
        .bind(anomalies_detected)
        .bind(&score.features)
        .bind(&score.model_version)
        .bind(scoring_path_str(score.scoring_path))
        .bind(score.processing_time_ms)
        .bind(score.experiment_id)
        .bind(&score.experiment_group)
        .execute(&mut *tx)
        .await
        .context("save_score risk_scores upsert failed")
        .map_err(ScoringError::TransientIo)?;

        tx.commit()
            .await
            .context("save_score commit failed")
            .map_err(ScoringError::TransientIo)?;

        Ok(())
    }

    async fn escalate_account_profile(
        &self,
        account_id: Uuid,
        min_profile: RiskProfile,
    ) -> std::result::Result<(), ScoringError> {
        sqlx::query(
            r#"
            update accounts
            set risk_profile = $1
            where id = $2
              and (
                (risk_profile = 'low' and $1 <> 'low')
                or (risk_profile = 'medium' and $1 = 'high')
              )
            "#,
        )
        .bind(risk_profile_str(min_profile))
        .bind(account_id)
        .execute(&self.pool)
        .await
        .context("escalate_account_profile failed")
        .map_err(ScoringError::TransientIo)?;

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// IngestRepo (C3 port)
// ---------------------------------------------------------------------------

#[async_trait]
impl IngestRepo for TxRiskDb {
    async fn find_by_idempotency_key(
        &self,
        idempotency_key: &str,
    ) -> std::result::Result<Option<Transaction>, IngestError> {
        let row = sqlx::query(&format!(
            "select {TRANSACTION_COLUMNS} from transactions where idempotency_key = $1"
        ))
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await
        .context("find_by_idempotency_key failed")
        .map_err(IngestError::TransientIo)?;

        let Some(row) = row else { return Ok(None) };
        let tx = row_to_transaction(&row).map_err(IngestError::TransientIo)?;
        Ok(Some(tx))
    }

    async fn account_status(
        &self,
        account_id: Uuid,
    ) -> std::result::Result<Option<AccountStatus>, IngestError> {
        let row: Option<(String,)> = sqlx::query_as("select status from accounts where id = $1")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await
            .context("account_status failed")
            .map_err(IngestError::TransientIo)?;

        let Some((status,)) = row else { return Ok(None) };
        let status = parse_account_status(&status).map_err(IngestError::TransientIo)?;
        Ok(Some(status))
    }

    async fn insert_pending(
        &self,
        new: NewTransaction,
    ) -> std::result::Result<Transaction, IngestError> {
        let id = Uuid::new_v4();
        let created_at = Utc::now();

        let row = sqlx::query(&format!(
            r#"
            insert into transactions (
                id, account_id, amount, currency, merchant, merchant_category, location,
                country, channel, status, idempotency_key, metadata, created_at
            ) values (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, 'pending', $10, $11, $12
            )
            returning {TRANSACTION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(new.account_id)
        .bind(new.amount)
        .bind(&new.currency)
        .bind(&new.merchant)
        .bind(&new.merchant_category)
        .bind(&new.location)
        .bind(&new.country)
        .bind(channel_str(new.channel))
        .bind(&new.idempotency_key)
        .bind(&new.metadata)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await
        .context("insert_pending failed")
        .map_err(IngestError::TransientIo)?;

        row_to_transaction(&row).map_err(IngestError::TransientIo)
    }
}

// ---------------------------------------------------------------------------
// Analytics reads (§6: /risk/summary, /risk/distribution, /risk/rules/top,
// /risk/account/{id}) — read-side queries owned by C1, consumed by the
// daemon's HTTP handlers.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RiskSummary {
    pub date: String,
    pub total_scored: i64,
    pub flagged: i64,
    pub blocked: i64,
    pub processed: i64,
    pub avg_composite_score: f64,
}

pub async fn risk_summary(pool: &PgPool, date: chrono::NaiveDate) -> Result<RiskSummary> {
    let start = date.and_hms_opt(0, 0, 0).unwrap().and_utc();
    let end = start + chrono::Duration::days(1);

    let row = sqlx::query(
        r#"
        select
            count(*)::bigint as total_scored,
            coalesce(sum(case when t.status = 'flagged' then 1 else 0 end), 0)::bigint as flagged,
            coalesce(sum(case when t.status = 'blocked' then 1 else 0 end), 0)::bigint as blocked,
            coalesce(sum(case when t.status = 'processed' then 1 else 0 end), 0)::bigint as processed,
            coalesce(avg(r.composite_score), 0.0) as avg_composite_score
        from risk_scores r
        join transactions t on t.id = r.transaction_id
        where r.transaction_created_at >= $1 and r.transaction_created_at < $2
        "#,
    )
    .bind(start)
    .bind(end)
    .fetch_one(pool)
    .await
    .context("risk_summary failed")?;

    Ok(RiskSummary {
        date: date.to_string(),
        total_scored: row.try_get("total_scored")?,
        flagged: row.try_get("flagged")?,
        blocked: row.try_get("blocked")?,
        processed: row.try_get("processed")?,
        avg_composite_score: row.try_get("avg_composite_score")?,
    })
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RiskDistributionBucket {
    pub risk_level: String,
    pub count: i64,
}

pub async fn risk_distribution(pool: &PgPool, days: i64) -> Result<Vec<RiskDistributionBucket>> {
    let since = Utc::now() - chrono::Duration::days(days);
    let rows = sqlx::query(
        r#"
        select risk_level, count(*)::bigint as count
        from risk_scores
        where transaction_created_at >= $1
        group by risk_level
        order by risk_level asc
        "#,
    )
    .bind(since)
    .fetch_all(pool)
    .await
    .context("risk_distribution failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(RiskDistributionBucket {
            risk_level: row.try_get("risk_level")?,
            count: row.try_get("count")?,
        });
    }
    Ok(out)
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TopRule {
    pub rule_id: String,
    pub trigger_count: i64,
}

/// Top rule-ids by trigger count across the last `days` days.
/// `rules_triggered` is stored as a JSON array of strings — unnested with
/// `jsonb_array_elements_text`.
pub async fn top_rules(pool: &PgPool, days: i64, limit: i64) -> Result<Vec<TopRule>> {
    let since = Utc::now() - chrono::Duration::days(days);
    let rows = sqlx::query(
        r#"
        select rule_id, count(*)::bigint as trigger_count
        from risk_scores, jsonb_array_elements_text(rules_triggered) as rule_id
        where transaction_created_at >= $1
        group by rule_id
        order by trigger_count desc
        limit $2
        "#,
    )
    .bind(since)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("top_rules failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(TopRule {
            rule_id: row.try_get("rule_id")?,
            trigger_count: row.try_get("trigger_count")?,
        });
    }
    Ok(out)
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AccountRiskView {
    pub account: Account,
    pub latest_scores: Vec<RiskScore>,
}

pub async fn account_risk_view(pool: &PgPool, account_id: Uuid, limit: i64) -> Result<Option<AccountRiskView>> {
    let account_row = sqlx::query("select id, owner, account_type, risk_profile, status from accounts where id = $1")
        .bind(account_id)
        .fetch_optional(pool)
        .await
        .context("account_risk_view account lookup failed")?;

    let Some(account_row) = account_row else { return Ok(None) };
    let account = row_to_account(&account_row)?;

    let rows = sqlx::query(
        r#"
        select r.id, r.transaction_id, r.transaction_created_at, r.composite_score, r.rule_score,
               r.behavioral_score, r.ml_score, r.risk_level, r.rules_triggered, r.anomalies_detected,
               r.features, r.model_version, r.scoring_path, r.processing_time_ms, r.experiment_id,
               r.experiment_group
        from risk_scores r
        join transactions t on t.id = r.transaction_id
        where t.account_id = $1
        order by r.transaction_created_at desc
        limit $2
        "#,
    )
    .bind(account_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("account_risk_view scores lookup failed")?;

    let mut latest_scores = Vec::with_capacity(rows.len());
    for row in rows {
        let rules_triggered: serde_json::Value = row.try_get("rules_triggered")?;
        let rules_triggered: BTreeSet<String> = serde_json::from_value(rules_triggered)?;
        let anomalies_detected: serde_json::Value = row.try_get("anomalies_detected")?;
        let anomalies_detected: BTreeSet<String> = serde_json::from_value(anomalies_detected)?;

        latest_scores.push(RiskScore {
            id: row.try_get("id")?,
            transaction_id: row.try_get("transaction_id")?,
            transaction_created_at: row.try_get("transaction_created_at")?,
            composite_score: row.try_get("composite_score")?,
            rule_score: row.try_get("rule_score")?,
            behavioral_score: row.try_get("behavioral_score")?,
            ml_score: row.try_get("ml_score")?,
            risk_level: parse_risk_level(&row.try_get::<String, _>("risk_level")?)?,
            rules_triggered,
            anomalies_detected,
            features: row.try_get("features")?,
            model_version: row.try_get("model_version")?,
            scoring_path: parse_scoring_path(&row.try_get::<String, _>("scoring_path")?)?,
            processing_time_ms: row.try_get("processing_time_ms")?,
            experiment_id: row.try_get("experiment_id")?,
            experiment_group: row.try_get("experiment_group")?,
        });
    }

    Ok(Some(AccountRiskView { account, latest_scores }))
}

/// Insert (or replace) a rule in the catalog. `score_impact` is rounded to
/// two-decimal precision before storage (§6: "stored as decimals with
/// two-decimal precision").
pub async fn upsert_rule(pool: &PgPool, rule: &Rule) -> Result<()> {
    let condition = serde_json::to_value(&rule.condition).context("serialize rule condition")?;
    let score_impact = Decimal::from_str(&format!("{:.2}", rule.score_impact))
        .context("rule score_impact to decimal")?;

    sqlx::query(
        r#"
        insert into rules (id, name, condition, score_impact, nominal_risk_level, priority, enabled)
        values ($1, $2, $3, $4, $5, $6, $7)
        on conflict (id) do update set
            name = excluded.name,
            condition = excluded.condition,
            score_impact = excluded.score_impact,
            nominal_risk_level = excluded.nominal_risk_level,
            priority = excluded.priority,
            enabled = excluded.enabled
        "#,
    )
    .bind(&rule.id)
    .bind(&rule.name)
    .bind(condition)
    .bind(score_impact)
    .bind(risk_level_str(rule.nominal_risk_level))
    .bind(rule.priority)
    .bind(rule.enabled)
    .execute(pool)
    .await
    .context("upsert_rule failed")?;

    Ok(())
}

/// Seed the rules catalog with the baseline rule set (idempotent — uses the
/// same `on conflict` upsert as `upsert_rule`).
pub async fn seed_baseline_rules(pool: &PgPool) -> Result<()> {
    for rule in txrisk_rules::baseline_rules() {
        upsert_rule(pool, &rule).await?;
    }
    Ok(())
}

/// Batch insert up to `MAX_BATCH_SIZE` accounts' worth of transactions in
/// one round trip, skipping rows whose idempotency_key already exists in
/// that creation window (§2 C1: "batch insert"). Returns the persisted rows
/// in input order; a `None` entry marks a skipped duplicate.
pub async fn insert_transactions_batch(
    pool: &PgPool,
    news: Vec<NewTransaction>,
) -> Result<Vec<Option<Transaction>>> {
    let mut out = Vec::with_capacity(news.len());
    let mut tx = pool.begin().await.context("insert_transactions_batch begin failed")?;

    for new in news {
        let id = Uuid::new_v4();
        let created_at = Utc::now();
        let row = sqlx::query(&format!(
            r#"
            insert into transactions (
                id, account_id, amount, currency, merchant, merchant_category, location,
                country, channel, status, idempotency_key, metadata, created_at
            ) values (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, 'pending', $10, $11, $12
            )
            on conflict (idempotency_key, created_at) do nothing
            returning {TRANSACTION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(new.account_id)
        .bind(new.amount)
        .bind(&new.currency)
        .bind(&new.merchant)
        .bind(&new.merchant_category)
        .bind(&new.location)
        .bind(&new.country)
        .bind(channel_str(new.channel))
        .bind(&new.idempotency_key)
        .bind(&new.metadata)
        .bind(created_at)
        .fetch_optional(&mut *tx)
        .await
        .context("insert_transactions_batch row insert failed")?;

        out.push(row.map(|r| row_to_transaction(&r)).transpose()?);
    }

    tx.commit().await.context("insert_transactions_batch commit failed")?;
    Ok(out)
}
