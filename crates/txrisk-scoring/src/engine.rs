//! Scoring orchestration (C7, §4.6): load → features (C4) → experiment
//! consult (C9) → rules + behavioral + ml (C5/C6) → combine → decide →
//! persist → escalate. A thin orchestrator over ports the caller (the
//! worker pool, or a test harness) supplies — this crate has no I/O of its
//! own.

use std::collections::BTreeSet;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use txrisk_experiments::{Assignment, ExperimentManager};
use txrisk_features::{compute_features, AccountHistory, TransactionContext};
use txrisk_rules::{evaluate_rules, RuleContext};
use txrisk_schemas::{
    Account, Rule, RiskLevel, RiskProfile, RiskScore, ScoringPath, Transaction, TransactionStatus,
};
use uuid::Uuid;

use crate::behavioral::{new_device_high_value, score_behavioral};
use crate::ml::score_ml;

pub const MODEL_VERSION: &str = "txrisk-hybrid-v1";

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("transaction not found: {0}")]
    TransactionNotFound(Uuid),
    #[error("account not found: {0}")]
    AccountNotFound(Uuid),
    #[error(transparent)]
    TransientIo(#[from] anyhow::Error),
}

/// Persistence port the orchestrator needs (backed by `txrisk-db` in
/// production, by an in-memory fake in tests).
#[async_trait]
pub trait ScoringRepo: Send + Sync {
    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>, ScoringError>;
    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, ScoringError>;
    /// History entries for `account_id` covering at least the last 30 days
    /// up to (and excluding) `now`.
    async fn account_history(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<AccountHistory, ScoringError>;
    async fn active_rules(&self) -> Result<Vec<Rule>, ScoringError>;
    /// Persist the transaction's new status/processed_at and the RiskScore
    /// atomically (§9 open question: one transaction, not a two-step write).
    /// Idempotent by `transaction_id` — re-scoring the same transaction
    /// overwrites rather than duplicating (§8 idempotence law).
    async fn save_score(
        &self,
        transaction_id: Uuid,
        new_status: TransactionStatus,
        processed_at: DateTime<Utc>,
        score: &RiskScore,
    ) -> Result<(), ScoringError>;
    /// Monotonic escalation only — never downgrades (§4.6 step 10).
    async fn escalate_account_profile(
        &self,
        account_id: Uuid,
        min_profile: RiskProfile,
    ) -> Result<(), ScoringError>;
}

/// Best-effort cache port for step 11 (§4.6): failures never fail scoring.
#[async_trait]
pub trait ScoreCache: Send + Sync {
    async fn put(&self, transaction_id: Uuid, composite_score: f64);
}

/// A cache that does nothing — the default when no cache is wired.
pub struct NoopCache;

#[async_trait]
impl ScoreCache for NoopCache {
    async fn put(&self, _transaction_id: Uuid, _composite_score: f64) {}
}

#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub ml_enabled: bool,
    pub model_version: String,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            ml_enabled: true,
            model_version: MODEL_VERSION.to_string(),
        }
    }
}

/// Score one transaction end to end. `processing_time_ms` on the returned
/// `RiskScore` covers steps 1-9 only (load, features, experiment consult,
/// rule/behavioral/ml, combine, persist, escalate) — not step 11's A/B
/// bookkeeping or cache write, per the documented resolution of the source's
/// ambiguity on this point.
pub async fn score_transaction(
    repo: &dyn ScoringRepo,
    experiments: &ExperimentManager,
    cache: &dyn ScoreCache,
    config: &ScoringConfig,
    transaction_id: Uuid,
) -> Result<RiskScore, ScoringError> {
    let started = Instant::now();

    // 1. Load
    let tx = repo
        .get_transaction(transaction_id)
        .await?
        .ok_or(ScoringError::TransactionNotFound(transaction_id))?;
    let _account = repo
        .get_account(tx.account_id)
        .await?
        .ok_or(ScoringError::AccountNotFound(tx.account_id))?;

    // 2. Features
    let history = repo.account_history(tx.account_id, tx.created_at).await?;
    let ctx = TransactionContext {
        amount: tx.amount,
        location: tx.location.clone(),
        merchant: tx.merchant.clone(),
        country: tx.country.clone(),
        channel: tx.channel,
        created_at: tx.created_at,
    };
    let features = compute_features(&ctx, &history);

    // 3. Experiment consult
    let assignment = experiments.consult(tx.account_id).await;

    // 4. Behavioral, then rules (rules can reference the behavioral
    // composite), then ml.
    let (mut behavioral_score, mut anomaly_tags) = score_behavioral(&features);
    if let Some((tag, impact)) =
        new_device_high_value(features.is_new_device, tx.amount > rust_decimal::Decimal::from(1000))
    {
        anomaly_tags.insert(tag.to_string());
        behavioral_score = (behavioral_score + impact).min(100.0);
    }

    let all_rules = repo.active_rules().await?;
    let rules = filter_rules(&all_rules, assignment.as_ref());
    let rule_ctx = RuleContext {
        tx: &tx,
        features: &features,
        behavioral_score,
    };
    let (rule_score, rules_triggered) = evaluate_rules(&rules, &rule_ctx);

    let ml_score = if config.ml_enabled {
        Some(score_ml(&features, behavioral_score))
    } else {
        None
    };

    // 5. Combine
    let composite_score = combine(rule_score, behavioral_score, ml_score);

    // 6. Risk level
    let risk_level = risk_level_for(composite_score);

    // 7. Decision
    let new_status = status_for(risk_level);

    // 8. Scoring path
    let scoring_path = if rule_score < 20.0 && behavioral_score < 15.0 {
        ScoringPath::Fast
    } else {
        ScoringPath::Full
    };

    let processed_at = Utc::now();
    let processing_time_ms = started.elapsed().as_millis() as i64;

    let features_json = serde_json::to_value(&features).map_err(|e| anyhow::anyhow!(e))?;
    let rules_triggered_set: BTreeSet<String> = rules_triggered.into_iter().collect();

    let score = RiskScore {
        id: Uuid::new_v4(),
        transaction_id: tx.id,
        transaction_created_at: tx.created_at,
        composite_score,
        rule_score,
        behavioral_score,
        ml_score,
        risk_level,
        rules_triggered: rules_triggered_set.clone(),
        anomalies_detected: anomaly_tags,
        features: features_json,
        model_version: config.model_version.clone(),
        scoring_path,
        processing_time_ms,
        experiment_id: assignment.as_ref().map(|a| a.experiment_id),
        experiment_group: assignment.as_ref().map(|a| group_label(a).to_string()),
    };

    // 9. Persist (transaction status + risk score, atomically at the repo layer)
    repo.save_score(tx.id, new_status, processed_at, &score).await?;

    // 10. Escalate account profile
    let min_profile = match risk_level {
        RiskLevel::Critical => Some(RiskProfile::High),
        RiskLevel::High => Some(RiskProfile::Medium),
        _ => None,
    };
    if let Some(min_profile) = min_profile {
        repo.escalate_account_profile(tx.account_id, min_profile).await?;
    }

    // 11. A/B accounting + cache (best-effort, excluded from processing_time_ms)
    if let Some(assignment) = &assignment {
        let amount_f64: f64 = tx
            .amount
            .to_string()
            .parse()
            .unwrap_or_default();
        let triggered: Vec<String> = rules_triggered_set.iter().cloned().collect();
        let _ = experiments
            .record_result(
                assignment.experiment_id,
                assignment.group,
                amount_f64,
                composite_score,
                risk_level,
                &triggered,
            )
            .await;
    }
    cache.put(tx.id, composite_score).await;

    Ok(score)
}

fn group_label(a: &Assignment) -> &'static str {
    match a.group {
        txrisk_schemas::ExperimentGroup::Control => "control",
        txrisk_schemas::ExperimentGroup::Test => "test",
    }
}

/// Empty allow-list (no experiment running, or the group has none
/// configured) means every enabled rule applies (§4.6 step 3).
fn filter_rules(all: &[Rule], assignment: Option<&Assignment>) -> Vec<Rule> {
    match assignment {
        Some(a) if !a.rule_ids.is_empty() => {
            let allow: BTreeSet<&str> = a.rule_ids.iter().map(String::as_str).collect();
            all.iter().filter(|r| allow.contains(r.id.as_str())).cloned().collect()
        }
        _ => all.to_vec(),
    }
}

/// The weighting law (§4.6 step 5): ml's 0.15 weight redistributes 60/40 to
/// rule/behavioral when no ml score is available, so composites stay
/// comparable across deployments with ml enabled or disabled.
fn combine(rule_score: f64, behavioral_score: f64, ml_score: Option<f64>) -> f64 {
    let composite = match ml_score {
        Some(ml) => 0.50 * rule_score + 0.35 * behavioral_score + 0.15 * ml,
        None => 0.59 * rule_score + 0.41 * behavioral_score,
    };
    round2(composite.min(100.0))
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn risk_level_for(score: f64) -> RiskLevel {
    if score >= 70.0 {
        RiskLevel::Critical
    } else if score >= 50.0 {
        RiskLevel::High
    } else if score >= 25.0 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

fn status_for(level: RiskLevel) -> TransactionStatus {
    match level {
        RiskLevel::Critical => TransactionStatus::Blocked,
        RiskLevel::High => TransactionStatus::Flagged,
        RiskLevel::Medium | RiskLevel::Low => TransactionStatus::Processed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_redistributes_ml_weight_when_absent() {
        // §8 S2: only RULE_CRITICAL_AMOUNT fires -> rule_score=40, behavioral=0, no ml.
        let composite = combine(40.0, 0.0, None);
        assert!((composite - 23.6).abs() < 1e-9, "got {composite}");
    }

    #[test]
    fn combine_uses_straight_weights_when_ml_present() {
        let composite = combine(40.0, 20.0, Some(10.0));
        // 0.5*40 + 0.35*20 + 0.15*10 = 20 + 7 + 1.5 = 28.5
        assert!((composite - 28.5).abs() < 1e-9, "got {composite}");
    }

    #[test]
    fn risk_level_thresholds_are_inclusive_at_the_boundary() {
        assert_eq!(risk_level_for(24.99), RiskLevel::Low);
        assert_eq!(risk_level_for(25.00), RiskLevel::Medium);
        assert_eq!(risk_level_for(49.99), RiskLevel::Medium);
        assert_eq!(risk_level_for(50.00), RiskLevel::High);
        assert_eq!(risk_level_for(69.99), RiskLevel::High);
        assert_eq!(risk_level_for(70.00), RiskLevel::Critical);
    }

    #[test]
    fn decision_mapping_matches_spec() {
        assert_eq!(status_for(RiskLevel::Critical), TransactionStatus::Blocked);
        assert_eq!(status_for(RiskLevel::High), TransactionStatus::Flagged);
        assert_eq!(status_for(RiskLevel::Medium), TransactionStatus::Processed);
        assert_eq!(status_for(RiskLevel::Low), TransactionStatus::Processed);
    }

    #[test]
    fn empty_allow_list_means_every_rule_applies() {
        let rules = txrisk_rules::baseline_rules();
        let filtered = filter_rules(&rules, None);
        assert_eq!(filtered.len(), rules.len());
    }

    #[test]
    fn non_empty_allow_list_restricts_to_named_rules() {
        let rules = txrisk_rules::baseline_rules();
        let assignment = Assignment {
            experiment_id: Uuid::new_v4(),
            group: txrisk_schemas::ExperimentGroup::Test,
            rule_ids: vec!["RULE_CRITICAL_AMOUNT".to_string()],
        };
        let filtered = filter_rules(&rules, Some(&assignment));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "RULE_CRITICAL_AMOUNT");
    }
}
