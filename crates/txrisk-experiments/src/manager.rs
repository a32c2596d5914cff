//! In-process A/B manager (§4.8, C9): experiment lifecycle, deterministic
//! bucket assignment, per-group result accounting. State lives in a single
//! `RwLock`-guarded map — contention is negligible at the experiment counts
//! this pipeline expects (design note, spec.md §9); a sharded map or actor
//! is the documented re-architecting path if that ever changes.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;
use txrisk_schemas::{Experiment, ExperimentGroup, ExperimentStatus, RiskLevel};
use uuid::Uuid;

use crate::bucket::assign_group;
use crate::stats::{estimate_significance, GroupStats, SignificanceResult};

#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error("experiment not found: {0}")]
    NotFound(Uuid),
    #[error("experiment {id} is {current:?}; operation requires {expected}")]
    InvalidState {
        id: Uuid,
        current: ExperimentStatus,
        expected: &'static str,
    },
    #[error("traffic_split must be in [0,1], got {0}")]
    InvalidTrafficSplit(f64),
}

struct ExperimentRecord {
    experiment: Experiment,
    control: GroupStats,
    test: GroupStats,
}

/// An experiment + the rule-id allow-list and group an account was routed
/// to for one scoring pass. An empty `rule_ids` means "no restriction, use
/// every enabled rule" (§4.6 step 3).
pub struct Assignment {
    pub experiment_id: Uuid,
    pub group: ExperimentGroup,
    pub rule_ids: Vec<String>,
}

#[derive(Clone)]
pub struct ExperimentManager {
    inner: Arc<RwLock<HashMap<Uuid, ExperimentRecord>>>,
}

impl Default for ExperimentManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ExperimentManager {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn create(
        &self,
        name: String,
        control_rule_ids: Vec<String>,
        test_rule_ids: Vec<String>,
        traffic_split: f64,
    ) -> Result<Experiment, ExperimentError> {
        if !(0.0..=1.0).contains(&traffic_split) {
            return Err(ExperimentError::InvalidTrafficSplit(traffic_split));
        }
        let experiment = Experiment {
            id: Uuid::new_v4(),
            name,
            control_rule_ids,
            test_rule_ids,
            traffic_split,
            status: ExperimentStatus::Draft,
            start: None,
            end: None,
        };
        let mut guard = self.inner.write().await;
        guard.insert(
            experiment.id,
            ExperimentRecord {
                experiment: experiment.clone(),
                control: GroupStats::default(),
                test: GroupStats::default(),
            },
        );
        Ok(experiment)
    }

    pub async fn get(&self, id: Uuid) -> Result<Experiment, ExperimentError> {
        let guard = self.inner.read().await;
        guard
            .get(&id)
            .map(|r| r.experiment.clone())
            .ok_or(ExperimentError::NotFound(id))
    }

    pub async fn list(&self) -> Vec<Experiment> {
        let guard = self.inner.read().await;
        let mut out: Vec<Experiment> = guard.values().map(|r| r.experiment.clone()).collect();
        out.sort_by_key(|e| e.id);
        out
    }

    /// draft -> running, or paused -> running (resume).
    pub async fn start(&self, id: Uuid) -> Result<Experiment, ExperimentError> {
        let mut guard = self.inner.write().await;
        let rec = guard.get_mut(&id).ok_or(ExperimentError::NotFound(id))?;
        match rec.experiment.status {
            ExperimentStatus::Draft => {
                rec.experiment.start = Some(Utc::now());
            }
            ExperimentStatus::Paused => {}
            other => {
                return Err(ExperimentError::InvalidState {
                    id,
                    current: other,
                    expected: "draft or paused",
                })
            }
        }
        rec.experiment.status = ExperimentStatus::Running;
        Ok(rec.experiment.clone())
    }

    /// running -> paused.
    pub async fn pause(&self, id: Uuid) -> Result<Experiment, ExperimentError> {
        let mut guard = self.inner.write().await;
        let rec = guard.get_mut(&id).ok_or(ExperimentError::NotFound(id))?;
        if rec.experiment.status != ExperimentStatus::Running {
            return Err(ExperimentError::InvalidState {
                id,
                current: rec.experiment.status,
                expected: "running",
            });
        }
        rec.experiment.status = ExperimentStatus::Paused;
        Ok(rec.experiment.clone())
    }

    /// running or paused -> completed.
    pub async fn stop(&self, id: Uuid) -> Result<Experiment, ExperimentError> {
        let mut guard = self.inner.write().await;
        let rec = guard.get_mut(&id).ok_or(ExperimentError::NotFound(id))?;
        match rec.experiment.status {
            ExperimentStatus::Running | ExperimentStatus::Paused => {}
            other => {
                return Err(ExperimentError::InvalidState {
                    id,
                    current: other,
                    expected: "running or paused",
                })
            }
        }
        rec.experiment.status = ExperimentStatus::Completed;
        rec.experiment.end = Some(Utc::now());
        Ok(rec.experiment.clone())
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), ExperimentError> {
        let mut guard = self.inner.write().await;
        guard.remove(&id).ok_or(ExperimentError::NotFound(id))?;
        Ok(())
    }

    /// Consult the single running experiment for this scoring pass (§4.6
    /// step 3). At most one is consulted: if multiple are `running`
    /// (an operator error this manager doesn't prevent), the lowest-id one
    /// is picked for determinism. Returns `None` if none are running.
    pub async fn consult(&self, account_id: Uuid) -> Option<Assignment> {
        let guard = self.inner.read().await;
        let running = guard
            .values()
            .filter(|r| r.experiment.status == ExperimentStatus::Running)
            .min_by_key(|r| r.experiment.id)?;

        let group = assign_group(
            running.experiment.id,
            account_id,
            running.experiment.traffic_split,
        );
        let rule_ids = match group {
            ExperimentGroup::Control => running.experiment.control_rule_ids.clone(),
            ExperimentGroup::Test => running.experiment.test_rule_ids.clone(),
        };
        Some(Assignment {
            experiment_id: running.experiment.id,
            group,
            rule_ids,
        })
    }

    /// Record one scoring outcome against `(experiment_id, group)` (§4.8
    /// "Results, per group").
    pub async fn record_result(
        &self,
        experiment_id: Uuid,
        group: ExperimentGroup,
        amount: f64,
        composite_score: f64,
        risk_level: RiskLevel,
        rules_triggered: &[String],
    ) -> Result<(), ExperimentError> {
        let mut guard = self.inner.write().await;
        let rec = guard
            .get_mut(&experiment_id)
            .ok_or(ExperimentError::NotFound(experiment_id))?;
        let stats = match group {
            ExperimentGroup::Control => &mut rec.control,
            ExperimentGroup::Test => &mut rec.test,
        };
        stats.record(amount, composite_score, risk_level, rules_triggered, Utc::now());
        Ok(())
    }

    pub async fn results(&self, id: Uuid) -> Result<(GroupStats, GroupStats), ExperimentError> {
        let guard = self.inner.read().await;
        let rec = guard.get(&id).ok_or(ExperimentError::NotFound(id))?;
        Ok((rec.control.clone(), rec.test.clone()))
    }

    pub async fn significance(&self, id: Uuid) -> Result<SignificanceResult, ExperimentError> {
        let (control, test) = self.results(id).await?;
        Ok(estimate_significance(&control, &test))
    }
}
