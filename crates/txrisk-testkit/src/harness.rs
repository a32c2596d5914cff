//! A thin end-to-end harness wiring ingest (C3) -> queue (C2) -> worker pool
//! (C8) -> scoring (C7) entirely in memory, for the literal scenarios in
//! spec §8 (S1-S6). Mirrors how the daemon and cli binaries wire the same
//! ports, minus Postgres/Redis.

use std::sync::Arc;
use std::time::Duration;

use txrisk_experiments::ExperimentManager;
use txrisk_ingest::{ingest, IngestOutcome, IngestRequest, NoopAudit};
use txrisk_queue::InMemoryQueue;
use txrisk_scoring::{score_transaction, NoopCache, RiskScore, ScoringConfig, ScoringError, ScoringRepo};
use txrisk_worker::{WorkerPool, WorkerPoolConfig, WorkerScorer};
use uuid::Uuid;

use crate::fakes::FakeRepo;

/// Wires a `FakeRepo`, an `InMemoryQueue`, and the A/B manager together
/// behind the exact port traits the ingest service and worker pool consume.
/// Test code `ingest()`s, then either `score_next()`s one message directly
/// or spins up a real `WorkerPool` against `queue()`.
///
/// The scoring repo is a trait object so a scenario can swap in a
/// failure-injecting wrapper (e.g. `FlakyScoringRepo`) around the same
/// underlying `FakeRepo` used for ingest.
pub struct ScoringHarness {
    pub ingest_repo: Arc<FakeRepo>,
    pub scoring_repo: Arc<dyn ScoringRepo>,
    pub queue: Arc<InMemoryQueue>,
    pub experiments: ExperimentManager,
    pub config: ScoringConfig,
}

impl ScoringHarness {
    pub fn new(repo: Arc<FakeRepo>) -> Self {
        Self {
            ingest_repo: repo.clone(),
            scoring_repo: repo,
            queue: Arc::new(InMemoryQueue::new()),
            experiments: ExperimentManager::new(),
            config: ScoringConfig::default(),
        }
    }

    /// Same `FakeRepo` backing both ports, but scoring writes route through
    /// `scoring_repo` instead (e.g. a `FlakyScoringRepo` wrapper), so
    /// ingest-side reads still see everything the scorer persists.
    pub fn with_scoring_repo(ingest_repo: Arc<FakeRepo>, scoring_repo: Arc<dyn ScoringRepo>) -> Self {
        Self {
            ingest_repo,
            scoring_repo,
            queue: Arc::new(InMemoryQueue::new()),
            experiments: ExperimentManager::new(),
            config: ScoringConfig::default(),
        }
    }

    pub fn with_ml_disabled(mut self) -> Self {
        self.config.ml_enabled = false;
        self
    }

    pub async fn ingest(&self, req: IngestRequest) -> Result<IngestOutcome, txrisk_ingest::IngestError> {
        ingest(self.ingest_repo.as_ref(), self.queue.as_ref(), &NoopAudit, req).await
    }

    /// Drive one event off the queue through the scorer, exactly like one
    /// iteration of a worker pool's consumer loop, without the polling loop
    /// or retry/dead-letter bookkeeping `WorkerPool` adds.
    pub async fn score_next(&self) -> anyhow::Result<RiskScore> {
        let msgs = self
            .queue
            .consume("test-consumer", 1, Duration::from_millis(0))
            .await?;
        let msg = msgs.into_iter().next().ok_or_else(|| anyhow::anyhow!("queue empty"))?;
        let score = self.score_transaction_directly(msg.event.transaction_id).await?;
        self.queue.ack(&[msg.id]).await?;
        Ok(score)
    }

    pub async fn score_transaction_directly(&self, transaction_id: Uuid) -> Result<RiskScore, ScoringError> {
        score_transaction(
            self.scoring_repo.as_ref(),
            &self.experiments,
            &NoopCache,
            &self.config,
            transaction_id,
        )
        .await
    }

    /// Build a real `WorkerPool` against this harness's queue, wrapping the
    /// harness (behind `Arc`) in the `WorkerScorer` adapter so S6-style
    /// scenarios can drive retry/dead-letter through the actual pool loop.
    pub fn worker_pool(self: &Arc<Self>, config: WorkerPoolConfig) -> WorkerPool {
        WorkerPool::new(config, self.queue.clone(), self.clone() as Arc<dyn WorkerScorer>)
    }
}

#[async_trait::async_trait]
impl WorkerScorer for ScoringHarness {
    async fn score(&self, transaction_id: Uuid) -> anyhow::Result<()> {
        self.score_transaction_directly(transaction_id)
            .await
            .map(|_| ())
            .map_err(anyhow::Error::from)
    }
}
