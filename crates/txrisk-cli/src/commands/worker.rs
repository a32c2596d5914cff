//! `txrisk-cli worker`: runs the worker pool (C8) against the `transactions`
//! stream — consume, score (C7), ack/retry/dead-letter. Blocks until a
//! shutdown signal (Ctrl-C) arrives, then drains in-flight work.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;
use txrisk_config::env::EnvConfig;
use txrisk_db::TxRiskDb;
use txrisk_experiments::ExperimentManager;
use txrisk_queue::RedisStreamQueue;
use txrisk_scoring::{score_transaction, NoopCache, ScoringConfig};
use txrisk_worker::{WorkerPool, WorkerPoolConfig, WorkerScorer};
use uuid::Uuid;

/// Adapts `txrisk-scoring::score_transaction` to the pool's `WorkerScorer`
/// port, closing over the concrete repo/experiments/cache the process was
/// wired with.
struct ScoringAdapter {
    db: TxRiskDb,
    experiments: ExperimentManager,
    config: ScoringConfig,
}

#[async_trait]
impl WorkerScorer for ScoringAdapter {
    async fn score(&self, transaction_id: Uuid) -> anyhow::Result<()> {
        score_transaction(
            &self.db,
            &self.experiments,
            &NoopCache,
            &self.config,
            transaction_id,
        )
        .await
        .map(|_| ())
        .map_err(anyhow::Error::from)
    }
}

pub async fn run() -> Result<()> {
    let env = EnvConfig::from_env().context("load environment config")?;

    let pool = txrisk_db::connect(
        &env.database_url,
        &txrisk_db::PoolConfig {
            max_connections: env.db_max_open_conns,
            min_connections: env.db_max_idle_conns,
            max_lifetime: env.db_conn_max_lifetime,
        },
    )
    .await
    .context("connect to database")?;
    let db = TxRiskDb::new(pool);

    let queue = RedisStreamQueue::connect(
        &env.redis_url,
        env.redis_stream_name.clone(),
        env.redis_consumer_group.clone(),
        env.dead_letter_stream.clone(),
    )
    .await
    .context("connect to redis stream queue")?;

    let scorer = Arc::new(ScoringAdapter {
        db,
        experiments: ExperimentManager::new(),
        config: ScoringConfig::default(),
    });

    let worker_config = WorkerPoolConfig {
        consumer_group: env.redis_consumer_group.clone(),
        concurrency: env.worker_concurrency,
        batch_size: env.worker_batch_size,
        poll_interval: env.worker_poll_interval,
        block_timeout: env.worker_poll_interval,
        retry_attempts: env.worker_retry_attempts,
        transport_backoff: Duration::from_secs(1),
    };

    let pool = Arc::new(WorkerPool::new(worker_config, Arc::new(queue), scorer));

    let runner = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.run().await })
    };

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    info!("shutdown signal received; draining worker pool");
    pool.shutdown();
    let _ = runner.await;

    let (agg, _per_consumer) = pool.metrics().await;
    info!(
        processed = agg.processed_count,
        failed = agg.failed_count,
        dead_lettered = pool.dead_letter_count(),
        "worker pool drained"
    );

    Ok(())
}
