//! Worker pool (C8, §4.7): a pool of consumers sharing one consumer group,
//! polling C2, scoring through an injected port, retrying with incrementing
//! `retry_count` up to a budget, dead-lettering past it, and batch-acking
//! every id handled or abandoned in one pass. Grounded on the
//! `tokio::select!`-driven multi-task consumer loop shape and the
//! claim/release-batch discipline of an outbox dispatcher (see `DESIGN.md`).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, error, warn};
use txrisk_queue::QueuePort;
use txrisk_schemas::TransactionEvent;

/// Scores one transaction end to end (C7). Implemented by an adapter that
/// closes over `txrisk-scoring::score_transaction` plus its ports — this
/// crate stays decoupled from the scoring engine's concrete dependencies,
/// matching the port-trait seams used throughout the pipeline.
#[async_trait::async_trait]
pub trait WorkerScorer: Send + Sync {
    async fn score(&self, transaction_id: uuid::Uuid) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub consumer_group: String,
    /// Total number of concurrent consumer tasks across the pool (§5: default
    /// total concurrency 5). Modeled as a flat pool of consumers rather than
    /// nested worker/consumer tiers — each task is independently named so the
    /// queue port's per-group disjoint-delivery guarantee applies uniformly.
    pub concurrency: usize,
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub block_timeout: Duration,
    pub retry_attempts: u32,
    pub transport_backoff: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            consumer_group: "scoring-workers".to_string(),
            concurrency: 5,
            batch_size: 100,
            poll_interval: Duration::from_millis(100),
            block_timeout: Duration::from_millis(100),
            retry_attempts: 3,
            transport_backoff: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Default)]
pub struct ConsumerMetrics {
    pub processed_count: AtomicU64,
    pub failed_count: AtomicU64,
    pub total_processing_ms: AtomicU64,
    pub last_processed_at: RwLock<Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone)]
pub struct ConsumerMetricsSnapshot {
    pub consumer_name: String,
    pub processed_count: u64,
    pub failed_count: u64,
    pub total_processing_ms: u64,
    pub last_processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct PoolMetricsSnapshot {
    pub active_consumers: usize,
    pub processed_count: u64,
    pub failed_count: u64,
    pub total_processing_ms: u64,
}

struct ConsumerHandle {
    name: String,
    metrics: Arc<ConsumerMetrics>,
}

/// A pool of consumer tasks against one named stream + consumer group.
/// `run()` blocks the caller (intended to be spawned onto its own task);
/// `shutdown()` signals every consumer to stop accepting new polls and wait
/// out in-flight work before returning.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue: Arc<dyn QueuePort>,
    scorer: Arc<dyn WorkerScorer>,
    dead_letter_stream_len: Arc<AtomicU64>,
    shutdown: Arc<Notify>,
    shutting_down: Arc<std::sync::atomic::AtomicBool>,
    consumers: Mutex<Vec<ConsumerHandle>>,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig, queue: Arc<dyn QueuePort>, scorer: Arc<dyn WorkerScorer>) -> Self {
        Self {
            config,
            queue,
            scorer,
            dead_letter_stream_len: Arc::new(AtomicU64::new(0)),
            shutdown: Arc::new(Notify::new()),
            shutting_down: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            consumers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn `concurrency` consumer tasks and wait for every one to finish
    /// (they finish only after `shutdown()` drains them).
    pub async fn run(self: Arc<Self>) {
        let mut handles = Vec::with_capacity(self.config.concurrency);
        {
            let mut consumers = self.consumers.lock().await;
            for i in 0..self.config.concurrency {
                let name = format!("consumer-{i}");
                let metrics = Arc::new(ConsumerMetrics::default());
                consumers.push(ConsumerHandle {
                    name: name.clone(),
                    metrics: metrics.clone(),
                });
                let pool = Arc::clone(&self);
                handles.push(tokio::spawn(async move {
                    pool.consumer_loop(name, metrics).await;
                }));
            }
        }
        for h in handles {
            let _ = h.await;
        }
    }

    /// Signal every consumer task to stop polling for new work and drain.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    pub async fn metrics(&self) -> (PoolMetricsSnapshot, Vec<ConsumerMetricsSnapshot>) {
        let consumers = self.consumers.lock().await;
        let mut per_consumer = Vec::with_capacity(consumers.len());
        let mut agg = PoolMetricsSnapshot {
            active_consumers: consumers.len(),
            ..Default::default()
        };
        for c in consumers.iter() {
            let processed = c.metrics.processed_count.load(Ordering::Relaxed);
            let failed = c.metrics.failed_count.load(Ordering::Relaxed);
            let total_ms = c.metrics.total_processing_ms.load(Ordering::Relaxed);
            agg.processed_count += processed;
            agg.failed_count += failed;
            agg.total_processing_ms += total_ms;
            per_consumer.push(ConsumerMetricsSnapshot {
                consumer_name: c.name.clone(),
                processed_count: processed,
                failed_count: failed,
                total_processing_ms: total_ms,
                last_processed_at: *c.metrics.last_processed_at.read().await,
            });
        }
        (agg, per_consumer)
    }

    pub fn dead_letter_count(&self) -> u64 {
        self.dead_letter_stream_len.load(Ordering::Relaxed)
    }

    async fn consumer_loop(self: Arc<Self>, name: String, metrics: Arc<ConsumerMetrics>) {
        loop {
            if self.shutting_down.load(Ordering::SeqCst) {
                debug!(consumer = %name, "shutdown requested, stopping poll loop");
                return;
            }

            let messages = match self
                .queue
                .consume(&name, self.config.batch_size, self.config.block_timeout)
                .await
            {
                Ok(m) => m,
                Err(e) => {
                    warn!(consumer = %name, error = %e, "transport error polling queue; backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.transport_backoff) => {}
                        _ = self.shutdown.notified() => return,
                    }
                    continue;
                }
            };

            if messages.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                    _ = self.shutdown.notified() => return,
                }
                continue;
            }

            let mut ack_ids: Vec<String> = Vec::with_capacity(messages.len());
            for msg in messages {
                let started = std::time::Instant::now();
                let outcome = self.scorer.score(msg.event.transaction_id).await;
                let elapsed_ms = started.elapsed().as_millis() as u64;
                metrics.total_processing_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
                *metrics.last_processed_at.write().await = Some(Utc::now());

                match outcome {
                    Ok(()) => {
                        metrics.processed_count.fetch_add(1, Ordering::Relaxed);
                        ack_ids.push(msg.id);
                    }
                    Err(e) => {
                        metrics.failed_count.fetch_add(1, Ordering::Relaxed);
                        if msg.event.retry_count < self.config.retry_attempts {
                            let mut retried = msg.event.clone();
                            retried.retry_count += 1;
                            if let Err(pub_err) = self.queue.publish(&retried).await {
                                error!(
                                    transaction_id = %msg.event.transaction_id,
                                    error = %pub_err,
                                    "failed to republish retried event"
                                );
                            }
                        } else {
                            if let Err(dl_err) = self.queue.dead_letter(&msg.event, &e.to_string()).await {
                                error!(
                                    transaction_id = %msg.event.transaction_id,
                                    error = %dl_err,
                                    "failed to dead-letter event past retry budget"
                                );
                            } else {
                                self.dead_letter_stream_len.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        // Ack regardless: either republished to the tail (so this
                        // copy must not be redelivered) or dead-lettered.
                        ack_ids.push(msg.id);
                    }
                }
            }

            if !ack_ids.is_empty() {
                if let Err(e) = self.queue.ack(&ack_ids).await {
                    error!(error = %e, count = ack_ids.len(), "failed to ack batch");
                }
            }
        }
    }
}

/// Republish a failed event with an incremented retry_count, or dead-letter
/// it past budget. Exposed standalone for callers (e.g. `txrisk-cli cdc`)
/// that want the retry/dead-letter policy without the full pool.
pub async fn retry_or_dead_letter(
    queue: &dyn QueuePort,
    event: &TransactionEvent,
    error: &str,
    retry_attempts: u32,
) -> anyhow::Result<()> {
    if event.retry_count < retry_attempts {
        let mut retried = event.clone();
        retried.retry_count += 1;
        queue.publish(&retried).await?;
    } else {
        queue.dead_letter(event, error).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use txrisk_queue::InMemoryQueue;
    use uuid::Uuid;

    struct AlwaysFail;
    #[async_trait::async_trait]
    impl WorkerScorer for AlwaysFail {
        async fn score(&self, _transaction_id: Uuid) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("boom"))
        }
    }

    struct AlwaysSucceed {
        count: AtomicU32,
    }
    #[async_trait::async_trait]
    impl WorkerScorer for AlwaysSucceed {
        async fn score(&self, _transaction_id: Uuid) -> anyhow::Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn sample_event() -> TransactionEvent {
        TransactionEvent {
            transaction_id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            amount: rust_decimal::Decimal::from(10),
            currency: "USD".into(),
            merchant: "m".into(),
            location: "NYC".into(),
            country: "US".into(),
            channel: txrisk_schemas::Channel::Online,
            created_at: Utc::now(),
            retry_count: 0,
        }
    }

    #[tokio::test]
    async fn retry_increments_until_dead_lettered() {
        let queue = InMemoryQueue::new();
        let event = sample_event();

        retry_or_dead_letter(&queue, &event, "transient", 3).await.unwrap();
        let msgs = queue.consume("c", 10, Duration::from_millis(0)).await.unwrap();
        assert_eq!(msgs[0].event.retry_count, 1);
        queue.ack(&[msgs[0].id.clone()]).await.unwrap();

        let mut e1 = msgs[0].event.clone();
        retry_or_dead_letter(&queue, &e1, "transient", 3).await.unwrap();
        let msgs2 = queue.consume("c", 10, Duration::from_millis(0)).await.unwrap();
        assert_eq!(msgs2[0].event.retry_count, 2);
        queue.ack(&[msgs2[0].id.clone()]).await.unwrap();
        e1 = msgs2[0].event.clone();

        retry_or_dead_letter(&queue, &e1, "transient", 3).await.unwrap();
        let msgs3 = queue.consume("c", 10, Duration::from_millis(0)).await.unwrap();
        assert_eq!(msgs3[0].event.retry_count, 3);
        queue.ack(&[msgs3[0].id.clone()]).await.unwrap();
        e1 = msgs3[0].event.clone();

        // fourth failure exceeds retry_attempts=3 -> dead letter, not republished
        retry_or_dead_letter(&queue, &e1, "transient", 3).await.unwrap();
        assert_eq!(queue.dead_letter_count(), 1);
        let info = queue.info().await.unwrap();
        assert_eq!(info.length, 0);
    }

    #[tokio::test]
    async fn pool_drains_a_published_batch_and_acks_on_success() {
        let queue = Arc::new(InMemoryQueue::new());
        for _ in 0..5 {
            queue.publish(&sample_event()).await.unwrap();
        }
        let scorer = Arc::new(AlwaysSucceed { count: AtomicU32::new(0) });
        let pool = Arc::new(WorkerPool::new(
            WorkerPoolConfig {
                concurrency: 1,
                poll_interval: Duration::from_millis(5),
                block_timeout: Duration::from_millis(5),
                ..Default::default()
            },
            queue.clone(),
            scorer.clone(),
        ));

        let runner = tokio::spawn(pool.clone().run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.shutdown();
        let _ = runner.await;

        assert_eq!(scorer.count.load(Ordering::SeqCst), 5);
        let info = queue.info().await.unwrap();
        assert_eq!(info.pending, 0);
    }

    #[tokio::test]
    async fn pool_dead_letters_after_exhausting_retries() {
        let queue = Arc::new(InMemoryQueue::new());
        queue.publish(&sample_event()).await.unwrap();
        let scorer = Arc::new(AlwaysFail);
        let pool = Arc::new(WorkerPool::new(
            WorkerPoolConfig {
                concurrency: 1,
                retry_attempts: 0,
                poll_interval: Duration::from_millis(5),
                block_timeout: Duration::from_millis(5),
                ..Default::default()
            },
            queue.clone(),
            scorer,
        ));

        let runner = tokio::spawn(pool.clone().run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.shutdown();
        let _ = runner.await;

        assert_eq!(pool.dead_letter_count(), 1);
    }
}
