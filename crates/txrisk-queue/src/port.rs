//! The stream queue contract (C2, §4.2): an ordered, durable, append-only
//! log per named stream with named consumer groups.

use async_trait::async_trait;
use txrisk_schemas::TransactionEvent;

use crate::error::QueueError;

/// One delivered message: the stream-assigned id plus the decoded event.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub id: String,
    pub event: TransactionEvent,
}

#[derive(Debug, Clone, Default)]
pub struct StreamInfo {
    pub length: u64,
    pub pending: u64,
    pub groups: u64,
}

/// At-least-once delivery; consumers in the same group receive disjoint
/// messages; idle-claim ensures liveness if a consumer crashes; no ordering
/// guarantees across consumers (§4.2).
#[async_trait]
pub trait QueuePort: Send + Sync {
    async fn publish(&self, event: &TransactionEvent) -> Result<String, QueueError>;
    async fn publish_batch(&self, events: &[TransactionEvent]) -> Result<Vec<String>, QueueError>;

    /// First claims pending messages idle >= 30s (re-delivery), then reads
    /// unseen messages if fewer than `max_count` were claimed. Blocks up to
    /// `block_timeout` waiting for new messages.
    async fn consume(
        &self,
        consumer_name: &str,
        max_count: usize,
        block_timeout: std::time::Duration,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    async fn ack(&self, message_ids: &[String]) -> Result<(), QueueError>;

    async fn dead_letter(&self, event: &TransactionEvent, error: &str) -> Result<(), QueueError>;

    async fn info(&self) -> Result<StreamInfo, QueueError>;
}
