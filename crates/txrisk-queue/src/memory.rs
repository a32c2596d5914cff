//! An in-memory `QueuePort` for tests: no network, same claim/ack/dead-letter
//! semantics as `RedisStreamQueue` minus actual durability.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use txrisk_schemas::TransactionEvent;

use crate::error::QueueError;
use crate::port::{QueueMessage, QueuePort, StreamInfo};

const IDLE_CLAIM: Duration = Duration::from_secs(30);

struct Pending {
    event: TransactionEvent,
    claimed_at: Instant,
}

#[derive(Default)]
struct Inner {
    queue: VecDeque<(String, TransactionEvent)>,
    pending: std::collections::HashMap<String, Pending>,
    dead_letters: Vec<(TransactionEvent, String)>,
}

pub struct InMemoryQueue {
    next_id: AtomicU64,
    inner: Mutex<Inner>,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn next_id(&self) -> String {
        format!("{}-0", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    pub fn dead_letter_count(&self) -> usize {
        self.inner.lock().unwrap().dead_letters.len()
    }

    pub fn dead_letters(&self) -> Vec<(TransactionEvent, String)> {
        self.inner.lock().unwrap().dead_letters.clone()
    }
}

#[async_trait]
impl QueuePort for InMemoryQueue {
    async fn publish(&self, event: &TransactionEvent) -> Result<String, QueueError> {
        let id = self.next_id();
        self.inner.lock().unwrap().queue.push_back((id.clone(), event.clone()));
        Ok(id)
    }

    async fn publish_batch(&self, events: &[TransactionEvent]) -> Result<Vec<String>, QueueError> {
        let mut ids = Vec::with_capacity(events.len());
        let mut guard = self.inner.lock().unwrap();
        for event in events {
            let id = self.next_id();
            guard.queue.push_back((id.clone(), event.clone()));
            ids.push(id);
        }
        Ok(ids)
    }

    async fn consume(
        &self,
        _consumer_name: &str,
        max_count: usize,
        _block_timeout: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let mut guard = self.inner.lock().unwrap();
        let now = Instant::now();

        let mut claimed: Vec<String> = Vec::new();
        for (id, p) in guard.pending.iter() {
            if now.duration_since(p.claimed_at) >= IDLE_CLAIM {
                claimed.push(id.clone());
            }
            if claimed.len() >= max_count {
                break;
            }
        }

        let mut messages = Vec::new();
        for id in claimed {
            if let Some(p) = guard.pending.get_mut(&id) {
                p.claimed_at = now;
                messages.push(QueueMessage {
                    id: id.clone(),
                    event: p.event.clone(),
                });
            }
        }

        while messages.len() < max_count {
            let Some((id, event)) = guard.queue.pop_front() else {
                break;
            };
            guard.pending.insert(
                id.clone(),
                Pending {
                    event: event.clone(),
                    claimed_at: now,
                },
            );
            messages.push(QueueMessage { id, event });
        }

        Ok(messages)
    }

    async fn ack(&self, message_ids: &[String]) -> Result<(), QueueError> {
        let mut guard = self.inner.lock().unwrap();
        for id in message_ids {
            guard.pending.remove(id);
        }
        Ok(())
    }

    async fn dead_letter(&self, event: &TransactionEvent, error: &str) -> Result<(), QueueError> {
        self.inner
            .lock()
            .unwrap()
            .dead_letters
            .push((event.clone(), error.to_string()));
        Ok(())
    }

    async fn info(&self) -> Result<StreamInfo, QueueError> {
        let guard = self.inner.lock().unwrap();
        Ok(StreamInfo {
            length: (guard.queue.len() + guard.pending.len()) as u64,
            pending: guard.pending.len() as u64,
            groups: 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use txrisk_schemas::Channel;
    use uuid::Uuid;

    fn sample_event() -> TransactionEvent {
        TransactionEvent {
            transaction_id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            amount: rust_decimal::Decimal::from(10),
            currency: "USD".to_string(),
            merchant: "m".to_string(),
            location: "NYC".to_string(),
            country: "US".to_string(),
            channel: Channel::Online,
            created_at: Utc::now(),
            retry_count: 0,
        }
    }

    #[tokio::test]
    async fn publish_then_consume_returns_the_same_event() {
        let q = InMemoryQueue::new();
        let event = sample_event();
        q.publish(&event).await.unwrap();

        let msgs = q.consume("c1", 10, Duration::from_millis(0)).await.unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].event.transaction_id, event.transaction_id);
    }

    #[tokio::test]
    async fn acked_messages_are_not_redelivered() {
        let q = InMemoryQueue::new();
        q.publish(&sample_event()).await.unwrap();
        let msgs = q.consume("c1", 10, Duration::from_millis(0)).await.unwrap();
        q.ack(&[msgs[0].id.clone()]).await.unwrap();

        let info = q.info().await.unwrap();
        assert_eq!(info.pending, 0);
    }

    #[tokio::test]
    async fn unacked_messages_stay_pending_until_claimed() {
        let q = InMemoryQueue::new();
        q.publish(&sample_event()).await.unwrap();
        let first = q.consume("c1", 10, Duration::from_millis(0)).await.unwrap();
        assert_eq!(first.len(), 1);

        // Immediately re-consuming shouldn't re-deliver: still idle under 30s.
        let second = q.consume("c2", 10, Duration::from_millis(0)).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn dead_lettered_events_are_recorded() {
        let q = InMemoryQueue::new();
        let event = sample_event();
        q.dead_letter(&event, "boom").await.unwrap();
        assert_eq!(q.dead_letter_count(), 1);
    }
}
