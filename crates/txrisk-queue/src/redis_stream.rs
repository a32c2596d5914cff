//! Redis Streams implementation of `QueuePort` (§4.2): `XADD`/`XREADGROUP`/
//! `XACK`/`XCLAIM`/`XPENDING`/`XLEN` via a `deadpool-redis` connection pool.
//! Mirrors the stream half of the redis topic backend pattern in the example
//! pack, minus the pub/sub broadcast half this pipeline has no use for.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::redis::{cmd, RedisResult, Value as RedisValue};
use deadpool_redis::{Config, Pool, Runtime};
use tokio::sync::OnceCell;
use txrisk_schemas::{DeadLetterEnvelope, QueueEnvelope, TransactionEvent};

use crate::error::QueueError;
use crate::port::{QueueMessage, QueuePort, StreamInfo};

/// Messages pending longer than this are considered abandoned by whichever
/// consumer last claimed them and are re-delivered (§4.2, §5).
const IDLE_CLAIM_MS: u64 = 30_000;

pub struct RedisStreamQueue {
    pool: Pool,
    stream: String,
    dead_letter_stream: String,
    group: String,
    group_ready: OnceCell<()>,
}

impl RedisStreamQueue {
    pub async fn connect(
        redis_url: &str,
        stream: impl Into<String>,
        group: impl Into<String>,
        dead_letter_stream: impl Into<String>,
    ) -> Result<Self, QueueError> {
        let config = Config::from_url(redis_url);
        let pool = config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        // Validate connectivity eagerly so misconfiguration surfaces at
        // startup rather than on the first poll.
        let mut conn = pool.get().await?;
        cmd("PING").query_async::<String>(&mut conn).await?;

        Ok(Self {
            pool,
            stream: stream.into(),
            dead_letter_stream: dead_letter_stream.into(),
            group: group.into(),
            group_ready: OnceCell::new(),
        })
    }

    async fn ensure_group(&self) -> Result<(), QueueError> {
        self.group_ready
            .get_or_try_init(|| async {
                let mut conn = self.pool.get().await?;
                let result: RedisResult<String> = cmd("XGROUP")
                    .arg("CREATE")
                    .arg(&self.stream)
                    .arg(&self.group)
                    .arg("0")
                    .arg("MKSTREAM")
                    .query_async(&mut conn)
                    .await;
                match result {
                    Ok(_) => Ok(()),
                    Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
                    Err(e) => Err(QueueError::Redis(e)),
                }
            })
            .await?;
        Ok(())
    }

    async fn xadd(&self, key: &str, payload: &[u8]) -> Result<String, QueueError> {
        let mut conn = self.pool.get().await?;
        let id: String = cmd("XADD")
            .arg(key)
            .arg("*")
            .arg("payload")
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(id)
    }

    /// Claim pending messages idle >= `IDLE_CLAIM_MS` (§4.2 re-delivery).
    async fn claim_idle(
        &self,
        consumer_name: &str,
        count: usize,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.get().await?;

        let pending: RedisValue = cmd("XPENDING")
            .arg(&self.stream)
            .arg(&self.group)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let mut idle_ids = Vec::new();
        if let RedisValue::Array(entries) = pending {
            for entry in entries {
                if let RedisValue::Array(parts) = entry {
                    if parts.len() >= 3 {
                        if let (RedisValue::BulkString(id_bytes), RedisValue::Int(idle)) =
                            (&parts[0], &parts[2])
                        {
                            if *idle as u64 >= IDLE_CLAIM_MS {
                                if let Ok(id) = String::from_utf8(id_bytes.clone()) {
                                    idle_ids.push(id);
                                }
                            }
                        }
                    }
                }
            }
        }

        if idle_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut claim = cmd("XCLAIM");
        claim
            .arg(&self.stream)
            .arg(&self.group)
            .arg(consumer_name)
            .arg(IDLE_CLAIM_MS);
        for id in &idle_ids {
            claim.arg(id);
        }
        let claimed: RedisValue = claim.query_async(&mut conn).await?;
        Ok(parse_stream_entries(claimed))
    }

    /// Read unseen messages (§4.2: `>` means never-delivered-to-this-group).
    async fn read_new(
        &self,
        consumer_name: &str,
        count: usize,
        block_timeout: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.get().await?;
        let result: RedisValue = cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group)
            .arg(consumer_name)
            .arg("BLOCK")
            .arg(block_timeout.as_millis() as u64)
            .arg("COUNT")
            .arg(count)
            .arg("STREAMS")
            .arg(&self.stream)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let messages = match result {
            RedisValue::Nil => Vec::new(),
            RedisValue::Array(streams) => {
                let mut out = Vec::new();
                for stream_entry in streams {
                    if let RedisValue::Array(parts) = stream_entry {
                        if parts.len() >= 2 {
                            out.extend(parse_stream_entries(parts[1].clone()));
                        }
                    }
                }
                out
            }
            _ => Vec::new(),
        };
        Ok(messages)
    }
}

#[async_trait]
impl QueuePort for RedisStreamQueue {
    async fn publish(&self, event: &TransactionEvent) -> Result<String, QueueError> {
        let payload = serde_json::to_vec(&QueueEnvelope { data: event.clone() })?;
        self.xadd(&self.stream, &payload).await
    }

    async fn publish_batch(&self, events: &[TransactionEvent]) -> Result<Vec<String>, QueueError> {
        if events.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.get().await?;
        let mut pipe = deadpool_redis::redis::pipe();
        for event in events {
            let payload = serde_json::to_vec(&QueueEnvelope { data: event.clone() })?;
            pipe.cmd("XADD")
                .arg(&self.stream)
                .arg("*")
                .arg("payload")
                .arg(payload);
        }
        let ids: Vec<String> = pipe.query_async(&mut conn).await?;
        Ok(ids)
    }

    async fn consume(
        &self,
        consumer_name: &str,
        max_count: usize,
        block_timeout: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        self.ensure_group().await?;

        let mut messages = self.claim_idle(consumer_name, max_count).await?;
        let remaining = max_count.saturating_sub(messages.len());
        if remaining > 0 {
            let fresh = self.read_new(consumer_name, remaining, block_timeout).await?;
            messages.extend(fresh);
        }
        messages.truncate(max_count);
        Ok(messages)
    }

    async fn ack(&self, message_ids: &[String]) -> Result<(), QueueError> {
        if message_ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.pool.get().await?;
        let mut c = cmd("XACK");
        c.arg(&self.stream).arg(&self.group);
        for id in message_ids {
            c.arg(id.as_str());
        }
        let _: i64 = c.query_async(&mut conn).await?;
        Ok(())
    }

    async fn dead_letter(&self, event: &TransactionEvent, error: &str) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(&DeadLetterEnvelope {
            data: event.clone(),
            error: error.to_string(),
        })?;
        self.xadd(&self.dead_letter_stream, &payload).await?;
        Ok(())
    }

    async fn info(&self) -> Result<StreamInfo, QueueError> {
        let mut conn = self.pool.get().await?;

        let length: u64 = cmd("XLEN")
            .arg(&self.stream)
            .query_async(&mut conn)
            .await
            .unwrap_or(0);

        let pending_summary: RedisValue = cmd("XPENDING")
            .arg(&self.stream)
            .arg(&self.group)
            .query_async(&mut conn)
            .await
            .unwrap_or(RedisValue::Nil);
        let pending = match pending_summary {
            RedisValue::Array(parts) if !parts.is_empty() => match &parts[0] {
                RedisValue::Int(p) => *p as u64,
                _ => 0,
            },
            _ => 0,
        };

        let groups_info: RedisValue = cmd("XINFO")
            .arg("GROUPS")
            .arg(&self.stream)
            .query_async(&mut conn)
            .await
            .unwrap_or(RedisValue::Array(Vec::new()));
        let groups = match groups_info {
            RedisValue::Array(entries) => entries.len() as u64,
            _ => 0,
        };

        Ok(StreamInfo {
            length,
            pending,
            groups,
        })
    }
}

/// Decode a Redis stream entries array (`[[id, [field, value, ...]], ...]`)
/// into `QueueMessage`s, skipping any entry whose payload doesn't decode.
fn parse_stream_entries(value: RedisValue) -> Vec<QueueMessage> {
    let RedisValue::Array(entries) = value else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for entry in entries {
        let RedisValue::Array(parts) = entry else {
            continue;
        };
        if parts.len() < 2 {
            continue;
        }
        let (RedisValue::BulkString(id_bytes), RedisValue::Array(fields)) = (&parts[0], &parts[1])
        else {
            continue;
        };
        let Ok(id) = String::from_utf8(id_bytes.clone()) else {
            continue;
        };
        let Some(payload) = extract_payload(fields) else {
            continue;
        };
        let Ok(envelope) = serde_json::from_slice::<QueueEnvelope>(&payload) else {
            tracing::warn!(message_id = %id, "dropping stream entry with undecodable payload");
            continue;
        };
        out.push(QueueMessage {
            id,
            event: envelope.data,
        });
    }
    out
}

fn extract_payload(fields: &[RedisValue]) -> Option<Vec<u8>> {
    let mut iter = fields.iter();
    while let Some(field) = iter.next() {
        if let RedisValue::BulkString(name) = field {
            if name == b"payload" {
                if let Some(RedisValue::BulkString(value)) = iter.next() {
                    return Some(value.clone());
                }
            } else {
                iter.next();
            }
        }
    }
    None
}
