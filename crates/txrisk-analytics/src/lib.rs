//! CDC analytics pipeline (C10, §4.9): consumes Debezium-shaped row-change
//! messages, derives an event type and status transition, and maintains
//! rolling operational counters. No scoring side effects — this is a pure
//! read-side aggregator, grounded on a poll-consumer-with-checkpoint shape
//! (see `DESIGN.md`).

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use txrisk_schemas::{CdcMessage, CdcOp, Channel, TransactionStatus};

/// Bounded recent-events cache size (§4.9: "the latest N (≈1000) events").
pub const RECENT_EVENTS_CAPACITY: usize = 1000;
const RATE_WINDOW_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CdcEventType {
    Created,
    Updated,
    Deleted,
    Snapshot,
}

pub fn derive_event_type(op: CdcOp) -> CdcEventType {
    match op {
        CdcOp::C => CdcEventType::Created,
        CdcOp::U => CdcEventType::Updated,
        CdcOp::D => CdcEventType::Deleted,
        CdcOp::R => CdcEventType::Snapshot,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentEvent {
    pub event_type: CdcEventType,
    pub transaction_id: Option<String>,
    pub status_transition: Option<(TransactionStatus, TransactionStatus)>,
    pub ts_ms: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
    pub counts_by_status: HashMap<TransactionStatus, u64>,
    pub country_histogram: HashMap<String, u64>,
    pub channel_histogram: HashMap<Channel, u64>,
    /// Keyed by `"{prev}->{new}"` since tuple keys don't serialize to JSON maps.
    pub transition_histogram: HashMap<String, u64>,
    pub events_per_second: f64,
    pub total_events: u64,
}

#[derive(Debug, Default)]
struct Inner {
    counts_by_status: HashMap<TransactionStatus, u64>,
    country_histogram: HashMap<String, u64>,
    channel_histogram: HashMap<Channel, u64>,
    transition_histogram: HashMap<(TransactionStatus, TransactionStatus), u64>,
    recent_events: VecDeque<RecentEvent>,
    /// Millisecond timestamps of events seen in the last `RATE_WINDOW_SECS`.
    rate_window: VecDeque<i64>,
    total_events: u64,
}

/// Thread-safe CDC aggregator. `process` is the single entry point; state is
/// read back via `snapshot` or `recent_events`.
#[derive(Default)]
pub struct CdcAnalytics {
    inner: RwLock<Inner>,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionShape {
    pub id: Option<String>,
    pub status: Option<TransactionStatus>,
    pub country: Option<String>,
    pub channel: Option<Channel>,
}

fn shape_from_json(v: &serde_json::Value) -> TransactionShape {
    TransactionShape {
        id: v.get("id").and_then(|x| x.as_str()).map(String::from),
        status: v
            .get("status")
            .and_then(|x| x.as_str())
            .and_then(|s| serde_json::from_value(serde_json::Value::String(s.to_string())).ok()),
        country: v.get("country").and_then(|x| x.as_str()).map(String::from),
        channel: v
            .get("channel")
            .and_then(|x| x.as_str())
            .and_then(|s| serde_json::from_value(serde_json::Value::String(s.to_string())).ok()),
    }
}

impl CdcAnalytics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one CDC message (§4.9). Never fails hard: a malformed payload
    /// is recorded as a best-effort shape (fields default to `None`) rather
    /// than rejected, since this pipeline has no scoring side effects to
    /// protect.
    pub async fn process(&self, msg: CdcMessage) {
        let event_type = derive_event_type(msg.op);
        let after = msg.after.as_ref().map(shape_from_json);
        let before = msg.before.as_ref().map(shape_from_json);

        let mut guard = self.inner.write().await;

        let mut transition = None;
        match event_type {
            CdcEventType::Created | CdcEventType::Snapshot => {
                if let Some(after) = &after {
                    if let Some(status) = after.status {
                        *guard.counts_by_status.entry(status).or_insert(0) += 1;
                    }
                    if event_type == CdcEventType::Created {
                        if let Some(country) = &after.country {
                            *guard.country_histogram.entry(country.clone()).or_insert(0) += 1;
                        }
                        if let Some(channel) = after.channel {
                            *guard.channel_histogram.entry(channel).or_insert(0) += 1;
                        }
                    }
                }
            }
            CdcEventType::Updated => {
                if let (Some(before), Some(after)) = (&before, &after) {
                    if let (Some(prev), Some(new)) = (before.status, after.status) {
                        if prev != new {
                            *guard.counts_by_status.entry(new).or_insert(0) += 1;
                            if let Some(prev_count) = guard.counts_by_status.get_mut(&prev) {
                                *prev_count = prev_count.saturating_sub(1);
                            }
                            *guard.transition_histogram.entry((prev, new)).or_insert(0) += 1;
                            transition = Some((prev, new));
                        }
                    }
                }
            }
            CdcEventType::Deleted => {
                if let Some(before) = &before {
                    if let Some(status) = before.status {
                        if let Some(prev_count) = guard.counts_by_status.get_mut(&status) {
                            *prev_count = prev_count.saturating_sub(1);
                        }
                    }
                }
            }
        }

        let transaction_id = after
            .as_ref()
            .and_then(|s| s.id.clone())
            .or_else(|| before.as_ref().and_then(|s| s.id.clone()));

        guard.total_events += 1;
        guard.rate_window.push_back(msg.ts_ms);
        prune_rate_window(&mut guard.rate_window, msg.ts_ms);

        guard.recent_events.push_back(RecentEvent {
            event_type,
            transaction_id,
            status_transition: transition,
            ts_ms: msg.ts_ms,
        });
        while guard.recent_events.len() > RECENT_EVENTS_CAPACITY {
            guard.recent_events.pop_front();
        }
    }

    pub async fn snapshot(&self) -> AnalyticsSnapshot {
        let guard = self.inner.read().await;
        let transition_histogram = guard
            .transition_histogram
            .iter()
            .map(|((prev, new), count)| (format!("{prev:?}->{new:?}"), *count))
            .collect();

        let events_per_second = guard.rate_window.len() as f64 / RATE_WINDOW_SECS as f64;

        AnalyticsSnapshot {
            counts_by_status: guard.counts_by_status.clone(),
            country_histogram: guard.country_histogram.clone(),
            channel_histogram: guard.channel_histogram.clone(),
            transition_histogram,
            events_per_second,
            total_events: guard.total_events,
        }
    }

    pub async fn recent_events(&self, limit: usize) -> Vec<RecentEvent> {
        let guard = self.inner.read().await;
        guard.recent_events.iter().rev().take(limit).cloned().collect()
    }
}

fn prune_rate_window(window: &mut VecDeque<i64>, now_ms: i64) {
    let cutoff = now_ms - RATE_WINDOW_SECS * 1000;
    while let Some(&front) = window.front() {
        if front < cutoff {
            window.pop_front();
        } else {
            break;
        }
    }
}

/// Convenience for callers constructing a `CdcMessage` from a raw
/// Debezium-shaped envelope timestamp.
pub fn now_ms() -> i64 {
    DateTime::<Utc>::from(std::time::SystemTime::now()).timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use txrisk_schemas::CdcSource;

    fn source(ts_ms: i64) -> CdcSource {
        CdcSource {
            table: "transactions".into(),
            lsn: 1,
            tx_id: 1,
            ts_ms,
        }
    }

    #[tokio::test]
    async fn create_event_increments_status_and_country_histograms() {
        let analytics = CdcAnalytics::new();
        let msg = CdcMessage {
            before: None,
            after: Some(serde_json::json!({
                "id": "t1", "status": "pending", "country": "US", "channel": "pos"
            })),
            source: source(1000),
            op: CdcOp::C,
            ts_ms: 1000,
        };
        analytics.process(msg).await;

        let snap = analytics.snapshot().await;
        assert_eq!(snap.counts_by_status.get(&TransactionStatus::Pending), Some(&1));
        assert_eq!(snap.country_histogram.get("US"), Some(&1));
        assert_eq!(snap.channel_histogram.get(&Channel::Pos), Some(&1));
        assert_eq!(snap.total_events, 1);
    }

    #[tokio::test]
    async fn update_event_derives_status_transition() {
        let analytics = CdcAnalytics::new();
        let msg = CdcMessage {
            before: Some(serde_json::json!({"id": "t1", "status": "pending"})),
            after: Some(serde_json::json!({"id": "t1", "status": "flagged"})),
            source: source(2000),
            op: CdcOp::U,
            ts_ms: 2000,
        };
        analytics.process(msg).await;

        let snap = analytics.snapshot().await;
        assert_eq!(snap.transition_histogram.get("Pending->Flagged"), Some(&1));
        assert_eq!(snap.counts_by_status.get(&TransactionStatus::Flagged), Some(&1));

        let recent = analytics.recent_events(10).await;
        assert_eq!(recent.len(), 1);
        assert_eq!(
            recent[0].status_transition,
            Some((TransactionStatus::Pending, TransactionStatus::Flagged))
        );
    }

    #[tokio::test]
    async fn recent_events_cache_is_bounded() {
        let analytics = CdcAnalytics::new();
        for i in 0..(RECENT_EVENTS_CAPACITY + 10) {
            let msg = CdcMessage {
                before: None,
                after: Some(serde_json::json!({"id": format!("t{i}"), "status": "pending"})),
                source: source(i as i64),
                op: CdcOp::C,
                ts_ms: i as i64,
            };
            analytics.process(msg).await;
        }
        let recent = analytics.recent_events(RECENT_EVENTS_CAPACITY + 10).await;
        assert_eq!(recent.len(), RECENT_EVENTS_CAPACITY);
    }

    #[tokio::test]
    async fn unchanged_status_on_update_does_not_record_a_transition() {
        let analytics = CdcAnalytics::new();
        let msg = CdcMessage {
            before: Some(serde_json::json!({"id": "t1", "status": "processed"})),
            after: Some(serde_json::json!({"id": "t1", "status": "processed"})),
            source: source(3000),
            op: CdcOp::U,
            ts_ms: 3000,
        };
        analytics.process(msg).await;
        let snap = analytics.snapshot().await;
        assert!(snap.transition_histogram.is_empty());
    }
}
