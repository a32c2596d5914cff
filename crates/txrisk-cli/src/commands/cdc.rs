//! `txrisk-cli cdc`: consumes Debezium-shaped CDC row-change messages as
//! newline-delimited JSON (§4.9, §6) and feeds them to `txrisk-analytics`.
//! The transport binding (Kafka topic vs. file vs. stdin) is deliberately
//! out of scope for the core (§1); this command accepts NDJSON from stdin
//! or a file so the aggregator can be exercised and operated without a
//! live Kafka cluster.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use txrisk_analytics::CdcAnalytics;
use txrisk_schemas::CdcMessage;

pub async fn run(input: Option<String>) -> Result<()> {
    let analytics = Arc::new(CdcAnalytics::new());

    let reporter = {
        let analytics = Arc::clone(&analytics);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(10));
            loop {
                ticker.tick().await;
                let snap = analytics.snapshot().await;
                info!(
                    total_events = snap.total_events,
                    events_per_second = snap.events_per_second,
                    "cdc analytics snapshot"
                );
            }
        })
    };

    let mut lines = match input {
        Some(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("open cdc input file: {path}"))?;
            BufReader::new(Box::new(file) as Box<dyn tokio::io::AsyncRead + Send + Unpin>).lines()
        }
        None => BufReader::new(Box::new(tokio::io::stdin()) as Box<dyn tokio::io::AsyncRead + Send + Unpin>)
            .lines(),
    };

    let mut processed = 0u64;
    while let Some(line) = lines.next_line().await.context("read cdc input line")? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<CdcMessage>(&line) {
            Ok(msg) => {
                analytics.process(msg).await;
                processed += 1;
            }
            Err(e) => warn!(error = %e, "skipping malformed cdc message"),
        }
    }

    reporter.abort();
    let snap = analytics.snapshot().await;
    println!("{}", serde_json::to_string_pretty(&snap)?);
    info!(processed, "cdc input exhausted");

    Ok(())
}
