//! Declares which config subtree each runtime surface is expected to read.
//!
//! Mirrors the teacher's per-mode "consumed pointers" registry, retargeted
//! from trading run-modes to the pipeline's own config consumers: the rule
//! catalog (txrisk-rules), the worker pool (txrisk-worker), and the queue
//! binding (txrisk-queue). Useful for an `unused-keys` lint when a config
//! file grows stale sections, though nothing in this crate currently wires
//! that check into CI — see §1 (schema administration stays out of scope).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigConsumer {
    Rules,
    Worker,
    Queue,
}

pub fn consumed_pointers(consumer: ConfigConsumer) -> &'static [&'static str] {
    match consumer {
        ConfigConsumer::Rules => RULES,
        ConfigConsumer::Worker => WORKER,
        ConfigConsumer::Queue => QUEUE,
    }
}

static RULES: &[&str] = &["/rules"];

static WORKER: &[&str] = &[
    "/worker/concurrency",
    "/worker/batch_size",
    "/worker/poll_interval",
    "/worker/retry_attempts",
];

static QUEUE: &[&str] = &[
    "/queue/stream_name",
    "/queue/consumer_group",
    "/queue/max_retries",
    "/queue/dead_letter_stream",
];
