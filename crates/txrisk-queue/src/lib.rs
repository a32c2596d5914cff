//! txrisk-queue
//!
//! The stream queue port (C2, §4.2): an ordered, durable, append-only log
//! per named stream with named consumer groups, backed by Redis Streams in
//! production and an in-memory fake in tests.

pub mod error;
pub mod memory;
pub mod port;
pub mod redis_stream;

pub use error::QueueError;
pub use memory::InMemoryQueue;
pub use port::{QueueMessage, QueuePort, StreamInfo};
pub use redis_stream::RedisStreamQueue;
