//! txrisk-experiments
//!
//! A/B-test rule-set assignment (C9, §4.8): experiment lifecycle, deterministic
//! hashing-based bucket assignment, per-group result accounting, and a
//! significance estimate. State is in-memory, guarded by a single
//! read-write lock — see `ExperimentManager` for the re-architecting note
//! carried from the design notes.

pub mod bucket;
pub mod manager;
pub mod stats;

pub use bucket::{assign_group, bucket_fraction};
pub use manager::{Assignment, ExperimentError, ExperimentManager};
pub use stats::{estimate_significance, GroupStats, SignificanceResult};
