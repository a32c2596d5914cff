//! Deterministic bucket assignment (§4.8, glossary "Bucket assignment").
//!
//! `sha256(experiment_id + ":" + account_id)` is reduced to a fraction in
//! `[0, 1)` by reading its first 8 bytes as a big-endian `u64` and dividing
//! by `u64::MAX + 1`. Same inputs always produce the same fraction, so the
//! same account is always assigned to the same group for the lifetime of an
//! experiment — no state needs to be stored per account.

use sha2::{Digest, Sha256};
use txrisk_schemas::ExperimentGroup;
use uuid::Uuid;

/// Fraction in `[0, 1)` for `(experiment_id, account_id)`.
pub fn bucket_fraction(experiment_id: Uuid, account_id: Uuid) -> f64 {
    let key = format!("{experiment_id}:{account_id}");
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    let n = u64::from_be_bytes(bytes);

    n as f64 / (u64::MAX as f64 + 1.0)
}

/// Assign `account_id` to `control` or `test` under `experiment_id` given the
/// experiment's `traffic_split` (the fraction of traffic routed to `test`).
pub fn assign_group(experiment_id: Uuid, account_id: Uuid, traffic_split: f64) -> ExperimentGroup {
    if bucket_fraction(experiment_id, account_id) < traffic_split {
        ExperimentGroup::Test
    } else {
        ExperimentGroup::Control
    }
}
