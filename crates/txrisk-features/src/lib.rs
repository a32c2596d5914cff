//! Pure, deterministic feature computation over account transaction history.

mod engine;
mod geo;
mod types;

pub use engine::compute_features;
pub use geo::{haversine_km, parse_lat_lon};
pub use types::{
    AccountHistory, Features, HistoryEntry, TransactionContext, FEATURES_SCHEMA_VERSION,
    HIGH_RISK_COUNTRIES,
};
