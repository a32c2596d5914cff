use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use txrisk_schemas::{Channel, TransactionStatus};

/// One past transaction for the same account, as needed to compute features
/// for a new one. Callers (txrisk-scoring) build this from a persistence
/// snapshot taken at the moment of scoring (§5: feature computation tolerates
/// out-of-order scoring because it re-snapshots every time).
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub amount: Decimal,
    pub location: String,
    pub merchant: String,
    pub country: String,
    pub channel: Channel,
    pub created_at: DateTime<Utc>,
    pub status: TransactionStatus,
}

/// Transaction under evaluation, reduced to the fields the feature engine
/// needs (decoupled from the persistence-layer `Transaction` so this crate
/// stays dependency-free of txrisk-db).
#[derive(Debug, Clone)]
pub struct TransactionContext {
    pub amount: Decimal,
    pub location: String,
    pub merchant: String,
    pub country: String,
    pub channel: Channel,
    pub created_at: DateTime<Utc>,
}

/// History ordered ascending by `created_at`, covering at least the last 30
/// days for the account (callers may pass more; windows below re-filter).
#[derive(Debug, Clone, Default)]
pub struct AccountHistory {
    pub entries: Vec<HistoryEntry>,
}

/// The feature snapshot computed for one transaction (§4.3). Embedded
/// verbatim into `RiskScore.features` — round-trips through persistence
/// semantically (§8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Features {
    pub schema_version: u32,

    // Spending
    pub rolling_avg_7d: f64,
    pub rolling_avg_30d: f64,
    pub rolling_stddev_30d: f64,
    pub amount_deviation: f64,
    pub spending_z_score: f64,

    // Velocity
    pub velocity_count_1h: u32,
    pub velocity_count_24h: u32,
    pub velocity_z_score: f64,

    // Location
    pub unique_locations_7d: u32,
    pub location_change_count: u32,
    pub is_new_location: bool,
    pub is_high_risk_country: bool,
    pub distance_from_last_tx_km: f64,
    /// distance_from_last_tx_km / time_since_last_tx_hours, or 0 when the
    /// elapsed time is 0 — guards the impossible-travel rule against a
    /// div-by-zero false positive rather than reporting infinite speed.
    pub geo_velocity_kmh: f64,

    // Merchant
    pub is_new_merchant: bool,
    pub merchant_risk_score: f64,

    // Temporal
    pub time_since_last_tx_hours: f64,
    pub is_unusual_hour: bool,
    pub day_of_week_anomaly: bool,

    // Sequence
    pub recent_small_tx_count: u32,
    pub follows_probe_pattern: bool,

    // Peer / device placeholders (§4.3: default 0 unless wired)
    pub peer_group_avg_spend: f64,
    pub peer_group_deviation: f64,
    pub is_new_device: bool,
    pub channel_switch_count: u32,
    pub shared_beneficiary_count: u32,

    pub anomaly_ratio_7d: f64,
}

pub const FEATURES_SCHEMA_VERSION: u32 = 1;

/// Static high-risk country set (§4.3).
pub const HIGH_RISK_COUNTRIES: [&str; 8] = ["NK", "IR", "SY", "CU", "VE", "MM", "BY", "ZW"];
