use chrono::Timelike;
use rust_decimal::prelude::ToPrimitive;
use txrisk_features::Features;
use txrisk_schemas::Transaction;

/// Everything a `RuleCondition` can read a named field out of. Held as
/// borrows so evaluating a rule set against one transaction never clones.
///
/// `behavioral_score` is the C6 behavioral composite (0 if not yet computed
/// by the caller) — RULE_BEHAVIORAL_ANOMALY reads it as the pseudo-feature
/// `behavioral_composite`, matching the source's cross-reference between the
/// rule engine and the behavioral scorer.
pub struct RuleContext<'a> {
    pub tx: &'a Transaction,
    pub features: &'a Features,
    pub behavioral_score: f64,
}

fn bool_as_f64(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Resolve a condition's `field` name to a numeric value. Unknown field names
/// resolve to `None`, which makes the owning `Threshold` condition evaluate
/// to `false` rather than panicking — a misconfigured rule simply never
/// fires instead of crashing the scorer.
pub fn resolve_field(field: &str, ctx: &RuleContext) -> Option<f64> {
    let f = ctx.features;
    let tx = ctx.tx;
    Some(match field {
        "amount" => tx.amount.to_f64()?,
        "hour" => tx.created_at.hour() as f64,

        "rolling_avg_7d" => f.rolling_avg_7d,
        "rolling_avg_30d" => f.rolling_avg_30d,
        "rolling_stddev_30d" => f.rolling_stddev_30d,
        "amount_deviation" => f.amount_deviation,
        "spending_z_score" => f.spending_z_score,

        "velocity_count_1h" => f.velocity_count_1h as f64,
        "velocity_count_24h" => f.velocity_count_24h as f64,
        "velocity_z_score" => f.velocity_z_score,

        "unique_locations_7d" => f.unique_locations_7d as f64,
        "location_change_count" => f.location_change_count as f64,
        "is_new_location" => bool_as_f64(f.is_new_location),
        "is_high_risk_country" => bool_as_f64(f.is_high_risk_country),
        "distance_from_last_tx_km" => f.distance_from_last_tx_km,
        "geo_velocity_kmh" => f.geo_velocity_kmh,

        "is_new_merchant" => bool_as_f64(f.is_new_merchant),
        "merchant_risk_score" => f.merchant_risk_score,

        "time_since_last_tx_hours" => f.time_since_last_tx_hours,
        "is_unusual_hour" => bool_as_f64(f.is_unusual_hour),
        "day_of_week_anomaly" => bool_as_f64(f.day_of_week_anomaly),

        "recent_small_tx_count" => f.recent_small_tx_count as f64,
        "follows_probe_pattern" => bool_as_f64(f.follows_probe_pattern),

        "peer_group_avg_spend" => f.peer_group_avg_spend,
        "peer_group_deviation" => f.peer_group_deviation,
        "is_new_device" => bool_as_f64(f.is_new_device),
        "channel_switch_count" => f.channel_switch_count as f64,
        "shared_beneficiary_count" => f.shared_beneficiary_count as f64,

        "anomaly_ratio_7d" => f.anomaly_ratio_7d,

        "behavioral_composite" => ctx.behavioral_score,

        _ => return None,
    })
}
