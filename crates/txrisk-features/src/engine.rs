use chrono::{Datelike, Duration, Timelike};
use rust_decimal::prelude::ToPrimitive;
use std::collections::BTreeSet;

use crate::geo::{haversine_km, parse_lat_lon};
use crate::types::{
    AccountHistory, Features, TransactionContext, FEATURES_SCHEMA_VERSION, HIGH_RISK_COUNTRIES,
};
use txrisk_schemas::TransactionStatus;

fn to_f64(d: rust_decimal::Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        0.0
    } else {
        xs.iter().sum::<f64>() / xs.len() as f64
    }
}

/// Population standard deviation (denominator = n, matching a rolling-window
/// statistic rather than a sample estimator).
fn stddev(xs: &[f64], mean_val: f64) -> f64 {
    if xs.is_empty() {
        0.0
    } else {
        let variance = xs.iter().map(|x| (x - mean_val).powi(2)).sum::<f64>() / xs.len() as f64;
        variance.sqrt()
    }
}

/// Compute the full feature snapshot for `tx` given `history` (§4.3). Pure
/// and deterministic: same inputs always yield the same `Features`.
pub fn compute_features(tx: &TransactionContext, history: &AccountHistory) -> Features {
    let now = tx.created_at;

    let window = |d: Duration| -> Vec<&crate::types::HistoryEntry> {
        history
            .entries
            .iter()
            .filter(|e| e.created_at > now - d && e.created_at <= now)
            .collect()
    };

    let w7d = window(Duration::days(7));
    let w30d = window(Duration::days(30));
    let w1h = window(Duration::hours(1));
    let w24h = window(Duration::hours(24));
    let w10m = window(Duration::minutes(10));

    // --- Spending ---
    let amounts_7d: Vec<f64> = w7d.iter().map(|e| to_f64(e.amount)).collect();
    let amounts_30d: Vec<f64> = w30d.iter().map(|e| to_f64(e.amount)).collect();
    let rolling_avg_7d = mean(&amounts_7d);
    let rolling_avg_30d = mean(&amounts_30d);
    let rolling_stddev_30d = stddev(&amounts_30d, rolling_avg_30d);
    let amount = to_f64(tx.amount);
    let amount_deviation = if rolling_stddev_30d == 0.0 {
        0.0
    } else {
        (amount - rolling_avg_30d) / rolling_stddev_30d
    };
    let spending_z_score = amount_deviation;

    // --- Velocity ---
    let velocity_count_1h = w1h.len() as u32;
    let velocity_count_24h = w24h.len() as u32;
    let velocity_z_score = (velocity_count_1h as f64 - 3.0) / 2.0;

    // --- Location ---
    let locations_7d: BTreeSet<&str> = w7d.iter().map(|e| e.location.as_str()).collect();
    let unique_locations_7d = locations_7d.len() as u32;
    let mut location_change_count = 0u32;
    for pair in w7d.windows(2) {
        if pair[0].location != pair[1].location {
            location_change_count += 1;
        }
    }
    let is_new_location = !locations_7d.contains(tx.location.as_str());
    let is_high_risk_country = HIGH_RISK_COUNTRIES.contains(&tx.country.as_str());

    let last_entry = history.entries.iter().filter(|e| e.created_at <= now).last();
    let distance_from_last_tx_km = match (parse_lat_lon(&tx.location), last_entry) {
        (Some(cur), Some(prev)) => match parse_lat_lon(&prev.location) {
            Some(prev_coords) => haversine_km(cur, prev_coords),
            None => 0.0,
        },
        _ => 0.0,
    };

    // --- Merchant ---
    let merchants_7d: BTreeSet<&str> = w7d.iter().map(|e| e.merchant.as_str()).collect();
    let is_new_merchant = !merchants_7d.contains(tx.merchant.as_str());
    let merchant_risk_score = 0.0;

    // --- Temporal ---
    let time_since_last_tx_hours = match last_entry {
        Some(prev) => (now - prev.created_at).num_milliseconds() as f64 / 3_600_000.0,
        None => 0.0,
    };
    let hour = now.hour() as u8;
    let is_unusual_hour = hour < 6;
    let day_of_week_anomaly = matches!(
        now.weekday(),
        chrono::Weekday::Sat | chrono::Weekday::Sun
    );
    let geo_velocity_kmh = if time_since_last_tx_hours > 0.0 {
        distance_from_last_tx_km / time_since_last_tx_hours
    } else {
        0.0
    };

    // --- Sequence ---
    let recent_small_tx_count = w10m.iter().filter(|e| to_f64(e.amount) < 100.0).count() as u32;
    let follows_probe_pattern = recent_small_tx_count > 0 && amount > 1000.0;

    // --- Peer / device placeholders ---
    let peer_group_avg_spend = 0.0;
    let peer_group_deviation = 0.0;
    let is_new_device = false;
    let channel_switch_count = 0;
    let shared_beneficiary_count = 0;

    // --- Anomaly ratio ---
    let flagged_or_blocked_7d = w7d
        .iter()
        .filter(|e| matches!(e.status, TransactionStatus::Flagged | TransactionStatus::Blocked))
        .count();
    let anomaly_ratio_7d = if w7d.is_empty() {
        0.0
    } else {
        flagged_or_blocked_7d as f64 / w7d.len() as f64
    };

    Features {
        schema_version: FEATURES_SCHEMA_VERSION,
        rolling_avg_7d,
        rolling_avg_30d,
        rolling_stddev_30d,
        amount_deviation,
        spending_z_score,
        velocity_count_1h,
        velocity_count_24h,
        velocity_z_score,
        unique_locations_7d,
        location_change_count,
        is_new_location,
        is_high_risk_country,
        distance_from_last_tx_km,
        geo_velocity_kmh,
        is_new_merchant,
        merchant_risk_score,
        time_since_last_tx_hours,
        is_unusual_hour,
        day_of_week_anomaly,
        recent_small_tx_count,
        follows_probe_pattern,
        peer_group_avg_spend,
        peer_group_deviation,
        is_new_device,
        channel_switch_count,
        shared_beneficiary_count,
        anomaly_ratio_7d,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HistoryEntry;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use txrisk_schemas::Channel;

    fn tx(amount: i64, country: &str, location: &str, created_at: chrono::DateTime<Utc>) -> TransactionContext {
        TransactionContext {
            amount: Decimal::from(amount),
            location: location.to_string(),
            merchant: "Starbucks".to_string(),
            country: country.to_string(),
            channel: Channel::Pos,
            created_at,
        }
    }

    fn entry(amount: i64, location: &str, created_at: chrono::DateTime<Utc>) -> HistoryEntry {
        HistoryEntry {
            amount: Decimal::from(amount),
            location: location.to_string(),
            merchant: "Starbucks".to_string(),
            country: "US".to_string(),
            channel: Channel::Pos,
            created_at,
            status: TransactionStatus::Processed,
        }
    }

    #[test]
    fn empty_history_yields_zeroed_spending_features() {
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap();
        let t = tx(50, "US", "NYC", now);
        let f = compute_features(&t, &AccountHistory::default());
        assert_eq!(f.rolling_avg_30d, 0.0);
        assert_eq!(f.amount_deviation, 0.0, "zero stddev must not divide");
        assert!(f.is_new_location);
        assert!(f.is_new_merchant);
    }

    #[test]
    fn high_risk_country_detected() {
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap();
        let t = tx(5000, "KP", "Pyongyang", now);
        let f = compute_features(&t, &AccountHistory::default());
        assert!(f.is_high_risk_country);
    }

    #[test]
    fn velocity_z_score_matches_seed_assumption() {
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap();
        let history = AccountHistory {
            entries: (0..6)
                .map(|i| entry(50, "NYC", now - Duration::minutes(i * 5)))
                .collect(),
        };
        let t = tx(50, "US", "NYC", now);
        let f = compute_features(&t, &history);
        assert_eq!(f.velocity_count_1h, 6);
        assert_eq!(f.velocity_z_score, 1.5);
    }

    #[test]
    fn follows_probe_pattern_boundary() {
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap();
        let history = AccountHistory {
            entries: vec![entry(20, "NYC", now - Duration::minutes(2))],
        };
        let at_boundary = tx(1000, "US", "NYC", now);
        let f = compute_features(&at_boundary, &history);
        assert!(!f.follows_probe_pattern, "amount=1000 must not trigger");

        let above_boundary = tx(1001, "US", "NYC", now);
        let f2 = compute_features(&above_boundary, &history);
        assert!(f2.follows_probe_pattern, "amount=1001 must trigger");
    }

    #[test]
    fn impossible_travel_zero_time_does_not_divide_by_zero() {
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap();
        let history = AccountHistory {
            entries: vec![entry(50, "40.7128,-74.0060", now)],
        };
        let t = tx(50, "US", "51.5074,-0.1278", now);
        let f = compute_features(&t, &history);
        assert_eq!(f.time_since_last_tx_hours, 0.0);
        assert!(f.distance_from_last_tx_km > 0.0);
        assert_eq!(f.geo_velocity_kmh, 0.0, "zero elapsed time must not divide");
    }

    #[test]
    fn geo_velocity_reflects_implausible_speed() {
        let earlier = Utc.with_ymd_and_hms(2026, 7, 1, 11, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 11, 30, 0).unwrap();
        let history = AccountHistory {
            entries: vec![entry(50, "40.7128,-74.0060", earlier)],
        };
        let t = tx(50, "US", "51.5074,-0.1278", now);
        let f = compute_features(&t, &history);
        assert_eq!(f.time_since_last_tx_hours, 0.5);
        assert!(f.geo_velocity_kmh > 900.0, "NYC->London in 30min is implausible");
    }

    #[test]
    fn anomaly_ratio_counts_flagged_and_blocked() {
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap();
        let mut history = AccountHistory {
            entries: vec![
                entry(50, "NYC", now - Duration::days(1)),
                entry(50, "NYC", now - Duration::days(2)),
            ],
        };
        history.entries[0].status = TransactionStatus::Flagged;
        let t = tx(50, "US", "NYC", now);
        let f = compute_features(&t, &history);
        assert_eq!(f.anomaly_ratio_7d, 0.5);
    }
}
