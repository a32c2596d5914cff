//! ML ensemble (§4.5, second half of C6): a weighted sum of sigmoid-transformed
//! signals over the same feature set the behavioral scorer reads. Not a
//! trained model — a fixed-weight ensemble standing in for one, per the
//! pipeline's non-goal of training ML models (spec.md §1).

use txrisk_features::Features;

/// Ensemble weights (§4.5), sum to 1.0 so the weighted combination stays
/// within [0,100] given every input signal is itself capped to that range.
const W_SPENDING_Z: f64 = 0.20;
const W_VELOCITY_Z: f64 = 0.15;
const W_PEER_DEVIATION: f64 = 0.15;
const W_LOCATION_RISK: f64 = 0.10;
const W_TIME_RISK: f64 = 0.10;
const W_MERCHANT_RISK: f64 = 0.10;
const W_BEHAVIORAL: f64 = 0.20;

/// Sigmoid centers for the z-like signals. Chosen to align with the
/// behavioral detectors' own trigger thresholds (§4.5) so a signal that
/// just clears its behavioral-anomaly threshold sits at σ(0) = 0.5 in the
/// ensemble too, rather than introducing a second, disconnected scale.
const CENTER_SPENDING_Z: f64 = 2.5;
const CENTER_VELOCITY_Z: f64 = 2.0;
const CENTER_PEER_DEVIATION: f64 = 3.0;

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// `location_risk`: sum of {30 if new location, 50 if high-risk country, 40
/// if distance>500km and elapsed time<2h}, capped at 100 (§4.5).
fn location_risk(f: &Features) -> f64 {
    let mut risk = 0.0;
    if f.is_new_location {
        risk += 30.0;
    }
    if f.is_high_risk_country {
        risk += 50.0;
    }
    if f.distance_from_last_tx_km > 500.0 && f.time_since_last_tx_hours < 2.0 {
        risk += 40.0;
    }
    risk.min(100.0)
}

/// `time_risk`: sum of {30 if unusual hour, 20 if day-of-week anomaly},
/// capped at 100 (§4.5).
fn time_risk(f: &Features) -> f64 {
    let mut risk = 0.0;
    if f.is_unusual_hour {
        risk += 30.0;
    }
    if f.day_of_week_anomaly {
        risk += 20.0;
    }
    risk.min(100.0)
}

/// Compute the ML ensemble score for `f`, given the already-computed
/// behavioral composite `behavioral_score` (reused as one of the seven
/// weighted signals rather than recomputed). Output is capped at [0,100]
/// and rounded to 2 decimals, matching the other two sub-scores.
pub fn score_ml(f: &Features, behavioral_score: f64) -> f64 {
    let spending = sigmoid(f.spending_z_score - CENTER_SPENDING_Z) * 100.0;
    let velocity = sigmoid(f.velocity_z_score - CENTER_VELOCITY_Z) * 100.0;
    let peer = sigmoid(f.peer_group_deviation - CENTER_PEER_DEVIATION) * 100.0;

    let composite = W_SPENDING_Z * spending
        + W_VELOCITY_Z * velocity
        + W_PEER_DEVIATION * peer
        + W_LOCATION_RISK * location_risk(f)
        + W_TIME_RISK * time_risk(f)
        + W_MERCHANT_RISK * f.merchant_risk_score.min(100.0)
        + W_BEHAVIORAL * behavioral_score.min(100.0);

    round2(composite.clamp(0.0, 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zero_features() -> Features {
        Features {
            schema_version: 1,
            rolling_avg_7d: 0.0,
            rolling_avg_30d: 0.0,
            rolling_stddev_30d: 0.0,
            amount_deviation: 0.0,
            spending_z_score: 0.0,
            velocity_count_1h: 0,
            velocity_count_24h: 0,
            velocity_z_score: 0.0,
            unique_locations_7d: 0,
            location_change_count: 0,
            is_new_location: false,
            is_high_risk_country: false,
            distance_from_last_tx_km: 0.0,
            geo_velocity_kmh: 0.0,
            is_new_merchant: false,
            merchant_risk_score: 0.0,
            time_since_last_tx_hours: 0.0,
            is_unusual_hour: false,
            day_of_week_anomaly: false,
            recent_small_tx_count: 0,
            follows_probe_pattern: false,
            peer_group_avg_spend: 0.0,
            peer_group_deviation: 0.0,
            is_new_device: false,
            channel_switch_count: 0,
            shared_beneficiary_count: 0,
            anomaly_ratio_7d: 0.0,
        }
    }

    #[test]
    fn all_zero_signals_yield_low_score() {
        let score = score_ml(&zero_features(), 0.0);
        // every z-like signal sits below its center, so sigmoid(<0) < 0.5
        assert!(score < 20.0, "got {score}");
    }

    #[test]
    fn score_is_bounded() {
        let mut f = zero_features();
        f.spending_z_score = 50.0;
        f.velocity_z_score = 50.0;
        f.peer_group_deviation = 50.0;
        f.is_new_location = true;
        f.is_high_risk_country = true;
        f.distance_from_last_tx_km = 1000.0;
        f.time_since_last_tx_hours = 0.5;
        f.merchant_risk_score = 100.0;
        let score = score_ml(&f, 100.0);
        assert!(score <= 100.0);
        assert!(score > 90.0, "got {score}");
    }

    #[test]
    fn location_risk_caps_at_100() {
        let mut f = zero_features();
        f.is_new_location = true;
        f.is_high_risk_country = true;
        f.distance_from_last_tx_km = 1000.0;
        f.time_since_last_tx_hours = 0.1;
        assert_eq!(location_risk(&f), 100.0);
    }

    #[test]
    fn signal_at_its_behavioral_threshold_sits_at_midpoint() {
        let mut f = zero_features();
        f.spending_z_score = CENTER_SPENDING_Z;
        let spending = sigmoid(f.spending_z_score - CENTER_SPENDING_Z) * 100.0;
        assert!((spending - 50.0).abs() < 1e-9);
    }
}
