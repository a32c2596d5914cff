use std::collections::BTreeSet;

use txrisk_features::Features;

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// The eight behavioral anomaly detectors (§4.5): each contributes a bounded
/// impact and an anomaly tag when its condition holds. Returns the capped
/// composite (0..=100, rounded to 2 decimals) and the matched tags.
pub fn score_behavioral(f: &Features) -> (f64, BTreeSet<String>) {
    let mut total = 0.0;
    let mut tags = BTreeSet::new();

    let mut fire = |cond: bool, tag: &str, impact: f64| {
        if cond {
            tags.insert(tag.to_string());
            total += impact;
        }
    };

    fire(
        f.spending_z_score > 2.5,
        "SPENDING_SPIKE",
        (f.spending_z_score * 10.0).min(30.0),
    );
    fire(
        f.velocity_z_score > 2.0,
        "VELOCITY_BURST",
        (f.velocity_z_score * 8.0).min(25.0),
    );
    fire(
        f.peer_group_deviation > 3.0,
        "PEER_GROUP_DEVIATION",
        (f.peer_group_deviation * 7.0).min(25.0),
    );
    fire(f.follows_probe_pattern, "SEQUENCE_EXFIL_PATTERN", 35.0);
    fire(f.geo_velocity_kmh > 900.0, "GEO_IMPOSSIBLE_TRAVEL", 30.0);
    fire(
        f.is_unusual_hour && f.day_of_week_anomaly,
        "UNUSUAL_TIME_PATTERN",
        10.0,
    );
    fire(
        f.channel_switch_count > 3,
        "RAPID_CHANNEL_SWITCH",
        15.0,
    );
    // NEW_DEVICE_HIGH_VALUE also needs the transaction amount; callers that
    // want it folded in pass amount_gt_1000 via `new_device_high_value`.

    (round2(total.min(100.0)), tags)
}

/// NEW_DEVICE_HIGH_VALUE needs the transaction amount (not a feature), so it
/// is evaluated alongside `score_behavioral` rather than inside it.
pub fn new_device_high_value(is_new_device: bool, amount_gt_1000: bool) -> Option<(&'static str, f64)> {
    if is_new_device && amount_gt_1000 {
        Some(("NEW_DEVICE_HIGH_VALUE", 20.0))
    } else {
        None
    }
}
