use txrisk_schemas::{ComparisonOp, CompoundOp, Rule, RuleCondition};

use crate::types::{resolve_field, RuleContext};

fn compare(value: f64, op: &ComparisonOp, threshold: f64) -> bool {
    match op {
        ComparisonOp::Gt => value > threshold,
        ComparisonOp::Lt => value < threshold,
        ComparisonOp::Gte => value >= threshold,
        ComparisonOp::Lte => value <= threshold,
        ComparisonOp::Eq => (value - threshold).abs() < f64::EPSILON,
        ComparisonOp::Neq => (value - threshold).abs() >= f64::EPSILON,
    }
}

/// Evaluate a closed condition tree against `ctx`. Never interprets
/// arbitrary expressions: the only branches are the three tagged variants
/// `RuleCondition` can hold.
pub fn evaluate_condition(cond: &RuleCondition, ctx: &RuleContext) -> bool {
    match cond {
        RuleCondition::Threshold { field, op, value } => match resolve_field(field, ctx) {
            Some(v) => compare(v, op, *value),
            None => false,
        },
        RuleCondition::Compound { op, children } => match op {
            CompoundOp::And => children.iter().all(|c| evaluate_condition(c, ctx)),
            CompoundOp::Or => children.iter().any(|c| evaluate_condition(c, ctx)),
        },
        RuleCondition::TimeRange { field, start, end } => match resolve_field(field, ctx) {
            Some(v) => {
                let hour = v as u8;
                if start <= end {
                    hour >= *start && hour < *end
                } else {
                    // wraps past midnight, e.g. 22..6
                    hour >= *start || hour < *end
                }
            }
            None => false,
        },
    }
}

/// Evaluate every enabled rule in `rules` against `ctx`, top-to-bottom by
/// `priority` (ties broken by id for determinism). Returns the capped
/// composite rule score (0..=100, rounded to 2 decimals) and the triggered
/// rule ids in match order — callers persisting to `RiskScore.rules_triggered`
/// (a `BTreeSet`) accept the reordering that entails.
pub fn evaluate_rules(rules: &[Rule], ctx: &RuleContext) -> (f64, Vec<String>) {
    let mut ordered: Vec<&Rule> = rules.iter().filter(|r| r.enabled).collect();
    ordered.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));

    let mut triggered = Vec::new();
    let mut total = 0.0;
    for rule in ordered {
        if evaluate_condition(&rule.condition, ctx) {
            triggered.push(rule.id.clone());
            total += rule.score_impact;
        }
    }

    let capped = total.min(100.0);
    (round2(capped), triggered)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// The sixteen baseline rules shipped by default. Operators may override,
/// disable, or extend this set at runtime (persisted in the rules catalog);
/// this function is the seed used when the store is empty.
pub fn baseline_rules() -> Vec<Rule> {
    use txrisk_schemas::RiskLevel;

    let threshold = |field: &str, op: ComparisonOp, value: f64| RuleCondition::Threshold {
        field: field.to_string(),
        op,
        value,
    };
    let and = |children: Vec<RuleCondition>| RuleCondition::Compound {
        op: CompoundOp::And,
        children,
    };

    vec![
        Rule {
            id: "RULE_CRITICAL_AMOUNT".into(),
            name: "Critical transaction amount".into(),
            condition: threshold("amount", ComparisonOp::Gt, 10_000.0),
            score_impact: 40.0,
            nominal_risk_level: RiskLevel::Critical,
            priority: 10,
            enabled: true,
        },
        Rule {
            id: "RULE_SPIKE_ANOMALY".into(),
            name: "Spending spike vs. rolling baseline".into(),
            condition: threshold("amount_deviation", ComparisonOp::Gt, 3.0),
            score_impact: 30.0,
            nominal_risk_level: RiskLevel::High,
            priority: 20,
            enabled: true,
        },
        Rule {
            id: "RULE_HIGH_RISK_COUNTRY".into(),
            name: "Transaction originates in a sanctioned country".into(),
            condition: threshold("is_high_risk_country", ComparisonOp::Eq, 1.0),
            score_impact: 35.0,
            nominal_risk_level: RiskLevel::High,
            priority: 20,
            enabled: true,
        },
        Rule {
            id: "RULE_NEW_LOCATION_HIGH_AMOUNT".into(),
            name: "First transaction at this location, elevated amount".into(),
            condition: and(vec![
                threshold("is_new_location", ComparisonOp::Eq, 1.0),
                threshold("amount", ComparisonOp::Gt, 1_000.0),
            ]),
            score_impact: 25.0,
            nominal_risk_level: RiskLevel::Medium,
            priority: 40,
            enabled: true,
        },
        Rule {
            id: "RULE_RAPID_SMALL_TRANSACTIONS".into(),
            name: "Burst of small transactions".into(),
            condition: and(vec![
                threshold("velocity_count_1h", ComparisonOp::Gt, 5.0),
                threshold("amount", ComparisonOp::Lt, 100.0),
            ]),
            score_impact: 25.0,
            nominal_risk_level: RiskLevel::High,
            priority: 20,
            enabled: true,
        },
        Rule {
            id: "RULE_VELOCITY_BURST".into(),
            name: "Transaction velocity burst".into(),
            condition: threshold("velocity_count_1h", ComparisonOp::Gt, 10.0),
            score_impact: 20.0,
            nominal_risk_level: RiskLevel::Medium,
            priority: 40,
            enabled: true,
        },
        Rule {
            id: "RULE_LOCATION_HOPPING".into(),
            name: "Frequent location changes".into(),
            condition: threshold("location_change_count", ComparisonOp::Gt, 3.0),
            score_impact: 15.0,
            nominal_risk_level: RiskLevel::Medium,
            priority: 40,
            enabled: true,
        },
        Rule {
            id: "RULE_NEW_MERCHANT_HIGH_AMOUNT".into(),
            name: "First transaction at this merchant, elevated amount".into(),
            condition: and(vec![
                threshold("is_new_merchant", ComparisonOp::Eq, 1.0),
                threshold("amount", ComparisonOp::Gt, 500.0),
            ]),
            score_impact: 15.0,
            nominal_risk_level: RiskLevel::Medium,
            priority: 40,
            enabled: true,
        },
        Rule {
            id: "RULE_NIGHT_TRANSACTION".into(),
            name: "Transaction during overnight hours".into(),
            condition: RuleCondition::TimeRange {
                field: "hour".to_string(),
                start: 0,
                end: 5,
            },
            score_impact: 10.0,
            nominal_risk_level: RiskLevel::Low,
            priority: 60,
            enabled: true,
        },
        Rule {
            id: "RULE_SEQUENCE_EXFIL_PATTERN".into(),
            name: "Small probes followed by a large withdrawal".into(),
            condition: and(vec![
                threshold("follows_probe_pattern", ComparisonOp::Eq, 1.0),
                threshold("amount", ComparisonOp::Gt, 1_000.0),
            ]),
            score_impact: 35.0,
            nominal_risk_level: RiskLevel::High,
            priority: 20,
            enabled: true,
        },
        Rule {
            id: "RULE_GEO_IMPOSSIBLE_TRAVEL".into(),
            name: "Implied travel speed since last transaction exceeds plausibility".into(),
            condition: threshold("geo_velocity_kmh", ComparisonOp::Gt, 900.0),
            score_impact: 40.0,
            nominal_risk_level: RiskLevel::Critical,
            priority: 10,
            enabled: true,
        },
        Rule {
            id: "RULE_PEER_GROUP_ANOMALY".into(),
            name: "Spend deviates sharply from peer group".into(),
            condition: threshold("peer_group_deviation", ComparisonOp::Gt, 3.0),
            score_impact: 25.0,
            nominal_risk_level: RiskLevel::Medium,
            priority: 40,
            enabled: true,
        },
        Rule {
            id: "RULE_SHARED_BENEFICIARY_NETWORK".into(),
            name: "Beneficiary shared across many accounts".into(),
            condition: threshold("shared_beneficiary_count", ComparisonOp::Gt, 3.0),
            score_impact: 30.0,
            nominal_risk_level: RiskLevel::High,
            priority: 20,
            enabled: true,
        },
        Rule {
            id: "RULE_RAPID_DEVICE_SWITCH".into(),
            name: "New device fingerprint on an elevated-amount transaction".into(),
            condition: and(vec![
                threshold("is_new_device", ComparisonOp::Eq, 1.0),
                threshold("amount", ComparisonOp::Gt, 500.0),
            ]),
            score_impact: 25.0,
            nominal_risk_level: RiskLevel::Medium,
            priority: 40,
            enabled: true,
        },
        Rule {
            id: "RULE_RAPID_CHANNEL_SWITCH".into(),
            name: "Multiple channel switches in short order".into(),
            condition: threshold("channel_switch_count", ComparisonOp::Gt, 3.0),
            score_impact: 15.0,
            nominal_risk_level: RiskLevel::Medium,
            priority: 40,
            enabled: true,
        },
        Rule {
            id: "RULE_BEHAVIORAL_ANOMALY".into(),
            name: "Elevated behavioral composite score".into(),
            condition: threshold("behavioral_composite", ComparisonOp::Gt, 50.0),
            score_impact: 20.0,
            nominal_risk_level: RiskLevel::Medium,
            priority: 50,
            enabled: true,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RuleContext;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use txrisk_features::Features;
    use txrisk_schemas::{Channel, Transaction, TransactionStatus};
    use uuid::Uuid;

    fn base_tx(amount: i64, created_at: chrono::DateTime<Utc>) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            amount: Decimal::from(amount),
            currency: "USD".into(),
            merchant: "Acme".into(),
            merchant_category: "retail".into(),
            location: "NYC".into(),
            country: "US".into(),
            channel: Channel::Pos,
            status: TransactionStatus::Pending,
            idempotency_key: "k1".into(),
            metadata: serde_json::Value::Null,
            created_at,
            processed_at: None,
        }
    }

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

    fn ctx<'a>(tx: &'a Transaction, features: &'a Features) -> RuleContext<'a> {
        RuleContext {
            tx,
            features,
            behavioral_score: 0.0,
        }
    }

    #[test]
    fn critical_amount_boundary_is_exclusive() {
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap();
        let rules = baseline_rules();

        let at = base_tx(10_000, now);
        let f = zero_features();
        let (score, triggered) = evaluate_rules(&rules, &ctx(&at, &f));
        assert_eq!(score, 0.0, "amount == 10000 must not trigger");
        assert!(!triggered.iter().any(|r| r == "RULE_CRITICAL_AMOUNT"));

        let above = base_tx(10_001, now);
        let (score2, triggered2) = evaluate_rules(&rules, &ctx(&above, &f));
        assert_eq!(score2, 40.0);
        assert!(triggered2.iter().any(|r| r == "RULE_CRITICAL_AMOUNT"));
    }

    #[test]
    fn impossible_travel_needs_elapsed_time_to_fire() {
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap();
        let rules = baseline_rules();
        let tx = base_tx(50, now);

        // zero elapsed time -> geo_velocity_kmh is defined as 0, so the
        // ratio rule must not fire even with a large distance on record.
        let mut f = zero_features();
        f.distance_from_last_tx_km = 600.0;
        f.time_since_last_tx_hours = 0.0;
        f.geo_velocity_kmh = 0.0;
        let (_, triggered) = evaluate_rules(&rules, &ctx(&tx, &f));
        assert!(!triggered.iter().any(|r| r == "RULE_GEO_IMPOSSIBLE_TRAVEL"));

        let mut f2 = zero_features();
        f2.distance_from_last_tx_km = 600.0;
        f2.time_since_last_tx_hours = 0.5;
        f2.geo_velocity_kmh = 1200.0;
        let (_, triggered2) = evaluate_rules(&rules, &ctx(&tx, &f2));
        assert!(triggered2.iter().any(|r| r == "RULE_GEO_IMPOSSIBLE_TRAVEL"));
    }

    #[test]
    fn score_caps_at_100() {
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 3, 0, 0).unwrap();
        let rules = baseline_rules();
        let tx = base_tx(20_000, now);
        let mut f = zero_features();
        f.is_high_risk_country = true;
        f.amount_deviation = 10.0;
        f.geo_velocity_kmh = 1500.0;
        f.follows_probe_pattern = true;
        let (score, _) = evaluate_rules(&rules, &ctx(&tx, &f));
        assert!(score <= 100.0);
    }

    #[test]
    fn disabled_rule_never_triggers() {
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap();
        let mut rules = baseline_rules();
        for r in rules.iter_mut() {
            if r.id == "RULE_CRITICAL_AMOUNT" {
                r.enabled = false;
            }
        }
        let tx = base_tx(50_000, now);
        let f = zero_features();
        let (_, triggered) = evaluate_rules(&rules, &ctx(&tx, &f));
        assert!(!triggered.iter().any(|r| r == "RULE_CRITICAL_AMOUNT"));
    }

    #[test]
    fn sequence_exfil_pattern_requires_amount_above_1000() {
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap();
        let rules = baseline_rules();

        let at_boundary = base_tx(1000, now);
        let mut f = zero_features();
        f.follows_probe_pattern = true;
        let (_, triggered) = evaluate_rules(&rules, &ctx(&at_boundary, &f));
        assert!(!triggered.iter().any(|r| r == "RULE_SEQUENCE_EXFIL_PATTERN"));

        let above = base_tx(1001, now);
        let (_, triggered2) = evaluate_rules(&rules, &ctx(&above, &f));
        assert!(triggered2.iter().any(|r| r == "RULE_SEQUENCE_EXFIL_PATTERN"));
    }
}
