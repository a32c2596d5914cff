//! Per-group result accounting and significance estimation (§4.8).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use txrisk_schemas::RiskLevel;

/// Rolling per-group counters. `avg_risk_score` is maintained as a running
/// mean so no individual scores need to be retained.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupStats {
    pub total_transactions: u64,
    pub total_amount: f64,
    pub avg_risk_score: f64,
    pub risk_level_distribution: BTreeMap<String, u64>,
    pub flagged_count: u64,
    pub blocked_count: u64,
    pub rule_trigger_histogram: BTreeMap<String, u64>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl GroupStats {
    pub fn record(
        &mut self,
        amount: f64,
        composite_score: f64,
        risk_level: RiskLevel,
        rules_triggered: &[String],
        at: DateTime<Utc>,
    ) {
        let n = self.total_transactions as f64;
        self.avg_risk_score = (self.avg_risk_score * n + composite_score) / (n + 1.0);
        self.total_transactions += 1;
        self.total_amount += amount;

        let level_key = risk_level_key(risk_level);
        *self.risk_level_distribution.entry(level_key).or_insert(0) += 1;

        match risk_level {
            RiskLevel::High => self.flagged_count += 1,
            RiskLevel::Critical => self.blocked_count += 1,
            _ => {}
        }

        for rule_id in rules_triggered {
            *self.rule_trigger_histogram.entry(rule_id.clone()).or_insert(0) += 1;
        }

        self.last_updated = Some(at);
    }

    /// Count of transactions landing in high (flagged) or critical (blocked).
    fn flag_or_block_count(&self) -> u64 {
        self.flagged_count + self.blocked_count
    }
}

fn risk_level_key(level: RiskLevel) -> String {
    match level {
        RiskLevel::Low => "low",
        RiskLevel::Medium => "medium",
        RiskLevel::High => "high",
        RiskLevel::Critical => "critical",
    }
    .to_string()
}

/// Two-tailed z-test on the combined flag/block rate between control and
/// test, consulted only when both groups have accumulated `>= 100` samples
/// (§4.8). `p < 0.05` is treated as significant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignificanceResult {
    pub eligible: bool,
    pub control_rate: f64,
    pub test_rate: f64,
    pub z_score: f64,
    pub p_value: f64,
    pub significant: bool,
    pub recommendation: String,
}

const MIN_SAMPLES_FOR_SIGNIFICANCE: u64 = 100;

pub fn estimate_significance(control: &GroupStats, test: &GroupStats) -> SignificanceResult {
    if control.total_transactions < MIN_SAMPLES_FOR_SIGNIFICANCE
        || test.total_transactions < MIN_SAMPLES_FOR_SIGNIFICANCE
    {
        return SignificanceResult {
            eligible: false,
            control_rate: rate(control),
            test_rate: rate(test),
            z_score: 0.0,
            p_value: 1.0,
            significant: false,
            recommendation: format!(
                "not enough samples yet (control={}, test={}, need >= {MIN_SAMPLES_FOR_SIGNIFICANCE} each)",
                control.total_transactions, test.total_transactions
            ),
        };
    }

    let n1 = control.total_transactions as f64;
    let n2 = test.total_transactions as f64;
    let p1 = rate(control);
    let p2 = rate(test);

    let pooled = (control.flag_or_block_count() as f64 + test.flag_or_block_count() as f64) / (n1 + n2);
    let se = (pooled * (1.0 - pooled) * (1.0 / n1 + 1.0 / n2)).sqrt();

    let z = if se == 0.0 { 0.0 } else { (p1 - p2) / se };
    let p_value = 2.0 * (1.0 - standard_normal_cdf(z.abs()));
    let significant = p_value < 0.05;

    let recommendation = if !significant {
        "no statistically significant difference between control and test at the 95% level".to_string()
    } else if p2 < p1 {
        "test group shows a significantly lower flag/block rate than control".to_string()
    } else {
        "test group shows a significantly higher flag/block rate than control".to_string()
    };

    SignificanceResult {
        eligible: true,
        control_rate: p1,
        test_rate: p2,
        z_score: z,
        p_value,
        significant,
        recommendation,
    }
}

fn rate(g: &GroupStats) -> f64 {
    if g.total_transactions == 0 {
        0.0
    } else {
        g.flag_or_block_count() as f64 / g.total_transactions as f64
    }
}

/// Standard normal CDF via the Abramowitz & Stegun erf approximation
/// (accurate to ~1.5e-7, more than enough for a significance gate).
fn standard_normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();

    sign * y
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn below_sample_threshold_is_not_eligible() {
        let mut c = GroupStats::default();
        let mut t = GroupStats::default();
        for _ in 0..50 {
            c.record(10.0, 1.0, RiskLevel::Low, &[], Utc::now());
            t.record(10.0, 1.0, RiskLevel::Low, &[], Utc::now());
        }
        let r = estimate_significance(&c, &t);
        assert!(!r.eligible);
        assert!(!r.significant);
    }

    #[test]
    fn identical_rates_are_not_significant() {
        let mut c = GroupStats::default();
        let mut t = GroupStats::default();
        for _ in 0..150 {
            c.record(10.0, 1.0, RiskLevel::Low, &[], Utc::now());
            t.record(10.0, 1.0, RiskLevel::Low, &[], Utc::now());
        }
        let r = estimate_significance(&c, &t);
        assert!(r.eligible);
        assert!(!r.significant);
        assert!(r.p_value > 0.05);
    }

    #[test]
    fn sharply_different_rates_are_significant() {
        let mut c = GroupStats::default();
        let mut t = GroupStats::default();
        for i in 0..200 {
            let level = if i % 2 == 0 { RiskLevel::Critical } else { RiskLevel::Low };
            c.record(10.0, 1.0, level, &[], Utc::now());
        }
        for _ in 0..200 {
            t.record(10.0, 1.0, RiskLevel::Low, &[], Utc::now());
        }
        let r = estimate_significance(&c, &t);
        assert!(r.eligible);
        assert!(r.significant);
        assert!(r.p_value < 0.05);
    }

    #[test]
    fn running_mean_matches_manual_average() {
        let mut g = GroupStats::default();
        g.record(10.0, 20.0, RiskLevel::Low, &[], Utc::now());
        g.record(10.0, 40.0, RiskLevel::Low, &[], Utc::now());
        assert_eq!(g.avg_risk_score, 30.0);
    }
}
