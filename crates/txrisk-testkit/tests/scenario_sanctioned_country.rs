//! S3 (sanctioned country + new location) from spec §8.

use std::sync::Arc;

use rust_decimal::Decimal;
use txrisk_ingest::IngestRequest;
use txrisk_schemas::{Account, AccountStatus, AccountType, Channel, RiskLevel, RiskProfile};
use txrisk_testkit::{FakeRepo, ScoringHarness};
use uuid::Uuid;

fn active_account() -> Account {
    Account {
        id: Uuid::new_v4(),
        owner: "carol".into(),
        account_type: AccountType::Standard,
        risk_profile: RiskProfile::Low,
        status: AccountStatus::Active,
    }
}

#[tokio::test]
async fn s3_sanctioned_country_and_new_location_stack_to_medium_risk() {
    let repo = Arc::new(FakeRepo::new());
    let account = active_account();
    repo.seed_account(account.clone());

    let harness = ScoringHarness::new(repo.clone()).with_ml_disabled();
    harness
        .ingest(IngestRequest {
            account_id: account.id,
            amount: Decimal::from(5000),
            currency: "USD".into(),
            merchant: "Wire Desk".into(),
            merchant_category: "transfer".into(),
            location: "Pyongyang".into(),
            country: "NK".into(),
            channel: Channel::Online,
            idempotency_key: "s3-key".into(),
            metadata: serde_json::json!({}),
        })
        .await
        .unwrap();

    let score = harness.score_next().await.unwrap();

    assert!(score.rules_triggered.contains("RULE_HIGH_RISK_COUNTRY"));
    assert!(score.rules_triggered.contains("RULE_NEW_LOCATION_HIGH_AMOUNT"));
    assert_eq!(score.rule_score, 60.0);
    // §8 S3: with no ml and no behavioral signal, composite = 0.59*60 = 35.4 -> medium.
    assert!((score.composite_score - 35.4).abs() < 1e-9, "got {}", score.composite_score);
    assert_eq!(score.risk_level, RiskLevel::Medium);
}
