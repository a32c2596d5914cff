//! S5 (velocity attack) and S6 (worker retry to dead-letter) from spec §8.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use txrisk_features::HistoryEntry;
use txrisk_ingest::IngestRequest;
use txrisk_schemas::{Account, AccountStatus, AccountType, Channel, RiskProfile, TransactionStatus};
use txrisk_queue::QueuePort;
use txrisk_testkit::fakes::FlakyScoringRepo;
use txrisk_testkit::{FakeRepo, ScoringHarness};
use txrisk_worker::WorkerPoolConfig;
use uuid::Uuid;

fn active_account() -> Account {
    Account {
        id: Uuid::new_v4(),
        owner: "bob".into(),
        account_type: AccountType::Standard,
        risk_profile: RiskProfile::Low,
        status: AccountStatus::Active,
    }
}

#[tokio::test]
async fn s5_velocity_attack_triggers_rapid_small_transactions_on_the_sixth_hit() {
    let repo = Arc::new(FakeRepo::new());
    let account = active_account();
    repo.seed_account(account.clone());

    // Five prior $50 transactions in the last 60s -> the 6th sees velocity_count_1h == 6.
    let now = Utc::now();
    for i in 0..5 {
        repo.seed_history(
            account.id,
            HistoryEntry {
                amount: Decimal::from(50),
                location: "NYC".into(),
                merchant: "Kiosk".into(),
                country: "US".into(),
                channel: Channel::Pos,
                created_at: now - chrono::Duration::seconds(10 * (i + 1)),
                status: TransactionStatus::Processed,
            },
            TransactionStatus::Processed,
        );
    }

    let harness = ScoringHarness::new(repo.clone()).with_ml_disabled();
    harness
        .ingest(IngestRequest {
            account_id: account.id,
            amount: Decimal::from(50),
            currency: "USD".into(),
            merchant: "Kiosk".into(),
            merchant_category: "retail".into(),
            location: "NYC".into(),
            country: "US".into(),
            channel: Channel::Pos,
            idempotency_key: "s5-key".into(),
            metadata: serde_json::json!({}),
        })
        .await
        .unwrap();

    let score = harness.score_next().await.unwrap();
    assert!(score.rules_triggered.contains("RULE_RAPID_SMALL_TRANSACTIONS"));
    assert!(!score.rules_triggered.contains("RULE_VELOCITY_BURST"));
}

#[tokio::test]
async fn s6_worker_retries_three_times_then_dead_letters_exactly_once() {
    let repo = Arc::new(FakeRepo::new());
    let account = active_account();
    repo.seed_account(account.clone());

    // save_score fails transiently on every attempt (simulates a scorer
    // that always throws), so the pool must retry to the configured budget
    // and dead-letter past it.
    let flaky = Arc::new(FlakyScoringRepo::new(repo.clone(), u32::MAX));
    let harness = Arc::new(ScoringHarness::with_scoring_repo(repo.clone(), flaky));

    let outcome = harness
        .ingest(IngestRequest {
            account_id: account.id,
            amount: Decimal::from(50),
            currency: "USD".into(),
            merchant: "Kiosk".into(),
            merchant_category: "retail".into(),
            location: "NYC".into(),
            country: "US".into(),
            channel: Channel::Pos,
            idempotency_key: "s6-key".into(),
            metadata: serde_json::json!({}),
        })
        .await
        .unwrap();

    let pool = harness.worker_pool(WorkerPoolConfig {
        concurrency: 1,
        retry_attempts: 3,
        poll_interval: Duration::from_millis(5),
        block_timeout: Duration::from_millis(5),
        transport_backoff: Duration::from_millis(5),
        ..WorkerPoolConfig::default()
    });
    let pool = Arc::new(pool);

    let runner = tokio::spawn(pool.clone().run());
    tokio::time::sleep(Duration::from_millis(200)).await;
    pool.shutdown();
    let _ = runner.await;

    assert_eq!(pool.dead_letter_count(), 1);
    let info = harness.queue.info().await.unwrap();
    assert_eq!(info.length, 0, "dead-lettered event must leave the main stream");

    let dead_letters = harness.queue.dead_letters();
    assert_eq!(dead_letters.len(), 1);
    assert_eq!(dead_letters[0].0.transaction_id, outcome.transaction_id);
    assert_eq!(dead_letters[0].0.retry_count, 3);
}
