//! `txrisk-cli migrate`: run embedded migrations then seed the baseline
//! rule catalog (§4.4). Idempotent — safe to run on every deploy.

use anyhow::Result;

pub async fn run() -> Result<()> {
    let pool = txrisk_db::connect_from_env().await?;
    txrisk_db::migrate(&pool).await?;
    println!("migrations_applied=true");

    txrisk_db::seed_baseline_rules(&pool).await?;
    println!("baseline_rules_seeded=true");

    Ok(())
}
