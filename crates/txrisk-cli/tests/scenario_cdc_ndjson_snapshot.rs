//! `txrisk-cli cdc` reads NDJSON from stdin and prints a final analytics
//! snapshot with no live Kafka/Postgres/Redis dependency, so this scenario
//! runs as a plain subprocess test.

use assert_cmd::Command;
use predicates::prelude::*;

fn create_message(id: &str, status: &str) -> String {
    format!(
        r#"{{"before":null,"after":{{"id":"{id}","status":"{status}","country":"US","channel":"online"}},"source":{{"table":"transactions","lsn":1,"txId":1,"ts_ms":1000}},"op":"c","ts_ms":1000}}"#
    )
}

fn update_message(id: &str, prev: &str, new: &str) -> String {
    format!(
        r#"{{"before":{{"id":"{id}","status":"{prev}","country":"US","channel":"online"}},"after":{{"id":"{id}","status":"{new}","country":"US","channel":"online"}},"source":{{"table":"transactions","lsn":2,"txId":2,"ts_ms":2000}},"op":"u","ts_ms":2000}}"#
    )
}

#[test]
fn cdc_command_aggregates_ndjson_from_stdin() {
    let input = format!(
        "{}\n{}\n\n{}\n",
        create_message("11111111-1111-1111-1111-111111111111", "pending"),
        update_message("11111111-1111-1111-1111-111111111111", "pending", "flagged"),
        "not json, should be skipped",
    );

    Command::cargo_bin("txrisk-cli")
        .unwrap()
        .arg("cdc")
        .write_stdin(input)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"total_events\": 2"))
        .stdout(predicate::str::contains("\"Pending->Flagged\": 1"));
}
