//! Integration test: fixture persistence and structured log round trip.
//!
//! Validates that:
//! 1. A suite survives file persistence with its digest intact and
//!    still replays clean.
//! 2. A tampered fixture file is rejected at load time.
//! 3. The JSONL log of a replay validates against the record schema.
//!
//! Run: cargo test -p hunkdl-harness --test scenario_roundtrip_test

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use hunkdl_harness::scenarios::builtin_suite;
use hunkdl_harness::structured_log::{LogEmitter, LogLevel, Outcome, validate_log_file};
use hunkdl_harness::{FixtureSet, HarnessError, ScenarioRunner};

fn unique_tmp_path(prefix: &str, suffix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time should be after UNIX_EPOCH")
        .as_nanos();
    std::env::temp_dir().join(format!("{prefix}-{}-{nanos}{suffix}", std::process::id()))
}

#[test]
fn fixture_file_round_trip_survives_and_replays() {
    let suite = builtin_suite().expect("suite should assemble");
    let path = unique_tmp_path("hunkdl-fixtures", ".json");
    suite.to_file(&path).expect("suite should persist");

    let reloaded = FixtureSet::from_file(&path).expect("persisted suite should load");
    assert_eq!(reloaded.digest, suite.digest);
    assert_eq!(reloaded.cases.len(), suite.cases.len());

    let results = ScenarioRunner::new().run(&reloaded);
    assert!(
        results.iter().all(|result| result.passed),
        "reloaded suite must replay clean"
    );

    std::fs::remove_file(&path).ok();
}

#[test]
fn tampered_fixture_file_is_rejected() {
    let suite = builtin_suite().expect("suite should assemble");
    let path = unique_tmp_path("hunkdl-tampered", ".json");
    suite.to_file(&path).expect("suite should persist");

    let text = std::fs::read_to_string(&path).expect("fixture file should be readable");
    assert!(text.contains("\"demo_trio\""), "expected case name missing");
    let tampered = text.replace("\"demo_trio\"", "\"demo_trip\"");
    std::fs::write(&path, tampered).expect("tampered file should write");

    match FixtureSet::from_file(&path) {
        Err(HarnessError::DigestMismatch { recorded, computed }) => {
            assert_ne!(recorded, computed);
        }
        other => panic!("expected a digest mismatch, got {other:?}"),
    }

    std::fs::remove_file(&path).ok();
}

#[test]
fn replay_log_validates_line_by_line() {
    let suite = builtin_suite().expect("suite should assemble");
    let results = ScenarioRunner::new().run(&suite);

    let path = unique_tmp_path("hunkdl-replay", ".jsonl");
    let mut emitter = LogEmitter::to_file(&path, "roundtrip-test").expect("log file should open");
    emitter
        .emit(LogLevel::Info, "run_started")
        .expect("emit should succeed");
    for result in &results {
        emitter
            .emit_result(&suite.suite, result)
            .expect("emit should succeed");
    }
    emitter
        .emit(LogLevel::Info, "run_finished")
        .expect("emit should succeed");
    emitter.flush().expect("flush should succeed");

    let entries = match validate_log_file(&path) {
        Ok(entries) => entries,
        Err(errors) => {
            for error in &errors {
                eprintln!("log violation: {error}");
            }
            panic!("replay log failed validation");
        }
    };
    assert_eq!(entries.len(), results.len() + 2);
    assert_eq!(entries[0].event, "run_started");
    assert_eq!(entries[entries.len() - 1].event, "run_finished");

    let case_entries = &entries[1..entries.len() - 1];
    for (entry, result) in case_entries.iter().zip(&results) {
        assert_eq!(entry.event, "case_replayed");
        assert_eq!(entry.case.as_deref(), Some(result.case_name.as_str()));
        assert_eq!(entry.outcome, Some(Outcome::Pass));
        assert_eq!(entry.suite.as_deref(), Some(suite.suite.as_str()));
    }
    let mut seqs: Vec<u64> = entries.iter().map(|entry| entry.seq).collect();
    seqs.dedup();
    assert_eq!(seqs.len(), entries.len(), "sequence numbers must not repeat");

    std::fs::remove_file(&path).ok();
}
