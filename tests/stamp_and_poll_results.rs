//! On-disk state round-trip invariants (spec §8): the stamp file's
//! mtime bound after a refresh, and poll-results idempotence.

use eos_updater::types::PollResults;
use eos_updater::util;

#[test]
fn stamp_file_mtime_is_bounded_by_randomized_delay() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stamp");

    let before = std::time::SystemTime::now();
    util::rewrite_stamp_file(&path, 3).unwrap();
    let after = std::time::SystemTime::now();

    let mtime = std::fs::metadata(&path).unwrap().modified().unwrap();
    let max_allowed = after + std::time::Duration::from_secs(3 * 86400);
    assert!(mtime >= before - std::time::Duration::from_secs(1));
    assert!(mtime <= max_allowed);
}

#[test]
fn stamp_file_due_check_respects_interval() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stamp");
    util::rewrite_stamp_file(&path, 0).unwrap();

    assert!(!util::stamp_file_due(&path, 1), "just-written stamp isn't due for a day");
    assert!(util::stamp_file_due(&path, 0), "zero-day interval is always due");
}

#[test]
fn poll_results_round_trip_is_exact() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("poll-results.json");

    let original = PollResults {
        last_changed_usecs: 123_456_789,
        update_refspec: "eos:os/eos/amd64/eos4".to_string(),
        update_id: "deadbeef".to_string(),
    };
    util::save_poll_results_if_changed(&path, &original).unwrap();

    let reread = util::load_poll_results(&path).unwrap();
    assert_eq!(reread, original);
}

#[test]
fn poll_results_unchanged_write_reports_no_change() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("poll-results.json");

    let results = PollResults {
        last_changed_usecs: 1,
        update_refspec: "eos:os/eos/amd64/eos4".to_string(),
        update_id: "abc123".to_string(),
    };
    assert!(util::save_poll_results_if_changed(&path, &results).unwrap());
    assert!(!util::save_poll_results_if_changed(&path, &results).unwrap());
}

#[test]
fn missing_poll_results_file_is_first_run_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("never-written.json");
    let results = util::load_poll_results(&path).unwrap();
    assert_eq!(results, PollResults::default());
}
