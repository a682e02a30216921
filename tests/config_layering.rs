//! Config layering invariant (spec §8): for any key defined in the
//! default file, a query returns the value from the highest-priority
//! file that defines it, falling through to the default otherwise.

use std::io::Write;

use eos_updater::config::Config;

fn write_keyfile(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    path
}

#[test]
fn highest_priority_file_wins() {
    let dir = tempfile::tempdir().unwrap();
    let admin = write_keyfile(&dir, "admin.conf", "[Automatic Updates]\nIntervalDays=1\n");
    let vendor = write_keyfile(&dir, "vendor.conf", "[Automatic Updates]\nIntervalDays=3\n");

    let config = Config::new(vec![admin, vendor]);
    assert_eq!(
        config.int64("Automatic Updates", "IntervalDays").unwrap(),
        Some(1)
    );
}

#[test]
fn falls_through_to_lower_priority_file_when_key_absent() {
    let dir = tempfile::tempdir().unwrap();
    let admin = write_keyfile(&dir, "admin.conf", "[Some Other Group]\nFoo=bar\n");
    let vendor = write_keyfile(&dir, "vendor.conf", "[Automatic Updates]\nIntervalDays=7\n");

    let config = Config::new(vec![admin, vendor]);
    assert_eq!(
        config.int64("Automatic Updates", "IntervalDays").unwrap(),
        Some(7)
    );
}

#[test]
fn falls_through_to_built_in_default_when_no_file_defines_key() {
    let dir = tempfile::tempdir().unwrap();
    let admin = write_keyfile(&dir, "admin.conf", "[Some Other Group]\nFoo=bar\n");

    let config = Config::new(vec![admin]);
    // AdvertiseUpdates is defined by the built-in default document and
    // by no file in this test, so the bool() default-accepting lookup
    // must still resolve rather than erroring.
    let value = config
        .bool("Local Network Updates", "AdvertiseUpdates", false)
        .unwrap();
    assert!(value);
}

#[test]
fn missing_candidate_file_is_silently_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("does-not-exist.conf");
    let vendor = write_keyfile(&dir, "vendor.conf", "[Automatic Updates]\nIntervalDays=2\n");

    let config = Config::new(vec![missing, vendor]);
    assert_eq!(
        config.int64("Automatic Updates", "IntervalDays").unwrap(),
        Some(2)
    );
}
