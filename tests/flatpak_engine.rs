//! Black-box scenario tests for the flatpak action engine (spec §4.8,
//! §8 "Round-trip / idempotence" and the `Perform`/`Stamp`/`Check`
//! invariants), exercised only through the public `flatpak` API.

use std::sync::Mutex;

use eos_updater::flatpak::{self, FlatpakBackend, FlatpakOpError, Mode};
use eos_updater::types::{ActionList, FlatpakActionKind, FlatpakRefAction, LocationRef, ProgressCounters};

#[derive(Default)]
struct RecordingBackend {
    installed: Mutex<std::collections::BTreeSet<String>>,
}

impl FlatpakBackend for RecordingBackend {
    fn is_installed(&self, _remote: &str, ref_name: &str) -> anyhow::Result<bool> {
        Ok(self.installed.lock().unwrap().contains(ref_name))
    }

    fn install(&self, _remote: &str, ref_name: &str) -> Result<(), FlatpakOpError> {
        let mut set = self.installed.lock().unwrap();
        if set.contains(ref_name) {
            return Err(FlatpakOpError::AlreadyInstalled);
        }
        set.insert(ref_name.to_string());
        Ok(())
    }

    fn update(&self, _remote: &str, ref_name: &str) -> Result<(), FlatpakOpError> {
        if !self.installed.lock().unwrap().contains(ref_name) {
            return Err(FlatpakOpError::NotInstalled);
        }
        Ok(())
    }

    fn uninstall(&self, _remote: &str, ref_name: &str) -> Result<(), FlatpakOpError> {
        let mut set = self.installed.lock().unwrap();
        if !set.remove(ref_name) {
            return Err(FlatpakOpError::NotInstalled);
        }
        Ok(())
    }
}

fn action(kind: FlatpakActionKind, ref_name: &str, remote: &str, serial: u32, file: &str) -> FlatpakRefAction {
    FlatpakRefAction {
        kind,
        location_ref: LocationRef {
            ref_name: ref_name.to_string(),
            remote: Some(remote.to_string()),
            collection_id: None,
        },
        source_file: file.to_string(),
        serial,
    }
}

#[test]
fn perform_then_rerun_is_a_no_op() {
    let list = ActionList {
        source_file: "apps.txt".to_string(),
        priority: 0,
        actions: vec![
            action(FlatpakActionKind::Install, "org.foo.App", "eos", 1, "apps.txt"),
            action(FlatpakActionKind::Install, "org.bar.App", "eos", 2, "apps.txt"),
        ],
    };
    let backend = RecordingBackend::default();
    let mut counters = ProgressCounters::default();

    let first = flatpak::run(&[list.clone()], &mut counters, Mode::Perform, &backend, None).unwrap();
    assert_eq!(first.applied.len(), 2);
    assert_eq!(counters.get("apps.txt"), 2);

    let second = flatpak::run(&[list], &mut counters, Mode::Perform, &backend, None).unwrap();
    assert!(second.applied.is_empty(), "no actions left past the applied serial");
    assert_eq!(counters.get("apps.txt"), 2, "counters unchanged by a no-op run");
}

#[test]
fn check_succeeds_after_a_successful_perform() {
    let list = ActionList {
        source_file: "apps.txt".to_string(),
        priority: 0,
        actions: vec![action(FlatpakActionKind::Install, "org.foo.App", "eos", 1, "apps.txt")],
    };
    let backend = RecordingBackend::default();
    let mut counters = ProgressCounters::default();

    flatpak::run(&[list.clone()], &mut counters, Mode::Perform, &backend, None).unwrap();
    let report = flatpak::run(&[list], &mut counters, Mode::Check, &backend, None).unwrap();
    assert!(report.check_mismatches.is_empty());
}

#[test]
fn aborted_perform_leaves_counter_at_last_successful_serial() {
    let list = ActionList {
        source_file: "apps.txt".to_string(),
        priority: 0,
        actions: vec![
            action(FlatpakActionKind::Install, "org.foo.App", "eos", 1, "apps.txt"),
            // Update with nothing installed under this ref name fails
            // (NotInstalled is only swallowed for Uninstall).
            action(FlatpakActionKind::Update, "org.never.Installed", "eos", 2, "apps.txt"),
            action(FlatpakActionKind::Install, "org.baz.App", "eos", 3, "apps.txt"),
        ],
    };
    let backend = RecordingBackend::default();
    let mut counters = ProgressCounters::default();

    let err = flatpak::run(&[list], &mut counters, Mode::Perform, &backend, None);
    assert!(err.is_err());
    assert_eq!(counters.get("apps.txt"), 1, "only the first action's serial was persisted");
}

#[test]
fn remote_mismatch_is_rejected_without_partial_progress_loss() {
    let list = ActionList {
        source_file: "apps.txt".to_string(),
        priority: 0,
        actions: vec![action(FlatpakActionKind::Install, "org.foo.App", "other-remote", 1, "apps.txt")],
    };
    let backend = RecordingBackend::default();
    let mut counters = ProgressCounters::default();

    let err = flatpak::run(&[list], &mut counters, Mode::Perform, &backend, Some("eos"));
    assert!(err.is_err());
    assert!(!backend.is_installed("eos", "org.foo.App").unwrap());
}
