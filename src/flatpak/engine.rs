//! Engine core: deltas, squash, and the three run modes (spec §4.8).

use crate::error::{FlatpakEngineError, UpdaterErrorKind};
use crate::metrics;
use crate::types::{ActionList, FlatpakActionKind, FlatpakRefAction, ProgressCounters};

use super::backend::{FlatpakBackend, FlatpakOpError};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mode {
    Perform,
    Stamp,
    Check,
}

#[derive(Debug, Default)]
pub struct RunReport {
    /// Actions actually applied (or, in `Stamp` mode, that would have
    /// been), in the order processed.
    pub applied: Vec<FlatpakRefAction>,
    /// `Check`-mode mismatches, one line each.
    pub check_mismatches: Vec<String>,
}

/// New actions for one file: serial strictly greater than the
/// already-applied progress counter, squashed so only the
/// highest-serial action survives per ref (spec §4.8 "Deltas").
fn new_actions_for(list: &ActionList, applied_serial: i64) -> Vec<FlatpakRefAction> {
    let mut candidates: Vec<&FlatpakRefAction> = list
        .actions
        .iter()
        .filter(|a| i64::from(a.serial) > applied_serial)
        .collect();
    candidates.sort_by_key(|a| a.serial);

    let mut by_ref: std::collections::BTreeMap<String, &FlatpakRefAction> = std::collections::BTreeMap::new();
    for action in candidates {
        by_ref.insert(action.location_ref.ref_name.clone(), action);
    }
    let mut squashed: Vec<FlatpakRefAction> = by_ref.into_values().cloned().collect();
    squashed.sort_by_key(|a| a.serial);
    squashed
}

fn max_serial(list: &ActionList, applied_serial: i64) -> i64 {
    list.actions
        .iter()
        .filter(|a| i64::from(a.serial) > applied_serial)
        .map(|a| i64::from(a.serial))
        .max()
        .unwrap_or(applied_serial)
}

fn check_remote(action: &FlatpakRefAction, expected_remote: Option<&str>) -> Result<(), FlatpakEngineError> {
    let (Some(expected), Some(actual)) = (expected_remote, action.location_ref.remote.as_deref()) else {
        return Ok(());
    };
    if expected != actual {
        return Err(FlatpakEngineError::RemoteConflict {
            ref_name: action.location_ref.ref_name.clone(),
            action_remote: actual.to_string(),
            resolved_remote: expected.to_string(),
        });
    }
    Ok(())
}

/// Apply one action, folding `AlreadyInstalled`/`NotInstalled` into
/// success per spec's per-action semantics.
fn perform_action(backend: &dyn FlatpakBackend, action: &FlatpakRefAction) -> Result<(), FlatpakOpError> {
    let remote = action.location_ref.remote.as_deref().unwrap_or_default();
    let ref_name = &action.location_ref.ref_name;
    let result = match action.kind {
        FlatpakActionKind::Install => match backend.install(remote, ref_name) {
            Err(FlatpakOpError::AlreadyInstalled) => backend.update(remote, ref_name),
            other => other,
        },
        FlatpakActionKind::Update => backend.update(remote, ref_name),
        FlatpakActionKind::Uninstall => match backend.uninstall(remote, ref_name) {
            Err(FlatpakOpError::NotInstalled) => Ok(()),
            other => other,
        },
    };
    if result.is_ok() {
        metrics::FLATPAK_ACTIONS_APPLIED
            .with_label_values(&[action.kind.to_string().as_str()])
            .inc();
    }
    result
}

fn check_action(backend: &dyn FlatpakBackend, action: &FlatpakRefAction) -> anyhow::Result<Option<String>> {
    let remote = action.location_ref.remote.as_deref().unwrap_or_default();
    let ref_name = &action.location_ref.ref_name;
    match action.kind {
        FlatpakActionKind::Install => {
            if !backend.is_installed(remote, ref_name)? {
                return Ok(Some(format!("{} should be installed but is not", ref_name)));
            }
        }
        FlatpakActionKind::Uninstall => {
            if backend.is_installed(remote, ref_name)? {
                return Ok(Some(format!("{} should be uninstalled but is still present", ref_name)));
            }
        }
        FlatpakActionKind::Update => {}
    }
    Ok(None)
}

/// Run the engine across every loaded action list.
///
/// `expected_remote`, when set, is checked against every acted-upon
/// action's remote (spec's `FlatpakRemoteConflict`, simplified here to a
/// single configured remote rather than a full collection-id→remote
/// map — see DESIGN.md).
pub fn run(
    action_lists: &[ActionList],
    counters: &mut ProgressCounters,
    mode: Mode,
    backend: &dyn FlatpakBackend,
    expected_remote: Option<&str>,
) -> Result<RunReport, crate::error::UpdaterError> {
    let mut report = RunReport::default();

    for list in action_lists {
        let applied_serial = counters.get(&list.source_file);

        match mode {
            Mode::Check => {
                for action in new_actions_for(list, applied_serial) {
                    match check_action(backend, &action) {
                        Ok(Some(mismatch)) => report.check_mismatches.push(mismatch),
                        Ok(None) => {}
                        Err(e) => {
                            return Err(crate::error::UpdaterError::from_anyhow(
                                UpdaterErrorKind::Fetching,
                                e,
                            ))
                        }
                    }
                }
            }
            Mode::Stamp => {
                let new_max = max_serial(list, applied_serial);
                report.applied.extend(new_actions_for(list, applied_serial));
                counters.set(list.source_file.clone(), new_max);
            }
            Mode::Perform => {
                for action in new_actions_for(list, applied_serial) {
                    if let Err(e) = check_remote(&action, expected_remote) {
                        counters.set(list.source_file.clone(), applied_serial.max(counters.get(&list.source_file)));
                        return Err(crate::error::UpdaterError::new(
                            UpdaterErrorKind::FlatpakRemoteConflict,
                            e.to_string(),
                        ));
                    }
                    if let Err(e) = perform_action(backend, &action) {
                        return Err(crate::error::UpdaterError::new(
                            UpdaterErrorKind::Fetching,
                            format!("applying {:?} on {}: {}", action.kind, action.location_ref.ref_name, e),
                        ));
                    }
                    counters.set(list.source_file.clone(), i64::from(action.serial));
                    report.applied.push(action);
                }
            }
        }
    }

    if !report.check_mismatches.is_empty() {
        return Err(crate::error::UpdaterError::new(
            UpdaterErrorKind::Fetching,
            FlatpakEngineError::CheckMismatches(report.check_mismatches.len()).to_string(),
        ));
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LocationRef;

    struct FakeBackend {
        installed: std::sync::Mutex<std::collections::BTreeSet<String>>,
    }

    impl FakeBackend {
        fn new() -> Self {
            FakeBackend { installed: std::sync::Mutex::new(Default::default()) }
        }
    }

    impl FlatpakBackend for FakeBackend {
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

    fn action(kind: FlatpakActionKind, ref_name: &str, serial: u32) -> FlatpakRefAction {
        FlatpakRefAction {
            kind,
            location_ref: LocationRef {
                ref_name: ref_name.to_string(),
                remote: Some("eos".to_string()),
                collection_id: None,
            },
            source_file: "app.txt".to_string(),
            serial,
        }
    }

    #[test]
    fn squash_keeps_highest_serial_per_ref() {
        let list = ActionList {
            source_file: "app.txt".to_string(),
            priority: 0,
            actions: vec![
                action(FlatpakActionKind::Install, "app/a", 1),
                action(FlatpakActionKind::Uninstall, "app/a", 2),
            ],
        };
        let squashed = new_actions_for(&list, 0);
        assert_eq!(squashed.len(), 1);
        assert_eq!(squashed[0].kind, FlatpakActionKind::Uninstall);
    }

    #[test]
    fn perform_advances_counters_and_installs() {
        let list = ActionList {
            source_file: "app.txt".to_string(),
            priority: 0,
            actions: vec![action(FlatpakActionKind::Install, "app/a", 1)],
        };
        let backend = FakeBackend::new();
        let mut counters = ProgressCounters::default();
        let report = run(&[list], &mut counters, Mode::Perform, &backend, None).unwrap();
        assert_eq!(report.applied.len(), 1);
        assert_eq!(counters.get("app.txt"), 1);
        assert!(backend.is_installed("eos", "app/a").unwrap());
    }

    #[test]
    fn stamp_mode_skips_execution() {
        let list = ActionList {
            source_file: "app.txt".to_string(),
            priority: 0,
            actions: vec![action(FlatpakActionKind::Install, "app/a", 3)],
        };
        let backend = FakeBackend::new();
        let mut counters = ProgressCounters::default();
        run(&[list], &mut counters, Mode::Stamp, &backend, None).unwrap();
        assert_eq!(counters.get("app.txt"), 3);
        assert!(!backend.is_installed("eos", "app/a").unwrap());
    }

    #[test]
    fn remote_conflict_is_reported() {
        let list = ActionList {
            source_file: "app.txt".to_string(),
            priority: 0,
            actions: vec![action(FlatpakActionKind::Install, "app/a", 1)],
        };
        let backend = FakeBackend::new();
        let mut counters = ProgressCounters::default();
        let err = run(&[list], &mut counters, Mode::Perform, &backend, Some("other")).unwrap_err();
        assert_eq!(err.kind, UpdaterErrorKind::FlatpakRemoteConflict);
    }
}
