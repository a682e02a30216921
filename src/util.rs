//! Small on-disk/host utilities shared by the auto-driver and daemon
//! (spec §6 "On-disk state"): the stamp file, the poll-results blob, and
//! systemd readiness notification.

use std::path::Path;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use rand::Rng;

use crate::types::PollResults;

/// Name of the zero-byte stamp file under the state directory; only its
/// mtime carries meaning (spec §6).
pub const STAMP_FILE_NAME: &str = "eos-updater-stamp";

/// Name of the poll-results blob under the state directory.
pub const POLL_RESULTS_FILE_NAME: &str = "eos-updater-poll-results.json";

/// Has at least `interval_days` elapsed since the stamp file's mtime? A
/// missing file, or a query failure, is treated as "time to update"
/// (spec §7).
pub fn stamp_file_due(path: &Path, interval_days: u32) -> bool {
    match std::fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => {
            let due_at = modified + Duration::from_secs(u64::from(interval_days) * 86400);
            SystemTime::now() >= due_at
        }
        Err(_) => true,
    }
}

/// Rewrite the stamp file's mtime to `now + random(0..randomized_delay_days)`
/// (spec §4.10 step 4), creating it if absent.
pub fn rewrite_stamp_file(path: &Path, randomized_delay_days: u32) -> Result<()> {
    if !path.exists() {
        std::fs::File::create(path).with_context(|| format!("creating stamp file {}", path.display()))?;
    }
    let jitter_days = if randomized_delay_days == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=randomized_delay_days)
    };
    let new_mtime = SystemTime::now() + Duration::from_secs(u64::from(jitter_days) * 86400);
    filetime::set_file_mtime(path, filetime::FileTime::from_system_time(new_mtime))
        .with_context(|| format!("setting mtime on stamp file {}", path.display()))
}

/// Load the poll-results blob. A missing file is "first run", not an
/// error (spec §7).
pub fn load_poll_results(path: &Path) -> Result<PollResults> {
    match std::fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).with_context(|| format!("parsing poll results {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PollResults::default()),
        Err(e) => Err(e).with_context(|| format!("reading poll results {}", path.display())),
    }
}

/// Persist the poll-results blob, but only when `new` actually differs
/// from what is on disk (spec §4.10 step 4: "refresh ... only if
/// refspec/id changed").
pub fn save_poll_results_if_changed(path: &Path, new: &PollResults) -> Result<bool> {
    let current = load_poll_results(path).unwrap_or_default();
    if &current == new {
        return Ok(false);
    }
    let bytes = serde_json::to_vec(new).context("serializing poll results")?;
    std::fs::write(path, bytes).with_context(|| format!("writing poll results {}", path.display()))?;
    Ok(true)
}

/// Notify the service manager that startup is complete, if running under
/// systemd (a no-op outside of it).
pub fn notify_ready() {
    if let Err(e) = libsystemd::daemon::notify(false, &[libsystemd::daemon::NotifyState::Ready]) {
        log::debug!("sd_notify(READY=1) failed (probably not running under systemd): {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_stamp_file_is_due() {
        assert!(stamp_file_due(Path::new("/does/not/exist-stamp"), 1));
    }

    #[test]
    fn fresh_stamp_file_is_not_due() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STAMP_FILE_NAME);
        std::fs::File::create(&path).unwrap();
        assert!(!stamp_file_due(&path, 30));
    }

    #[test]
    fn poll_results_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(POLL_RESULTS_FILE_NAME);
        let results = PollResults {
            last_changed_usecs: 42,
            update_refspec: "eos:os/eos/amd64/master".to_string(),
            update_id: "deadbeef".to_string(),
        };
        assert!(save_poll_results_if_changed(&path, &results).unwrap());
        assert!(!save_poll_results_if_changed(&path, &results).unwrap());
        assert_eq!(load_poll_results(&path).unwrap(), results);
    }
}
