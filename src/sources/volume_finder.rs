//! The `VOLUME` finder: scans mounted removable media for a pre-populated
//! local repository (the read side of `volume::prepare_usb_update`).

use std::path::PathBuf;

use anyhow::Result;
use ostree::gio;

use super::{Finder, FinderResult};
use crate::types::CollectionRef;

/// Name of the repo directory a prepared update volume carries at its
/// root, mirroring `eos-prepare-usb-update`'s on-disk layout
/// (`g_file_get_child (usb_path, "eos-update")`).
pub const VOLUME_REPO_DIR: &str = "eos-update";

pub struct VolumeFinder {
    mount_roots: Vec<PathBuf>,
}

impl VolumeFinder {
    pub fn new(mount_roots: Vec<PathBuf>) -> Self {
        VolumeFinder { mount_roots }
    }
}

impl Finder for VolumeFinder {
    fn name(&self) -> &'static str {
        "volume"
    }

    fn find_remotes(
        &self,
        collection_ref: &CollectionRef,
        _cancellable: &gio::Cancellable,
    ) -> Result<Vec<FinderResult>> {
        let mut results = Vec::new();
        for root in &self.mount_roots {
            let repo_path = root.join(VOLUME_REPO_DIR);
            if !repo_path.is_dir() {
                continue;
            }
            log::trace!(
                "volume finder: found candidate repo at {} for {}",
                repo_path.display(),
                collection_ref
            );
            results.push(FinderResult {
                finder_name: self.name(),
                keyring_remote: String::new(),
                uri: format!("file://{}", repo_path.display()),
                // Volumes are lower priority than network sources: a
                // stale USB stick should not shadow a fresher LAN peer.
                priority: -10,
                summary_timestamp: None,
            });
        }
        Ok(results)
    }
}
