//! Apply engine (spec §4.7): deploy a fetched commit as the new
//! deployment, rooted on the currently-booted one.
//!
//! Grounded on `ostree-ext`'s `container/deploy.rs` (origin key-file
//! construction, `deploy_tree_with_options`, `simple_write_deployment`
//! with `NO_CLEAN`) and `repo.rs`'s `SysrootLock`.

use std::path::Path;

use anyhow::Context as _;
use ostree::gio;
use ostree::glib;
use tokio_util::sync::CancellationToken;

use crate::error::{UpdaterError, UpdaterErrorKind};
use crate::repo::{Repository, SysrootLock};
use crate::types::UpdateInfo;

/// Build the origin key-file for a new deployment targeting `refspec`.
fn build_origin(refspec: &str) -> glib::KeyFile {
    let origin = glib::KeyFile::new();
    origin.set_string("origin", "refspec", refspec);
    origin
}

/// Deploy `info.candidate_checksum`, rooted on the booted deployment, and
/// make it the new default. Steps before `simple_write_deployment` are
/// all-or-nothing; a failure after it is logged, not surfaced, because
/// the new system is already installed (spec §4.7).
pub fn apply_update(repo_path: &Path, info: &UpdateInfo, token: &CancellationToken) -> Result<(), UpdaterError> {
    let cancellable = gio::Cancellable::new();

    let sysroot = ostree::Sysroot::new_default();
    sysroot
        .load(Some(&cancellable))
        .map_err(|e| UpdaterError::new(UpdaterErrorKind::NotOstreeSystem, format!("{}", e)))?;

    let lock = SysrootLock::new_from_sysroot(&sysroot, &cancellable)
        .map_err(|e| UpdaterError::from_anyhow(UpdaterErrorKind::NotOstreeSystem, e))?;

    if token.is_cancelled() {
        return Err(UpdaterError::cancelled());
    }

    let booted = lock
        .booted_deployment()
        .context("no booted deployment to root the new one on")
        .map_err(|e| UpdaterError::from_anyhow(UpdaterErrorKind::NotOstreeSystem, e))?;

    let origin = build_origin(&info.upgrade_refspec.to_canonical());
    let new_deployment = lock
        .deploy_tree(
            None,
            &info.candidate_checksum,
            Some(&origin),
            Some(&booted),
            None::<&[&str]>,
            gio::Cancellable::NONE,
        )
        .context("deploying new tree")
        .map_err(|e| UpdaterError::from_anyhow(UpdaterErrorKind::Fetching, e))?;

    if info.upgrade_refspec != info.original_refspec {
        let repository = Repository::for_sysroot(&sysroot)
            .map_err(|e| UpdaterError::from_anyhow(UpdaterErrorKind::Fetching, e))?;
        repository
            .clear_ref_transaction(&info.original_refspec.to_canonical())
            .context("clearing booted ref ahead of prune")
            .map_err(|e| UpdaterError::from_anyhow(UpdaterErrorKind::Fetching, e))?;
    }

    let new_deployments = vec![new_deployment];
    lock.simple_write_deployment(
        None,
        &new_deployments[0],
        Some(&booted),
        ostree::SysrootSimpleWriteDeploymentFlags::NO_CLEAN,
        gio::Cancellable::NONE,
    )
    .context("writing new deployment")
    .map_err(|e| UpdaterError::from_anyhow(UpdaterErrorKind::Fetching, e))?;

    // Best-effort from here: the new system is already installed.
    if let Err(e) = best_effort_cleanup(&lock) {
        log::warn!("best-effort sysroot cleanup after apply failed: {:#}", e);
    }
    if info.upgrade_refspec != info.original_refspec {
        if let Err(e) = Repository::for_sysroot(&sysroot)
            .and_then(|r| r.set_remote_branches(&info.upgrade_refspec.remote, &[&info.upgrade_refspec.ref_name]))
        {
            log::warn!(
                "best-effort rewrite of remote '{}' branches= after apply failed: {:#}",
                info.upgrade_refspec.remote,
                e
            );
        }
    }

    Ok(())
}

fn best_effort_cleanup(lock: &SysrootLock) -> anyhow::Result<()> {
    lock.cleanup(gio::Cancellable::NONE)
        .context("sysroot.cleanup()")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_keyfile_carries_refspec() {
        let kf = build_origin("eos:os/eos/amd64/master");
        assert_eq!(kf.string("origin", "refspec").unwrap(), "eos:os/eos/amd64/master");
    }
}
