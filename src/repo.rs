//! Repository handle (spec §4.2): a thin, blocking wrapper around the real
//! `ostree` crate, the way `ostree-ext`'s `sysroot.rs` wraps `ostree::Sysroot`.
//!
//! Every long-running call takes a `&gio::Cancellable` so callers can plumb
//! through the state machine's per-cycle cancellation token (spec §5).

use std::ops::Deref;
use std::path::Path;

use anyhow::{Context, Result};
use ostree::gio;
use ostree::glib;

use crate::keyfileext::KeyFileExt;
use crate::types::{Commit, Refspec};

/// A locked system root. Identical in spirit to
/// `ostree-ext`'s `SysrootLock`: acquired for the duration of an `Apply`,
/// released on drop.
#[derive(Debug)]
pub struct SysrootLock {
    pub sysroot: ostree::Sysroot,
    unowned: bool,
}

impl Drop for SysrootLock {
    fn drop(&mut self) {
        if self.unowned {
            return;
        }
        self.sysroot.unlock();
    }
}

impl Deref for SysrootLock {
    type Target = ostree::Sysroot;

    fn deref(&self) -> &Self::Target {
        &self.sysroot
    }
}

impl SysrootLock {
    /// Block the current (worker) thread until the sysroot lock is
    /// acquired, printing a log line if we had to wait. Honours
    /// cancellation between polling attempts.
    pub fn new_from_sysroot(
        sysroot: &ostree::Sysroot,
        cancellable: &gio::Cancellable,
    ) -> Result<Self> {
        let mut printed = false;
        loop {
            cancellable
                .set_error_if_cancelled()
                .context("cancelled while waiting for sysroot lock")?;
            if sysroot.try_lock()? {
                return Ok(Self {
                    sysroot: sysroot.clone(),
                    unowned: false,
                });
            }
            if !printed {
                log::info!("sysroot is locked by another process, waiting...");
                printed = true;
            }
            std::thread::sleep(std::time::Duration::from_millis(500));
        }
    }
}

/// Read the booted deployment's origin refspec and checksum (spec §4.4:
/// "the currently booted ref"). Grounded on `ostree-ext`'s `sysroot.rs`
/// pattern of reading `Deployment::origin()` as a keyfile.
pub fn booted_refspec_and_checksum(sysroot: &ostree::Sysroot) -> Result<(Refspec, String)> {
    let deployment = sysroot
        .booted_deployment()
        .context("no booted deployment; this is not a running OSTree system")?;
    let origin = deployment
        .origin()
        .context("booted deployment has no origin file")?;
    let refspec: Refspec = origin
        .optional_string("origin", "refspec")?
        .ok_or_else(|| anyhow::anyhow!("booted deployment origin has no 'origin/refspec' key"))?
        .to_string()
        .parse()?;
    Ok((refspec, deployment.csum().to_string()))
}

/// Wraps a single OSTree repository, exposing exactly the operations the
/// update pipeline needs.
pub struct Repository {
    pub repo: ostree::Repo,
}

impl Repository {
    /// Open (and lock-check) the repository at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let repo = ostree::Repo::new_for_path(path);
        repo.open(gio::Cancellable::NONE)
            .with_context(|| format!("opening ostree repo at {}", path.display()))?;
        Ok(Repository { repo })
    }

    /// Open the repository belonging to a sysroot (`/ostree/repo`).
    pub fn for_sysroot(sysroot: &ostree::Sysroot) -> Result<Self> {
        let repo = sysroot.repo();
        Ok(Repository { repo })
    }

    /// Resolve a refspec to a checksum, returning `None` rather than
    /// erroring if the ref does not exist.
    pub fn resolve_refspec(&self, refspec: &str) -> Result<Option<String>> {
        let resolved = self
            .repo
            .resolve_rev(refspec, true)
            .with_context(|| format!("resolving refspec '{}'", refspec))?;
        Ok(resolved.map(|g| g.to_string()))
    }

    /// Load a commit object and parse the metadata this daemon cares about.
    pub fn load_commit(&self, checksum: &str) -> Result<Commit> {
        let (variant, _state) = self
            .repo
            .load_commit(checksum)
            .with_context(|| format!("loading commit {}", checksum))?;
        Self::parse_commit(checksum, &variant)
    }

    /// Parse an OSTree commit `GVariant` (format `(a{sv}aya(say)sstayay)`)
    /// into our `Commit` type.
    fn parse_commit(checksum: &str, variant: &glib::Variant) -> Result<Commit> {
        let parent_csum: Option<glib::Variant> = variant.child_value(1).get();
        let parent_checksum = parent_csum
            .map(|v| ostree::checksum_from_bytes(&v.fixed_array::<u8>().unwrap_or_default()))
            .transpose()?;
        let timestamp = ostree::commit_get_timestamp(variant) as i64;

        let metadata = variant.child_value(0);
        let ostree_path = metadata
            .lookup::<String>("ostree.ref-binding")
            .ok()
            .flatten()
            .unwrap_or_default();
        let checkpoint_target = metadata.lookup::<String>("eos.checkpoint-target").ok().flatten();
        let endoflife_rebase = metadata.lookup::<String>("eos.endoflife-rebase").ok().flatten();

        Ok(Commit {
            checksum: checksum.to_string(),
            parent_checksum,
            timestamp,
            ostree_path,
            checkpoint_target,
            endoflife_rebase,
        })
    }

    /// Enumerate all local refs (`refs/heads` and `refs/remotes`).
    pub fn list_refs(&self) -> Result<Vec<(String, String)>> {
        let refs = self.repo.list_refs(None, gio::Cancellable::NONE)?;
        Ok(refs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect())
    }

    /// Read the `url` option for a remote.
    pub fn remote_url(&self, remote: &str) -> Result<Option<String>> {
        Ok(self
            .repo
            .remote_get_url(remote)
            .ok()
            .map(|g| g.to_string()))
    }

    /// Rewrite the `branches=` option of a remote's config to a single ref,
    /// via the repo's keyfile-backed config (spec §4.7 step 6).
    pub fn set_remote_branches(&self, remote: &str, branches: &[&str]) -> Result<()> {
        let config = self.repo.copy_config();
        let group = format!("remote \"{}\"", remote);
        let joined = branches.join(";") + ";";
        config.set_string(&group, "branches", &joined);
        self.repo
            .write_config(&config)
            .context("writing repo config after updating remote branches")?;
        Ok(())
    }

    /// Read the (optional) collection id configured for a remote.
    pub fn remote_collection_id(&self, remote: &str) -> Result<Option<String>> {
        let config = self.repo.copy_config();
        let group = format!("remote \"{}\"", remote);
        Ok(config.optional_string(&group, "collection-id")?.map(|s| s.to_string()))
    }

    /// Pull only the commit metadata object for `refspec` from `remote`,
    /// not the filesystem tree.
    pub fn pull_commit_only(
        &self,
        remote: &str,
        refspec: &Refspec,
        cancellable: &gio::Cancellable,
    ) -> Result<()> {
        let refs = [refspec.ref_name.as_str()];
        let flags = ostree::RepoPullFlags::COMMIT_ONLY;
        self.repo
            .pull(remote, &refs, flags, cancellable)
            .with_context(|| format!("pulling commit metadata for {}", refspec))?;
        Ok(())
    }

    /// Pull the full commit (tree included) for `refspec` from `remote`.
    pub fn pull_full(
        &self,
        remote: &str,
        refspec: &Refspec,
        cancellable: &gio::Cancellable,
    ) -> Result<()> {
        let refs = [refspec.ref_name.as_str()];
        self.repo
            .pull(remote, &refs, ostree::RepoPullFlags::NONE, cancellable)
            .with_context(|| format!("pulling {}", refspec))?;
        Ok(())
    }

    /// Clear a ref inside a single write transaction, so a subsequent
    /// prune can collect the objects it pointed to (spec §4.7 step 4).
    pub fn clear_ref_transaction(&self, refspec: &str) -> Result<()> {
        self.repo.prepare_transaction(gio::Cancellable::NONE)?;
        self.repo
            .transaction_set_ref(None, refspec, None);
        self.repo
            .commit_transaction(gio::Cancellable::NONE)
            .context("committing ref-clear transaction")?;
        Ok(())
    }

    /// Prune unreachable objects, returning the count removed.
    pub fn prune(&self, depth: i32) -> Result<(i32, i32, u64)> {
        let (_refs, objects_total, objects_pruned, objsize_total) = self
            .repo
            .prune(ostree::RepoPruneFlags::REFS_ONLY, depth, gio::Cancellable::NONE)?;
        Ok((objects_total, objects_pruned, objsize_total))
    }

    /// Regenerate the `summary`/`summary.sig` files on disk.
    pub fn regenerate_summary(&self) -> Result<()> {
        self.repo
            .regenerate_summary(None, gio::Cancellable::NONE)
            .context("regenerating summary")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refspec_parsing_roundtrip() {
        let r = Refspec::new("eos", "os/eos/amd64/master");
        assert_eq!(r.to_canonical(), "eos:os/eos/amd64/master");
    }
}
