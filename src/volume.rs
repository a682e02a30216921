//! `[SUPPLEMENT]` Prepare a removable-media update volume, the write side
//! of the volume finder (`sources::volume_finder`), grounded on
//! `original_source/src/eos-prepare-usb-update.c`.
//!
//! Creates a fresh archive-mode repository at `<usb_path>/eos-update`,
//! mirrors the booted ref's commit into it from the local repo, and
//! copies the GPG trusted keys and extension summary files so the
//! volume is self-contained.

use std::path::Path;

use anyhow::{Context, Result};
use ostree::gio;
use ostree::glib;

use crate::sources::VOLUME_REPO_DIR;
use crate::types::Refspec;

/// Build the `{branches: [ref]}` vardict passed to `remote_add`, the way
/// the original builds a `GVariantBuilder` for the same option.
fn remote_add_options(ref_name: &str) -> glib::Variant {
    let dict = glib::VariantDict::new(None);
    dict.insert("branches", &vec![ref_name.to_string()]);
    dict.end()
}

fn create_usb_repo(source_repo: &ostree::Repo, refspec: &Refspec, usb_path: &Path) -> Result<ostree::Repo> {
    let usb_repo_path = usb_path.join(VOLUME_REPO_DIR);
    let usb_repo = ostree::Repo::new_for_path(&usb_repo_path);
    usb_repo
        .create(ostree::RepoMode::ArchiveZ2, gio::Cancellable::NONE)
        .with_context(|| format!("creating usb repo at {}", usb_repo_path.display()))?;

    let url = source_repo
        .remote_get_url(&refspec.remote)
        .with_context(|| format!("reading url for remote '{}'", refspec.remote))?;
    usb_repo
        .remote_add(
            &refspec.remote,
            Some(url.as_str()),
            Some(&remote_add_options(&refspec.ref_name)),
            gio::Cancellable::NONE,
        )
        .context("adding remote to usb repo")?;

    import_trusted_keys(source_repo, &usb_repo, &refspec.remote)?;
    Ok(usb_repo)
}

/// Best-effort: import `<remote>.trustedkeys.gpg` from the source repo's
/// directory if it exists, matching the original's "absent file is fine,
/// any other error is fatal" behaviour.
fn import_trusted_keys(source_repo: &ostree::Repo, usb_repo: &ostree::Repo, remote: &str) -> Result<()> {
    let keys_path = source_repo.path().child(format!("{}.trustedkeys.gpg", remote));
    let stream = match keys_path.read(gio::Cancellable::NONE) {
        Ok(stream) => stream,
        Err(e) if e.matches(gio::IOErrorEnum::NotFound) => return Ok(()),
        Err(e) => return Err(e).context("opening trusted keys file"),
    };
    usb_repo
        .remote_gpg_import(remote, &stream, None, gio::Cancellable::NONE)
        .context("importing trusted keys into usb repo")?;
    Ok(())
}

/// Mirror `<extensions/eos/eos-summary{,.sig}>` to `summary{,.sig}` at the
/// repo root if present, so stock OSTree tooling can use the volume
/// without knowing about the `eos-summary` extension.
fn mirror_summary(usb_repo: &ostree::Repo) -> Result<()> {
    let root = usb_repo.path();
    let extensions = root.child("extensions").child("eos");
    for (name, sig) in [("eos-summary", "summary"), ("eos-summary.sig", "summary.sig")] {
        let source = extensions.child(name);
        let dest = root.child(sig);
        match source.copy(&dest, gio::FileCopyFlags::NONE, gio::Cancellable::NONE, None) {
            Ok(()) => {}
            Err(e) if e.matches(gio::IOErrorEnum::NotFound) || e.matches(gio::IOErrorEnum::Exists) => {}
            Err(e) => return Err(e).with_context(|| format!("copying {} to repo root", name)),
        }
    }
    Ok(())
}

/// Prepare `usb_path` as an update volume carrying `commit_id` on
/// `refspec`, pulled (mirrored) from `repo`.
pub fn prepare_volume(
    repo: &ostree::Repo,
    refspec: &Refspec,
    commit_id: &str,
    usb_path: &Path,
    cancellable: &gio::Cancellable,
) -> Result<()> {
    ensure_coherency(repo, refspec, commit_id)?;

    let usb_repo = create_usb_repo(repo, refspec, usb_path)?;

    let source_uri = format!("file://{}", repo.path().path().unwrap_or_default().display());
    let refs = [refspec.ref_name.as_str()];
    let override_commit_ids = [commit_id];
    let flags = ostree::RepoPullFlags::MIRROR;
    usb_repo
        .pull_with_override(
            &refspec.remote,
            &source_uri,
            &refs,
            &override_commit_ids,
            flags,
            None,
            cancellable,
        )
        .context("mirroring commit onto usb volume")?;

    mirror_summary(&usb_repo)?;
    Ok(())
}

/// Reject a commit that is unreachable from `refspec`'s current head in
/// `repo` (spec's `ensure_coherency`): walk parents until a match or a
/// dead end.
fn ensure_coherency(repo: &ostree::Repo, refspec: &Refspec, commit_id: &str) -> Result<()> {
    if !repo
        .remote_list()
        .iter()
        .any(|r| r.as_str() == refspec.remote)
    {
        anyhow::bail!("repository has no remote '{}'", refspec.remote);
    }

    let mut cursor = repo
        .resolve_rev(&refspec.to_canonical(), false)
        .with_context(|| format!("resolving {}", refspec))?
        .map(|g| g.to_string())
        .ok_or_else(|| anyhow::anyhow!("refspec '{}' does not resolve", refspec))?;

    loop {
        if cursor == commit_id {
            return Ok(());
        }
        let (variant, _) = repo
            .load_commit(&cursor)
            .with_context(|| format!("loading commit {}", cursor))?;
        let parent: Option<glib::Variant> = variant.child_value(1).get();
        cursor = match parent {
            Some(v) => ostree::checksum_from_bytes(&v.fixed_array::<u8>().unwrap_or_default())?,
            None => anyhow::bail!("commit {} is not reachable from refspec {}", commit_id, refspec),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_add_options_carries_branch() {
        let v = remote_add_options("os/eos/amd64/master");
        let dict = glib::VariantDict::new(Some(&v));
        let branches: Vec<String> = dict.lookup("branches").unwrap().unwrap();
        assert_eq!(branches, vec!["os/eos/amd64/master".to_string()]);
    }
}
