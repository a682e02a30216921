//! Metadata fetcher (spec §4.4): given the source set and the current
//! (booted) ref, decide whether a newer commit exists anywhere, without
//! pulling its tree.

use ostree::gio;

use crate::checkpoint::{self, CheckpointDecision, CheckpointGates, SystemInfo};
use crate::error::{UpdaterError, UpdaterErrorKind};
use crate::repo::Repository;
use crate::sources::{Finder, FinderResult};
use crate::types::{CollectionRef, Refspec, RemoteResult, SourcesConfig, UpdateInfo};

/// Hard cap on end-of-life redirect hops, to break cycles (spec §4.4
/// step 4).
const MAX_REDIRECT_HOPS: usize = 8;

/// Everything the fetcher needs about the currently-deployed state.
pub struct BootedState {
    pub refspec: Refspec,
    pub checksum: String,
    pub collection_id: Option<String>,
}

/// Run one Poll cycle's worth of metadata resolution.
pub fn poll_for_update(
    repo: &Repository,
    sources: &SourcesConfig,
    booted: &BootedState,
    gates: &CheckpointGates,
    system_info: &dyn SystemInfo,
    finders: &[Box<dyn Finder>],
    cancellable: &gio::Cancellable,
) -> Result<Option<UpdateInfo>, UpdaterError> {
    let upgrade_refspec = determine_upgrade_refspec(repo, booted, gates, system_info, cancellable)
        .map_err(|e| UpdaterError::from_anyhow(UpdaterErrorKind::Fetching, e))?;

    if booted.collection_id.is_none() {
        return Err(UpdaterError::new(
            UpdaterErrorKind::WrongConfiguration,
            format!(
                "no collection id configured for remote '{}'; cannot discover peers",
                upgrade_refspec.remote
            ),
        ));
    }

    let mut current_ref = upgrade_refspec.ref_name.clone();
    let mut remote_results: Vec<RemoteResult> = Vec::new();
    let mut final_commit = None;

    for hop in 0..MAX_REDIRECT_HOPS {
        let collection_ref = CollectionRef::new(booted.collection_id.clone(), current_ref.clone());

        let (results, any_finder_succeeded) = find_remotes(finders, &collection_ref, cancellable);
        if !any_finder_succeeded {
            return Err(UpdaterError::new(
                UpdaterErrorKind::Fetching,
                format!("all finders failed while searching for {}", collection_ref),
            ));
        }
        if results.is_empty() {
            return Ok(None);
        }

        let mut sorted = results;
        sorted.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(b.summary_timestamp.cmp(&a.summary_timestamp))
        });

        let refspec = Refspec::new(upgrade_refspec.remote.clone(), current_ref.clone());
        let pulled = pull_best_candidate(repo, &sorted, &refspec, cancellable);
        let commit = match pulled {
            Some(commit) => commit,
            None => return Ok(None),
        };

        remote_results.extend(sorted.iter().map(|r| RemoteResult {
            finder_name: r.finder_name.to_string(),
            keyring_remote: r.keyring_remote.clone(),
            uri: r.uri.clone(),
            priority: r.priority,
            summary_timestamp: r.summary_timestamp,
        }));

        if let Some(next_ref) = &commit.endoflife_rebase {
            if next_ref != &current_ref {
                log::info!("commit {} redirects via end-of-life rebase to '{}'", commit.checksum, next_ref);
                current_ref = next_ref.clone();
                continue;
            }
        }

        final_commit = Some(commit);
        break;
    }

    let commit = final_commit.ok_or_else(|| {
        UpdaterError::new(
            UpdaterErrorKind::Fetching,
            format!(
                "exceeded {} end-of-life redirect hops without converging",
                MAX_REDIRECT_HOPS
            ),
        )
    })?;

    let final_refspec = Refspec::new(upgrade_refspec.remote.clone(), current_ref.clone());
    if !is_strictly_newer(repo, booted, &final_refspec, &commit)
        .map_err(|e| UpdaterError::from_anyhow(UpdaterErrorKind::Fetching, e))?
    {
        return Ok(None);
    }

    let version = commit.ostree_path.clone();
    Ok(Some(UpdateInfo {
        candidate_checksum: commit.checksum.clone(),
        candidate_commit: commit,
        upgrade_refspec: final_refspec,
        original_refspec: booted.refspec.clone(),
        version,
        remote_results,
    }))
}

fn determine_upgrade_refspec(
    repo: &Repository,
    booted: &BootedState,
    gates: &CheckpointGates,
    system_info: &dyn SystemInfo,
    cancellable: &gio::Cancellable,
) -> anyhow::Result<Refspec> {
    repo.pull_commit_only(&booted.refspec.remote, &booted.refspec, cancellable)?;

    let head = repo.resolve_refspec(&booted.refspec.to_canonical())?;
    let head = match head {
        Some(h) => h,
        None => return Ok(booted.refspec.clone()),
    };
    if head == booted.checksum {
        return Ok(booted.refspec.clone());
    }

    let head_commit = repo.load_commit(&head)?;
    if !head_commit.is_checkpoint() {
        return Ok(booted.refspec.clone());
    }

    match checkpoint::decide(repo, gates, system_info, &booted.refspec, &head_commit)? {
        CheckpointDecision::StayOnBooted => Ok(booted.refspec.clone()),
        CheckpointDecision::Follow(target_ref) => {
            Ok(Refspec::new(booted.refspec.remote.clone(), target_ref))
        }
    }
}

/// Call every finder, collecting all successes and logging (but not
/// propagating) individual failures. Returns `(results, any_succeeded)`;
/// `any_succeeded` is false only when every single finder errored.
fn find_remotes(
    finders: &[Box<dyn Finder>],
    collection_ref: &CollectionRef,
    cancellable: &gio::Cancellable,
) -> (Vec<FinderResult>, bool) {
    let mut results = Vec::new();
    let mut any_ok = finders.is_empty();
    for finder in finders {
        match finder.find_remotes(collection_ref, cancellable) {
            Ok(mut r) => {
                any_ok = true;
                results.append(&mut r);
            }
            Err(e) => {
                log::warn!("finder '{}' failed, trying the rest: {:#}", finder.name(), e);
            }
        }
    }
    (results, any_ok)
}

/// Try each sorted candidate's remote until one actually yields a commit
/// object, per spec §4.4: "takes the first result that actually yields a
/// commit".
fn pull_best_candidate(
    repo: &Repository,
    candidates: &[FinderResult],
    refspec: &Refspec,
    cancellable: &gio::Cancellable,
) -> Option<crate::types::Commit> {
    for candidate in candidates {
        let remote = if candidate.keyring_remote.is_empty() {
            refspec.remote.as_str()
        } else {
            candidate.keyring_remote.as_str()
        };
        if let Err(e) = repo.pull_commit_only(remote, refspec, cancellable) {
            log::warn!("pulling metadata from '{}' ({}) failed: {:#}", remote, candidate.uri, e);
            continue;
        }
        match repo
            .resolve_refspec(&refspec.to_canonical())
            .and_then(|csum| csum.ok_or_else(|| anyhow::anyhow!("ref vanished after pull")))
            .and_then(|csum| repo.load_commit(&csum))
        {
            Ok(commit) => return Some(commit),
            Err(e) => {
                log::warn!("loading commit pulled from '{}' failed: {:#}", remote, e);
                continue;
            }
        }
    }
    None
}

fn is_strictly_newer(
    repo: &Repository,
    booted: &BootedState,
    candidate_refspec: &Refspec,
    candidate: &crate::types::Commit,
) -> anyhow::Result<bool> {
    if candidate_refspec.ref_name != booted.refspec.ref_name {
        // We only get here via a checkpoint/redirect crossing, which is
        // itself sufficient justification (spec §4.4 step 5).
        return Ok(true);
    }
    if candidate.checksum == booted.checksum {
        return Ok(false);
    }

    const MAX_PARENT_WALK: usize = 4096;
    let mut cursor = candidate.checksum.clone();
    for _ in 0..MAX_PARENT_WALK {
        if cursor == booted.checksum {
            return Ok(true);
        }
        let commit = repo.load_commit(&cursor)?;
        match commit.parent_checksum {
            Some(parent) => cursor = parent,
            None => break,
        }
    }
    // Diverged history (e.g. a rebuild without a clean parent chain): a
    // candidate that isn't a direct ancestor match is still treated as
    // an update, matching the original project's "any different commit
    // we were told about is worth offering" behaviour.
    Ok(true)
}
