//! `Actor`/`Handler` implementations for [`UpdaterActor`].
//!
//! Each state-changing D-Bus call maps to one actix `Message`, handled
//! synchronously just long enough to validate the current state and
//! hand the real work to a `spawn_blocking` worker (ostree/glib calls
//! are blocking), whose result is folded back into `self.progress` via
//! `ctx.spawn`.

use std::sync::Arc;

use actix::{Actor, ActorFutureExt, AsyncContext, Context, Handler, WrapFuture};
use ostree::gio;
use tokio_util::sync::CancellationToken;

use super::{Apply as ApplyMsg, Cancel as CancelMsg, Fetch as FetchMsg, Poll as PollMsg, PollVolume as PollVolumeMsg};
use super::{SharedProgress, UpdaterActor, UpdaterSettings};
use crate::checkpoint::{CheckpointGates, HostSystemInfo};
use crate::config::Config;
use crate::error::{UpdaterError, UpdaterErrorKind};
use crate::fetcher::{self, BootedState};
use crate::repo::{self, Repository};
use crate::sources::{self, NoLanDiscovery};
use crate::types::{SourcesConfig, State, UpdateInfo};

impl Actor for UpdaterActor {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        self.set_state(State::Ready);
        log::info!("updater actor started");
    }
}

/// States from which a fresh `Poll`/`PollVolume` may be started (spec
/// §4.6: Ready, or retrying after landing in Error or UpdateAvailable).
fn poll_allowed_from(state: State) -> bool {
    matches!(state, State::Ready | State::UpdateAvailable | State::Error)
}

fn fetch_allowed_from(state: State) -> bool {
    matches!(state, State::UpdateAvailable | State::Error)
}

fn apply_allowed_from(state: State) -> bool {
    matches!(state, State::UpdateReady | State::Error)
}

/// Run one Poll cycle, opening a fresh sysroot/repo handle local to this
/// worker thread (spec §5: workers don't share GObjects cross-thread).
fn run_poll(
    settings: &UpdaterSettings,
    config: &Config,
    token: &CancellationToken,
) -> Result<Option<UpdateInfo>, UpdaterError> {
    let cancellable = gio::Cancellable::new();
    let _guard = cancel_watch(token.clone(), cancellable.clone());

    let sysroot = ostree::Sysroot::new_default();
    sysroot
        .load(gio::Cancellable::NONE)
        .map_err(|e| UpdaterError::new(UpdaterErrorKind::NotOstreeSystem, format!("{}", e)))?;
    let repository = Repository::for_sysroot(&sysroot)
        .map_err(|e| UpdaterError::from_anyhow(UpdaterErrorKind::NotOstreeSystem, e))?;

    let (refspec, checksum) = repo::booted_refspec_and_checksum(&sysroot)
        .map_err(|e| UpdaterError::from_anyhow(UpdaterErrorKind::NotOstreeSystem, e))?;
    let collection_id = repository
        .remote_collection_id(&refspec.remote)
        .map_err(|e| UpdaterError::from_anyhow(UpdaterErrorKind::WrongConfiguration, e))?;
    let booted = BootedState {
        refspec,
        checksum,
        collection_id,
    };

    let sources = SourcesConfig::from_config(config)
        .map_err(|e| UpdaterError::new(UpdaterErrorKind::WrongConfiguration, e.to_string()))?;
    let gates = CheckpointGates::from_config(config)
        .map_err(|e| UpdaterError::new(UpdaterErrorKind::WrongConfiguration, e.to_string()))?;
    let finders = sources::build_finders(
        &sources,
        &repository,
        &booted.refspec.remote,
        &settings.mount_roots,
        Box::new(NoLanDiscovery),
    );
    let system_info = HostSystemInfo;

    fetcher::poll_for_update(
        &repository,
        &sources,
        &booted,
        &gates,
        &system_info,
        &finders,
        &cancellable,
    )
}

/// Spawn a thread that cancels `cancellable` once `token` fires, for the
/// duration of the returned guard. Dropping the guard joins the watcher.
fn cancel_watch(token: CancellationToken, cancellable: gio::Cancellable) -> impl Drop {
    struct Guard(Option<std::thread::JoinHandle<()>>, CancellationToken);
    impl Drop for Guard {
        fn drop(&mut self) {
            self.1.cancel();
            if let Some(h) = self.0.take() {
                let _ = h.join();
            }
        }
    }
    let watcher_token = token.clone();
    let handle = std::thread::spawn(move || {
        futures::executor::block_on(watcher_token.cancelled());
        cancellable.cancel();
    });
    Guard(Some(handle), token)
}

fn apply_progress(progress: &SharedProgress, info: &UpdateInfo) {
    let mut p = progress.write().unwrap();
    p.update_id = info.candidate_checksum.clone();
    p.update_refspec = info.upgrade_refspec.to_canonical();
    p.original_refspec = info.original_refspec.to_canonical();
    p.version = info.version.clone();
}

impl Handler<PollMsg> for UpdaterActor {
    type Result = Result<(), UpdaterError>;

    fn handle(&mut self, _msg: PollMsg, ctx: &mut Context<Self>) -> Self::Result {
        let current = self.state();
        if !poll_allowed_from(current) {
            return Err(UpdaterError::wrong_state(&current.to_string()));
        }
        self.clear_error();
        self.set_state(State::Polling);
        crate::metrics::POLL_ATTEMPTS.inc();
        crate::metrics::UPDATE_AVAILABLE.set(0);

        let token = self.new_cycle_token();
        let settings = self.settings.clone();
        let config = Arc::clone(&self.config);
        let progress = Arc::clone(&self.progress);

        let fut = async move {
            tokio::task::spawn_blocking(move || run_poll(&settings, &config, &token))
                .await
                .unwrap_or_else(|e| {
                    Err(UpdaterError::new(
                        UpdaterErrorKind::Fetching,
                        format!("poll worker panicked: {}", e),
                    ))
                })
        };

        ctx.spawn(fut.into_actor(self).map(move |result, act, _ctx| {
            match result {
                Ok(Some(info)) => {
                    crate::metrics::UPDATE_AVAILABLE.set(1);
                    apply_progress(&progress, &info);
                    *act.update_info.write().unwrap() = Some(info);
                    act.set_state(State::UpdateAvailable);
                }
                Ok(None) => {
                    act.set_state(State::Ready);
                }
                Err(e) => {
                    crate::metrics::record_poll_error(e.kind);
                    let kind = e.kind;
                    act.set_error(kind, &e.message);
                }
            }
        }));
        Ok(())
    }
}

impl Handler<PollVolumeMsg> for UpdaterActor {
    type Result = Result<(), UpdaterError>;

    fn handle(&mut self, msg: PollVolumeMsg, ctx: &mut Context<Self>) -> Self::Result {
        let current = self.state();
        if !poll_allowed_from(current) {
            return Err(UpdaterError::wrong_state(&current.to_string()));
        }
        self.clear_error();
        self.set_state(State::Polling);

        let token = self.new_cycle_token();
        let mut settings = self.settings.clone();
        settings.mount_roots = vec![msg.path];
        let config = Arc::clone(&self.config);
        let progress = Arc::clone(&self.progress);

        let fut = async move {
            tokio::task::spawn_blocking(move || run_poll(&settings, &config, &token))
                .await
                .unwrap_or_else(|e| {
                    Err(UpdaterError::new(
                        UpdaterErrorKind::Fetching,
                        format!("poll worker panicked: {}", e),
                    ))
                })
        };

        ctx.spawn(fut.into_actor(self).map(move |result, act, _ctx| {
            match result {
                Ok(Some(info)) => {
                    apply_progress(&progress, &info);
                    *act.update_info.write().unwrap() = Some(info);
                    act.set_state(State::UpdateAvailable);
                }
                Ok(None) => act.set_state(State::Ready),
                Err(e) => act.set_error(e.kind, &e.message),
            }
        }));
        Ok(())
    }
}

impl Handler<FetchMsg> for UpdaterActor {
    type Result = Result<(), UpdaterError>;

    fn handle(&mut self, _msg: FetchMsg, ctx: &mut Context<Self>) -> Self::Result {
        let current = self.state();
        if !fetch_allowed_from(current) {
            return Err(UpdaterError::wrong_state(&current.to_string()));
        }
        let info = self
            .update_info
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| UpdaterError::wrong_state(&current.to_string()))?;

        self.clear_error();
        self.set_state(State::Fetching);
        self.progress.write().unwrap().downloaded_bytes = 0;
        crate::metrics::FETCH_ATTEMPTS.inc();

        let token = self.new_cycle_token();
        let settings = self.settings.clone();
        let progress = Arc::clone(&self.progress);

        let fut = async move {
            tokio::task::spawn_blocking(move || run_fetch(&settings, &info, &token))
                .await
                .unwrap_or_else(|e| {
                    Err(UpdaterError::new(
                        UpdaterErrorKind::Fetching,
                        format!("fetch worker panicked: {}", e),
                    ))
                })
        };

        ctx.spawn(fut.into_actor(self).map(move |result, act, _ctx| match result {
            Ok(()) => act.set_state(State::UpdateReady),
            Err(e) => {
                let _ = &progress;
                act.set_error(e.kind, &e.message);
            }
        }));
        Ok(())
    }
}

fn run_fetch(settings: &UpdaterSettings, info: &UpdateInfo, token: &CancellationToken) -> Result<(), UpdaterError> {
    let cancellable = gio::Cancellable::new();
    let _guard = cancel_watch(token.clone(), cancellable.clone());

    let repository = Repository::open(&settings.repo_path)
        .map_err(|e| UpdaterError::from_anyhow(UpdaterErrorKind::NotOstreeSystem, e))?;
    repository
        .pull_full(&info.upgrade_refspec.remote, &info.upgrade_refspec, &cancellable)
        .map_err(|e| UpdaterError::from_anyhow(UpdaterErrorKind::Fetching, e))
}

impl Handler<ApplyMsg> for UpdaterActor {
    type Result = Result<(), UpdaterError>;

    fn handle(&mut self, _msg: ApplyMsg, ctx: &mut Context<Self>) -> Self::Result {
        let current = self.state();
        if !apply_allowed_from(current) {
            return Err(UpdaterError::wrong_state(&current.to_string()));
        }
        let info = self
            .update_info
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| UpdaterError::wrong_state(&current.to_string()))?;

        self.clear_error();
        self.set_state(State::ApplyingUpdate);
        crate::metrics::APPLY_ATTEMPTS.inc();

        let token = self.new_cycle_token();
        let settings = self.settings.clone();

        let fut = async move {
            tokio::task::spawn_blocking(move || {
                crate::apply::apply_update(&settings.repo_path, &info, &token)
            })
            .await
            .unwrap_or_else(|e| {
                Err(UpdaterError::new(
                    UpdaterErrorKind::Fetching,
                    format!("apply worker panicked: {}", e),
                ))
            })
        };

        ctx.spawn(fut.into_actor(self).map(move |result, act, _ctx| match result {
            Ok(()) => {
                crate::metrics::APPLY_SUCCESSES.inc();
                act.set_state(State::UpdateApplied);
            }
            Err(e) => act.set_error(e.kind, &e.message),
        }));
        Ok(())
    }
}

impl Handler<CancelMsg> for UpdaterActor {
    type Result = Result<(), UpdaterError>;

    fn handle(&mut self, _msg: CancelMsg, _ctx: &mut Context<Self>) -> Self::Result {
        match self.state() {
            State::Polling | State::Fetching | State::ApplyingUpdate => {
                self.cancel_token.read().unwrap().cancel();
                Ok(())
            }
            other => Err(UpdaterError::wrong_state(&other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_allowed_states() {
        assert!(poll_allowed_from(State::Ready));
        assert!(poll_allowed_from(State::Error));
        assert!(!poll_allowed_from(State::Polling));
        assert!(!poll_allowed_from(State::Fetching));
    }

    #[test]
    fn fetch_requires_update_available() {
        assert!(fetch_allowed_from(State::UpdateAvailable));
        assert!(!fetch_allowed_from(State::Ready));
    }

    #[test]
    fn apply_requires_update_ready() {
        assert!(apply_allowed_from(State::UpdateReady));
        assert!(!apply_allowed_from(State::UpdateAvailable));
    }
}
