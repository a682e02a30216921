//! Periodic oneshot driver (spec §4.10): drive the state machine through
//! `Poll` → `Fetch` → `Apply` up to a configured last step, then reschedule
//! itself via the stamp file. Runs the same [`UpdaterActor`] the D-Bus
//! daemon uses, but in-process and without a bus connection — it waits on
//! `SharedProgress` directly instead of D-Bus property-changed signals.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use actix::Actor;

use crate::config::Config;
use crate::state_machine::{Apply, Fetch, Poll, PollVolume, SharedProgress, UpdaterActor, UpdaterSettings};
use crate::types::{PollResults, State};
use crate::util;

/// `[Automatic Updates] LastAutomaticStep` (spec §6).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LastAutomaticStep {
    None,
    Poll,
    Fetch,
    Apply,
}

impl LastAutomaticStep {
    pub fn from_config_value(v: i64) -> Self {
        match v {
            1 => LastAutomaticStep::Poll,
            2 => LastAutomaticStep::Fetch,
            3 => LastAutomaticStep::Apply,
            _ => LastAutomaticStep::None,
        }
    }
}

pub struct DriverOptions {
    pub force_update: bool,
    pub force_fetch: bool,
    pub from_volume: Option<PathBuf>,
    pub stamp_path: PathBuf,
    pub poll_results_path: PathBuf,
}

#[derive(Debug, Eq, PartialEq)]
pub enum DriverOutcome {
    /// Nothing to do, or the drive completed successfully.
    Success,
    /// The state machine landed in `Error`.
    Failure(String),
}

/// Very small connectivity probe: can we open a TCP connection to the
/// configured remote's host on port 443? Used only for step 1's
/// online/offline gate; a `from_volume` run skips it entirely.
fn is_online(remote_host: &str) -> bool {
    use std::net::ToSocketAddrs;
    let addr = format!("{}:443", remote_host);
    match addr.to_socket_addrs() {
        Ok(mut addrs) => addrs
            .next()
            .map(|a| std::net::TcpStream::connect_timeout(&a, Duration::from_secs(3)).is_ok())
            .unwrap_or(false),
        Err(_) => false,
    }
}

async fn wait_until_terminal(progress: &SharedProgress, terminal: &[State]) -> State {
    loop {
        let current = progress.read().unwrap().state;
        if terminal.contains(&current) {
            return current;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

pub async fn run(
    config: Arc<Config>,
    settings: UpdaterSettings,
    remote_host: &str,
    options: DriverOptions,
) -> DriverOutcome {
    let forced = options.force_update || options.force_fetch || options.from_volume.is_some();

    if options.from_volume.is_none() && !is_online(remote_host) {
        log::info!("not online and no volume given, nothing to do");
        return DriverOutcome::Success;
    }

    let interval_days = config
        .int64("Automatic Updates", "IntervalDays")
        .ok()
        .flatten()
        .unwrap_or(1)
        .max(0) as u32;
    let randomized_delay_days = config
        .int64("Automatic Updates", "RandomizedDelayDays")
        .ok()
        .flatten()
        .unwrap_or(0)
        .max(0) as u32;
    let last_step = LastAutomaticStep::from_config_value(
        config
            .int64("Automatic Updates", "LastAutomaticStep")
            .ok()
            .flatten()
            .unwrap_or(0),
    );

    if !forced && !util::stamp_file_due(&options.stamp_path, interval_days) {
        log::info!("stamp file not yet due, nothing to do");
        return DriverOutcome::Success;
    }

    if last_step == LastAutomaticStep::None {
        return DriverOutcome::Success;
    }

    let actor = UpdaterActor::new(config.clone(), settings);
    let progress = actor.progress.clone();
    let addr = actor.start();

    let poll_result = if let Some(path) = options.from_volume.clone() {
        addr.send(PollVolume { path }).await
    } else {
        addr.send(Poll).await
    };
    if let Err(e) = poll_result.unwrap_or_else(|e| Err(crate::error::UpdaterError::new(
        crate::error::UpdaterErrorKind::Fetching,
        format!("mailbox error: {}", e),
    ))) {
        return DriverOutcome::Failure(e.message);
    }

    let after_poll = wait_until_terminal(&progress, &[State::UpdateAvailable, State::Ready, State::Error]).await;
    match after_poll {
        State::Error => {
            let message = progress.read().unwrap().error_message.clone();
            return DriverOutcome::Failure(message);
        }
        State::Ready => {
            finish_successful_cycle(&progress, &options, randomized_delay_days);
            return DriverOutcome::Success;
        }
        _ => {}
    }

    if last_step == LastAutomaticStep::Poll {
        finish_successful_cycle(&progress, &options, randomized_delay_days);
        return DriverOutcome::Success;
    }

    if let Err(mailbox_err) = addr.send(Fetch { force: options.force_fetch }).await {
        return DriverOutcome::Failure(format!("mailbox error: {}", mailbox_err));
    }
    let after_fetch = wait_until_terminal(&progress, &[State::UpdateReady, State::Error]).await;
    if after_fetch == State::Error {
        let message = progress.read().unwrap().error_message.clone();
        return DriverOutcome::Failure(message);
    }

    if last_step == LastAutomaticStep::Fetch {
        finish_successful_cycle(&progress, &options, randomized_delay_days);
        return DriverOutcome::Success;
    }

    if let Err(mailbox_err) = addr.send(Apply).await {
        return DriverOutcome::Failure(format!("mailbox error: {}", mailbox_err));
    }
    let after_apply = wait_until_terminal(&progress, &[State::UpdateApplied, State::Error]).await;
    if after_apply == State::Error {
        let message = progress.read().unwrap().error_message.clone();
        return DriverOutcome::Failure(message);
    }

    finish_successful_cycle(&progress, &options, randomized_delay_days);
    DriverOutcome::Success
}

/// Rewrite the stamp file, and only touch the poll-results file if the
/// update identity actually changed (spec §4.10 step 4).
fn finish_successful_cycle(progress: &SharedProgress, options: &DriverOptions, randomized_delay_days: u32) {
    if let Err(e) = util::rewrite_stamp_file(&options.stamp_path, randomized_delay_days) {
        log::warn!("failed to rewrite stamp file: {:#}", e);
    }

    let snapshot = progress.read().unwrap();
    let new_results = PollResults {
        last_changed_usecs: 0,
        update_refspec: snapshot.update_refspec.clone(),
        update_id: snapshot.update_id.clone(),
    };
    drop(snapshot);

    match util::save_poll_results_if_changed(&options.poll_results_path, &new_results) {
        Ok(true) => log::debug!("poll results changed, file rewritten"),
        Ok(false) => {}
        Err(e) => log::warn!("failed to persist poll results: {:#}", e),
    }
}
