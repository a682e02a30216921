//! State machine (spec §4.6): the daemon's single, process-wide actor.
//!
//! The actor owns exactly one in-flight cancellation token and one
//! `Progress` snapshot (spec §9 "keep it in a single top-level struct
//! owned by the main loop; mutate only on the main thread"). State
//! transitions are serialised: entering `Polling`/`Fetching`/
//! `ApplyingUpdate` atomically rejects any other state-changing call
//! with `WrongState` until the background worker posts its result.

pub mod actor;

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::checkpoint::CheckpointGates;
use crate::types::{State, UpdateInfo};

/// The observable surface exposed over D-Bus (spec §3/§6).
#[derive(Clone, Debug)]
pub struct Progress {
    pub state: State,
    pub error_name: String,
    pub error_message: String,
    pub download_size: u64,
    pub downloaded_bytes: u64,
    pub unpacked_size: u64,
    pub current_id: String,
    pub update_id: String,
    pub update_refspec: String,
    pub original_refspec: String,
    pub update_flags: u32,
    pub version: String,
}

impl Default for Progress {
    fn default() -> Self {
        Progress {
            state: State::None,
            error_name: String::new(),
            error_message: String::new(),
            download_size: 0,
            downloaded_bytes: 0,
            unpacked_size: 0,
            current_id: String::new(),
            update_id: String::new(),
            update_refspec: String::new(),
            original_refspec: String::new(),
            update_flags: 0,
            version: String::new(),
        }
    }
}

/// Static configuration the actor needs to open a fresh `Repository`
/// handle in each worker thread (spec §5: each worker owns its own
/// scoped context rather than sharing GObjects cross-thread).
#[derive(Clone)]
pub struct UpdaterSettings {
    pub repo_path: PathBuf,
    pub remote: String,
    pub checkpoint_gates: CheckpointGates,
    pub mount_roots: Vec<PathBuf>,
}

impl UpdaterSettings {
    /// Build the settings every long-running binary needs: the bare repo
    /// at its well-known path, plus whatever checkpoint gates the config
    /// layer defines (spec §4.1/§4.4).
    pub fn from_config(config: &Config, mount_roots: Vec<PathBuf>) -> Result<Self, crate::error::ConfigError> {
        Ok(UpdaterSettings {
            repo_path: PathBuf::from("/ostree/repo"),
            remote: "eos".to_string(),
            checkpoint_gates: CheckpointGates::from_config(config)?,
            mount_roots,
        })
    }
}

/// Shared, thread-safe progress handle; the D-Bus layer reads this
/// directly without going through the actor mailbox.
pub type SharedProgress = Arc<RwLock<Progress>>;

pub fn new_shared_progress() -> SharedProgress {
    Arc::new(RwLock::new(Progress::default()))
}

/// `Poll()` (spec §6).
pub struct Poll;

/// `PollVolume(path)` (spec §6).
pub struct PollVolume {
    pub path: PathBuf,
}

/// `Fetch()` / `FetchFull(options)` (spec §6); `force` bypasses
/// connectivity/metering checks.
pub struct Fetch {
    pub force: bool,
}

/// `Apply()` (spec §6).
pub struct Apply;

/// `Cancel()` (spec §6).
pub struct Cancel;

impl actix::Message for Poll {
    type Result = Result<(), crate::error::UpdaterError>;
}
impl actix::Message for PollVolume {
    type Result = Result<(), crate::error::UpdaterError>;
}
impl actix::Message for Fetch {
    type Result = Result<(), crate::error::UpdaterError>;
}
impl actix::Message for Apply {
    type Result = Result<(), crate::error::UpdaterError>;
}
impl actix::Message for Cancel {
    type Result = Result<(), crate::error::UpdaterError>;
}

/// The actor itself. See `actor.rs` for `Actor`/`Handler` impls.
pub struct UpdaterActor {
    pub progress: SharedProgress,
    pub settings: UpdaterSettings,
    pub config: Arc<Config>,
    pub cancel_token: RwLock<CancellationToken>,
    /// Captured at the end of a successful Poll; consumed by Fetch,
    /// discarded on Cancel/Error (spec §3 lifecycle note).
    pub update_info: RwLock<Option<UpdateInfo>>,
}

impl UpdaterActor {
    pub fn new(config: Arc<Config>, settings: UpdaterSettings) -> Self {
        UpdaterActor {
            progress: new_shared_progress(),
            settings,
            config,
            cancel_token: RwLock::new(CancellationToken::new()),
            update_info: RwLock::new(None),
        }
    }

    /// Current state, read synchronously (used for the `WrongState`
    /// precondition checks in each handler).
    pub fn state(&self) -> State {
        self.progress.read().unwrap().state
    }

    /// Swap in a fresh cancellation token for a new operation and
    /// return it, so the spawned worker can observe cancellation of
    /// *this* operation specifically (spec §5).
    pub fn new_cycle_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel_token.write().unwrap() = token.clone();
        token
    }

    pub fn set_state(&self, state: State) {
        self.progress.write().unwrap().state = state;
    }

    pub fn set_error(&self, kind: crate::error::UpdaterErrorKind, message: &str) {
        let mut p = self.progress.write().unwrap();
        p.state = State::Error;
        p.error_name = kind.dbus_name();
        p.error_message = message.to_string();
    }

    pub fn clear_error(&self) {
        let mut p = self.progress.write().unwrap();
        p.error_name.clear();
        p.error_message.clear();
    }
}
