//! `eos-updater` — an OSTree update daemon for an Endless-OS-like distribution.
//!
//! This crate is the shared library behind four binaries: the long-running
//! D-Bus update daemon (`eos-updater`), the periodic oneshot driver
//! (`eos-autoupdater`), the repo re-serving HTTP endpoint
//! (`eos-repo-server`), and the post-boot flatpak action runner
//! (`eos-updater-flatpak-installer`).

#[macro_use]
extern crate prometheus;

pub mod apply;
pub mod checkpoint;
pub mod config;
pub mod dbus;
pub mod error;
pub mod fetcher;
pub mod flatpak;
pub mod keyfileext;
pub mod metrics;
pub mod repo;
pub mod server;
pub mod sources;
pub mod state_machine;
pub mod types;
pub mod util;
pub mod volume;

pub mod autodriver;

pub use error::{UpdaterError, UpdaterErrorKind};
