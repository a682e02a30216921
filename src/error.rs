//! Client-facing error taxonomy.
//!
//! `UpdaterErrorKind` is exactly the set of kinds enumerated in the state
//! machine's failure taxonomy; its `Display` impl is what gets shoved,
//! verbatim, into the `ErrorName` D-Bus property as
//! `com.endlessm.Updater.Error.<Kind>`.

use thiserror::Error;

/// The stable set of error kinds a client can observe via `ErrorName`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UpdaterErrorKind {
    WrongState,
    LiveBoot,
    WrongConfiguration,
    NotOstreeSystem,
    Fetching,
    MalformedAutoinstallSpec,
    UnknownEntryInAutoinstallSpec,
    FlatpakRemoteConflict,
    MeteredConnection,
    Cancelled,
}

impl UpdaterErrorKind {
    /// The bare name used as the last path component of `ErrorName`.
    pub fn as_str(self) -> &'static str {
        match self {
            UpdaterErrorKind::WrongState => "WrongState",
            UpdaterErrorKind::LiveBoot => "LiveBoot",
            UpdaterErrorKind::WrongConfiguration => "WrongConfiguration",
            UpdaterErrorKind::NotOstreeSystem => "NotOstreeSystem",
            UpdaterErrorKind::Fetching => "Fetching",
            UpdaterErrorKind::MalformedAutoinstallSpec => "MalformedAutoinstallSpec",
            UpdaterErrorKind::UnknownEntryInAutoinstallSpec => "UnknownEntryInAutoinstallSpec",
            UpdaterErrorKind::FlatpakRemoteConflict => "FlatpakRemoteConflict",
            UpdaterErrorKind::MeteredConnection => "MeteredConnection",
            UpdaterErrorKind::Cancelled => "Cancelled",
        }
    }

    /// Fully-qualified D-Bus error name, e.g. `com.endlessm.Updater.Error.Cancelled`.
    pub fn dbus_name(self) -> String {
        format!("com.endlessm.Updater.Error.{}", self.as_str())
    }
}

impl std::fmt::Display for UpdaterErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A client-visible error: a stable `kind` plus a free-text `message`.
///
/// Internal causes (I/O, GLib, parse errors) are folded into `message` via
/// `anyhow`'s context chain before crossing this boundary; only `kind`
/// is part of the stable contract.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct UpdaterError {
    pub kind: UpdaterErrorKind,
    pub message: String,
}

impl UpdaterError {
    pub fn new(kind: UpdaterErrorKind, message: impl Into<String>) -> Self {
        UpdaterError {
            kind,
            message: message.into(),
        }
    }

    pub fn wrong_state(current: &str) -> Self {
        Self::new(
            UpdaterErrorKind::WrongState,
            format!("operation not valid in current state '{}'", current),
        )
    }

    pub fn cancelled() -> Self {
        Self::new(UpdaterErrorKind::Cancelled, "operation was cancelled")
    }

    /// Attach this error's kind/message onto any lower-level error, so
    /// callers can `.map_err(|e| UpdaterError::from_anyhow(kind, e))`.
    pub fn from_anyhow(kind: UpdaterErrorKind, err: anyhow::Error) -> Self {
        Self::new(kind, format!("{:#}", err))
    }
}

/// Errors specific to the config layer (§4.1): distinguish permission
/// failures (ignorable per file, fatal if the default document itself
/// is unreadable) from parse failures (always fatal for that file).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("permission denied reading config file {path}: {source}")]
    Permission {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("required key '{key}' in group '{group}' is not defined, even by the built-in default")]
    MissingRequiredKey { group: String, key: String },
}

/// Errors from the flatpak action engine (§4.8).
#[derive(Debug, Error)]
pub enum FlatpakEngineError {
    #[error("malformed autoinstall spec in {file}:{line}: {reason}")]
    MalformedSpec {
        file: String,
        line: usize,
        reason: String,
    },
    #[error("remote conflict for ref {ref_name}: action names remote '{action_remote}' but collection id maps to '{resolved_remote}'")]
    RemoteConflict {
        ref_name: String,
        action_remote: String,
        resolved_remote: String,
    },
    #[error("check failed: {0} mismatch(es) found")]
    CheckMismatches(usize),
}
