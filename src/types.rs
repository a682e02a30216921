//! Core data model (spec §3): commits, refspecs, update info, config shapes,
//! the observable state enum, and the flatpak action-list shapes.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A parsed OSTree commit, identified by its checksum. Metadata is
/// immutable once the commit exists; we never mutate a `Commit` in place.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Commit {
    pub checksum: String,
    pub parent_checksum: Option<String>,
    pub timestamp: i64,
    pub ostree_path: String,
    pub checkpoint_target: Option<String>,
    pub endoflife_rebase: Option<String>,
}

impl Commit {
    pub fn is_checkpoint(&self) -> bool {
        self.checkpoint_target.is_some()
    }

    pub fn is_endoflife_rebase(&self) -> bool {
        self.endoflife_rebase.is_some()
    }
}

/// `(collection_id?, ref_name)`. Peer discovery (the LAN finder) requires
/// a collection id; its absence only disables that one finder.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct CollectionRef {
    pub collection_id: Option<String>,
    pub ref_name: String,
}

impl CollectionRef {
    pub fn new(collection_id: Option<String>, ref_name: impl Into<String>) -> Self {
        CollectionRef {
            collection_id,
            ref_name: ref_name.into(),
        }
    }

    pub fn has_collection_id(&self) -> bool {
        self.collection_id.is_some()
    }
}

impl fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.collection_id {
            Some(id) => write!(f, "({}, {})", id, self.ref_name),
            None => write!(f, "(none, {})", self.ref_name),
        }
    }
}

/// A `(remote, ref_name)` pair plus its canonical `remote:ref_name` form.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Refspec {
    pub remote: String,
    pub ref_name: String,
}

impl Refspec {
    pub fn new(remote: impl Into<String>, ref_name: impl Into<String>) -> Self {
        Refspec {
            remote: remote.into(),
            ref_name: ref_name.into(),
        }
    }

    pub fn to_canonical(&self) -> String {
        format!("{}:{}", self.remote, self.ref_name)
    }
}

impl fmt::Display for Refspec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical())
    }
}

impl FromStr for Refspec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (remote, ref_name) = s
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("refspec '{}' is missing a ':' separator", s))?;
        anyhow::ensure!(!remote.is_empty(), "refspec '{}' has an empty remote", s);
        anyhow::ensure!(!ref_name.is_empty(), "refspec '{}' has an empty ref", s);
        Ok(Refspec::new(remote, ref_name))
    }
}

/// One entry in `UpdateInfo::remote_results`: a single finder's answer.
#[derive(Clone, Debug)]
pub struct RemoteResult {
    pub finder_name: String,
    pub keyring_remote: String,
    pub uri: String,
    pub priority: i32,
    pub summary_timestamp: Option<i64>,
}

/// The result of a successful poll (spec §3 `UpdateInfo`).
#[derive(Clone, Debug)]
pub struct UpdateInfo {
    pub candidate_checksum: String,
    pub candidate_commit: Commit,
    pub upgrade_refspec: Refspec,
    pub original_refspec: Refspec,
    pub version: String,
    pub remote_results: Vec<RemoteResult>,
}

/// A configured download source kind (spec §3 `SourcesConfig`).
///
/// Stable on-wire string form mirrors
/// `original_source/libeos-updater-util/types.c`'s download-source enum.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadSource {
    Main,
    Lan,
    Volume,
}

impl DownloadSource {
    pub fn as_str(self) -> &'static str {
        match self {
            DownloadSource::Main => "main",
            DownloadSource::Lan => "lan",
            DownloadSource::Volume => "volume",
        }
    }
}

impl FromStr for DownloadSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "main" => Ok(DownloadSource::Main),
            "lan" => Ok(DownloadSource::Lan),
            "volume" => Ok(DownloadSource::Volume),
            other => anyhow::bail!("unknown download source '{}'", other),
        }
    }
}

impl fmt::Display for DownloadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The ordered, deduplicated set of configured sources, plus any override
/// URIs that (if present) replace every other source entirely.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SourcesConfig {
    pub order: Vec<DownloadSource>,
    pub override_uris: Vec<String>,
}

impl SourcesConfig {
    /// Build from an ordered list, deduplicating while preserving the
    /// first occurrence's position.
    pub fn new(order: Vec<DownloadSource>, override_uris: Vec<String>) -> Self {
        let mut seen = std::collections::HashSet::new();
        let deduped = order
            .into_iter()
            .filter(|source| seen.insert(*source))
            .collect();
        SourcesConfig {
            order: deduped,
            override_uris,
        }
    }

    pub fn has_override(&self) -> bool {
        !self.override_uris.is_empty()
    }

    /// Load from the `[Download]` group (spec §4.1/§4.3): `Order` is a
    /// `;`-separated list of source names, `OverrideUris` a `;`-separated
    /// list of URIs. Unrecognised source names are logged and skipped
    /// rather than failing the whole load.
    pub fn from_config(config: &crate::config::Config) -> Result<Self, crate::error::ConfigError> {
        let order = config
            .string_list("Download", "Order")?
            .into_iter()
            .filter_map(|entry| match entry.parse::<DownloadSource>() {
                Ok(source) => Some(source),
                Err(_) => {
                    log::warn!("ignoring unknown download source '{}' in Download.Order", entry);
                    None
                }
            })
            .collect();
        let override_uris = config.string_list("Download", "OverrideUris")?;
        Ok(SourcesConfig::new(order, override_uris))
    }
}

/// The observable daemon state (spec §3/§4.6).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u32)]
pub enum State {
    None = 0,
    Ready = 1,
    Polling = 2,
    UpdateAvailable = 3,
    Fetching = 4,
    UpdateReady = 5,
    ApplyingUpdate = 6,
    UpdateApplied = 7,
    Error = 8,
}

impl State {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::None => "None",
            State::Ready => "Ready",
            State::Polling => "Polling",
            State::UpdateAvailable => "UpdateAvailable",
            State::Fetching => "Fetching",
            State::UpdateReady => "UpdateReady",
            State::ApplyingUpdate => "ApplyingUpdate",
            State::UpdateApplied => "UpdateApplied",
            State::Error => "Error",
        };
        f.write_str(name)
    }
}

/// The kind of a flatpak ref action (spec §3 `FlatpakRefAction`).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum FlatpakActionKind {
    Install,
    Update,
    Uninstall,
}

impl FromStr for FlatpakActionKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "install" => Ok(FlatpakActionKind::Install),
            "update" => Ok(FlatpakActionKind::Update),
            "uninstall" => Ok(FlatpakActionKind::Uninstall),
            other => anyhow::bail!("unknown flatpak action '{}'", other),
        }
    }
}

impl fmt::Display for FlatpakActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlatpakActionKind::Install => "install",
            FlatpakActionKind::Update => "update",
            FlatpakActionKind::Uninstall => "uninstall",
        };
        f.write_str(s)
    }
}

/// A flatpak ref as named in an action line: `remote:ref`, with an
/// optional collection id supplied separately by configuration.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct LocationRef {
    pub ref_name: String,
    pub remote: Option<String>,
    pub collection_id: Option<String>,
}

/// One line of an action-list file (spec §3 `FlatpakRefAction`).
#[derive(Clone, Debug)]
pub struct FlatpakRefAction {
    pub kind: FlatpakActionKind,
    pub location_ref: LocationRef,
    pub source_file: String,
    pub serial: u32,
}

/// For a single `source_file`, its ordered actions plus override priority
/// (higher directory overlays lower, spec §4.8).
#[derive(Clone, Debug, Default)]
pub struct ActionList {
    pub source_file: String,
    pub priority: i32,
    pub actions: Vec<FlatpakRefAction>,
}

/// Per-`source_file` highest applied serial, persisted in a key-file
/// (spec §3 `ProgressCounter`, §6 on-disk format).
#[derive(Clone, Debug, Default)]
pub struct ProgressCounters {
    pub applied: BTreeMap<String, i64>,
}

impl ProgressCounters {
    pub fn get(&self, source_file: &str) -> i64 {
        self.applied.get(source_file).copied().unwrap_or(0)
    }

    pub fn set(&mut self, source_file: impl Into<String>, serial: i64) {
        self.applied.insert(source_file.into(), serial);
    }
}

/// The persisted outcome of the most recent poll (spec §3/§6 `PollResults`).
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct PollResults {
    pub last_changed_usecs: u64,
    pub update_refspec: String,
    pub update_id: String,
}
