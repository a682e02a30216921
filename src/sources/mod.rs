//! Source set & finders (spec §4.3).
//!
//! A `SourcesConfig` resolves into an ordered array of `Box<dyn Finder>`;
//! the metadata fetcher (§4.4) takes that slice unchanged through one
//! whole Poll cycle. Per the design notes (§9), finders are modelled as a
//! small trait rather than an enum switch, so the fetcher never needs to
//! know a finder's concrete transport.

mod lan_finder;
mod main_finder;
mod override_finder;
mod volume_finder;

pub use lan_finder::LanFinder;
pub use main_finder::MainFinder;
pub use override_finder::OverrideFinder;
pub use volume_finder::{VolumeFinder, VOLUME_REPO_DIR};

use anyhow::Result;
use ostree::gio;

use crate::repo::Repository;
use crate::types::{CollectionRef, DownloadSource, SourcesConfig};

/// One candidate remote a finder offers for a given `CollectionRef`.
#[derive(Clone, Debug)]
pub struct FinderResult {
    pub finder_name: &'static str,
    pub keyring_remote: String,
    pub uri: String,
    pub priority: i32,
    pub summary_timestamp: Option<i64>,
}

/// A pluggable source of candidate `(commit, URI)` pairs for a ref.
///
/// All methods are blocking; long ones must check `cancellable` between
/// internal steps (spec §5).
pub trait Finder: Send + Sync {
    fn name(&self) -> &'static str;

    /// `find_remotes` (spec §4.4 step 4a): ask this finder for candidate
    /// remotes carrying `collection_ref`. An empty result is not an
    /// error; it just means this finder has nothing to offer this cycle.
    fn find_remotes(
        &self,
        collection_ref: &CollectionRef,
        cancellable: &gio::Cancellable,
    ) -> Result<Vec<FinderResult>>;
}

/// Narrow interface onto the mDNS/DNS-SD service-advertising layer that
/// peers use to announce themselves (spec §1: "consumed through narrow
/// interfaces"). `eos-updater-avahi` is the sibling process that does the
/// advertising; this trait is only the consuming side.
pub trait LanDiscovery: Send + Sync {
    /// Best-effort snapshot of currently-advertised peers carrying
    /// `collection_ref`. Implementations must not block longer than a
    /// short, bounded browse window.
    fn discover(&self, collection_ref: &CollectionRef) -> Result<Vec<FinderResult>>;
}

/// A discovery backend that never finds anything, used when LAN
/// discovery could not be started (spec §4.3: "if the LAN finder fails
/// to start, it is removed silently") and in tests.
pub struct NoLanDiscovery;

impl LanDiscovery for NoLanDiscovery {
    fn discover(&self, _collection_ref: &CollectionRef) -> Result<Vec<FinderResult>> {
        Ok(Vec::new())
    }
}

/// Build the ordered finder array for one Poll cycle (spec §4.3).
///
/// `lan_discovery` is injected so the caller can wire in the real
/// mDNS/DNS-SD consumer, or fall back to [`NoLanDiscovery`].
pub fn build_finders(
    sources: &SourcesConfig,
    _repo: &Repository,
    remote: &str,
    mount_roots: &[std::path::PathBuf],
    lan_discovery: Box<dyn LanDiscovery>,
) -> Vec<Box<dyn Finder>> {
    if sources.has_override() {
        return vec![Box::new(OverrideFinder::new(sources.override_uris.clone()))];
    }

    // `SourcesConfig::new` deduplicates `order`, so `Lan` appears at most
    // once; `lan_discovery` is moved into it the one time we see it.
    let mut lan_discovery = Some(lan_discovery);
    let mut finders: Vec<Box<dyn Finder>> = Vec::new();
    for source in &sources.order {
        match source {
            DownloadSource::Main => {
                finders.push(Box::new(MainFinder::new(remote.to_string())));
            }
            DownloadSource::Lan => {
                let discovery = lan_discovery
                    .take()
                    .unwrap_or_else(|| Box::new(NoLanDiscovery));
                match LanFinder::try_new(discovery) {
                    Ok(finder) => finders.push(Box::new(finder)),
                    Err(e) => {
                        log::warn!("LAN finder failed to start, removing it for this cycle: {}", e);
                    }
                }
            }
            DownloadSource::Volume => {
                finders.push(Box::new(VolumeFinder::new(mount_roots.to_vec())));
            }
        }
    }
    finders
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_replaces_everything() {
        let sources = SourcesConfig::new(
            vec![DownloadSource::Main, DownloadSource::Lan],
            vec!["https://example.invalid/repo".to_string()],
        );
        assert!(sources.has_override());
    }
}
