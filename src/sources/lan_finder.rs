//! The `LAN` finder: peer discovery on the local network via the
//! mDNS/DNS-SD service-advertising layer (consumed as a narrow interface,
//! spec §1/§4.3).

use anyhow::Result;
use ostree::gio;

use super::{Finder, FinderResult, LanDiscovery};
use crate::types::CollectionRef;

/// LAN peer discovery bound to a scoped discovery backend.
///
/// Priority is lower than `main` (peers are preferred once discovered,
/// but a fresher upstream summary still wins ties downstream in the
/// fetcher per spec §4.4's "the fetcher does not re-sort").
pub struct LanFinder {
    discovery: Box<dyn LanDiscovery>,
}

impl LanFinder {
    /// Bind the discovery backend for one Poll cycle. Fails (and is
    /// dropped silently by the caller, spec §4.3) if the backend could
    /// not be started, e.g. the avahi client connection failed.
    pub fn try_new(discovery: Box<dyn LanDiscovery>) -> Result<Self> {
        Ok(LanFinder { discovery })
    }
}

impl Finder for LanFinder {
    fn name(&self) -> &'static str {
        "lan"
    }

    fn find_remotes(
        &self,
        collection_ref: &CollectionRef,
        _cancellable: &gio::Cancellable,
    ) -> Result<Vec<FinderResult>> {
        if !collection_ref.has_collection_id() {
            log::trace!("lan finder: no collection id configured, nothing to discover");
            return Ok(Vec::new());
        }
        self.discovery.discover(collection_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::NoLanDiscovery;

    #[test]
    fn no_collection_id_means_no_results() {
        let finder = LanFinder::try_new(Box::new(NoLanDiscovery)).unwrap();
        let cref = CollectionRef::new(None, "os/eos/amd64/master");
        let cancellable = ostree::gio::Cancellable::new();
        let results = finder.find_remotes(&cref, &cancellable).unwrap();
        assert!(results.is_empty());
    }
}
