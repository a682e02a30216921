//! The `MAIN` finder: the remote's own configured upstream URL.

use anyhow::Result;
use ostree::gio;

use super::{Finder, FinderResult};
use crate::types::CollectionRef;

/// Resolves a candidate directly from the remote's own `url=` config, the
/// way a plain `ostree pull` without P2P would.
pub struct MainFinder {
    remote: String,
}

impl MainFinder {
    pub fn new(remote: String) -> Self {
        MainFinder { remote }
    }
}

impl Finder for MainFinder {
    fn name(&self) -> &'static str {
        "main"
    }

    fn find_remotes(
        &self,
        collection_ref: &CollectionRef,
        _cancellable: &gio::Cancellable,
    ) -> Result<Vec<FinderResult>> {
        log::trace!(
            "main finder: offering configured remote '{}' for {}",
            self.remote,
            collection_ref
        );
        Ok(vec![FinderResult {
            finder_name: self.name(),
            keyring_remote: self.remote.clone(),
            uri: String::new(),
            priority: 0,
            summary_timestamp: None,
        }])
    }
}
