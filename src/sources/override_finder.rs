//! The override finder: replaces the entire configured source set with a
//! fixed list of URIs (`[Download] OverrideUris`, spec §4.3).

use anyhow::Result;
use ostree::gio;

use super::{Finder, FinderResult};
use crate::types::CollectionRef;

pub struct OverrideFinder {
    uris: Vec<String>,
}

impl OverrideFinder {
    pub fn new(uris: Vec<String>) -> Self {
        OverrideFinder { uris }
    }
}

impl Finder for OverrideFinder {
    fn name(&self) -> &'static str {
        "override"
    }

    fn find_remotes(
        &self,
        collection_ref: &CollectionRef,
        _cancellable: &gio::Cancellable,
    ) -> Result<Vec<FinderResult>> {
        log::debug!(
            "override finder: {} URI(s) configured, replacing all other sources for {}",
            self.uris.len(),
            collection_ref
        );
        Ok(self
            .uris
            .iter()
            .enumerate()
            .map(|(idx, uri)| FinderResult {
                finder_name: self.name(),
                keyring_remote: String::new(),
                uri: uri.clone(),
                // Preserve configured order as priority.
                priority: -(idx as i32),
                summary_timestamp: None,
            })
            .collect())
    }
}
