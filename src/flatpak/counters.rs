//! Per-file progress counter persistence (spec §3/§6 `ProgressCounter`):
//! a key-file mapping source_file → Progress = int64, in group
//! `[Progress]`.

use std::path::Path;

use anyhow::{Context, Result};
use ostree::glib;

use crate::types::ProgressCounters;

const GROUP: &str = "Progress";

/// A missing file is "no actions applied yet", not an error.
pub fn load_counters(path: &Path) -> Result<ProgressCounters> {
    if !path.exists() {
        return Ok(ProgressCounters::default());
    }
    let keyfile = glib::KeyFile::new();
    keyfile
        .load_from_file(path, glib::KeyFileFlags::NONE)
        .with_context(|| format!("loading progress counters from {}", path.display()))?;

    let mut counters = ProgressCounters::default();
    if keyfile.has_group(GROUP) {
        for key in keyfile.keys(GROUP)?.0 {
            let value = keyfile
                .int64(GROUP, &key)
                .with_context(|| format!("reading counter for '{}'", key))?;
            counters.set(key.to_string(), value);
        }
    }
    Ok(counters)
}

pub fn save_counters(path: &Path, counters: &ProgressCounters) -> Result<()> {
    let keyfile = glib::KeyFile::new();
    for (source_file, serial) in &counters.applied {
        keyfile.set_int64(GROUP, source_file, *serial);
    }
    keyfile
        .save_to_file(path)
        .with_context(|| format!("writing progress counters to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty() {
        let counters = load_counters(Path::new("/does/not/exist.ini")).unwrap();
        assert_eq!(counters.get("anything"), 0);
    }

    #[test]
    fn roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counters.ini");
        let mut counters = ProgressCounters::default();
        counters.set("myapp.txt", 5);
        save_counters(&path, &counters).unwrap();
        let loaded = load_counters(&path).unwrap();
        assert_eq!(loaded.get("myapp.txt"), 5);
    }
}
