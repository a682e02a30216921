//! Layered key-file configuration overlay (spec §4.1).
//!
//! Callers supply an ordered list of candidate paths; the first file (in
//! that order) defining a key wins. A built-in default document, embedded
//! at build time, is consulted last and must define every key the daemon
//! requires. No file I/O happens at construction time: files are opened
//! lazily on first query and the parsed result is cached for the lifetime
//! of the `Config`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use ostree::glib;

use crate::error::ConfigError;
use crate::keyfileext::KeyFileExt;

/// The built-in default configuration, shipped inside the binary so the
/// daemon always has a complete set of keys even with no config files on
/// disk at all.
const DEFAULT_CONFIG: &str = include_str!("../data/eos-updater.conf.default");

struct LoadedFile {
    /// `None` identifies the built-in default document.
    path: Option<PathBuf>,
    keyfile: glib::KeyFile,
}

/// A layered key-file configuration.
///
/// Construct with [`Config::new`], passing the admin/local override paths
/// in priority order (highest priority first). The built-in default is
/// always appended last and does not need to be passed in.
pub struct Config {
    candidate_paths: Vec<PathBuf>,
    loaded: OnceCell<Vec<LoadedFile>>,
}

impl Config {
    pub fn new(candidate_paths: Vec<PathBuf>) -> Self {
        Config {
            candidate_paths,
            loaded: OnceCell::new(),
        }
    }

    /// The layered config used by the system daemons: admin overrides in
    /// `/etc`, vendor overrides in `/run` (for image-based testing), then
    /// the built-in default.
    pub fn system_default() -> Self {
        Config::new(vec![
            PathBuf::from("/etc/eos-updater.conf"),
            PathBuf::from("/run/eos-updater.conf"),
        ])
    }

    fn files(&self) -> Result<&[LoadedFile], ConfigError> {
        self.loaded
            .get_or_try_init(|| -> Result<Vec<LoadedFile>, ConfigError> {
                let mut files = Vec::with_capacity(self.candidate_paths.len() + 1);
                for path in &self.candidate_paths {
                    if let Some(loaded) = Self::try_load(path)? {
                        files.push(loaded);
                    }
                }
                files.push(Self::load_default()?);
                Ok(files)
            })
            .map(|v| v.as_slice())
    }

    fn try_load(path: &Path) -> Result<Option<LoadedFile>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let keyfile = glib::KeyFile::new();
        match keyfile.load_from_file(path, glib::KeyFileFlags::NONE) {
            Ok(()) => Ok(Some(LoadedFile {
                path: Some(path.to_path_buf()),
                keyfile,
            })),
            Err(e) => {
                if let Some(kind) = e.kind::<glib::FileError>() {
                    if kind == glib::FileError::Acces {
                        return Err(ConfigError::Permission {
                            path: path.to_path_buf(),
                            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
                        });
                    }
                    if kind == glib::FileError::Noent {
                        return Ok(None);
                    }
                }
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: anyhow::anyhow!("{}", e),
                })
            }
        }
    }

    fn load_default() -> Result<LoadedFile, ConfigError> {
        let keyfile = glib::KeyFile::new();
        keyfile
            .load_from_data(DEFAULT_CONFIG, glib::KeyFileFlags::NONE)
            .map_err(|e| ConfigError::Parse {
                path: PathBuf::from("<built-in default>"),
                source: anyhow::anyhow!("{}", e),
            })?;
        Ok(LoadedFile {
            path: None,
            keyfile,
        })
    }

    /// Look up a string key, trying each file in priority order.
    pub fn string(&self, group: &str, key: &str) -> Result<Option<String>, ConfigError> {
        for file in self.files()? {
            if let Some(v) = file
                .keyfile
                .optional_string(group, key)
                .map_err(|e| Self::as_parse_error(file, e))?
            {
                return Ok(Some(v.to_string()));
            }
        }
        Ok(None)
    }

    /// Like [`Config::string`], but fails if no file (including the
    /// built-in default) defines the key.
    pub fn required_string(&self, group: &str, key: &str) -> Result<String, ConfigError> {
        self.string(group, key)?
            .ok_or_else(|| ConfigError::MissingRequiredKey {
                group: group.to_string(),
                key: key.to_string(),
            })
    }

    pub fn bool(&self, group: &str, key: &str, default: bool) -> Result<bool, ConfigError> {
        for file in self.files()? {
            if let Some(v) = file
                .keyfile
                .optional_bool(group, key)
                .map_err(|e| Self::as_parse_error(file, e))?
            {
                return Ok(v);
            }
        }
        Ok(default)
    }

    pub fn int64(&self, group: &str, key: &str) -> Result<Option<i64>, ConfigError> {
        for file in self.files()? {
            if let Some(v) = file
                .keyfile
                .optional_int64(group, key)
                .map_err(|e| Self::as_parse_error(file, e))?
            {
                return Ok(Some(v));
            }
        }
        Ok(None)
    }

    pub fn string_list(&self, group: &str, key: &str) -> Result<Vec<String>, ConfigError> {
        for file in self.files()? {
            if let Some(v) = file
                .keyfile
                .optional_string_list(group, key)
                .map_err(|e| Self::as_parse_error(file, e))?
            {
                return Ok(v.into_iter().map(|g| g.to_string()).collect());
            }
        }
        Ok(Vec::new())
    }

    /// Sorted union of group names across every layered file.
    pub fn groups(&self) -> Result<Vec<String>, ConfigError> {
        let mut groups = BTreeSet::new();
        for file in self.files()? {
            for group in file.keyfile.groups() {
                groups.insert(group.to_string());
            }
        }
        Ok(groups.into_iter().collect())
    }

    fn as_parse_error(file: &LoadedFile, e: glib::Error) -> ConfigError {
        ConfigError::Parse {
            path: file
                .path
                .clone()
                .unwrap_or_else(|| PathBuf::from("<built-in default>")),
            source: anyhow::anyhow!("{}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn highest_priority_file_wins() {
        let admin = write_temp("[Automatic Updates]\nIntervalDays=3\n");
        let local = write_temp("[Automatic Updates]\nIntervalDays=1\nRandomizedDelayDays=2\n");
        let cfg = Config::new(vec![
            admin.path().to_path_buf(),
            local.path().to_path_buf(),
        ]);
        assert_eq!(
            cfg.int64("Automatic Updates", "IntervalDays").unwrap(),
            Some(3)
        );
        assert_eq!(
            cfg.int64("Automatic Updates", "RandomizedDelayDays").unwrap(),
            Some(2)
        );
    }

    #[test]
    fn missing_files_are_ignored() {
        let cfg = Config::new(vec![PathBuf::from("/does/not/exist.conf")]);
        // Falls through to the built-in default, which always defines this.
        assert!(cfg
            .string("Download", "Order")
            .unwrap()
            .is_some());
    }

    #[test]
    fn default_provides_every_required_key() {
        let cfg = Config::new(vec![]);
        assert!(cfg.required_string("Download", "Order").is_ok());
        assert!(cfg
            .int64("Automatic Updates", "IntervalDays")
            .unwrap()
            .is_some());
    }

    #[test]
    fn groups_is_sorted_union() {
        let a = write_temp("[Download]\nOrder=main\n");
        let b = write_temp("[Local Network Updates]\nAdvertiseUpdates=true\n");
        let cfg = Config::new(vec![a.path().to_path_buf(), b.path().to_path_buf()]);
        let groups = cfg.groups().unwrap();
        assert!(groups.contains(&"Download".to_string()));
        assert!(groups.contains(&"Local Network Updates".to_string()));
        assert!(groups.contains(&"Automatic Updates".to_string()));
    }
}
