//! Helper methods for [`glib::KeyFile`], used throughout the config layer.
//!
//! Grounded on `ostree-ext`'s `keyfileext.rs`: the same "missing group/key
//! maps to `Ok(None)`" trick, extended with an integer accessor for the
//! `IntervalDays` / `RandomizedDelayDays` / `LastAutomaticStep` keys.

use ostree::glib;

/// Helper methods for [`glib::KeyFile`].
pub trait KeyFileExt {
    /// Get a string value, but return `None` if the key does not exist.
    fn optional_string(&self, group: &str, key: &str) -> Result<Option<glib::GString>, glib::Error>;
    /// Get a boolean value, but return `None` if the key does not exist.
    fn optional_bool(&self, group: &str, key: &str) -> Result<Option<bool>, glib::Error>;
    /// Get a 64-bit integer value, but return `None` if the key does not exist.
    fn optional_int64(&self, group: &str, key: &str) -> Result<Option<i64>, glib::Error>;
    /// Get a string list value, but return `None` if the key does not exist.
    fn optional_string_list(
        &self,
        group: &str,
        key: &str,
    ) -> Result<Option<Vec<glib::GString>>, glib::Error>;
}

/// Consume a keyfile error, mapping the case where group or key is not
/// found to `Ok(None)`.
pub fn map_keyfile_optional<T>(res: Result<T, glib::Error>) -> Result<Option<T>, glib::Error> {
    match res {
        Ok(v) => Ok(Some(v)),
        Err(e) => match e.kind::<glib::KeyFileError>() {
            Some(glib::KeyFileError::GroupNotFound) | Some(glib::KeyFileError::KeyNotFound) => {
                Ok(None)
            }
            _ => Err(e),
        },
    }
}

impl KeyFileExt for glib::KeyFile {
    fn optional_string(&self, group: &str, key: &str) -> Result<Option<glib::GString>, glib::Error> {
        map_keyfile_optional(self.string(group, key))
    }

    fn optional_bool(&self, group: &str, key: &str) -> Result<Option<bool>, glib::Error> {
        map_keyfile_optional(self.boolean(group, key))
    }

    fn optional_int64(&self, group: &str, key: &str) -> Result<Option<i64>, glib::Error> {
        map_keyfile_optional(self.int64(group, key))
    }

    fn optional_string_list(
        &self,
        group: &str,
        key: &str,
    ) -> Result<Option<Vec<glib::GString>>, glib::Error> {
        map_keyfile_optional(self.string_list(group, key).map(|l| l.into_iter().collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_string_and_bool() {
        let kf = glib::KeyFile::new();
        assert_eq!(kf.optional_string("foo", "bar").unwrap(), None);
        kf.set_string("foo", "baz", "someval");
        assert_eq!(kf.optional_string("foo", "baz").unwrap().unwrap(), "someval");

        assert!(kf.optional_bool("foo", "baz").is_err());
        assert_eq!(kf.optional_bool("foo", "bar").unwrap(), None);
        kf.set_boolean("foo", "somebool", false);
        assert_eq!(kf.optional_bool("foo", "somebool").unwrap(), Some(false));
    }

    #[test]
    fn test_optional_int64() {
        let kf = glib::KeyFile::new();
        assert_eq!(kf.optional_int64("Automatic Updates", "IntervalDays").unwrap(), None);
        kf.set_int64("Automatic Updates", "IntervalDays", 7);
        assert_eq!(
            kf.optional_int64("Automatic Updates", "IntervalDays").unwrap(),
            Some(7)
        );
    }
}
