use std::fmt;

use serde::Serialize;

use crate::errors::BackendError;
use crate::normalization::normalize_key;

/// The key that scopes the submission cool-down: the submitted display
/// name, normalized by [`normalize_key`]. Never empty.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Derives the key for a display name. Fails with a field-level
    /// error when nothing but whitespace is left.
    ///
    /// ```
    /// use intern_tracker::identity::IdentityKey;
    ///
    /// let key = IdentityKey::from_name(" Asha ").unwrap();
    /// assert_eq!(key.as_str(), "asha");
    /// assert!(IdentityKey::from_name("  ").is_err());
    /// ```
    pub fn from_name(name: impl AsRef<str>) -> Result<Self, BackendError> {
        let key = normalize_key(name);

        if key.is_empty() {
            Err(BackendError::MissingField { field: "name" })
        } else {
            Ok(IdentityKey(key))
        }
    }

    /// Wraps a key read back from storage, which only ever holds keys
    /// built by [`IdentityKey::from_name`].
    pub(crate) fn from_stored(key: String) -> Self {
        IdentityKey(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
