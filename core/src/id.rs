//! Instance identity.
//!
//! Every [`Lifecycle`](crate::lifecycle::Lifecycle) owns a unique [`InstanceId`].
//! Lifecycle actions carry only this id, so it is the key used by the
//! registry, the slice reducer and the invocation epic.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for `InstanceId` parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid instance ID: {0}")]
pub struct ParseInstanceIdError(String);

/// Opaque unique identifier of a lifecycle instance.
///
/// Generated ids are UUID v4 strings. Ids supplied by callers are taken as-is;
/// the only requirement is uniqueness among live instances.
///
/// # Examples
///
/// ```
/// use stately_core::id::InstanceId;
///
/// let id = InstanceId::new("search-box");
/// assert_eq!(id.as_str(), "search-box");
///
/// let parsed: InstanceId = "search-box".parse().unwrap();
/// assert_eq!(parsed, id);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Create an `InstanceId` from a string without validation.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random id (UUID v4).
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert the `InstanceId` into its inner `String`.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for InstanceId {
    type Err = ParseInstanceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseInstanceIdError(
                "Instance ID cannot be empty".to_string(),
            ));
        }
        Ok(Self(s.to_string()))
    }
}

impl From<String> for InstanceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for InstanceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for InstanceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = InstanceId::generate();
        let b = InstanceId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    #[allow(clippy::expect_used)] // Panics: Test will fail if parse fails
    fn parse_from_str() {
        let id: InstanceId = "abc".parse().expect("parse should succeed");
        assert_eq!(id, InstanceId::new("abc"));
    }

    #[test]
    fn parse_empty_string_fails() {
        assert!("".parse::<InstanceId>().is_err());
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = InstanceId::new("abc");
        assert_eq!(serde_json::to_value(&id).ok(), Some(serde_json::json!("abc")));
    }
}
