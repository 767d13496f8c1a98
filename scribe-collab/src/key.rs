//! Identifiers: document keys and connection ids.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Key a document is looked up by.
///
/// Opaque to the server; the only structure it knows about is how to
/// derive one from an HTTP request path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentKey(String);

impl DocumentKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Derive a key from a request path: its first non-empty segment,
    /// or `default` for the root path.
    ///
    /// ```
    /// use scribe_collab::DocumentKey;
    /// assert_eq!(DocumentKey::from_path("/notes/x?y=1", "default").as_str(), "notes");
    /// assert_eq!(DocumentKey::from_path("/", "default").as_str(), "default");
    /// ```
    pub fn from_path(path: &str, default: &str) -> Self {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        match path.split('/').find(|segment| !segment.is_empty()) {
            Some(segment) => Self::new(segment),
            None => Self::new(default),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Identity of one live transport channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_from_first_segment() {
        assert_eq!(DocumentKey::from_path("/meeting-notes", "default").as_str(), "meeting-notes");
        assert_eq!(DocumentKey::from_path("/a/b/c", "default").as_str(), "a");
        assert_eq!(DocumentKey::from_path("//a", "default").as_str(), "a");
    }

    #[test]
    fn test_key_root_uses_default() {
        assert_eq!(DocumentKey::from_path("/", "default").as_str(), "default");
        assert_eq!(DocumentKey::from_path("", "lobby").as_str(), "lobby");
        assert_eq!(DocumentKey::from_path("/?x=1", "lobby").as_str(), "lobby");
    }

    #[test]
    fn test_key_ignores_query_and_fragment() {
        assert_eq!(DocumentKey::from_path("/doc1?token=abc", "default").as_str(), "doc1");
        assert_eq!(DocumentKey::from_path("/doc1#top", "default").as_str(), "doc1");
    }

    #[test]
    fn test_empty_key() {
        assert!(DocumentKey::new("").is_empty());
        assert!(!DocumentKey::from_path("/", "default").is_empty());
    }

    #[test]
    fn test_key_serializes_as_plain_string() {
        let key = DocumentKey::new("foo");
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"foo\"");
    }

    #[test]
    fn test_connection_ids_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }
}
