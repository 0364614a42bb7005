//! Logical path type.
//!
//! A `VfsPath` is a hierarchical key for a stored resource, not an OS path.
//! It is an ordered sequence of non-empty segments rooted at `/`, with the
//! prefix and subtraction operations the router and discovery walk need.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Error from parsing a logical path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParsePathError {
    #[error("relative segment {0:?} not allowed in a logical path")]
    RelativeSegment(String),
}

/// A hierarchical logical identifier, rooted at `/`.
///
/// Segments are non-empty and carry no separator characters; the canonical
/// rendering is `/a/b/c` (the root renders as `/`). Repeated separators in
/// the input collapse, so `"/a//b/"` parses as `/a/b`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct VfsPath {
    segments: Vec<String>,
}

impl VfsPath {
    /// The root path `/`.
    pub fn root() -> Self {
        Self::default()
    }

    /// Returns true if this is the root path.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// The path's segments, in order.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// The final segment, if any.
    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Extend this path with one more segment.
    ///
    /// Separator characters in `segment` split it further, so
    /// `p.child("a/b")` equals `p.child("a").child("b")`.
    pub fn child(&self, segment: impl AsRef<str>) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(
            segment
                .as_ref()
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        );
        Self { segments }
    }

    /// The parent path, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Reflexive prefix relation: does every segment of `self` lead `other`?
    ///
    /// The root is an ancestor of every path, and every path is an ancestor
    /// of itself.
    pub fn is_ancestor_of(&self, other: &VfsPath) -> bool {
        other.segments.len() >= self.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }

    /// Strip a leading `prefix`, returning the relative remainder.
    ///
    /// Returns `None` when `prefix` is not an ancestor of `self`.
    pub fn strip_prefix(&self, prefix: &VfsPath) -> Option<VfsPath> {
        if !prefix.is_ancestor_of(self) {
            return None;
        }
        Some(Self {
            segments: self.segments[prefix.segments.len()..].to_vec(),
        })
    }
}

impl fmt::Display for VfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "/");
        }
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl FromStr for VfsPath {
    type Err = ParsePathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut segments = Vec::new();
        for segment in s.split('/').filter(|s| !s.is_empty()) {
            if segment == "." || segment == ".." {
                return Err(ParsePathError::RelativeSegment(segment.to_string()));
            }
            segments.push(segment.to_string());
        }
        Ok(Self { segments })
    }
}

impl Serialize for VfsPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VfsPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> VfsPath {
        s.parse().expect("valid path")
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!(p("/a/b").to_string(), "/a/b");
        assert_eq!(p("a/b/").to_string(), "/a/b");
        assert_eq!(p("/a//b").to_string(), "/a/b");
        assert_eq!(p("/").to_string(), "/");
        assert_eq!(p("").to_string(), "/");
    }

    #[test]
    fn test_relative_segments_rejected() {
        assert!("/a/./b".parse::<VfsPath>().is_err());
        assert!("/a/../b".parse::<VfsPath>().is_err());
    }

    #[test]
    fn test_child_and_parent() {
        let base = p("/a");
        assert_eq!(base.child("b"), p("/a/b"));
        assert_eq!(base.child("b/c"), p("/a/b/c"));
        assert_eq!(p("/a/b").parent(), Some(p("/a")));
        assert_eq!(p("/a").parent(), Some(VfsPath::root()));
        assert_eq!(VfsPath::root().parent(), None);
    }

    #[test]
    fn test_ancestor_relation() {
        assert!(VfsPath::root().is_ancestor_of(&p("/a/b")));
        assert!(p("/a").is_ancestor_of(&p("/a/b")));
        assert!(p("/a/b").is_ancestor_of(&p("/a/b")));
        assert!(!p("/a/b").is_ancestor_of(&p("/a")));
        assert!(!p("/a").is_ancestor_of(&p("/ab")));
    }

    #[test]
    fn test_strip_prefix() {
        assert_eq!(p("/a/b/c").strip_prefix(&p("/a")), Some(p("/b/c")));
        assert_eq!(p("/a").strip_prefix(&p("/a")), Some(VfsPath::root()));
        assert_eq!(p("/a").strip_prefix(&p("/b")), None);
    }

    #[test]
    fn test_serde_round_trip() {
        let path = p("/a/b");
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"/a/b\"");
        let back: VfsPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
    }
}
