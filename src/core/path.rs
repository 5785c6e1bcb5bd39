//! core::path
//!
//! Normalized, segment-based workspace paths.
//!
//! # Shape
//!
//! A [`ResourcePath`] is always absolute from the workspace root. The root
//! itself has zero segments, a project has one, and folders and files have
//! two or more. Segment count is the resource *depth*.
//!
//! # Ordering
//!
//! Paths order lexicographically by segment, which keeps every subtree
//! contiguous in an ordered map: all descendants of `/a` sort between `/a`
//! and the next sibling of `/a`. The element tree relies on this for its
//! subtree range scans.
//!
//! # Example
//!
//! ```
//! use canopy::core::path::ResourcePath;
//!
//! let file = ResourcePath::parse("/proj/src/main.rs").unwrap();
//! assert_eq!(file.segment_count(), 3);
//! assert_eq!(file.project_name(), Some("proj"));
//! assert_eq!(file.parent().unwrap().to_string(), "/proj/src");
//!
//! let folder = ResourcePath::parse("/proj/src").unwrap();
//! assert!(folder.is_prefix_of(&file));
//!
//! assert!(ResourcePath::parse("/proj/../etc").is_err());
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from path parsing and validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("invalid path '{path}': {reason}")]
    Invalid { path: String, reason: String },

    #[error("invalid segment '{segment}': {reason}")]
    InvalidSegment { segment: String, reason: String },
}

/// Characters never allowed in a segment.
const INVALID_CHARS: [char; 3] = ['/', '\\', '\0'];

/// The root path, shared by every root resource handle.
pub static ROOT_PATH: ResourcePath = ResourcePath {
    segments: Vec::new(),
};

/// An absolute, normalized workspace path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourcePath {
    segments: Vec<String>,
}

impl ResourcePath {
    /// The workspace root path (`/`).
    pub fn root() -> Self {
        ROOT_PATH.clone()
    }

    /// Parse a `/`-separated path.
    ///
    /// A leading slash is optional; repeated and trailing slashes are
    /// collapsed. Relative components (`.` and `..`) are rejected rather
    /// than resolved, since callers hand us workspace paths, not shell paths.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        if raw.is_empty() {
            return Err(PathError::Invalid {
                path: raw.to_string(),
                reason: "path cannot be empty".into(),
            });
        }
        let mut segments = Vec::new();
        for segment in raw.split('/').filter(|s| !s.is_empty()) {
            validate_segment(segment).map_err(|e| PathError::Invalid {
                path: raw.to_string(),
                reason: e.to_string(),
            })?;
            segments.push(segment.to_string());
        }
        Ok(Self { segments })
    }

    /// Build a path from already-split segments.
    pub fn from_segments<I, S>(segments: I) -> Result<Self, PathError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out = Vec::new();
        for segment in segments {
            let segment = segment.into();
            validate_segment(&segment)?;
            out.push(segment);
        }
        Ok(Self { segments: out })
    }

    /// Append one validated segment.
    pub fn append(&self, segment: &str) -> Result<Self, PathError> {
        validate_segment(segment)?;
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Ok(Self { segments })
    }

    /// Append every segment of a relative path.
    pub fn join(&self, relative: &ResourcePath) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(relative.segments.iter().cloned());
        Self { segments }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Number of segments; also the depth below the root.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn segment(&self, index: usize) -> Option<&str> {
        self.segments.get(index).map(String::as_str)
    }

    pub fn last_segment(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// The owning project's name, or `None` for the root.
    pub fn project_name(&self) -> Option<&str> {
        self.segment(0)
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

    /// Keep only the first `count` segments.
    pub fn truncate(&self, count: usize) -> Self {
        Self {
            segments: self.segments[..count.min(self.segments.len())].to_vec(),
        }
    }

    /// Segment-wise prefix test; a path is a prefix of itself.
    pub fn is_prefix_of(&self, other: &ResourcePath) -> bool {
        self.segments.len() <= other.segments.len()
            && self.segments.iter().zip(&other.segments).all(|(a, b)| a == b)
    }

    /// Strict descendant test.
    pub fn is_ancestor_of(&self, other: &ResourcePath) -> bool {
        self.segments.len() < other.segments.len() && self.is_prefix_of(other)
    }

    /// Remove `prefix` from the front, producing a relative path.
    pub fn strip_prefix(&self, prefix: &ResourcePath) -> Option<Self> {
        if !prefix.is_prefix_of(self) {
            return None;
        }
        Some(Self {
            segments: self.segments[prefix.segments.len()..].to_vec(),
        })
    }

    /// Rebase this path from under `from` to under `to`.
    pub fn rebase(&self, from: &ResourcePath, to: &ResourcePath) -> Option<Self> {
        self.strip_prefix(from).map(|rest| to.join(&rest))
    }

    /// Case-insensitive equality, used on case-insensitive backing stores.
    pub fn eq_ignore_case(&self, other: &ResourcePath) -> bool {
        self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|(a, b)| segment_eq_ignore_case(a, b))
    }
}

/// Compare two segments ignoring case.
pub fn segment_eq_ignore_case(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b) || a.to_lowercase() == b.to_lowercase()
}

/// Validate a single path segment.
pub fn validate_segment(segment: &str) -> Result<(), PathError> {
    if segment.is_empty() {
        return Err(PathError::InvalidSegment {
            segment: segment.to_string(),
            reason: "segment cannot be empty".into(),
        });
    }
    if segment == "." || segment == ".." {
        return Err(PathError::InvalidSegment {
            segment: segment.to_string(),
            reason: "relative segments are not allowed".into(),
        });
    }
    for c in INVALID_CHARS {
        if segment.contains(c) {
            return Err(PathError::InvalidSegment {
                segment: segment.to_string(),
                reason: format!("segment cannot contain {c:?}"),
            });
        }
    }
    if segment.chars().any(|c| c.is_control()) {
        return Err(PathError::InvalidSegment {
            segment: segment.to_string(),
            reason: "segment cannot contain control characters".into(),
        });
    }
    if segment.ends_with(' ') {
        return Err(PathError::InvalidSegment {
            segment: segment.to_string(),
            reason: "segment cannot end with a space".into(),
        });
    }
    Ok(())
}

impl TryFrom<String> for ResourcePath {
    type Error = PathError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ResourcePath> for String {
    fn from(path: ResourcePath) -> Self {
        path.to_string()
    }
}

impl std::str::FromStr for ResourcePath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> ResourcePath {
        ResourcePath::parse(s).expect("valid path")
    }

    mod parse {
        use super::*;

        #[test]
        fn root_forms() {
            assert!(p("/").is_root());
            assert!(p("//").is_root());
            assert_eq!(p("/").to_string(), "/");
        }

        #[test]
        fn collapses_slashes() {
            assert_eq!(p("a//b/").to_string(), "/a/b");
            assert_eq!(p("/a/b").segment_count(), 2);
        }

        #[test]
        fn rejects_relative_segments() {
            assert!(ResourcePath::parse("/a/../b").is_err());
            assert!(ResourcePath::parse("/a/./b").is_err());
        }

        #[test]
        fn rejects_empty() {
            assert!(ResourcePath::parse("").is_err());
        }

        #[test]
        fn rejects_backslash_and_control() {
            assert!(ResourcePath::parse("/a\\b").is_err());
            assert!(ResourcePath::parse("/a\u{7}b").is_err());
        }

        #[test]
        fn rejects_trailing_space() {
            assert!(ResourcePath::parse("/a /b").is_err());
        }
    }

    mod relations {
        use super::*;

        #[test]
        fn prefix_includes_self() {
            assert!(p("/a").is_prefix_of(&p("/a")));
            assert!(p("/a").is_prefix_of(&p("/a/b")));
            assert!(!p("/a").is_prefix_of(&p("/ab")));
            assert!(p("/").is_prefix_of(&p("/x/y")));
        }

        #[test]
        fn ancestor_is_strict() {
            assert!(!p("/a").is_ancestor_of(&p("/a")));
            assert!(p("/a").is_ancestor_of(&p("/a/b/c")));
        }

        #[test]
        fn rebase_moves_subtree() {
            let moved = p("/p/a/x/y").rebase(&p("/p/a"), &p("/q/b")).unwrap();
            assert_eq!(moved, p("/q/b/x/y"));
            assert!(p("/p/z").rebase(&p("/p/a"), &p("/q")).is_none());
        }

        #[test]
        fn parent_chain() {
            let path = p("/p/a/b");
            assert_eq!(path.parent().unwrap(), p("/p/a"));
            assert_eq!(p("/p").parent().unwrap(), ResourcePath::root());
            assert!(ResourcePath::root().parent().is_none());
        }

        #[test]
        fn case_insensitive_compare() {
            assert!(p("/P/Foo").eq_ignore_case(&p("/p/FOO")));
            assert!(!p("/p/Foo").eq_ignore_case(&p("/p/Foo/x")));
        }

        #[test]
        fn subtree_is_contiguous_in_order() {
            let mut paths = vec![p("/a0"), p("/a/b"), p("/a"), p("/b"), p("/a/c/d")];
            paths.sort();
            let strings: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
            assert_eq!(strings, vec!["/a", "/a/b", "/a/c/d", "/a0", "/b"]);
        }
    }

    #[test]
    fn serde_roundtrip_as_string() {
        let path = p("/proj/dir/file.txt");
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"/proj/dir/file.txt\"");
        let back: ResourcePath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
    }
}
