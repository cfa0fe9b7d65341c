//! Project paths: the single factory every stack path goes through.
//!
//! A `ProjectPath` is always POSIX-absolute within the project root and
//! already cleaned (no `.`/`..`/empty segments/double slashes). Keeping the
//! factory narrow here is what rules out an entire class of escaping bugs in
//! edge resolution and "friendly" relative formatting elsewhere.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectPath(String);

impl ProjectPath {
    /// The project root itself, `/`.
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Build a `ProjectPath` from an already-absolute, forward-slashed
    /// string, normalizing `.`/`..`/repeated slashes away.
    pub fn try_new(raw: impl AsRef<str>) -> Result<Self> {
        let raw = raw.as_ref();
        if !raw.starts_with('/') {
            return Err(Error::Config(format!(
                "project path must be absolute, got: {raw}"
            )));
        }
        let mut segments: Vec<&str> = Vec::new();
        for segment in raw.split('/') {
            match segment {
                "" | "." => continue,
                ".." => {
                    segments.pop();
                }
                other => segments.push(other),
            }
        }
        if segments.is_empty() {
            return Ok(Self::root());
        }
        Ok(Self(format!("/{}", segments.join("/"))))
    }

    /// Join a single path segment onto this path (used when descending
    /// into subdirectories during discovery).
    pub fn join(&self, segment: &str) -> Result<Self> {
        if segment.contains('/') {
            return Err(Error::Config(format!(
                "expected a single path segment, got: {segment}"
            )));
        }
        if self.0 == "/" {
            Self::try_new(format!("/{segment}"))
        } else {
            Self::try_new(format!("{}/{segment}", self.0))
        }
    }

    /// Join a possibly-relative token onto this path's directory, resolving
    /// `..` ascension. Used for `before`/`after` tokens that are relative to
    /// the declaring stack.
    pub fn join_relative(&self, token: &str) -> Result<Self> {
        if token.starts_with('/') {
            return Self::try_new(token);
        }
        Self::try_new(format!("{}/{}", self.0, token))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn parent(&self) -> Option<Self> {
        if self.0 == "/" {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => None,
        }
    }

    pub fn last_segment(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or("")
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// True if `self` is `other`, or a descendant of `other`.
    pub fn has_prefix(&self, other: &ProjectPath) -> bool {
        if other.is_root() {
            return true;
        }
        self.0 == other.0 || self.0.starts_with(&format!("{}/", other.0))
    }

    /// True if `self` is a strict descendant of `other`.
    pub fn is_descendant_of(&self, other: &ProjectPath) -> bool {
        self.0 != other.0 && self.has_prefix(other)
    }

    /// Ancestor directories of this path, nearest first, ending at root.
    pub fn ancestors(&self) -> impl Iterator<Item = ProjectPath> + '_ {
        std::iter::successors(self.parent(), |p| p.parent())
    }

    /// Convert to a host filesystem path by joining with the project root.
    pub fn to_host_path(&self, rootdir: &Path) -> PathBuf {
        if self.0 == "/" {
            return rootdir.to_path_buf();
        }
        rootdir.join(self.0.trim_start_matches('/'))
    }

    /// Render relative to `anchor`, ascending with `..` when `self` is not a
    /// descendant of `anchor`.
    pub fn friendly(&self, anchor: &ProjectPath) -> String {
        if self.0 == anchor.0 {
            return ".".to_string();
        }
        if self.has_prefix(anchor) {
            let rest = if anchor.is_root() {
                self.0.trim_start_matches('/')
            } else {
                self.0[anchor.0.len()..].trim_start_matches('/')
            };
            return rest.to_string();
        }
        // Ascend from anchor to the common ancestor, then descend.
        let anchor_segments: Vec<&str> =
            anchor.0.split('/').filter(|s| !s.is_empty()).collect();
        let self_segments: Vec<&str> = self.0.split('/').filter(|s| !s.is_empty()).collect();
        let common = anchor_segments
            .iter()
            .zip(self_segments.iter())
            .take_while(|(a, b)| a == b)
            .count();
        let ups = anchor_segments.len() - common;
        let mut parts: Vec<String> = vec!["..".to_string(); ups];
        parts.extend(self_segments[common..].iter().map(|s| s.to_string()));
        parts.join("/")
    }
}

impl fmt::Display for ProjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ProjectPath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::try_new(value)
    }
}

impl From<ProjectPath> for String {
    fn from(value: ProjectPath) -> Self {
        value.0
    }
}

impl std::str::FromStr for ProjectPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::try_new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_relative_input() {
        assert!(ProjectPath::try_new("relative/path").is_err());
    }

    #[test]
    fn normalizes_dots_and_slashes() {
        let p = ProjectPath::try_new("/a//b/./c/../d").unwrap();
        assert_eq!(p.as_str(), "/a/b/d");
    }

    #[test]
    fn prefix_and_descendant() {
        let a = ProjectPath::try_new("/a").unwrap();
        let ab = ProjectPath::try_new("/a/b").unwrap();
        assert!(ab.has_prefix(&a));
        assert!(ab.is_descendant_of(&a));
        assert!(!a.is_descendant_of(&ab));
    }

    #[test]
    fn friendly_handles_ascending_paths() {
        let anchor = ProjectPath::try_new("/a/b").unwrap();
        let target = ProjectPath::try_new("/a/c").unwrap();
        assert_eq!(target.friendly(&anchor), "../c");
    }

    #[test]
    fn friendly_handles_descendant_paths() {
        let anchor = ProjectPath::try_new("/a").unwrap();
        let target = ProjectPath::try_new("/a/b/c").unwrap();
        assert_eq!(target.friendly(&anchor), "b/c");
    }

    #[test]
    fn root_parent_is_none() {
        assert!(ProjectPath::root().parent().is_none());
    }
}
