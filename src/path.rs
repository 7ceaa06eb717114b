//! Store-tagged paths.
//!
//! Every path the engine handles carries the store it belongs to. Wire strings
//! look like `hs:/folder/file.txt` or `local:/folder/file.txt`; internally the
//! prefix is parsed once into an [`Origin`] and the remainder into segments.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Serialize, Serializer};

use crate::error::{AppError, Result};

/// Which store a path belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// The hosted repository.
    Remote,
    /// The local workspace.
    Local,
}

impl Origin {
    /// Wire tag used in prefixed paths.
    pub fn tag(&self) -> &'static str {
        match self {
            Origin::Remote => "hs",
            Origin::Local => "local",
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "hs" => Ok(Origin::Remote),
            "local" => Ok(Origin::Local),
            other => Err(AppError::UnrecognizedPathPrefix(other.to_string())),
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A path inside one store, relative to the resource root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorePath {
    pub origin: Origin,
    pub segments: Vec<String>,
}

impl StorePath {
    /// The resource root of `origin`.
    pub fn root(origin: Origin) -> Self {
        Self {
            origin,
            segments: Vec::new(),
        }
    }

    /// Parse a prefixed path such as `hs:/a/b.txt`.
    pub fn parse(raw: &str) -> Result<Self> {
        let (tag, rest) = raw
            .split_once(':')
            .ok_or_else(|| AppError::UnrecognizedPathPrefix(String::new()))?;
        let origin = Origin::from_tag(tag)?;
        Self::relative(origin, rest)
    }

    /// Build a path from a store-relative string such as `a/b.txt` or `/a/b.txt`.
    pub fn relative(origin: Origin, raw: &str) -> Result<Self> {
        let mut segments = Vec::new();
        for segment in raw.split('/') {
            match segment {
                "" | "." => continue,
                ".." => return Err(AppError::InvalidPath(raw.to_string())),
                s => segments.push(s.to_string()),
            }
        }
        Ok(Self { origin, segments })
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Leaf name; empty for the root.
    pub fn name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or("")
    }

    pub fn parent(&self) -> Option<StorePath> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            origin: self.origin,
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    pub fn join(&self, name: &str) -> StorePath {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Self {
            origin: self.origin,
            segments,
        }
    }

    /// Whether `self` is `ancestor` or lies beneath it (same store only).
    pub fn starts_with(&self, ancestor: &StorePath) -> bool {
        self.origin == ancestor.origin && self.segments.starts_with(&ancestor.segments)
    }

    /// Segment-joined form without prefix or leading slash, e.g. `a/b.txt`.
    pub fn relative_str(&self) -> String {
        self.segments.join("/")
    }

    /// Same segments under another store.
    pub fn with_origin(&self, origin: Origin) -> StorePath {
        Self {
            origin,
            segments: self.segments.clone(),
        }
    }

    /// Resolve this path beneath a filesystem directory.
    pub fn to_fs_path(&self, base: &Path) -> PathBuf {
        let mut path = base.to_path_buf();
        for segment in &self.segments {
            path.push(segment);
        }
        path
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:/{}", self.origin.tag(), self.segments.join("/"))
    }
}

impl Serialize for StorePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_remote_and_local() {
        let p = StorePath::parse("hs:/a/b.txt").unwrap();
        assert_eq!(p.origin, Origin::Remote);
        assert_eq!(p.segments, vec!["a", "b.txt"]);

        let p = StorePath::parse("local:/x.txt").unwrap();
        assert_eq!(p.origin, Origin::Local);
        assert_eq!(p.name(), "x.txt");
    }

    #[test]
    fn parse_unknown_prefix_names_it() {
        match StorePath::parse("s3:/bucket/key") {
            Err(AppError::UnrecognizedPathPrefix(p)) => assert_eq!(p, "s3"),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(
            StorePath::parse("no-prefix/file"),
            Err(AppError::UnrecognizedPathPrefix(_))
        ));
    }

    #[test]
    fn relative_drops_empty_segments_and_rejects_parent() {
        let p = StorePath::relative(Origin::Local, "/a//b/").unwrap();
        assert_eq!(p.segments, vec!["a", "b"]);
        assert!(matches!(
            StorePath::relative(Origin::Local, "a/../../etc"),
            Err(AppError::InvalidPath(_))
        ));
    }

    #[test]
    fn display_roundtrips_through_parse() {
        let p = StorePath::parse("hs:/data.v2/file.csv").unwrap();
        assert_eq!(p.to_string(), "hs:/data.v2/file.csv");
        assert_eq!(StorePath::root(Origin::Local).to_string(), "local:/");
    }

    #[test]
    fn parent_join_and_prefix() {
        let p = StorePath::parse("hs:/a/b/c.txt").unwrap();
        let parent = p.parent().unwrap();
        assert_eq!(parent.relative_str(), "a/b");
        assert!(p.starts_with(&parent));
        assert!(!parent.starts_with(&p));
        assert_eq!(parent.join("d.txt").relative_str(), "a/b/d.txt");
        assert!(StorePath::root(Origin::Remote).parent().is_none());
        assert!(!p.starts_with(&p.with_origin(Origin::Local)));
    }

    #[test]
    fn fs_path_resolution() {
        let p = StorePath::parse("local:/a/b.txt").unwrap();
        assert_eq!(p.to_fs_path(Path::new("/data")), PathBuf::from("/data/a/b.txt"));
    }
}
