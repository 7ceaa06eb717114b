//! Builds a resource tree from the remote store's flat object listing.
//!
//! The remote store has no directory objects: a folder exists only because
//! some object's path runs through it. Listing paths are grouped by parent
//! path first, then folders are materialized recursively from the root.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use indexmap::IndexSet;

use crate::fs::tree::TreeNode;
use crate::path::{Origin, StorePath};
use crate::remote::RemoteObject;

/// Path marker that precedes a resource's file paths in object URLs.
const CONTENTS_MARKER: &str = "/data/contents/";

/// Derive the store-relative path of an object URL.
///
/// Strips `url_prefix` when present, otherwise everything up to the
/// `/data/contents/` marker. The result is percent-decoded.
pub fn relative_path(url: &str, url_prefix: &str) -> Option<String> {
    let prefix = url_prefix.trim_end_matches('/');
    let rest = match url.strip_prefix(prefix) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => {
            let idx = url.find(CONTENTS_MARKER)?;
            &url[idx + CONTENTS_MARKER.len() - 1..]
        }
    };
    let rest = rest.trim_matches('/');
    if rest.is_empty() {
        return None;
    }
    match urlencoding::decode(rest) {
        Ok(decoded) => Some(decoded.into_owned()),
        Err(_) => Some(rest.to_string()),
    }
}

/// Flat listing grouped by parent path.
#[derive(Default)]
struct Listing {
    /// Parent path ("" for the root) to child names, in first-seen order.
    children: HashMap<String, IndexSet<String>>,
    /// Full path of each listed object to its size and modification time.
    files: HashMap<String, (u64, Option<DateTime<Utc>>)>,
}

impl Listing {
    fn add(&mut self, segments: &[&str], size: u64, modified: Option<DateTime<Utc>>) {
        let mut key = String::new();
        for segment in segments {
            self.children
                .entry(key.clone())
                .or_default()
                .insert(segment.to_string());
            if !key.is_empty() {
                key.push('/');
            }
            key.push_str(segment);
        }
        self.files.insert(key, (size, modified));
    }

    fn materialize(&self, key: &str, path: StorePath) -> TreeNode {
        let mut contents = Vec::new();
        if let Some(names) = self.children.get(key) {
            for name in names {
                let child_key = if key.is_empty() {
                    name.clone()
                } else {
                    format!("{}/{}", key, name)
                };
                let child_path = path.join(name);
                // Having descendants wins over being listed as an object.
                if self.children.contains_key(&child_key) {
                    if self.files.contains_key(&child_key) {
                        tracing::warn!(
                            path = %child_path,
                            "remote object shadowed by folder of the same path"
                        );
                    }
                    contents.push(self.materialize(&child_key, child_path));
                } else if let Some((size, modified)) = self.files.get(&child_key) {
                    contents.push(TreeNode::file(child_path, *size, *modified));
                }
            }
        }
        TreeNode::folder(path, contents)
    }
}

/// Build the remote tree for one resource.
///
/// `url_prefix` is the contents URL of the resource
/// (`.../resource/<id>/data/contents`). Objects whose URL yields no path are
/// skipped.
pub fn build_remote_tree(objects: &[RemoteObject], url_prefix: &str) -> TreeNode {
    let mut listing = Listing::default();
    for object in objects {
        let Some(rel) = relative_path(&object.url, url_prefix) else {
            tracing::warn!(url = %object.url, "skipping remote object outside resource contents");
            continue;
        };
        let segments: Vec<&str> = rel.split('/').filter(|s| !s.is_empty()).collect();
        listing.add(&segments, object.size, object.modified_time);
    }
    tracing::debug!(
        objects = objects.len(),
        folders = listing.children.len().saturating_sub(1),
        "built remote tree"
    );
    listing.materialize("", StorePath::root(Origin::Remote))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const PREFIX: &str = "http://www.hydroshare.org/resource/abc123/data/contents";

    fn obj(path: &str, size: u64) -> RemoteObject {
        RemoteObject {
            url: format!("{}/{}", PREFIX, path),
            size,
            modified_time: None,
        }
    }

    fn names(node: &TreeNode) -> Vec<&str> {
        node.contents.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn nested_listing_builds_hierarchy() {
        let tree = build_remote_tree(&[obj("a/b/c.txt", 10), obj("a/d.txt", 5)], PREFIX);
        assert_eq!(tree.name, "");
        assert_eq!(tree.path.to_string(), "hs:/");
        assert_eq!(tree.size_bytes, 15);
        assert_eq!(names(&tree), vec!["a"]);

        let a = &tree.contents[0];
        assert!(a.is_folder());
        assert_eq!(a.size_bytes, 15);
        assert_eq!(names(a), vec!["b", "d.txt"]);

        let b = &a.contents[0];
        assert!(b.is_folder());
        assert_eq!(b.size_bytes, 10);
        let c = &b.contents[0];
        assert_eq!(c.name, "c.txt");
        assert_eq!(c.type_tag(), "txt");
        assert_eq!(c.size_bytes, 10);
        assert_eq!(c.path.to_string(), "hs:/a/b/c.txt");

        let d = &a.contents[1];
        assert_eq!(d.type_tag(), "txt");
        assert_eq!(d.size_bytes, 5);
        assert!(tree.sizes_consistent());
    }

    #[test]
    fn dotted_folder_with_descendants_is_a_folder() {
        let tree = build_remote_tree(&[obj("data.v2/x.csv", 4)], PREFIX);
        let folder = &tree.contents[0];
        assert_eq!(folder.name, "data.v2");
        assert_eq!(folder.type_tag(), "folder");
        assert_eq!(folder.contents[0].type_tag(), "csv");
    }

    #[test]
    fn root_files_and_folders_mix() {
        let tree = build_remote_tree(
            &[obj("readme.md", 2), obj("Makefile", 3), obj("src/main.py", 8)],
            PREFIX,
        );
        assert_eq!(names(&tree), vec!["src", "Makefile", "readme.md"]);
        assert_eq!(tree.size_bytes, 13);
        assert_eq!(tree.contents[1].type_tag(), "file");
    }

    #[test]
    fn folder_time_is_latest_descendant() {
        let t1 = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap();
        let mut first = obj("a/x.txt", 1);
        first.modified_time = Some(t1);
        let mut second = obj("a/b/y.txt", 1);
        second.modified_time = Some(t2);
        let tree = build_remote_tree(&[first, second, obj("a/z.txt", 1)], PREFIX);
        assert_eq!(tree.contents[0].modified_time, Some(t2));
        assert_eq!(tree.modified_time, Some(t2));
    }

    #[test]
    fn object_shadowed_by_folder_is_dropped() {
        let tree = build_remote_tree(&[obj("a", 9), obj("a/b.txt", 1)], PREFIX);
        assert_eq!(tree.contents.len(), 1);
        assert!(tree.contents[0].is_folder());
        assert_eq!(tree.size_bytes, 1);
    }

    #[test]
    fn empty_listing_gives_empty_root() {
        let tree = build_remote_tree(&[], PREFIX);
        assert!(tree.contents.is_empty());
        assert_eq!(tree.size_bytes, 0);
        assert!(tree.modified_time.is_none());
    }

    #[test]
    fn relative_path_strips_prefix_and_decodes() {
        assert_eq!(
            relative_path(&format!("{}/my%20data/f.txt", PREFIX), PREFIX).as_deref(),
            Some("my data/f.txt")
        );
        // Host differs from the configured prefix; fall back to the marker.
        assert_eq!(
            relative_path(
                "https://beta.hydroshare.org/resource/abc123/data/contents/x/y.nc",
                PREFIX
            )
            .as_deref(),
            Some("x/y.nc")
        );
        assert_eq!(relative_path("https://elsewhere.org/file", PREFIX), None);
        assert_eq!(relative_path(PREFIX, PREFIX), None);
    }
}
