use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::path::{Origin, StorePath};

/// Type tag of a leaf without a usable extension.
pub const PLAIN_FILE_TYPE: &str = "file";

/// Whether a node is a folder or a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Folder,
    /// A file with its type tag (extension, or `"file"`).
    File(String),
}

/// A node in a resource tree, uniform across both stores.
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub name: String,
    pub path: StorePath,
    pub size_bytes: u64,
    pub modified_time: Option<DateTime<Utc>>,
    pub kind: NodeKind,
    /// Children; always empty for files.
    pub contents: Vec<TreeNode>,
}

impl TreeNode {
    /// Create a file leaf. The type tag comes from the leaf name.
    pub fn file(path: StorePath, size_bytes: u64, modified_time: Option<DateTime<Utc>>) -> Self {
        let name = path.name().to_string();
        let kind = NodeKind::File(file_type_of(&name));
        Self {
            name,
            path,
            size_bytes,
            modified_time,
            kind,
            contents: Vec::new(),
        }
    }

    /// Create a folder from its children, aggregating size and modification time.
    pub fn folder(path: StorePath, mut contents: Vec<TreeNode>) -> Self {
        sort_children(&mut contents);
        let size_bytes = contents.iter().map(|c| c.size_bytes).sum();
        let modified_time = contents.iter().filter_map(|c| c.modified_time).max();
        Self {
            name: path.name().to_string(),
            path,
            size_bytes,
            modified_time,
            kind: NodeKind::Folder,
            contents,
        }
    }

    /// An empty root for `origin`.
    pub fn empty_root(origin: Origin) -> Self {
        Self::folder(StorePath::root(origin), Vec::new())
    }

    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }

    /// The `type` tag: `"folder"` or the file's type.
    pub fn type_tag(&self) -> &str {
        match &self.kind {
            NodeKind::Folder => "folder",
            NodeKind::File(t) => t,
        }
    }

    /// Look up a descendant by segments relative to this node.
    pub fn find(&self, segments: &[String]) -> Option<&TreeNode> {
        let mut node = self;
        for segment in segments {
            node = node.contents.iter().find(|c| &c.name == segment)?;
        }
        Some(node)
    }

    /// Look up a node by store path; `None` if the path belongs to another store.
    pub fn lookup(&self, path: &StorePath) -> Option<&TreeNode> {
        if path.origin != self.path.origin {
            return None;
        }
        self.find(&path.segments)
    }

    /// Every file beneath (or equal to) this node, depth first.
    pub fn files(&self) -> Vec<&TreeNode> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if node.is_folder() {
                stack.extend(node.contents.iter().rev());
            } else {
                out.push(node);
            }
        }
        out
    }

    /// Whether every folder's size equals the sum of its children.
    pub fn sizes_consistent(&self) -> bool {
        if !self.is_folder() {
            return self.contents.is_empty();
        }
        let sum: u64 = self.contents.iter().map(|c| c.size_bytes).sum();
        sum == self.size_bytes && self.contents.iter().all(|c| c.sizes_consistent())
    }
}

/// Derive a file's type tag from its leaf name.
///
/// The text after the last `.` is the type; names without one, and dot-files
/// such as `.gitignore`, are plain `"file"`.
pub fn file_type_of(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext.to_string(),
        _ => PLAIN_FILE_TYPE.to_string(),
    }
}

/// Folders first, then case-insensitive name.
pub fn sort_children(children: &mut [TreeNode]) {
    children.sort_by(|a, b| {
        b.is_folder()
            .cmp(&a.is_folder())
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
            .then_with(|| a.name.cmp(&b.name))
    });
}

impl Serialize for TreeNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut fields = 4;
        if self.modified_time.is_some() {
            fields += 1;
        }
        if self.is_folder() {
            fields += 1;
        }
        let mut s = serializer.serialize_struct("TreeNode", fields)?;
        s.serialize_field("name", &self.name)?;
        s.serialize_field("path", &self.path)?;
        s.serialize_field("sizeBytes", &self.size_bytes)?;
        if let Some(modified) = &self.modified_time {
            s.serialize_field("modifiedTime", modified)?;
        }
        s.serialize_field("type", self.type_tag())?;
        if self.is_folder() {
            s.serialize_field("contents", &self.contents)?;
        }
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn p(raw: &str) -> StorePath {
        StorePath::parse(raw).unwrap()
    }

    fn sample() -> TreeNode {
        let t1 = Utc.with_ymd_and_hms(2021, 3, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2022, 7, 9, 12, 0, 0).unwrap();
        let inner = TreeNode::folder(
            p("hs:/a"),
            vec![
                TreeNode::file(p("hs:/a/z.csv"), 7, Some(t1)),
                TreeNode::file(p("hs:/a/B.txt"), 3, Some(t2)),
            ],
        );
        TreeNode::folder(
            StorePath::root(Origin::Remote),
            vec![TreeNode::file(p("hs:/README"), 5, None), inner],
        )
    }

    #[test]
    fn file_type_from_extension() {
        assert_eq!(file_type_of("c.txt"), "txt");
        assert_eq!(file_type_of("archive.tar.gz"), "gz");
        assert_eq!(file_type_of("Makefile"), "file");
        assert_eq!(file_type_of(".gitignore"), "file");
        assert_eq!(file_type_of("trailing."), "file");
    }

    #[test]
    fn folder_aggregates_size_and_time() {
        let root = sample();
        assert_eq!(root.size_bytes, 15);
        let a = root.find(&["a".to_string()]).unwrap();
        assert_eq!(a.size_bytes, 10);
        assert_eq!(
            a.modified_time,
            Some(Utc.with_ymd_and_hms(2022, 7, 9, 12, 0, 0).unwrap())
        );
        assert!(root.sizes_consistent());
    }

    #[test]
    fn folder_without_timestamps_has_none() {
        let f = TreeNode::folder(p("local:/x"), vec![TreeNode::file(p("local:/x/y"), 1, None)]);
        assert!(f.modified_time.is_none());
    }

    #[test]
    fn children_sorted_folders_first_then_name() {
        let root = sample();
        let names: Vec<&str> = root.contents.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "README"]);
        let a = &root.contents[0];
        let names: Vec<&str> = a.contents.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["B.txt", "z.csv"]);
    }

    #[test]
    fn lookup_respects_origin() {
        let root = sample();
        assert!(root.lookup(&p("hs:/a/z.csv")).is_some());
        assert!(root.lookup(&p("local:/a/z.csv")).is_none());
        assert!(root.lookup(&p("hs:/a/missing")).is_none());
        assert!(root.lookup(&p("hs:/")).unwrap().is_folder());
    }

    #[test]
    fn files_lists_leaves_in_order() {
        let root = sample();
        let paths: Vec<String> = root.files().iter().map(|f| f.path.to_string()).collect();
        assert_eq!(paths, vec!["hs:/a/B.txt", "hs:/a/z.csv", "hs:/README"]);
    }

    #[test]
    fn serializes_wire_shape() {
        let root = sample();
        let json = serde_json::to_value(&root).unwrap();
        assert_eq!(json["name"], "");
        assert_eq!(json["path"], "hs:/");
        assert_eq!(json["type"], "folder");
        assert_eq!(json["sizeBytes"], 15);
        let readme = &json["contents"][1];
        assert_eq!(readme["type"], "file");
        assert!(readme.get("contents").is_none());
        assert!(readme.get("modifiedTime").is_none());
        assert_eq!(json["contents"][0]["contents"][1]["path"], "hs:/a/z.csv");
    }
}
