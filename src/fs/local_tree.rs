use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::fs::tree::TreeNode;
use crate::path::{Origin, StorePath};

/// Build the local tree rooted at `root`, creating `root` first if absent.
///
/// Symlinks and entries that cannot be read are skipped.
pub fn build_local_tree(root: &Path) -> Result<TreeNode> {
    if !root.exists() {
        tracing::info!(root = %root.display(), "creating local resource directory");
        fs::create_dir_all(root)?;
    }
    load_folder(root, StorePath::root(Origin::Local))
}

fn load_folder(dir: &Path, path: StorePath) -> Result<TreeNode> {
    let mut contents = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        let name = entry.file_name().to_string_lossy().to_string();
        let metadata = match fs::symlink_metadata(entry.path()) {
            Ok(m) => m,
            Err(_) => continue,
        };
        let child_path = path.join(&name);
        if metadata.is_symlink() {
            tracing::debug!(path = %child_path, "skipping symlink");
            continue;
        }
        if metadata.is_dir() {
            match load_folder(&entry.path(), child_path) {
                Ok(node) => contents.push(node),
                Err(e) => tracing::warn!(error = %e, "skipping unreadable folder"),
            }
        } else {
            let modified = metadata.modified().ok().map(DateTime::<Utc>::from);
            contents.push(TreeNode::file(child_path, metadata.len(), modified));
        }
    }
    Ok(TreeNode::folder(path, contents))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use tempfile::TempDir;

    fn setup_test_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("alpha")).unwrap();
        fs::create_dir(dir.path().join("beta")).unwrap();
        fs::write(dir.path().join("file_a.txt"), "hello").unwrap();
        File::create(dir.path().join("Makefile")).unwrap();
        fs::create_dir(dir.path().join("alpha").join("nested")).unwrap();
        fs::write(dir.path().join("alpha").join("inner.csv"), "1,2,3").unwrap();
        dir
    }

    #[test]
    fn builds_root_with_sorted_children() {
        let dir = setup_test_dir();
        let tree = build_local_tree(dir.path()).unwrap();
        assert_eq!(tree.name, "");
        assert_eq!(tree.path.to_string(), "local:/");
        let names: Vec<&str> = tree.contents.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta", "file_a.txt", "Makefile"]);
    }

    #[test]
    fn sizes_aggregate_from_files() {
        let dir = setup_test_dir();
        let tree = build_local_tree(dir.path()).unwrap();
        assert_eq!(tree.size_bytes, 10);
        let alpha = tree.find(&["alpha".to_string()]).unwrap();
        assert_eq!(alpha.size_bytes, 5);
        assert!(tree.sizes_consistent());
    }

    #[test]
    fn types_and_paths() {
        let dir = setup_test_dir();
        let tree = build_local_tree(dir.path()).unwrap();
        let inner = tree
            .find(&["alpha".to_string(), "inner.csv".to_string()])
            .unwrap();
        assert_eq!(inner.type_tag(), "csv");
        assert_eq!(inner.path.to_string(), "local:/alpha/inner.csv");
        assert!(inner.modified_time.is_some());

        let nested = tree.find(&["alpha".to_string(), "nested".to_string()]).unwrap();
        assert!(nested.is_folder());
        assert!(nested.contents.is_empty());
        assert!(nested.modified_time.is_none());
        assert_eq!(
            tree.find(&["Makefile".to_string()]).unwrap().type_tag(),
            "file"
        );
    }

    #[test]
    fn creates_missing_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("res").join("res").join("data").join("contents");
        let tree = build_local_tree(&root).unwrap();
        assert!(root.is_dir());
        assert!(tree.contents.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_skipped() {
        let dir = setup_test_dir();
        std::os::unix::fs::symlink(
            dir.path().join("file_a.txt"),
            dir.path().join("link.txt"),
        )
        .unwrap();
        let tree = build_local_tree(dir.path()).unwrap();
        assert!(tree.find(&["link.txt".to_string()]).is_none());
    }
}
