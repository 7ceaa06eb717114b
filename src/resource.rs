//! One resource seen from both stores.
//!
//! A [`Resource`] owns the cached remote and local trees of a single resource
//! and performs single-store mutations against them. Every mutation runs the
//! matching primitive, prunes ancestor folders the mutation emptied, and then
//! rebuilds the affected tree. Cross-store transfers live in
//! [`crate::transfer`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::fs::{build_local_tree, build_remote_tree, operations, TreeNode};
use crate::path::{Origin, StorePath};
use crate::remote::{RemoteError, RemoteStore};

/// Behaviour switches taken from the `[sync]` config section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceOptions {
    pub recursive_cleanup: bool,
    pub staging: bool,
    pub fetch_on_open: bool,
}

impl Default for ResourceOptions {
    fn default() -> Self {
        Self {
            recursive_cleanup: true,
            staging: true,
            fetch_on_open: false,
        }
    }
}

impl ResourceOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            recursive_cleanup: config.recursive_cleanup(),
            staging: config.staging(),
            fetch_on_open: config.fetch_on_open(),
        }
    }
}

/// Directory holding the local copy of a resource's files.
pub fn local_root_for(output_folder: &Path, res_id: &str) -> PathBuf {
    output_folder
        .join(res_id)
        .join(res_id)
        .join("data")
        .join("contents")
}

pub struct Resource {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) store: Arc<dyn RemoteStore>,
    pub(crate) local_root: PathBuf,
    pub(crate) options: ResourceOptions,
    pub(crate) remote_tree: TreeNode,
    pub(crate) local_tree: TreeNode,
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("local_root", &self.local_root)
            .finish_non_exhaustive()
    }
}

impl Resource {
    /// Open a resource and build both trees.
    ///
    /// The local root is created if this is the first local use, and with
    /// `fetch_on_open` the remote files are pulled into it.
    pub async fn open(
        id: &str,
        output_folder: &Path,
        store: Arc<dyn RemoteStore>,
        options: ResourceOptions,
    ) -> Result<Self> {
        if id.is_empty() {
            return Err(AppError::MissingResourceId);
        }
        let title = store.resource_title(id).await?;
        let first_use = !output_folder.join(id).exists();
        let mut resource = Self {
            id: id.to_string(),
            title,
            store,
            local_root: local_root_for(output_folder, id),
            options,
            remote_tree: TreeNode::empty_root(Origin::Remote),
            local_tree: TreeNode::empty_root(Origin::Local),
        };
        resource.refresh_local()?;
        resource.refresh_remote().await?;
        if first_use && options.fetch_on_open {
            resource.fetch_all_to_local().await?;
        }
        tracing::debug!(res_id = id, "opened resource");
        Ok(resource)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    /// The cached tree for `origin`. Never triggers a rebuild.
    pub fn tree(&self, origin: Origin) -> &TreeNode {
        match origin {
            Origin::Remote => &self.remote_tree,
            Origin::Local => &self.local_tree,
        }
    }

    /// Rebuild the tree for `origin`, replacing the cached one whole.
    pub async fn refresh(&mut self, origin: Origin) -> Result<()> {
        match origin {
            Origin::Remote => self.refresh_remote().await,
            Origin::Local => self.refresh_local(),
        }
    }

    pub(crate) async fn refresh_remote(&mut self) -> Result<()> {
        let objects = self.store.list_files(&self.id).await?;
        self.remote_tree = build_remote_tree(&objects, &self.store.contents_prefix(&self.id));
        Ok(())
    }

    pub(crate) fn refresh_local(&mut self) -> Result<()> {
        self.local_tree = build_local_tree(&self.local_root)?;
        Ok(())
    }

    /// Rename or move an entry within one store.
    ///
    /// Returns `false` without touching anything when `old` is not in the
    /// cached tree.
    pub async fn rename_or_move(&mut self, origin: Origin, old: &str, new: &str) -> Result<bool> {
        let from = required_path(origin, old, "old path")?;
        let to = required_path(origin, new, "new path")?;
        if self.tree(origin).lookup(&from).is_none() {
            tracing::info!(path = %from, "rename target does not exist, skipping");
            return Ok(false);
        }
        self.move_within(&from, &to).await?;
        Ok(true)
    }

    /// Move `from` to `to` inside `from`'s store, then prune and rebuild.
    pub(crate) async fn move_within(&mut self, from: &StorePath, to: &StorePath) -> Result<()> {
        check_disjoint(from, to)?;
        match from.origin {
            Origin::Remote => {
                self.ensure_remote_parent(to).await?;
                self.store
                    .move_or_rename(&self.id, &from.relative_str(), &to.relative_str())
                    .await?;
            }
            Origin::Local => {
                operations::rename(
                    &from.to_fs_path(&self.local_root),
                    &to.to_fs_path(&self.local_root),
                )?;
            }
        }
        tracing::info!(from = %from, to = %to, "moved");
        self.cleanup_ancestors(from, Some(to)).await?;
        self.refresh(from.origin).await
    }

    /// Delete a file or folder.
    ///
    /// A remote path missing from the cached tree is skipped (`Ok(false)`);
    /// a missing local path is `FileNotFound`.
    pub async fn delete(&mut self, origin: Origin, raw: &str) -> Result<bool> {
        let path = required_path(origin, raw, "path")?;
        match origin {
            Origin::Remote => {
                let is_folder = match self.remote_tree.lookup(&path) {
                    Some(node) => node.is_folder(),
                    None => {
                        tracing::info!(path = %path, "delete target does not exist, skipping");
                        return Ok(false);
                    }
                };
                self.delete_remote(&path, is_folder).await?;
            }
            Origin::Local => operations::delete(&path.to_fs_path(&self.local_root))?,
        }
        tracing::info!(path = %path, "deleted");
        self.cleanup_ancestors(&path, None).await?;
        self.refresh(origin).await?;
        Ok(true)
    }

    pub(crate) async fn delete_remote(&self, path: &StorePath, is_folder: bool) -> Result<()> {
        let rel = path.relative_str();
        if is_folder {
            self.store.delete_folder(&self.id, &rel).await?;
        } else {
            self.store.delete_file(&self.id, &rel).await?;
        }
        Ok(())
    }

    /// Create an empty local file. An existing file is left as is.
    pub fn create_file(&mut self, raw: &str) -> Result<()> {
        let path = required_path(Origin::Local, raw, "path")?;
        operations::create_file(&path.to_fs_path(&self.local_root))?;
        self.refresh_local()
    }

    /// Write a new local file holding `data`. An existing entry is never
    /// replaced.
    pub fn put_local_file(&mut self, raw: &str, data: &[u8]) -> Result<()> {
        let path = required_path(Origin::Local, raw, "path")?;
        operations::write_new(&path.to_fs_path(&self.local_root), data)?;
        tracing::info!(path = %path, bytes = data.len(), "wrote local file");
        self.refresh_local()
    }

    /// Download every remote file that has no local counterpart yet.
    ///
    /// Local entries are never overwritten. Returns the number of files
    /// fetched.
    pub async fn fetch_all_to_local(&mut self) -> Result<usize> {
        let missing: Vec<StorePath> = self
            .remote_tree
            .files()
            .into_iter()
            .map(|node| node.path.clone())
            .filter(|path| !self.exists(&path.with_origin(Origin::Local)))
            .collect();
        for path in &missing {
            let local = path.to_fs_path(&self.local_root);
            tracing::debug!(from = %path, to = %local.display(), "downloading");
            self.store
                .download_file(&self.id, &path.relative_str(), &local)
                .await?;
        }
        tracing::info!(res_id = %self.id, files = missing.len(), "fetched resource into local copy");
        self.refresh_local()?;
        Ok(missing.len())
    }

    /// Create a folder. Re-creating an existing folder is a no-op.
    pub async fn create_folder(&mut self, origin: Origin, raw: &str) -> Result<()> {
        let path = required_path(origin, raw, "path")?;
        match origin {
            Origin::Local => operations::create_dir(&path.to_fs_path(&self.local_root))?,
            Origin::Remote => {
                if self.remote_tree.lookup(&path).is_none() {
                    self.create_remote_folder(&path).await?;
                }
            }
        }
        self.refresh(origin).await
    }

    /// Make sure the remote folder holding `path` exists.
    pub(crate) async fn ensure_remote_parent(&self, path: &StorePath) -> Result<()> {
        match path.parent() {
            Some(parent) if !parent.is_root() && self.remote_tree.lookup(&parent).is_none() => {
                self.create_remote_folder(&parent).await
            }
            _ => Ok(()),
        }
    }

    /// Create a remote folder. Empty folders never show up in listings, so a
    /// rejected create is taken to mean the folder is already there.
    pub(crate) async fn create_remote_folder(&self, path: &StorePath) -> Result<()> {
        match self.store.create_folder(&self.id, &path.relative_str()).await {
            Ok(()) => Ok(()),
            Err(RemoteError::Status { status, body }) => {
                tracing::debug!(path = %path, status, body = %body, "remote folder create rejected");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove ancestors of `removed` that no longer hold any file.
    ///
    /// Walks upward from `removed`'s parent, stopping at the root, at the first
    /// ancestor still holding files, or at an ancestor of `keep` (the move
    /// destination). Only the immediate parent is checked unless recursive
    /// cleanup is on. Remote emptiness comes from the stale cached tree, with
    /// the removed child excluded; local emptiness comes from the disk.
    pub(crate) async fn cleanup_ancestors(
        &self,
        removed: &StorePath,
        keep: Option<&StorePath>,
    ) -> Result<()> {
        let mut child = removed.clone();
        while let Some(parent) = child.parent() {
            if parent.is_root() || keep.is_some_and(|k| k.starts_with(&parent)) {
                break;
            }
            let emptied = match parent.origin {
                Origin::Local => {
                    let dir = parent.to_fs_path(&self.local_root);
                    dir.is_dir() && operations::holds_no_files(&dir)?
                }
                Origin::Remote => match self.remote_tree.lookup(&parent) {
                    Some(node) => node.contents.iter().all(|c| c.name == child.name()),
                    None => false,
                },
            };
            if !emptied {
                break;
            }
            match parent.origin {
                Origin::Local => operations::delete(&parent.to_fs_path(&self.local_root))?,
                Origin::Remote => match self.store.delete_folder(&self.id, &parent.relative_str()).await {
                    Ok(()) | Err(RemoteError::NotFound(_)) => {}
                    Err(e) => return Err(e.into()),
                },
            }
            tracing::debug!(path = %parent, "removed emptied folder");
            if !self.options.recursive_cleanup {
                break;
            }
            child = parent;
        }
        Ok(())
    }

    /// Whether `path` currently exists: on disk for local paths, in the cached
    /// tree for remote ones.
    pub(crate) fn exists(&self, path: &StorePath) -> bool {
        match path.origin {
            Origin::Local => std::fs::symlink_metadata(path.to_fs_path(&self.local_root)).is_ok(),
            Origin::Remote => self.remote_tree.lookup(path).is_some(),
        }
    }
}

/// Refuse a move onto itself, into its own subtree or onto one of its
/// ancestors.
pub(crate) fn check_disjoint(from: &StorePath, to: &StorePath) -> Result<()> {
    if to.starts_with(from) || from.starts_with(to) {
        return Err(AppError::InvalidPath(format!(
            "cannot move {} onto or into itself ({})",
            from, to
        )));
    }
    Ok(())
}

/// Parse a store-relative path that must not be the root.
pub(crate) fn required_path(origin: Origin, raw: &str, field: &str) -> Result<StorePath> {
    let path = StorePath::relative(origin, raw)?;
    if path.is_root() {
        return Err(AppError::MissingInput(field.to_string()));
    }
    Ok(path)
}
