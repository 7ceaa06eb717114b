//! Moves and copies between stores.
//!
//! A transfer names its endpoints with prefixed paths (`hs:/a.txt`,
//! `local:/b/a.txt`) and is dispatched on the pair of stores involved:
//!
//! | source | destination | behaviour |
//! |--------|-------------|-----------|
//! | remote | remote | move = rename; copy is not implemented |
//! | local  | local  | move = rename; copy is not implemented |
//! | local  | remote | upload, then delete the source on move |
//! | remote | local  | download (staged), then delete the source on move |
//!
//! Batches run in order and every item reports on its own.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::fs::{operations, TreeNode};
use crate::path::{Origin, StorePath};
use crate::resource::{check_disjoint, Resource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMethod {
    Move,
    Copy,
}

impl TransferMethod {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "move" => Ok(TransferMethod::Move),
            "copy" => Ok(TransferMethod::Copy),
            other => Err(AppError::IncorrectType(format!(
                "method must be \"move\" or \"copy\", got {:?}",
                other
            ))),
        }
    }

    fn past_tense(&self) -> &'static str {
        match self {
            TransferMethod::Move => "Moved",
            TransferMethod::Copy => "Copied",
        }
    }
}

/// One requested transfer. Endpoints stay unparsed so that a bad prefix
/// fails only this item.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferOp {
    pub method: TransferMethod,
    pub source: String,
    pub destination: String,
    pub force: bool,
}

/// Outcome of one batch item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Ordered per-item results plus totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub results: Vec<TransferResult>,
    pub success_count: usize,
    pub failure_count: usize,
}

impl BatchReport {
    /// Record the next item's outcome. Failures are logged, never raised.
    pub fn push(&mut self, outcome: Result<String>) {
        match outcome {
            Ok(message) => {
                self.success_count += 1;
                self.results.push(TransferResult {
                    success: true,
                    error: None,
                    message: Some(message),
                });
            }
            Err(e) => {
                tracing::warn!(item = self.results.len(), error = %e, "transfer failed");
                self.failure_count += 1;
                self.results.push(TransferResult {
                    success: false,
                    error: Some(e.kind().as_str().to_string()),
                    message: Some(e.to_string()),
                });
            }
        }
    }
}

/// Parse both endpoints, naming every unrecognized prefix at once.
fn parse_endpoints(op: &TransferOp) -> Result<(StorePath, StorePath)> {
    match (StorePath::parse(&op.source), StorePath::parse(&op.destination)) {
        (Ok(src), Ok(dst)) => {
            if src.is_root() {
                return Err(AppError::MissingInput("source".into()));
            }
            if dst.is_root() {
                return Err(AppError::MissingInput("destination".into()));
            }
            Ok((src, dst))
        }
        (
            Err(AppError::UnrecognizedPathPrefix(a)),
            Err(AppError::UnrecognizedPathPrefix(b)),
        ) => Err(AppError::UnrecognizedPathPrefix(format!("{}, {}", a, b))),
        (Err(e), _) | (_, Err(e)) => Err(e),
    }
}

/// Re-anchor `path`, which lies beneath `from`, beneath `to`.
fn rebase(path: &StorePath, from: &StorePath, to: &StorePath) -> StorePath {
    let mut segments = to.segments.clone();
    segments.extend_from_slice(&path.segments[from.segments.len()..]);
    StorePath {
        origin: to.origin,
        segments,
    }
}

/// `base` joined with the part of `path` below `root`.
fn beneath(base: &Path, path: &StorePath, root: &StorePath) -> PathBuf {
    let mut out = base.to_path_buf();
    for segment in &path.segments[root.segments.len()..] {
        out.push(segment);
    }
    out
}

/// Every folder at or below `node`, parents before children.
fn folders_of(node: &TreeNode) -> Vec<StorePath> {
    let mut out = Vec::new();
    if node.is_folder() {
        out.push(node.path.clone());
        for child in &node.contents {
            out.extend(folders_of(child));
        }
    }
    out
}

impl Resource {
    /// Run one transfer, returning a human-readable summary.
    pub async fn transfer(&mut self, op: &TransferOp) -> Result<String> {
        let (src, dst) = parse_endpoints(op)?;
        match (src.origin, dst.origin) {
            (Origin::Local, Origin::Remote) => self.upload(&src, &dst, op).await?,
            (Origin::Remote, Origin::Local) => self.download(&src, &dst, op).await?,
            _ => self.transfer_within(&src, &dst, op).await?,
        }
        Ok(format!("{} {} to {}", op.method.past_tense(), src, dst))
    }

    /// Run transfers in order; each item succeeds or fails on its own.
    pub async fn transfer_batch(&mut self, ops: &[TransferOp]) -> BatchReport {
        let mut report = BatchReport::default();
        for op in ops {
            report.push(self.transfer(op).await);
        }
        report
    }

    /// Replace the remote copy of `raw` with the local one.
    pub async fn overwrite_remote_with_local(&mut self, raw: &str) -> Result<String> {
        let path = crate::resource::required_path(Origin::Local, raw, "path")?;
        self.transfer(&TransferOp {
            method: TransferMethod::Copy,
            source: path.to_string(),
            destination: path.with_origin(Origin::Remote).to_string(),
            force: true,
        })
        .await
    }

    /// Replace the local copy of `raw` with the remote one.
    pub async fn overwrite_local_with_remote(&mut self, raw: &str) -> Result<String> {
        let path = crate::resource::required_path(Origin::Remote, raw, "path")?;
        self.transfer(&TransferOp {
            method: TransferMethod::Copy,
            source: path.to_string(),
            destination: path.with_origin(Origin::Local).to_string(),
            force: true,
        })
        .await
    }

    async fn transfer_within(&mut self, src: &StorePath, dst: &StorePath, op: &TransferOp) -> Result<()> {
        if op.method == TransferMethod::Copy {
            return Err(AppError::NotImplemented(format!(
                "copy within the {} store",
                src.origin
            )));
        }
        if !self.exists(src) {
            return Err(AppError::FileNotFound(src.to_string()));
        }
        check_disjoint(src, dst)?;
        if self.exists(dst) {
            self.clear_destination(dst, op.force).await?;
        }
        self.move_within(src, dst).await
    }

    /// Remove an existing destination, or refuse when `force` is off.
    async fn clear_destination(&mut self, dst: &StorePath, force: bool) -> Result<()> {
        if !force {
            return Err(AppError::AlreadyExists(dst.to_string()));
        }
        tracing::info!(path = %dst, "replacing existing destination");
        match dst.origin {
            Origin::Local => operations::delete(&dst.to_fs_path(&self.local_root)),
            Origin::Remote => {
                let is_folder = self
                    .remote_tree
                    .lookup(dst)
                    .is_some_and(TreeNode::is_folder);
                self.delete_remote(dst, is_folder).await?;
                self.refresh_remote().await
            }
        }
    }

    async fn upload(&mut self, src: &StorePath, dst: &StorePath, op: &TransferOp) -> Result<()> {
        self.refresh_local()?;
        let node = self
            .local_tree
            .lookup(src)
            .cloned()
            .ok_or_else(|| AppError::FileNotFound(src.to_string()))?;
        let replaced = match self.remote_tree.lookup(dst) {
            Some(_) if !op.force => return Err(AppError::AlreadyExists(dst.to_string())),
            Some(existing) => Some(existing.is_folder()),
            None => None,
        };

        // An existing destination is only removed once the new copy is
        // fully uploaded beside it.
        let target = match replaced {
            Some(_) => self.unused_remote_sibling(dst),
            None => dst.clone(),
        };
        if let Err(e) = self.upload_node(&node, src, &target).await {
            if replaced.is_some() {
                self.discard_remote(&target, node.is_folder()).await;
            }
            return Err(e);
        }
        if let Some(was_folder) = replaced {
            tracing::info!(path = %dst, "replacing existing destination");
            self.delete_remote(dst, was_folder).await?;
            self.store
                .move_or_rename(&self.id, &target.relative_str(), &dst.relative_str())
                .await?;
        }

        if op.method == TransferMethod::Move {
            operations::delete(&src.to_fs_path(&self.local_root))?;
            self.cleanup_ancestors(src, None).await?;
        }
        self.refresh_local()?;
        self.refresh_remote().await
    }

    /// Upload every file at or below `node` (rooted at `src`) to `target`,
    /// creating remote folders on the way.
    async fn upload_node(&self, node: &TreeNode, src: &StorePath, target: &StorePath) -> Result<()> {
        let mut created = HashSet::new();
        for folder in folders_of(node) {
            let remote = rebase(&folder, src, target);
            if self.remote_tree.lookup(&remote).is_none() {
                self.create_remote_folder(&remote).await?;
            }
            created.insert(remote);
        }
        for file in node.files() {
            let remote = rebase(&file.path, src, target);
            if let Some(parent) = remote.parent() {
                if !parent.is_root()
                    && !created.contains(&parent)
                    && self.remote_tree.lookup(&parent).is_none()
                {
                    self.create_remote_folder(&parent).await?;
                    created.insert(parent);
                }
            }
            let local = file.path.to_fs_path(&self.local_root);
            tracing::debug!(from = %file.path, to = %remote, "uploading");
            self.store
                .upload_file(&self.id, &local, &remote.relative_str())
                .await?;
        }
        Ok(())
    }

    /// A name beside `path` that the remote tree does not use yet.
    fn unused_remote_sibling(&self, path: &StorePath) -> StorePath {
        let parent = path.parent().unwrap_or_else(|| StorePath::root(path.origin));
        let mut candidate = parent.join(&format!(".{}.part", path.name()));
        let mut n = 1;
        while self.remote_tree.lookup(&candidate).is_some() {
            candidate = parent.join(&format!(".{}.part{}", path.name(), n));
            n += 1;
        }
        candidate
    }

    /// Best-effort removal of a partial upload.
    async fn discard_remote(&self, path: &StorePath, is_folder: bool) {
        if let Err(e) = self.delete_remote(path, is_folder).await {
            tracing::debug!(path = %path, error = %e, "nothing to discard after failed upload");
        }
    }

    async fn download(&mut self, src: &StorePath, dst: &StorePath, op: &TransferOp) -> Result<()> {
        let node = self
            .remote_tree
            .lookup(src)
            .cloned()
            .ok_or_else(|| AppError::FileNotFound(src.to_string()))?;
        let dest = dst.to_fs_path(&self.local_root);
        let dest_exists = self.exists(dst);
        if dest_exists && !op.force {
            return Err(AppError::AlreadyExists(dst.to_string()));
        }

        // Replacing an existing entry always goes through staging.
        if self.options.staging || dest_exists {
            let staging = operations::unused_staging_dir(&self.staging_base());
            let staged = staging.join(dst.name());
            let fetched = self.fetch_into(&node, src, &staged).await;
            let placed = fetched.and_then(|()| operations::replace_from_staging(&staged, &dest));
            if staging.exists() {
                if let Err(e) = std::fs::remove_dir_all(&staging) {
                    tracing::warn!(path = %staging.display(), error = %e, "could not remove staging folder");
                }
            }
            placed?;
        } else {
            self.fetch_into(&node, src, &dest).await?;
        }

        if op.method == TransferMethod::Move {
            self.delete_remote(src, node.is_folder()).await?;
            self.cleanup_ancestors(src, None).await?;
        }
        self.refresh_local()?;
        self.refresh_remote().await
    }

    /// Download every file at or below `node` into `target`, keeping layout.
    async fn fetch_into(&self, node: &TreeNode, src: &StorePath, target: &Path) -> Result<()> {
        for file in node.files() {
            let local = beneath(target, &file.path, src);
            tracing::debug!(from = %file.path, to = %local.display(), "downloading");
            self.store
                .download_file(&self.id, &file.path.relative_str(), &local)
                .await?;
        }
        Ok(())
    }

    /// Scratch space sits beside the contents folder, outside both trees.
    fn staging_base(&self) -> PathBuf {
        self.local_root
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.local_root.clone())
    }
}
