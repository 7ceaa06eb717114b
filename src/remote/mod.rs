//! The remote store boundary.
//!
//! [`RemoteStore`] is the seam between the engine and the hosted repository.
//! [`client::HydroShareClient`] talks to the real REST API;
//! [`memory::MemoryStore`] keeps everything in process.

pub mod client;
pub mod memory;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use client::{Credentials, HydroShareClient};
pub use memory::MemoryStore;

/// Errors reported by a remote store.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The store rejected our credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The addressed resource, file or folder does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A local file to upload does not exist.
    #[error("local source missing: {0}")]
    MissingSource(String),

    /// Any other non-success response.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Transport-level failure.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A response body that did not have the expected shape.
    #[error("unexpected response: {0}")]
    Decode(String),

    /// Local I/O while staging an upload or writing a download.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors acquiring credentials for the remote store.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no {field} configured (set remote.{field} or {env})")]
    Missing {
        field: &'static str,
        env: &'static str,
    },
}

/// One entry of a resource's flat file listing.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteObject {
    pub url: String,
    pub size: u64,
    pub modified_time: Option<DateTime<Utc>>,
}

/// A resource as described by the remote store's resource listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteResourceInfo {
    pub resource_id: String,
    pub resource_title: String,
    /// Remaining descriptor fields (privacy, creator, dates, ...), passed through.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The authenticated user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Metadata for a resource to create.
#[derive(Debug, Clone, PartialEq)]
pub struct NewResource {
    pub title: String,
    pub creators: Vec<String>,
}

/// Single-object operations on the remote store.
///
/// Paths are store-relative (`folder/file.txt`, no leading slash). Each call
/// either completes or leaves the store unchanged.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// URL prefix preceding file paths in [`RemoteStore::list_files`] results.
    fn contents_prefix(&self, res_id: &str) -> String;

    async fn user_info(&self) -> RemoteResult<UserInfo>;

    /// Resources owned by the authenticated user.
    async fn list_resources(&self) -> RemoteResult<Vec<RemoteResourceInfo>>;

    async fn list_files(&self, res_id: &str) -> RemoteResult<Vec<RemoteObject>>;

    /// Create a folder and any missing ancestors.
    async fn create_folder(&self, res_id: &str, path: &str) -> RemoteResult<()>;

    async fn delete_file(&self, res_id: &str, path: &str) -> RemoteResult<()>;

    /// Delete a folder and everything beneath it.
    async fn delete_folder(&self, res_id: &str, path: &str) -> RemoteResult<()>;

    async fn move_or_rename(&self, res_id: &str, from: &str, to: &str) -> RemoteResult<()>;

    /// Upload `local` so that it appears at `dest`.
    async fn upload_file(&self, res_id: &str, local: &Path, dest: &str) -> RemoteResult<()>;

    /// Download the file at `path` into the local file `dest`, creating its parents.
    async fn download_file(&self, res_id: &str, path: &str, dest: &Path) -> RemoteResult<()>;

    /// Create a resource and return its id.
    async fn create_resource(&self, new: &NewResource) -> RemoteResult<String>;

    /// Copy a resource server-side and return the new id.
    async fn copy_resource(&self, res_id: &str) -> RemoteResult<String>;

    async fn resource_title(&self, res_id: &str) -> RemoteResult<String>;

    async fn set_resource_title(&self, res_id: &str, title: &str) -> RemoteResult<()>;
}
