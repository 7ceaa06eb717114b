//! The session-wide directory of resources.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, OnceCell};

use crate::error::{AppError, Result};
use crate::fs::operations;
use crate::path::Origin;
use crate::remote::{NewResource, RemoteResourceInfo, RemoteStore, UserInfo};
use crate::resource::{Resource, ResourceOptions};

/// A resource as listed for the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub id: String,
    pub title: String,
    #[serde(rename = "hydroShareResource")]
    pub remote_descriptor: RemoteResourceInfo,
    pub local_copy_exists: bool,
}

pub type SharedResource = Arc<Mutex<Resource>>;

/// Filled once the resource has been opened.
type Slot = Arc<OnceCell<SharedResource>>;

/// Knows which resources exist remotely and locally, and hands out
/// [`Resource`]s.
///
/// Opened resources are cached by id for the life of the registry; each sits
/// behind its own mutex so calls on one resource run one at a time. Opening a
/// resource only holds up callers of that same id.
pub struct ResourceRegistry {
    store: Arc<dyn RemoteStore>,
    output_folder: PathBuf,
    options: ResourceOptions,
    open: Mutex<HashMap<String, Slot>>,
}

impl ResourceRegistry {
    /// Create a registry over `output_folder`, creating it if needed.
    pub fn new(
        store: Arc<dyn RemoteStore>,
        output_folder: impl Into<PathBuf>,
        options: ResourceOptions,
    ) -> Result<Self> {
        let output_folder = output_folder.into();
        fs::create_dir_all(&output_folder)?;
        Ok(Self {
            store,
            output_folder,
            options,
            open: Mutex::new(HashMap::new()),
        })
    }

    pub fn output_folder(&self) -> &Path {
        &self.output_folder
    }

    pub async fn user_info(&self) -> Result<UserInfo> {
        Ok(self.store.user_info().await?)
    }

    /// Ids of resources with a local directory.
    pub fn local_resource_ids(&self) -> Result<HashSet<String>> {
        let mut ids = HashSet::new();
        for entry in fs::read_dir(&self.output_folder)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                ids.insert(entry.file_name().to_string_lossy().to_string());
            }
        }
        Ok(ids)
    }

    /// The user's remote resources, each flagged with whether a local copy exists.
    pub async fn list_resources(&self) -> Result<Vec<RegistryEntry>> {
        let remote = self.store.list_resources().await?;
        let local = self.local_resource_ids()?;
        Ok(remote
            .into_iter()
            .map(|info| RegistryEntry {
                id: info.resource_id.clone(),
                title: info.resource_title.clone(),
                local_copy_exists: local.contains(&info.resource_id),
                remote_descriptor: info,
            })
            .collect())
    }

    pub async fn create_resource(&self, title: &str, creators: &[String]) -> Result<String> {
        let id = self
            .store
            .create_resource(&NewResource {
                title: title.to_string(),
                creators: creators.to_vec(),
            })
            .await?;
        tracing::info!(res_id = %id, title, "created resource");
        Ok(id)
    }

    /// Copy a resource on the remote store and retitle the copy
    /// `"Copy of <title>"`. An existing local copy of the original is moved
    /// under the new id.
    pub async fn duplicate_resource(&self, res_id: &str) -> Result<String> {
        if res_id.is_empty() {
            return Err(AppError::MissingResourceId);
        }
        let new_id = self.store.copy_resource(res_id).await?;

        let original = self.output_folder.join(res_id);
        let original_copy = original.join(res_id);
        if original_copy.is_dir() {
            let moved = self.output_folder.join(&new_id).join(&new_id);
            operations::rename(&original_copy, &moved)?;
            if operations::holds_no_files(&original)? {
                operations::delete(&original)?;
            }
            self.open.lock().await.remove(res_id);
            tracing::info!(from = res_id, to = %new_id, "moved local copy to duplicate");
        }

        let title = self.store.resource_title(&new_id).await?;
        self.store
            .set_resource_title(&new_id, &format!("Copy of {}", title))
            .await?;
        Ok(new_id)
    }

    /// Remove the local copy of a resource.
    pub async fn delete_local_copy(&self, res_id: &str) -> Result<()> {
        if res_id.is_empty() {
            return Err(AppError::MissingResourceId);
        }
        let dir = self.output_folder.join(res_id);
        if !dir.is_dir() {
            return Err(AppError::FileNotFound(format!(
                "no local copy of resource {}",
                res_id
            )));
        }
        self.open.lock().await.remove(res_id);
        operations::delete(&dir)?;
        tracing::info!(res_id, "deleted local copy");
        Ok(())
    }

    /// The cached resource for `res_id`, opening it on first use.
    pub async fn resource(&self, res_id: &str) -> Result<SharedResource> {
        if res_id.is_empty() {
            return Err(AppError::MissingResourceId);
        }
        let slot = self
            .open
            .lock()
            .await
            .entry(res_id.to_string())
            .or_default()
            .clone();
        let shared = slot
            .get_or_try_init(|| async {
                let resource = Resource::open(
                    res_id,
                    &self.output_folder,
                    self.store.clone(),
                    self.options,
                )
                .await?;
                Ok::<_, AppError>(Arc::new(Mutex::new(resource)))
            })
            .await?;
        Ok(shared.clone())
    }

    /// Pull every remote file of `res_id` that is missing locally. Returns
    /// the number of files fetched.
    pub async fn download_resource(&self, res_id: &str) -> Result<usize> {
        let shared = self.resource(res_id).await?;
        let mut resource = shared.lock().await;
        resource.refresh(Origin::Remote).await?;
        resource.fetch_all_to_local().await
    }
}
