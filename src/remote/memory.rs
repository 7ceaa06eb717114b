//! An in-process [`RemoteStore`].
//!
//! Behaves like the hosted repository closely enough to drive the engine
//! end-to-end without a network: uploads refuse to overwrite, folder deletes
//! are recursive, and every call fails with `Unauthorized` once
//! authorization is revoked.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use super::{
    NewResource, RemoteError, RemoteObject, RemoteResourceInfo, RemoteResult, RemoteStore,
    UserInfo,
};

const BASE_URL: &str = "http://www.hydroshare.org";

#[derive(Debug, Clone)]
struct StoredFile {
    data: Vec<u8>,
    modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
struct StoredResource {
    title: String,
    creators: Vec<String>,
    files: BTreeMap<String, StoredFile>,
    /// Explicitly created folders; folders implied by file paths are not listed.
    folders: BTreeSet<String>,
}

impl StoredResource {
    fn has_folder(&self, path: &str) -> bool {
        let prefix = format!("{}/", path);
        self.folders.contains(path)
            || self.folders.iter().any(|f| f.starts_with(&prefix))
            || self.files.keys().any(|f| f.starts_with(&prefix))
    }
}

#[derive(Debug)]
struct State {
    user: UserInfo,
    authorized: bool,
    failing_uploads: bool,
    /// Title lookups for these resources wait until notified.
    held: HashMap<String, Arc<Notify>>,
    resources: BTreeMap<String, StoredResource>,
    next_id: u64,
}

pub struct MemoryStore {
    state: Mutex<State>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new("tester")
    }
}

fn clean(path: &str) -> String {
    path.trim_matches('/').to_string()
}

fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('/').map(move |(i, _)| &path[..i])
}

impl MemoryStore {
    pub fn new(username: &str) -> Self {
        Self {
            state: Mutex::new(State {
                user: UserInfo {
                    username: username.to_string(),
                    ..Default::default()
                },
                authorized: true,
                failing_uploads: false,
                held: HashMap::new(),
                resources: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Add an empty resource.
    pub fn with_resource(self, res_id: &str, title: &str) -> Self {
        self.lock().resources.insert(
            res_id.to_string(),
            StoredResource {
                title: title.to_string(),
                creators: Vec::new(),
                ..Default::default()
            },
        );
        self
    }

    /// Place a file directly, bypassing upload checks.
    pub fn put_file(&self, res_id: &str, path: &str, data: &[u8]) {
        let mut state = self.lock();
        let resource = state.resources.entry(res_id.to_string()).or_default();
        resource.files.insert(
            clean(path),
            StoredFile {
                data: data.to_vec(),
                modified: Utc::now(),
            },
        );
    }

    pub fn set_authorized(&self, authorized: bool) {
        self.lock().authorized = authorized;
    }

    /// Make every upload fail with a server error.
    pub fn fail_uploads(&self, failing: bool) {
        self.lock().failing_uploads = failing;
    }

    /// Stall the next title lookup for `res_id` until the returned handle is
    /// notified.
    pub fn hold_open(&self, res_id: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.lock().held.insert(res_id.to_string(), gate.clone());
        gate
    }

    /// Stored file paths of a resource, sorted.
    pub fn file_paths(&self, res_id: &str) -> Vec<String> {
        self.lock()
            .resources
            .get(res_id)
            .map(|r| r.files.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn file_bytes(&self, res_id: &str, path: &str) -> Option<Vec<u8>> {
        self.lock()
            .resources
            .get(res_id)
            .and_then(|r| r.files.get(&clean(path)))
            .map(|f| f.data.clone())
    }

    pub fn has_folder(&self, res_id: &str, path: &str) -> bool {
        self.lock()
            .resources
            .get(res_id)
            .map(|r| r.has_folder(&clean(path)))
            .unwrap_or(false)
    }

    pub fn title(&self, res_id: &str) -> Option<String> {
        self.lock().resources.get(res_id).map(|r| r.title.clone())
    }

    pub fn resource_ids(&self) -> Vec<String> {
        self.lock().resources.keys().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Lock the state after checking authorization.
    fn authorized(&self) -> RemoteResult<MutexGuard<'_, State>> {
        let state = self.lock();
        if !state.authorized {
            return Err(RemoteError::Unauthorized("memory store".into()));
        }
        Ok(state)
    }
}

fn resource_mut<'a>(state: &'a mut State, res_id: &str) -> RemoteResult<&'a mut StoredResource> {
    state
        .resources
        .get_mut(res_id)
        .ok_or_else(|| RemoteError::NotFound(format!("resource {}", res_id)))
}

fn conflict(msg: String) -> RemoteError {
    RemoteError::Status {
        status: 400,
        body: msg,
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    fn contents_prefix(&self, res_id: &str) -> String {
        format!("{}/resource/{}/data/contents", BASE_URL, res_id)
    }

    async fn user_info(&self) -> RemoteResult<UserInfo> {
        Ok(self.authorized()?.user.clone())
    }

    async fn list_resources(&self) -> RemoteResult<Vec<RemoteResourceInfo>> {
        let state = self.authorized()?;
        Ok(state
            .resources
            .iter()
            .map(|(id, r)| {
                let mut extra = serde_json::Map::new();
                if let Some(creator) = r.creators.first() {
                    extra.insert("creator".into(), creator.clone().into());
                }
                RemoteResourceInfo {
                    resource_id: id.clone(),
                    resource_title: r.title.clone(),
                    extra,
                }
            })
            .collect())
    }

    async fn list_files(&self, res_id: &str) -> RemoteResult<Vec<RemoteObject>> {
        let prefix = self.contents_prefix(res_id);
        let mut state = self.authorized()?;
        let resource = resource_mut(&mut state, res_id)?;
        Ok(resource
            .files
            .iter()
            .map(|(path, f)| RemoteObject {
                url: format!("{}/{}", prefix, path),
                size: f.data.len() as u64,
                modified_time: Some(f.modified),
            })
            .collect())
    }

    async fn create_folder(&self, res_id: &str, path: &str) -> RemoteResult<()> {
        let path = clean(path);
        let mut state = self.authorized()?;
        let resource = resource_mut(&mut state, res_id)?;
        if resource.files.contains_key(&path) {
            return Err(conflict(format!("a file exists at {}", path)));
        }
        for ancestor in ancestors(&path) {
            resource.folders.insert(ancestor.to_string());
        }
        resource.folders.insert(path);
        Ok(())
    }

    async fn delete_file(&self, res_id: &str, path: &str) -> RemoteResult<()> {
        let path = clean(path);
        let mut state = self.authorized()?;
        let resource = resource_mut(&mut state, res_id)?;
        resource
            .files
            .remove(&path)
            .map(|_| ())
            .ok_or(RemoteError::NotFound(path))
    }

    async fn delete_folder(&self, res_id: &str, path: &str) -> RemoteResult<()> {
        let path = clean(path);
        let mut state = self.authorized()?;
        let resource = resource_mut(&mut state, res_id)?;
        if !resource.has_folder(&path) {
            return Err(RemoteError::NotFound(path));
        }
        let prefix = format!("{}/", path);
        resource.files.retain(|f, _| !f.starts_with(&prefix));
        resource
            .folders
            .retain(|f| f != &path && !f.starts_with(&prefix));
        Ok(())
    }

    async fn move_or_rename(&self, res_id: &str, from: &str, to: &str) -> RemoteResult<()> {
        let (from, to) = (clean(from), clean(to));
        let mut state = self.authorized()?;
        let resource = resource_mut(&mut state, res_id)?;
        if resource.files.contains_key(&to) || resource.has_folder(&to) {
            return Err(conflict(format!("{} already exists", to)));
        }
        if let Some(file) = resource.files.remove(&from) {
            resource.files.insert(to, file);
            return Ok(());
        }
        if !resource.has_folder(&from) {
            return Err(RemoteError::NotFound(from));
        }
        let prefix = format!("{}/", from);
        let moved: Vec<String> = resource
            .files
            .keys()
            .filter(|f| f.starts_with(&prefix))
            .cloned()
            .collect();
        for old in moved {
            if let Some(file) = resource.files.remove(&old) {
                resource
                    .files
                    .insert(format!("{}/{}", to, &old[prefix.len()..]), file);
            }
        }
        let folders: Vec<String> = resource
            .folders
            .iter()
            .filter(|f| **f == from || f.starts_with(&prefix))
            .cloned()
            .collect();
        for old in folders {
            resource.folders.remove(&old);
            resource
                .folders
                .insert(format!("{}{}", to, &old[from.len()..]));
        }
        Ok(())
    }

    async fn upload_file(&self, res_id: &str, local: &Path, dest: &str) -> RemoteResult<()> {
        if !local.is_file() {
            return Err(RemoteError::MissingSource(local.display().to_string()));
        }
        let data = tokio::fs::read(local).await?;
        let dest = clean(dest);
        let mut state = self.authorized()?;
        if state.failing_uploads {
            return Err(RemoteError::Status {
                status: 500,
                body: format!("upload of {} failed", dest),
            });
        }
        let resource = resource_mut(&mut state, res_id)?;
        if resource.files.contains_key(&dest) {
            return Err(conflict(format!("{} already exists", dest)));
        }
        resource.files.insert(
            dest,
            StoredFile {
                data,
                modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn download_file(&self, res_id: &str, path: &str, dest: &Path) -> RemoteResult<()> {
        let path = clean(path);
        let data = {
            let mut state = self.authorized()?;
            let resource = resource_mut(&mut state, res_id)?;
            resource
                .files
                .get(&path)
                .map(|f| f.data.clone())
                .ok_or(RemoteError::NotFound(path))?
        };
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, data).await?;
        Ok(())
    }

    async fn create_resource(&self, new: &NewResource) -> RemoteResult<String> {
        let mut state = self.authorized()?;
        let id = format!("{:032x}", state.next_id);
        state.next_id += 1;
        state.resources.insert(
            id.clone(),
            StoredResource {
                title: new.title.clone(),
                creators: new.creators.clone(),
                ..Default::default()
            },
        );
        Ok(id)
    }

    async fn copy_resource(&self, res_id: &str) -> RemoteResult<String> {
        let mut state = self.authorized()?;
        let copy = resource_mut(&mut state, res_id)?.clone();
        let id = format!("{:032x}", state.next_id);
        state.next_id += 1;
        state.resources.insert(id.clone(), copy);
        Ok(id)
    }

    async fn resource_title(&self, res_id: &str) -> RemoteResult<String> {
        let held = self.lock().held.remove(res_id);
        if let Some(gate) = held {
            gate.notified().await;
        }
        let mut state = self.authorized()?;
        Ok(resource_mut(&mut state, res_id)?.title.clone())
    }

    async fn set_resource_title(&self, res_id: &str, title: &str) -> RemoteResult<()> {
        let mut state = self.authorized()?;
        resource_mut(&mut state, res_id)?.title = title.to_string();
        Ok(())
    }
}
