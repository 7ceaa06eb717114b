//! JSON request handling.
//!
//! Each operation takes the raw request body, validates it, runs the
//! matching registry or resource call and wraps the outcome in a response
//! envelope. Domain failures never escape: they come back as
//! `success: false` with a typed `error`.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::error::{AppError, ErrorObject, Result};
use crate::fs::TreeNode;
use crate::path::Origin;
use crate::registry::{RegistryEntry, ResourceRegistry};
use crate::remote::UserInfo;
use crate::transfer::{BatchReport, TransferMethod, TransferOp};

// ── Responses ────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct TreeResponse {
    #[serde(rename = "rootDir")]
    pub root_dir: Option<TreeNode>,
    pub success: bool,
    pub error: Option<ErrorObject>,
}

#[derive(Debug, Serialize)]
pub struct ResourcesResponse {
    pub resources: Vec<RegistryEntry>,
    pub success: bool,
    pub error: Option<ErrorObject>,
}

#[derive(Debug, Serialize)]
pub struct UserInfoResponse {
    pub data: Option<UserInfo>,
    pub success: bool,
    pub error: Option<ErrorObject>,
}

#[derive(Debug, Serialize)]
pub struct ResourceIdResponse {
    pub resource_id: Option<String>,
    pub success: bool,
    pub error: Option<ErrorObject>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub success: bool,
    pub error: Option<ErrorObject>,
}

#[derive(Debug, Serialize)]
pub struct TransferResponse {
    #[serde(flatten)]
    pub report: BatchReport,
    pub success: bool,
    pub error: Option<ErrorObject>,
}

/// Split a result into payload and error object, logging the failure.
fn split<T>(result: Result<T>) -> (Option<T>, Option<ErrorObject>) {
    match result {
        Ok(value) => (Some(value), None),
        Err(e) => {
            tracing::warn!(kind = e.kind().as_str(), error = %e, "request failed");
            (None, Some(e.to_object()))
        }
    }
}

impl From<Result<TreeNode>> for TreeResponse {
    fn from(result: Result<TreeNode>) -> Self {
        let (root_dir, error) = split(result);
        Self {
            root_dir,
            success: error.is_none(),
            error,
        }
    }
}

impl From<Result<Vec<RegistryEntry>>> for ResourcesResponse {
    fn from(result: Result<Vec<RegistryEntry>>) -> Self {
        let (resources, error) = split(result);
        Self {
            resources: resources.unwrap_or_default(),
            success: error.is_none(),
            error,
        }
    }
}

impl From<Result<UserInfo>> for UserInfoResponse {
    fn from(result: Result<UserInfo>) -> Self {
        let (data, error) = split(result);
        Self {
            data,
            success: error.is_none(),
            error,
        }
    }
}

impl From<Result<String>> for ResourceIdResponse {
    fn from(result: Result<String>) -> Self {
        let (resource_id, error) = split(result);
        Self {
            resource_id,
            success: error.is_none(),
            error,
        }
    }
}

impl From<Result<()>> for StatusResponse {
    fn from(result: Result<()>) -> Self {
        let (_, error) = split(result);
        Self {
            success: error.is_none(),
            error,
        }
    }
}

impl From<Result<BatchReport>> for TransferResponse {
    fn from(result: Result<BatchReport>) -> Self {
        let (report, error) = split(result);
        Self {
            report: report.unwrap_or_default(),
            success: error.is_none(),
            error,
        }
    }
}

// ── Body fields ──────────────────────────────────────────────────────────────

fn field<'a>(body: &'a Value, name: &str) -> Result<&'a Value> {
    match body.get(name) {
        None | Some(Value::Null) => Err(AppError::MissingInput(name.to_string())),
        Some(value) => Ok(value),
    }
}

fn string_field<'a>(body: &'a Value, name: &str) -> Result<&'a str> {
    let value = field(body, name)?
        .as_str()
        .ok_or_else(|| AppError::IncorrectType(format!("{} must be a string", name)))?;
    if value.is_empty() {
        return Err(AppError::MissingInput(name.to_string()));
    }
    Ok(value)
}

fn string_list(body: &Value, name: &str) -> Result<Vec<String>> {
    let wrong = || AppError::IncorrectType(format!("{} must be a list of strings", name));
    field(body, name)?
        .as_array()
        .ok_or_else(wrong)?
        .iter()
        .map(|v| v.as_str().map(String::from).ok_or_else(wrong))
        .collect()
}

fn bool_field(body: &Value, name: &str, default: bool) -> Result<bool> {
    match body.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(AppError::IncorrectType(format!("{} must be a boolean", name))),
    }
}

fn transfer_op(item: &Value) -> Result<TransferOp> {
    Ok(TransferOp {
        method: TransferMethod::parse(string_field(item, "method")?)?,
        source: string_field(item, "source")?.to_string(),
        destination: string_field(item, "destination")?.to_string(),
        force: bool_field(item, "force", false)?,
    })
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// Request entry points over a shared [`ResourceRegistry`].
#[derive(Clone)]
pub struct SyncApi {
    registry: Arc<ResourceRegistry>,
}

impl SyncApi {
    pub fn new(registry: Arc<ResourceRegistry>) -> Self {
        Self { registry }
    }

    pub async fn user(&self) -> UserInfoResponse {
        self.registry.user_info().await.into()
    }

    pub async fn resources(&self) -> ResourcesResponse {
        self.registry.list_resources().await.into()
    }

    /// Body: `{"resource title": string, "creators": [string, ...]}`.
    pub async fn create_resource(&self, body: &Value) -> ResourceIdResponse {
        self.run_create_resource(body).await.into()
    }

    pub async fn duplicate_resource(&self, res_id: &str) -> ResourceIdResponse {
        self.registry.duplicate_resource(res_id).await.into()
    }

    pub async fn delete_local_copy(&self, res_id: &str) -> StatusResponse {
        self.registry.delete_local_copy(res_id).await.into()
    }

    /// Pull remote files missing from the local copy; answers with the
    /// local tree.
    pub async fn download_resource(&self, res_id: &str) -> TreeResponse {
        self.run_download(res_id).await.into()
    }

    /// Freshly built tree of one store.
    pub async fn tree(&self, res_id: &str, origin: Origin) -> TreeResponse {
        self.run_tree(res_id, origin).await.into()
    }

    /// Body: `{"filepaths": [path, ...]}`, paths relative to `origin`'s root.
    /// Paths are deleted in order; the first hard failure stops the request.
    pub async fn delete(&self, res_id: &str, origin: Origin, body: &Value) -> TreeResponse {
        self.run_delete(res_id, origin, body).await.into()
    }

    /// Body: `{"request_type": ..., ...}` for a single-store change.
    ///
    /// | request_type          | fields                         |
    /// |-----------------------|--------------------------------|
    /// | `new_file`            | `new_filepath` (local only)    |
    /// | `new_folder`          | `new_folderpath`               |
    /// | `upload_file`         | `filepath`, `content` (local)  |
    /// | `rename_or_move_file` | `old_filepath`, `new_filepath` |
    /// | `overwrite_HS`        | `filepath`                     |
    /// | `overwrite_JH`        | `filepath`                     |
    pub async fn single_store_request(
        &self,
        res_id: &str,
        origin: Origin,
        body: &Value,
    ) -> TreeResponse {
        self.run_single_store(res_id, origin, body).await.into()
    }

    /// Body: `{"operations": [{"method", "source", "destination", "force"}, ...]}`.
    ///
    /// A malformed item fails alone, like any other item.
    pub async fn transfer(&self, res_id: &str, body: &Value) -> TransferResponse {
        self.run_transfer(res_id, body).await.into()
    }

    async fn run_create_resource(&self, body: &Value) -> Result<String> {
        let title = string_field(body, "resource title")?;
        let creators = string_list(body, "creators")?;
        self.registry.create_resource(title, &creators).await
    }

    async fn run_download(&self, res_id: &str) -> Result<TreeNode> {
        self.registry.download_resource(res_id).await?;
        let shared = self.registry.resource(res_id).await?;
        let resource = shared.lock().await;
        Ok(resource.tree(Origin::Local).clone())
    }

    async fn run_tree(&self, res_id: &str, origin: Origin) -> Result<TreeNode> {
        let shared = self.registry.resource(res_id).await?;
        let mut resource = shared.lock().await;
        resource.refresh(origin).await?;
        Ok(resource.tree(origin).clone())
    }

    async fn run_delete(&self, res_id: &str, origin: Origin, body: &Value) -> Result<TreeNode> {
        let paths = string_list(body, "filepaths")?;
        let shared = self.registry.resource(res_id).await?;
        let mut resource = shared.lock().await;
        for path in &paths {
            resource.delete(origin, path).await?;
        }
        Ok(resource.tree(origin).clone())
    }

    async fn run_single_store(&self, res_id: &str, origin: Origin, body: &Value) -> Result<TreeNode> {
        let request_type = string_field(body, "request_type")?;
        let shared = self.registry.resource(res_id).await?;
        let mut resource = shared.lock().await;
        match request_type {
            "new_file" => {
                let path = string_field(body, "new_filepath")?;
                if origin == Origin::Remote {
                    return Err(AppError::NotImplemented(
                        "creating empty files on the remote store".into(),
                    ));
                }
                resource.create_file(path)?;
            }
            "new_folder" => {
                let path = string_field(body, "new_folderpath")?;
                resource.create_folder(origin, path).await?;
            }
            "upload_file" => {
                let path = string_field(body, "filepath")?;
                let content = field(body, "content")?
                    .as_str()
                    .ok_or_else(|| AppError::IncorrectType("content must be a string".into()))?;
                if origin == Origin::Remote {
                    return Err(AppError::NotImplemented(
                        "writing file content on the remote store".into(),
                    ));
                }
                resource.put_local_file(path, content.as_bytes())?;
            }
            "rename_or_move_file" => {
                let old = string_field(body, "old_filepath")?;
                let new = string_field(body, "new_filepath")?;
                resource.rename_or_move(origin, old, new).await?;
            }
            "overwrite_HS" => {
                let path = string_field(body, "filepath")?;
                resource.overwrite_remote_with_local(path).await?;
            }
            "overwrite_JH" => {
                let path = string_field(body, "filepath")?;
                resource.overwrite_local_with_remote(path).await?;
            }
            other => {
                return Err(AppError::IncorrectType(format!(
                    "unknown request_type {:?}",
                    other
                )))
            }
        }
        Ok(resource.tree(origin).clone())
    }

    async fn run_transfer(&self, res_id: &str, body: &Value) -> Result<BatchReport> {
        let items = field(body, "operations")?
            .as_array()
            .ok_or_else(|| AppError::IncorrectType("operations must be a list".into()))?;
        let shared = self.registry.resource(res_id).await?;
        let mut resource = shared.lock().await;
        let mut report = BatchReport::default();
        for item in items {
            let outcome = match transfer_op(item) {
                Ok(op) => resource.transfer(&op).await,
                Err(e) => Err(e),
            };
            report.push(outcome);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryStore, RemoteStore};
    use crate::resource::{local_root_for, ResourceOptions};
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    const RES: &str = "res1";

    fn api() -> (TempDir, Arc<MemoryStore>, SyncApi) {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new("alice").with_resource(RES, "Rivers"));
        store.put_file(RES, "data.v2/obs.csv", b"12345");
        store.put_file(RES, "readme.md", b"hi");
        let dyn_store: Arc<dyn RemoteStore> = store.clone();
        let registry =
            ResourceRegistry::new(dyn_store, tmp.path().join("out"), ResourceOptions::default())
                .unwrap();
        (tmp, store, SyncApi::new(Arc::new(registry)))
    }

    fn to_json<T: Serialize>(value: &T) -> Value {
        serde_json::to_value(value).unwrap()
    }

    #[tokio::test]
    async fn user_and_listing_envelopes() {
        let (_tmp, store, api) = api();
        let user = to_json(&api.user().await);
        assert_eq!(user["success"], true);
        assert_eq!(user["error"], Value::Null);
        assert_eq!(user["data"]["username"], "alice");

        let listing = to_json(&api.resources().await);
        assert_eq!(listing["resources"][0]["id"], RES);
        assert_eq!(listing["resources"][0]["localCopyExists"], false);

        store.set_authorized(false);
        let listing = to_json(&api.resources().await);
        assert_eq!(listing["success"], false);
        assert_eq!(listing["error"]["type"], "InvalidCredentials");
        assert_eq!(listing["resources"], json!([]));
    }

    #[tokio::test]
    async fn create_resource_validates_body() {
        let (_tmp, _store, api) = api();
        let missing = to_json(&api.create_resource(&json!({"creators": []})).await);
        assert_eq!(missing["error"]["type"], "MissingInput");
        assert_eq!(missing["resource_id"], Value::Null);

        let wrong = to_json(
            &api.create_resource(&json!({"resource title": "T", "creators": [1, 2]}))
                .await,
        );
        assert_eq!(wrong["error"]["type"], "IncorrectType");

        let wrong = to_json(&api.create_resource(&json!({"resource title": 7, "creators": []})).await);
        assert_eq!(wrong["error"]["type"], "IncorrectType");

        let ok = to_json(
            &api.create_resource(&json!({"resource title": "Snow", "creators": ["Ada"]}))
                .await,
        );
        assert_eq!(ok["success"], true);
        assert!(ok["resource_id"].is_string());
    }

    #[tokio::test]
    async fn tree_query_wraps_root_dir() {
        let (_tmp, store, api) = api();
        let resp = to_json(&api.tree(RES, Origin::Remote).await);
        assert_eq!(resp["rootDir"]["path"], "hs:/");
        assert_eq!(resp["rootDir"]["contents"][0]["name"], "data.v2");
        assert_eq!(resp["rootDir"]["contents"][0]["type"], "folder");
        assert_eq!(resp["rootDir"]["sizeBytes"], 7);

        store.put_file(RES, "late.txt", b"x");
        let resp = to_json(&api.tree(RES, Origin::Remote).await);
        assert_eq!(resp["rootDir"]["sizeBytes"], 8);

        let resp = to_json(&api.tree("", Origin::Local).await);
        assert_eq!(resp["success"], false);
        assert_eq!(resp["error"]["type"], "MissingResourceID");
    }

    #[tokio::test]
    async fn single_store_requests() {
        let (tmp, store, api) = api();
        let root = local_root_for(&tmp.path().join("out"), RES);

        let resp = api
            .single_store_request(
                RES,
                Origin::Local,
                &json!({"request_type": "new_file", "new_filepath": "notes/a.md"}),
            )
            .await;
        assert!(resp.success);
        assert!(root.join("notes").join("a.md").is_file());

        let resp = api
            .single_store_request(
                RES,
                Origin::Local,
                &json!({"request_type": "rename_or_move_file", "old_filepath": "notes/a.md", "new_filepath": "b.md"}),
            )
            .await;
        assert!(resp.success);
        assert!(root.join("b.md").is_file());
        assert!(!root.join("notes").exists());

        fs::write(root.join("b.md"), "body").unwrap();
        let resp = api
            .single_store_request(
                RES,
                Origin::Remote,
                &json!({"request_type": "overwrite_HS", "filepath": "b.md"}),
            )
            .await;
        assert!(resp.success);
        assert_eq!(store.file_bytes(RES, "b.md").unwrap(), b"body");

        let resp = to_json(
            &api.single_store_request(
                RES,
                Origin::Remote,
                &json!({"request_type": "new_file", "new_filepath": "x.txt"}),
            )
            .await,
        );
        assert_eq!(resp["error"]["type"], "NotImplemented");

        let resp = to_json(
            &api.single_store_request(RES, Origin::Local, &json!({"request_type": "explode"}))
                .await,
        );
        assert_eq!(resp["error"]["type"], "IncorrectType");

        let resp = to_json(
            &api.single_store_request(
                RES,
                Origin::Local,
                &json!({"request_type": "rename_or_move_file", "old_filepath": "b.md"}),
            )
            .await,
        );
        assert_eq!(resp["error"]["type"], "MissingInput");
    }

    #[tokio::test]
    async fn delete_request() {
        let (_tmp, store, api) = api();
        let resp = to_json(
            &api.delete(RES, Origin::Remote, &json!({"filepaths": ["data.v2", "ghost.txt"]}))
                .await,
        );
        assert_eq!(resp["success"], true);
        assert!(store.file_bytes(RES, "data.v2/obs.csv").is_none());
        assert_eq!(resp["rootDir"]["contents"][0]["name"], "readme.md");

        let resp = to_json(&api.delete(RES, Origin::Local, &json!({"filepaths": ["ghost.txt"]})).await);
        assert_eq!(resp["error"]["type"], "FileNotFoundError");
        assert_eq!(resp["rootDir"], Value::Null);
    }

    #[tokio::test]
    async fn transfer_batch_with_bad_items() {
        let (_tmp, store, api) = api();
        let body = json!({"operations": [
            {"method": "copy", "source": "hs:/readme.md", "destination": "local:/readme.md"},
            {"method": "copy", "source": "nowhere:/readme.md", "destination": "local:/x.md"},
            {"method": "teleport", "source": "hs:/readme.md", "destination": "local:/y.md"},
            {"method": "copy", "source": "hs:/readme.md", "destination": "hs:/again.md"},
            {"method": "move", "source": "local:/readme.md", "destination": "hs:/moved/readme.md", "force": false}
        ]});
        let resp = to_json(&api.transfer(RES, &body).await);
        assert_eq!(resp["success"], true);
        assert_eq!(resp["successCount"], 2);
        assert_eq!(resp["failureCount"], 3);
        let errors: Vec<Value> = resp["results"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["error"].clone())
            .collect();
        assert_eq!(
            errors,
            vec![
                Value::Null,
                json!("UnrecognizedPathPrefix"),
                json!("IncorrectType"),
                json!("NotImplemented"),
                Value::Null,
            ]
        );
        assert_eq!(store.file_bytes(RES, "moved/readme.md").unwrap(), b"hi");

        let resp = to_json(&api.transfer(RES, &json!({"operations": "all"})).await);
        assert_eq!(resp["success"], false);
        assert_eq!(resp["successCount"], 0);
    }

    #[tokio::test]
    async fn duplicate_and_drop_local() {
        let (_tmp, store, api) = api();
        let dup = to_json(&api.duplicate_resource(RES).await);
        let new_id = dup["resource_id"].as_str().unwrap().to_string();
        assert_eq!(store.title(&new_id).unwrap(), "Copy of Rivers");

        let drop = to_json(&api.delete_local_copy(RES).await);
        assert_eq!(drop["error"]["type"], "FileNotFoundError");
        api.tree(RES, Origin::Local).await;
        let drop = to_json(&api.delete_local_copy(RES).await);
        assert_eq!(drop["success"], true);
    }

    #[tokio::test]
    async fn upload_file_request_writes_once() {
        let (tmp, _store, api) = api();
        let root = local_root_for(&tmp.path().join("out"), RES);
        let body = json!({"request_type": "upload_file", "filepath": "in/notes.txt", "content": "hello"});

        let resp = to_json(&api.single_store_request(RES, Origin::Local, &body).await);
        assert_eq!(resp["success"], true);
        assert_eq!(fs::read_to_string(root.join("in").join("notes.txt")).unwrap(), "hello");

        let again = json!({"request_type": "upload_file", "filepath": "in/notes.txt", "content": "bye"});
        let resp = to_json(&api.single_store_request(RES, Origin::Local, &again).await);
        assert_eq!(resp["error"]["type"], "FileExistsError");
        assert_eq!(fs::read_to_string(root.join("in").join("notes.txt")).unwrap(), "hello");

        let resp = to_json(&api.single_store_request(RES, Origin::Remote, &body).await);
        assert_eq!(resp["error"]["type"], "NotImplemented");
    }

    #[tokio::test]
    async fn download_resource_returns_local_tree() {
        let (_tmp, _store, api) = api();
        let resp = to_json(&api.download_resource(RES).await);
        assert_eq!(resp["success"], true);
        assert_eq!(resp["rootDir"]["path"], "local:/");
        assert_eq!(resp["rootDir"]["sizeBytes"], 7);
        assert_eq!(resp["rootDir"]["contents"][0]["name"], "data.v2");
    }
}
