//! HydroShare REST client.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::{multipart, Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use super::{
    CredentialError, NewResource, RemoteError, RemoteObject, RemoteResourceInfo, RemoteResult,
    RemoteStore, UserInfo,
};
use crate::config::AppConfig;

/// Environment variable overriding `remote.username`.
pub const USERNAME_ENV: &str = "HSYNC_USERNAME";
/// Environment variable overriding `remote.password`.
pub const PASSWORD_ENV: &str = "HSYNC_PASSWORD";

/// Basic-auth credentials for the remote store.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Resolve credentials from the environment, then the configuration.
    pub fn acquire(config: &AppConfig) -> Result<Self, CredentialError> {
        Self::from_sources(
            std::env::var(USERNAME_ENV).ok(),
            std::env::var(PASSWORD_ENV).ok(),
            config,
        )
    }

    fn from_sources(
        env_user: Option<String>,
        env_password: Option<String>,
        config: &AppConfig,
    ) -> Result<Self, CredentialError> {
        let pick = |env: Option<String>, cfg: Option<&String>| {
            env.filter(|v| !v.is_empty())
                .or_else(|| cfg.filter(|v| !v.is_empty()).cloned())
        };
        let username = pick(env_user, config.remote.username.as_ref()).ok_or(
            CredentialError::Missing {
                field: "username",
                env: USERNAME_ENV,
            },
        )?;
        let password = pick(env_password, config.remote.password.as_ref()).ok_or(
            CredentialError::Missing {
                field: "password",
                env: PASSWORD_ENV,
            },
        )?;
        Ok(Self { username, password })
    }
}

/// Page envelope used by HydroShare listing endpoints.
#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default)]
    next: Option<String>,
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct FileEntry {
    url: String,
    size: u64,
    #[serde(default)]
    modified_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedResource {
    resource_id: String,
}

#[derive(Debug, Deserialize)]
struct ScienceMetadata {
    title: String,
}

/// [`RemoteStore`] backed by the HydroShare REST API.
pub struct HydroShareClient {
    http: Client,
    base_url: String,
    credentials: Credentials,
}

impl HydroShareClient {
    pub fn new(base_url: &str, credentials: Credentials) -> RemoteResult<Self> {
        let http = Client::builder()
            .user_agent(concat!("hsync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn api(&self, tail: &str) -> String {
        format!("{}/hsapi/{}", self.base_url, tail)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http.request(method, url).basic_auth(
            &self.credentials.username,
            Some(&self.credentials.password),
        )
    }

    async fn send(&self, builder: RequestBuilder, what: &str) -> RemoteResult<Response> {
        let resp = builder.send().await?;
        check_status(resp, what).await
    }

    /// Fetch every page of a paginated listing.
    async fn paginated<T: DeserializeOwned>(&self, first: String, what: &str) -> RemoteResult<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(first);
        while let Some(url) = next {
            let resp = self.send(self.request(Method::GET, &url), what).await?;
            let page: Page<T> = resp
                .json()
                .await
                .map_err(|e| RemoteError::Decode(format!("{}: {}", what, e)))?;
            items.extend(page.results);
            next = page.next;
        }
        Ok(items)
    }
}

async fn check_status(resp: Response, what: &str) -> RemoteResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    tracing::debug!(%status, what, body = %body, "remote call failed");
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(RemoteError::Unauthorized(format!("{} ({})", what, status)))
        }
        StatusCode::NOT_FOUND => Err(RemoteError::NotFound(what.to_string())),
        _ => Err(RemoteError::Status {
            status: status.as_u16(),
            body,
        }),
    }
}

/// Percent-encode each segment of a store-relative path.
fn encode_path(path: &str) -> String {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| urlencoding::encode(s).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Parse the timestamp formats HydroShare emits; `None` when unparseable.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Extract a resource id from a copy response, which may be bare text,
/// a JSON string, or a JSON object.
fn parse_copied_id(body: &str) -> RemoteResult<String> {
    let trimmed = body.trim();
    if let Ok(created) = serde_json::from_str::<CreatedResource>(trimmed) {
        return Ok(created.resource_id);
    }
    let id = trimmed.trim_matches('"');
    if id.is_empty() || id.contains(char::is_whitespace) {
        return Err(RemoteError::Decode(format!("copy response: {:?}", body)));
    }
    Ok(id.to_string())
}

#[async_trait]
impl RemoteStore for HydroShareClient {
    fn contents_prefix(&self, res_id: &str) -> String {
        format!("{}/resource/{}/data/contents", self.base_url, res_id)
    }

    async fn user_info(&self) -> RemoteResult<UserInfo> {
        let resp = self
            .send(self.request(Method::GET, &self.api("userInfo/")), "user info")
            .await?;
        resp.json()
            .await
            .map_err(|e| RemoteError::Decode(format!("user info: {}", e)))
    }

    async fn list_resources(&self) -> RemoteResult<Vec<RemoteResourceInfo>> {
        let url = format!(
            "{}?owner={}",
            self.api("resource/"),
            urlencoding::encode(&self.credentials.username)
        );
        self.paginated(url, "resource listing").await
    }

    async fn list_files(&self, res_id: &str) -> RemoteResult<Vec<RemoteObject>> {
        let url = self.api(&format!("resource/{}/files/", res_id));
        let entries: Vec<FileEntry> = self.paginated(url, "file listing").await?;
        Ok(entries
            .into_iter()
            .map(|e| RemoteObject {
                modified_time: e.modified_time.as_deref().and_then(parse_timestamp),
                url: e.url,
                size: e.size,
            })
            .collect())
    }

    async fn create_folder(&self, res_id: &str, path: &str) -> RemoteResult<()> {
        let url = self.api(&format!("resource/{}/folders/{}/", res_id, encode_path(path)));
        self.send(self.request(Method::PUT, &url), path).await?;
        Ok(())
    }

    async fn delete_file(&self, res_id: &str, path: &str) -> RemoteResult<()> {
        let url = self.api(&format!("resource/{}/files/{}/", res_id, encode_path(path)));
        self.send(self.request(Method::DELETE, &url), path).await?;
        Ok(())
    }

    async fn delete_folder(&self, res_id: &str, path: &str) -> RemoteResult<()> {
        let url = self.api(&format!("resource/{}/folders/{}/", res_id, encode_path(path)));
        self.send(self.request(Method::DELETE, &url), path).await?;
        Ok(())
    }

    async fn move_or_rename(&self, res_id: &str, from: &str, to: &str) -> RemoteResult<()> {
        let url = self.api(&format!("resource/{}/functions/move-or-rename/", res_id));
        let source = format!("data/contents/{}", from.trim_matches('/'));
        let target = format!("data/contents/{}", to.trim_matches('/'));
        let form = [("source_path", source.as_str()), ("target_path", target.as_str())];
        self.send(self.request(Method::POST, &url).form(&form), from)
            .await?;
        Ok(())
    }

    async fn upload_file(&self, res_id: &str, local: &Path, dest: &str) -> RemoteResult<()> {
        if !local.is_file() {
            return Err(RemoteError::MissingSource(local.display().to_string()));
        }
        let file = tokio::fs::File::open(local).await?;
        let len = file.metadata().await?.len();
        let (folder, name) = match dest.trim_matches('/').rsplit_once('/') {
            Some((folder, name)) => (encode_path(folder), name.to_string()),
            None => (String::new(), dest.trim_matches('/').to_string()),
        };
        let url = if folder.is_empty() {
            self.api(&format!("resource/{}/files/", res_id))
        } else {
            self.api(&format!("resource/{}/files/{}/", res_id, folder))
        };
        let part = multipart::Part::stream_with_length(file, len).file_name(name);
        let form = multipart::Form::new().part("file", part);
        self.send(self.request(Method::POST, &url).multipart(form), dest)
            .await?;
        Ok(())
    }

    async fn download_file(&self, res_id: &str, path: &str, dest: &Path) -> RemoteResult<()> {
        let url = self.api(&format!("resource/{}/files/{}", res_id, encode_path(path)));
        let mut resp = self.send(self.request(Method::GET, &url), path).await?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(dest).await?;
        let written = async {
            while let Some(chunk) = resp.chunk().await? {
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            Ok::<_, RemoteError>(())
        }
        .await;
        if written.is_err() {
            drop(file);
            if let Err(e) = tokio::fs::remove_file(dest).await {
                tracing::debug!(path = %dest.display(), error = %e, "could not remove partial download");
            }
        }
        written
    }

    async fn create_resource(&self, new: &NewResource) -> RemoteResult<String> {
        let creators: Vec<serde_json::Value> = new
            .creators
            .iter()
            .map(|name| serde_json::json!({ "creator": { "name": name } }))
            .collect();
        let metadata = serde_json::Value::Array(creators).to_string();
        let form = [
            ("resource_type", "CompositeResource"),
            ("title", new.title.as_str()),
            ("metadata", metadata.as_str()),
        ];
        let resp = self
            .send(
                self.request(Method::POST, &self.api("resource/")).form(&form),
                "create resource",
            )
            .await?;
        let created: CreatedResource = resp
            .json()
            .await
            .map_err(|e| RemoteError::Decode(format!("create resource: {}", e)))?;
        Ok(created.resource_id)
    }

    async fn copy_resource(&self, res_id: &str) -> RemoteResult<String> {
        let url = self.api(&format!("resource/{}/copy/", res_id));
        let resp = self.send(self.request(Method::POST, &url), res_id).await?;
        let body = resp.text().await?;
        parse_copied_id(&body)
    }

    async fn resource_title(&self, res_id: &str) -> RemoteResult<String> {
        let url = self.api(&format!("resource/{}/scimeta/elements/", res_id));
        let resp = self.send(self.request(Method::GET, &url), res_id).await?;
        let meta: ScienceMetadata = resp
            .json()
            .await
            .map_err(|e| RemoteError::Decode(format!("science metadata: {}", e)))?;
        Ok(meta.title)
    }

    async fn set_resource_title(&self, res_id: &str, title: &str) -> RemoteResult<()> {
        let url = self.api(&format!("resource/{}/scimeta/elements/", res_id));
        let body = serde_json::json!({ "title": title });
        self.send(self.request(Method::PUT, &url).json(&body), res_id)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoteConfig;
    use chrono::TimeZone;

    fn config_with(username: Option<&str>, password: Option<&str>) -> AppConfig {
        AppConfig {
            remote: RemoteConfig {
                username: username.map(String::from),
                password: password.map(String::from),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn credentials_from_config() {
        let cfg = config_with(Some("alice"), Some("secret"));
        let creds = Credentials::from_sources(None, None, &cfg).unwrap();
        assert_eq!(creds.username, "alice");
        assert_eq!(creds.password, "secret");
    }

    #[test]
    fn environment_overrides_config() {
        let cfg = config_with(Some("alice"), Some("secret"));
        let creds =
            Credentials::from_sources(Some("bob".into()), Some("pw".into()), &cfg).unwrap();
        assert_eq!(creds.username, "bob");
        assert_eq!(creds.password, "pw");
    }

    #[test]
    fn missing_password_is_reported() {
        let cfg = config_with(Some("alice"), None);
        let err = Credentials::from_sources(None, Some(String::new()), &cfg).unwrap_err();
        assert!(err.to_string().contains("password"));
        assert!(err.to_string().contains(PASSWORD_ENV));
    }

    #[test]
    fn debug_hides_password() {
        let creds = Credentials::new("alice", "hunter2");
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }

    #[test]
    fn timestamps_in_hydroshare_formats() {
        let expected = Utc.with_ymd_and_hms(2019, 5, 15, 19, 31, 38).unwrap();
        assert_eq!(parse_timestamp("2019-05-15T19:31:38Z"), Some(expected));
        assert_eq!(
            parse_timestamp("2019-05-15T19:31:38.201061Z").map(|t| t.timestamp()),
            Some(expected.timestamp())
        );
        assert_eq!(parse_timestamp("2019-05-15 19:31:38"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn copied_id_shapes() {
        assert_eq!(parse_copied_id("abc123").unwrap(), "abc123");
        assert_eq!(parse_copied_id("\"abc123\"\n").unwrap(), "abc123");
        assert_eq!(
            parse_copied_id(r#"{"resource_id": "abc123"}"#).unwrap(),
            "abc123"
        );
        assert!(parse_copied_id("").is_err());
    }

    #[test]
    fn paths_are_encoded_per_segment() {
        assert_eq!(encode_path("/my data/a b.txt"), "my%20data/a%20b.txt");
        assert_eq!(encode_path("plain/x.csv"), "plain/x.csv");
    }

    #[test]
    fn contents_prefix_uses_base_url() {
        let client =
            HydroShareClient::new("https://www.hydroshare.org/", Credentials::new("u", "p"))
                .unwrap();
        assert_eq!(
            client.contents_prefix("abc"),
            "https://www.hydroshare.org/resource/abc/data/contents"
        );
        assert_eq!(
            client.api("userInfo/"),
            "https://www.hydroshare.org/hsapi/userInfo/"
        );
    }

    /// Serve one canned HTTP response on a loopback port.
    async fn serve_once(response: &'static [u8]) -> String {
        use tokio::io::AsyncReadExt;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket.write_all(response).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn download_writes_body_to_disk() {
        let base = serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello").await;
        let client = HydroShareClient::new(&base, Credentials::new("u", "p")).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested/a.txt");
        client.download_file("abc", "a.txt", &dest).await.unwrap();
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "hello");
    }

    #[tokio::test]
    async fn truncated_download_leaves_no_partial_file() {
        let base = serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\nConnection: close\r\n\r\nabc").await;
        let client = HydroShareClient::new(&base, Credentials::new("u", "p")).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.txt");
        assert!(client.download_file("abc", "a.txt", &dest).await.is_err());
        assert!(!dest.exists());
    }
}
