//! Application configuration: TOML file loading, CLI overrides, and defaults.
//!
//! Resolution order (first found wins, values merge/override):
//! 1. CLI flags (`--config`, `--data-path`, `--base-url`, `--log-level`)
//! 2. `$HSYNC_CONFIG` environment variable (path to config file)
//! 3. Project-local `.hsync.toml` in the current working directory
//! 4. Global `~/.config/hsync/config.toml`
//! 5. Built-in defaults
//!
//! Credentials may also come from `HSYNC_USERNAME` / `HSYNC_PASSWORD`; see
//! [`crate::remote::Credentials::acquire`].

use std::path::{Path, PathBuf};

use serde::Deserialize;

// ── Section configs ──────────────────────────────────────────────────────────

/// Remote store connection settings.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RemoteConfig {
    /// Root URL of the HydroShare instance.
    pub base_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Local workspace settings.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LocalConfig {
    /// Directory holding one sub-directory per locally present resource.
    pub data_path: Option<String>,
}

/// Sync behaviour.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SyncConfig {
    /// Keep removing emptied ancestors until a non-empty one (or the root).
    pub recursive_cleanup: Option<bool>,
    /// Download into a scratch folder before replacing the destination.
    pub staging: Option<bool>,
    /// Pull every remote file into a resource's local copy the first time it
    /// is opened.
    pub fetch_on_open: Option<bool>,
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. "info" or "hydrosync=debug". `RUST_LOG` wins.
    pub level: Option<String>,
    /// "text" or "json".
    pub format: Option<String>,
}

// ── Top-level config ─────────────────────────────────────────────────────────

/// Top-level application configuration.
///
/// All fields are optional so that partial configs from different sources
/// can be merged together (CLI overrides file, file overrides defaults).
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub remote: RemoteConfig,
    pub local: LocalConfig,
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

// ── Default constants ────────────────────────────────────────────────────────

pub const DEFAULT_BASE_URL: &str = "https://www.hydroshare.org";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_LOG_FORMAT: &str = "text";
/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "HSYNC_CONFIG";

// ── Config file locator ──────────────────────────────────────────────────────

/// Return the list of candidate config file paths in priority order.
///
/// Does NOT include the CLI `--config` path; that is handled separately.
fn candidate_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        paths.push(PathBuf::from(env_path));
    }

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join(".hsync.toml"));
    }

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("hsync").join("config.toml"));
    }

    paths
}

/// Try to read and parse a TOML config file. Returns `None` if the file
/// doesn't exist or can't be parsed (with a warning printed to stderr;
/// logging is not initialised yet when configuration loads).
fn load_file(path: &Path) -> Option<AppConfig> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return None,
    };
    match toml::from_str::<AppConfig>(&content) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            eprintln!(
                "Warning: failed to parse config file {}: {}",
                path.display(),
                e
            );
            None
        }
    }
}

// ── Merge logic ──────────────────────────────────────────────────────────────

impl AppConfig {
    /// Merge `other` on top of `self`; `other`'s `Some` values win.
    pub fn merge(self, other: &AppConfig) -> AppConfig {
        AppConfig {
            remote: RemoteConfig {
                base_url: other.remote.base_url.clone().or(self.remote.base_url),
                username: other.remote.username.clone().or(self.remote.username),
                password: other.remote.password.clone().or(self.remote.password),
            },
            local: LocalConfig {
                data_path: other.local.data_path.clone().or(self.local.data_path),
            },
            sync: SyncConfig {
                recursive_cleanup: other
                    .sync
                    .recursive_cleanup
                    .or(self.sync.recursive_cleanup),
                staging: other.sync.staging.or(self.sync.staging),
                fetch_on_open: other.sync.fetch_on_open.or(self.sync.fetch_on_open),
            },
            logging: LoggingConfig {
                level: other.logging.level.clone().or(self.logging.level),
                format: other.logging.format.clone().or(self.logging.format),
            },
        }
    }

    /// Load the final merged configuration.
    ///
    /// `cli_config_path` is an explicit config file path from `--config`.
    /// `cli_overrides` are partial overrides derived from CLI flags.
    pub fn load(cli_config_path: Option<&Path>, cli_overrides: Option<&AppConfig>) -> AppConfig {
        let mut config = AppConfig::default();

        // Walk in reverse so that highest-priority (env var) overwrites lower.
        for path in candidate_paths().iter().rev() {
            if let Some(file_cfg) = load_file(path) {
                config = config.merge(&file_cfg);
            }
        }

        if let Some(cli_path) = cli_config_path {
            if let Some(file_cfg) = load_file(cli_path) {
                config = config.merge(&file_cfg);
            }
        }

        if let Some(overrides) = cli_overrides {
            config = config.merge(overrides);
        }

        config
    }

    // ── Convenience getters with built-in defaults ──────────────────────────

    pub fn base_url(&self) -> &str {
        self.remote.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    /// Directory under which local resource copies live.
    pub fn data_path(&self) -> PathBuf {
        match &self.local.data_path {
            Some(p) => PathBuf::from(p),
            None => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("hsync")
                .join("resources"),
        }
    }

    pub fn recursive_cleanup(&self) -> bool {
        self.sync.recursive_cleanup.unwrap_or(true)
    }

    pub fn staging(&self) -> bool {
        self.sync.staging.unwrap_or(true)
    }

    pub fn fetch_on_open(&self) -> bool {
        self.sync.fetch_on_open.unwrap_or(false)
    }

    pub fn log_level(&self) -> &str {
        self.logging.level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL)
    }

    pub fn log_format(&self) -> &str {
        self.logging.format.as_deref().unwrap_or(DEFAULT_LOG_FORMAT)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
