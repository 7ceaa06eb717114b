use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;

use hydrosync::api::SyncApi;
use hydrosync::config::{AppConfig, LocalConfig, LoggingConfig, RemoteConfig};
use hydrosync::error::{AppError, Result};
use hydrosync::logging::init_logging;
use hydrosync::path::Origin;
use hydrosync::registry::ResourceRegistry;
use hydrosync::remote::{Credentials, HydroShareClient, RemoteStore};
use hydrosync::resource::ResourceOptions;

/// Sync HydroShare resources with a local workspace. Every command prints a
/// JSON response on stdout.
#[derive(Parser, Debug)]
#[command(name = "hsync", version, about)]
struct Cli {
    /// Explicit config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding local resource copies
    #[arg(long, global = true)]
    data_path: Option<String>,

    /// HydroShare root URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Log filter, e.g. "debug" or "hydrosync=trace"
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the authenticated user
    User,
    /// List your resources and whether each has a local copy
    Resources,
    /// Create a resource
    Create {
        #[arg(long)]
        title: String,
        #[arg(long = "creator")]
        creators: Vec<String>,
    },
    /// Copy a resource on HydroShare, taking over its local copy
    Duplicate { res_id: String },
    /// Delete the local copy of a resource
    DropLocal { res_id: String },
    /// Pull remote files missing from the local copy
    Download { res_id: String },
    /// Print one store's tree
    Tree {
        res_id: String,
        #[arg(value_parser = parse_origin)]
        store: Origin,
    },
    /// Delete files or folders
    Delete {
        res_id: String,
        #[arg(value_parser = parse_origin)]
        store: Origin,
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Rename or move within one store
    Rename {
        res_id: String,
        #[arg(value_parser = parse_origin)]
        store: Origin,
        old: String,
        new: String,
    },
    /// Create an empty local file
    NewFile { res_id: String, path: String },
    /// Write a text file into the local copy; refuses to replace an existing one
    Put {
        res_id: String,
        /// Source file on this machine
        file: PathBuf,
        /// Destination path inside the local copy
        path: String,
    },
    /// Create a folder
    NewFolder {
        res_id: String,
        #[arg(value_parser = parse_origin)]
        store: Origin,
        path: String,
    },
    /// Replace one side's copy of a file with the other's; the named store is
    /// the one overwritten
    Overwrite {
        res_id: String,
        #[arg(value_parser = parse_origin)]
        store: Origin,
        path: String,
    },
    /// Move or copy between stores, e.g. `local:/a.csv hs:/data/a.csv`
    Transfer {
        res_id: String,
        #[arg(value_parser = ["move", "copy"])]
        method: String,
        source: String,
        destination: String,
        #[arg(long)]
        force: bool,
    },
    /// Run a JSON batch `{"operations": [...]}` from a file, or `-` for stdin
    Batch { res_id: String, file: PathBuf },
}

fn parse_origin(raw: &str) -> std::result::Result<Origin, String> {
    Origin::from_tag(raw).map_err(|e| e.to_string())
}

impl Cli {
    fn overrides(&self) -> AppConfig {
        AppConfig {
            remote: RemoteConfig {
                base_url: self.base_url.clone(),
                ..Default::default()
            },
            local: LocalConfig {
                data_path: self.data_path.clone(),
            },
            logging: LoggingConfig {
                level: self.log_level.clone(),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

fn to_value<T: Serialize>(response: &T) -> Value {
    serde_json::to_value(response).unwrap_or_else(|e| {
        json!({"success": false, "error": {"type": "UnknownError", "msg": e.to_string()}})
    })
}

async fn read_batch(file: &Path) -> Result<Value> {
    let raw = if file.as_os_str() == "-" {
        let mut buf = String::new();
        tokio::io::stdin().read_to_string(&mut buf).await?;
        buf
    } else {
        tokio::fs::read_to_string(file).await?
    };
    serde_json::from_str(&raw)
        .map_err(|e| AppError::IncorrectType(format!("batch is not valid JSON: {}", e)))
}

async fn run(cli: Cli, config: AppConfig) -> Result<Value> {
    let credentials = Credentials::acquire(&config)?;
    let client: Arc<dyn RemoteStore> =
        Arc::new(HydroShareClient::new(config.base_url(), credentials)?);
    let registry = ResourceRegistry::new(
        client,
        config.data_path(),
        ResourceOptions::from_config(&config),
    )?;
    let api = SyncApi::new(Arc::new(registry));

    let response = match cli.command {
        Command::User => to_value(&api.user().await),
        Command::Resources => to_value(&api.resources().await),
        Command::Create { title, creators } => to_value(
            &api.create_resource(&json!({"resource title": title, "creators": creators}))
                .await,
        ),
        Command::Duplicate { res_id } => to_value(&api.duplicate_resource(&res_id).await),
        Command::DropLocal { res_id } => to_value(&api.delete_local_copy(&res_id).await),
        Command::Download { res_id } => to_value(&api.download_resource(&res_id).await),
        Command::Tree { res_id, store } => to_value(&api.tree(&res_id, store).await),
        Command::Delete {
            res_id,
            store,
            paths,
        } => to_value(&api.delete(&res_id, store, &json!({ "filepaths": paths })).await),
        Command::Rename {
            res_id,
            store,
            old,
            new,
        } => {
            let body = json!({
                "request_type": "rename_or_move_file",
                "old_filepath": old,
                "new_filepath": new,
            });
            to_value(&api.single_store_request(&res_id, store, &body).await)
        }
        Command::NewFile { res_id, path } => {
            let body = json!({"request_type": "new_file", "new_filepath": path});
            to_value(&api.single_store_request(&res_id, Origin::Local, &body).await)
        }
        Command::Put { res_id, file, path } => {
            let content = tokio::fs::read_to_string(&file).await?;
            let body = json!({"request_type": "upload_file", "filepath": path, "content": content});
            to_value(&api.single_store_request(&res_id, Origin::Local, &body).await)
        }
        Command::NewFolder {
            res_id,
            store,
            path,
        } => {
            let body = json!({"request_type": "new_folder", "new_folderpath": path});
            to_value(&api.single_store_request(&res_id, store, &body).await)
        }
        Command::Overwrite {
            res_id,
            store,
            path,
        } => {
            let request_type = match store {
                Origin::Remote => "overwrite_HS",
                Origin::Local => "overwrite_JH",
            };
            let body = json!({"request_type": request_type, "filepath": path});
            to_value(&api.single_store_request(&res_id, store, &body).await)
        }
        Command::Transfer {
            res_id,
            method,
            source,
            destination,
            force,
        } => {
            let body = json!({"operations": [{
                "method": method,
                "source": source,
                "destination": destination,
                "force": force,
            }]});
            to_value(&api.transfer(&res_id, &body).await)
        }
        Command::Batch { res_id, file } => {
            let body = read_batch(&file).await?;
            to_value(&api.transfer(&res_id, &body).await)
        }
    };
    Ok(response)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref(), Some(&cli.overrides()));

    if let Err(e) = init_logging(&config) {
        eprintln!("Warning: {}", e);
    }

    let response = match run(cli, config).await {
        Ok(value) => value,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            json!({"success": false, "error": e.to_object()})
        }
    };

    match serde_json::to_string_pretty(&response) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Error: failed to render response: {}", e),
    }
    if response["success"] == Value::Bool(false) {
        std::process::exit(1);
    }
}
