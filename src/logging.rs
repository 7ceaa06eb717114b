//! Structured logging via `tracing`.
//!
//! Events go to stderr so that stdout stays reserved for JSON responses.

use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::AppConfig;
use crate::error::{AppError, Result};

/// Output format for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(AppError::Config(format!(
                "Invalid log format: {} (must be 'json' or 'text')",
                other
            ))),
        }
    }
}

/// Build the event filter; `RUST_LOG` takes precedence over the configured level.
fn build_env_filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level)
        .map_err(|e| AppError::Config(format!("Invalid log level {:?}: {}", level, e)))
}

/// Install the global subscriber. Call once, before any other work.
pub fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = build_env_filter(config.log_level())?;
    let format = LogFormat::parse(config.log_format())?;
    let base_subscriber = Registry::default().with(filter);

    let installed = match format {
        LogFormat::Json => base_subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Text => base_subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
    installed.map_err(|e| AppError::Config(format!("Failed to install logger: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_formats() {
        assert_eq!(LogFormat::parse("text").unwrap(), LogFormat::Text);
        assert_eq!(LogFormat::parse("json").unwrap(), LogFormat::Json);
        assert!(matches!(LogFormat::parse("xml"), Err(AppError::Config(_))));
    }

    #[test]
    fn invalid_level_is_a_config_error() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        assert!(build_env_filter("info").is_ok());
        assert!(build_env_filter("hydrosync=debug,warn").is_ok());
        assert!(build_env_filter("hydrosync=loudest").is_err());
    }
}
