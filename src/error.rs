use serde::Serialize;
use thiserror::Error;

use crate::remote::{CredentialError, RemoteError};

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types.
#[derive(Debug, Error)]
pub enum AppError {
    /// No resource id was supplied.
    #[error("Missing resource id")]
    MissingResourceId,

    /// A required request field was absent or empty.
    #[error("Missing input: {0}")]
    MissingInput(String),

    /// A request field had the wrong shape.
    #[error("Incorrect type: {0}")]
    IncorrectType(String),

    /// A path prefix other than `hs` or `local`.
    #[error("Unrecognized path prefix: {0}")]
    UnrecognizedPathPrefix(String),

    /// A local target that does not exist.
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// A cross-store destination that exists while `force` is off.
    #[error("Destination already exists: {0}")]
    AlreadyExists(String),

    /// Operation with no implementation for the given store pair.
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Invalid path provided by the caller.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// I/O errors from filesystem operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failures reported by the remote store.
    #[error("Remote store error: {0}")]
    Remote(#[from] RemoteError),

    /// Credentials could not be acquired.
    #[error("Credential error: {0}")]
    Credentials(#[from] CredentialError),

    /// Configuration could not be resolved.
    #[error("Config error: {0}")]
    Config(String),
}

/// Wire-level error categories carried in response envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    #[serde(rename = "MissingResourceID")]
    MissingResourceId,
    MissingInput,
    IncorrectType,
    InvalidCredentials,
    UnrecognizedPathPrefix,
    FileNotFoundError,
    FileExistsError,
    InvalidPath,
    NotImplemented,
    UnknownError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MissingResourceId => "MissingResourceID",
            ErrorKind::MissingInput => "MissingInput",
            ErrorKind::IncorrectType => "IncorrectType",
            ErrorKind::InvalidCredentials => "InvalidCredentials",
            ErrorKind::UnrecognizedPathPrefix => "UnrecognizedPathPrefix",
            ErrorKind::FileNotFoundError => "FileNotFoundError",
            ErrorKind::FileExistsError => "FileExistsError",
            ErrorKind::InvalidPath => "InvalidPath",
            ErrorKind::NotImplemented => "NotImplemented",
            ErrorKind::UnknownError => "UnknownError",
        }
    }
}

/// `{type, msg}` error body used by every response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorObject {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub msg: String,
}

impl AppError {
    /// Category of this error in the wire taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::MissingResourceId => ErrorKind::MissingResourceId,
            AppError::MissingInput(_) => ErrorKind::MissingInput,
            AppError::IncorrectType(_) => ErrorKind::IncorrectType,
            AppError::UnrecognizedPathPrefix(_) => ErrorKind::UnrecognizedPathPrefix,
            AppError::FileNotFound(_) => ErrorKind::FileNotFoundError,
            AppError::AlreadyExists(_) => ErrorKind::FileExistsError,
            AppError::NotImplemented(_) => ErrorKind::NotImplemented,
            AppError::InvalidPath(_) => ErrorKind::InvalidPath,
            AppError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => {
                ErrorKind::FileNotFoundError
            }
            AppError::Io(_) => ErrorKind::UnknownError,
            AppError::Remote(RemoteError::Unauthorized(_)) => ErrorKind::InvalidCredentials,
            AppError::Remote(RemoteError::MissingSource(_)) => ErrorKind::FileNotFoundError,
            AppError::Remote(_) => ErrorKind::UnknownError,
            AppError::Credentials(_) => ErrorKind::InvalidCredentials,
            AppError::Config(_) => ErrorKind::UnknownError,
        }
    }

    pub fn to_object(&self) -> ErrorObject {
        ErrorObject {
            kind: self.kind(),
            msg: self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let app_err: AppError = io_err.into();
        assert!(matches!(app_err, AppError::Io(_)));
        assert!(app_err.to_string().contains("file not found"));
        assert_eq!(app_err.kind(), ErrorKind::FileNotFoundError);
    }

    #[test]
    fn other_io_errors_are_unknown() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let app_err: AppError = io_err.into();
        assert_eq!(app_err.kind(), ErrorKind::UnknownError);
    }

    #[test]
    fn unauthorized_remote_maps_to_invalid_credentials() {
        let err: AppError = RemoteError::Unauthorized("401".into()).into();
        assert_eq!(err.kind(), ErrorKind::InvalidCredentials);

        let err: AppError = RemoteError::NotFound("a.txt".into()).into();
        assert_eq!(err.kind(), ErrorKind::UnknownError);
    }

    #[test]
    fn prefix_error_display() {
        let err = AppError::UnrecognizedPathPrefix("s3".into());
        assert_eq!(err.to_string(), "Unrecognized path prefix: s3");
    }

    #[test]
    fn error_object_serializes_wire_names() {
        let obj = AppError::MissingResourceId.to_object();
        let json = serde_json::to_value(&obj).unwrap();
        assert_eq!(json["type"], "MissingResourceID");
        assert_eq!(json["msg"], "Missing resource id");

        let obj = AppError::FileNotFound("x".into()).to_object();
        assert_eq!(serde_json::to_value(&obj).unwrap()["type"], "FileNotFoundError");
    }

    #[test]
    fn kind_names_match_serialization() {
        for kind in [
            ErrorKind::MissingResourceId,
            ErrorKind::NotImplemented,
            ErrorKind::FileExistsError,
            ErrorKind::UnknownError,
        ] {
            assert_eq!(serde_json::to_value(kind).unwrap(), kind.as_str());
        }
    }
}
