// src/error.rs

use reqwest::Error as ReqwestError;
use serde_json::Error as SerdeError;
use std::io;
use thiserror::Error;

/// Custom error types for the application
#[derive(Error, Debug)]
pub enum AppError {
    /// The source reference could not be resolved to stream descriptors
    #[error("Resolution error: {0}")]
    ResolutionError(String),

    /// I/O or remote-server failure while transferring a stream
    #[error("Download error: {0}")]
    DownloadError(String),

    /// User-initiated abort of a running transfer
    #[error("Operation cancelled")]
    Cancelled,

    /// Failure fetching an auxiliary asset such as the thumbnail
    #[error("Asset error: {0}")]
    AssetError(String),

    /// Invalid configuration value (for example a zero concurrency limit)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Error for invalid input validation
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Error for a required external tool that is not installed
    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    /// I/O related errors
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Error for path operation failures
    #[error("Path error: {0}")]
    PathError(String),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    HttpError(#[from] ReqwestError),

    /// JSON parsing errors
    #[error("JSON parsing error: {0}")]
    JsonError(#[from] SerdeError),

    /// General application errors
    #[error("Application error: {0}")]
    General(String),
}

impl AppError {
    /// True when the error represents a user-initiated cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }
}

/// Convert a string error to AppError::General
impl From<String> for AppError {
    fn from(error: String) -> Self {
        AppError::General(error)
    }
}

/// Convert a &str error to AppError::General
impl From<&str> for AppError {
    fn from(error: &str) -> Self {
        AppError::General(error.to_string())
    }
}
