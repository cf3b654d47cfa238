// tests/error_test.rs
use std::io;
use streamloader::error::AppError;

#[test]
fn test_app_error_display() {
    // Test that error messages are formatted correctly

    let error = AppError::ResolutionError("Video unavailable".to_string());
    assert_eq!(error.to_string(), "Resolution error: Video unavailable");

    let error = AppError::DownloadError("Failed to download file".to_string());
    assert_eq!(error.to_string(), "Download error: Failed to download file");

    let error = AppError::Cancelled;
    assert_eq!(error.to_string(), "Operation cancelled");

    let error = AppError::AssetError("thumbnail".to_string());
    assert_eq!(error.to_string(), "Asset error: thumbnail");

    let error = AppError::ConfigError("bad limit".to_string());
    assert_eq!(error.to_string(), "Configuration error: bad limit");

    let error = AppError::ValidationError("Invalid URL".to_string());
    assert_eq!(error.to_string(), "Validation error: Invalid URL");

    let error = AppError::MissingDependency("yt-dlp".to_string());
    assert_eq!(error.to_string(), "Missing dependency: yt-dlp");

    let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
    let error = AppError::IoError(io_error);
    assert_eq!(error.to_string(), "I/O error: File not found");

    let error = AppError::PathError("Invalid path".to_string());
    assert_eq!(error.to_string(), "Path error: Invalid path");

    let error = AppError::General("General error".to_string());
    assert_eq!(error.to_string(), "Application error: General error");
}

#[test]
fn test_error_conversions() {
    // Test From<io::Error> conversion
    let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "Permission denied");
    let error: AppError = io_error.into();
    assert!(matches!(error, AppError::IoError(_)));

    // Test From<String> conversion
    let error: AppError = String::from("String error").into();
    assert!(matches!(error, AppError::General(_)));

    // Test From<&str> conversion
    let error: AppError = "str error".into();
    assert!(matches!(error, AppError::General(_)));

    // Test From<serde_json::Error> conversion
    let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let error: AppError = json_error.into();
    assert!(error.to_string().starts_with("JSON parsing error:"));
}

#[test]
fn test_is_cancelled() {
    assert!(AppError::Cancelled.is_cancelled());
    assert!(!AppError::DownloadError("x".to_string()).is_cancelled());
}
