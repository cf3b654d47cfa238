// src/utils.rs

use crate::error::AppError;
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::io;
use std::path::Path;

const MAX_URL_LENGTH: usize = 4096;
const MAX_FILENAME_LENGTH: usize = 200;

static URL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^https?://(?:www\.)?[-a-zA-Z0-9@:%._\+~#=]{1,256}\.[a-zA-Z0-9()]{1,6}\b(?:[-a-zA-Z0-9()@:%_\+.~#?&//=]*)$",
    )
    .expect("URL pattern is valid")
});

/// Check that a source reference is a plain http(s) URL that is safe to hand to external tools
pub fn validate_url(url: &str) -> Result<(), AppError> {
    // Check URL length to prevent DoS attacks
    if url.len() > MAX_URL_LENGTH {
        return Err(AppError::ValidationError(
            "URL exceeds maximum allowed length".to_string(),
        ));
    }

    if !URL_REGEX.is_match(url) {
        return Err(AppError::ValidationError(format!(
            "Invalid URL format: {}",
            url
        )));
    }

    let injection_chars = [';', '|', '`', '$', '<', '>', '\\', '{', '}', '^', '\'', '"'];
    if url.chars().any(|c| injection_chars.contains(&c)) {
        return Err(AppError::ValidationError(
            "URL contains unusual characters".to_string(),
        ));
    }

    // Validate URL does not target internal network
    let host = url
        .split("://")
        .nth(1)
        .and_then(|rest| rest.split(['/', '?', '#']).next())
        .unwrap_or("");
    let localhost_patterns = ["localhost", "127.", "::1", "0.0.0.0", "10.", "192.168.", "172.16."];
    if localhost_patterns
        .iter()
        .any(|&pattern| host.starts_with(pattern) || host.contains(&format!("@{}", pattern)))
    {
        return Err(AppError::ValidationError(
            "URLs targeting internal networks are not allowed".to_string(),
        ));
    }

    debug!("URL validated: {}", url);
    Ok(())
}

/// Strip characters that are unsafe in file names on common platforms
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => ' ',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect();

    let collapsed = sanitized.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches(|c: char| c == '.' || c.is_whitespace());
    trimmed.chars().take(MAX_FILENAME_LENGTH).collect()
}

/// Extensions accepted as-is on a caller-supplied file name
const MEDIA_EXTENSIONS: &[&str] = &[
    "3gp", "aac", "flac", "flv", "m4a", "mkv", "mov", "mp3", "mp4", "ogg", "opus", "wav", "webm",
];

fn media_extension(name: &str) -> Option<(&str, String)> {
    let (stem, extension) = name.rsplit_once('.')?;
    let extension = extension.to_ascii_lowercase();
    MEDIA_EXTENSIONS
        .contains(&extension.as_str())
        .then_some((stem, extension))
}

/// Pick the file name for a download.
///
/// A caller-supplied name keeps a media extension it already carries and
/// otherwise gets the container extension; its stem is sanitized like a title.
/// Without a name the sanitized title is used.
pub fn resolve_filename(
    requested: Option<&str>,
    title: &str,
    container: &str,
) -> Result<String, AppError> {
    let (base, extension) = match requested.map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) => {
            if name.contains(['/', '\\']) || name == "." || name == ".." {
                return Err(AppError::PathError(format!(
                    "File name must not contain path separators: {}",
                    name
                )));
            }
            match media_extension(name) {
                Some((stem, extension)) => (sanitize_filename(stem), extension),
                None => (sanitize_filename(name), container.to_string()),
            }
        }
        None => (sanitize_filename(title), container.to_string()),
    };

    if base.is_empty() {
        return Err(AppError::ValidationError(
            "Could not derive a file name for the download".to_string(),
        ));
    }
    Ok(format!("{}.{}", base, extension))
}

/// Human-readable duration: `1h 2m 3s` or `2m 3s`
pub fn format_duration(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else {
        format!("{}m {}s", minutes, seconds)
    }
}

/// Delete a partially written download, ignoring a file that was never created
pub fn remove_partial_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("Removed partial file {:?}", path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial file {:?}: {}", path, e),
    }
}
