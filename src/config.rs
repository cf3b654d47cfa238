// src/config.rs
// Runtime configuration passed explicitly to the download manager, and the settings collaborator contract

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;

pub const MIN_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY: usize = 5;
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Directory downloads go to when nothing else is configured
pub fn default_download_dir() -> PathBuf {
    dirs_next::download_dir()
        .or_else(|| dirs_next::home_dir().map(|home| home.join("Downloads")))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Check a concurrency limit against the supported range
pub fn validate_concurrency(limit: usize) -> Result<usize, AppError> {
    if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&limit) {
        return Err(AppError::ConfigError(format!(
            "Concurrency limit must be between {} and {}, got {}",
            MIN_CONCURRENCY, MAX_CONCURRENCY, limit
        )));
    }
    Ok(limit)
}

/// Configuration the core is constructed with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub download_dir: PathBuf,
    pub concurrency_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            concurrency_limit: DEFAULT_CONCURRENCY,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), AppError> {
        validate_concurrency(self.concurrency_limit)?;
        if self.download_dir.as_os_str().is_empty() {
            return Err(AppError::ConfigError(
                "Download directory cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Result<Self, AppError> {
        self.concurrency_limit = validate_concurrency(limit)?;
        Ok(self)
    }
}

/// Interface theme preference; stored for the presentation layer, unused by the core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    System,
    Light,
    Dark,
}

/// User settings as the persistence layer stores them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub download_path: PathBuf,
    pub theme: Theme,
    pub concurrency_limit: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_path: default_download_dir(),
            theme: Theme::default(),
            concurrency_limit: DEFAULT_CONCURRENCY,
        }
    }
}

impl From<&Settings> for Config {
    fn from(settings: &Settings) -> Self {
        Self {
            download_dir: settings.download_path.clone(),
            concurrency_limit: settings
                .concurrency_limit
                .clamp(MIN_CONCURRENCY, MAX_CONCURRENCY),
        }
    }
}

/// Settings persistence contract, implemented by the consumer layer
pub trait SettingsStore {
    fn load(&self) -> Result<Settings, AppError>;
    fn save(&self, settings: &Settings) -> Result<(), AppError>;
}

/// Settings kept for the lifetime of the process only
#[derive(Debug, Default)]
pub struct MemorySettings {
    settings: Mutex<Settings>,
}

impl MemorySettings {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: Mutex::new(settings),
        }
    }
}

impl SettingsStore for MemorySettings {
    fn load(&self) -> Result<Settings, AppError> {
        self.settings
            .lock()
            .map(|settings| settings.clone())
            .map_err(|_| AppError::General("settings store poisoned".to_string()))
    }

    fn save(&self, settings: &Settings) -> Result<(), AppError> {
        validate_concurrency(settings.concurrency_limit)?;
        let mut current = self
            .settings
            .lock()
            .map_err(|_| AppError::General("settings store poisoned".to_string()))?;
        *current = settings.clone();
        Ok(())
    }
}
