use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, LevelFilter};
use serde::{Deserialize, Serialize};

use crate::bluetooth::ScanConfig;
use crate::error::{Result, ScanError};

/// Log verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        };
        f.write_str(name)
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Log verbosity
    pub log_level: LogLevel,

    /// Append logs to this file
    pub log_file: Option<PathBuf>,

    /// Write logs to stderr
    pub console_log: bool,

    /// Emit debug records from every module, not only the selected categories
    pub debug_all: bool,

    /// Discovery session settings
    pub scan: ScanConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_file: None,
            console_log: true,
            debug_all: false,
            scan: ScanConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from the default settings path
    pub fn load() -> Result<Self> {
        Self::load_from_path(&default_settings_path())
    }

    /// Load from `path`, falling back to defaults when the file does not exist
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|e| ScanError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Save to the default settings path
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&default_settings_path())
    }

    /// Save to `path`, creating parent directories as needed
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        debug!("Settings saved to {}", path.display());
        Ok(())
    }
}

/// Get the default settings path
pub fn default_settings_path() -> PathBuf {
    dirs_next::config_dir()
        .map(|config_dir| config_dir.join("nearbyscan").join("settings.json"))
        .unwrap_or_else(|| PathBuf::from("settings.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();

        assert_eq!(config.log_level, LogLevel::Info);
        assert!(config.console_log);
        assert!(!config.debug_all);
        assert!(config.log_file.is_none());
        assert_eq!(config.scan, ScanConfig::default());
    }

    #[test]
    fn test_log_level_filter() {
        assert_eq!(LevelFilter::from(LogLevel::Warn), LevelFilter::Warn);
        assert_eq!(LogLevel::Trace.to_string(), "trace");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{ "log_level": "debug" }"#).unwrap();
        assert_eq!(config.log_level, LogLevel::Debug);
        assert!(config.console_log);
    }

    #[test]
    fn test_default_path_ends_with_settings_file() {
        let path = default_settings_path();
        assert!(path.ends_with("nearbyscan/settings.json") || path.ends_with("settings.json"));
    }
}
