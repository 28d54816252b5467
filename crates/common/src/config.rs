//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default export settings used when the front-end does not override them.
    #[serde(default)]
    pub export: ExportDefaults,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Default export parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDefaults {
    /// Output width in pixels.
    pub width: u32,

    /// Output height in pixels.
    pub height: u32,

    /// Output frame rate.
    pub fps: u32,

    /// Export length in seconds.
    pub length_secs: f64,

    /// Render worker count. Zero means "use all hardware threads".
    pub threads: usize,

    /// Quality on the 0–100 scale.
    pub quality: u8,

    /// Encoder executable (looked up on PATH when not absolute).
    pub encoder_path: PathBuf,

    /// Look-ahead window as a multiple of the worker count.
    pub lookahead_factor: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "framecast=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Whether to include thread names in log lines.
    #[serde(default)]
    pub thread_names: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            export: ExportDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ExportDefaults {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
            length_secs: 60.0,
            threads: 0,
            quality: 50,
            encoder_path: PathBuf::from("ffmpeg"),
            lookahead_factor: 3,
        }
    }
}

impl ExportDefaults {
    /// Worker count with the "all hardware threads" default resolved.
    pub fn resolved_threads(&self) -> usize {
        if self.threads == 0 {
            hardware_concurrency()
        } else {
            self.threads
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            thread_names: false,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        Self::load_from(&config_file_path())
    }

    /// Load config from an explicit path, falling back to defaults.
    pub fn load_from(config_path: &Path) -> Self {
        if config_path.exists() {
            match std::fs::read_to_string(config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }
}

/// Upper bound for the render worker count on this machine.
pub fn hardware_concurrency() -> usize {
    num_cpus::get().max(1)
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("framecast").join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = AppConfig::default();
        config.export.width = 640;
        config.export.quality = 80;
        config.logging.level = "debug".to_string();
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = AppConfig::load_from(&path);
        assert_eq!(loaded.export.width, 640);
        assert_eq!(loaded.export.quality, 80);
        assert_eq!(loaded.logging.level, "debug");
    }

    #[test]
    fn test_malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let loaded = AppConfig::load_from(&path);
        assert_eq!(loaded.export.fps, ExportDefaults::default().fps);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"logging":{"level":"warn","json":true}}"#).unwrap();

        let loaded = AppConfig::load_from(&path);
        assert_eq!(loaded.logging.level, "warn");
        assert!(!loaded.logging.thread_names);
        assert_eq!(loaded.export.encoder_path, PathBuf::from("ffmpeg"));
    }

    #[test]
    fn test_zero_threads_resolves_to_hardware() {
        let defaults = ExportDefaults::default();
        assert_eq!(defaults.resolved_threads(), hardware_concurrency());

        let pinned = ExportDefaults {
            threads: 2,
            ..ExportDefaults::default()
        };
        assert_eq!(pinned.resolved_threads(), 2);
    }
}
