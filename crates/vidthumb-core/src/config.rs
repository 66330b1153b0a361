//! Application configuration.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::CacheConfig;
use crate::error::{Error, Result};
use crate::extractor::ExtractOptions;
use crate::ffmpeg::FfmpegConfig;
use crate::orchestrator::{DEFAULT_SEEK_TIME_SECS, OrchestratorConfig};

const fn default_seek_time_secs() -> f64 {
    DEFAULT_SEEK_TIME_SECS
}

const fn default_extract_options() -> ExtractOptions {
    ExtractOptions::card()
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// Cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Options for catalog thumbnail extraction.
    #[serde(default = "default_extract_options")]
    pub extract: ExtractOptions,
    /// Decoder binaries.
    #[serde(default)]
    pub ffmpeg: FfmpegConfig,
    /// Position of catalog thumbnails, in seconds.
    #[serde(default = "default_seek_time_secs")]
    pub seek_time_secs: f64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            extract: default_extract_options(),
            ffmpeg: FfmpegConfig::default(),
            seek_time_secs: DEFAULT_SEEK_TIME_SECS,
        }
    }
}

impl AppConfig {
    /// Load configuration from the platform config directory, creating it
    /// with defaults if not found.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read, parsed
    /// or validated.
    pub fn load() -> Result<Self> {
        let config_path = config_file_path();

        if !config_path.exists() {
            debug!("Config file not found, using defaults");
            let config = Self::default();
            if let Err(e) = config.save_to(&config_path) {
                warn!("Failed to save default config: {}", e);
            }
            return Ok(config);
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::file_system(path, format!("Failed to read config file: {e}")))?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::configuration(format!("Failed to parse config file: {e}")))?;
        config.validate()?;

        info!("Loaded config from {}", path.display());
        debug!(
            "Thumbnail cache directory: {}",
            config.cache.resolved_store_dir().display()
        );
        Ok(config)
    }

    /// Save configuration to a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or its directory cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).map_err(|e| {
                Error::file_system(parent, format!("Failed to create config directory: {e}"))
            })?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .map_err(|e| Error::file_system(path, format!("Failed to write config file: {e}")))?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Check that every setting is usable.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;

        if !(0.0..=1.0).contains(&self.extract.quality) {
            return Err(Error::configuration(format!(
                "extract.quality must be between 0 and 1, got {}",
                self.extract.quality
            )));
        }
        self.extract
            .validate()
            .map_err(|e| Error::configuration(format!("extract: {e}")))?;

        if !self.seek_time_secs.is_finite() || self.seek_time_secs < 0.0 {
            return Err(Error::configuration(format!(
                "seek_time_secs must be a non-negative number, got {}",
                self.seek_time_secs
            )));
        }
        Ok(())
    }

    /// Orchestrator settings derived from this configuration.
    #[must_use]
    pub const fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            seek_time_secs: self.seek_time_secs,
            options: self.extract,
        }
    }

    /// Get the path to the config file.
    #[must_use]
    pub fn config_file_path() -> PathBuf {
        config_file_path()
    }
}

/// Get the path to the config file.
fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("vidthumb")
        .join("config.json")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.extract, ExtractOptions::card());
        assert_eq!(config.seek_time_secs, 0.5);
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig {
            seek_time_secs: 2.0,
            ..Default::default()
        };

        let json = serde_json::to_string(&config).expect("Should serialize");
        let deserialized: AppConfig = serde_json::from_str(&json).expect("Should deserialize");

        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{"cache": {"max_entries": 50}}"#).unwrap();
        assert_eq!(config.cache.max_entries, 50);
        assert_eq!(config.extract, ExtractOptions::card());
        assert_eq!(config.ffmpeg, FfmpegConfig::default());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = TempDir::new().expect("Should create temp dir");
        let path = temp_dir.path().join("nested").join("config.json");
        let config = AppConfig {
            extract: ExtractOptions::full_frame(),
            ..Default::default()
        };

        config.save_to(&path).unwrap();
        let loaded = AppConfig::load_from(&path).unwrap();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_rejects_invalid_json() {
        let temp_dir = TempDir::new().expect("Should create temp dir");
        let path = temp_dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            AppConfig::load_from(&path),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().expect("Should create temp dir");
        assert!(matches!(
            AppConfig::load_from(&temp_dir.path().join("absent.json")),
            Err(Error::FileSystem { .. })
        ));
    }

    #[test]
    fn test_validation_rejects_bad_settings() {
        let mut config = AppConfig::default();
        config.extract.quality = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.extract.max_width = Some(0);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.extract.timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.cache.max_entries = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.seek_time_secs = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_orchestrator_settings() {
        let config = AppConfig {
            seek_time_secs: 3.0,
            ..Default::default()
        };
        let orchestrator = config.orchestrator();
        assert_eq!(orchestrator.seek_time_secs, 3.0);
        assert_eq!(orchestrator.options, ExtractOptions::card());
    }
}
