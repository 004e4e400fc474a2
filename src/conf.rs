use crate::debounce::DEFAULT_AUTO_STOP;
use anyhow::Context;
use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Settings {
    /// Source language for translate/listen when `--from` is not given
    /// "auto" lets the translation service detect it
    #[serde(default = "default_source")]
    pub default_source: String,

    /// Target language when `--to` is not given
    #[serde(default = "default_target")]
    pub default_target: String,

    /// Quiet period in milliseconds before live recognition stops, 0 = never
    #[serde(default = "default_auto_stop_ms")]
    pub auto_stop_ms: u64,

    /// Per-request HTTP timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Recognizer locale used when the source language is "auto"
    #[serde(default = "default_recognition_locale")]
    pub recognition_fallback_locale: String,

    /// Where state.json lives; platform data directory when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

fn default_source() -> String {
    "auto".to_string()
}

fn default_target() -> String {
    "en".to_string()
}

fn default_auto_stop_ms() -> u64 {
    DEFAULT_AUTO_STOP.as_millis() as u64
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_recognition_locale() -> String {
    "en-US".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_source: default_source(),
            default_target: default_target(),
            auto_stop_ms: default_auto_stop_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            recognition_fallback_locale: default_recognition_locale(),
            data_dir: None,
        }
    }
}

impl Settings {
    /// Load config from ~/.config/voxlate/config.toml
    /// Returns default settings if file doesn't exist or fails to parse
    pub fn load() -> Self {
        let Some(path) = config_path() else {
            warn!("Could not determine config directory, using defaults");
            return Self::default();
        };
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(settings) => {
                    debug!("Loaded settings from: {}", path.display());
                    settings
                }
                Err(e) => {
                    warn!("Failed to parse config: {}, using defaults", e);
                    Self::default()
                }
            },
            Err(_) => {
                debug!("No config file found at {}, using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Save config to ~/.config/voxlate/config.toml
    pub fn save(&self) -> anyhow::Result<()> {
        let Some(path) = config_path() else {
            anyhow::bail!("Could not determine config directory");
        };
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml = toml::to_string_pretty(self).context("Failed to serialize settings to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        info!("Saved settings to: {}", path.display());
        Ok(())
    }

    pub fn auto_stop(&self) -> Option<Duration> {
        (self.auto_stop_ms > 0).then(|| Duration::from_millis(self.auto_stop_ms))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Get the path to the config file: ~/.config/voxlate/config.toml
pub fn config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "voxlate").map(|dirs| dirs.config_dir().join("config.toml"))
}
