//! Settings persistence
//!
//! Settings live in a single pretty-printed JSON file. A missing file means
//! defaults; a file that exists but cannot be read or parsed is an error the
//! caller must surface, not silently replace.

use crate::error::CoreError;
use hixs_types::Settings;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Environment variable that overrides the settings file location
pub const CONFIG_ENV: &str = "HIXS_CONFIG";

/// Reads and writes the settings file
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$HIXS_CONFIG`, else `<config dir>/hixs/settings.json`
    pub fn default_path() -> PathBuf {
        if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hixs")
            .join("settings.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings, falling back to defaults when the file does not exist
    pub async fn load(&self) -> Result<Settings, CoreError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No settings file, using defaults");
                return Ok(Settings::default());
            }
            Err(e) => {
                return Err(CoreError::Config(format!(
                    "cannot read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        serde_json::from_str(&content).map_err(|e| {
            CoreError::Config(format!("malformed {}: {}", self.path.display(), e))
        })
    }

    pub async fn save(&self, settings: &Settings) -> Result<(), CoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(settings)?;
        fs::write(&self.path, content).await?;

        info!(path = %self.path.display(), "Settings saved");
        Ok(())
    }
}
