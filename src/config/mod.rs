//! Configuration management.
//!
//! Configuration is read from `~/.config/freshet/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is created.

use serde::Deserialize;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub fetch: FetchConfig,
}

/// Where the two backend stores live. Relative paths are resolved
/// against the data directory; absolute paths are used as given.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub relational_file: String,
    pub document_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            relational_file: "freshet.db".into(),
            document_file: "freshet.json".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Maximum feeds refreshed concurrently.
    pub workers: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            workers: 10,
        }
    }
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, creates a default one with comments.
    /// If the config file exists but is invalid, returns an error.
    /// Missing fields in the config file will use default values.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path).map_err(|e| ConfigError::Io {
            path: config_path.clone(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: config_path,
            source: e,
        })?;

        Ok(config)
    }

    /// Get the default config file path: `~/.config/freshet/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("freshet").join("config.toml"))
    }

    /// Resolves the relational store path against the data directory.
    pub fn relational_path(&self) -> Result<PathBuf, ConfigError> {
        Self::resolve_data_path(&self.storage.relational_file)
    }

    /// Resolves the document store path against the data directory.
    pub fn document_path(&self) -> Result<PathBuf, ConfigError> {
        Self::resolve_data_path(&self.storage.document_file)
    }

    fn resolve_data_path(file: &str) -> Result<PathBuf, ConfigError> {
        let path = PathBuf::from(file);
        if path.is_absolute() {
            return Ok(path);
        }
        let data_dir = dirs::data_dir().ok_or(ConfigError::NoConfigDir)?;
        let freshet_dir = data_dir.join("freshet");
        fs::create_dir_all(&freshet_dir).map_err(|e| ConfigError::Io {
            path: freshet_dir.clone(),
            source: e,
        })?;
        Ok(freshet_dir.join(path))
    }

    /// Create a default config file with comments.
    fn create_default_config(path: &PathBuf) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let default_config = Self::default_config_content();

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.clone(),
            source: e,
        })?;

        file.write_all(default_config.as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.clone(),
                source: e,
            })?;

        Ok(())
    }

    /// Generate the default config file content with comments.
    fn default_config_content() -> String {
        r##"# Freshet Configuration

[storage]
# Store files, resolved against the platform data directory unless
# absolute. The document file existing means its backend is in use.
relational_file = "freshet.db"
document_file = "freshet.json"

[fetch]
# Per-request timeout in seconds
timeout_secs = 10

# Maximum feeds refreshed concurrently
workers = 10
"##
        .to_string()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}
