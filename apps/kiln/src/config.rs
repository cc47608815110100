//! # Configuration
//!
//! Parses `kiln.toml`. Every section is optional; missing keys fall back to
//! defaults, and the environment and command line override the file.
//!
//! ```toml
//! [storage]
//! database = "build/kiln.redb"
//!
//! [log]
//! format = "json"
//! filter = "kiln=debug,kiln_core=debug"
//! ```

use kiln_core::KilnError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// File looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "kiln.toml";

/// Environment variable overriding `[log] format`.
pub const LOG_FORMAT_ENV: &str = "KILN_LOG_FORMAT";

/// Maximum size of a configuration file (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Top-level configuration loaded from `kiln.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KilnConfig {
    pub storage: StorageConfig,
    pub log: LogConfig,
}

/// `[storage]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Path of the redb database holding the build graphs.
    pub database: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("kiln.redb"),
        }
    }
}

/// `[log]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    pub format: LogFormat,
    /// `tracing_subscriber::EnvFilter` directives; `RUST_LOG` wins if set.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            filter: "kiln=info,kiln_core=info".to_string(),
        }
    }
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = KilnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(KilnError::DeserializationError(format!(
                "unknown log format '{}' (expected text or json)",
                other
            ))),
        }
    }
}

impl KilnConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, KilnError> {
        toml::from_str(text)
            .map_err(|e| KilnError::DeserializationError(format!("kiln.toml: {}", e)))
    }

    /// Load the configuration.
    ///
    /// An explicit `path` must exist. Without one, `kiln.toml` in the working
    /// directory is used when present, defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, KilnError> {
        let candidate = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.is_file() {
                    return Ok(Self::default());
                }
                default
            }
        };

        let metadata = std::fs::metadata(&candidate).map_err(|e| {
            KilnError::IoError(format!("Cannot read '{}': {}", candidate.display(), e))
        })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(KilnError::IoError(format!(
                "'{}' exceeds {} bytes",
                candidate.display(),
                MAX_CONFIG_FILE_SIZE
            )));
        }
        let text = std::fs::read_to_string(&candidate).map_err(|e| {
            KilnError::IoError(format!("Cannot read '{}': {}", candidate.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Apply `KILN_LOG_FORMAT` if it is set to a known format.
    pub fn apply_env(&mut self) {
        if let Some(format) = std::env::var(LOG_FORMAT_ENV)
            .ok()
            .and_then(|v| v.parse::<LogFormat>().ok())
        {
            self.log.format = format;
        }
    }
}
