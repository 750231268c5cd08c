//! Configuration management
//!
//! Layered loading: built-in defaults, then an optional TOML file, then
//! `SENTINEL__*` environment variables (e.g. `SENTINEL__API__BASE_URL`).

use crate::error::{ErrorContext, SentinelError, SentinelResult};
use crate::logging::LoggingConfig;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const SESSION_FILE_NAME: &str = "session.json";
const ENV_PREFIX: &str = "SENTINEL";

/// Top-level configuration of the console
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SentinelConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backend connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL every endpoint path is appended to
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// User agent string
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_seconds: 30,
            user_agent: format!("sentinel/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ApiConfig {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }
}

/// Where the session tokens are persisted
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Explicit session file; defaults to the platform data directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_file: Option<PathBuf>,
}

impl StorageConfig {
    pub fn session_path(&self) -> SentinelResult<PathBuf> {
        if let Some(path) = &self.session_file {
            return Ok(path.clone());
        }

        dirs::data_dir()
            .map(|dir| dir.join("sentinel").join(SESSION_FILE_NAME))
            .ok_or_else(|| SentinelError::Config {
                message: "Unable to determine a data directory for the session file".to_string(),
                source: None,
                context: ErrorContext::new("config")
                    .with_operation("session_path")
                    .with_suggestion("Set storage.session_file explicitly"),
            })
    }
}

impl SentinelConfig {
    /// Default location of the config file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("sentinel").join("config.toml"))
    }

    /// Load defaults, then the optional file, then environment overrides
    pub fn load(path: Option<&Path>) -> SentinelResult<Self> {
        let defaults = config::Config::try_from(&SentinelConfig::default()).map_err(|e| {
            SentinelError::Config {
                message: format!("Failed to build default configuration: {}", e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("config").with_operation("defaults"),
            }
        })?;

        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = path.map(Path::to_path_buf).or_else(Self::default_path) {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            );
        }

        let config: SentinelConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| SentinelError::Config {
                message: format!("Failed to load configuration: {}", e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("config")
                    .with_operation("load")
                    .with_suggestion("Check TOML syntax and SENTINEL__* variables"),
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> SentinelResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| SentinelError::Config {
            message: format!("Failed to read config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("read_file")
                .with_suggestion("Check if the config file exists and is readable"),
        })?;

        let config: SentinelConfig = toml::from_str(&content).map_err(|e| SentinelError::Config {
            message: format!("Failed to parse config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("parse_toml")
                .with_suggestion("Check TOML syntax in config file"),
        })?;

        Ok(config)
    }

    /// Save configuration to a file, creating parent directories
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> SentinelResult<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).map_err(|e| SentinelError::Config {
            message: format!("Failed to serialize config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config").with_operation("serialize_toml"),
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content).map_err(|e| SentinelError::Config {
            message: format!("Failed to write config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("write_file")
                .with_suggestion("Check if the directory exists and is writable"),
        })?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> SentinelResult<()> {
        let url = url::Url::parse(&self.api.base_url).map_err(|e| SentinelError::Config {
            message: format!("Invalid api.base_url '{}': {}", self.api.base_url, e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("validate")
                .with_suggestion("Use an absolute URL such as http://localhost:8000"),
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(crate::config_error!(
                format!("api.base_url must use http or https, got '{}'", url.scheme()),
                "config"
            ));
        }

        if self.api.timeout_seconds == 0 {
            return Err(SentinelError::Config {
                message: "api.timeout_seconds must be greater than 0".to_string(),
                source: None,
                context: ErrorContext::new("config")
                    .with_operation("validate")
                    .with_suggestion("Set api.timeout_seconds to a positive value"),
            });
        }

        if self.logging.log_to_file && self.logging.log_file_path.is_none() {
            return Err(SentinelError::Config {
                message: "logging.log_file_path must be set when log_to_file is true".to_string(),
                source: None,
                context: ErrorContext::new("config").with_operation("validate"),
            });
        }

        Ok(())
    }
}
