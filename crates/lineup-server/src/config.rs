// Configuration loading and parsing (server.toml).

use serde::Deserialize;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use lineup_core::engine::EngineOptions;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot access config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },
}

// ---------------------------------------------------------------------------
// Config structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path, or `:memory:`.
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default = "default_true")]
    pub confirm_on_lineup: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        LifecycleConfig {
            confirm_on_lineup: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log file path. Logs go to stderr when unset.
    #[serde(default)]
    pub file: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            confirm_on_lineup: self.lifecycle.confirm_on_lineup,
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.bind, self.server.port)
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Shipped configuration, written out on first run.
pub const DEFAULT_CONFIG: &str = include_str!("../defaults/server.toml");

/// Where the server reads its configuration, relative to `base_dir`.
pub fn config_path(base_dir: &Path) -> PathBuf {
    base_dir.join("config").join("server.toml")
}

/// Load and validate `config/server.toml` under `base_dir`. A missing file is
/// first created from [`DEFAULT_CONFIG`]; an existing one is never touched.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = config_path(base_dir);
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => install_default(&path)?,
        Err(source) => return Err(ConfigError::Io { path, source }),
    };
    parse(&path, &text)
}

/// Load config relative to the current working directory.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|source| ConfigError::Io {
        path: PathBuf::from("."),
        source,
    })?;
    load_config_from(&cwd)
}

/// Parse and validate config text read from `path`.
pub fn parse(path: &Path, text: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(text).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })?;
    validate(&config)?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Write [`DEFAULT_CONFIG`] to `path` and return the text now on disk. If the
/// file appeared in the meantime, its content wins.
fn install_default(path: &Path) -> Result<String, ConfigError> {
    let io_err = |source: std::io::Error| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(io_err)?;
    }
    match fs::OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => {
            file.write_all(DEFAULT_CONFIG.as_bytes()).map_err(io_err)?;
            Ok(DEFAULT_CONFIG.to_string())
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => fs::read_to_string(path).map_err(io_err),
        Err(e) => Err(io_err(e)),
    }
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.server.bind.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "server.bind".into(),
            message: "must not be empty".into(),
        });
    }

    if config.server.port == 0 {
        return Err(ConfigError::ValidationError {
            field: "server.port".into(),
            message: "must be greater than 0".into(),
        });
    }

    if config.database.path.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "database.path".into(),
            message: "must not be empty".into(),
        });
    }

    if let Some(file) = &config.logging.file {
        if file.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                field: "logging.file".into(),
                message: "must not be empty when set".into(),
            });
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
