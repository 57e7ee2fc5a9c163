//! Configuration loading with env-var overrides.
//!
//! Reads a TOML file (a missing file means all defaults), then applies
//! `BOOKLEND_DATA_DIR` and `BOOKLEND_LOG_LEVEL`.

use std::{
    env, fs, io,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{error::AppError, logger, runtime::handle::RuntimeConfig};

/// Config file read when no path is given.
pub const DEFAULT_CONFIG_PATH: &str = "booklend.toml";
/// Database file name inside the data directory.
pub const SQLITE_FILE: &str = "booklend.db";

/// Storage adapter selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// `books.csv` and `librarians.csv`.
    #[default]
    Csv,
    /// `booklend.db`.
    Sqlite,
}

/// Resolved settings for the console binary.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory holding the stored state.
    pub data_dir: PathBuf,
    /// Storage adapter.
    pub backend: Backend,
    /// Default tracing level; `RUST_LOG` overrides it.
    pub log_level: String,
    /// Runtime and persistence-worker settings.
    pub runtime: RuntimeConfig,
}

impl Config {
    /// Database path for [`Backend::Sqlite`].
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join(SQLITE_FILE)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            backend: Backend::default(),
            log_level: "info".to_string(),
            runtime: RuntimeConfig::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    data_dir: Option<String>,
    backend: Backend,
    log_level: Option<String>,
    runtime: RuntimeConfig,
}

/// Loads `path` (or [`DEFAULT_CONFIG_PATH`]) and applies env overrides.
pub fn load(path: Option<&Path>) -> Result<Config, AppError> {
    let data_dir_override = env::var("BOOKLEND_DATA_DIR").ok();
    let log_level_override = env::var("BOOKLEND_LOG_LEVEL").ok();
    load_from(
        path.unwrap_or(Path::new(DEFAULT_CONFIG_PATH)),
        data_dir_override.as_deref(),
        log_level_override.as_deref(),
    )
}

/// Loader with explicit overrides, so tests need not touch the environment.
pub fn load_from(
    path: &Path,
    data_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let parsed: RawConfig = match fs::read_to_string(path) {
        Ok(raw) => toml::from_str(&raw)
            .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => RawConfig::default(),
        Err(e) => {
            return Err(AppError::Config(format!("cannot read {}: {e}", path.display())));
        }
    };

    let defaults = Config::default();
    let data_dir = data_dir_override
        .map(PathBuf::from)
        .or_else(|| parsed.data_dir.map(PathBuf::from))
        .unwrap_or(defaults.data_dir);
    let log_level = log_level_override
        .map(str::to_string)
        .or(parsed.log_level)
        .unwrap_or(defaults.log_level);
    logger::parse_level(&log_level).map_err(|e| AppError::Config(e.to_string()))?;

    if parsed.runtime.persist_queue_bound == 0 {
        return Err(AppError::Config("runtime.persist_queue_bound must be at least 1".into()));
    }

    Ok(Config {
        data_dir,
        backend: parsed.backend,
        log_level,
        runtime: parsed.runtime,
    })
}
