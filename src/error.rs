//! Application-wide error type for the console binary.

use thiserror::Error;

use crate::{persist::PersistError, runtime::handle::RuntimeError};

/// Startup and console failures.
#[derive(Debug, Error)]
pub enum AppError {
    /// Unreadable or invalid configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Bad log level or subscriber already installed.
    #[error("logger error: {0}")]
    Logger(String),

    /// Console input or output failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored state could not be opened or loaded.
    #[error("storage error: {0}")]
    Persist(#[from] PersistError),

    /// Runtime stopped or rejected a command.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
