//! Logging initialisation via tracing-subscriber.
//!
//! Call [`init`] once at startup, after the configuration is loaded.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::error::AppError;

/// Installs the global subscriber, writing to stderr.
///
/// `RUST_LOG` wins when set and valid; otherwise `level` is used.
pub fn init(level: &str) -> Result<(), AppError> {
    parse_level(level)?;
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| AppError::Logger(format!("invalid log level '{level}': {e}")))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| AppError::Logger(format!("failed to set subscriber: {e}")))?;

    Ok(())
}

/// Parses a plain level name such as `"info"` or `"debug"`.
pub fn parse_level(level: &str) -> Result<LevelFilter, AppError> {
    if level.is_empty() {
        return Err(AppError::Logger("log level must not be empty".into()));
    }
    level
        .parse::<LevelFilter>()
        .map_err(|_| AppError::Logger(format!("unrecognised log level: '{level}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_levels_parse() {
        for l in &["error", "warn", "info", "debug", "trace", "off"] {
            assert!(parse_level(l).is_ok(), "expected '{l}' to be valid");
        }
    }

    #[test]
    fn invalid_level_errors() {
        assert!(parse_level("chatty").is_err());
        assert!(parse_level("").is_err());
    }

    #[test]
    fn init_rejects_bad_level_before_installing() {
        assert!(matches!(init("chatty"), Err(AppError::Logger(_))));
    }

    #[test]
    fn init_info_succeeds_or_already_init() {
        match init("info") {
            Ok(()) => {}
            Err(AppError::Logger(msg)) if msg.contains("set subscriber") => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}
