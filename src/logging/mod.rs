//! Structured logging bootstrap.
//!
//! The teacher's own logging module hand-rolled a structured logging engine
//! (`LogEntry`/`LogFormatter`/`LogOutput`) underneath the `tracing` macros
//! every other module already calls. This crate drops that parallel engine
//! and wires `tracing`'s own ecosystem subscriber (`tracing-subscriber`)
//! directly, per the rule that ambient concerns use the crate the rest of
//! the corpus reaches for rather than a bespoke replacement.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("logging already initialized")]
    AlreadyInitialized,
    #[error("invalid filter directive: {0}")]
    InvalidFilter(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive, e.g. `"info,agent_collab_core=debug"`.
    pub filter: String,
    pub format: LogFormat,
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Pretty,
            with_target: true,
        }
    }
}

/// Install the global `tracing` subscriber described by `config`. Call once
/// at process startup; a second call returns `AlreadyInitialized` rather
/// than panicking, so embedders that may double-init (e.g. in tests) can
/// ignore the error.
pub fn init_logging(config: &LogConfig) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_new(&config.filter).map_err(|e| LoggingError::InvalidFilter(e.to_string()))?;

    let subscriber = fmt().with_env_filter(filter).with_target(config.with_target);

    let result = match config.format {
        LogFormat::Json => subscriber.json().try_init(),
        LogFormat::Pretty => subscriber.pretty().try_init(),
        LogFormat::Compact => subscriber.compact().try_init(),
    };

    result.map_err(|_| LoggingError::AlreadyInitialized)
}
