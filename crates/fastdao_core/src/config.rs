//! Process-wide settings.
//!
//! # Responsibility
//! - Hold the default batch size and the default connection source.
//! - Load both from a serde-deserialized `Settings` value.
//!
//! # Invariants
//! - The batch size is never zero.
//! - A DAO snapshots the batch size when it is created; later changes only
//!   affect DAOs created afterwards.

use crate::db::ConnectionSource;
use crate::logging;
use log::info;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

pub const DEFAULT_BATCH_SIZE: usize = 500;

static BATCH_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_BATCH_SIZE);

static CONNECTION_SOURCE: Lazy<RwLock<Option<Arc<dyn ConnectionSource>>>> =
    Lazy::new(|| RwLock::new(None));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidBatchSize(usize),
    Logging(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidBatchSize(size) => {
                write!(f, "batch size must be at least 1, got {size}")
            }
            Self::Logging(message) => write!(f, "logging setup failed: {message}"),
        }
    }
}

impl Error for ConfigError {}

pub(crate) fn validate_batch_size(size: usize) -> Result<usize, ConfigError> {
    if size == 0 {
        return Err(ConfigError::InvalidBatchSize(size));
    }
    Ok(size)
}

/// Sets the batch size used by DAOs created from now on.
pub fn set_batch_size(size: usize) -> Result<(), ConfigError> {
    let size = validate_batch_size(size)?;
    BATCH_SIZE.store(size, Ordering::Relaxed);
    info!("event=config_set module=config status=ok batch_size={}", size);
    Ok(())
}

pub fn batch_size() -> usize {
    BATCH_SIZE.load(Ordering::Relaxed)
}

/// Installs the connection source used by `Dao::new`.
pub fn set_connection_source(source: Arc<dyn ConnectionSource>) {
    *CONNECTION_SOURCE
        .write()
        .unwrap_or_else(PoisonError::into_inner) = Some(source);
    info!("event=config_set module=config status=ok connection_source=installed");
}

pub fn connection_source() -> Option<Arc<dyn ConnectionSource>> {
    CONNECTION_SOURCE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Startup settings, typically deserialized from a config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub batch_size: usize,
    pub log_level: Option<String>,
    /// Absolute directory for rolling log files; logging stays off when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            log_level: None,
            log_dir: None,
        }
    }
}

impl Settings {
    /// Applies the settings to the process.
    pub fn apply(&self) -> Result<(), ConfigError> {
        set_batch_size(self.batch_size)?;
        if let Some(dir) = &self.log_dir {
            let level = self
                .log_level
                .as_deref()
                .unwrap_or(logging::default_log_level());
            let dir = dir
                .to_str()
                .ok_or_else(|| ConfigError::Logging("log_dir is not valid UTF-8".to_string()))?;
            logging::init_logging(level, dir).map_err(ConfigError::Logging)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{validate_batch_size, ConfigError, Settings, DEFAULT_BATCH_SIZE};

    #[test]
    fn zero_batch_size_is_rejected() {
        assert_eq!(
            validate_batch_size(0),
            Err(ConfigError::InvalidBatchSize(0))
        );
        assert_eq!(validate_batch_size(1), Ok(1));
    }

    #[test]
    fn settings_default_to_the_standard_batch_size() {
        let settings = Settings::default();
        assert_eq!(settings.batch_size, DEFAULT_BATCH_SIZE);
        assert!(settings.log_dir.is_none());
    }
}
