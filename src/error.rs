use thiserror::Error;

use crate::types::Band;

/// Why a connection operation did not end in `Streaming`.
#[derive(Debug, Error)]
pub enum LinkError {
    /// A recoverable link fault (GATT error, timeout, dropped write).
    #[error("transient link error: {0:#}")]
    Transient(#[from] anyhow::Error),
    /// No bonded device matches the name prefix.
    #[error("no bonded device found")]
    DeviceAbsent,
    /// A user disconnect cancelled the operation.
    #[error("cancelled by user disconnect")]
    Cancelled,
    #[error("connect failed after {attempts} attempts")]
    ConnectFailed { attempts: u32 },
    #[error("reconnect gave up after {attempts} attempts")]
    CeilingExceeded { attempts: u32 },
}

impl LinkError {
    /// `true` for outcomes that leave the manager `Idle` rather than in
    /// `Error`; only exhausted retries need a fresh manual connect.
    pub fn is_benign(&self) -> bool {
        !matches!(self, LinkError::ConnectFailed { .. } | LinkError::CeilingExceeded { .. })
    }
}

/// Rejected mapper configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{band}: {parameter} must be finite and > 0, got {value}")]
    NonPositive {
        band: Band,
        parameter: &'static str,
        value: f64,
    },
    #[error("{band} is mapped more than once")]
    DuplicateBand { band: Band },
}
