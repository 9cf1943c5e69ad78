use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::mot::TrackerError;
use crate::speed::CalibrationError;
use crate::utils::CoordinateError;

/// Startup failures. The stream does not start when one of them occurs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can't read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error(transparent)]
    Coordinates(#[from] CoordinateError),
    #[error("invalid config value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("detector i/o: {0}")]
    Io(#[from] io::Error),
    #[error("bad detection record on line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("detector unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EnrichmentError {
    #[error("no request slot within {waited_ms} ms")]
    RateLimited { waited_ms: u64 },
    #[error("violation carries no image evidence")]
    NoEvidence,
    #[error("analysis service returned status {status}: {message}")]
    Service { status: u16, message: String },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("malformed analysis response: {0}")]
    Malformed(String),
}

impl EnrichmentError {
    /// Client-side errors are not worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            EnrichmentError::Service { status, .. } => *status >= 500 || *status == 429,
            EnrichmentError::Transport(_) | EnrichmentError::RateLimited { .. } => true,
            EnrichmentError::NoEvidence | EnrichmentError::Malformed(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("sink i/o: {0}")]
    Io(#[from] io::Error),
    #[error("can't serialize violation: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("sink rejected violation: {0}")]
    Rejected(String),
}
