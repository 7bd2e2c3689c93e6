use thiserror::Error;

/// Failures of the track database or the vessel registry.
///
/// Callers treat these as transient: the vessel is skipped for the
/// current run and retried on the next scheduled cycle.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage query failed: {0}")]
    Query(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<mysql::Error> for StorageError {
    fn from(e: mysql::Error) -> Self {
        match e {
            mysql::Error::IoError(_) | mysql::Error::DriverError(_) | mysql::Error::UrlError(_) => {
                StorageError::Unavailable(e.to_string())
            }
            mysql::Error::FromValueError(_) | mysql::Error::FromRowError(_) => {
                StorageError::Corrupt(e.to_string())
            }
            _ => StorageError::Query(e.to_string()),
        }
    }
}

impl From<chrono::ParseError> for StorageError {
    fn from(e: chrono::ParseError) -> Self {
        StorageError::Corrupt(format!("timestamp: {}", e))
    }
}

/// Failures talking to the remote fleet position API.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("fleet API request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("fleet API returned HTTP {0}")]
    Status(u16),
    #[error("fleet API rejected the request: {0}")]
    Rejected(String),
    #[error("fleet API payload could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Startup configuration problems. These are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum GeocoderError {
    #[error("cannot open places file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse places file: {0}")]
    Csv(#[from] csv::Error),
    #[error("places file contains no usable rows")]
    Empty,
}

/// A scheduled job run that could not proceed at all. Per-vessel problems
/// never surface here.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
