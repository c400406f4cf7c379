/// Centralized error types for the candle cache
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    // Request Validation Errors
    #[error("Symbol not allowed: {0}")]
    InvalidSymbol(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    // Upstream Errors
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Malformed upstream response: {0}")]
    MalformedResponse(String),

    // Data Errors
    #[error("No data available: {0}")]
    NoDataAvailable(String),

    #[error("Offset out of range: offset {offset} with limit {limit} over {available} bars")]
    OutOfRange {
        offset: usize,
        limit: usize,
        available: usize,
    },

    #[error("No data for slice: {0}")]
    EmptySlice(String),

    // Storage Errors
    #[error("Storage error: {0}")]
    StorageError(#[from] rusqlite::Error),

    #[error("File I/O error: {0}")]
    FileError(#[from] std::io::Error),

    #[error("Serialization failed: {0}")]
    SerializationError(#[from] serde_json::Error),

    // Configuration Errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Job Queue Errors
    #[error("Job decode failed: {0}")]
    JobDecode(String),

    #[error("Job queue closed")]
    QueueClosed,

    // Generic Errors
    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;

impl CacheError {
    /// Transport-level failures a caller may retry with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CacheError::UpstreamUnavailable(_) | CacheError::HttpError(_)
        )
    }

    /// Failures that will not change on retry
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CacheError::InvalidSymbol(_)
                | CacheError::InvalidParameter(_)
                | CacheError::NoDataAvailable(_)
                | CacheError::OutOfRange { .. }
                | CacheError::EmptySlice(_)
                | CacheError::JobDecode(_)
        )
    }

    /// Status code the HTTP façade maps this error to
    pub fn http_status(&self) -> u16 {
        match self {
            CacheError::InvalidSymbol(_) | CacheError::InvalidParameter(_) => 400,
            CacheError::UpstreamUnavailable(_)
            | CacheError::HttpError(_)
            | CacheError::MalformedResponse(_) => 502,
            CacheError::NoDataAvailable(_) | CacheError::EmptySlice(_) => 404,
            CacheError::OutOfRange { .. } => 416,
            _ => 500,
        }
    }

    /// Get error code for logging/monitoring
    pub fn error_code(&self) -> &'static str {
        match self {
            CacheError::InvalidSymbol(_) => "REQ_001",
            CacheError::InvalidParameter(_) => "REQ_002",
            CacheError::UpstreamUnavailable(_) => "UP_001",
            CacheError::HttpError(_) => "UP_002",
            CacheError::MalformedResponse(_) => "UP_003",
            CacheError::NoDataAvailable(_) => "DATA_001",
            CacheError::OutOfRange { .. } => "DATA_002",
            CacheError::EmptySlice(_) => "DATA_003",
            CacheError::StorageError(_) => "STORE_001",
            CacheError::FileError(_) => "FILE_001",
            CacheError::SerializationError(_) => "SER_001",
            CacheError::ConfigError(_) => "CFG_001",
            CacheError::JobDecode(_) => "JOB_001",
            CacheError::QueueClosed => "JOB_002",
            CacheError::InternalError(_) => "INT_001",
        }
    }
}
