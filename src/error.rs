//! Error types for QA ingestion.

use thiserror::Error;

/// Error for one ingestion run: read, fetch or parse.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Read error: {0}")]
    Read(#[from] ReadError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Unknown test type: {0}")]
    UnknownTestType(String),
}

#[derive(Error, Debug)]
pub enum ReadError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Delimited text error: {0}")]
    Delimited(#[from] csv::Error),

    #[error("Workbook error: {0}")]
    Workbook(#[from] calamine::Error),

    #[error("Workbook has no sheets")]
    EmptyWorkbook,
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Fetch timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Invalid file URL: {0}")]
    InvalidUrl(String),

    #[error("Fetch cancelled")]
    Cancelled,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Proxy returned {status}: {message}")]
    Status { status: u16, message: String },
}

impl FetchError {
    /// Timeouts, connection problems and 5xx responses are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout(_) | FetchError::Network(_) => true,
            FetchError::Status { status, .. } => *status >= 500,
            FetchError::Cancelled | FetchError::InvalidUrl(_) => false,
        }
    }
}

/// Raised only when strict parsing is enabled; lenient parsing counts these instead.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("Unrecognized section title '{title}' at row {row}")]
    SectionUnrecognized { title: String, row: usize },

    #[error("Column '{header}' is not mapped for {test} (row {row})")]
    FieldUnmapped {
        test: String,
        header: String,
        row: usize,
    },
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Server error: {status} - {message}")]
    Server { status: u16, message: String },

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Invalid backend endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Corrupt outbox entry: {0}")]
    CorruptEntry(String),

    #[error("Retry exhausted after {0} attempts")]
    RetryExhausted(u32),
}

impl PersistenceError {
    /// Network trouble and 5xx responses are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            PersistenceError::Network(_) => true,
            PersistenceError::Server { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum SpoolError {
    #[error("Spool directory not writable: {0}")]
    NotWritable(String),

    #[error("Spool full: {0} MB used of {1} MB limit")]
    Full(u64, u64),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("File operation failed: {0}")]
    FileOperation(String),
}
