use std::time::Duration;

use thiserror::Error;

/// Invalid request parameters, detected before any fetch happens.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown currency pair '{label}'")]
    UnknownPair { label: String },
    #[error("{field} must be formatted YYYY/MM/DD: '{value}'")]
    MalformedDate { field: &'static str, value: String },
    #[error("{field} is not a calendar date: '{value}'")]
    InvalidDate { field: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to start downloader '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read downloader output: {0}")]
    Io(#[from] std::io::Error),
    #[error("downloader did not finish within {0:?}")]
    Timeout(Duration),
    #[error("document is not valid UTF-8: {0}")]
    Decode(#[from] std::string::FromUtf8Error),
    #[error("request to provider failed: {0}")]
    Http(#[from] ureq::Error),
    #[error("provider responded with HTTP {status}")]
    Status { status: u16 },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("invalid HTML document: no historical data rows found")]
    InvalidDocument,
    #[error("invalid HTML fragment: {0}")]
    MalformedFragment(&'static str),
}

#[derive(Debug, Error)]
pub enum OutputError {
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("row {row}: '{value}' is not a unix timestamp")]
    InvalidTimestamp { row: usize, value: String },
    #[error("row {row}: expected at least 5 cells, found {cells}")]
    MalformedRow { row: usize, cells: usize },
    #[error("row {row}: '{value}' is not a decimal {column} value")]
    InvalidValue {
        row: usize,
        column: &'static str,
        value: String,
    },
}

/// Top-level error for a single history run.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Output(#[from] OutputError),
}

impl Error {
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::Fetch(_) => 3,
            Self::Extract(_) => 4,
            Self::Output(_) => 5,
        }
    }
}
