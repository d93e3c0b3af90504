//! Error types for the reverb replay engine

use std::io;
use thiserror::Error;

/// Result type alias for reverb operations
pub type Result<T> = std::result::Result<T, ReverbError>;

/// Main error type for reverb
#[derive(Error, Debug)]
pub enum ReverbError {
    /// Input file errors (cannot open, unreadable rules, invalid baseline)
    #[error("Input error: {0}")]
    Input(String),

    /// Request construction errors (invalid method, unparseable URL)
    #[error("Invalid request: {0}")]
    Build(String),

    /// Rule configuration validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// TLS configuration errors
    #[error("TLS error: {0}")]
    Tls(String),

    /// Certificate loading errors
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// Upstream connection errors in capture mode
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<rustls::Error> for ReverbError {
    fn from(err: rustls::Error) -> Self {
        ReverbError::Tls(err.to_string())
    }
}

impl From<reqwest::Error> for ReverbError {
    fn from(err: reqwest::Error) -> Self {
        ReverbError::Upstream(err.to_string())
    }
}

/// Process exit codes
///
/// `Diffs` is returned only in compare mode without a rules file; with rules,
/// the verdict of the evaluator decides between `Ok` and `Rules`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Run completed, nothing to report
    Ok = 0,
    /// Compare mode found differences
    Diffs = 1,
    /// One or more regression rules failed
    Rules = 2,
    /// Invalid command-line arguments or rule configuration
    InvalidArgs = 3,
    /// Any other runtime failure
    Runtime = 4,
}

impl ExitCode {
    /// Numeric code handed to the OS
    pub fn code(self) -> i32 {
        self as i32
    }
}
