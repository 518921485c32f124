//! Error types for the admission controller.

use thiserror::Error;

/// Main error type for admission operations.
///
/// A rejected request is not an error: it is reported through
/// [`AdmissionResult`](crate::ratelimit::AdmissionResult).
#[derive(Error, Debug)]
pub enum AdmissionError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A window policy with a zero limit or a zero-length window
    #[error("Invalid window policy: max_requests={max_requests}, window_ms={window_ms}")]
    InvalidPolicy { max_requests: u32, window_ms: u64 },

    /// A preset name that does not match any known preset
    #[error("Unknown preset: {0}")]
    UnknownPreset(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for AdmissionError {
    fn from(err: config::ConfigError) -> Self {
        AdmissionError::Config(err.to_string())
    }
}

/// Result type alias for admission operations.
pub type Result<T> = std::result::Result<T, AdmissionError>;
