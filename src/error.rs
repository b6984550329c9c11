//! Custom error types for the event builder.
//!
//! This module defines the primary error type, `SortError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the failures that can stop a sort: configuration problems found at startup, I/O on
//! the input and output files, and serialization of the built events.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically TOML syntax or type mismatches
//!   in the settings file.
//! - **`Configuration`**: Semantic errors in a configuration that parsed fine (a zero
//!   window width, a channel mapped twice, a module outside the sfp×board grid). These
//!   are caught by `SortConfig::validate` before any stream processing begins.
//! - **`Io`**: Wraps `std::io::Error` for input and output files.
//! - **`Serialization`** / **`Csv`**: Encoding failures in the sinks.
//! - **`Input`**: A malformed record in a hit stream. The readers treat this as an
//!   implicit end-of-stream and keep the error for the caller to inspect.
//!
//! Data anomalies inside a well-formed stream (out-of-order timestamps, resume without
//! pause, unmapped channels, bad module ids on control records) are never errors: they
//! are logged and processing continues.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type SortResult<T> = std::result::Result<T, SortError>;

/// Failures that stop or shorten a sort.
#[derive(Error, Debug)]
pub enum SortError {
    /// Configuration could not be loaded or parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration loaded but is inconsistent.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Filesystem or stream failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV writer failure.
    #[cfg(feature = "storage_csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A hit record that could not be decoded.
    #[error("Malformed input at line {line}: {message}")]
    Input {
        /// 1-based line number in the input file.
        line: u64,
        /// Decoder message.
        message: String,
    },

    /// An event sink rejected its input.
    #[error("Sink error: {0}")]
    Sink(String),

    /// `start` called on a loop that is already running.
    #[error("Monitor loop is already running")]
    MonitorRunning,

    /// A cargo feature required for the request is disabled.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl SortError {
    /// Whether the current run can carry on after this error.
    ///
    /// Malformed input ends the stream early but the events built so far are
    /// still valid, so it counts as recoverable. Everything else aborts.
    pub fn can_recover(&self) -> bool {
        matches!(self, SortError::Input { .. } | SortError::MonitorRunning)
    }
}
