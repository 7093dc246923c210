//! Error types for wherenow.
//!
//! This module defines the error type shared by configuration, storage and
//! the HTTP service. Every storage failure carries the machine-readable code
//! that is reported to clients.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for wherenow operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// The log file does not exist or cannot be inspected.
    #[error("location log at {path} is not readable: {source}")]
    LogNotReadable {
        /// Path to the log file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The log file could not be opened.
    #[error("failed to open location log at {path}: {source}")]
    LogOpen {
        /// Path to the log file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The exclusive lock on the log file could not be acquired.
    #[error("failed to lock location log at {path}: {source}")]
    LogLock {
        /// Path to the log file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Writing a record to the log failed.
    #[error("failed to write location log: {0}")]
    LogWrite(#[source] std::io::Error),

    /// Reading the log during a rewrite failed.
    #[error("failed to read location log: {0}")]
    LogRead(#[source] std::io::Error),

    /// The scratch file used for a rewrite could not be created or written.
    #[error("temporary file error: {0}")]
    TempFile(#[source] std::io::Error),

    /// Truncating the log before copying back a rewrite failed.
    #[error("failed to truncate location log: {0}")]
    LogTruncate(#[source] std::io::Error),

    /// Copying a rewrite back into the log failed or was incomplete.
    #[error("failed to copy rewritten log: {message}")]
    LogCopy {
        /// Description of what went wrong.
        message: String,
    },

    /// No record in the log carries the requested identifier.
    #[error("no location with id {id}")]
    IdNotFound {
        /// The identifier that was looked up.
        id: String,
    },

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Server Errors ===
    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Generic I/O failure outside the log operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Serialization Errors ===
    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for wherenow operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create an incomplete-copy error.
    #[must_use]
    pub fn log_copy(message: impl Into<String>) -> Self {
        Self::LogCopy {
            message: message.into(),
        }
    }

    /// The error code reported to HTTP clients.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::LogNotReadable { .. } => "log_not_readable",
            Self::LogOpen { .. } => "cannot_open_log",
            Self::LogLock { .. } => "cannot_lock_log",
            Self::LogWrite(_) => "write_failed",
            Self::LogRead(_) => "read_failed",
            Self::TempFile(_) => "temp_file_failed",
            Self::LogTruncate(_) => "truncate_failed",
            Self::LogCopy { .. } => "copy_failed",
            Self::IdNotFound { .. } => "id_not_found",
            Self::Json(_) => "encode_failed",
            Self::DirectoryCreate { .. }
            | Self::ConfigLoad(_)
            | Self::ConfigValidation { .. }
            | Self::Bind { .. }
            | Self::Io(_)
            | Self::Internal(_) => "internal_error",
        }
    }

    /// Check if this error means the patch target does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::IdNotFound { .. })
    }
}
