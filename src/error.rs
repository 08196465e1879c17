//! Error types for image acquisition, detection and cropping

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias for covercrop operations
pub type Result<T> = std::result::Result<T, CoverCropError>;

/// Error taxonomy for the image pipeline
///
/// Fetch, decode and classifier errors propagate unchanged to the caller.
/// [`CoverCropError::CacheWrite`] is only ever reported (logged and counted)
/// by the cache stores and never aborts a request.
#[derive(Error, Debug)]
pub enum CoverCropError {
    /// No candidate image URL exists for the requested entity
    #[error("Image not found: {0}")]
    NotFound(String),

    /// No fetcher is registered for the provider
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    /// Network or transport failure while fetching image bytes
    #[error("Fetch error for '{url}': {message}")]
    Fetch { url: String, message: String },

    /// Bytes are not a decodable image
    #[error("Decode error: {context}: {source}")]
    Decode {
        context: String,
        #[source]
        source: image::ImageError,
    },

    /// A cache file exists but cannot be decoded
    #[error("Corrupt cache entry '{}': {reason}", path.display())]
    CorruptCacheEntry { path: PathBuf, reason: String },

    /// The cascade model is missing or malformed
    #[error("Classifier unavailable: {0}")]
    ClassifierUnavailable(String),

    /// A cache entry could not be persisted
    #[error("Cache write error '{}': {reason}", path.display())]
    CacheWrite { path: PathBuf, reason: String },

    /// Caller-supplied aspect ratio outside sane bounds
    #[error("Invalid ratio: {0}")]
    InvalidRatio(String),

    /// Caller-supplied or computed position outside [0, 1]
    #[error("Invalid position: {0}")]
    InvalidPosition(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A bounded operation exceeded its time budget
    #[error("Timed out after {millis} ms: {operation}")]
    Timeout { operation: String, millis: u128 },

    /// The request was cancelled cooperatively
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Input/output errors (permission denied, missing directories, ...)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoverCropError {
    /// Create a new not-found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new classifier error
    pub fn classifier<S: Into<String>>(msg: S) -> Self {
        Self::ClassifierUnavailable(msg.into())
    }

    /// Create a new cancellation error
    pub fn cancelled<S: Into<String>>(operation: S) -> Self {
        Self::Cancelled(operation.into())
    }

    /// Create a fetch error for a URL
    pub fn fetch_error<U: Into<String>, E: std::fmt::Display>(url: U, error: E) -> Self {
        Self::Fetch {
            url: url.into(),
            message: error.to_string(),
        }
    }

    /// Create a decode error with context about where the bytes came from
    pub fn decode_error<S: Into<String>>(context: S, source: image::ImageError) -> Self {
        Self::Decode {
            context: context.into(),
            source,
        }
    }

    /// Create a corrupt-cache-entry error
    pub fn corrupt_entry<P: AsRef<Path>, E: std::fmt::Display>(path: P, error: E) -> Self {
        Self::CorruptCacheEntry {
            path: path.as_ref().to_path_buf(),
            reason: error.to_string(),
        }
    }

    /// Create a cache write error
    pub fn cache_write<P: AsRef<Path>, E: std::fmt::Display>(path: P, error: E) -> Self {
        Self::CacheWrite {
            path: path.as_ref().to_path_buf(),
            reason: error.to_string(),
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S, limit: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            millis: limit.as_millis(),
        }
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<Path>>(operation: &str, path: P, error: &std::io::Error) -> Self {
        Self::Io(std::io::Error::new(
            error.kind(),
            format!(
                "Failed to {} '{}': {}",
                operation,
                path.as_ref().display(),
                error
            ),
        ))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }

    /// Whether the error is a decode failure, including corrupt cache entries
    #[must_use]
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. } | Self::CorruptCacheEntry { .. })
    }
}
