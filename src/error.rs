// MangaShelf - Offline Manga Reader for Handheld Devices
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Error types for the offline download core
//!
//! # Error Categories
//!
//! ### Remote API (library server collaborator)
//! - Chapter page list could not be fetched → `ApiRequestFailed`
//! - Chapter page list is empty → `InvalidApiResponse`
//!
//! ### Download/Network (page fetcher)
//! - Connection drops, timeouts → `NetworkError`
//! - Non-success HTTP status → `UnexpectedStatusCode`
//! - Anything else that leaves a page or chapter incomplete → `DownloadFailed`
//!
//! ### File Operations
//! - Missing manga/chapter directory → `DownloadDirectoryNotFound`
//! - Create/remove/rename failures → `FileIoError`
//!
//! ### Persistence
//! - State file larger than the configured cap → `StateFileTooLarge`
//!
//! An unreadable or unparseable state file is not an error; it loads as an empty catalog.
//!
//! ### Catalog/Configuration
//! - Unknown manga or chapter → `RecordNotFound`
//! - Bad ids, empty titles → `InvalidInput`
//! - Operation not allowed in the current chapter state → `InvalidState`
//!
//! Nothing here is fatal to the process. Network and filesystem failures inside the
//! worker end up as a FAILED chapter and a `success = false` completion event; they are
//! never returned to the command caller.

use thiserror::Error;

/// Result type alias using our DownloadError type
pub type Result<T> = std::result::Result<T, DownloadError>;

/// Main error type for the download core
#[derive(Error, Debug)]
pub enum DownloadError {
    // ===== API Errors =====

    /// Remote library server request failed
    #[error("API request failed: {message}")]
    ApiRequestFailed {
        message: String,
        /// HTTP status code if available
        status_code: Option<u16>,
    },

    /// Server returned a response we can't interpret
    #[error("Invalid API response: {0}")]
    InvalidApiResponse(String),

    // ===== Download Errors =====

    /// Generic download failure
    #[error("Download failed: {0}")]
    DownloadFailed(String),

    /// Network connectivity error
    #[error("Network error: {message}")]
    NetworkError {
        message: String,
        /// Whether this error might be transient
        is_transient: bool,
    },

    /// Server returned unexpected status code for a page or cover
    #[error("Server responded with unexpected status code {status_code} for {url}")]
    UnexpectedStatusCode {
        status_code: u16,
        url: String,
    },

    /// Page URL could not be resolved
    #[error("Invalid download URL: {0}")]
    InvalidDownloadUrl(String),

    // ===== File/Storage Errors =====

    /// Generic file I/O error with context
    #[error("File I/O error: {0}")]
    FileIoError(String),

    /// Manga or chapter directory is missing when the worker needs it
    #[error("Download directory does not exist: {0}")]
    DownloadDirectoryNotFound(String),

    // ===== Persistence Errors =====

    /// Serialized catalog exceeds the configured size cap
    #[error("State file too large ({size} bytes, limit {limit} bytes)")]
    StateFileTooLarge {
        size: u64,
        limit: u64,
    },

    // ===== Catalog/Configuration Errors =====

    /// Manga or chapter not present in the catalog
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    /// Generic input validation error
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation not valid for the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration file or value error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    // ===== General Errors =====

    /// Operation was cancelled by user or system
    #[error("Operation cancelled")]
    Cancelled,

    /// Internal error that should not normally occur
    #[error("Internal error: {0}")]
    InternalError(String),

    // ===== External Library Errors =====

    /// HTTP client error from reqwest
    #[error("HTTP client error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    /// URL parsing error
    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<tokio::task::JoinError> for DownloadError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            DownloadError::Cancelled
        } else {
            DownloadError::InternalError(format!("Task panicked: {}", err))
        }
    }
}

// Helper methods for creating common errors
impl DownloadError {
    /// Create a RecordNotFound error with a resource name
    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        DownloadError::RecordNotFound(resource.into())
    }

    /// Create an InvalidInput error with a message
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        DownloadError::InvalidInput(message.into())
    }

    /// Create an InternalError with a message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        DownloadError::InternalError(message.into())
    }

    /// Create an ApiRequestFailed error
    pub fn api_failed<S: Into<String>>(message: S, status_code: Option<u16>) -> Self {
        DownloadError::ApiRequestFailed {
            message: message.into(),
            status_code,
        }
    }

    /// Create a NetworkError
    pub fn network_error<S: Into<String>>(message: S, is_transient: bool) -> Self {
        DownloadError::NetworkError {
            message: message.into(),
            is_transient,
        }
    }

    /// Check if error is retryable (network errors, 5xx, interrupted bodies)
    ///
    /// A retryable failure still lands the chapter in FAILED; the flag only tells the
    /// UI whether offering "resume" is likely to help.
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::NetworkError { is_transient, .. } => *is_transient,
            DownloadError::ApiRequestFailed { status_code: Some(code), .. } => *code >= 500,
            DownloadError::ApiRequestFailed { status_code: None, .. } => true,
            DownloadError::UnexpectedStatusCode { status_code, .. } => {
                *status_code >= 500 || *status_code == 429
            }
            DownloadError::ReqwestError(e) => e.is_timeout() || e.is_connect() || e.is_body(),
            DownloadError::DownloadFailed(_) => true,
            _ => false,
        }
    }

    /// Check if error is related to file/disk operations
    pub fn is_file_error(&self) -> bool {
        matches!(
            self,
            DownloadError::FileIoError(_)
                | DownloadError::DownloadDirectoryNotFound(_)
                | DownloadError::IoError(_)
        )
    }

    /// Get user-friendly error message suitable for display
    pub fn user_message(&self) -> String {
        match self {
            DownloadError::ApiRequestFailed { status_code: Some(401), .. }
            | DownloadError::UnexpectedStatusCode { status_code: 401, .. } => {
                "The server rejected our credentials. Please log in again.".to_string()
            }
            DownloadError::NetworkError { .. } | DownloadError::ReqwestError(_) => {
                "Could not reach the server. Check the connection and resume the download."
                    .to_string()
            }
            DownloadError::DownloadDirectoryNotFound(_) | DownloadError::FileIoError(_) => {
                "Could not write to storage. Check free space on the SD card.".to_string()
            }
            DownloadError::StateFileTooLarge { .. } => {
                "The download list is too large to save. Delete some downloads.".to_string()
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(DownloadError::network_error("reset", true).is_retryable());
        assert!(!DownloadError::network_error("dns", false).is_retryable());
        assert!(DownloadError::api_failed("boom", Some(503)).is_retryable());
        assert!(!DownloadError::api_failed("gone", Some(404)).is_retryable());
        assert!(!DownloadError::not_found("manga 1").is_retryable());
    }

    #[test]
    fn test_file_error_classification() {
        assert!(DownloadError::DownloadDirectoryNotFound("/x".into()).is_file_error());
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert!(DownloadError::from(io).is_file_error());
        assert!(!DownloadError::Cancelled.is_file_error());
    }

    #[test]
    fn test_user_message_for_auth() {
        let err = DownloadError::UnexpectedStatusCode {
            status_code: 401,
            url: "http://server/page".into(),
        };
        assert!(err.user_message().contains("log in"));
    }
}
