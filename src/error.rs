use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Custom result type alias for the application
pub type Result<T> = std::result::Result<T, TrustLayerError>;

/// HTTP status classes the Jira upload path never retries.
pub const NON_RETRYABLE_STATUSES: &[u16] = &[400, 401, 403, 413, 415];

/// Errors that can occur while handling an analysis request
#[derive(Debug, Error)]
pub enum TrustLayerError {
    /// I/O errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// HTTP request/response errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing/serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The caller's shared secret did not match
    #[error("unauthorized")]
    Unauthorized,

    /// Required configuration is missing or invalid
    #[error("config error: {0}")]
    Config(String),

    /// The generative-text provider returned a non-success response
    #[error("provider error (status {status}): {details}")]
    Provider {
        /// HTTP status returned by the provider
        status: u16,
        /// Response body or transport diagnostics
        details: String,
    },

    /// A remote response decoded but did not have the expected shape
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// PDF rendering requires an issue key in the strict configuration
    #[error("PDF generation requires an issue key")]
    MissingIssueKey,

    /// The PDF backend failed while writing the document
    #[error("PDF write error: {0}")]
    PdfWrite(String),

    /// The local file to attach does not exist
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    /// Jira answered with a client-error status that must not be retried
    #[error("non-retryable upload error (status {status}): {details}")]
    NonRetryableUpload {
        /// Terminal HTTP status from the issue tracker
        status: u16,
        /// Response body returned with the failure
        details: String,
    },

    /// Transient upload failures persisted past the retry budget
    #[error("upload failed after retries (status {status:?}): {details}")]
    RetriesExhausted {
        /// Last HTTP status observed, if the failure reached the server
        status: Option<u16>,
        /// Last response body or transport diagnostics
        details: String,
    },
}

impl TrustLayerError {
    /// Whether an upload attempt that ended with `status` may be retried.
    pub fn upload_status_is_retryable(status: u16) -> bool {
        !NON_RETRYABLE_STATUSES.contains(&status)
    }

    /// Checks if this error is an upload failure of either class
    pub fn is_upload_failure(&self) -> bool {
        matches!(
            self,
            Self::NonRetryableUpload { .. } | Self::RetriesExhausted { .. }
        )
    }
}
