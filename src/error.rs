//! Cardsmith error types

use std::time::Duration;

/// Generic message shown to guests in place of raw service errors.
pub const GENERIC_FAILURE_MESSAGE: &str =
    "We could not process this document. Please try uploading it again.";

/// Cardsmith error types
#[derive(Debug, thiserror::Error)]
pub enum CardsmithError {
    // Request validation (rejected before any cache interaction)
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("file too large: {size} bytes (limit {limit})")]
    FileTooLarge { size: u64, limit: u64 },

    // Generation service errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed generation response: {0}")]
    MalformedResponse(String),

    #[error("generation failed: {0}")]
    Generation(String),

    // Persistence errors
    #[error("not found: {0}")]
    NotFound(String),

    /// A concurrent writer got there first (unique insert or version check).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Background work could not be handed to the worker pool.
    #[error("job queue closed")]
    QueueClosed,
}

impl From<reqwest::Error> for CardsmithError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CardsmithError::Http(format!("request timed out: {err}"))
        } else if err.is_decode() {
            CardsmithError::MalformedResponse(err.to_string())
        } else {
            CardsmithError::Http(err.to_string())
        }
    }
}

impl CardsmithError {
    /// Whether this error came from bad caller input.
    ///
    /// Validation failures never create a cache record or a document.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CardsmithError::Validation(_)
                | CardsmithError::UnsupportedLanguage(_)
                | CardsmithError::UnsupportedFileType(_)
                | CardsmithError::FileTooLarge { .. }
        )
    }

    /// Whether this error is a failure of the external generation service.
    ///
    /// These are recorded on the document and recovered by the next user
    /// request, never retried automatically.
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            CardsmithError::Http(_)
                | CardsmithError::Api { .. }
                | CardsmithError::Timeout(_)
                | CardsmithError::MalformedResponse(_)
                | CardsmithError::Generation(_)
        )
    }

    /// Message safe to relay to the end user.
    ///
    /// Validation errors are the user's to fix so their text is kept.
    /// Everything else collapses into [`GENERIC_FAILURE_MESSAGE`].
    pub fn user_message(&self) -> String {
        if self.is_validation() {
            self.to_string()
        } else {
            GENERIC_FAILURE_MESSAGE.to_string()
        }
    }
}

/// Result type alias for Cardsmith operations
pub type Result<T> = std::result::Result<T, CardsmithError>;
