use serde_json::Value as JsonValue;

/// Result of any API call after normalization: a success payload or a typed
/// failure every caller can branch on uniformly.
pub type Outcome<T> = Result<T, ApiError>;

/// Normalized API failure.
///
/// Carries the human-readable message (also the `Display` form), the raw
/// machine error code and details collection verbatim for programmatic
/// inspection, and the HTTP status when the request completed at all.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
#[non_exhaustive]
pub struct ApiError {
    pub message: String,
    pub code: Option<String>,
    pub status: Option<u16>,
    pub details: Option<JsonValue>,
}

impl ApiError {
    /// Create a failure with just a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            status: None,
            details: None,
        }
    }

    /// Attach the HTTP status code.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Attach the server's machine error code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attach the server's raw error details collection.
    #[must_use]
    pub fn with_details(mut self, details: JsonValue) -> Self {
        self.details = Some(details);
        self
    }

    /// Transport failure: the request never completed, so there is no
    /// status or code to report.
    #[must_use]
    pub fn network() -> Self {
        Self::new(fallback::NETWORK)
    }

    /// Whether this failure should trigger a session renewal.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        self.status == Some(401)
    }
}

/// Fixed per-call fallback messages, used when the server response carries
/// no usable error message of its own.
pub(crate) mod fallback {
    pub const NETWORK: &str = "Connection failed. Please check your internet";
    pub const SERVER: &str = "Something went wrong. Please try again";
    pub const INVALID_CREDENTIALS: &str = "Invalid email or password";
    pub const INVALID_TOKEN: &str = "Invalid or expired reset token";
    pub const SESSION_EXPIRED: &str = "Your session has expired. Please sign in again";
}
