//! Error types for `leadform-core`.
//!
//! Only [`SubmissionError`] ever reaches the visitor, and only as the generic
//! [`ErrorKind::SubmissionFailed`]. Enrichment failures are swallowed by the
//! enricher, and transport-level delivery failures are never observed at all.

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is not set.
    #[error("missing required configuration: {name}")]
    Missing { name: &'static str },

    /// A configured URL could not be parsed or has an unsupported scheme.
    #[error("invalid URL for {name}: {reason}")]
    InvalidUrl { name: &'static str, reason: String },

    /// An enumerated setting carried an unknown value.
    #[error("invalid value '{value}' for {name}")]
    InvalidValue { name: &'static str, value: String },
}

/// Errors from the client address lookup.
#[derive(Debug, thiserror::Error)]
pub enum EnrichmentError {
    /// The request could not be sent or the body could not be read.
    #[error("address lookup request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// The lookup service answered with a non-2xx status.
    #[error("address lookup returned HTTP {status}")]
    Status { status: u16 },

    /// The response body was not `{ "ip": "<address>" }`.
    #[error("malformed address lookup response: {reason}")]
    Malformed { reason: String },
}

/// Local, synchronous failures while assembling or dispatching a lead.
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    /// The lead record could not be form-encoded.
    #[error("lead payload encoding failed: {0}")]
    Encode(#[from] serde_urlencoded::ser::Error),

    /// Neither the background queue nor the fallback request could be started.
    #[error("lead dispatch failed: {reason}")]
    Dispatch { reason: String },
}

/// The user-facing error state held in `FormState::last_error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A generic "submission failed" message; the visitor may edit and retry.
    SubmissionFailed,
}

impl ErrorKind {
    /// Key into the host's translation table.
    #[must_use]
    pub fn translation_key(self) -> &'static str {
        match self {
            Self::SubmissionFailed => "error",
        }
    }
}

impl From<&SubmissionError> for ErrorKind {
    fn from(_: &SubmissionError) -> Self {
        Self::SubmissionFailed
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SubmissionFailed => f.write_str("submission failed, please try again"),
        }
    }
}
