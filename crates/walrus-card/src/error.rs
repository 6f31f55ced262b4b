//! Error types for card decoding.

/// Result type alias for card operations.
pub type Result<T> = std::result::Result<T, CardError>;

/// Errors that can occur while decoding card payloads.
#[derive(Debug, thiserror::Error)]
pub enum CardError {
    /// No decoder is registered for the technology.
    #[error("Unknown card technology: {0}")]
    UnknownTechnology(String),

    /// The payload does not match the technology's format.
    #[error("Invalid {technology} payload: {message}")]
    InvalidPayload { technology: String, message: String },

    /// A hex string from a reader could not be parsed.
    #[error("Invalid hex: {0}")]
    InvalidHex(String),
}

impl CardError {
    /// Create a new invalid payload error.
    pub fn invalid_payload(technology: impl ToString, message: impl Into<String>) -> Self {
        Self::InvalidPayload {
            technology: technology.to_string(),
            message: message.into(),
        }
    }
}
