//! Error types for card reader operations.
//!
//! Errors are split into fatal ones, after which the reader's session is
//! unusable and the device is torn down, and recoverable ones that leave the
//! device connected. See [`HardwareError::is_fatal`].

use walrus_card::CardError;
use walrus_core::DeviceId;
use walrus_protocol::ProtocolError;

/// Result type alias for hardware operations.
pub type Result<T> = std::result::Result<T, HardwareError>;

/// Errors that can occur during card reader operations.
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    /// The channel could not be opened or the handshake failed.
    #[error("Connection failed: {message}")]
    Connection { message: String },

    /// Device is not connected or has been disconnected.
    #[error("Device disconnected: {device}")]
    Disconnected { device: String },

    /// Operation timed out after specified duration.
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// The reader responded but the payload could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] CardError),

    /// Unframed bytes piled up past the stall threshold.
    #[error("Framing stalled with {buffered} unconsumed bytes")]
    FramingStall { buffered: usize },

    /// Invalid data received from device, or a command it rejected.
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// No device with this id is registered.
    #[error("Unknown device: {0}")]
    UnknownDevice(DeviceId),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HardwareError {
    /// Create a new connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a new disconnected error.
    pub fn disconnected(device: impl Into<String>) -> Self {
        Self::Disconnected {
            device: device.into(),
        }
    }

    /// Create a new timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a new invalid data error.
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Returns `true` if the device can no longer be used after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Disconnected { .. } | Self::Io(_)
        )
    }
}

impl From<ProtocolError> for HardwareError {
    fn from(error: ProtocolError) -> Self {
        match error {
            ProtocolError::Timeout(duration_ms) => Self::Timeout { duration_ms },
            ProtocolError::Disconnected => Self::disconnected("serial session closed"),
            ProtocolError::FramingStall { buffered } => Self::FramingStall { buffered },
            ProtocolError::Encoding(message) | ProtocolError::InvalidData(message) => {
                Self::InvalidData { message }
            }
            ProtocolError::Io(e) => Self::Io(e),
        }
    }
}
