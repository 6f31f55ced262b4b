use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    /// No complete message arrived before the deadline.
    #[error("Receive timeout after {0}ms")]
    Timeout(u64),

    /// The session was closed, or the channel reached EOF.
    #[error("Session disconnected")]
    Disconnected,

    /// The deadline elapsed with a large amount of unframed data buffered.
    #[error("Framing stalled with {buffered} unconsumed bytes")]
    FramingStall { buffered: usize },

    /// Outgoing text cannot be represented in the session charset.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// A message was framed but its content is unusable.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding(msg.into())
    }

    pub fn invalid_data(msg: impl Into<String>) -> Self {
        Self::InvalidData(msg.into())
    }

    /// Returns `true` if the session can no longer be used.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
