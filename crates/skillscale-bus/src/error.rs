//! Error types for the bus layer.

/// Errors surfaced by the wire codec and connection handles.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The peer closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// A frame declared a payload larger than [`crate::MAX_FRAME_LEN`].
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    /// A single-frame control message did not carry a valid opcode byte.
    #[error("malformed subscription-control frame")]
    MalformedSubscription,

    /// Underlying socket error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the bus crate.
pub type Result<T> = std::result::Result<T, BusError>;
