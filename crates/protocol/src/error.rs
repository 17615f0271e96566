//! Error types for the wire codec

use thiserror::Error;

/// Errors that can occur while encoding or decoding frames
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Buffer or stream ended in the middle of a frame
    #[error("short read: stream ended mid-frame")]
    ShortRead,

    /// Envelope fields are inconsistent (unknown type, oversized payload, bad UTF-8, ...)
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}

impl ProtocolError {
    /// Create a MalformedFrame error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedFrame(msg.into())
    }
}

/// Result type for codec operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
