//! Error types for the stream server

use std::io;
use thiserror::Error;

/// Errors that can occur in the stream server
#[derive(Error, Debug)]
pub enum ServerError {
    /// I/O error (socket operations)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Failed to bind a listener
    #[error("failed to bind to {address}: {source}")]
    Bind {
        /// The address that could not be bound
        address: String,
        #[source]
        source: io::Error,
    },

    /// Wire codec error
    #[error("protocol error: {0}")]
    Protocol(#[from] chorus_protocol::ProtocolError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] chorus_config::ConfigError),

    /// The configured codec has no header generator
    #[error("unknown codec: {0}")]
    UnknownCodec(String),
}

impl ServerError {
    /// Create a Bind error
    pub fn bind(address: impl Into<String>, source: io::Error) -> Self {
        Self::Bind {
            address: address.into(),
            source,
        }
    }
}

/// Result type for server operations
pub type Result<T> = std::result::Result<T, ServerError>;
