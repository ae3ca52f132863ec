//! Sink-specific error types.

use thiserror::Error;

/// Errors that can occur in the record sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// File could not be opened or written.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV serialization failed.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// Failed to send command to writer actor.
    #[error("failed to send command to writer actor")]
    ChannelSend,

    /// Internal error (e.g., thread join failure).
    #[error("internal error: {0}")]
    Internal(String),
}
