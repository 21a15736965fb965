//! Error types for the harness.
//!
//! Every variant except [`HarnessError::Config`] is a per-case error: the
//! runner converts it into a failing outcome and moves on to the next case.
//! Configuration errors abort the run before any case executes.

use std::time::Duration;

/// Errors produced while driving a case against the server under test.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// The transport could not be established or the HTTP/2 handshake was
    /// rejected.
    #[error("connection setup failed: {0}")]
    Connect(String),

    /// Writing a crafted frame to the server failed.
    #[error("failed to write frame: {0}")]
    Write(#[source] std::io::Error),

    /// No frame arrived within the remaining budget.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The server closed the connection.
    #[error("connection closed by peer")]
    Closed,

    /// The server sent bytes that do not form a valid frame, or the read
    /// side failed with something other than EOF.
    #[error("malformed inbound frame: {0}")]
    Codec(String),

    /// The run configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl HarnessError {
    /// Wrap an I/O error from the read side.
    ///
    /// EOF-like kinds map to [`HarnessError::Closed`] so that a server that
    /// resets the connection is reported the same way as one that closes it.
    pub fn from_read(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => Self::Closed,
            _ => Self::Codec(e.to_string()),
        }
    }
}
