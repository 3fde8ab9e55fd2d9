//! Error types for nearlink.

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The radio transport is missing or disabled. Fatal to engine start;
    /// the engine stays inert until restarted with a working radio.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// A single outbound connect attempt failed. Reported once, never
    /// retried automatically.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The transport failed to accept an inbound connection.
    #[error("accept failed: {0}")]
    Accept(String),

    /// Scan, query, or advertisement failure inside the transport.
    #[error("transport error: {0}")]
    Transport(String),

    /// The engine was not started, or has been stopped.
    #[error("engine not running")]
    NotRunning,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a transport-unavailable error.
    pub fn unavailable<S: Into<String>>(msg: S) -> Self {
        Self::TransportUnavailable(msg.into())
    }

    /// Create a connect error.
    pub fn connect<S: Into<String>>(msg: S) -> Self {
        Self::Connect(msg.into())
    }

    /// Create an accept error.
    pub fn accept<S: Into<String>>(msg: S) -> Self {
        Self::Accept(msg.into())
    }

    /// Create a generic transport error.
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Self::Transport(msg.into())
    }
}
