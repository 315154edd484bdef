//! Error types for the device-link core.

use thiserror::Error;

/// Result type alias for link operations.
pub type Result<T> = std::result::Result<T, LinkError>;

/// Error types for HSMS connectivity and tag monitoring.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Connection error (dial or bind failure)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Not connected to remote
    #[error("Not connected")]
    NotConnected,

    /// Connection timeout
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed frame or shorthand string
    #[error("Format error: {0}")]
    Format(String),

    /// Send failed after exhausting retries
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Referenced device id is not registered
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// Referenced tag is not in the store
    #[error("Unknown tag: {0}")]
    UnknownTag(String),

    /// Event channel closed
    #[error("Channel closed")]
    ChannelClosed,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LinkError {
    /// Create a format error with a message.
    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    /// Create a connection error with a message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a send-failure error with a message.
    pub fn send_failed(msg: impl Into<String>) -> Self {
        Self::SendFailed(msg.into())
    }

    /// Check if this error indicates a connection problem.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::NotConnected | Self::ConnectionTimeout
        )
    }

    /// Check if a send hitting this error is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout | Self::Io(_) | Self::SendFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LinkError::NotConnected;
        assert_eq!(err.to_string(), "Not connected");

        let err = LinkError::UnknownDevice("EQP9".into());
        assert_eq!(err.to_string(), "Unknown device: EQP9");

        let err = LinkError::format("header too short");
        assert_eq!(err.to_string(), "Format error: header too short");
    }

    #[test]
    fn test_is_connection_error() {
        assert!(LinkError::NotConnected.is_connection_error());
        assert!(LinkError::ConnectionTimeout.is_connection_error());
        assert!(!LinkError::Format("x".into()).is_connection_error());
    }

    #[test]
    fn test_is_retryable() {
        assert!(LinkError::ConnectionTimeout.is_retryable());
        assert!(LinkError::send_failed("write timeout").is_retryable());
        assert!(!LinkError::NotConnected.is_retryable());
    }
}
