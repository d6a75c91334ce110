//! Protocol error types

use thiserror::Error;

/// Errors raised while encoding or decoding chipset requests
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Argument outside the range any chipset accepts
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Value is valid in general but not supported by this chipset or port
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Device returned data that does not match the expected layout
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// Buffer too small for operation
    #[error("Buffer too small: needed {needed}, got {available}")]
    BufferTooSmall { needed: usize, available: usize },
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::Unsupported("Unsupported stop bits: 1.5".to_string());
        let msg = format!("{}", err);
        assert!(msg.contains("Unsupported"));
        assert!(msg.contains("1.5"));
    }

    #[test]
    fn test_buffer_too_small_error() {
        let err = ProtocolError::BufferTooSmall {
            needed: 7,
            available: 4,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("needed 7"));
        assert!(msg.contains("got 4"));
    }
}
