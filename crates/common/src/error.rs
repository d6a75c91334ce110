//! Common error types

use crate::usb::UsbError;
use protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Caller passed a value no port accepts
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Valid request the chipset or port cannot honor
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(String),

    /// Write deadline passed; `bytes_transferred` were sent before it did
    #[error("{message} ({bytes_transferred} bytes transferred)")]
    Timeout {
        message: String,
        bytes_transferred: usize,
    },

    #[error("USB error: {0}")]
    Usb(#[from] UsbError),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Bytes written before a timeout, `None` for any other error
    pub fn bytes_transferred(&self) -> Option<usize> {
        match self {
            Error::Timeout {
                bytes_transferred, ..
            } => Some(*bytes_transferred),
            _ => None,
        }
    }

    /// Whether the error belongs to the I/O class (including transport failures)
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Usb(_) | Error::Timeout { .. })
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::InvalidArgument(msg) => Error::InvalidArgument(msg),
            ProtocolError::Unsupported(msg) => Error::Unsupported(msg),
            other @ (ProtocolError::Malformed(_) | ProtocolError::BufferTooSmall { .. }) => {
                Error::Io(other.to_string())
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
