//! Common utilities for usb-serial
//!
//! This crate provides what the driver crate and the command line tool share:
//! the error taxonomy, the USB host abstraction the drivers are written
//! against, logging setup, and the async channel that carries data from the
//! background reader thread to async consumers.

pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;
pub mod usb;

pub use channel::{EventSender, SerialEvent, SerialEvents, create_event_channel};
pub use error::{Error, Result};
pub use logging::setup_logging;
pub use usb::{
    CancelToken, Direction, TransferType, UsbConnection, UsbDevice, UsbEndpoint, UsbError,
    UsbHost, UsbInterface,
};
