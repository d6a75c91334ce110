//! USB host abstraction
//!
//! The drivers never talk to libusb directly. They see a read-only
//! [`UsbDevice`] tree and an open [`UsbConnection`] obtained from a
//! [`UsbHost`]; the `serial` crate implements both on top of `rusb`, and
//! [`crate::test_utils`] provides a scripted mock.

use protocol::UsbId;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Slice length used by the default cancellable read
pub const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// USB transport errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsbError {
    #[error("Transfer timed out")]
    Timeout,
    #[error("Endpoint stalled")]
    Pipe,
    #[error("Device disconnected")]
    NoDevice,
    #[error("Device or entity not found")]
    NotFound,
    #[error("Resource busy")]
    Busy,
    #[error("Buffer overflow")]
    Overflow,
    #[error("Input/output error")]
    Io,
    #[error("Invalid parameter")]
    InvalidParam,
    #[error("Access denied")]
    Access,
    /// Request was cancelled before it completed
    #[error("Request cancelled")]
    Cancelled,
    /// Connection has been closed
    #[error("Connection closed")]
    Closed,
    #[error("{0}")]
    Other(String),
}

/// Endpoint direction, seen from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbEndpoint {
    /// bEndpointAddress, direction bit included
    pub address: u8,
    pub direction: Direction,
    pub transfer_type: TransferType,
    pub max_packet_size: u16,
}

impl UsbEndpoint {
    pub fn new(address: u8, transfer_type: TransferType, max_packet_size: u16) -> Self {
        let direction = if address & 0x80 != 0 {
            Direction::In
        } else {
            Direction::Out
        };
        Self {
            address,
            direction,
            transfer_type,
            max_packet_size,
        }
    }

    pub fn is_bulk_in(&self) -> bool {
        self.transfer_type == TransferType::Bulk && self.direction == Direction::In
    }

    pub fn is_bulk_out(&self) -> bool {
        self.transfer_type == TransferType::Bulk && self.direction == Direction::Out
    }

    pub fn is_interrupt_in(&self) -> bool {
        self.transfer_type == TransferType::Interrupt && self.direction == Direction::In
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbInterface {
    /// bInterfaceNumber
    pub id: u8,
    pub alternate_setting: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub endpoints: Vec<UsbEndpoint>,
}

impl UsbInterface {
    pub fn endpoint(&self, index: usize) -> Option<&UsbEndpoint> {
        self.endpoints.get(index)
    }

    /// Last bulk IN and bulk OUT endpoint of the interface
    pub fn bulk_endpoints(&self) -> (Option<UsbEndpoint>, Option<UsbEndpoint>) {
        let mut read = None;
        let mut write = None;
        for ep in &self.endpoints {
            if ep.is_bulk_in() {
                read = Some(ep.clone());
            } else if ep.is_bulk_out() {
                write = Some(ep.clone());
            }
        }
        (read, write)
    }
}

/// Immutable description of an attached device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDevice {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus_number: u8,
    pub address: u8,
    pub interfaces: Vec<UsbInterface>,
}

impl UsbDevice {
    pub fn id(&self) -> UsbId {
        UsbId::new(self.vendor_id, self.product_id)
    }

    pub fn interface_count(&self) -> usize {
        self.interfaces.len()
    }

    pub fn interface(&self, index: usize) -> Option<&UsbInterface> {
        self.interfaces.get(index)
    }
}

impl fmt::Display for UsbDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bus {:03} Device {:03}: ID {:04x}:{:04x}",
            self.bus_number, self.address, self.vendor_id, self.product_id
        )
    }
}

/// Cancellation flag shared between a pending read and `close()`
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Open session to a device
///
/// Timeouts of `Duration::ZERO` wait forever. Control transfers return the
/// number of bytes actually transferred.
pub trait UsbConnection: Send + Sync {
    fn claim_interface(&self, interface: &UsbInterface, force: bool) -> Result<(), UsbError>;

    fn release_interface(&self, interface: &UsbInterface) -> Result<(), UsbError>;

    fn control_in(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, UsbError>;

    fn control_out(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, UsbError>;

    fn bulk_in(
        &self,
        endpoint: &UsbEndpoint,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, UsbError>;

    fn bulk_out(
        &self,
        endpoint: &UsbEndpoint,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, UsbError>;

    /// Read that blocks until data arrives or `cancel` is triggered
    ///
    /// The default polls [`UsbConnection::bulk_in`] in short slices and
    /// returns `UsbError::Cancelled` once the token is set. Backends whose
    /// timed-out transfers discard received bytes should override this with
    /// [`read_packet_cancellable`].
    fn read_cancellable(
        &self,
        endpoint: &UsbEndpoint,
        buf: &mut [u8],
        cancel: &CancelToken,
    ) -> Result<usize, UsbError> {
        poll_bulk_in(self, endpoint, buf, cancel)
    }

    /// Device descriptor followed by the active configuration descriptor set
    fn raw_descriptors(&self) -> Result<Vec<u8>, UsbError>;

    fn serial_number(&self) -> Option<String> {
        None
    }

    /// Close the session; further transfers fail
    fn close(&self);
}

/// Cancellable read that asks for at most one packet per poll
///
/// A transfer no longer than `max_packet_size` completes on the first packet,
/// so a poll that times out has received nothing.
pub fn read_packet_cancellable<C: UsbConnection + ?Sized>(
    connection: &C,
    endpoint: &UsbEndpoint,
    buf: &mut [u8],
    cancel: &CancelToken,
) -> Result<usize, UsbError> {
    let packet = match endpoint.max_packet_size as usize {
        0 => buf.len(),
        size => size.min(buf.len()),
    };
    poll_bulk_in(connection, endpoint, &mut buf[..packet], cancel)
}

fn poll_bulk_in<C: UsbConnection + ?Sized>(
    connection: &C,
    endpoint: &UsbEndpoint,
    buf: &mut [u8],
    cancel: &CancelToken,
) -> Result<usize, UsbError> {
    loop {
        if cancel.is_cancelled() {
            return Err(UsbError::Cancelled);
        }
        match connection.bulk_in(endpoint, buf, CANCEL_POLL_INTERVAL) {
            Err(UsbError::Timeout) => continue,
            result => {
                if cancel.is_cancelled() {
                    return Err(UsbError::Cancelled);
                }
                return result;
            }
        }
    }
}

/// Source of devices and connections
pub trait UsbHost {
    fn devices(&self) -> Result<Vec<UsbDevice>, UsbError>;

    fn open(&self, device: &UsbDevice) -> Result<Arc<dyn UsbConnection>, UsbError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_direction_from_address() {
        let ep = UsbEndpoint::new(0x81, TransferType::Bulk, 64);
        assert_eq!(ep.direction, Direction::In);
        assert!(ep.is_bulk_in());

        let ep = UsbEndpoint::new(0x02, TransferType::Bulk, 64);
        assert!(ep.is_bulk_out());

        let ep = UsbEndpoint::new(0x83, TransferType::Interrupt, 16);
        assert!(ep.is_interrupt_in());
        assert!(!ep.is_bulk_in());
    }

    #[test]
    fn test_bulk_endpoints() {
        let iface = UsbInterface {
            id: 0,
            alternate_setting: 0,
            class: 0xff,
            subclass: 0xff,
            protocol: 0xff,
            endpoints: vec![
                UsbEndpoint::new(0x81, TransferType::Bulk, 64),
                UsbEndpoint::new(0x83, TransferType::Interrupt, 8),
                UsbEndpoint::new(0x02, TransferType::Bulk, 64),
            ],
        };
        let (read, write) = iface.bulk_endpoints();
        assert_eq!(read.map(|e| e.address), Some(0x81));
        assert_eq!(write.map(|e| e.address), Some(0x02));
    }

    #[test]
    fn test_device_display() {
        let device = UsbDevice {
            vendor_id: 0x0403,
            product_id: 0x6001,
            bus_number: 1,
            address: 7,
            interfaces: vec![],
        };
        assert_eq!(device.to_string(), "Bus 001 Device 007: ID 0403:6001");
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
