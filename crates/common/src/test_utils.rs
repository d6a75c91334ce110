//! Test utilities for usb-serial
//!
//! Provides a scripted [`MockConnection`] and [`MockHost`] plus helpers that
//! build device trees and raw descriptors for the supported chipsets.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{MockConnection, mock_ftdi_device};
//! use common::UsbConnection;
//! use std::time::Duration;
//!
//! let device = mock_ftdi_device(1);
//! assert_eq!(device.interface_count(), 1);
//!
//! let conn = MockConnection::new();
//! conn.set_control_response(5, 0, &[0xf0, 0x60]);
//! let mut buf = [0u8; 2];
//! let n = conn.control_in(0xc0, 5, 0, 1, &mut buf, Duration::from_secs(1)).unwrap();
//! assert_eq!((n, buf), (2, [0xf0, 0x60]));
//! ```

use crate::usb::{
    TransferType, UsbConnection, UsbDevice, UsbEndpoint, UsbError, UsbHost, UsbInterface,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Control transfer recorded by [`MockConnection`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRequest {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    /// Payload for OUT requests, empty for IN requests
    pub data: Vec<u8>,
    /// wLength
    pub length: usize,
}

#[derive(Default)]
struct MockState {
    control_log: Vec<ControlRequest>,
    control_responses: HashMap<(u8, u16), Vec<u8>>,
    control_failures: HashSet<(u8, u8)>,
    bulk_in: VecDeque<Vec<u8>>,
    bulk_in_failure: Option<UsbError>,
    bulk_in_timeouts: Vec<Duration>,
    writes: Vec<Vec<u8>>,
    max_write: Option<usize>,
    stall_after_writes: Option<usize>,
    claimed: Vec<u8>,
    released: Vec<u8>,
    claim_failure: Option<u8>,
    raw_descriptors: Vec<u8>,
    serial_number: Option<String>,
    closed: bool,
}

/// Scripted [`UsbConnection`]
///
/// Unscripted control IN requests succeed and return zeros; control OUT
/// requests succeed. Bulk IN data is served from a queue, waiting up to the
/// transfer timeout when it is empty.
#[derive(Default)]
pub struct MockConnection {
    state: Mutex<MockState>,
    data_ready: Condvar,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_descriptors(raw: Vec<u8>) -> Self {
        let conn = Self::new();
        conn.lock().raw_descriptors = raw;
        conn
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reply to every control IN with `request`/`value` with `data`
    pub fn set_control_response(&self, request: u8, value: u16, data: &[u8]) {
        self.lock()
            .control_responses
            .insert((request, value), data.to_vec());
    }

    /// Fail every control transfer with `request_type`/`request` with a stall
    pub fn fail_control(&self, request_type: u8, request: u8) {
        self.lock().control_failures.insert((request_type, request));
    }

    pub fn clear_control_failures(&self) {
        self.lock().control_failures.clear();
    }

    /// Queue one bulk IN transfer worth of data
    pub fn push_bulk_in(&self, data: &[u8]) {
        self.lock().bulk_in.push_back(data.to_vec());
        self.data_ready.notify_all();
    }

    /// Fail bulk IN transfers with `error` once the queue is empty
    pub fn fail_bulk_in(&self, error: UsbError) {
        self.lock().bulk_in_failure = Some(error);
        self.data_ready.notify_all();
    }

    /// Accept at most `max` bytes per bulk OUT transfer
    pub fn set_max_write(&self, max: usize) {
        self.lock().max_write = Some(max);
    }

    /// Let `count` bulk OUT transfers succeed, then time out every later one
    ///
    /// A stalled transfer sleeps for its full timeout before failing.
    pub fn stall_writes_after(&self, count: usize) {
        self.lock().stall_after_writes = Some(count);
    }

    /// Fail claiming the interface with this number
    pub fn fail_claim(&self, interface: u8) {
        self.lock().claim_failure = Some(interface);
    }

    pub fn set_serial_number(&self, serial: &str) {
        self.lock().serial_number = Some(serial.to_string());
    }

    pub fn control_requests(&self) -> Vec<ControlRequest> {
        self.lock().control_log.clone()
    }

    /// Control requests with the given bRequest
    pub fn requests_for(&self, request: u8) -> Vec<ControlRequest> {
        self.lock()
            .control_log
            .iter()
            .filter(|r| r.request == request)
            .cloned()
            .collect()
    }

    pub fn clear_control_requests(&self) {
        self.lock().control_log.clear();
    }

    /// Payloads of the individual bulk OUT transfers
    pub fn write_calls(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    /// All bytes written, concatenated
    pub fn written(&self) -> Vec<u8> {
        self.lock().writes.concat()
    }

    /// Timeouts passed to bulk IN transfers
    pub fn bulk_in_timeouts(&self) -> Vec<Duration> {
        self.lock().bulk_in_timeouts.clone()
    }

    pub fn claimed_interfaces(&self) -> Vec<u8> {
        self.lock().claimed.clone()
    }

    pub fn released_interfaces(&self) -> Vec<u8> {
        self.lock().released.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl UsbConnection for MockConnection {
    fn claim_interface(&self, interface: &UsbInterface, _force: bool) -> Result<(), UsbError> {
        let mut state = self.lock();
        if state.closed {
            return Err(UsbError::Closed);
        }
        if state.claim_failure == Some(interface.id) {
            return Err(UsbError::Busy);
        }
        state.claimed.push(interface.id);
        Ok(())
    }

    fn release_interface(&self, interface: &UsbInterface) -> Result<(), UsbError> {
        let mut state = self.lock();
        if state.closed {
            return Err(UsbError::Closed);
        }
        state.released.push(interface.id);
        Ok(())
    }

    fn control_in(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, UsbError> {
        let mut state = self.lock();
        if state.closed {
            return Err(UsbError::Closed);
        }
        state.control_log.push(ControlRequest {
            request_type,
            request,
            value,
            index,
            data: Vec::new(),
            length: buf.len(),
        });
        if state.control_failures.contains(&(request_type, request)) {
            return Err(UsbError::Pipe);
        }
        match state.control_responses.get(&(request, value)) {
            Some(response) => {
                let n = response.len().min(buf.len());
                buf[..n].copy_from_slice(&response[..n]);
                Ok(n)
            }
            None => {
                buf.fill(0);
                Ok(buf.len())
            }
        }
    }

    fn control_out(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, UsbError> {
        let mut state = self.lock();
        if state.closed {
            return Err(UsbError::Closed);
        }
        state.control_log.push(ControlRequest {
            request_type,
            request,
            value,
            index,
            data: data.to_vec(),
            length: data.len(),
        });
        if state.control_failures.contains(&(request_type, request)) {
            return Err(UsbError::Pipe);
        }
        Ok(data.len())
    }

    fn bulk_in(
        &self,
        _endpoint: &UsbEndpoint,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, UsbError> {
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
        let mut state = self.lock();
        state.bulk_in_timeouts.push(timeout);
        loop {
            if state.closed {
                return Err(UsbError::Closed);
            }
            if let Some(mut data) = state.bulk_in.pop_front() {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    state.bulk_in.push_front(data.split_off(n));
                }
                return Ok(n);
            }
            if let Some(error) = state.bulk_in_failure.clone() {
                return Err(error);
            }
            state = match deadline {
                None => self
                    .data_ready
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(UsbError::Timeout);
                    }
                    self.data_ready
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    fn bulk_out(
        &self,
        _endpoint: &UsbEndpoint,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, UsbError> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(UsbError::Closed);
            }
            let stalled = matches!(state.stall_after_writes, Some(count) if state.writes.len() >= count);
            if !stalled {
                let n = state.max_write.map_or(data.len(), |max| max.min(data.len()));
                state.writes.push(data[..n].to_vec());
                return Ok(n);
            }
        }
        std::thread::sleep(timeout);
        Err(UsbError::Timeout)
    }

    fn raw_descriptors(&self) -> Result<Vec<u8>, UsbError> {
        Ok(self.lock().raw_descriptors.clone())
    }

    fn serial_number(&self) -> Option<String> {
        self.lock().serial_number.clone()
    }

    fn close(&self) {
        self.lock().closed = true;
        self.data_ready.notify_all();
    }
}

/// Scripted [`UsbHost`] serving a fixed device list
#[derive(Default)]
pub struct MockHost {
    devices: Vec<(UsbDevice, Arc<MockConnection>)>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device; its address is set to its position in the list
    pub fn add_device(&mut self, mut device: UsbDevice, connection: Arc<MockConnection>) {
        device.address = self.devices.len() as u8 + 1;
        self.devices.push((device, connection));
    }

    pub fn connection(&self, index: usize) -> Option<Arc<MockConnection>> {
        self.devices.get(index).map(|(_, conn)| conn.clone())
    }
}

impl UsbHost for MockHost {
    fn devices(&self) -> Result<Vec<UsbDevice>, UsbError> {
        Ok(self.devices.iter().map(|(d, _)| d.clone()).collect())
    }

    fn open(&self, device: &UsbDevice) -> Result<Arc<dyn UsbConnection>, UsbError> {
        self.devices
            .iter()
            .find(|(d, _)| d.bus_number == device.bus_number && d.address == device.address)
            .map(|(_, conn)| conn.clone() as Arc<dyn UsbConnection>)
            .ok_or(UsbError::NotFound)
    }
}

/// Timeout wrapper for async tests
///
/// # Example
/// ```ignore
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// #[tokio::test]
/// async fn test_with_timeout() {
///     let event = with_timeout(DEFAULT_TEST_TIMEOUT, events.recv()).await.unwrap();
/// }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

// ============================================================================
// Device tree builders
// ============================================================================

/// Create a device with bus 1, address 1
pub fn create_mock_device(
    vendor_id: u16,
    product_id: u16,
    interfaces: Vec<UsbInterface>,
) -> UsbDevice {
    UsbDevice {
        vendor_id,
        product_id,
        bus_number: 1,
        address: 1,
        interfaces,
    }
}

/// Interface with one bulk IN and one bulk OUT endpoint (IN listed first)
pub fn bulk_interface(id: u8, class: u8, max_packet_size: u16) -> UsbInterface {
    UsbInterface {
        id,
        alternate_setting: 0,
        class,
        subclass: 0,
        protocol: 0,
        endpoints: vec![
            UsbEndpoint::new(0x81 + 2 * id, TransferType::Bulk, max_packet_size),
            UsbEndpoint::new(0x02 + 2 * id, TransferType::Bulk, max_packet_size),
        ],
    }
}

/// CDC communications interface (class 2, ACM) with an interrupt IN endpoint
pub fn cdc_control_interface(id: u8) -> UsbInterface {
    UsbInterface {
        id,
        alternate_setting: 0,
        class: 0x02,
        subclass: 0x02,
        protocol: 0x01,
        endpoints: vec![UsbEndpoint::new(0x81 + 2 * id, TransferType::Interrupt, 16)],
    }
}

/// CDC data interface (class 0x0a) with bulk IN/OUT endpoints
pub fn cdc_data_interface(id: u8) -> UsbInterface {
    bulk_interface(id, 0x0a, 64)
}

/// CDC-ACM device with `pairs` control/data interface pairs
pub fn mock_cdc_acm_device(vendor_id: u16, product_id: u16, pairs: u8) -> UsbDevice {
    let interfaces = (0..pairs)
        .flat_map(|p| [cdc_control_interface(2 * p), cdc_data_interface(2 * p + 1)])
        .collect();
    create_mock_device(vendor_id, product_id, interfaces)
}

/// FTDI device with one vendor interface per port (64 byte packets)
pub fn mock_ftdi_device(ports: u8) -> UsbDevice {
    let pid = if ports > 1 { 0x6010 } else { 0x6001 };
    let interfaces = (0..ports).map(|i| bulk_interface(i, 0xff, 64)).collect();
    create_mock_device(0x0403, pid, interfaces)
}

/// CP210x device with one vendor interface per port
pub fn mock_cp210x_device(ports: u8) -> UsbDevice {
    let pid = match ports {
        1 => 0xea60,
        2 => 0xea70,
        _ => 0xea71,
    };
    let interfaces = (0..ports).map(|i| bulk_interface(i, 0xff, 64)).collect();
    create_mock_device(0x10c4, pid, interfaces)
}

/// CH340 with its single vendor interface (bulk and interrupt endpoints)
pub fn mock_ch34x_device() -> UsbDevice {
    let mut iface = bulk_interface(0, 0xff, 32);
    iface
        .endpoints
        .push(UsbEndpoint::new(0x83, TransferType::Interrupt, 8));
    create_mock_device(0x1a86, 0x7523, vec![iface])
}

/// 18-byte device descriptor
pub fn create_mock_device_descriptor(
    vendor_id: u16,
    product_id: u16,
    class: (u8, u8, u8),
    bcd_device: u16,
) -> Vec<u8> {
    let [vid_lo, vid_hi] = vendor_id.to_le_bytes();
    let [pid_lo, pid_hi] = product_id.to_le_bytes();
    let [bcd_lo, bcd_hi] = bcd_device.to_le_bytes();
    vec![
        0x12, // bLength
        0x01, // bDescriptorType (Device)
        0x00, 0x02, // bcdUSB (2.00)
        class.0, class.1, class.2, 0x40, // bMaxPacketSize0
        vid_lo, vid_hi, pid_lo, pid_hi, bcd_lo, bcd_hi, 0x01, // iManufacturer
        0x02, // iProduct
        0x03, // iSerialNumber
        0x01, // bNumConfigurations
    ]
}

/// Interface association descriptor for a CDC-ACM function
pub fn create_mock_acm_iad(first_interface: u8, interface_count: u8) -> Vec<u8> {
    vec![
        0x08,
        0x0b,
        first_interface,
        interface_count,
        0x02,
        0x02,
        0x01,
        0x00,
    ]
}

/// Create mock bulk transfer data of specified size
pub fn create_mock_bulk_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i & 0xFF) as u8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unscripted_control_in_returns_zeros() {
        let conn = MockConnection::new();
        let mut buf = [0xaa; 2];
        let n = conn
            .control_in(0xc0, 0x95, 0x0706, 0, &mut buf, DEFAULT_TEST_TIMEOUT)
            .unwrap();
        assert_eq!((n, buf), (2, [0, 0]));
        assert_eq!(conn.control_requests()[0].length, 2);
    }

    #[test]
    fn test_control_failure() {
        let conn = MockConnection::new();
        conn.fail_control(0x40, 0);
        assert_eq!(
            conn.control_out(0x40, 0, 0, 1, &[], DEFAULT_TEST_TIMEOUT),
            Err(UsbError::Pipe)
        );
        // same request code with another request type still succeeds
        assert!(conn.control_out(0x41, 0, 1, 0, &[], DEFAULT_TEST_TIMEOUT).is_ok());
    }

    #[test]
    fn test_bulk_in_splits_large_packets() {
        let conn = MockConnection::new();
        let ep = UsbEndpoint::new(0x81, TransferType::Bulk, 64);
        conn.push_bulk_in(b"abcdef");
        let mut buf = [0u8; 4];
        assert_eq!(conn.bulk_in(&ep, &mut buf, DEFAULT_TEST_TIMEOUT).unwrap(), 4);
        assert_eq!(conn.bulk_in(&ep, &mut buf, DEFAULT_TEST_TIMEOUT).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(
            conn.bulk_in(&ep, &mut buf, Duration::from_millis(10)),
            Err(UsbError::Timeout)
        );
    }

    #[test]
    fn test_stalled_write_waits_for_timeout() {
        let conn = MockConnection::new();
        let ep = UsbEndpoint::new(0x02, TransferType::Bulk, 64);
        conn.stall_writes_after(1);
        assert_eq!(conn.bulk_out(&ep, b"ab", DEFAULT_TEST_TIMEOUT).unwrap(), 2);

        let start = Instant::now();
        let timeout = Duration::from_millis(20);
        assert_eq!(conn.bulk_out(&ep, b"cd", timeout), Err(UsbError::Timeout));
        assert!(start.elapsed() >= timeout);
        assert_eq!(conn.written(), b"ab");
    }

    #[test]
    fn test_close_wakes_blocked_reader() {
        let conn = Arc::new(MockConnection::new());
        let reader = {
            let conn = conn.clone();
            std::thread::spawn(move || {
                let ep = UsbEndpoint::new(0x81, TransferType::Bulk, 64);
                let mut buf = [0u8; 8];
                conn.bulk_in(&ep, &mut buf, Duration::ZERO)
            })
        };
        std::thread::sleep(Duration::from_millis(20));
        conn.close();
        assert_eq!(reader.join().unwrap(), Err(UsbError::Closed));
    }

    #[test]
    fn test_mock_host_open() {
        let mut host = MockHost::new();
        host.add_device(mock_ftdi_device(1), Arc::new(MockConnection::new()));
        host.add_device(mock_ch34x_device(), Arc::new(MockConnection::new()));

        let devices = host.devices().unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[1].address, 2);
        assert!(host.open(&devices[1]).is_ok());

        let mut unknown = devices[0].clone();
        unknown.address = 42;
        assert!(matches!(host.open(&unknown), Err(UsbError::NotFound)));
    }

    #[test]
    fn test_device_builders() {
        let device = mock_cdc_acm_device(0x2e8a, 0x000a, 2);
        assert_eq!(device.interface_count(), 4);
        assert_eq!(device.interfaces[2].class, 0x02);
        assert_eq!(device.interfaces[3].class, 0x0a);

        let desc = create_mock_device_descriptor(0x0403, 0x6010, (0, 0, 0), 0x0700);
        assert_eq!(desc.len(), 18);
        assert_eq!(desc[13], 0x07);
    }

    #[tokio::test]
    async fn test_with_timeout_failure() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
        })
        .await;
        assert!(result.is_err());
    }
}
