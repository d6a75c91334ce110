//! Connection and Event Channel Integration Tests
//!
//! # Test Scenarios
//! - Cancellable reads on the default `UsbConnection` implementation
//! - Packet-sized cancellable reads on backends that drop timed-out data
//! - Event flow from a blocking producer thread to async consumers
//! - Channel capacity and backpressure
//!
//! Run with: `cargo test -p common --test connection_tests`

use common::test_utils::{DEFAULT_TEST_TIMEOUT, MockConnection, with_timeout};
use common::usb::read_packet_cancellable;
use common::{
    CancelToken, SerialEvent, TransferType, UsbConnection, UsbEndpoint, UsbError, UsbInterface,
    create_event_channel,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn read_endpoint() -> UsbEndpoint {
    UsbEndpoint::new(0x81, TransferType::Bulk, 64)
}

// ============================================================================
// Cancellable Read Tests
// ============================================================================

#[test]
fn test_cancellable_read_returns_queued_data() {
    let conn = MockConnection::new();
    conn.push_bulk_in(b"ping");

    let mut buf = [0u8; 16];
    let n = conn
        .read_cancellable(&read_endpoint(), &mut buf, &CancelToken::new())
        .unwrap();
    assert_eq!(&buf[..n], b"ping");
}

#[test]
fn test_cancellable_read_waits_past_poll_interval() {
    let conn = Arc::new(MockConnection::new());
    let producer = {
        let conn = conn.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(250));
            conn.push_bulk_in(b"late");
        })
    };

    let mut buf = [0u8; 16];
    let n = conn
        .read_cancellable(&read_endpoint(), &mut buf, &CancelToken::new())
        .unwrap();
    assert_eq!(&buf[..n], b"late");
    producer.join().unwrap();

    // polled in slices rather than one infinite transfer
    assert!(conn.bulk_in_timeouts().len() >= 2);
    assert!(conn.bulk_in_timeouts().iter().all(|t| !t.is_zero()));
}

#[test]
fn test_cancel_unblocks_pending_read() {
    let conn = Arc::new(MockConnection::new());
    let cancel = CancelToken::new();

    let reader = {
        let conn = conn.clone();
        let cancel = cancel.clone();
        thread::spawn(move || {
            let mut buf = [0u8; 16];
            conn.read_cancellable(&read_endpoint(), &mut buf, &cancel)
        })
    };

    thread::sleep(Duration::from_millis(50));
    let start = Instant::now();
    cancel.cancel();
    assert_eq!(reader.join().unwrap(), Err(UsbError::Cancelled));
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_cancellable_read_reports_transport_errors() {
    let conn = MockConnection::new();
    conn.fail_bulk_in(UsbError::NoDevice);

    let mut buf = [0u8; 16];
    assert_eq!(
        conn.read_cancellable(&read_endpoint(), &mut buf, &CancelToken::new()),
        Err(UsbError::NoDevice)
    );
}

/// Behaves like libusb: a transfer larger than one packet only completes on a
/// short packet, and a timeout discards whatever had arrived
struct TimeoutDropsData {
    inner: MockConnection,
}

impl UsbConnection for TimeoutDropsData {
    fn claim_interface(&self, interface: &UsbInterface, force: bool) -> Result<(), UsbError> {
        self.inner.claim_interface(interface, force)
    }

    fn release_interface(&self, interface: &UsbInterface) -> Result<(), UsbError> {
        self.inner.release_interface(interface)
    }

    fn control_in(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, UsbError> {
        self.inner
            .control_in(request_type, request, value, index, buf, timeout)
    }

    fn control_out(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, UsbError> {
        self.inner
            .control_out(request_type, request, value, index, data, timeout)
    }

    fn bulk_in(
        &self,
        endpoint: &UsbEndpoint,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, UsbError> {
        let n = self.inner.bulk_in(endpoint, buf, timeout)?;
        if n == endpoint.max_packet_size as usize && n < buf.len() {
            return Err(UsbError::Timeout);
        }
        Ok(n)
    }

    fn bulk_out(
        &self,
        endpoint: &UsbEndpoint,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, UsbError> {
        self.inner.bulk_out(endpoint, data, timeout)
    }

    fn raw_descriptors(&self) -> Result<Vec<u8>, UsbError> {
        self.inner.raw_descriptors()
    }

    fn close(&self) {
        self.inner.close()
    }
}

#[test]
fn test_packet_read_keeps_data_from_timed_out_transfers() {
    let conn = TimeoutDropsData {
        inner: MockConnection::new(),
    };
    let packets: Vec<Vec<u8>> = (0..3u8).map(|i| vec![i; 64]).collect();
    for packet in &packets {
        conn.inner.push_bulk_in(packet);
    }
    conn.inner.push_bulk_in(b"tail");

    let mut buf = [0u8; 512];
    for packet in &packets {
        let n = read_packet_cancellable(&conn, &read_endpoint(), &mut buf, &CancelToken::new())
            .unwrap();
        assert_eq!(&buf[..n], packet.as_slice());
    }
    let n = read_packet_cancellable(&conn, &read_endpoint(), &mut buf, &CancelToken::new())
        .unwrap();
    assert_eq!(&buf[..n], b"tail");

    // every poll asked for a single packet
    assert!(conn.inner.bulk_in_timeouts().iter().all(|t| !t.is_zero()));
}

#[test]
fn test_full_packet_timeout_loses_data_on_whole_buffer_reads() {
    let conn = TimeoutDropsData {
        inner: MockConnection::new(),
    };
    conn.inner.push_bulk_in(&[7u8; 64]);

    let mut buf = [0u8; 512];
    assert_eq!(
        conn.bulk_in(&read_endpoint(), &mut buf, Duration::from_millis(10)),
        Err(UsbError::Timeout)
    );
}

// ============================================================================
// Event Channel Tests
// ============================================================================

#[tokio::test]
async fn test_events_arrive_in_order() {
    let (sender, events) = create_event_channel(4);

    let producer = thread::spawn(move || {
        for i in 0..32u8 {
            sender.send_event(SerialEvent::Data(vec![i])).unwrap();
        }
        sender
            .send_event(SerialEvent::Error("Connection closed".into()))
            .unwrap();
        sender.close();
    });

    for i in 0..32u8 {
        let event = with_timeout(DEFAULT_TEST_TIMEOUT, events.recv())
            .await
            .expect("Timed out waiting for event")
            .unwrap();
        assert_eq!(event, SerialEvent::Data(vec![i]));
    }
    assert_eq!(
        events.recv().await.unwrap(),
        SerialEvent::Error("Connection closed".into())
    );
    assert!(events.recv().await.is_err());
    producer.join().unwrap();
}

#[test]
fn test_full_channel_blocks_producer() {
    let (sender, events) = create_event_channel(1);
    sender.send_event(SerialEvent::Data(vec![1])).unwrap();

    let producer = thread::spawn(move || {
        let start = Instant::now();
        sender.send_event(SerialEvent::Data(vec![2])).unwrap();
        start.elapsed()
    });

    thread::sleep(Duration::from_millis(50));
    assert_eq!(events.recv_blocking().unwrap(), SerialEvent::Data(vec![1]));
    let blocked_for = producer.join().unwrap();
    assert!(blocked_for >= Duration::from_millis(40));
    assert_eq!(events.try_recv(), Some(SerialEvent::Data(vec![2])));
}
