//! Helpers shared by the serial integration tests

#![allow(dead_code)]

use common::UsbDevice;
use common::test_utils::{MockConnection, create_mock_device_descriptor};
use serial::{DriverFactory, SerialDriver, SerialPort};
use std::sync::Arc;

/// Open port `index` of a freshly created driver on a new mock connection
pub fn open_port(
    factory: &dyn DriverFactory,
    device: UsbDevice,
    index: usize,
    conn: MockConnection,
) -> (Arc<SerialDriver>, Arc<SerialPort>, Arc<MockConnection>) {
    let driver = factory.create(device);
    let port = driver.port(index).expect("port exists").clone();
    let conn = Arc::new(conn);
    port.open(conn.clone()).expect("open");
    conn.clear_control_requests();
    (driver, port, conn)
}

/// Connection answering GET_DESCRIPTOR with a device descriptor carrying
/// `bcd_device`
pub fn ftdi_connection(product_id: u16, bcd_device: u16) -> MockConnection {
    MockConnection::with_descriptors(create_mock_device_descriptor(
        0x0403,
        product_id,
        (0, 0, 0),
        bcd_device,
    ))
}
