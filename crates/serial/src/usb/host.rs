//! libusb binding through `rusb`

use common::usb::read_packet_cancellable;
use common::{
    CancelToken, TransferType, UsbConnection, UsbDevice, UsbEndpoint, UsbError, UsbHost,
    UsbInterface,
};
use rusb::{Context, Device, DeviceHandle, UsbContext};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

const GET_DESCRIPTOR: u8 = 0x06;
const DEVICE_DESCRIPTOR_VALUE: u16 = 0x0100;
const CONFIG_DESCRIPTOR_VALUE: u16 = 0x0200;
const CONFIG_HEADER_LEN: usize = 9;
const DESCRIPTOR_TIMEOUT: Duration = Duration::from_secs(1);

/// Map rusb::Error to common::UsbError
pub fn map_rusb_error(err: rusb::Error) -> UsbError {
    match err {
        rusb::Error::Timeout => UsbError::Timeout,
        rusb::Error::Pipe => UsbError::Pipe,
        rusb::Error::NoDevice => UsbError::NoDevice,
        rusb::Error::NotFound => UsbError::NotFound,
        rusb::Error::Busy => UsbError::Busy,
        rusb::Error::Overflow => UsbError::Overflow,
        rusb::Error::Io => UsbError::Io,
        rusb::Error::InvalidParam => UsbError::InvalidParam,
        rusb::Error::Access => UsbError::Access,
        rusb::Error::Interrupted => UsbError::Cancelled,
        _ => UsbError::Other(err.to_string()),
    }
}

fn map_transfer_type(transfer_type: rusb::TransferType) -> TransferType {
    match transfer_type {
        rusb::TransferType::Control => TransferType::Control,
        rusb::TransferType::Isochronous => TransferType::Isochronous,
        rusb::TransferType::Bulk => TransferType::Bulk,
        rusb::TransferType::Interrupt => TransferType::Interrupt,
    }
}

/// Host backed by a libusb context
pub struct RusbHost {
    context: Context,
}

impl RusbHost {
    pub fn new() -> Result<Self, UsbError> {
        let context = Context::new().map_err(map_rusb_error)?;
        Ok(Self { context })
    }

    fn describe(device: &Device<Context>) -> Result<UsbDevice, rusb::Error> {
        let descriptor = device.device_descriptor()?;
        let config = device
            .active_config_descriptor()
            .or_else(|_| device.config_descriptor(0))?;

        // first alternate setting of every interface
        let interfaces = config
            .interfaces()
            .filter_map(|interface| interface.descriptors().next())
            .map(|setting| UsbInterface {
                id: setting.interface_number(),
                alternate_setting: setting.setting_number(),
                class: setting.class_code(),
                subclass: setting.sub_class_code(),
                protocol: setting.protocol_code(),
                endpoints: setting
                    .endpoint_descriptors()
                    .map(|ep| {
                        UsbEndpoint::new(
                            ep.address(),
                            map_transfer_type(ep.transfer_type()),
                            ep.max_packet_size(),
                        )
                    })
                    .collect(),
            })
            .collect();

        Ok(UsbDevice {
            vendor_id: descriptor.vendor_id(),
            product_id: descriptor.product_id(),
            bus_number: device.bus_number(),
            address: device.address(),
            interfaces,
        })
    }

    /// Manufacturer and product strings, opening the device briefly
    pub fn strings(&self, device: &UsbDevice) -> Option<(Option<String>, Option<String>)> {
        let raw = self.find(device).ok()?;
        let descriptor = raw.device_descriptor().ok()?;
        let handle = raw.open().ok()?;
        let manufacturer = descriptor
            .manufacturer_string_index()
            .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());
        let product = descriptor
            .product_string_index()
            .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());
        Some((manufacturer, product))
    }

    fn find(&self, device: &UsbDevice) -> Result<Device<Context>, UsbError> {
        self.context
            .devices()
            .map_err(map_rusb_error)?
            .iter()
            .find(|d| d.bus_number() == device.bus_number && d.address() == device.address)
            .ok_or(UsbError::NotFound)
    }
}

impl UsbHost for RusbHost {
    fn devices(&self) -> Result<Vec<UsbDevice>, UsbError> {
        let list = self.context.devices().map_err(map_rusb_error)?;
        let mut devices = Vec::new();
        for device in list.iter() {
            match Self::describe(&device) {
                Ok(d) => devices.push(d),
                Err(e) => warn!(
                    "Skipping device {:03}/{:03}: {}",
                    device.bus_number(),
                    device.address(),
                    e
                ),
            }
        }
        debug!("Enumerated {} devices", devices.len());
        Ok(devices)
    }

    fn open(&self, device: &UsbDevice) -> Result<Arc<dyn UsbConnection>, UsbError> {
        let raw = self.find(device)?;
        let handle = raw.open().map_err(|e| {
            warn!("Failed to open device {}: {}", device, e);
            map_rusb_error(e)
        })?;
        let serial_number = raw
            .device_descriptor()
            .ok()
            .and_then(|d| d.serial_number_string_index())
            .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());
        debug!("Opened {}", device);
        Ok(Arc::new(RusbConnection {
            handle: RwLock::new(Some(handle)),
            detached: Mutex::new(Vec::new()),
            serial_number,
        }))
    }
}

/// Open libusb device handle
pub struct RusbConnection {
    handle: RwLock<Option<DeviceHandle<Context>>>,
    /// Interfaces whose kernel driver we detached
    detached: Mutex<Vec<u8>>,
    serial_number: Option<String>,
}

impl RusbConnection {
    fn with_handle<T>(
        &self,
        f: impl FnOnce(&DeviceHandle<Context>) -> Result<T, rusb::Error>,
    ) -> Result<T, UsbError> {
        let guard = self.handle.read().unwrap_or_else(PoisonError::into_inner);
        let handle = guard.as_ref().ok_or(UsbError::Closed)?;
        f(handle).map_err(map_rusb_error)
    }

    fn read_descriptor(&self, value: u16, buf: &mut [u8]) -> Result<usize, UsbError> {
        self.with_handle(|h| h.read_control(0x80, GET_DESCRIPTOR, value, 0, buf, DESCRIPTOR_TIMEOUT))
    }
}

impl UsbConnection for RusbConnection {
    fn claim_interface(&self, interface: &UsbInterface, force: bool) -> Result<(), UsbError> {
        let number = interface.id;
        self.with_handle(|handle| {
            if force {
                match handle.kernel_driver_active(number) {
                    Ok(true) => {
                        debug!("Detaching kernel driver from interface {}", number);
                        match handle.detach_kernel_driver(number) {
                            Ok(()) => self
                                .detached
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .push(number),
                            Err(e) => warn!(
                                "Failed to detach kernel driver from interface {}: {}",
                                number, e
                            ),
                        }
                    }
                    Ok(false) => {}
                    Err(e) => debug!(
                        "Could not check kernel driver status for interface {}: {}",
                        number, e
                    ),
                }
            }
            handle.claim_interface(number)?;
            debug!("Claimed interface {}", number);
            Ok(())
        })
    }

    fn release_interface(&self, interface: &UsbInterface) -> Result<(), UsbError> {
        self.with_handle(|handle| handle.release_interface(interface.id))
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
        self.with_handle(|h| h.read_control(request_type, request, value, index, buf, timeout))
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
        self.with_handle(|h| h.write_control(request_type, request, value, index, data, timeout))
    }

    fn bulk_in(
        &self,
        endpoint: &UsbEndpoint,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, UsbError> {
        self.with_handle(|h| h.read_bulk(endpoint.address, buf, timeout))
    }

    // libusb drops the bytes of a transfer that times out part way
    fn read_cancellable(
        &self,
        endpoint: &UsbEndpoint,
        buf: &mut [u8],
        cancel: &CancelToken,
    ) -> Result<usize, UsbError> {
        read_packet_cancellable(self, endpoint, buf, cancel)
    }

    fn bulk_out(
        &self,
        endpoint: &UsbEndpoint,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, UsbError> {
        self.with_handle(|h| h.write_bulk(endpoint.address, data, timeout))
    }

    fn raw_descriptors(&self) -> Result<Vec<u8>, UsbError> {
        let mut device = [0u8; 18];
        let n = self.read_descriptor(DEVICE_DESCRIPTOR_VALUE, &mut device)?;
        let mut raw = device[..n].to_vec();

        let mut header = [0u8; CONFIG_HEADER_LEN];
        let n = self.read_descriptor(CONFIG_DESCRIPTOR_VALUE, &mut header)?;
        if n < 4 {
            return Ok(raw);
        }
        let total = u16::from_le_bytes([header[2], header[3]]) as usize;
        let mut config = vec![0u8; total.max(CONFIG_HEADER_LEN)];
        let n = self.read_descriptor(CONFIG_DESCRIPTOR_VALUE, &mut config)?;
        raw.extend_from_slice(&config[..n]);
        Ok(raw)
    }

    fn serial_number(&self) -> Option<String> {
        self.serial_number.clone()
    }

    fn close(&self) {
        let handle = self
            .handle
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let detached =
                std::mem::take(&mut *self.detached.lock().unwrap_or_else(PoisonError::into_inner));
            for number in detached {
                let _ = handle.release_interface(number);
                // restore the kernel driver we displaced
                if let Err(e) = handle.attach_kernel_driver(number) {
                    debug!("Could not reattach kernel driver to interface {}: {}", number, e);
                }
            }
            debug!("Closed connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_rusb_error() {
        assert_eq!(map_rusb_error(rusb::Error::Timeout), UsbError::Timeout);
        assert_eq!(map_rusb_error(rusb::Error::Pipe), UsbError::Pipe);
        assert_eq!(map_rusb_error(rusb::Error::NoDevice), UsbError::NoDevice);
        assert_eq!(map_rusb_error(rusb::Error::Interrupted), UsbError::Cancelled);
        assert!(matches!(map_rusb_error(rusb::Error::Other), UsbError::Other(_)));
    }

    #[test]
    fn test_map_transfer_type() {
        assert_eq!(map_transfer_type(rusb::TransferType::Bulk), TransferType::Bulk);
        assert_eq!(
            map_transfer_type(rusb::TransferType::Interrupt),
            TransferType::Interrupt
        );
    }
}
