//! Probe table: maps devices to driver factories
//!
//! Lookups try the exact (VID, PID) table first, then ask each registered
//! factory in registration order whether it recognizes the device.

use crate::driver::{DriverFactory, DriverKind, SerialDriver};
use crate::drivers::factory_for;
use common::UsbDevice;
use protocol::UsbId;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Registration order of the default table
pub const DEFAULT_DRIVERS: [DriverKind; 6] = [
    DriverKind::CdcAcm,
    DriverKind::Ch34x,
    DriverKind::ChromeCcd,
    DriverKind::Cp21xx,
    DriverKind::Ftdi,
    DriverKind::GsmModem,
];

#[derive(Default)]
pub struct ProbeTable {
    products: HashMap<UsbId, Arc<dyn DriverFactory>>,
    factories: Vec<Arc<dyn DriverFactory>>,
}

impl ProbeTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with every built-in driver registered
    pub fn with_default_drivers() -> Self {
        let mut table = Self::new();
        for kind in DEFAULT_DRIVERS {
            table.add_driver(factory_for(kind));
        }
        table
    }

    /// Add or replace the factory for one (VID, PID) pair
    pub fn add_product(
        &mut self,
        vendor_id: u16,
        product_id: u16,
        factory: Arc<dyn DriverFactory>,
    ) -> &mut Self {
        let id = UsbId::new(vendor_id, product_id);
        if let Some(previous) = self.products.insert(id, factory.clone()) {
            debug!(
                "{:04x}:{:04x} moved from {} to {}",
                vendor_id,
                product_id,
                previous.kind(),
                factory.kind()
            );
        }
        self
    }

    /// Register all products of `factory` and append it to the probe list
    pub fn add_driver(&mut self, factory: Arc<dyn DriverFactory>) -> &mut Self {
        for (vendor_id, product_ids) in factory.supported_devices() {
            for product_id in product_ids.iter() {
                self.add_product(*vendor_id, *product_id, factory.clone());
            }
        }
        self.factories.push(factory);
        self
    }

    /// Factory that would handle `device`
    pub fn find_factory(&self, device: &UsbDevice) -> Option<&Arc<dyn DriverFactory>> {
        if let Some(factory) = self.products.get(&device.id()) {
            trace!("{} matched {} by id", device, factory.kind());
            return Some(factory);
        }
        self.factories.iter().find(|factory| factory.probe(device))
    }

    /// Build the driver for `device`, if any factory accepts it
    pub fn find_driver(&self, device: &UsbDevice) -> Option<Arc<SerialDriver>> {
        let factory = self.find_factory(device)?;
        debug!("Using {} driver for {}", factory.kind(), device);
        Some(factory.create(device.clone()))
    }

    /// Number of exact-match entries
    pub fn product_count(&self) -> usize {
        self.products.len()
    }
}

impl std::fmt::Debug for ProbeTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<DriverKind> = self.factories.iter().map(|f| f.kind()).collect();
        f.debug_struct("ProbeTable")
            .field("products", &self.products.len())
            .field("factories", &kinds)
            .finish()
    }
}
