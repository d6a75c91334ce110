//! Device enumeration through the probe table

use crate::driver::SerialDriver;
use crate::probe::ProbeTable;
use common::{Result, UsbDevice, UsbHost};
use std::sync::Arc;
use tracing::debug;

pub struct UsbSerialProber {
    table: ProbeTable,
}

impl UsbSerialProber {
    pub fn new(table: ProbeTable) -> Self {
        Self { table }
    }

    /// Prober over all built-in drivers
    pub fn default_prober() -> Self {
        Self::new(ProbeTable::with_default_drivers())
    }

    pub fn table(&self) -> &ProbeTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut ProbeTable {
        &mut self.table
    }

    /// Drivers for every supported device the host can see, in enumeration
    /// order. Devices are not opened.
    pub fn find_all_drivers(&self, host: &dyn UsbHost) -> Result<Vec<Arc<SerialDriver>>> {
        let devices = host.devices()?;
        let total = devices.len();
        let drivers: Vec<_> = devices
            .iter()
            .filter_map(|device| self.probe_device(device))
            .collect();
        debug!("{} of {} devices have a serial driver", drivers.len(), total);
        Ok(drivers)
    }

    pub fn probe_device(&self, device: &UsbDevice) -> Option<Arc<SerialDriver>> {
        self.table.find_driver(device)
    }
}

impl Default for UsbSerialProber {
    fn default() -> Self {
        Self::default_prober()
    }
}
