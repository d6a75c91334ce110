//! Driver model
//!
//! A [`SerialDriver`] represents one physical device of a known chipset and
//! owns its ports. Ports point back at the driver weakly, so dropping the
//! last handle to the driver releases the whole tree.

use crate::port::{ChipsetPort, SerialPort};
use common::{Error, UsbDevice};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Chipset families with a driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriverKind {
    CdcAcm,
    Ch34x,
    ChromeCcd,
    Cp21xx,
    Ftdi,
    GsmModem,
}

impl DriverKind {
    pub const ALL: [DriverKind; 6] = [
        DriverKind::CdcAcm,
        DriverKind::Ch34x,
        DriverKind::ChromeCcd,
        DriverKind::Cp21xx,
        DriverKind::Ftdi,
        DriverKind::GsmModem,
    ];

    /// Name used in configuration files
    pub const fn config_name(self) -> &'static str {
        match self {
            DriverKind::CdcAcm => "cdc-acm",
            DriverKind::Ch34x => "ch34x",
            DriverKind::ChromeCcd => "chrome-ccd",
            DriverKind::Cp21xx => "cp21xx",
            DriverKind::Ftdi => "ftdi",
            DriverKind::GsmModem => "gsm-modem",
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriverKind::CdcAcm => "CDC-ACM",
            DriverKind::Ch34x => "CH34x",
            DriverKind::ChromeCcd => "Chrome CCD",
            DriverKind::Cp21xx => "CP21xx",
            DriverKind::Ftdi => "FTDI",
            DriverKind::GsmModem => "GSM modem",
        };
        f.write_str(name)
    }
}

impl FromStr for DriverKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        DriverKind::ALL
            .into_iter()
            .find(|kind| kind.config_name() == wanted)
            .ok_or_else(|| Error::InvalidArgument(format!("Unknown driver: {}", s)))
    }
}

/// One device driven by a chipset driver
pub struct SerialDriver {
    kind: DriverKind,
    device: Arc<UsbDevice>,
    ports: Vec<Arc<SerialPort>>,
}

impl SerialDriver {
    /// Build a driver whose ports are produced by `chip_for_port`
    ///
    /// `port_numbers` lists the numbers of the ports in order.
    pub(crate) fn build<F>(
        kind: DriverKind,
        device: UsbDevice,
        port_numbers: impl IntoIterator<Item = i32>,
        mut chip_for_port: F,
    ) -> Arc<Self>
    where
        F: FnMut(&UsbDevice, i32) -> Box<dyn ChipsetPort>,
    {
        let device = Arc::new(device);
        Arc::new_cyclic(|weak| {
            let ports = port_numbers
                .into_iter()
                .map(|number| {
                    let chip = chip_for_port(&device, number);
                    SerialPort::new(weak.clone(), device.clone(), number, chip)
                })
                .collect();
            SerialDriver {
                kind,
                device,
                ports,
            }
        })
    }

    pub fn kind(&self) -> DriverKind {
        self.kind
    }

    pub fn device(&self) -> &UsbDevice {
        &self.device
    }

    pub fn ports(&self) -> &[Arc<SerialPort>] {
        &self.ports
    }

    pub fn port(&self, index: usize) -> Option<&Arc<SerialPort>> {
        self.ports.get(index)
    }
}

impl fmt::Debug for SerialDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialDriver")
            .field("kind", &self.kind)
            .field("device", &self.device.to_string())
            .field("ports", &self.ports.len())
            .finish()
    }
}

/// Per-chipset entry point used by the probe table
pub trait DriverFactory: Send + Sync {
    fn kind(&self) -> DriverKind;

    /// Exact-match table: vendor id and its product ids
    fn supported_devices(&self) -> &'static [(u16, &'static [u16])];

    /// Fallback check for devices that are not in any exact-match table
    fn probe(&self, _device: &UsbDevice) -> bool {
        false
    }

    fn create(&self, device: UsbDevice) -> Arc<SerialDriver>;
}
