//! Device selection on the command line

use anyhow::{Result, anyhow, bail};
use common::UsbDevice;
use protocol::UsbId;
use protocol::ids::parse_vid_pid;
use serial::SerialDriver;
use std::str::FromStr;
use std::sync::Arc;

/// Which device a command talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSelector {
    /// "bus/address", decimal as printed by `list`
    Location { bus: u8, address: u8 },
    /// "vid:pid", hexadecimal
    Id(UsbId),
}

impl DeviceSelector {
    pub fn matches(&self, device: &UsbDevice) -> bool {
        match self {
            DeviceSelector::Location { bus, address } => {
                device.bus_number == *bus && device.address == *address
            }
            DeviceSelector::Id(id) => device.id() == *id,
        }
    }
}

impl FromStr for DeviceSelector {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Some((bus, address)) = s.split_once('/') {
            let bus = bus
                .trim()
                .parse()
                .map_err(|_| anyhow!("Invalid bus number in '{}'", s))?;
            let address = address
                .trim()
                .parse()
                .map_err(|_| anyhow!("Invalid device address in '{}'", s))?;
            return Ok(DeviceSelector::Location { bus, address });
        }
        parse_vid_pid(s)
            .map(DeviceSelector::Id)
            .ok_or_else(|| anyhow!("Expected BUS/ADDRESS or VID:PID, got '{}'", s))
    }
}

/// Pick the driver for `selector`, or the only driver when none is given
pub fn select_driver(
    drivers: Vec<Arc<SerialDriver>>,
    selector: Option<&DeviceSelector>,
) -> Result<Arc<SerialDriver>> {
    match selector {
        Some(selector) => drivers
            .into_iter()
            .find(|d| selector.matches(d.device()))
            .ok_or_else(|| anyhow!("No serial device matches {:?}", selector)),
        None => {
            if drivers.len() > 1 {
                bail!(
                    "{} serial devices found, pick one with --device",
                    drivers.len()
                );
            }
            drivers
                .into_iter()
                .next()
                .ok_or_else(|| anyhow!("No serial devices found"))
        }
    }
}
