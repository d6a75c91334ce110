//! Unisoc based GSM modems (Fibocom L610 / L612)
//!
//! The AT command channel on interface 0 only needs a DTR-style class
//! request before it starts talking.

use crate::driver::{DriverFactory, DriverKind, SerialDriver};
use crate::port::{ChipsetPort, PortContext, PortEndpoints};
use common::{Error, Result, UsbDevice};
use protocol::{LineSettings, cdc, ids};
use std::sync::Arc;
use tracing::debug;

pub struct GsmModemFactory;

impl DriverFactory for GsmModemFactory {
    fn kind(&self) -> DriverKind {
        DriverKind::GsmModem
    }

    fn supported_devices(&self) -> &'static [(u16, &'static [u16])] {
        &[(ids::unisoc::VID, ids::unisoc::ALL_PIDS)]
    }

    fn create(&self, device: UsbDevice) -> Arc<SerialDriver> {
        SerialDriver::build(DriverKind::GsmModem, device, [0], |_, _| {
            Box::new(GsmModemPort)
        })
    }
}

struct GsmModemPort;

impl ChipsetPort for GsmModemPort {
    fn name(&self) -> &'static str {
        "GsmModemSerialPort"
    }

    fn open_interfaces(&self, ctx: &PortContext<'_>) -> Result<PortEndpoints> {
        debug!("claiming interfaces, count={}", ctx.device.interface_count());
        let interface = ctx.interface(0)?;
        ctx.connection
            .claim_interface(interface, true)
            .map_err(|e| Error::Io(format!("Could not claim shared control/data interface: {}", e)))?;
        debug!("endpoint count={}", interface.endpoints.len());
        let endpoints = PortEndpoints::bulk(interface);

        ctx.control_out(cdc::REQUEST_TYPE, cdc::SET_CONTROL_LINE_STATE, 0x01, 0, &[])
            .map_err(|e| Error::Io(format!("init failed: {}", e)))?;
        Ok(endpoints)
    }

    fn close_interfaces(&self, ctx: &PortContext<'_>) -> Result<()> {
        ctx.release(ctx.interface(0)?)
    }

    fn set_parameters(&self, _ctx: &PortContext<'_>, _settings: &LineSettings) -> Result<()> {
        Err(Error::Unsupported(
            "Line settings on a GSM modem port".to_string(),
        ))
    }
}
