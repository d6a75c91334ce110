//! Chrome OS closed case debugging (Cr50 / Ti50)
//!
//! Three bulk-only ports (console, AP UART, EC UART) with no line settings.

use crate::driver::{DriverFactory, DriverKind, SerialDriver};
use crate::port::{ChipsetPort, PortContext, PortEndpoints};
use common::{Error, Result, UsbDevice};
use protocol::{LineSettings, ids};
use std::sync::Arc;
use tracing::debug;

/// Ports exposed by every CCD device
pub const PORT_COUNT: i32 = 3;

pub struct ChromeCcdFactory;

impl DriverFactory for ChromeCcdFactory {
    fn kind(&self) -> DriverKind {
        DriverKind::ChromeCcd
    }

    fn supported_devices(&self) -> &'static [(u16, &'static [u16])] {
        &[(ids::google::VID, ids::google::ALL_PIDS)]
    }

    fn create(&self, device: UsbDevice) -> Arc<SerialDriver> {
        SerialDriver::build(DriverKind::ChromeCcd, device, 0..PORT_COUNT, |_, _| {
            Box::new(ChromeCcdPort)
        })
    }
}

struct ChromeCcdPort;

impl ChipsetPort for ChromeCcdPort {
    fn name(&self) -> &'static str {
        "ChromeCcdSerialPort"
    }

    fn open_interfaces(&self, ctx: &PortContext<'_>) -> Result<PortEndpoints> {
        debug!("claiming interfaces, count={}", ctx.device.interface_count());
        let interface = ctx.interface(ctx.port_index())?;
        ctx.connection
            .claim_interface(interface, true)
            .map_err(|e| Error::Io(format!("Could not claim shared control/data interface: {}", e)))?;
        debug!("endpoint count={}", interface.endpoints.len());
        Ok(PortEndpoints::bulk(interface))
    }

    fn close_interfaces(&self, ctx: &PortContext<'_>) -> Result<()> {
        ctx.release(ctx.interface(ctx.port_index())?)
    }

    fn set_parameters(&self, _ctx: &PortContext<'_>, _settings: &LineSettings) -> Result<()> {
        Err(Error::Unsupported(
            "Line settings on a CCD port".to_string(),
        ))
    }
}
