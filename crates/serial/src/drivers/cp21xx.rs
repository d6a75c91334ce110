//! Silicon Labs CP2102, CP2105 and CP2108
//!
//! One port per interface. The second port of a CP2105 is the "standard"
//! UART with a reduced feature set; see [`is_restricted_port`].

use crate::driver::{DriverFactory, DriverKind, SerialDriver};
use crate::port::{ChipsetPort, PortContext, PortEndpoints};
use common::{Error, Result, UsbDevice};
use protocol::cp210x::{self as wire, is_restricted_port};
use protocol::{ControlLine, ControlLines, LineSettings, ids};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

pub struct Cp21xxFactory;

impl DriverFactory for Cp21xxFactory {
    fn kind(&self) -> DriverKind {
        DriverKind::Cp21xx
    }

    fn supported_devices(&self) -> &'static [(u16, &'static [u16])] {
        &[(ids::silabs::VID, ids::silabs::ALL_PIDS)]
    }

    fn create(&self, device: UsbDevice) -> Arc<SerialDriver> {
        let ports = 0..device.interface_count() as i32;
        SerialDriver::build(DriverKind::Cp21xx, device, ports, |device, number| {
            let restricted = is_restricted_port(device.interface_count(), number as usize);
            Box::new(Cp21xxPort {
                restricted,
                lines: Mutex::new((false, false)),
            })
        })
    }
}

struct Cp21xxPort {
    restricted: bool,
    /// (DTR, RTS)
    lines: Mutex<(bool, bool)>,
}

impl Cp21xxPort {
    fn lines(&self) -> MutexGuard<'_, (bool, bool)> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_config(&self, ctx: &PortContext<'_>, request: u8, value: u16) -> Result<()> {
        ctx.control_out(
            wire::REQTYPE_HOST_TO_DEVICE,
            request,
            value,
            ctx.port_index() as u16,
            &[],
        )
        .map_err(|e| Error::Io(format!("Control transfer failed: {:#04x} / {:#06x}: {}", request, value, e)))
    }
}

impl ChipsetPort for Cp21xxPort {
    fn name(&self) -> &'static str {
        "Cp21xxSerialPort"
    }

    fn open_interfaces(&self, ctx: &PortContext<'_>) -> Result<PortEndpoints> {
        if ctx.port_index() >= ctx.device.interface_count() {
            return Err(Error::Io("Unknown port number".to_string()));
        }
        let interface = ctx.interface(ctx.port_index())?;
        ctx.claim(interface)?;
        let endpoints = PortEndpoints::bulk(interface);

        let (dtr, rts) = *self.lines();
        self.set_config(ctx, wire::IFC_ENABLE_REQUEST, wire::UART_ENABLE)?;
        let mhs = (if dtr { wire::DTR_ENABLE } else { wire::DTR_DISABLE })
            | (if rts { wire::RTS_ENABLE } else { wire::RTS_DISABLE });
        self.set_config(ctx, wire::SET_MHS_REQUEST, mhs)?;
        debug!("CP21xx port {} enabled, restricted: {}", ctx.port_number, self.restricted);

        Ok(endpoints)
    }

    fn close_interfaces(&self, ctx: &PortContext<'_>) -> Result<()> {
        if let Err(e) = self.set_config(ctx, wire::IFC_ENABLE_REQUEST, wire::UART_DISABLE) {
            warn!("Disabling UART failed: {}", e);
        }
        let interface = ctx.interface(ctx.port_index())?;
        ctx.release(interface)
    }

    fn set_parameters(&self, ctx: &PortContext<'_>, settings: &LineSettings) -> Result<()> {
        let config = wire::line_control(settings, self.restricted)?;
        let payload = wire::baud_rate_payload(settings.baud_rate);
        ctx.control_out(
            wire::REQTYPE_HOST_TO_DEVICE,
            wire::SET_BAUDRATE_REQUEST,
            0,
            ctx.port_index() as u16,
            &payload,
        )
        .map_err(|e| Error::Io(format!("Error setting baud rate: {}", e)))?;
        self.set_config(ctx, wire::SET_LINE_CTL_REQUEST, config)
    }

    fn supported_control_lines(&self) -> ControlLines {
        ControlLines::ALL
    }

    fn output_lines(&self) -> ControlLines {
        let (dtr, rts) = *self.lines();
        let mut lines = ControlLines::EMPTY;
        lines.set(ControlLine::Dtr, dtr);
        lines.set(ControlLine::Rts, rts);
        lines
    }

    fn input_lines(&self, ctx: &PortContext<'_>) -> Result<ControlLines> {
        let mut status = [0u8; 1];
        ctx.control_in_exact(
            wire::REQTYPE_DEVICE_TO_HOST,
            wire::GET_MDMSTS_REQUEST,
            0,
            ctx.port_index() as u16,
            &mut status,
            "Get modem status",
        )?;
        Ok(wire::decode_modem_status(status[0]))
    }

    fn set_output_line(&self, ctx: &PortContext<'_>, line: ControlLine, value: bool) -> Result<()> {
        let mhs = match (line, value) {
            (ControlLine::Dtr, true) => wire::DTR_ENABLE,
            (ControlLine::Dtr, false) => wire::DTR_DISABLE,
            (ControlLine::Rts, true) => wire::RTS_ENABLE,
            (ControlLine::Rts, false) => wire::RTS_DISABLE,
            _ => return Err(Error::InvalidArgument(format!("{} is an input line", line))),
        };
        self.set_config(ctx, wire::SET_MHS_REQUEST, mhs)?;

        let mut lines = self.lines();
        match line {
            ControlLine::Dtr => lines.0 = value,
            _ => lines.1 = value,
        }
        Ok(())
    }

    fn purge_hw_buffers(&self, ctx: &PortContext<'_>, write: bool, read: bool) -> Result<()> {
        match wire::flush_value(write, read) {
            Some(value) => self.set_config(ctx, wire::FLUSH_REQUEST, value),
            None => Ok(()),
        }
    }

    fn set_break(&self, ctx: &PortContext<'_>, value: bool) -> Result<()> {
        self.set_config(ctx, wire::SET_BREAK_REQUEST, u16::from(value))
    }
}
