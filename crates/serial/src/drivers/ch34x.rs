//! Qinheng CH340 and CH341A
//!
//! Single port. The chip is configured through register reads and writes
//! and needs a fixed handshake before it passes any data.

use crate::driver::{DriverFactory, DriverKind, SerialDriver};
use crate::port::{ChipsetPort, PortContext, PortEndpoints};
use common::{Error, Result, UsbDevice};
use protocol::ch34x::{self as wire, INIT_SEQUENCE, InitStep};
use protocol::{ControlLine, ControlLines, LineSettings, ids};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

pub struct Ch34xFactory;

impl DriverFactory for Ch34xFactory {
    fn kind(&self) -> DriverKind {
        DriverKind::Ch34x
    }

    fn supported_devices(&self) -> &'static [(u16, &'static [u16])] {
        &[(ids::qinheng::VID, ids::qinheng::ALL_PIDS)]
    }

    fn create(&self, device: UsbDevice) -> Arc<SerialDriver> {
        SerialDriver::build(DriverKind::Ch34x, device, [0], |_, _| {
            Box::new(Ch34xPort::default())
        })
    }
}

#[derive(Default)]
struct Ch34xPort {
    /// (DTR, RTS)
    lines: Mutex<(bool, bool)>,
}

impl Ch34xPort {
    fn lines(&self) -> MutexGuard<'_, (bool, bool)> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn control_out(ctx: &PortContext<'_>, request: u8, value: u16, index: u16) -> Result<()> {
        ctx.control_out(wire::REQTYPE_HOST_TO_DEVICE, request, value, index, &[])
    }

    fn check_state(
        ctx: &PortContext<'_>,
        label: &str,
        request: u8,
        value: u16,
        expected: &[Option<u8>],
    ) -> Result<()> {
        let mut reply = vec![0u8; expected.len()];
        let n = ctx
            .control_in(wire::REQTYPE_DEVICE_TO_HOST, request, value, 0, &mut reply)
            .map_err(|e| Error::Io(format!("Failed send cmd [{}]: {}", label, e)))?;
        Ok(wire::check_state(label, expected, &reply, n)?)
    }

    fn set_baud_rate(ctx: &PortContext<'_>, baud_rate: u32) -> Result<()> {
        let (value1, value2) = wire::baud_rate_values(baud_rate)?;
        debug!(
            "CH34x baud rate {}: {:#06x} {:#06x}",
            baud_rate, value1, value2
        );
        Self::control_out(ctx, wire::WRITE_REGISTER_REQUEST, wire::BAUD_REGISTER_1, value1)
            .map_err(|e| Error::Io(format!("Error setting baud rate: #1 failed: {}", e)))?;
        Self::control_out(ctx, wire::WRITE_REGISTER_REQUEST, wire::BAUD_REGISTER_2, value2)
            .map_err(|e| Error::Io(format!("Error setting baud rate: #2 failed: {}", e)))
    }

    fn write_control_lines(ctx: &PortContext<'_>, dtr: bool, rts: bool) -> Result<()> {
        Self::control_out(
            ctx,
            wire::MODEM_CONTROL_REQUEST,
            wire::modem_control_value(dtr, rts),
            0,
        )
        .map_err(|e| Error::Io(format!("Failed to set control lines: {}", e)))
    }

    fn initialize(&self, ctx: &PortContext<'_>) -> Result<()> {
        for step in INIT_SEQUENCE {
            match step {
                InitStep::Check {
                    label,
                    request,
                    value,
                    expected,
                } => Self::check_state(ctx, label, request, value, expected)?,
                InitStep::Out {
                    label,
                    request,
                    value,
                    index,
                } => Self::control_out(ctx, request, value, index)
                    .map_err(|e| Error::Io(format!("Init failed: {}: {}", label, e)))?,
                InitStep::DefaultBaudRate => Self::set_baud_rate(ctx, wire::DEFAULT_BAUD_RATE)?,
                InitStep::ControlLines => {
                    let (dtr, rts) = *self.lines();
                    Self::write_control_lines(ctx, dtr, rts)?;
                }
            }
        }
        Ok(())
    }
}

impl ChipsetPort for Ch34xPort {
    fn name(&self) -> &'static str {
        "Ch34xSerialPort"
    }

    fn open_interfaces(&self, ctx: &PortContext<'_>) -> Result<PortEndpoints> {
        for interface in &ctx.device.interfaces {
            ctx.claim(interface)?;
        }
        let endpoints = ctx
            .device
            .interfaces
            .last()
            .map(PortEndpoints::bulk)
            .unwrap_or_default();

        self.initialize(ctx)?;
        Self::set_baud_rate(ctx, wire::DEFAULT_BAUD_RATE)?;
        Ok(endpoints)
    }

    fn close_interfaces(&self, ctx: &PortContext<'_>) -> Result<()> {
        for interface in &ctx.device.interfaces {
            if let Err(e) = ctx.release(interface) {
                warn!("Failed to release interface {}: {}", interface.id, e);
            }
        }
        Ok(())
    }

    fn set_parameters(&self, ctx: &PortContext<'_>, settings: &LineSettings) -> Result<()> {
        let lcr = wire::line_control(settings)?;
        Self::set_baud_rate(ctx, settings.baud_rate)?;
        Self::control_out(ctx, wire::WRITE_REGISTER_REQUEST, wire::LCR_REGISTER, lcr)
            .map_err(|e| Error::Io(format!("Error setting control byte: {}", e)))
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
        let mut status = [0u8; 2];
        ctx.control_in_exact(
            wire::REQTYPE_DEVICE_TO_HOST,
            wire::READ_REGISTER_REQUEST,
            wire::STATUS_REGISTER,
            0,
            &mut status,
            "Get status",
        )?;
        Ok(wire::decode_status(status[0]))
    }

    fn set_output_line(&self, ctx: &PortContext<'_>, line: ControlLine, value: bool) -> Result<()> {
        let (mut dtr, mut rts) = *self.lines();
        match line {
            ControlLine::Dtr => dtr = value,
            ControlLine::Rts => rts = value,
            _ => return Err(Error::InvalidArgument(format!("{} is an input line", line))),
        }
        Self::write_control_lines(ctx, dtr, rts)?;
        *self.lines() = (dtr, rts);
        Ok(())
    }

    fn set_break(&self, ctx: &PortContext<'_>, value: bool) -> Result<()> {
        let mut current = [0u8; 2];
        ctx.control_in_exact(
            wire::REQTYPE_DEVICE_TO_HOST,
            wire::READ_REGISTER_REQUEST,
            wire::BREAK_REGISTER,
            0,
            &mut current,
            "Error getting BREAK condition",
        )?;
        let register = wire::break_register_value(current, value);
        Self::control_out(ctx, wire::WRITE_REGISTER_REQUEST, wire::BREAK_REGISTER, register)
            .map_err(|e| Error::Io(format!("Error setting BREAK condition: {}", e)))
    }
}
