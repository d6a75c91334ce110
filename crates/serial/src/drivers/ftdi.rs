//! FTDI FT232R, FT2232H, FT4232H, FT232H and FT231X
//!
//! Every bulk IN packet starts with a two byte modem status header which is
//! stripped before data reaches the caller. Multi-port chips and the "H"
//! variants take the port number in the low byte of the baud rate wIndex.

use crate::driver::{DriverFactory, DriverKind, SerialDriver};
use crate::port::{ChipsetPort, PortContext, PortEndpoints, ReadContext};
use common::{Error, Result, UsbDevice};
use protocol::descriptors::device_release_high;
use protocol::ftdi::{self as wire, READ_HEADER_LENGTH};
use protocol::{ControlLine, ControlLines, LineSettings, ids};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

const MIN_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(1);

pub struct FtdiFactory;

impl DriverFactory for FtdiFactory {
    fn kind(&self) -> DriverKind {
        DriverKind::Ftdi
    }

    fn supported_devices(&self) -> &'static [(u16, &'static [u16])] {
        &[(ids::ftdi::VID, ids::ftdi::ALL_PIDS)]
    }

    fn create(&self, device: UsbDevice) -> Arc<SerialDriver> {
        let ports = 0..device.interface_count() as i32;
        SerialDriver::build(DriverKind::Ftdi, device, ports, |_, _| {
            Box::new(FtdiPort::default())
        })
    }
}

#[derive(Debug, Default)]
struct FtdiState {
    dtr: bool,
    rts: bool,
    baud_rate_with_port: bool,
    /// Last SET_DATA value, reused when toggling BREAK
    break_config: u16,
}

#[derive(Default)]
struct FtdiPort {
    state: Mutex<FtdiState>,
}

impl FtdiPort {
    fn state(&self) -> MutexGuard<'_, FtdiState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn control_out(&self, ctx: &PortContext<'_>, request: u8, value: u16) -> Result<()> {
        ctx.control_out(
            wire::REQTYPE_HOST_TO_DEVICE,
            request,
            value,
            port_index(ctx),
            &[],
        )
    }
}

/// wIndex selecting the channel of a multi-port chip (1-based)
fn port_index(ctx: &PortContext<'_>) -> u16 {
    ctx.port_index() as u16 + 1
}

impl ChipsetPort for FtdiPort {
    fn name(&self) -> &'static str {
        "FtdiSerialPort"
    }

    fn open_interfaces(&self, ctx: &PortContext<'_>) -> Result<PortEndpoints> {
        let interface = ctx.interface(ctx.port_index())?;
        ctx.claim(interface)?;
        if interface.endpoints.len() < 2 {
            return Err(Error::Io("Not enough endpoints".to_string()));
        }
        let endpoints = PortEndpoints {
            read: interface.endpoint(0).cloned(),
            write: interface.endpoint(1).cloned(),
        };

        let (dtr, rts) = {
            let state = self.state();
            (state.dtr, state.rts)
        };
        self.control_out(ctx, wire::RESET_REQUEST, wire::RESET_ALL)
            .map_err(|e| Error::Io(format!("Reset failed: {}", e)))?;
        self.control_out(ctx, wire::MODEM_CONTROL_REQUEST, wire::modem_control_value(dtr, rts))
            .map_err(|e| Error::Io(format!("Init RTS,DTR failed: {}", e)))?;

        let raw = ctx.connection.raw_descriptors()?;
        let device_type = device_release_high(&raw)
            .ok_or_else(|| Error::Io("Could not get device descriptors".to_string()))?;
        let with_port = wire::baud_rate_with_port(device_type, ctx.device.interface_count());
        debug!(
            "FTDI device type {:#04x}, baud rate with port: {}",
            device_type, with_port
        );
        self.state().baud_rate_with_port = with_port;

        Ok(endpoints)
    }

    fn close_interfaces(&self, ctx: &PortContext<'_>) -> Result<()> {
        let interface = ctx.interface(ctx.port_index())?;
        ctx.release(interface)
    }

    fn read(&self, io: &ReadContext<'_>, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if buf.len() <= READ_HEADER_LENGTH {
            return Err(Error::InvalidArgument("Read buffer too small".to_string()));
        }

        // a transfer of exactly one header carries status only
        let n = if timeout.is_zero() {
            loop {
                let n = io.read(buf, Duration::ZERO, true)?;
                if n != READ_HEADER_LENGTH {
                    break n;
                }
            }
        } else {
            let end = Instant::now() + timeout;
            let n = loop {
                let remaining = end.saturating_duration_since(Instant::now());
                let n = io.read(buf, remaining.max(MIN_ATTEMPT_TIMEOUT), false)?;
                if n != READ_HEADER_LENGTH || Instant::now() >= end {
                    break n;
                }
            };
            if n == 0 {
                io.test_connection(Instant::now() < end)?;
            }
            n
        };

        let packet_size = io.endpoint().max_packet_size as usize;
        Ok(wire::strip_status_headers(buf, n, packet_size)?)
    }

    fn set_parameters(&self, ctx: &PortContext<'_>, settings: &LineSettings) -> Result<()> {
        let divisor = wire::baud_divisor(settings.baud_rate)?;
        let with_port = self.state().baud_rate_with_port;
        let index = if with_port {
            divisor.index_with_port(ctx.port_index() as u16)
        } else {
            divisor.index
        };
        debug!(
            "baud rate={}, effective={}, value={:#06x}, index={:#06x}",
            settings.baud_rate, divisor.effective_baud_rate, divisor.value, index
        );
        ctx.control_out(
            wire::REQTYPE_HOST_TO_DEVICE,
            wire::SET_BAUD_RATE_REQUEST,
            divisor.value,
            index,
            &[],
        )
        .map_err(|e| Error::Io(format!("Setting baudrate failed: {}", e)))?;

        let config = wire::data_config(settings)?;
        self.control_out(ctx, wire::SET_DATA_REQUEST, config)
            .map_err(|e| Error::Io(format!("Setting parameters failed: {}", e)))?;
        self.state().break_config = config;
        Ok(())
    }

    fn supported_control_lines(&self) -> ControlLines {
        ControlLines::ALL
    }

    fn output_lines(&self) -> ControlLines {
        let state = self.state();
        let mut lines = ControlLines::EMPTY;
        lines.set(ControlLine::Dtr, state.dtr);
        lines.set(ControlLine::Rts, state.rts);
        lines
    }

    fn input_lines(&self, ctx: &PortContext<'_>) -> Result<ControlLines> {
        let mut status = [0u8; 2];
        ctx.control_in_exact(
            wire::REQTYPE_DEVICE_TO_HOST,
            wire::GET_MODEM_STATUS_REQUEST,
            0,
            port_index(ctx),
            &mut status,
            "Get modem status",
        )?;
        Ok(wire::decode_modem_status(status[0]))
    }

    fn set_output_line(&self, ctx: &PortContext<'_>, line: ControlLine, value: bool) -> Result<()> {
        let request_value = match (line, value) {
            (ControlLine::Dtr, true) => wire::MODEM_CONTROL_DTR_ENABLE,
            (ControlLine::Dtr, false) => wire::MODEM_CONTROL_DTR_DISABLE,
            (ControlLine::Rts, true) => wire::MODEM_CONTROL_RTS_ENABLE,
            (ControlLine::Rts, false) => wire::MODEM_CONTROL_RTS_DISABLE,
            _ => return Err(Error::InvalidArgument(format!("{} is an input line", line))),
        };
        self.control_out(ctx, wire::MODEM_CONTROL_REQUEST, request_value)
            .map_err(|e| Error::Io(format!("Set {} failed: {}", line, e)))?;

        let mut state = self.state();
        match line {
            ControlLine::Dtr => state.dtr = value,
            _ => state.rts = value,
        }
        Ok(())
    }

    fn purge_hw_buffers(&self, ctx: &PortContext<'_>, write: bool, read: bool) -> Result<()> {
        if write {
            self.control_out(ctx, wire::RESET_REQUEST, wire::RESET_PURGE_RX)
                .map_err(|e| Error::Io(format!("Purge write buffer failed: {}", e)))?;
        }
        if read {
            self.control_out(ctx, wire::RESET_REQUEST, wire::RESET_PURGE_TX)
                .map_err(|e| Error::Io(format!("Purge read buffer failed: {}", e)))?;
        }
        Ok(())
    }

    fn set_break(&self, ctx: &PortContext<'_>, value: bool) -> Result<()> {
        let config = wire::break_config(self.state().break_config, value);
        self.control_out(ctx, wire::SET_DATA_REQUEST, config)
            .map_err(|e| Error::Io(format!("Setting BREAK failed: {}", e)))
    }

    fn latency_timer(&self, ctx: &PortContext<'_>) -> Result<u8> {
        let mut value = [0u8; 1];
        ctx.control_in_exact(
            wire::REQTYPE_DEVICE_TO_HOST,
            wire::GET_LATENCY_TIMER_REQUEST,
            0,
            port_index(ctx),
            &mut value,
            "Get latency timer",
        )?;
        Ok(value[0])
    }

    fn set_latency_timer(&self, ctx: &PortContext<'_>, millis: u8) -> Result<()> {
        self.control_out(ctx, wire::SET_LATENCY_TIMER_REQUEST, millis as u16)
            .map_err(|e| Error::Io(format!("Set latency timer failed: {}", e)))
    }
}
