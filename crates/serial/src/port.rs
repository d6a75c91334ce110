//! Common port engine
//!
//! [`SerialPort`] implements everything that does not depend on the chipset:
//! the open/close lifecycle, endpoint bookkeeping, chunked writes with a
//! shared deadline, and blocking or cancellable reads. Chipset drivers plug
//! in through [`ChipsetPort`].
//!
//! All methods take `&self`; a port is shared as `Arc<SerialPort>` so one
//! thread can block in [`SerialPort::read`] while another writes or closes.

use crate::driver::SerialDriver;
use common::{CancelToken, Error, Result, UsbConnection, UsbDevice, UsbEndpoint, UsbError, UsbInterface};
use protocol::{ControlLine, ControlLines, LineSettings};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Largest single bulk IN transfer issued by a timed read
pub const MAX_READ_SIZE: usize = 16 * 1024;

/// Timeout of vendor and class control requests
pub(crate) const USB_TIMEOUT: Duration = Duration::from_millis(5000);

const LIVENESS_TIMEOUT: Duration = Duration::from_millis(200);

/// Endpoints resolved by [`ChipsetPort::open_interfaces`]
#[derive(Debug, Default)]
pub(crate) struct PortEndpoints {
    pub read: Option<UsbEndpoint>,
    pub write: Option<UsbEndpoint>,
}

impl PortEndpoints {
    /// Bulk endpoints of `interface`
    pub fn bulk(interface: &UsbInterface) -> Self {
        let (read, write) = interface.bulk_endpoints();
        Self { read, write }
    }
}

/// What a chipset hook sees of its port
pub(crate) struct PortContext<'a> {
    pub device: &'a UsbDevice,
    pub connection: &'a dyn UsbConnection,
    pub port_number: i32,
}

impl PortContext<'_> {
    /// Port number as a zero-based index (the CDC-ACM fallback port maps to 0)
    pub fn port_index(&self) -> usize {
        self.port_number.max(0) as usize
    }

    pub fn interface(&self, index: usize) -> Result<&UsbInterface> {
        self.device
            .interface(index)
            .ok_or_else(|| Error::Io(format!("Unknown interface {}", index)))
    }

    pub fn claim(&self, interface: &UsbInterface) -> Result<()> {
        self.connection
            .claim_interface(interface, true)
            .map_err(|e| Error::Io(format!("Could not claim interface {}: {}", interface.id, e)))
    }

    pub fn release(&self, interface: &UsbInterface) -> Result<()> {
        Ok(self.connection.release_interface(interface)?)
    }

    pub fn control_out(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
    ) -> Result<()> {
        self.connection
            .control_out(request_type, request, value, index, data, USB_TIMEOUT)?;
        Ok(())
    }

    pub fn control_in(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
    ) -> Result<usize> {
        Ok(self
            .connection
            .control_in(request_type, request, value, index, buf, USB_TIMEOUT)?)
    }

    /// Control IN that must fill `buf` completely
    pub fn control_in_exact(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        what: &str,
    ) -> Result<()> {
        let n = self.control_in(request_type, request, value, index, buf)?;
        if n != buf.len() {
            return Err(Error::Io(format!("{} failed: result={}", what, n)));
        }
        Ok(())
    }
}

/// Read side of an open port, handed to [`ChipsetPort::read`]
pub(crate) struct ReadContext<'a> {
    connection: &'a dyn UsbConnection,
    endpoint: &'a UsbEndpoint,
    cancel: &'a CancelToken,
}

impl ReadContext<'_> {
    pub fn endpoint(&self) -> &UsbEndpoint {
        self.endpoint
    }

    /// Engine read
    ///
    /// With `test_connection` unset a failed timed transfer reports 0 without
    /// probing the device.
    pub fn read(&self, buf: &mut [u8], timeout: Duration, test_connection: bool) -> Result<usize> {
        if timeout.is_zero() {
            let n = match self.connection.read_cancellable(self.endpoint, buf, self.cancel) {
                Ok(n) => n,
                Err(UsbError::Cancelled | UsbError::Closed) => {
                    return Err(Error::Io("Connection closed".to_string()));
                }
                Err(e) => {
                    return Err(Error::Io(format!("Waiting for USB request failed: {}", e)));
                }
            };
            if n == 0 {
                self.test_connection(true)?;
            }
            Ok(n)
        } else {
            let end = Instant::now() + timeout;
            let max = buf.len().min(MAX_READ_SIZE);
            match self.connection.bulk_in(self.endpoint, &mut buf[..max], timeout) {
                Ok(n) => Ok(n),
                Err(e) => {
                    trace!("Bulk read on {:#04x} failed: {}", self.endpoint.address, e);
                    if test_connection {
                        self.test_connection(Instant::now() < end)?;
                    }
                    Ok(0)
                }
            }
        }
    }

    /// GET_STATUS to tell "nothing to read" from "device gone"
    pub fn test_connection(&self, full: bool) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Io("Connection closed".to_string()));
        }
        if !full {
            return Ok(());
        }
        let mut buf = [0u8; 2];
        self.connection
            .control_in(0x80, 0, 0, 0, &mut buf, LIVENESS_TIMEOUT)
            .map_err(|e| Error::Io(format!("USB get_status request failed: {}", e)))?;
        Ok(())
    }
}

fn unsupported<T>(what: &str) -> Result<T> {
    Err(Error::Unsupported(what.to_string()))
}

/// Chipset-specific half of a port
pub(crate) trait ChipsetPort: Send + Sync {
    /// Type name used in log output and `Display`
    fn name(&self) -> &'static str;

    /// Claim interfaces, run the init sequence and resolve endpoints
    fn open_interfaces(&self, ctx: &PortContext<'_>) -> Result<PortEndpoints>;

    /// Undo `open_interfaces`; errors are logged and ignored by the caller
    fn close_interfaces(&self, ctx: &PortContext<'_>) -> Result<()>;

    fn read(&self, io: &ReadContext<'_>, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        io.read(buf, timeout, true)
    }

    fn set_parameters(&self, ctx: &PortContext<'_>, settings: &LineSettings) -> Result<()>;

    /// Lines this port can report or drive
    fn supported_control_lines(&self) -> ControlLines {
        ControlLines::EMPTY
    }

    /// Last value written to each output line
    fn output_lines(&self) -> ControlLines {
        ControlLines::EMPTY
    }

    /// Input lines currently asserted by the device
    fn input_lines(&self, _ctx: &PortContext<'_>) -> Result<ControlLines> {
        unsupported("Input control lines")
    }

    fn set_output_line(&self, _ctx: &PortContext<'_>, line: ControlLine, _value: bool) -> Result<()> {
        unsupported(&format!("Setting {}", line))
    }

    fn purge_hw_buffers(&self, _ctx: &PortContext<'_>, _write: bool, _read: bool) -> Result<()> {
        unsupported("Purging hardware buffers")
    }

    fn set_break(&self, _ctx: &PortContext<'_>, _value: bool) -> Result<()> {
        unsupported("Break")
    }

    fn latency_timer(&self, _ctx: &PortContext<'_>) -> Result<u8> {
        unsupported("Latency timer")
    }

    fn set_latency_timer(&self, _ctx: &PortContext<'_>, _millis: u8) -> Result<()> {
        unsupported("Latency timer")
    }
}

struct OpenPort {
    connection: Arc<dyn UsbConnection>,
    read_endpoint: UsbEndpoint,
    write_endpoint: UsbEndpoint,
    cancel: CancelToken,
}

/// One serial port of a [`SerialDriver`]
pub struct SerialPort {
    driver: Weak<SerialDriver>,
    device: Arc<UsbDevice>,
    port_number: i32,
    chip: Box<dyn ChipsetPort>,
    open: RwLock<Option<Arc<OpenPort>>>,
    write_buffer: Mutex<Option<Vec<u8>>>,
}

impl SerialPort {
    pub(crate) fn new(
        driver: Weak<SerialDriver>,
        device: Arc<UsbDevice>,
        port_number: i32,
        chip: Box<dyn ChipsetPort>,
    ) -> Arc<Self> {
        Arc::new(Self {
            driver,
            device,
            port_number,
            chip,
            open: RwLock::new(None),
            write_buffer: Mutex::new(None),
        })
    }

    /// Owning driver, `None` once the driver has been dropped
    pub fn driver(&self) -> Option<Arc<SerialDriver>> {
        self.driver.upgrade()
    }

    pub fn device(&self) -> &UsbDevice {
        &self.device
    }

    /// Index within the driver, -1 for a CDC-ACM port sharing one interface
    pub fn port_number(&self) -> i32 {
        self.port_number
    }

    pub fn is_open(&self) -> bool {
        self.open_slot().is_some()
    }

    pub fn read_endpoint(&self) -> Option<UsbEndpoint> {
        self.open_slot().as_ref().map(|o| o.read_endpoint.clone())
    }

    pub fn write_endpoint(&self) -> Option<UsbEndpoint> {
        self.open_slot().as_ref().map(|o| o.write_endpoint.clone())
    }

    /// Serial number string of the open device
    pub fn serial_number(&self) -> Option<String> {
        self.open_slot()
            .as_ref()
            .and_then(|o| o.connection.serial_number())
    }

    fn open_slot(&self) -> std::sync::RwLockReadGuard<'_, Option<Arc<OpenPort>>> {
        self.open.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_state(&self) -> Result<Arc<OpenPort>> {
        self.open_slot()
            .clone()
            .ok_or_else(|| Error::Io("Connection closed".to_string()))
    }

    fn lock_write_buffer(&self) -> MutexGuard<'_, Option<Vec<u8>>> {
        self.write_buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn with_context<T>(&self, f: impl FnOnce(&PortContext<'_>) -> Result<T>) -> Result<T> {
        let open = self.open_state()?;
        let ctx = PortContext {
            device: &self.device,
            connection: open.connection.as_ref(),
            port_number: self.port_number,
        };
        f(&ctx)
    }

    /// Bind the port to `connection` and initialize the chip
    ///
    /// On failure the connection is closed again and the port stays closed.
    pub fn open(&self, connection: Arc<dyn UsbConnection>) -> Result<()> {
        let mut slot = self.open.write().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(Error::Io("Already open".to_string()));
        }

        let ctx = PortContext {
            device: &self.device,
            connection: connection.as_ref(),
            port_number: self.port_number,
        };
        let endpoints = self
            .chip
            .open_interfaces(&ctx)
            .and_then(|endpoints| match (endpoints.read, endpoints.write) {
                (Some(read), Some(write)) => Ok((read, write)),
                _ => Err(Error::Io("Could not get read & write endpoints".to_string())),
            });

        match endpoints {
            Ok((read_endpoint, write_endpoint)) => {
                info!(
                    "Opened {} (read {:#04x}, write {:#04x})",
                    self, read_endpoint.address, write_endpoint.address
                );
                *slot = Some(Arc::new(OpenPort {
                    connection,
                    read_endpoint,
                    write_endpoint,
                    cancel: CancelToken::new(),
                }));
                Ok(())
            }
            Err(e) => {
                warn!("Failed to open {}: {}", self, e);
                if let Err(cleanup) = self.chip.close_interfaces(&ctx) {
                    debug!("Ignoring cleanup error: {}", cleanup);
                }
                connection.close();
                Err(e)
            }
        }
    }

    /// Cancel the pending read, release interfaces and close the connection
    pub fn close(&self) -> Result<()> {
        let open = self
            .open
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| Error::Io("Already closed".to_string()))?;

        open.cancel.cancel();
        let ctx = PortContext {
            device: &self.device,
            connection: open.connection.as_ref(),
            port_number: self.port_number,
        };
        if let Err(e) = self.chip.close_interfaces(&ctx) {
            debug!("Ignoring error while closing {}: {}", self, e);
        }
        open.connection.close();
        info!("Closed {}", self);
        Ok(())
    }

    /// Read into `buf`, returning the number of bytes received
    ///
    /// A zero `timeout` blocks until data arrives or the port is closed from
    /// another thread. A timed read returns 0 when nothing arrived in time.
    pub fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if buf.is_empty() {
            return Err(Error::InvalidArgument("Read buffer too small".to_string()));
        }
        let open = self.open_state()?;
        let io = ReadContext {
            connection: open.connection.as_ref(),
            endpoint: &open.read_endpoint,
            cancel: &open.cancel,
        };
        self.chip.read(&io, buf, timeout)
    }

    /// Write all of `src`
    pub fn write(&self, src: &[u8], timeout: Duration) -> Result<()> {
        self.write_range(src, 0, src.len(), timeout)
    }

    /// Write `src[offset..length]` in chunks of the write buffer size
    ///
    /// A `length` past the end of `src` is clamped to `src.len()`.
    /// `timeout` bounds the whole call. When it expires the error is
    /// [`Error::Timeout`] carrying the offset reached so far.
    pub fn write_range(
        &self,
        src: &[u8],
        mut offset: usize,
        length: usize,
        timeout: Duration,
    ) -> Result<()> {
        let length = length.min(src.len());
        if offset >= length {
            return Err(Error::InvalidArgument("Write length too small".to_string()));
        }
        let open = self.open_state()?;
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);

        while offset < length {
            let (request_length, result) = {
                let mut guard = self.lock_write_buffer();
                let buffer = guard.get_or_insert_with(|| {
                    vec![0; open.write_endpoint.max_packet_size.max(1) as usize]
                });
                let request_length = (length - offset).min(buffer.len());

                // the first chunk gets the full timeout, later ones what is left
                let request_timeout = match deadline {
                    Some(end) if offset > 0 => end
                        .checked_duration_since(Instant::now())
                        .filter(|remaining| !remaining.is_zero()),
                    _ => Some(timeout),
                };

                let result = request_timeout.map(|t| {
                    let data: &[u8] = if offset == 0 {
                        &src[..request_length]
                    } else {
                        buffer[..request_length].copy_from_slice(&src[offset..offset + request_length]);
                        &buffer[..request_length]
                    };
                    open.connection.bulk_out(&open.write_endpoint, data, t)
                });
                (request_length, result)
            };

            let actual = match result {
                Some(Ok(n)) if n > 0 => n,
                other => {
                    if deadline.is_some_and(|end| Instant::now() >= end) {
                        return Err(Error::Timeout {
                            message: format!(
                                "Error writing {} bytes at offset {} of total {}",
                                request_length, offset, length
                            ),
                            bytes_transferred: offset,
                        });
                    }
                    let cause = match other {
                        Some(Err(e)) => format!(": {}", e),
                        _ => String::new(),
                    };
                    return Err(Error::Io(format!(
                        "Error writing {} bytes at offset {} of total {}{}",
                        request_length, offset, length, cause
                    )));
                }
            };
            trace!(
                "Wrote {}/{} offset {}/{}",
                actual, request_length, offset, length
            );
            offset += actual;
        }
        Ok(())
    }

    /// Resize the write chunk buffer; 0 selects the write endpoint packet size
    pub fn set_write_buffer_size(&self, size: usize) {
        let mut guard = self.lock_write_buffer();
        let size = if size == 0 {
            match self.write_endpoint() {
                Some(ep) => ep.max_packet_size as usize,
                None => {
                    *guard = None;
                    return;
                }
            }
        } else {
            size
        };
        if guard.as_ref().is_some_and(|buffer| buffer.len() == size) {
            return;
        }
        *guard = Some(vec![0; size]);
    }

    /// Current write chunk size, if a buffer has been allocated
    pub fn write_buffer_size(&self) -> Option<usize> {
        self.lock_write_buffer().as_ref().map(Vec::len)
    }

    /// Program baud rate and framing
    pub fn set_parameters(&self, settings: &LineSettings) -> Result<()> {
        settings.validate()?;
        self.with_context(|ctx| self.chip.set_parameters(ctx, settings))?;
        debug!("{}: line settings {}", self, settings);
        Ok(())
    }

    pub fn supported_control_lines(&self) -> ControlLines {
        self.chip.supported_control_lines()
    }

    fn require_line(&self, line: ControlLine) -> Result<()> {
        if self.supported_control_lines().contains(line) {
            Ok(())
        } else {
            Err(Error::Unsupported(format!("{} not supported by {}", line, self.chip.name())))
        }
    }

    /// All supported lines that are currently asserted
    pub fn control_lines(&self) -> Result<ControlLines> {
        let supported = self.supported_control_lines();
        if supported.is_empty() {
            return Err(Error::Unsupported(format!(
                "Control lines not supported by {}",
                self.chip.name()
            )));
        }
        self.with_context(|ctx| {
            let mut lines = self.chip.output_lines();
            if !supported.is_subset(&ControlLines::OUTPUTS) {
                lines = lines.union(self.chip.input_lines(ctx)?);
            }
            Ok(lines.intersection(supported))
        })
    }

    /// State of one line
    pub fn line(&self, line: ControlLine) -> Result<bool> {
        self.require_line(line)?;
        if line.is_output() {
            return Ok(self.chip.output_lines().contains(line));
        }
        self.with_context(|ctx| Ok(self.chip.input_lines(ctx)?.contains(line)))
    }

    /// Drive an output line (DTR or RTS)
    pub fn set_line(&self, line: ControlLine, value: bool) -> Result<()> {
        if !line.is_output() {
            return Err(Error::InvalidArgument(format!("{} is an input line", line)));
        }
        self.require_line(line)?;
        self.with_context(|ctx| self.chip.set_output_line(ctx, line, value))
    }

    pub fn cd(&self) -> Result<bool> {
        self.line(ControlLine::Cd)
    }

    pub fn cts(&self) -> Result<bool> {
        self.line(ControlLine::Cts)
    }

    pub fn dsr(&self) -> Result<bool> {
        self.line(ControlLine::Dsr)
    }

    pub fn dtr(&self) -> Result<bool> {
        self.line(ControlLine::Dtr)
    }

    pub fn ri(&self) -> Result<bool> {
        self.line(ControlLine::Ri)
    }

    pub fn rts(&self) -> Result<bool> {
        self.line(ControlLine::Rts)
    }

    pub fn set_dtr(&self, value: bool) -> Result<()> {
        self.set_line(ControlLine::Dtr, value)
    }

    pub fn set_rts(&self, value: bool) -> Result<()> {
        self.set_line(ControlLine::Rts, value)
    }

    /// Discard data buffered in the chip
    pub fn purge_hw_buffers(&self, write: bool, read: bool) -> Result<()> {
        self.with_context(|ctx| self.chip.purge_hw_buffers(ctx, write, read))
    }

    pub fn set_break(&self, value: bool) -> Result<()> {
        self.with_context(|ctx| self.chip.set_break(ctx, value))
    }

    /// Chip latency timer in milliseconds (FTDI only)
    pub fn latency_timer(&self) -> Result<u8> {
        self.with_context(|ctx| self.chip.latency_timer(ctx))
    }

    pub fn set_latency_timer(&self, millis: u8) -> Result<()> {
        self.with_context(|ctx| self.chip.set_latency_timer(ctx, millis))
    }
}

impl fmt::Display for SerialPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{} device={:03}/{:03} port_number={}>",
            self.chip.name(),
            self.device.bus_number,
            self.device.address,
            self.port_number
        )
    }
}

impl fmt::Debug for SerialPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialPort")
            .field("chip", &self.chip.name())
            .field("device", &self.device.id())
            .field("port_number", &self.port_number)
            .field("open", &self.is_open())
            .finish()
    }
}
