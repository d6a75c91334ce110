//! USB serial drivers
//!
//! Probes USB devices for known serial bridge chipsets and drives them:
//!
//! - [`ProbeTable`] and [`UsbSerialProber`] pick a [`DriverFactory`] per device
//! - [`SerialDriver`] owns the [`SerialPort`]s of one device
//! - [`SerialPort`] opens on a [`common::UsbConnection`] and does the I/O
//! - [`SerialInputManager`] reads a port on a background thread
//! - [`usb::RusbHost`] enumerates real devices through libusb
//!
//! # Example
//!
//! ```no_run
//! use common::UsbHost;
//! use protocol::LineSettings;
//! use serial::{UsbSerialProber, usb::RusbHost};
//! use std::time::Duration;
//!
//! let host = RusbHost::new()?;
//! let drivers = UsbSerialProber::default_prober().find_all_drivers(&host)?;
//! if let Some(port) = drivers.first().and_then(|d| d.port(0)) {
//!     port.open(host.open(port.device())?)?;
//!     port.set_parameters(&LineSettings::default())?;
//!     port.write(b"AT\r", Duration::from_secs(1))?;
//!     port.close()?;
//! }
//! # Ok::<(), common::Error>(())
//! ```

pub mod driver;
pub mod drivers;
pub mod port;
pub mod probe;
pub mod prober;
pub mod reader;
pub mod usb;

pub use driver::{DriverFactory, DriverKind, SerialDriver};
pub use port::{MAX_READ_SIZE, SerialPort};
pub use probe::ProbeTable;
pub use prober::UsbSerialProber;
pub use reader::{ReaderState, SerialInputManager};
