//! Wire encodings for USB serial bridge chipsets
//!
//! This crate holds everything about the adapters that can be computed
//! without touching a device: line parameter types, USB ids, descriptor
//! parsing and the request values each chipset expects. The `serial` crate
//! turns these into control and bulk transfers.
//!
//! # Example
//!
//! ```
//! use protocol::{DataBits, LineSettings, Parity, StopBits, ftdi};
//!
//! let settings = LineSettings::new(115200, DataBits::Eight, StopBits::One, Parity::None).unwrap();
//! let divisor = ftdi::baud_divisor(settings.baud_rate).unwrap();
//! assert_eq!(divisor.effective_baud_rate, 115385);
//! assert_eq!(ftdi::data_config(&settings).unwrap(), 0x0008);
//! ```

pub mod cdc;
pub mod ch34x;
pub mod cp210x;
pub mod descriptors;
pub mod error;
pub mod ftdi;
pub mod hexdump;
pub mod ids;
pub mod types;

pub use error::{ProtocolError, Result};
pub use ids::UsbId;
pub use types::{ControlLine, ControlLines, DataBits, LineSettings, Parity, StopBits};
