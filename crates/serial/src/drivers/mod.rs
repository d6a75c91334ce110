//! Chipset drivers
//!
//! Each module exposes a [`DriverFactory`](crate::DriverFactory) and keeps its
//! [`ChipsetPort`](crate::port::ChipsetPort) implementation private.

pub mod cdc_acm;
pub mod ch34x;
pub mod chrome_ccd;
pub mod cp21xx;
pub mod ftdi;
pub mod gsm_modem;

pub use cdc_acm::CdcAcmFactory;
pub use ch34x::Ch34xFactory;
pub use chrome_ccd::ChromeCcdFactory;
pub use cp21xx::Cp21xxFactory;
pub use ftdi::FtdiFactory;
pub use gsm_modem::GsmModemFactory;

use crate::driver::{DriverFactory, DriverKind};
use std::sync::Arc;

/// Factory for `kind`
pub fn factory_for(kind: DriverKind) -> Arc<dyn DriverFactory> {
    match kind {
        DriverKind::CdcAcm => Arc::new(CdcAcmFactory),
        DriverKind::Ch34x => Arc::new(Ch34xFactory),
        DriverKind::ChromeCcd => Arc::new(ChromeCcdFactory),
        DriverKind::Cp21xx => Arc::new(Cp21xxFactory),
        DriverKind::Ftdi => Arc::new(FtdiFactory),
        DriverKind::GsmModem => Arc::new(GsmModemFactory),
    }
}
