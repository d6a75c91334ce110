//! Silicon Labs CP210x vendor requests (AN571)

use crate::error::{ProtocolError, Result};
use crate::types::{ControlLine, ControlLines, DataBits, LineSettings, Parity, StopBits};
use byteorder::{ByteOrder, LittleEndian};

/// bmRequestType: vendor request, interface recipient, host to device
pub const REQTYPE_HOST_TO_DEVICE: u8 = 0x41;
/// bmRequestType: vendor request, interface recipient, device to host
pub const REQTYPE_DEVICE_TO_HOST: u8 = 0xc1;

pub const IFC_ENABLE_REQUEST: u8 = 0x00;
pub const SET_LINE_CTL_REQUEST: u8 = 0x03;
pub const SET_BREAK_REQUEST: u8 = 0x05;
pub const SET_MHS_REQUEST: u8 = 0x07;
pub const GET_MDMSTS_REQUEST: u8 = 0x08;
pub const FLUSH_REQUEST: u8 = 0x12;
pub const SET_BAUDRATE_REQUEST: u8 = 0x1e;

pub const UART_ENABLE: u16 = 0x0001;
pub const UART_DISABLE: u16 = 0x0000;

pub const FLUSH_READ: u16 = 0x0a;
pub const FLUSH_WRITE: u16 = 0x05;

pub const DTR_ENABLE: u16 = 0x101;
pub const DTR_DISABLE: u16 = 0x100;
pub const RTS_ENABLE: u16 = 0x202;
pub const RTS_DISABLE: u16 = 0x200;

const STATUS_CTS: u8 = 0x10;
const STATUS_DSR: u8 = 0x20;
const STATUS_RI: u8 = 0x40;
const STATUS_CD: u8 = 0x80;

/// Whether `port_number` is the feature-limited second port of a CP2105
pub fn is_restricted_port(interface_count: usize, port_number: usize) -> bool {
    interface_count == 2 && port_number == 1
}

/// Payload of SET_BAUDRATE
pub fn baud_rate_payload(baud_rate: u32) -> [u8; 4] {
    let mut data = [0u8; 4];
    LittleEndian::write_u32(&mut data, baud_rate);
    data
}

/// wValue of SET_LINE_CTL
///
/// The restricted port only supports 8 data bits, no mark/space parity and a
/// single stop bit.
pub fn line_control(settings: &LineSettings, restricted: bool) -> Result<u16> {
    if restricted && settings.data_bits != DataBits::Eight {
        return Err(ProtocolError::Unsupported(format!(
            "Unsupported data bits: {}",
            settings.data_bits.bits()
        )));
    }
    let mut config = (settings.data_bits.bits() as u16) << 8;

    config |= match settings.parity {
        Parity::None => 0x0000,
        Parity::Odd => 0x0010,
        Parity::Even => 0x0020,
        Parity::Mark | Parity::Space if restricted => {
            return Err(ProtocolError::Unsupported(format!(
                "Unsupported parity: {:?}",
                settings.parity
            )));
        }
        Parity::Mark => 0x0030,
        Parity::Space => 0x0040,
    };

    config |= match settings.stop_bits {
        StopBits::One => 0,
        StopBits::OnePointFive => {
            return Err(ProtocolError::Unsupported(
                "Unsupported stop bits: 1.5".to_string(),
            ));
        }
        StopBits::Two if restricted => {
            return Err(ProtocolError::Unsupported(
                "Unsupported stop bits: 2".to_string(),
            ));
        }
        StopBits::Two => 2,
    };

    Ok(config)
}

/// wValue of FLUSH, `None` when nothing is to be purged
pub fn flush_value(write: bool, read: bool) -> Option<u16> {
    let value = (if read { FLUSH_READ } else { 0 }) | (if write { FLUSH_WRITE } else { 0 });
    (value != 0).then_some(value)
}

/// Input lines reported by GET_MDMSTS
pub fn decode_modem_status(status: u8) -> ControlLines {
    let mut lines = ControlLines::EMPTY;
    lines.set(ControlLine::Cts, status & STATUS_CTS != 0);
    lines.set(ControlLine::Dsr, status & STATUS_DSR != 0);
    lines.set(ControlLine::Ri, status & STATUS_RI != 0);
    lines.set(ControlLine::Cd, status & STATUS_CD != 0);
    lines
}
