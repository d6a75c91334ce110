//! USB CDC-ACM class requests (CDC 1.1, section 6.2)

use crate::types::{LineSettings, StopBits};
use byteorder::{ByteOrder, LittleEndian};

/// bmRequestType: class request, interface recipient, host to device
pub const REQUEST_TYPE: u8 = 0x21;

pub const SET_LINE_CODING: u8 = 0x20;
pub const GET_LINE_CODING: u8 = 0x21;
pub const SET_CONTROL_LINE_STATE: u8 = 0x22;
pub const SEND_BREAK: u8 = 0x23;

/// Size of the line coding structure
pub const LINE_CODING_LEN: usize = 7;

const CONTROL_LINE_DTR: u16 = 0x01;
const CONTROL_LINE_RTS: u16 = 0x02;

/// Encode the 7-byte line coding payload for SET_LINE_CODING
///
/// Layout: dwDTERate (LE u32), bCharFormat (0 = 1, 1 = 1.5, 2 = 2 stop bits),
/// bParityType (0..=4), bDataBits.
pub fn encode_line_coding(settings: &LineSettings) -> [u8; LINE_CODING_LEN] {
    let mut msg = [0u8; LINE_CODING_LEN];
    LittleEndian::write_u32(&mut msg[0..4], settings.baud_rate);
    msg[4] = match settings.stop_bits {
        StopBits::One => 0,
        StopBits::OnePointFive => 1,
        StopBits::Two => 2,
    };
    msg[5] = settings.parity.code();
    msg[6] = settings.data_bits.bits();
    msg
}

/// wValue for SET_CONTROL_LINE_STATE
pub fn control_line_state(dtr: bool, rts: bool) -> u16 {
    let mut value = 0;
    if dtr {
        value |= CONTROL_LINE_DTR;
    }
    if rts {
        value |= CONTROL_LINE_RTS;
    }
    value
}

/// wValue for SEND_BREAK (0xffff = until cleared, 0 = clear)
pub fn break_value(asserted: bool) -> u16 {
    if asserted { 0xffff } else { 0 }
}
