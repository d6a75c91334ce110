//! FTDI vendor requests
//!
//! Covers the FT232R/FT232H/FT2232H/FT4232H/FT-X family. All requests are
//! vendor requests addressed to the device; the port is selected through the
//! low byte of `wIndex` (port number + 1).

use crate::error::{ProtocolError, Result};
use crate::types::{ControlLine, ControlLines, DataBits, LineSettings, Parity, StopBits};

/// bmRequestType: vendor request, host to device
pub const REQTYPE_HOST_TO_DEVICE: u8 = 0x40;
/// bmRequestType: vendor request, device to host
pub const REQTYPE_DEVICE_TO_HOST: u8 = 0xc0;

pub const RESET_REQUEST: u8 = 0;
pub const MODEM_CONTROL_REQUEST: u8 = 1;
pub const SET_BAUD_RATE_REQUEST: u8 = 3;
pub const SET_DATA_REQUEST: u8 = 4;
pub const GET_MODEM_STATUS_REQUEST: u8 = 5;
pub const SET_LATENCY_TIMER_REQUEST: u8 = 9;
pub const GET_LATENCY_TIMER_REQUEST: u8 = 10;

pub const MODEM_CONTROL_DTR_ENABLE: u16 = 0x0101;
pub const MODEM_CONTROL_DTR_DISABLE: u16 = 0x0100;
pub const MODEM_CONTROL_RTS_ENABLE: u16 = 0x0202;
pub const MODEM_CONTROL_RTS_DISABLE: u16 = 0x0200;

const MODEM_STATUS_CTS: u8 = 0x10;
const MODEM_STATUS_DSR: u8 = 0x20;
const MODEM_STATUS_RI: u8 = 0x40;
const MODEM_STATUS_CD: u8 = 0x80;

pub const RESET_ALL: u16 = 0;
pub const RESET_PURGE_RX: u16 = 1;
pub const RESET_PURGE_TX: u16 = 2;

/// Every bulk-in packet starts with two modem status bytes
pub const READ_HEADER_LENGTH: usize = 2;

/// SET_DATA bit that holds the line in BREAK
pub const BREAK_BIT: u16 = 0x4000;

/// Device types (bcdDevice high byte) of the "H" chips
pub const H_DEVICE_TYPES: [u8; 3] = [7, 8, 9];

const MAX_BAUD_RATE: u32 = 3_500_000;
const BASE_CLOCK_X2: u32 = 24_000_000 << 1;
const MAX_DIVISOR: u32 = 0x3fff;
const MAX_BAUD_RATE_ERROR: f64 = 0.03;

/// Encoded baud rate divisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaudDivisor {
    /// wValue of SET_BAUD_RATE
    pub value: u16,
    /// Divisor bits carried in wIndex (before the port number is folded in)
    pub index: u16,
    /// Rate the chip will actually run at
    pub effective_baud_rate: u32,
}

impl BaudDivisor {
    /// wIndex including the port selector, for chips that need it
    pub fn index_with_port(&self, port_number: u16) -> u16 {
        (self.index << 8) | (port_number + 1)
    }
}

/// Compute the divisor for `baud_rate`
///
/// Fails with `Unsupported` above 3.5 MBd, below 184 Bd, or when the closest
/// achievable rate deviates by 3 % or more.
pub fn baud_divisor(baud_rate: u32) -> Result<BaudDivisor> {
    if baud_rate == 0 {
        return Err(ProtocolError::InvalidArgument(
            "Invalid baud rate: 0".to_string(),
        ));
    }

    let (divisor, subdivisor, effective) = if baud_rate > MAX_BAUD_RATE {
        return Err(ProtocolError::Unsupported("Baud rate too high".to_string()));
    } else if baud_rate >= 2_500_000 {
        (0, 0, 3_000_000)
    } else if baud_rate >= 1_750_000 {
        (1, 0, 2_000_000)
    } else {
        let rounded = ((BASE_CLOCK_X2 / baud_rate) + 1) >> 1;
        let subdivisor = rounded & 0x07;
        let divisor = rounded >> 3;
        // 14 divisor bits, exceeded at 183 baud and below
        if divisor > MAX_DIVISOR {
            return Err(ProtocolError::Unsupported("Baud rate too low".to_string()));
        }
        let effective = ((BASE_CLOCK_X2 / ((divisor << 3) + subdivisor)) + 1) >> 1;
        (divisor, subdivisor, effective)
    };

    let error = (1.0 - (effective as f64 / baud_rate as f64)).abs();
    if error >= MAX_BAUD_RATE_ERROR {
        return Err(ProtocolError::Unsupported(format!(
            "Baud rate deviation {:.1}% is higher than allowed 3%",
            error * 100.0
        )));
    }

    // sub-integer divisor bits are split over wValue bits 14,15 and wIndex bit 0
    let (sub_value, index) = match subdivisor {
        0 => (0x0000, 0), // 0
        4 => (0x4000, 0), // 0.5
        2 => (0x8000, 0), // 0.25
        1 => (0xc000, 0), // 0.125
        3 => (0x0000, 1), // 0.375
        5 => (0x4000, 1), // 0.625
        6 => (0x8000, 1), // 0.75
        _ => (0xc000, 1), // 0.875
    };
    let value = divisor as u16 | sub_value;

    Ok(BaudDivisor {
        value,
        index,
        effective_baud_rate: effective,
    })
}

/// wValue of SET_DATA for the given framing
pub fn data_config(settings: &LineSettings) -> Result<u16> {
    let mut config: u16 = match settings.data_bits {
        DataBits::Five | DataBits::Six => {
            return Err(ProtocolError::Unsupported(format!(
                "Unsupported data bits: {}",
                settings.data_bits.bits()
            )));
        }
        DataBits::Seven | DataBits::Eight => settings.data_bits.bits() as u16,
    };

    config |= match settings.parity {
        Parity::None => 0x000,
        Parity::Odd => 0x100,
        Parity::Even => 0x200,
        Parity::Mark => 0x300,
        Parity::Space => 0x400,
    };

    config |= match settings.stop_bits {
        StopBits::One => 0x0000,
        StopBits::OnePointFive => {
            return Err(ProtocolError::Unsupported(
                "Unsupported stop bits: 1.5".to_string(),
            ));
        }
        StopBits::Two => 0x1000,
    };

    Ok(config)
}

/// wValue of SET_DATA with the BREAK bit applied to the last data config
pub fn break_config(last_config: u16, asserted: bool) -> u16 {
    if asserted {
        last_config | BREAK_BIT
    } else {
        last_config
    }
}

/// wValue of MODEM_CONTROL setting both lines at once
pub fn modem_control_value(dtr: bool, rts: bool) -> u16 {
    (if dtr {
        MODEM_CONTROL_DTR_ENABLE
    } else {
        MODEM_CONTROL_DTR_DISABLE
    }) | (if rts {
        MODEM_CONTROL_RTS_ENABLE
    } else {
        MODEM_CONTROL_RTS_DISABLE
    })
}

/// Input lines reported in the first GET_MODEM_STATUS byte
pub fn decode_modem_status(status: u8) -> ControlLines {
    let mut lines = ControlLines::EMPTY;
    lines.set(ControlLine::Cts, status & MODEM_STATUS_CTS != 0);
    lines.set(ControlLine::Dsr, status & MODEM_STATUS_DSR != 0);
    lines.set(ControlLine::Ri, status & MODEM_STATUS_RI != 0);
    lines.set(ControlLine::Cd, status & MODEM_STATUS_CD != 0);
    lines
}

/// Whether the chip needs the port number folded into SET_BAUD_RATE's wIndex
pub fn baud_rate_with_port(device_type: u8, interface_count: usize) -> bool {
    H_DEVICE_TYPES.contains(&device_type) || interface_count > 1
}

/// Remove the status header from every packet of a bulk-in transfer
///
/// `buffer[..total]` holds the transfer; the payload is compacted to the
/// front of `buffer` in original order and its length returned.
pub fn strip_status_headers(buffer: &mut [u8], total: usize, packet_size: usize) -> Result<usize> {
    if packet_size <= READ_HEADER_LENGTH {
        return Err(ProtocolError::Malformed(format!(
            "Invalid max packet size: {}",
            packet_size
        )));
    }
    if total > buffer.len() {
        return Err(ProtocolError::BufferTooSmall {
            needed: total,
            available: buffer.len(),
        });
    }
    let mut dest = 0;
    let mut src = 0;
    while src < total {
        let end = (src + packet_size).min(total);
        if end < src + READ_HEADER_LENGTH {
            return Err(ProtocolError::Malformed(format!(
                "Expected at least {} bytes",
                READ_HEADER_LENGTH
            )));
        }
        let payload = src + READ_HEADER_LENGTH..end;
        let len = payload.len();
        buffer.copy_within(payload, dest);
        dest += len;
        src += packet_size;
    }
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(data_bits: DataBits, stop_bits: StopBits, parity: Parity) -> LineSettings {
        LineSettings::new(9600, data_bits, stop_bits, parity).unwrap()
    }

    #[test]
    fn test_common_baud_rates() {
        let div = baud_divisor(9600).unwrap();
        assert_eq!(div.value, 0x4138);
        assert_eq!(div.index, 0);
        assert_eq!(div.effective_baud_rate, 9600);

        let div = baud_divisor(115200).unwrap();
        assert_eq!(div.value, 0x001a);
        assert_eq!(div.index, 0);
        assert_eq!(div.effective_baud_rate, 115385);
    }

    #[test]
    fn test_special_high_rates() {
        let div = baud_divisor(3_000_000).unwrap();
        assert_eq!((div.value, div.index), (0, 0));
        assert_eq!(div.effective_baud_rate, 3_000_000);

        let div = baud_divisor(2_000_000).unwrap();
        assert_eq!((div.value, div.index), (1, 0));
        assert_eq!(div.effective_baud_rate, 2_000_000);

        assert!(matches!(
            baud_divisor(3_500_001),
            Err(ProtocolError::Unsupported(_))
        ));
        // 1.75 MBd maps to 2 MBd which is 14% off
        assert!(matches!(
            baud_divisor(1_750_000),
            Err(ProtocolError::Unsupported(_))
        ));
    }

    #[test]
    fn test_too_low_rate() {
        assert!(baud_divisor(184).is_ok());
        assert!(matches!(
            baud_divisor(183),
            Err(ProtocolError::Unsupported(_))
        ));
    }

    #[test]
    fn test_index_with_port() {
        let div = BaudDivisor {
            value: 0,
            index: 1,
            effective_baud_rate: 0,
        };
        assert_eq!(div.index_with_port(0), 0x0101);
        assert_eq!(div.index_with_port(2), 0x0103);
    }

    #[test]
    fn test_data_config() {
        assert_eq!(
            data_config(&settings(DataBits::Eight, StopBits::One, Parity::None)).unwrap(),
            0x0008
        );
        assert_eq!(
            data_config(&settings(DataBits::Seven, StopBits::Two, Parity::Space)).unwrap(),
            0x1407
        );
        assert!(matches!(
            data_config(&settings(DataBits::Six, StopBits::One, Parity::None)),
            Err(ProtocolError::Unsupported(_))
        ));
        assert!(matches!(
            data_config(&settings(DataBits::Eight, StopBits::OnePointFive, Parity::None)),
            Err(ProtocolError::Unsupported(_))
        ));
    }

    #[test]
    fn test_break_config() {
        assert_eq!(break_config(0x0208, true), 0x4208);
        assert_eq!(break_config(0x0208, false), 0x0208);
    }

    #[test]
    fn test_modem_status_decode() {
        let lines = decode_modem_status(0x10 | 0x80);
        assert!(lines.contains(ControlLine::Cts));
        assert!(lines.contains(ControlLine::Cd));
        assert!(!lines.contains(ControlLine::Dsr));
        assert!(!lines.contains(ControlLine::Ri));
        assert!(decode_modem_status(0x01).is_empty());
    }

    #[test]
    fn test_modem_control_value() {
        assert_eq!(modem_control_value(true, true), 0x0303);
        assert_eq!(modem_control_value(false, false), 0x0300);
        assert_eq!(modem_control_value(true, false), 0x0301);
    }

    #[test]
    fn test_strip_status_headers() {
        let mut buf = vec![0x01, 0x60, b'a', b'b', 0x01, 0x60, b'c', 0x00];
        let len = strip_status_headers(&mut buf, 7, 4).unwrap();
        assert_eq!(len, 3);
        assert_eq!(&buf[..len], b"abc");
    }

    #[test]
    fn test_strip_status_headers_short_packet() {
        let mut buf = vec![0x01, 0x60, b'a', b'b', 0x01];
        assert!(matches!(
            strip_status_headers(&mut buf, 5, 4),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_h_device_detection() {
        assert!(baud_rate_with_port(8, 1));
        assert!(baud_rate_with_port(6, 2));
        assert!(!baud_rate_with_port(6, 1));
    }
}
