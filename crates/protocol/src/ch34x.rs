//! WCH CH340/CH341 vendor requests
//!
//! The chip has no public datasheet for its register interface; the values
//! below are the ones the vendor driver uses. Register writes go through
//! `WRITE_REGISTER` with two register addresses packed into `wValue`.

use crate::error::{ProtocolError, Result};
use crate::types::{ControlLine, ControlLines, DataBits, LineSettings, Parity, StopBits};

/// bmRequestType: vendor request, device recipient, host to device
pub const REQTYPE_HOST_TO_DEVICE: u8 = 0x40;
/// bmRequestType: vendor request, device recipient, device to host
pub const REQTYPE_DEVICE_TO_HOST: u8 = 0xc0;

pub const READ_VERSION_REQUEST: u8 = 0x5f;
pub const READ_REGISTER_REQUEST: u8 = 0x95;
pub const WRITE_REGISTER_REQUEST: u8 = 0x9a;
pub const SERIAL_INIT_REQUEST: u8 = 0xa1;
pub const MODEM_CONTROL_REQUEST: u8 = 0xa4;

/// LCR register pair (0x25 / 0x18)
pub const LCR_REGISTER: u16 = 0x2518;
/// Modem status register pair (0x07 / 0x06)
pub const STATUS_REGISTER: u16 = 0x0706;
/// Break register pair (0x18 / 0x05)
pub const BREAK_REGISTER: u16 = 0x1805;
/// Baud prescaler / divisor register pair
pub const BAUD_REGISTER_1: u16 = 0x1312;
/// Baud factor low byte register pair
pub const BAUD_REGISTER_2: u16 = 0x0f2c;

pub const LCR_ENABLE_RX: u16 = 0x80;
pub const LCR_ENABLE_TX: u16 = 0x40;
pub const LCR_MARK_SPACE: u16 = 0x20;
pub const LCR_PAR_EVEN: u16 = 0x10;
pub const LCR_ENABLE_PAR: u16 = 0x08;
pub const LCR_STOP_BITS_2: u16 = 0x04;
pub const LCR_CS8: u16 = 0x03;
pub const LCR_CS7: u16 = 0x02;
pub const LCR_CS6: u16 = 0x01;
pub const LCR_CS5: u16 = 0x00;

// modem status bits are active low
const GCL_CTS: u8 = 0x01;
const GCL_DSR: u8 = 0x02;
const GCL_RI: u8 = 0x04;
const GCL_CD: u8 = 0x08;

const SCL_DTR: u16 = 0x20;
const SCL_RTS: u16 = 0x40;

/// Rate the chip is programmed with on open
pub const DEFAULT_BAUD_RATE: u32 = 9600;

const BAUDBASE_FACTOR: u32 = 1_532_620_800;
const BAUDBASE_DIVMAX: u32 = 3;

/// One step of the power-on initialization sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStep {
    /// Vendor IN request whose reply must match `expected` (`None` = any byte)
    Check {
        label: &'static str,
        request: u8,
        value: u16,
        expected: &'static [Option<u8>],
    },
    /// Vendor OUT request without payload
    Out {
        label: &'static str,
        request: u8,
        value: u16,
        index: u16,
    },
    /// Program [`DEFAULT_BAUD_RATE`]
    DefaultBaudRate,
    /// Push the current DTR/RTS state
    ControlLines,
}

/// Initialization sequence run on every open
pub const INIT_SEQUENCE: [InitStep; 10] = [
    InitStep::Check {
        label: "init #1",
        request: READ_VERSION_REQUEST,
        value: 0,
        expected: &[None, Some(0x00)],
    },
    InitStep::Out {
        label: "init #2",
        request: SERIAL_INIT_REQUEST,
        value: 0,
        index: 0,
    },
    InitStep::DefaultBaudRate,
    InitStep::Check {
        label: "init #4",
        request: READ_REGISTER_REQUEST,
        value: LCR_REGISTER,
        expected: &[None, Some(0x00)],
    },
    InitStep::Out {
        label: "init #5",
        request: WRITE_REGISTER_REQUEST,
        value: LCR_REGISTER,
        index: LCR_ENABLE_RX | LCR_ENABLE_TX | LCR_CS8,
    },
    InitStep::Check {
        label: "init #6",
        request: READ_REGISTER_REQUEST,
        value: STATUS_REGISTER,
        expected: &[None, None],
    },
    InitStep::Out {
        label: "init #7",
        request: SERIAL_INIT_REQUEST,
        value: 0x501f,
        index: 0xd90a,
    },
    InitStep::DefaultBaudRate,
    InitStep::ControlLines,
    InitStep::Check {
        label: "init #10",
        request: READ_REGISTER_REQUEST,
        value: STATUS_REGISTER,
        expected: &[None, None],
    },
];

/// Validate a check-state reply of `len` bytes against the expected pattern
pub fn check_state(label: &str, expected: &[Option<u8>], reply: &[u8], len: usize) -> Result<()> {
    if len != expected.len() {
        return Err(ProtocolError::Malformed(format!(
            "Expected {} bytes, but get {} [{}]",
            expected.len(),
            len,
            label
        )));
    }
    for (want, got) in expected.iter().zip(reply) {
        if let Some(want) = want
            && want != got
        {
            return Err(ProtocolError::Malformed(format!(
                "Expected 0x{:02X} byte, but get 0x{:02X} [{}]",
                want, got, label
            )));
        }
    }
    Ok(())
}

/// Index values written to [`BAUD_REGISTER_1`] and [`BAUD_REGISTER_2`]
pub fn baud_rate_values(baud_rate: u32) -> Result<(u16, u16)> {
    if baud_rate == 0 {
        return Err(ProtocolError::InvalidArgument(
            "Invalid baud rate: 0".to_string(),
        ));
    }

    let (factor, divisor) = if baud_rate == 921_600 {
        (0xf300u32, 7u32)
    } else {
        let mut factor = BAUDBASE_FACTOR / baud_rate;
        let mut divisor = BAUDBASE_DIVMAX;
        while factor > 0xfff0 && divisor > 0 {
            factor >>= 3;
            divisor -= 1;
        }
        if factor > 0xfff0 {
            return Err(ProtocolError::Unsupported(format!(
                "Unsupported baud rate: {}",
                baud_rate
            )));
        }
        (0x10000 - factor, divisor)
    };

    // without bit 7 the CH341A holds data until its buffer is full
    let divisor = divisor | 0x0080;
    let value1 = ((factor & 0xff00) | divisor) as u16;
    let value2 = (factor & 0xff) as u16;
    Ok((value1, value2))
}

/// LCR value for the given framing
pub fn line_control(settings: &LineSettings) -> Result<u16> {
    let mut lcr = LCR_ENABLE_RX | LCR_ENABLE_TX;

    lcr |= match settings.data_bits {
        DataBits::Five => LCR_CS5,
        DataBits::Six => LCR_CS6,
        DataBits::Seven => LCR_CS7,
        DataBits::Eight => LCR_CS8,
    };

    lcr |= match settings.parity {
        Parity::None => 0,
        Parity::Odd => LCR_ENABLE_PAR,
        Parity::Even => LCR_ENABLE_PAR | LCR_PAR_EVEN,
        Parity::Mark => LCR_ENABLE_PAR | LCR_MARK_SPACE,
        Parity::Space => LCR_ENABLE_PAR | LCR_MARK_SPACE | LCR_PAR_EVEN,
    };

    lcr |= match settings.stop_bits {
        StopBits::One => 0,
        StopBits::OnePointFive => {
            return Err(ProtocolError::Unsupported(
                "Unsupported stop bits: 1.5".to_string(),
            ));
        }
        StopBits::Two => LCR_STOP_BITS_2,
    };

    Ok(lcr)
}

/// wValue of MODEM_CONTROL (the chip expects the inverted bits)
pub fn modem_control_value(dtr: bool, rts: bool) -> u16 {
    let mut bits = 0;
    if dtr {
        bits |= SCL_DTR;
    }
    if rts {
        bits |= SCL_RTS;
    }
    !bits
}

/// Input lines from the first byte of the status register
pub fn decode_status(status: u8) -> ControlLines {
    let mut lines = ControlLines::EMPTY;
    lines.set(ControlLine::Cts, status & GCL_CTS == 0);
    lines.set(ControlLine::Dsr, status & GCL_DSR == 0);
    lines.set(ControlLine::Ri, status & GCL_RI == 0);
    lines.set(ControlLine::Cd, status & GCL_CD == 0);
    lines
}

/// Break register value derived from its current contents
pub fn break_register_value(current: [u8; 2], asserted: bool) -> u16 {
    let [mut low, mut high] = current;
    if asserted {
        low &= !0x01;
        high &= !0x40;
    } else {
        low |= 0x01;
        high |= 0x40;
    }
    u16::from_le_bytes([low, high])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_baud_rate_values() {
        assert_eq!(baud_rate_values(9600).unwrap(), (0xb282, 0x000c));
    }

    #[test]
    fn test_921600_special_case() {
        assert_eq!(baud_rate_values(921_600).unwrap(), (0xf387, 0x0000));
    }

    #[test]
    fn test_baud_rate_lower_limit() {
        assert!(baud_rate_values(46).is_ok());
        assert!(matches!(
            baud_rate_values(45),
            Err(ProtocolError::Unsupported(_))
        ));
    }

    #[test]
    fn test_line_control() {
        let settings = LineSettings::default();
        assert_eq!(line_control(&settings).unwrap(), 0xc3);

        let settings =
            LineSettings::new(9600, DataBits::Seven, StopBits::Two, Parity::Space).unwrap();
        assert_eq!(line_control(&settings).unwrap(), 0xc0 | 0x02 | 0x38 | 0x04);

        let settings =
            LineSettings::new(9600, DataBits::Eight, StopBits::OnePointFive, Parity::None)
                .unwrap();
        assert!(matches!(
            line_control(&settings),
            Err(ProtocolError::Unsupported(_))
        ));
    }

    #[test]
    fn test_modem_control_inverted() {
        assert_eq!(modem_control_value(false, false), 0xffff);
        assert_eq!(modem_control_value(true, false), !0x20);
        assert_eq!(modem_control_value(true, true), !0x60);
    }

    #[test]
    fn test_status_active_low() {
        assert_eq!(decode_status(0xff), ControlLines::EMPTY);
        let lines = decode_status(0xfe);
        assert!(lines.contains(ControlLine::Cts));
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn test_check_state() {
        let expected = [None, Some(0x00)];
        assert!(check_state("t", &expected, &[0x27, 0x00], 2).is_ok());
        assert!(check_state("t", &expected, &[0x27, 0x01], 2).is_err());
        assert!(check_state("t", &expected, &[0x27, 0x00], 1).is_err());
    }

    #[test]
    fn test_break_register() {
        assert_eq!(break_register_value([0xff, 0xff], true), 0xbffe);
        assert_eq!(break_register_value([0x00, 0x00], false), 0x4001);
    }

    #[test]
    fn test_init_sequence_shape() {
        let baud_steps = INIT_SEQUENCE
            .iter()
            .filter(|s| matches!(s, InitStep::DefaultBaudRate))
            .count();
        assert_eq!(baud_steps, 2);
        assert_eq!(INIT_SEQUENCE[8], InitStep::ControlLines);
    }
}
