//! Cross-module tests for the chipset encoders
//!
//! Run with: `cargo test -p protocol`

use proptest::prelude::*;
use protocol::descriptors::{acm_first_interface, split_descriptors};
use protocol::{DataBits, LineSettings, Parity, ProtocolError, StopBits, ch34x, cp210x, ftdi};

// ============================================================================
// FTDI baud rate properties
// ============================================================================

proptest! {
    #[test]
    fn ftdi_accepted_rates_are_within_three_percent(baud in 183u32..=3_500_000u32) {
        match ftdi::baud_divisor(baud) {
            Ok(divisor) => {
                let error = (1.0 - divisor.effective_baud_rate as f64 / baud as f64).abs();
                prop_assert!(error < 0.03, "baud {} error {}", baud, error);
            }
            Err(e) => prop_assert!(matches!(e, ProtocolError::Unsupported(_))),
        }
    }

    #[test]
    fn ftdi_rates_above_limit_are_unsupported(baud in 3_500_001u32..=u32::MAX) {
        prop_assert!(matches!(ftdi::baud_divisor(baud), Err(ProtocolError::Unsupported(_))));
    }

    #[test]
    fn ftdi_header_strip_length(packets in 1usize..16, packet_size in prop_oneof![Just(64usize), Just(512usize)]) {
        let total = packets * packet_size;
        let mut buf: Vec<u8> = (0..total).map(|i| (i % 251) as u8).collect();
        let len = ftdi::strip_status_headers(&mut buf, total, packet_size).unwrap();
        prop_assert_eq!(len, packets * (packet_size - 2));
    }
}

#[test]
fn ftdi_common_rates_are_exact() {
    for baud in [300, 1200, 9600, 19200, 38400, 57600, 230400, 460800, 921600] {
        let divisor = ftdi::baud_divisor(baud).unwrap();
        let error = (1.0 - divisor.effective_baud_rate as f64 / baud as f64).abs();
        assert!(error < 0.01, "baud {}", baud);
    }
}

#[test]
fn ftdi_header_strip_keeps_order() {
    let mut buf = Vec::new();
    for chunk in [b"xxABC", b"yyDEF", b"zzGH\0"] {
        buf.extend_from_slice(chunk);
    }
    let len = ftdi::strip_status_headers(&mut buf, 14, 5).unwrap();
    assert_eq!(&buf[..len], b"ABCDEFGH");
}

// ============================================================================
// CH34x
// ============================================================================

#[test]
fn ch34x_break_round_trip() {
    let original = [0x5au8, 0x3c];
    let asserted = ch34x::break_register_value(original, true).to_le_bytes();
    assert_eq!(asserted[0] & 0x01, 0);
    assert_eq!(asserted[1] & 0x40, 0);

    let released = ch34x::break_register_value(asserted, false).to_le_bytes();
    assert_eq!(released[0], original[0] | 0x01);
    assert_eq!(released[1], original[1] | 0x40);
    // other bits untouched
    assert_eq!(released[0] & !0x01, original[0] & !0x01);
    assert_eq!(released[1] & !0x40, original[1] & !0x40);
}

#[test]
fn ch34x_baud_values_fit_registers() {
    for baud in [50, 300, 2400, 9600, 115200, 921600, 2_000_000] {
        let (value1, _) = ch34x::baud_rate_values(baud).unwrap();
        assert_eq!(value1 & 0x0080, 0x0080, "baud {}", baud);
    }
}

// ============================================================================
// CP210x
// ============================================================================

#[test]
fn cp2105_second_port_only_allows_8n1_variants() {
    let restricted = cp210x::is_restricted_port(2, 1);
    let even = LineSettings::new(9600, DataBits::Eight, StopBits::One, Parity::Even).unwrap();
    assert_eq!(cp210x::line_control(&even, restricted).unwrap(), 0x0820);

    let seven = LineSettings::new(9600, DataBits::Seven, StopBits::One, Parity::None).unwrap();
    assert!(cp210x::line_control(&seven, restricted).is_err());
    assert!(cp210x::line_control(&seven, false).is_ok());
}

// ============================================================================
// Descriptors
// ============================================================================

#[test]
fn iad_composite_device_second_acm_function() {
    let mut raw = vec![
        18, 0x01, 0x00, 0x02, 0xef, 0x02, 0x01, 64, 0x09, 0x12, 0x01, 0x00, 0x00, 0x01, 1, 2, 3,
        1,
    ];
    // configuration descriptor in between is skipped
    raw.extend([9, 0x02, 0x00, 0x00, 4, 1, 0, 0x80, 50]);
    raw.extend([8, 0x0b, 0, 2, 0x02, 0x02, 0x01, 0]);
    raw.extend([8, 0x0b, 2, 2, 0x02, 0x02, 0x01, 0]);

    let descriptors = split_descriptors(&raw);
    assert_eq!(descriptors.len(), 4);
    assert_eq!(acm_first_interface(&descriptors, 0), Some(0));
    assert_eq!(acm_first_interface(&descriptors, 1), Some(2));
    assert_eq!(acm_first_interface(&descriptors, 2), None);
}
