//! Hex formatting helpers for logging wire traffic

use crate::error::{ProtocolError, Result};
use std::fmt::Write;

const BYTES_PER_LINE: usize = 8;

/// Space separated upper-case hex, e.g. `"01 A2 FF"`
pub fn to_hex_string(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for (i, b) in data.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:02X}", b);
    }
    out
}

/// Multi-line dump with 8 bytes per line followed by their printable ASCII
///
/// Non-printable bytes are shown as `.`.
pub fn dump_hex_string(data: &[u8]) -> String {
    let mut out = String::new();
    let chunks = data.chunks(BYTES_PER_LINE);
    let count = chunks.len();
    for (n, chunk) in chunks.enumerate() {
        for b in chunk {
            let _ = write!(out, "{:02X} ", b);
        }
        for _ in chunk.len()..BYTES_PER_LINE {
            out.push_str("   ");
        }
        out.extend(chunk.iter().map(|&b| printable(b)));
        if n + 1 < count {
            out.push('\n');
        }
    }
    out
}

/// Parse the output of [`to_hex_string`]; any single separator is accepted
pub fn from_hex_string(s: &str) -> Result<Vec<u8>> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len().div_ceil(3));
    let mut i = 0;
    while i < bytes.len() {
        let pair = bytes.get(i..i + 2).ok_or_else(|| {
            ProtocolError::Malformed(format!("Truncated hex byte at offset {}", i))
        })?;
        out.push((nibble(pair[0])? << 4) | nibble(pair[1])?);
        i += 3;
    }
    Ok(out)
}

fn nibble(c: u8) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        _ => Err(ProtocolError::Malformed(format!(
            "Invalid hex char '{}'",
            c as char
        ))),
    }
}

fn printable(b: u8) -> char {
    if b > b' ' && b < b'~' { b as char } else { '.' }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_hex_string() {
        assert_eq!(to_hex_string(&[0x01, 0xa2, 0xff]), "01 A2 FF");
        assert_eq!(to_hex_string(&[]), "");
    }

    #[test]
    fn test_dump_pads_last_line() {
        let dump = dump_hex_string(b"ABCDEFGHij\n");
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "41 42 43 44 45 46 47 48 ABCDEFGH");
        assert_eq!(lines[1], format!("69 6A 0A {}ij.", " ".repeat(15)));
    }

    #[test]
    fn test_from_hex_string() {
        assert_eq!(
            from_hex_string("01 a2\nFF").unwrap(),
            vec![0x01, 0xa2, 0xff]
        );
        assert!(from_hex_string("0G").is_err());
        assert!(from_hex_string("01 2").is_err());
    }
}
