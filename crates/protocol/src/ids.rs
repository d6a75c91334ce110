//! USB Vendor/Product IDs of the supported serial bridges
//!
//! Product ids listed per vendor are the exact-match keys registered in the
//! probe table by each driver factory.

/// USB Vendor ID / Product ID pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UsbId {
    pub vid: u16,
    pub pid: u16,
}

impl UsbId {
    pub const fn new(vid: u16, pid: u16) -> Self {
        Self { vid, pid }
    }
}

/// FTDI (Future Technology Devices International)
pub mod ftdi {
    use super::UsbId;

    pub const VID: u16 = 0x0403;

    pub const FT232R: UsbId = UsbId::new(VID, 0x6001);
    pub const FT2232H: UsbId = UsbId::new(VID, 0x6010);
    pub const FT4232H: UsbId = UsbId::new(VID, 0x6011);
    pub const FT232H: UsbId = UsbId::new(VID, 0x6014);
    /// Same id for FT230X, FT231X and FT234XD
    pub const FT231X: UsbId = UsbId::new(VID, 0x6015);

    pub const ALL_PIDS: &[u16] = &[0x6001, 0x6014, 0x6010, 0x6011, 0x6015];
}

/// Silicon Labs CP210x
pub mod silabs {
    use super::UsbId;

    pub const VID: u16 = 0x10c4;

    /// Same id for CP2101, CP2103, CP2104 and CP2109
    pub const CP2102: UsbId = UsbId::new(VID, 0xea60);
    pub const CP2105: UsbId = UsbId::new(VID, 0xea70);
    pub const CP2108: UsbId = UsbId::new(VID, 0xea71);

    pub const ALL_PIDS: &[u16] = &[0xea60, 0xea70, 0xea71];
}

/// Qinheng (WCH) CH340/CH341
pub mod qinheng {
    use super::UsbId;

    pub const VID: u16 = 0x1a86;

    pub const CH340: UsbId = UsbId::new(VID, 0x7523);
    pub const CH341A: UsbId = UsbId::new(VID, 0x5523);

    pub const ALL_PIDS: &[u16] = &[0x7523, 0x5523];
}

/// Google Chrome OS closed case debugging
pub mod google {
    use super::UsbId;

    pub const VID: u16 = 0x18d1;

    pub const CR50: UsbId = UsbId::new(VID, 0x5014);

    pub const ALL_PIDS: &[u16] = &[0x5014];
}

/// Unisoc based GSM modems
pub mod unisoc {
    use super::UsbId;

    pub const VID: u16 = 0x1782;

    pub const FIBOCOM_L610: UsbId = UsbId::new(VID, 0x4d10);
    pub const FIBOCOM_L612: UsbId = UsbId::new(VID, 0x4d12);

    pub const ALL_PIDS: &[u16] = &[0x4d10, 0x4d12];
}

/// Prolific PL2303 (recognised but not driven)
pub mod prolific {
    pub const VID: u16 = 0x067b;

    pub const ALL_PIDS: &[u16] = &[0x2303, 0x23a3, 0x23b3, 0x23c3, 0x23d3, 0x23e3, 0x23f3];
}

/// Parse a "vid:pid" string with hexadecimal ids (optional `0x` prefixes)
pub fn parse_vid_pid(s: &str) -> Option<UsbId> {
    let (vid, pid) = s.trim().split_once(':')?;
    let parse = |part: &str| {
        let part = part.trim();
        let part = part
            .strip_prefix("0x")
            .or_else(|| part.strip_prefix("0X"))
            .unwrap_or(part);
        u16::from_str_radix(part, 16).ok()
    };
    Some(UsbId::new(parse(vid)?, parse(pid)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vid_pid() {
        assert_eq!(parse_vid_pid("0403:6001"), Some(ftdi::FT232R));
        assert_eq!(parse_vid_pid("0x10C4:0xEA70"), Some(silabs::CP2105));
        assert_eq!(parse_vid_pid("0403"), None);
        assert_eq!(parse_vid_pid("zz:6001"), None);
    }

    #[test]
    fn test_pid_tables_match_constants() {
        assert!(ftdi::ALL_PIDS.contains(&ftdi::FT231X.pid));
        assert!(qinheng::ALL_PIDS.contains(&qinheng::CH341A.pid));
        assert!(unisoc::ALL_PIDS.contains(&unisoc::FIBOCOM_L612.pid));
    }
}
