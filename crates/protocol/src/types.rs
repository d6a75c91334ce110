//! Serial line type definitions
//!
//! Chipset-independent representations of the UART framing parameters and
//! the modem control lines. Every chipset encoder in this crate consumes
//! these types, so values that are out of range for *any* UART are rejected
//! here, while chipset-specific restrictions are reported by the encoders.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of data bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl DataBits {
    /// Number of bits as an integer (5..=8)
    pub const fn bits(self) -> u8 {
        match self {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

impl TryFrom<u8> for DataBits {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            _ => Err(ProtocolError::InvalidArgument(format!(
                "Invalid data bits: {}",
                value
            ))),
        }
    }
}

impl From<DataBits> for u8 {
    fn from(value: DataBits) -> Self {
        value.bits()
    }
}

/// Number of stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StopBits {
    #[serde(rename = "1")]
    One,
    #[serde(rename = "1.5")]
    OnePointFive,
    #[serde(rename = "2")]
    Two,
}

impl StopBits {
    /// Legacy integer code (1 = one, 2 = two, 3 = one and a half)
    pub const fn code(self) -> u8 {
        match self {
            StopBits::One => 1,
            StopBits::Two => 2,
            StopBits::OnePointFive => 3,
        }
    }

    /// Parse the legacy integer code
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            3 => Ok(StopBits::OnePointFive),
            _ => Err(ProtocolError::InvalidArgument(format!(
                "Invalid stop bits: {}",
                code
            ))),
        }
    }
}

impl FromStr for StopBits {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1" => Ok(StopBits::One),
            "1.5" => Ok(StopBits::OnePointFive),
            "2" => Ok(StopBits::Two),
            _ => Err(ProtocolError::InvalidArgument(format!(
                "Invalid stop bits: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for StopBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopBits::One => write!(f, "1"),
            StopBits::OnePointFive => write!(f, "1.5"),
            StopBits::Two => write!(f, "2"),
        }
    }
}

/// Parity mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Odd,
    Even,
    Mark,
    Space,
}

impl Parity {
    /// Legacy integer code (0 = none .. 4 = space), identical to the CDC encoding
    pub const fn code(self) -> u8 {
        match self {
            Parity::None => 0,
            Parity::Odd => 1,
            Parity::Even => 2,
            Parity::Mark => 3,
            Parity::Space => 4,
        }
    }

    /// Parse the legacy integer code
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            0 => Ok(Parity::None),
            1 => Ok(Parity::Odd),
            2 => Ok(Parity::Even),
            3 => Ok(Parity::Mark),
            4 => Ok(Parity::Space),
            _ => Err(ProtocolError::InvalidArgument(format!(
                "Invalid parity: {}",
                code
            ))),
        }
    }

    fn letter(self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
            Parity::Mark => 'M',
            Parity::Space => 'S',
        }
    }
}

impl FromStr for Parity {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "n" => Ok(Parity::None),
            "odd" | "o" => Ok(Parity::Odd),
            "even" | "e" => Ok(Parity::Even),
            "mark" | "m" => Ok(Parity::Mark),
            "space" | "s" => Ok(Parity::Space),
            _ => Err(ProtocolError::InvalidArgument(format!(
                "Invalid parity: {}",
                s
            ))),
        }
    }
}

/// Complete set of UART framing parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSettings {
    /// Baud rate in bits per second (always > 0)
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
}

impl LineSettings {
    /// Create line settings, rejecting a zero baud rate
    pub fn new(
        baud_rate: u32,
        data_bits: DataBits,
        stop_bits: StopBits,
        parity: Parity,
    ) -> Result<Self> {
        let settings = Self {
            baud_rate,
            data_bits,
            stop_bits,
            parity,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Build settings from the legacy integer codes used by most serial APIs
    ///
    /// `stop_bits` uses 1 / 2 / 3 (= 1.5) and `parity` uses 0..=4.
    pub fn from_raw(baud_rate: i32, data_bits: i32, stop_bits: i32, parity: i32) -> Result<Self> {
        if baud_rate <= 0 {
            return Err(ProtocolError::InvalidArgument(format!(
                "Invalid baud rate: {}",
                baud_rate
            )));
        }
        let data_bits = u8::try_from(data_bits)
            .map_err(|_| {
                ProtocolError::InvalidArgument(format!("Invalid data bits: {}", data_bits))
            })
            .and_then(DataBits::try_from)?;
        Self::new(
            baud_rate as u32,
            data_bits,
            StopBits::from_code(stop_bits)?,
            Parity::from_code(parity)?,
        )
    }

    /// Check invariants that serde cannot enforce
    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(ProtocolError::InvalidArgument(
                "Invalid baud rate: 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for LineSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
        }
    }
}

impl fmt::Display for LineSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}{}{}",
            self.baud_rate,
            self.data_bits.bits(),
            self.parity.letter(),
            self.stop_bits
        )
    }
}

/// Modem control line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlLine {
    /// Request To Send (output)
    Rts,
    /// Clear To Send (input)
    Cts,
    /// Data Terminal Ready (output)
    Dtr,
    /// Data Set Ready (input)
    Dsr,
    /// Carrier Detect (input)
    Cd,
    /// Ring Indicator (input)
    Ri,
}

impl ControlLine {
    /// All lines in display order
    pub const ALL: [ControlLine; 6] = [
        ControlLine::Rts,
        ControlLine::Cts,
        ControlLine::Dtr,
        ControlLine::Dsr,
        ControlLine::Cd,
        ControlLine::Ri,
    ];

    /// Whether the host drives this line
    pub const fn is_output(self) -> bool {
        matches!(self, ControlLine::Rts | ControlLine::Dtr)
    }

    const fn mask(self) -> u8 {
        match self {
            ControlLine::Rts => 0x01,
            ControlLine::Cts => 0x02,
            ControlLine::Dtr => 0x04,
            ControlLine::Dsr => 0x08,
            ControlLine::Cd => 0x10,
            ControlLine::Ri => 0x20,
        }
    }
}

impl fmt::Display for ControlLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControlLine::Rts => "RTS",
            ControlLine::Cts => "CTS",
            ControlLine::Dtr => "DTR",
            ControlLine::Dsr => "DSR",
            ControlLine::Cd => "CD",
            ControlLine::Ri => "RI",
        };
        f.write_str(name)
    }
}

/// Set of modem control lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ControlLines(u8);

impl ControlLines {
    /// The empty set
    pub const EMPTY: ControlLines = ControlLines(0);

    /// DTR and RTS, the lines every host-driven chipset exposes
    pub const OUTPUTS: ControlLines = ControlLines(0x01 | 0x04);

    /// Every modem line
    pub const ALL: ControlLines = ControlLines(0x3f);

    pub fn contains(&self, line: ControlLine) -> bool {
        self.0 & line.mask() != 0
    }

    pub fn insert(&mut self, line: ControlLine) {
        self.0 |= line.mask();
    }

    pub fn remove(&mut self, line: ControlLine) {
        self.0 &= !line.mask();
    }

    /// Insert or remove `line` depending on `present`
    pub fn set(&mut self, line: ControlLine, present: bool) {
        if present {
            self.insert(line);
        } else {
            self.remove(line);
        }
    }

    pub fn union(self, other: ControlLines) -> ControlLines {
        ControlLines(self.0 | other.0)
    }

    pub fn intersection(self, other: ControlLines) -> ControlLines {
        ControlLines(self.0 & other.0)
    }

    /// Lines present in `self` that are host-driven outputs
    pub fn outputs(self) -> ControlLines {
        self.intersection(ControlLines::OUTPUTS)
    }

    pub fn is_subset(&self, other: &ControlLines) -> bool {
        self.0 & !other.0 == 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = ControlLine> + '_ {
        ControlLine::ALL
            .into_iter()
            .filter(move |line| self.contains(*line))
    }
}

impl FromIterator<ControlLine> for ControlLines {
    fn from_iter<I: IntoIterator<Item = ControlLine>>(iter: I) -> Self {
        let mut lines = ControlLines::EMPTY;
        for line in iter {
            lines.insert(line);
        }
        lines
    }
}

impl fmt::Display for ControlLines {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.iter().map(|line| line.to_string()).collect();
        write!(f, "[{}]", names.join(", "))
    }
}
