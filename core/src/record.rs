//! Bit-exact encoding of sample records.
//!
//! Every record is one little-endian 16-bit word. A frame is a plain sequence of such
//! words with no header or padding, so a frame of `n` bytes holds `n / 2` records.
//!
//! | format       | bits 0..   | then            | top bit |
//! |--------------|------------|-----------------|---------|
//! | `ValueLow`   | value 0–11 | channel 12–15   |         |
//! | `ChannelLow` | channel 0–3| value 4–15      |         |
//! | `UnitTagged` | value 0–10 | channel 11–14   | unit 15 |

use crate::Unit;

/// Size of one encoded record in bytes.
pub const RECORD_BYTES: usize = 2;

const CHANNEL_MASK: u16 = 0xF;

/// Bit layout of the records in a frame. Fixed for the life of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    #[default]
    ValueLow,
    ChannelLow,
    /// Records carry the producing unit, at the cost of one value bit.
    UnitTagged,
}

/// A decoded conversion result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SampleRecord {
    /// Only known for [`OutputFormat::UnitTagged`] records.
    pub unit: Option<Unit>,
    pub channel: u8,
    pub value: u16,
}

impl SampleRecord {
    pub const fn new(channel: u8, value: u16) -> Self {
        Self {
            unit: None,
            channel,
            value,
        }
    }

    pub const fn with_unit(unit: Unit, channel: u8, value: u16) -> Self {
        Self {
            unit: Some(unit),
            channel,
            value,
        }
    }
}

impl OutputFormat {
    /// Number of bits available for the raw conversion value.
    pub const fn value_bits(self) -> u8 {
        match self {
            OutputFormat::ValueLow | OutputFormat::ChannelLow => 12,
            OutputFormat::UnitTagged => 11,
        }
    }

    pub const fn value_mask(self) -> u16 {
        (1 << self.value_bits()) - 1
    }

    pub const fn carries_unit(self) -> bool {
        matches!(self, OutputFormat::UnitTagged)
    }

    /// Packs a record into its 16-bit word. Value and channel bits that do not fit the
    /// layout are discarded.
    pub const fn encode(self, record: SampleRecord) -> u16 {
        let channel = record.channel as u16 & CHANNEL_MASK;
        let value = record.value & self.value_mask();

        match self {
            OutputFormat::ValueLow => (channel << 12) | value,
            OutputFormat::ChannelLow => (value << 4) | channel,
            OutputFormat::UnitTagged => {
                let unit = match record.unit {
                    Some(Unit::B) => 1,
                    _ => 0,
                };
                (unit << 15) | (channel << 11) | value
            }
        }
    }

    pub const fn decode(self, word: u16) -> SampleRecord {
        match self {
            OutputFormat::ValueLow => {
                SampleRecord::new((word >> 12) as u8, word & self.value_mask())
            }
            OutputFormat::ChannelLow => {
                SampleRecord::new((word & CHANNEL_MASK) as u8, word >> 4)
            }
            OutputFormat::UnitTagged => SampleRecord::with_unit(
                if word >> 15 == 1 { Unit::B } else { Unit::A },
                ((word >> 11) & CHANNEL_MASK) as u8,
                word & self.value_mask(),
            ),
        }
    }

    /// Writes `record` as little-endian bytes into the first two bytes of `out`.
    pub fn write(self, record: SampleRecord, out: &mut [u8]) {
        out[..RECORD_BYTES].copy_from_slice(&self.encode(record).to_le_bytes());
    }

    /// Decodes every complete record in `frame`. A trailing odd byte is ignored.
    pub fn records(self, frame: &[u8]) -> impl Iterator<Item = SampleRecord> + '_ {
        frame
            .chunks_exact(RECORD_BYTES)
            .map(move |word| self.decode(u16::from_le_bytes([word[0], word[1]])))
    }
}
