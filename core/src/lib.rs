#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[cfg(feature = "config")]
pub mod config;
pub mod record;

pub use record::{OutputFormat, SampleRecord};

/// Largest pattern table any supported converter can scan in one pass.
pub const MAX_PATTERN_LEN: usize = 24;

/// Ordered list of conversions making up one scan pass. Insertion order is scan order.
pub type PatternTable = heapless::Vec<PatternEntry, MAX_PATTERN_LEN>;

/// Physical converter unit.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    A,
    B,
}

impl Unit {
    pub const fn index(self) -> usize {
        match self {
            Unit::A => 0,
            Unit::B => 1,
        }
    }

    pub const fn other(self) -> Self {
        match self {
            Unit::A => Unit::B,
            Unit::B => Unit::A,
        }
    }
}

/// Input attenuation, which sets the measurable voltage range of a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Attenuation {
    #[serde(rename = "0dB")]
    Db0,
    #[serde(rename = "2.5dB")]
    Db2_5,
    #[serde(rename = "6dB")]
    Db6,
    #[default]
    #[serde(rename = "12dB")]
    Db12,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PatternEntry {
    pub unit: Unit,
    pub channel: u8,
    #[serde(default)]
    pub attenuation: Attenuation,
    #[serde(default = "PatternEntry::default_bit_width")]
    pub bit_width: u8,
}

impl PatternEntry {
    pub const DEFAULT_BIT_WIDTH: u8 = 12;

    pub const fn new(unit: Unit, channel: u8, attenuation: Attenuation, bit_width: u8) -> Self {
        Self {
            unit,
            channel,
            attenuation,
            bit_width,
        }
    }

    /// Full-resolution entry with the widest input range.
    pub const fn full_scale(unit: Unit, channel: u8) -> Self {
        Self::new(unit, channel, Attenuation::Db12, Self::DEFAULT_BIT_WIDTH)
    }

    fn default_bit_width() -> u8 {
        Self::DEFAULT_BIT_WIDTH
    }
}

/// Which converter unit(s) service the scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(rename_all = "kebab-case")]
pub enum ConvMode {
    /// Only unit A converts.
    #[default]
    SingleUnitA,
    /// Only unit B converts.
    SingleUnitB,
    /// Every trigger converts the next unit A entry and the next unit B entry.
    BothUnitsSimultaneous,
    /// Triggers alternate between the next unit A entry and the next unit B entry.
    AlternateUnits,
}

impl ConvMode {
    pub const fn uses(self, unit: Unit) -> bool {
        match self {
            ConvMode::SingleUnitA => matches!(unit, Unit::A),
            ConvMode::SingleUnitB => matches!(unit, Unit::B),
            ConvMode::BothUnitsSimultaneous | ConvMode::AlternateUnits => true,
        }
    }

    pub const fn is_dual(self) -> bool {
        matches!(
            self,
            ConvMode::BothUnitsSimultaneous | ConvMode::AlternateUnits
        )
    }

    /// Unit converted first in every scan.
    pub const fn first_unit(self) -> Unit {
        match self {
            ConvMode::SingleUnitB => Unit::B,
            _ => Unit::A,
        }
    }

    pub const fn conversions_per_trigger(self) -> u32 {
        match self {
            ConvMode::BothUnitsSimultaneous => 2,
            _ => 1,
        }
    }
}

/// Everything needed to configure a continuous acquisition session.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AcquisitionConfig {
    /// Bytes of frame storage in total; the descriptor chain depth is this divided by
    /// `conv_frame_size`.
    pub max_store_buf_size: usize,
    /// Bytes per frame, the unit of completion notification.
    pub conv_frame_size: usize,
    pub pattern_entries: PatternTable,
    /// Trigger rate of the whole pattern table.
    pub sample_freq_hz: u32,
    #[serde(default)]
    pub conv_mode: ConvMode,
    #[serde(default)]
    pub output_format: OutputFormat,
}

impl AcquisitionConfig {
    pub fn sample_freq(&self) -> fugit::HertzU32 {
        fugit::HertzU32::Hz(self.sample_freq_hz)
    }

    /// Number of descriptors the storage is split into.
    pub fn chain_depth(&self) -> usize {
        self.max_store_buf_size
            .checked_div(self.conv_frame_size)
            .unwrap_or(0)
    }
}
