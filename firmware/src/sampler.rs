//! Pattern validation, scan ordering and the seam to the converter peripheral.

use adc_stream_core::{
    record::RECORD_BYTES, AcquisitionConfig, Attenuation, ConvMode, OutputFormat, PatternEntry,
    PatternTable, Unit, MAX_PATTERN_LEN,
};
use embassy_time::Duration;
use fugit::HertzU32;

use crate::{adc_capture::DmaGrant, error::ConfigError};

/// Limits of a converter + DMA engine combination.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Capabilities {
    /// Longest pattern table the converter can scan.
    pub scan_limit: usize,
    /// Channel count of unit A and unit B.
    pub channels: [u8; 2],
    pub min_bit_width: u8,
    pub max_bit_width: u8,
    pub attenuations: &'static [Attenuation],
    pub conv_modes: &'static [ConvMode],
    pub min_sample_freq: HertzU32,
    pub max_sample_freq: HertzU32,
    /// Largest buffer a single DMA descriptor can describe.
    pub max_frame_size: usize,
}

impl Capabilities {
    /// Two 10-channel SAR units with 9 to 12 bit resolution.
    pub const DEFAULT: Self = Self {
        scan_limit: MAX_PATTERN_LEN,
        channels: [10, 10],
        min_bit_width: 9,
        max_bit_width: 12,
        attenuations: &[
            Attenuation::Db0,
            Attenuation::Db2_5,
            Attenuation::Db6,
            Attenuation::Db12,
        ],
        conv_modes: &[
            ConvMode::SingleUnitA,
            ConvMode::SingleUnitB,
            ConvMode::BothUnitsSimultaneous,
            ConvMode::AlternateUnits,
        ],
        min_sample_freq: HertzU32::from_raw(611),
        max_sample_freq: HertzU32::from_raw(83_333),
        max_frame_size: 4092,
    };

    pub fn channel_count(&self, unit: Unit) -> u8 {
        self.channels[unit.index()]
    }

    fn check_entry(
        &self,
        entry: &PatternEntry,
        mode: ConvMode,
        format: OutputFormat,
    ) -> Result<(), ConfigError> {
        if !mode.uses(entry.unit) {
            return Err(ConfigError::UnitNotInMode {
                unit: entry.unit,
                mode,
            });
        }
        // Channel ids travel in 4 record bits
        if entry.channel >= self.channel_count(entry.unit) || entry.channel > 0xF {
            return Err(ConfigError::InvalidChannel {
                unit: entry.unit,
                channel: entry.channel,
            });
        }
        if !(self.min_bit_width..=self.max_bit_width).contains(&entry.bit_width) {
            return Err(ConfigError::UnsupportedBitWidth(entry.bit_width));
        }
        if entry.bit_width > format.value_bits() {
            return Err(ConfigError::ValueTooWide {
                bit_width: entry.bit_width,
                value_bits: format.value_bits(),
                format,
            });
        }
        if !self.attenuations.contains(&entry.attenuation) {
            return Err(ConfigError::UnsupportedAttenuation(entry.attenuation));
        }
        Ok(())
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Interface between a [`Session`](crate::Session) and a converter with its DMA engine.
///
/// Implementations program registers; the session decides which descriptor is filled
/// when. `load`, `take_completed` and `stop` are called from the transfer-complete
/// interrupt and must not block.
pub trait Converter {
    fn capabilities(&self) -> Capabilities;

    /// Program pattern table, trigger rate and output format. Only called while idle.
    fn configure(&mut self, plan: &ScanPlan);

    /// Point the DMA engine at the descriptor to fill next.
    fn load(&mut self, grant: DmaGrant);

    /// Start the conversion trigger and enable the transfer-complete interrupt.
    fn start(&mut self);

    /// Acknowledge a transfer-complete interrupt and give back the filled descriptor.
    fn take_completed(&mut self) -> Option<DmaGrant>;

    /// Stop triggering, disable the interrupt and give back the loaded descriptor, if
    /// any. Its contents are discarded.
    fn stop(&mut self) -> Option<DmaGrant>;
}

/// A validated configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPlan {
    pattern: PatternTable,
    mode: ConvMode,
    format: OutputFormat,
    sample_freq: HertzU32,
    frame_size: usize,
    chain_depth: usize,
}

impl ScanPlan {
    pub fn new(config: &AcquisitionConfig, caps: &Capabilities) -> Result<Self, ConfigError> {
        let pattern = &config.pattern_entries;
        let mode = config.conv_mode;
        let format = config.output_format;

        if pattern.is_empty() {
            return Err(ConfigError::EmptyPattern);
        }
        if pattern.len() > caps.scan_limit {
            return Err(ConfigError::TooManyEntries {
                count: pattern.len(),
                limit: caps.scan_limit,
            });
        }
        if !caps.conv_modes.contains(&mode) {
            return Err(ConfigError::UnsupportedConvMode(mode));
        }
        if mode.is_dual() && !format.carries_unit() {
            return Err(ConfigError::FormatMismatch { format, mode });
        }
        for entry in pattern {
            caps.check_entry(entry, mode, format)?;
        }
        if mode.is_dual() {
            for unit in [Unit::A, Unit::B] {
                if !pattern.iter().any(|entry| entry.unit == unit) {
                    return Err(ConfigError::MissingUnit { unit, mode });
                }
            }
        }

        let freq_hz = config.sample_freq_hz;
        let (min_hz, max_hz) = (caps.min_sample_freq.to_Hz(), caps.max_sample_freq.to_Hz());
        if !(min_hz..=max_hz).contains(&freq_hz) {
            return Err(ConfigError::FrequencyOutOfRange {
                freq_hz,
                min_hz,
                max_hz,
            });
        }
        if (freq_hz as usize) < pattern.len() {
            return Err(ConfigError::FrequencyBelowPattern {
                freq_hz,
                entries: pattern.len(),
            });
        }

        let frame_size = config.conv_frame_size;
        if frame_size == 0 || frame_size % RECORD_BYTES != 0 {
            return Err(ConfigError::MisalignedFrame(frame_size));
        }
        if frame_size > caps.max_frame_size {
            return Err(ConfigError::FrameTooLarge {
                size: frame_size,
                limit: caps.max_frame_size,
            });
        }
        let chain_depth = config.chain_depth();
        if chain_depth < 2 {
            return Err(ConfigError::ChainTooShort {
                store: config.max_store_buf_size,
                frame_size,
            });
        }

        Ok(Self {
            pattern: pattern.clone(),
            mode,
            format,
            sample_freq: config.sample_freq(),
            frame_size,
            chain_depth,
        })
    }

    pub fn pattern(&self) -> &[PatternEntry] {
        &self.pattern
    }

    pub fn mode(&self) -> ConvMode {
        self.mode
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn sample_freq(&self) -> HertzU32 {
        self.sample_freq
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn chain_depth(&self) -> usize {
        self.chain_depth
    }

    /// Bytes of storage the descriptor chain occupies.
    pub fn store_size(&self) -> usize {
        self.frame_size * self.chain_depth
    }

    pub fn records_per_frame(&self) -> usize {
        self.frame_size / RECORD_BYTES
    }

    /// Records written per second across all units.
    pub fn conversion_rate(&self) -> HertzU32 {
        HertzU32::Hz(self.sample_freq.to_Hz() * self.mode.conversions_per_trigger())
    }

    /// Rate at which each pattern entry is revisited.
    ///
    /// With a single unit this is `sample_freq / entry_count`. In dual-unit modes every
    /// unit walks its own entries, so the unit with more entries sets the rate.
    pub fn per_channel_rate(&self) -> HertzU32 {
        let freq = self.sample_freq.to_Hz();
        let longest_lane = [Unit::A, Unit::B]
            .into_iter()
            .map(|unit| self.pattern.iter().filter(|e| e.unit == unit).count() as u32)
            .max()
            .unwrap_or(1)
            .max(1);

        HertzU32::Hz(match self.mode {
            ConvMode::SingleUnitA | ConvMode::SingleUnitB => freq / self.pattern.len() as u32,
            ConvMode::BothUnitsSimultaneous => freq / longest_lane,
            ConvMode::AlternateUnits => freq / (2 * longest_lane),
        })
    }

    /// Time the hardware takes to fill one frame.
    pub fn frame_period(&self) -> Duration {
        let records = self.records_per_frame() as u64;
        Duration::from_micros(records * 1_000_000 / u64::from(self.conversion_rate().to_Hz()))
    }

    /// The endless sequence of conversions, in the order their records are written.
    pub fn schedule(&self) -> ScanSchedule {
        ScanSchedule::new(&self.pattern, self.mode)
    }
}

/// Iterator over the pattern entries in conversion order, repeating forever.
///
/// Single-unit modes walk the table in order. Dual-unit modes interleave the unit A and
/// unit B entries, each unit cycling through its own entries independently.
#[derive(Debug, Clone)]
pub struct ScanSchedule {
    lanes: [PatternTable; 2],
    cursors: [usize; 2],
    next_unit: Unit,
    dual: bool,
}

impl ScanSchedule {
    pub fn new(pattern: &[PatternEntry], mode: ConvMode) -> Self {
        let mut lanes = [PatternTable::new(), PatternTable::new()];
        for entry in pattern.iter().filter(|entry| mode.uses(entry.unit)) {
            // Lanes have the same capacity as the table they are split from
            let _ = lanes[entry.unit.index()].push(*entry);
        }

        Self {
            lanes,
            cursors: [0; 2],
            next_unit: mode.first_unit(),
            dual: mode.is_dual(),
        }
    }
}

impl Iterator for ScanSchedule {
    type Item = PatternEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let unit = self.next_unit;
        if self.dual {
            self.next_unit = unit.other();
        }

        let lane = &self.lanes[unit.index()];
        let cursor = &mut self.cursors[unit.index()];
        let entry = *lane.get(*cursor)?;
        *cursor = (*cursor + 1) % lane.len();

        Some(entry)
    }
}
