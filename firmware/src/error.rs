use adc_stream_core::{Attenuation, ConvMode, OutputFormat, Unit};

use crate::adc_capture::State;

/// Errors returned synchronously by [`Session`](crate::Session) operations.
///
/// Overflow and timeouts are not errors: `read` reports them through
/// [`ReadStatus`](crate::ReadStatus).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("operation not permitted while the session is {0:?}")]
    InvalidState(State),
    #[error("conversion is already running")]
    HardwareBusy,
    #[error("read buffer of {len} bytes cannot hold one {frame_size}-byte frame")]
    BufferTooSmall { len: usize, frame_size: usize },
}

/// Reasons a configuration is rejected. Rejection leaves the session untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("pattern table is empty")]
    EmptyPattern,
    #[error("pattern table has {count} entries, the scan limit is {limit}")]
    TooManyEntries { count: usize, limit: usize },
    #[error("unit {unit:?} has no channel {channel}")]
    InvalidChannel { unit: Unit, channel: u8 },
    #[error("unit {unit:?} is not converted in {mode:?} mode")]
    UnitNotInMode { unit: Unit, mode: ConvMode },
    #[error("{mode:?} mode needs at least one entry for unit {unit:?}")]
    MissingUnit { unit: Unit, mode: ConvMode },
    #[error("bit width {0} is not supported")]
    UnsupportedBitWidth(u8),
    #[error("attenuation {0:?} is not supported")]
    UnsupportedAttenuation(Attenuation),
    #[error("conversion mode {0:?} is not supported")]
    UnsupportedConvMode(ConvMode),
    #[error("{mode:?} mode requires records tagged with their unit, not {format:?}")]
    FormatMismatch { format: OutputFormat, mode: ConvMode },
    #[error("bit width {bit_width} does not fit the {value_bits} value bits of {format:?}")]
    ValueTooWide {
        bit_width: u8,
        value_bits: u8,
        format: OutputFormat,
    },
    #[error("sample frequency {freq_hz} Hz is outside {min_hz}..={max_hz} Hz")]
    FrequencyOutOfRange { freq_hz: u32, min_hz: u32, max_hz: u32 },
    #[error("sample frequency {freq_hz} Hz leaves no time for each of {entries} entries")]
    FrequencyBelowPattern { freq_hz: u32, entries: usize },
    #[error("frame size {0} is not a non-zero multiple of the record size")]
    MisalignedFrame(usize),
    #[error("frame size {size} exceeds the descriptor limit of {limit} bytes")]
    FrameTooLarge { size: usize, limit: usize },
    #[error("{store} bytes of storage hold fewer than two {frame_size}-byte frames")]
    ChainTooShort { store: usize, frame_size: usize },
    #[error("{requested} bytes of storage requested, only {available} available")]
    StorageTooSmall { requested: usize, available: usize },
}
