#![cfg_attr(not(test), no_std)]

pub mod adc_capture;
pub mod error;
pub mod sampler;
#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use adc_capture::{DmaGrant, EventCallbacks, FrameEvent, Read, ReadStatus, Session, State};
pub use error::{ConfigError, Error};
pub use sampler::{Capabilities, Converter, ScanPlan, ScanSchedule};
