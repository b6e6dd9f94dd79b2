use std::{error::Error, path::Path};

use crate::AcquisitionConfig;

const CONFIG_FILE_NAME: &str = "adc-config.toml";

/// How a host-side consumer drains a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Number of `read` calls to issue.
    pub reads: u32,
    pub read_timeout_ms: u64,
    /// Read buffer size in bytes. Defaults to one frame.
    pub buffer_size: Option<usize>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            reads: 16,
            read_timeout_ms: 1000,
            buffer_size: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Config {
    pub session: AcquisitionConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
}

impl Config {
    /// Loads `path`, or the first `adc-config.toml` found in the current directory or
    /// one of its ancestors.
    pub fn load(path: Option<&Path>) -> Result<Self, Box<dyn Error>> {
        let paths = match path {
            Some(p) => vec![p.into()],
            None => std::env::current_dir()?
                .ancestors()
                .map(|path| path.join(CONFIG_FILE_NAME))
                .collect(),
        };

        let mut last_error = None;

        for path in paths {
            match std::fs::read_to_string(path) {
                Ok(config_string) => return Self::from_toml(&config_string),
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.map_or_else(
            || format!("no {CONFIG_FILE_NAME} found").into(),
            Into::into,
        ))
    }

    pub fn from_toml(config_string: &str) -> Result<Self, Box<dyn Error>> {
        Ok(toml::from_str(config_string)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Attenuation, ConvMode, OutputFormat, PatternEntry, Unit};

    const EXAMPLE: &str = r#"
        [session]
        max_store_buf_size = 1024
        conv_frame_size = 256
        sample_freq_hz = 20000

        [[session.pattern_entries]]
        unit = "a"
        channel = 0

        [[session.pattern_entries]]
        unit = "a"
        channel = 3
        attenuation = "6dB"
        bit_width = 10

        [consumer]
        reads = 4
    "#;

    #[test]
    fn parses_session_and_defaults() {
        let config = Config::from_toml(EXAMPLE).unwrap();

        assert_eq!(config.session.chain_depth(), 4);
        assert_eq!(config.session.conv_mode, ConvMode::SingleUnitA);
        assert_eq!(config.session.output_format, OutputFormat::ValueLow);
        assert_eq!(
            config.session.pattern_entries.as_slice(),
            &[
                PatternEntry::full_scale(Unit::A, 0),
                PatternEntry::new(Unit::A, 3, Attenuation::Db6, 10),
            ]
        );
        assert_eq!(config.consumer.reads, 4);
        assert_eq!(config.consumer.read_timeout_ms, 1000);
        assert_eq!(config.consumer.buffer_size, None);
    }

    #[test]
    fn parses_dual_unit_modes() {
        let config = Config::from_toml(
            r#"
            [session]
            max_store_buf_size = 2048
            conv_frame_size = 512
            sample_freq_hz = 40000
            conv_mode = "alternate-units"
            output_format = "unit-tagged"
            pattern_entries = [
                { unit = "a", channel = 1, bit_width = 11 },
                { unit = "b", channel = 2, bit_width = 11 },
            ]
            "#,
        )
        .unwrap();

        assert_eq!(config.session.conv_mode, ConvMode::AlternateUnits);
        assert_eq!(config.session.output_format, OutputFormat::UnitTagged);
        assert_eq!(config.session.pattern_entries[1].unit, Unit::B);
        assert_eq!(config.consumer, ConsumerConfig::default());
    }

    #[test]
    fn too_many_pattern_entries_is_rejected() {
        let entries = (0..25)
            .map(|_| r#"{ unit = "a", channel = 0 }"#)
            .collect::<Vec<_>>()
            .join(", ");
        let toml = format!(
            "[session]\nmax_store_buf_size = 1024\nconv_frame_size = 256\nsample_freq_hz = 20000\npattern_entries = [{entries}]\n"
        );

        assert!(Config::from_toml(&toml).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(Config::load(Some(Path::new("/nonexistent/adc-config.toml"))).is_err());
    }
}
