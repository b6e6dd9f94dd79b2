use std::{
    collections::BTreeMap,
    error::Error,
    f32::consts::TAU,
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
    thread,
};

use adc_stream_core::{config::Config, OutputFormat, Unit};
use adc_stream_firmware::{sim::SimulatedConverter, Converter, ReadStatus, Session};
use embassy_time::Duration;
use futures::executor::block_on;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Sine per channel around mid-scale of a 9-bit converter, so every supported bit
/// width holds it, plus a little noise.
fn signal_source() -> impl FnMut(Unit, u8, u64) -> u16 + Send {
    let mut rng = StdRng::from_entropy();

    move |unit, channel, n| {
        let cycle = 64 + 16 * u64::from(channel) + 8 * unit.index() as u64;
        let phase = (n % cycle) as f32 / cycle as f32;
        let noise: f32 = rng.gen_range(-4.0..=4.0);
        (256.0 + 200.0 * (TAU * phase).sin() + noise) as u16
    }
}

#[derive(Debug, Default)]
struct ChannelStats {
    count: u64,
    min: u16,
    max: u16,
    sum: u64,
}

impl ChannelStats {
    fn add(&mut self, value: u16) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        }
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += u64::from(value);
    }

    fn mean(&self) -> f64 {
        self.sum as f64 / self.count.max(1) as f64
    }
}

type Stats = BTreeMap<(Option<Unit>, u8), ChannelStats>;

fn drain<C: Converter>(
    session: &Session<'_, C>,
    config: &Config,
    format: OutputFormat,
    stats: &mut Stats,
) -> Result<(), Box<dyn Error>> {
    let frame_size = session.frame_size().ok_or("session is not configured")?;
    let mut buffer = vec![0; config.consumer.buffer_size.unwrap_or(frame_size)];
    let timeout = Duration::from_millis(config.consumer.read_timeout_ms);

    for _ in 0..config.consumer.reads {
        let read = block_on(session.read(&mut buffer, timeout))?;

        for record in format.records(&buffer[..read.len]) {
            stats
                .entry((record.unit, record.channel))
                .or_default()
                .add(record.value);
        }

        match read.status {
            ReadStatus::Data => log::debug!("Read {} frames", read.len / frame_size),
            ReadStatus::Timeout => log::warn!("No frame within {} ms", timeout.as_millis()),
            ReadStatus::Overflow if read.len > 0 => {
                log::warn!("Draining {} frames after overflow", read.len / frame_size)
            }
            ReadStatus::Overflow => {
                log::warn!("Consumer fell behind, restarting the session");
                session.stop()?;
                session.start()?;
            }
        }
    }

    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    pretty_env_logger::init();

    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(path.as_deref())?;
    let format = config.session.output_format;

    let storage = Box::leak(vec![0u8; config.session.max_store_buf_size].into_boxed_slice());
    let session = Session::new(SimulatedConverter::new(signal_source()), storage);
    session.configure(&config.session)?;

    let period = session.frame_period().ok_or("session is not configured")?;
    log::info!(
        "Sampling {} entries, {} Hz per channel, one frame every {} us",
        config.session.pattern_entries.len(),
        session.per_channel_rate().map_or(0, |rate| rate.to_Hz()),
        period.as_micros(),
    );

    let mut stats = Stats::new();
    let sampling = AtomicBool::new(true);
    session.start()?;

    let result = thread::scope(|s| {
        // Stands in for the DMA transfer-complete interrupt
        s.spawn(|| {
            while sampling.load(Ordering::Relaxed) {
                thread::sleep(std::time::Duration::from_micros(period.as_micros()));
                session.on_transfer_complete();
            }
        });

        let result = drain(&session, &config, format, &mut stats);
        sampling.store(false, Ordering::Relaxed);
        result
    });

    for ((unit, channel), channel_stats) in &stats {
        let unit = unit.map_or(String::new(), |unit| format!("{unit:?}/"));
        log::info!(
            "{unit}ch{channel}: {} samples, min {}, max {}, mean {:.1}",
            channel_stats.count,
            channel_stats.min,
            channel_stats.max,
            channel_stats.mean(),
        );
    }

    session.stop()?;
    session.destroy()?;
    result
}
