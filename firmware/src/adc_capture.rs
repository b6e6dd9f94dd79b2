mod frame_queue;
mod notifier;
mod ring_buffer;

use core::{cell::RefCell, pin::pin};

use adc_stream_core::AcquisitionConfig;
use critical_section::Mutex;
use embassy_time::{Duration, Instant, Timer};
use fugit::HertzU32;
use futures::FutureExt;

use frame_queue::{FrameLease, FrameQueue};
pub use notifier::{EventCallbacks, FrameCallback, FrameEvent, OverflowCallback};
use notifier::Notifier;
pub use ring_buffer::DmaGrant;

use crate::{
    error::Error,
    sampler::{Converter, ScanPlan},
};

/// Lifecycle of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    Created,
    Configured,
    Running,
    Stopped,
    /// The descriptor chain overflowed. Queued frames can still be read; sampling
    /// resumes only after `stop` and `start`.
    Errored,
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReadStatus {
    /// At least one frame was copied.
    Data,
    /// No frame arrived before the deadline, or the session was stopped while waiting.
    Timeout,
    /// The session overflowed. `len` may still be non-zero while queued frames drain.
    Overflow,
}

/// Outcome of [`Session::read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Read {
    /// Bytes written to the caller's buffer, always a whole number of frames.
    pub len: usize,
    pub status: ReadStatus,
}

impl Read {
    const fn empty(status: ReadStatus) -> Self {
        Self { len: 0, status }
    }
}

struct Shared<'d, C> {
    lifecycle: State,
    converter: C,
    plan: Option<ScanPlan>,
    queue: FrameQueue<'d>,
    /// Bumped by `stop` and `destroy`, so a waiting `read` notices even if sampling was
    /// restarted before it woke up.
    stops: u32,
}

/// One step of draining the queue into a caller's buffer.
enum Step {
    Frame(FrameLease),
    Drained { overflowed: bool },
    Released,
}

impl<C> Shared<'_, C> {
    /// The lifecycle as callers see it. Overflow is only flagged by the interrupt side,
    /// so it is folded in here.
    fn state(&self) -> State {
        match self.lifecycle {
            State::Running if self.queue.overflowed() => State::Errored,
            lifecycle => lifecycle,
        }
    }

    fn require(&self, allowed: &[State]) -> Result<State, Error> {
        let state = self.state();
        if allowed.contains(&state) {
            Ok(state)
        } else {
            Err(Error::InvalidState(state))
        }
    }
}

/// A continuous acquisition session: one converter, one storage area cut into a chain
/// of frames, one consumer.
///
/// All methods take `&self`, so a session can be shared between the consumer and the
/// DMA interrupt handler, which calls [`Session::on_transfer_complete`].
pub struct Session<'d, C: Converter> {
    shared: Mutex<RefCell<Shared<'d, C>>>,
    notifier: Notifier<'d>,
}

impl<'d, C: Converter> Session<'d, C> {
    pub fn new(converter: C, storage: &'d mut [u8]) -> Self {
        Self {
            shared: Mutex::new(RefCell::new(Shared {
                lifecycle: State::Created,
                converter,
                plan: None,
                queue: FrameQueue::new(storage),
                stops: 0,
            })),
            notifier: Notifier::new(),
        }
    }

    fn access<R>(&self, f: impl FnOnce(&mut Shared<'d, C>) -> R) -> R {
        critical_section::with(|cs| f(&mut self.shared.borrow_ref_mut(cs)))
    }

    pub fn state(&self) -> State {
        self.access(|shared| shared.state())
    }

    /// Validates `config` against the converter and carves the descriptor chain.
    ///
    /// Legal before the first start and while stopped. A rejected configuration leaves
    /// the session exactly as it was.
    pub fn configure(&self, config: &AcquisitionConfig) -> Result<(), Error> {
        let plan = self.access(|shared| -> Result<ScanPlan, Error> {
            shared.require(&[State::Created, State::Configured, State::Stopped])?;

            let plan = ScanPlan::new(config, &shared.converter.capabilities())?;
            shared
                .queue
                .rebuild(plan.frame_size(), plan.chain_depth())?;
            shared.converter.configure(&plan);
            shared.plan = Some(plan.clone());
            shared.lifecycle = State::Configured;
            Ok(plan)
        })?;

        log::debug!(
            "Configured {} entries at {} Hz: {} frames of {} bytes",
            plan.pattern().len(),
            plan.sample_freq().to_Hz(),
            plan.chain_depth(),
            plan.frame_size(),
        );
        Ok(())
    }

    /// Replaces the completion and overflow callbacks. Not allowed while sampling.
    pub fn register_event_callbacks(&self, callbacks: EventCallbacks<'d>) -> Result<(), Error> {
        self.access(|shared| {
            shared.require(&[State::Created, State::Configured, State::Stopped])
        })?;
        self.notifier.set_callbacks(callbacks);
        Ok(())
    }

    /// Arms the first descriptor and starts conversions.
    pub fn start(&self) -> Result<(), Error> {
        self.access(|shared| {
            match shared.state() {
                State::Configured | State::Stopped => {}
                State::Running => return Err(Error::HardwareBusy),
                state => return Err(Error::InvalidState(state)),
            }

            shared.queue.reset();
            let grant = shared
                .queue
                .arm()
                .ok_or(Error::InvalidState(shared.lifecycle))?;

            shared.converter.load(grant);
            shared.converter.start();
            shared.lifecycle = State::Running;
            Ok(())
        })?;

        log::debug!("Sampling started");
        Ok(())
    }

    /// Interrupt-context entry point, called once per transfer-complete interrupt.
    ///
    /// Queues the filled frame, hands the converter the next free descriptor and wakes
    /// the consumer. If no descriptor is free the converter is stopped and the session
    /// enters [`State::Errored`]. Does nothing unless the session is running.
    pub fn on_transfer_complete(&self) {
        critical_section::with(|cs| {
            let mut shared = self.shared.borrow_ref_mut(cs);
            let shared = &mut *shared;
            if shared.state() != State::Running {
                return;
            }

            let Some(grant) = shared.converter.take_completed() else {
                return;
            };
            let Some(completion) = shared.queue.complete(grant) else {
                return;
            };

            let overflowed = match completion.next {
                Some(next) => {
                    shared.converter.load(next);
                    false
                }
                None => {
                    // Hardware must not run without a descriptor to write into
                    let _ = shared.converter.stop();
                    true
                }
            };

            log::trace!("Frame {} done", completion.sequence);
            self.notifier.frame_ready(
                cs,
                &FrameEvent {
                    data: shared.queue.frame(completion.descriptor),
                    sequence: completion.sequence,
                },
            );

            if overflowed {
                log::warn!(
                    "Descriptor chain exhausted after frame {}, sampling halted",
                    completion.sequence
                );
                self.notifier.overflow(cs);
            }
        });
    }

    /// Copies whole frames into `buffer`, waiting up to `timeout` for the first one.
    ///
    /// Returns as soon as at least one frame is available, concatenating as many queued
    /// frames as fit. A `timeout` of zero never waits. After an overflow the queued
    /// frames are still delivered, but with [`ReadStatus::Overflow`], and once they are
    /// drained every call reports the overflow immediately.
    ///
    /// If the session is stopped while waiting the call returns with no data, even if
    /// it was started again before the caller woke up.
    pub async fn read(&self, buffer: &mut [u8], timeout: Duration) -> Result<Read, Error> {
        let deadline = Instant::now()
            .checked_add(timeout)
            .unwrap_or(Instant::MAX);
        let mut stops = None;

        loop {
            if let Some(read) = self.take_frames(buffer, &mut stops)? {
                return Ok(read);
            }
            if timeout == Duration::from_ticks(0) || Instant::now() >= deadline {
                return Ok(Read::empty(ReadStatus::Timeout));
            }

            let mut woken = pin!(self.notifier.wait().fuse());
            let mut expired = pin!(Timer::at(deadline).fuse());
            futures::select_biased! {
                _ = woken => {}
                _ = expired => {}
            }
        }
    }

    /// Copies queued frames into `buffer` one at a time. The lock is held only to lease
    /// and return each frame, never during the copy. `None` means nothing was queued.
    fn take_frames(
        &self,
        buffer: &mut [u8],
        stops: &mut Option<u32>,
    ) -> Result<Option<Read>, Error> {
        let mut len = 0;

        loop {
            let step = self.access(|shared| -> Result<Step, Error> {
                if *stops.get_or_insert(shared.stops) != shared.stops {
                    return Ok(Step::Released);
                }
                shared.require(&[State::Running, State::Errored])?;

                let frame_size = shared.plan.as_ref().map_or(0, ScanPlan::frame_size);
                if buffer.len() < frame_size {
                    return Err(Error::BufferTooSmall {
                        len: buffer.len(),
                        frame_size,
                    });
                }

                let lease = if buffer.len() - len >= frame_size {
                    shared.queue.lease_front()
                } else {
                    None
                };
                Ok(match lease {
                    Some(lease) => Step::Frame(lease),
                    None => Step::Drained {
                        overflowed: shared.queue.overflowed(),
                    },
                })
            })?;

            let overflowed = match step {
                Step::Frame(lease) => {
                    let frame_len = lease.len();
                    lease.copy_to(&mut buffer[len..]);
                    if self.access(|shared| shared.queue.finish_lease(lease)) {
                        len += frame_len;
                    }
                    continue;
                }
                Step::Drained { overflowed } => overflowed,
                Step::Released if len == 0 => return Ok(Some(Read::empty(ReadStatus::Timeout))),
                Step::Released => false,
            };

            return Ok(if overflowed {
                Some(Read {
                    len,
                    status: ReadStatus::Overflow,
                })
            } else if len > 0 {
                Some(Read {
                    len,
                    status: ReadStatus::Data,
                })
            } else {
                None
            });
        }
    }

    /// Drops queued frames without stopping the converter. Returns how many were
    /// dropped. An overflow stays in effect.
    pub fn flush(&self) -> Result<usize, Error> {
        let dropped = self.access(|shared| {
            shared.require(&[State::Running, State::Errored])?;
            Ok::<_, Error>(shared.queue.discard())
        })?;

        log::debug!("Flushed {dropped} frames");
        Ok(dropped)
    }

    /// Stops conversions, drops unread frames and releases a blocked `read`.
    pub fn stop(&self) -> Result<(), Error> {
        let dropped = self.access(|shared| {
            shared.require(&[State::Running, State::Errored])?;

            // The loaded descriptor's contents are incomplete
            let _ = shared.converter.stop();
            let dropped = shared.queue.queued();
            shared.queue.reset();
            shared.lifecycle = State::Stopped;
            shared.stops = shared.stops.wrapping_add(1);
            Ok::<_, Error>(dropped)
        })?;
        self.notifier.release();

        log::debug!("Sampling stopped, {dropped} unread frames dropped");
        Ok(())
    }

    /// Releases the frame storage and callbacks. The session can not be used
    /// afterwards.
    pub fn destroy(&self) -> Result<(), Error> {
        self.access(|shared| {
            shared.require(&[
                State::Created,
                State::Configured,
                State::Stopped,
                State::Errored,
            ])?;

            let _ = shared.converter.stop();
            shared.queue.release();
            shared.plan = None;
            shared.lifecycle = State::Destroyed;
            shared.stops = shared.stops.wrapping_add(1);
            Ok::<_, Error>(())
        })?;
        self.notifier.set_callbacks(EventCallbacks::default());
        self.notifier.release();

        log::debug!("Session destroyed");
        Ok(())
    }

    fn with_plan<R>(&self, f: impl FnOnce(&ScanPlan) -> R) -> Option<R> {
        self.access(|shared| shared.plan.as_ref().map(f))
    }

    /// Bytes per frame, once configured.
    pub fn frame_size(&self) -> Option<usize> {
        self.with_plan(ScanPlan::frame_size)
    }

    pub fn chain_depth(&self) -> Option<usize> {
        self.with_plan(ScanPlan::chain_depth)
    }

    /// Effective sample rate of each pattern entry.
    pub fn per_channel_rate(&self) -> Option<HertzU32> {
        self.with_plan(ScanPlan::per_channel_rate)
    }

    /// Time the converter needs to fill one frame.
    pub fn frame_period(&self) -> Option<Duration> {
        self.with_plan(ScanPlan::frame_period)
    }

    pub fn plan(&self) -> Option<ScanPlan> {
        self.with_plan(ScanPlan::clone)
    }

    /// Gives back the converter and the frame storage.
    pub fn release(self) -> (C, &'d mut [u8]) {
        let shared = self.shared.into_inner().into_inner();
        (shared.converter, shared.queue.into_storage())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicU64, AtomicUsize, Ordering},
        thread,
    };

    use adc_stream_core::{
        ConvMode, OutputFormat, PatternEntry, PatternTable, SampleRecord, Unit, MAX_PATTERN_LEN,
    };
    use futures::executor::block_on;
    use proptest::prelude::*;

    use super::*;
    use crate::{error::ConfigError, sim::SimulatedConverter};

    /// Every record carries its conversion number, so order is visible in the data.
    fn counter(_unit: Unit, _channel: u8, n: u64) -> u16 {
        n as u16
    }

    type TestConverter = SimulatedConverter<fn(Unit, u8, u64) -> u16>;

    fn converter() -> TestConverter {
        SimulatedConverter::new(counter as fn(Unit, u8, u64) -> u16)
    }

    fn config(channels: &[u8]) -> AcquisitionConfig {
        AcquisitionConfig {
            max_store_buf_size: 1024,
            conv_frame_size: 256,
            pattern_entries: channels
                .iter()
                .map(|&channel| PatternEntry::full_scale(Unit::A, channel))
                .collect(),
            sample_freq_hz: 20_000,
            conv_mode: ConvMode::SingleUnitA,
            output_format: OutputFormat::ValueLow,
        }
    }

    fn records(frame: &[u8]) -> Vec<SampleRecord> {
        OutputFormat::ValueLow.records(frame).collect()
    }

    fn read_now(session: &Session<'_, TestConverter>, buffer: &mut [u8]) -> Read {
        block_on(session.read(buffer, Duration::from_ticks(0))).unwrap()
    }

    #[test]
    fn two_channel_scenario() {
        let mut storage = [0u8; 1024];
        let session = Session::new(converter(), &mut storage);
        session.configure(&config(&[0, 3])).unwrap();
        assert_eq!(session.chain_depth(), Some(4));
        assert_eq!(session.per_channel_rate(), Some(HertzU32::Hz(10_000)));

        session.start().unwrap();
        let period = session.frame_period().unwrap();

        let mut buffer = [0u8; 256];
        let read = thread::scope(|s| {
            s.spawn(|| {
                thread::sleep(std::time::Duration::from_micros(period.as_micros()));
                session.on_transfer_complete();
            });
            block_on(session.read(&mut buffer, Duration::from_millis(1000)))
        })
        .unwrap();

        assert_eq!(
            read,
            Read {
                len: 256,
                status: ReadStatus::Data
            }
        );
        let records = records(&buffer);
        assert_eq!(records.len(), 128);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.channel, [0, 3][i % 2]);
            assert_eq!(record.value, i as u16);
        }
    }

    #[test]
    fn zero_timeout_never_waits() {
        let mut storage = [0u8; 1024];
        let session = Session::new(converter(), &mut storage);
        session.configure(&config(&[0])).unwrap();
        session.start().unwrap();

        let mut buffer = [0u8; 256];
        assert_eq!(
            read_now(&session, &mut buffer),
            Read::empty(ReadStatus::Timeout)
        );

        let started = Instant::now();
        let read = block_on(session.read(&mut buffer, Duration::from_millis(20))).unwrap();
        assert_eq!(read, Read::empty(ReadStatus::Timeout));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn start_while_running_is_busy() {
        let mut storage = [0u8; 1024];
        let session = Session::new(converter(), &mut storage);
        session.configure(&config(&[0, 3])).unwrap();
        session.start().unwrap();

        assert_eq!(session.start(), Err(Error::HardwareBusy));
        assert_eq!(session.state(), State::Running);

        session.on_transfer_complete();
        let mut buffer = [0u8; 256];
        assert_eq!(read_now(&session, &mut buffer).status, ReadStatus::Data);
    }

    #[test]
    fn fast_consumer_sees_every_frame_in_order() {
        let mut storage = [0u8; 1024];
        let session = Session::new(converter(), &mut storage);
        session.configure(&config(&[1, 2, 5])).unwrap();
        session.start().unwrap();

        let mut buffer = [0u8; 512];
        let mut expected = 0u16;
        for round in 0..20 {
            // Alternate one and two frames per read
            let frames = 1 + round % 2;
            for _ in 0..frames {
                session.on_transfer_complete();
            }

            let read = read_now(&session, &mut buffer);
            assert_eq!(read.status, ReadStatus::Data);
            assert_eq!(read.len, frames * 256);
            for record in records(&buffer[..read.len]) {
                assert_eq!(record.value, expected & 0xFFF);
                expected = expected.wrapping_add(1);
            }
        }
        assert_eq!(session.state(), State::Running);
    }

    #[test]
    fn overflow_is_sticky_until_restart() {
        let mut storage = [0u8; 1024];
        let session = Session::new(converter(), &mut storage);
        session.configure(&config(&[0, 3])).unwrap();
        session.start().unwrap();

        for _ in 0..3 {
            session.on_transfer_complete();
        }
        assert_eq!(session.state(), State::Running);

        // The fourth completion finds no free descriptor
        session.on_transfer_complete();
        assert_eq!(session.state(), State::Errored);
        // The converter is halted, further interrupts change nothing
        session.on_transfer_complete();

        let mut buffer = [0u8; 256];
        for frame in 0..4u16 {
            let read = read_now(&session, &mut buffer);
            assert_eq!(
                read,
                Read {
                    len: 256,
                    status: ReadStatus::Overflow
                }
            );
            assert_eq!(records(&buffer)[0].value, frame * 128);
        }
        let read = block_on(session.read(&mut buffer, Duration::from_millis(500))).unwrap();
        assert_eq!(read, Read::empty(ReadStatus::Overflow));

        assert_eq!(session.start(), Err(Error::InvalidState(State::Errored)));
        assert_eq!(session.flush(), Ok(0));
        assert_eq!(session.state(), State::Errored);

        session.stop().unwrap();
        assert_eq!(session.state(), State::Stopped);
        session.start().unwrap();
        session.on_transfer_complete();
        assert_eq!(read_now(&session, &mut buffer).status, ReadStatus::Data);
        // Restarting restarts the scan
        assert_eq!(records(&buffer)[0].channel, 0);
    }

    #[test]
    fn stop_releases_blocked_read() {
        let mut storage = [0u8; 1024];
        let session = Session::new(converter(), &mut storage);
        session.configure(&config(&[0])).unwrap();
        session.start().unwrap();

        let mut buffer = [0u8; 256];
        let started = Instant::now();
        let read = thread::scope(|s| {
            s.spawn(|| {
                thread::sleep(std::time::Duration::from_millis(50));
                session.stop().unwrap();
            });
            block_on(session.read(&mut buffer, Duration::from_secs(10)))
        })
        .unwrap();

        assert_eq!(read, Read::empty(ReadStatus::Timeout));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(session.state(), State::Stopped);
    }

    #[test]
    fn restart_still_releases_blocked_read() {
        let mut storage = [0u8; 1024];
        let session = Session::new(converter(), &mut storage);
        session.configure(&config(&[0])).unwrap();
        session.start().unwrap();

        let mut buffer = [0u8; 256];
        let started = Instant::now();
        let read = thread::scope(|s| {
            s.spawn(|| {
                thread::sleep(std::time::Duration::from_millis(50));
                session.stop().unwrap();
                session.start().unwrap();
            });
            block_on(session.read(&mut buffer, Duration::from_secs(10)))
        })
        .unwrap();

        assert_eq!(read, Read::empty(ReadStatus::Timeout));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(session.state(), State::Running);

        // The next read waits for new frames as usual
        session.on_transfer_complete();
        assert_eq!(read_now(&session, &mut buffer).status, ReadStatus::Data);
    }

    #[test]
    fn reads_interleave_with_completions() {
        let mut storage = [0u8; 1024];
        let session = Session::new(converter(), &mut storage);
        session.configure(&config(&[0])).unwrap();
        session.start().unwrap();
        let frame_size = session.frame_size().unwrap();

        // Each frame read frees its descriptor, so the chain never runs dry
        let mut buffer = vec![0u8; frame_size];
        let mut next = 0u16;
        for _ in 0..3 * session.chain_depth().unwrap() {
            session.on_transfer_complete();
            session.on_transfer_complete();
            for _ in 0..2 {
                let read = read_now(&session, &mut buffer);
                assert_eq!(read.len, frame_size);
                for record in records(&buffer) {
                    assert_eq!(record.value, next & 0xFFF);
                    next = next.wrapping_add(1);
                }
            }
        }
        assert_eq!(session.state(), State::Running);
    }

    #[test]
    fn stop_discards_unread_frames() {
        let mut storage = [0u8; 1024];
        let session = Session::new(converter(), &mut storage);
        session.configure(&config(&[0])).unwrap();
        session.start().unwrap();
        session.on_transfer_complete();
        session.on_transfer_complete();

        session.stop().unwrap();
        session.start().unwrap();

        let mut buffer = [0u8; 1024];
        assert_eq!(
            read_now(&session, &mut buffer),
            Read::empty(ReadStatus::Timeout)
        );
    }

    #[test]
    fn flush_keeps_sampling() {
        let mut storage = [0u8; 1024];
        let session = Session::new(converter(), &mut storage);
        session.configure(&config(&[0])).unwrap();
        session.start().unwrap();
        session.on_transfer_complete();
        session.on_transfer_complete();

        assert_eq!(session.flush(), Ok(2));
        session.on_transfer_complete();

        let mut buffer = [0u8; 1024];
        let read = read_now(&session, &mut buffer);
        assert_eq!(read.len, 256);
        assert_eq!(records(&buffer)[0].value, 2 * 128);
    }

    #[test]
    fn illegal_transitions_have_no_effect() {
        let mut storage = [0u8; 1024];
        let session = Session::new(converter(), &mut storage);
        let mut buffer = [0u8; 256];

        assert_eq!(session.start(), Err(Error::InvalidState(State::Created)));
        assert_eq!(session.stop(), Err(Error::InvalidState(State::Created)));
        assert_eq!(
            block_on(session.read(&mut buffer, Duration::from_millis(10))),
            Err(Error::InvalidState(State::Created))
        );
        assert_eq!(session.flush(), Err(Error::InvalidState(State::Created)));
        assert_eq!(session.frame_size(), None);

        session.configure(&config(&[0])).unwrap();
        assert_eq!(session.stop(), Err(Error::InvalidState(State::Configured)));

        session.start().unwrap();
        assert_eq!(
            session.configure(&config(&[1])),
            Err(Error::InvalidState(State::Running))
        );
        assert_eq!(
            session.register_event_callbacks(EventCallbacks::default()),
            Err(Error::InvalidState(State::Running))
        );
        assert_eq!(session.destroy(), Err(Error::InvalidState(State::Running)));
        assert_eq!(session.state(), State::Running);

        session.stop().unwrap();
        assert_eq!(session.stop(), Err(Error::InvalidState(State::Stopped)));
        assert_eq!(
            block_on(session.read(&mut buffer, Duration::from_ticks(0))),
            Err(Error::InvalidState(State::Stopped))
        );

        session.destroy().unwrap();
        assert_eq!(session.state(), State::Destroyed);
        assert_eq!(session.destroy(), Err(Error::InvalidState(State::Destroyed)));
        assert_eq!(
            session.configure(&config(&[0])),
            Err(Error::InvalidState(State::Destroyed))
        );
        assert_eq!(session.start(), Err(Error::InvalidState(State::Destroyed)));

        let (_, storage) = session.release();
        assert_eq!(storage.len(), 1024);
    }

    #[test]
    fn rejected_configuration_changes_nothing() {
        let mut storage = [0u8; 1024];
        let session = Session::new(converter(), &mut storage);
        session.configure(&config(&[0, 3])).unwrap();

        assert_eq!(
            session.configure(&config(&[])),
            Err(Error::InvalidConfig(ConfigError::EmptyPattern))
        );
        let oversized = AcquisitionConfig {
            max_store_buf_size: 2048,
            ..config(&[0])
        };
        assert_eq!(
            session.configure(&oversized),
            Err(Error::InvalidConfig(ConfigError::StorageTooSmall {
                requested: 2048,
                available: 1024
            }))
        );

        assert_eq!(session.state(), State::Configured);
        assert_eq!(session.chain_depth(), Some(4));
        assert_eq!(session.plan().unwrap().pattern().len(), 2);

        // Reconfiguring while stopped is allowed
        session.start().unwrap();
        session.stop().unwrap();
        let smaller = AcquisitionConfig {
            conv_frame_size: 128,
            ..config(&[7])
        };
        session.configure(&smaller).unwrap();
        assert_eq!(session.frame_size(), Some(128));
        assert_eq!(session.chain_depth(), Some(8));
    }

    #[test]
    fn buffer_must_hold_a_frame() {
        let mut storage = [0u8; 1024];
        let session = Session::new(converter(), &mut storage);
        session.configure(&config(&[0])).unwrap();
        session.start().unwrap();
        session.on_transfer_complete();

        let mut buffer = [0u8; 100];
        assert_eq!(
            block_on(session.read(&mut buffer, Duration::from_millis(10))),
            Err(Error::BufferTooSmall {
                len: 100,
                frame_size: 256
            })
        );

        // Only whole frames are delivered
        let mut buffer = [0u8; 400];
        assert_eq!(read_now(&session, &mut buffer).len, 256);
    }

    #[test]
    fn callbacks_run_per_frame_and_on_overflow() {
        let frames = AtomicUsize::new(0);
        let last_sequence = AtomicU64::new(u64::MAX);
        let overflows = AtomicUsize::new(0);
        let on_done = |event: &FrameEvent<'_>| {
            assert_eq!(event.data.len(), 256);
            frames.fetch_add(1, Ordering::Relaxed);
            last_sequence.store(event.sequence, Ordering::Relaxed);
        };
        let on_ovf = || {
            overflows.fetch_add(1, Ordering::Relaxed);
        };

        let mut storage = [0u8; 1024];
        let session = Session::new(converter(), &mut storage);
        session
            .register_event_callbacks(EventCallbacks {
                on_conv_done: Some(&on_done),
                on_pool_ovf: Some(&on_ovf),
            })
            .unwrap();
        session.configure(&config(&[0, 3])).unwrap();
        session.start().unwrap();

        for _ in 0..6 {
            session.on_transfer_complete();
        }

        assert_eq!(frames.load(Ordering::Relaxed), 4);
        assert_eq!(last_sequence.load(Ordering::Relaxed), 3);
        assert_eq!(overflows.load(Ordering::Relaxed), 1);

        session.stop().unwrap();
        session.destroy().unwrap();
    }

    #[test]
    fn undersized_storage_is_rejected() {
        let mut storage = [0u8; 512];
        let session = Session::new(converter(), &mut storage);
        assert_eq!(
            session.configure(&config(&[0])),
            Err(Error::InvalidConfig(ConfigError::StorageTooSmall {
                requested: 1024,
                available: 512
            }))
        );
        assert_eq!(session.state(), State::Created);
    }

    fn channels_strategy() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(0u8..10, 1..=MAX_PATTERN_LEN)
    }

    proptest! {
        #[test]
        fn drained_records_cycle_through_table(channels in channels_strategy(), frames in 1usize..4) {
            let mut storage = [0u8; 1024];
            let session = Session::new(converter(), &mut storage);
            session.configure(&config(&channels)).unwrap();
            session.start().unwrap();

            for _ in 0..frames {
                session.on_transfer_complete();
            }

            let mut buffer = [0u8; 1024];
            let read = read_now(&session, &mut buffer);
            prop_assert_eq!(read.len, frames * 256);

            let table: PatternTable = config(&channels).pattern_entries;
            for (i, record) in records(&buffer[..read.len]).iter().enumerate() {
                prop_assert_eq!(record.channel, table[i % table.len()].channel);
            }
        }
    }
}
