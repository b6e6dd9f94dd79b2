use core::cell::Cell;

use critical_section::{CriticalSection, Mutex};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, signal::Signal};

/// A frame that has just been completed, as seen by [`EventCallbacks::on_conv_done`].
#[derive(Debug, Clone, Copy)]
pub struct FrameEvent<'a> {
    /// The frame bytes. Only valid for the duration of the callback.
    pub data: &'a [u8],
    /// Frames completed since the session was started, counting from 0.
    pub sequence: u64,
}

pub type FrameCallback<'d> = &'d (dyn Fn(&FrameEvent<'_>) + Sync);
pub type OverflowCallback<'d> = &'d (dyn Fn() + Sync);

/// Hooks run in interrupt context.
///
/// They run with the session locked: they must return quickly and must not call back
/// into the session.
#[derive(Clone, Copy, Default)]
pub struct EventCallbacks<'d> {
    /// Called for every completed frame.
    pub on_conv_done: Option<FrameCallback<'d>>,
    /// Called once when a completion finds no free descriptor.
    pub on_pool_ovf: Option<OverflowCallback<'d>>,
}

impl core::fmt::Debug for EventCallbacks<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventCallbacks")
            .field("on_conv_done", &self.on_conv_done.is_some())
            .field("on_pool_ovf", &self.on_pool_ovf.is_some())
            .finish()
    }
}

/// Wakes the consumer blocked in `read` and runs the application callbacks.
///
/// The wake carries no payload and coalesces, so a woken consumer has to look at the
/// queue again.
pub struct Notifier<'d> {
    wake: Signal<CriticalSectionRawMutex, ()>,
    callbacks: Mutex<Cell<EventCallbacks<'d>>>,
}

impl<'d> Notifier<'d> {
    pub const fn new() -> Self {
        Self {
            wake: Signal::new(),
            callbacks: Mutex::new(Cell::new(EventCallbacks {
                on_conv_done: None,
                on_pool_ovf: None,
            })),
        }
    }

    pub fn set_callbacks(&self, callbacks: EventCallbacks<'d>) {
        critical_section::with(|cs| self.callbacks.borrow(cs).set(callbacks));
    }

    pub fn frame_ready(&self, cs: CriticalSection<'_>, event: &FrameEvent<'_>) {
        if let Some(on_conv_done) = self.callbacks.borrow(cs).get().on_conv_done {
            on_conv_done(event);
        }
        self.wake.signal(());
    }

    pub fn overflow(&self, cs: CriticalSection<'_>) {
        if let Some(on_pool_ovf) = self.callbacks.borrow(cs).get().on_pool_ovf {
            on_pool_ovf();
        }
        self.wake.signal(());
    }

    /// Wakes the consumer without a new frame, so it re-checks the session state.
    pub fn release(&self) {
        self.wake.signal(());
    }

    pub async fn wait(&self) {
        self.wake.wait().await
    }
}

impl Default for Notifier<'_> {
    fn default() -> Self {
        Self::new()
    }
}
