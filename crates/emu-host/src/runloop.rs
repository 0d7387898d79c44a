//! The host-thread runloop.
//!
//! One iteration: service platform events, check whether the worker is
//! done, then wait a bounded time for the next frame and present it. The
//! loop owns nothing of the session; it only reads from the surface and
//! writes into the input table.

use std::time::Duration;

use emu_core::KeyCode;
use tracing::{debug, info, trace, warn};

use crate::audio::AudioStats;
use crate::context::EmulationContext;
use crate::error::HostError;
use crate::input::{GamepadButton, HostInput, InputBindingTable};
use crate::options::RuntimeOptions;
use crate::surface::Frame;
use crate::worker::ExitStatus;

/// Something that happened on the host side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    Key { code: KeyCode, pressed: bool },
    Gamepad { button: GamepadButton, pressed: bool },
    /// The user closed the window or otherwise asked to quit.
    Quit,
}

/// The windowing side of the host.
pub trait HostPlatform {
    /// Append whatever events arrived since the last call. Must not block.
    fn poll_events(&mut self, events: &mut Vec<HostEvent>) -> Result<(), HostError>;

    /// Show a completed frame.
    fn present(&mut self, frame: &Frame) -> Result<(), HostError>;
}

/// Summary of a finished session.
#[derive(Debug)]
pub struct SessionReport {
    pub status: ExitStatus,
    pub frames_presented: u64,
    /// Frames the worker produced that never reached the screen.
    pub frames_dropped: u64,
    pub audio: AudioStats,
    /// The platform error that ended presentation early, if any.
    pub platform_error: Option<HostError>,
}

/// Drives a [`HostPlatform`] against a running [`EmulationContext`].
pub struct HostRunloop<P> {
    platform: P,
    bindings: InputBindingTable,
    poll_interval: Duration,
    events: Vec<HostEvent>,
    last_seq: Option<u64>,
    presented: u64,
    skipped: u64,
    platform_error: Option<HostError>,
}

impl<P: HostPlatform> HostRunloop<P> {
    #[must_use]
    pub fn new(platform: P, bindings: InputBindingTable, options: &RuntimeOptions) -> Self {
        Self {
            platform,
            bindings,
            poll_interval: options.poll_interval(),
            events: Vec::with_capacity(16),
            last_seq: None,
            presented: 0,
            skipped: 0,
            platform_error: None,
        }
    }

    #[must_use]
    pub fn platform(&self) -> &P {
        &self.platform
    }

    #[must_use]
    pub fn into_platform(self) -> P {
        self.platform
    }

    /// Run until the worker has finished, then join it.
    ///
    /// A faulted session is reported through [`SessionReport::status`];
    /// `Err` is reserved for the worker thread itself going down or the
    /// context being in the wrong state.
    pub fn run(&mut self, ctx: &mut EmulationContext) -> Result<SessionReport, HostError> {
        self.last_seq = None;
        self.presented = 0;
        self.skipped = 0;
        self.platform_error = None;

        loop {
            self.service_events(ctx);

            if ctx.is_terminated() {
                // onClean has run, so nothing else will be queued.
                while let Some(frame) = ctx.surface().try_take() {
                    self.show(ctx, frame);
                }
                break;
            }

            if let Some(frame) = ctx.surface().wait_frame(self.poll_interval) {
                self.show(ctx, frame);
            }
        }

        let status = ctx.join()?;
        ctx.input().release_all();

        let surface = ctx.surface();
        let report = SessionReport {
            status,
            frames_presented: self.presented,
            frames_dropped: surface.dropped() + self.skipped,
            audio: ctx.bridge().stats(),
            platform_error: self.platform_error.take(),
        };
        info!(
            presented = report.frames_presented,
            dropped = report.frames_dropped,
            underrun = report.audio.underrun_samples,
            overrun = report.audio.overrun_samples,
            "session finished"
        );
        Ok(report)
    }

    fn service_events(&mut self, ctx: &EmulationContext) {
        if self.platform_error.is_some() {
            return;
        }
        self.events.clear();
        if let Err(err) = self.platform.poll_events(&mut self.events) {
            self.fail(ctx, err);
            return;
        }

        for event in self.events.drain(..) {
            let (input, pressed) = match event {
                HostEvent::Key { code, pressed } => (HostInput::Key(code), pressed),
                HostEvent::Gamepad { button, pressed } => (HostInput::Gamepad(button), pressed),
                HostEvent::Quit => {
                    if !ctx.stop_requested() {
                        info!("quit requested");
                    }
                    ctx.request_stop();
                    continue;
                }
            };
            if let Some(button) = ctx.input().apply(&self.bindings, input, pressed) {
                trace!(?input, ?button, pressed, "input");
            }
        }
    }

    fn show(&mut self, ctx: &EmulationContext, frame: Frame) {
        let in_order = self.last_seq.is_none_or(|last| frame.seq > last);
        if !in_order || self.platform_error.is_some() {
            trace!(seq = frame.seq, "frame not presented");
            self.skipped += 1;
            ctx.surface().recycle(frame);
            return;
        }

        match self.platform.present(&frame) {
            Ok(()) => {
                self.last_seq = Some(frame.seq);
                self.presented += 1;
            }
            Err(err) => {
                self.skipped += 1;
                self.fail(ctx, err);
            }
        }
        ctx.surface().recycle(frame);
    }

    /// Stop presenting, ask the worker to wind down, and keep the error for
    /// the report.
    fn fail(&mut self, ctx: &EmulationContext, err: HostError) {
        warn!(%err, "platform failed; stopping session");
        self.platform_error = Some(err);
        ctx.request_stop();
        debug!("presentation disabled");
    }
}

impl<P> std::fmt::Debug for HostRunloop<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostRunloop")
            .field("poll_interval", &self.poll_interval)
            .field("last_seq", &self.last_seq)
            .field("presented", &self.presented)
            .finish_non_exhaustive()
    }
}
