//! The emulation worker thread.
//!
//! # Frame loop
//!
//! ```text
//! build machine ─► onStart ─► ┌─ safe point: stop flag? debugger? ─┐
//!                             │  latch input                        │
//!                             │  run_frame                          │
//!                             │  render ─► RendererSurface          │
//!                             └─ drain audio ─► AudioBridge ────────┘
//!                                          │ stop / halt / fault
//!                                          ▼
//!                                       onClean ─► exit
//! ```
//!
//! Everything that calls into machine code or user hooks runs under
//! `catch_unwind`, so a panicking core is reported as a fault and onClean
//! still runs. Anything else that unwinds the thread trips an
//! [`UnwindGuard`], which clears the audio source and settles the state so
//! the host can still join.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use emu_core::{FrameOutcome, Machine, MachineError};
use tracing::{debug, error, info, trace, warn};

use crate::audio::AudioBridge;
use crate::debugger::{Debugger, DebuggerAction};
use crate::error::{WorkerFault, panic_message};
use crate::hooks::LifecycleCoordinator;
use crate::input::InputState;
use crate::options::RuntimeOptions;
use crate::state::{SessionState, StateCell};
use crate::surface::{Frame, RendererSurface};

/// Why a session ended without a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause {
    /// The host asked the worker to stop.
    HostRequest,
    /// The machine reported [`FrameOutcome::Halted`].
    MachineHalted,
    /// The attached debugger asked for a break.
    Debugger,
}

/// How the worker finished, reported by join.
#[derive(Debug)]
pub enum ExitStatus {
    Stopped(StopCause),
    Faulted(WorkerFault),
}

impl ExitStatus {
    #[must_use]
    pub fn is_faulted(&self) -> bool {
        matches!(self, ExitStatus::Faulted(_))
    }

    #[must_use]
    pub fn fault(&self) -> Option<&WorkerFault> {
        match self {
            ExitStatus::Faulted(fault) => Some(fault),
            ExitStatus::Stopped(_) => None,
        }
    }
}

/// Identity of a session, handed to the machine factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub session: u64,
    pub options: RuntimeOptions,
}

/// State shared between the context on the host side and the worker.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub(crate) state: Arc<StateCell>,
    pub(crate) stop: AtomicBool,
    pub(crate) input: InputState,
}

impl Shared {
    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

/// Everything the worker thread owns for the duration of a session.
pub(crate) struct EmulationWorker {
    pub(crate) info: SessionInfo,
    pub(crate) shared: Arc<Shared>,
    pub(crate) surface: Arc<RendererSurface>,
    pub(crate) bridge: Arc<AudioBridge>,
    pub(crate) coordinator: LifecycleCoordinator,
    pub(crate) debugger: Option<Box<dyn Debugger>>,
}

impl EmulationWorker {
    /// Spawn the worker thread. The machine is built on that thread.
    pub(crate) fn spawn<F, M>(self, factory: F) -> std::io::Result<JoinHandle<ExitStatus>>
    where
        F: FnOnce(&SessionInfo) -> Result<M, MachineError> + Send + 'static,
        M: Machine + 'static,
    {
        thread::Builder::new()
            .name("emu-worker".into())
            .spawn(move || self.run(factory))
    }

    fn run<F, M>(mut self, factory: F) -> ExitStatus
    where
        F: FnOnce(&SessionInfo) -> Result<M, MachineError>,
        M: Machine,
    {
        let session = self.info.session;
        debug!(session, "worker thread started");
        let _guard = UnwindGuard {
            session,
            bridge: Arc::clone(&self.bridge),
            state: Arc::clone(&self.shared.state),
        };

        let built = panic::catch_unwind(AssertUnwindSafe(|| factory(&self.info)));
        let mut machine = match built {
            Ok(Ok(machine)) => machine,
            Ok(Err(err)) => return self.finish(None, ExitStatus::Faulted(WorkerFault::Init(err))),
            Err(payload) => {
                let fault = WorkerFault::Init(MachineError::Other(format!(
                    "factory panicked: {}",
                    panic_message(payload.as_ref())
                )));
                return self.finish(None, ExitStatus::Faulted(fault));
            }
        };

        let name = machine.name().to_string();
        if let Err(fault) = self.coordinator.on_start(&name, machine.audio_config()) {
            // Never attached, so it is not detached either.
            self.debugger = None;
            let status = self.finish(Some(&name), ExitStatus::Faulted(fault));
            drop(machine);
            return status;
        }
        if let Some(debugger) = self.debugger.as_mut() {
            debugger.attach(&self.info, &name);
        }
        info!(session, machine = %name, "session running");

        let status = self.frame_loop(&mut machine);
        let status = self.finish(Some(&name), status);
        // Machine memory is released only once onClean has returned.
        drop(machine);
        status
    }

    fn frame_loop<M: Machine>(&mut self, machine: &mut M) -> ExitStatus {
        let video = machine.video_config();
        let frame_len = video.frame_len();
        let options = &self.info.options;
        let mut audio = Vec::with_capacity(options.audio_buffers as usize * usize::from(options.channels));
        let mut frame: u64 = 0;

        loop {
            // Safe point.
            if self.shared.stop_requested() {
                return ExitStatus::Stopped(StopCause::HostRequest);
            }
            if let Some(debugger) = self.debugger.as_mut() {
                if debugger.at_safe_point(frame) == DebuggerAction::Break {
                    debug!(frame, "debugger break");
                    return ExitStatus::Stopped(StopCause::Debugger);
                }
            }

            machine.set_buttons(self.shared.input.snapshot());

            let stepped = panic::catch_unwind(AssertUnwindSafe(|| {
                let outcome = machine.run_frame()?;
                let mut pixels = self.surface.acquire_buffer(frame_len);
                machine.render(&mut pixels);
                audio.clear();
                machine.drain_audio(&mut audio);
                Ok::<_, MachineError>((outcome, pixels))
            }));

            let (outcome, pixels) = match stepped {
                Ok(Ok(result)) => result,
                Ok(Err(source)) => {
                    return ExitStatus::Faulted(WorkerFault::Machine { frame, source });
                }
                Err(payload) => {
                    return ExitStatus::Faulted(WorkerFault::Panic {
                        frame,
                        message: panic_message(payload.as_ref()),
                    });
                }
            };

            self.submit_frame(Frame {
                seq: frame,
                width: video.width,
                height: video.height,
                pixels,
            });
            self.push_audio(&audio);
            trace!(frame, samples = audio.len(), "frame complete");

            frame += 1;
            if outcome == FrameOutcome::Halted {
                return ExitStatus::Stopped(StopCause::MachineHalted);
            }
        }
    }

    fn submit_frame(&self, frame: Frame) {
        let shared = &self.shared;
        self.surface
            .submit(frame, self.info.options.video_sync, || shared.stop_requested());
    }

    fn push_audio(&self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        if self.info.options.audio_sync {
            let shared = &self.shared;
            self.bridge.wait_for_space(
                samples.len(),
                self.info.options.sync_timeout(),
                || shared.stop_requested(),
            );
        }
        self.bridge.push(samples);
    }

    /// Enter `Stopping`, run onClean and report. Runs exactly once per session.
    ///
    /// A panicking onClean turns a clean stop into a fault; an earlier fault
    /// takes precedence.
    fn finish(mut self, machine: Option<&str>, status: ExitStatus) -> ExitStatus {
        if let Err(err) = self.shared.state.advance(SessionState::Stopping) {
            warn!(%err, "session state out of step while stopping");
        }
        match &status {
            ExitStatus::Stopped(cause) => info!(session = self.info.session, ?cause, "session stopped"),
            ExitStatus::Faulted(fault) => warn!(session = self.info.session, %fault, "session faulted"),
        }

        if let Some(mut debugger) = self.debugger.take() {
            debugger.detach();
        }
        let cleaned = self.coordinator.on_clean(machine, &status);
        self.surface.wake();
        match (cleaned, status) {
            (Ok(()), status) => status,
            (Err(fault), ExitStatus::Stopped(_)) => ExitStatus::Faulted(fault),
            (Err(fault), status) => {
                warn!(session = self.info.session, %fault, "onClean failed after an earlier fault");
                status
            }
        }
    }
}

/// Settles a session whose worker thread is unwinding past the lifecycle.
struct UnwindGuard {
    session: u64,
    bridge: Arc<AudioBridge>,
    state: Arc<StateCell>,
}

impl Drop for UnwindGuard {
    fn drop(&mut self) {
        if !thread::panicking() {
            return;
        }
        error!(session = self.session, "worker thread unwinding; clearing audio source");
        self.bridge.clear();
        for to in [SessionState::Stopping, SessionState::Cleaned] {
            if self.state.get() < to {
                if let Err(err) = self.state.advance(to) {
                    warn!(%err, "session state out of step while unwinding");
                }
            }
        }
    }
}
