//! The host-side handle on one emulation session.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use emu_core::{Machine, MachineError};
use tracing::{debug, info, warn};

use crate::audio::AudioBridge;
use crate::debugger::Debugger;
use crate::error::{HostError, LifecycleError, StartupError, panic_message};
use crate::hooks::{LifecycleCoordinator, LifecycleHooks};
use crate::input::InputState;
use crate::options::RuntimeOptions;
use crate::state::SessionState;
use crate::surface::RendererSurface;
use crate::worker::{EmulationWorker, ExitStatus, SessionInfo, Shared};

/// Session ids are process-wide and never zero.
static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Owns one session: the worker thread, its shared flags, and references to
/// the host-constructed surface and audio bridge.
///
/// The surface and bridge are built by the host and outlive the context; the
/// worker only borrows them through `Arc`s and publishes or clears the audio
/// handle through the lifecycle hooks.
///
/// Dropping a context that is still running requests a stop and waits for the
/// worker to finish cooperatively.
pub struct EmulationContext {
    session: u64,
    options: RuntimeOptions,
    surface: Arc<RendererSurface>,
    bridge: Arc<AudioBridge>,
    shared: Arc<Shared>,
    hooks: Option<LifecycleHooks>,
    debugger: Option<Box<dyn Debugger>>,
    worker: Option<JoinHandle<ExitStatus>>,
}

impl EmulationContext {
    /// Create a context in the `Created` state.
    pub fn new(
        options: RuntimeOptions,
        surface: Arc<RendererSurface>,
        bridge: Arc<AudioBridge>,
    ) -> Result<Self, StartupError> {
        options.validate()?;
        Ok(Self {
            session: NEXT_SESSION.fetch_add(1, Ordering::Relaxed),
            options,
            surface,
            bridge,
            shared: Arc::new(Shared::default()),
            hooks: Some(LifecycleHooks::new()),
            debugger: None,
            worker: None,
        })
    }

    /// Install the onStart/onClean hooks. Must be called before `start`.
    #[must_use]
    pub fn with_hooks(mut self, hooks: LifecycleHooks) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Attach a debugger. Must be called before `start`.
    #[must_use]
    pub fn with_debugger(mut self, debugger: impl Debugger + 'static) -> Self {
        self.debugger = Some(Box::new(debugger));
        self
    }

    #[must_use]
    pub fn session(&self) -> u64 {
        self.session
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.state.get()
    }

    #[must_use]
    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    #[must_use]
    pub fn surface(&self) -> &Arc<RendererSurface> {
        &self.surface
    }

    #[must_use]
    pub fn bridge(&self) -> &Arc<AudioBridge> {
        &self.bridge
    }

    /// The button table the worker reads each frame.
    #[must_use]
    pub fn input(&self) -> &InputState {
        &self.shared.input
    }

    /// Start the worker thread, which builds the machine with `factory`.
    pub fn start<F, M>(&mut self, factory: F) -> Result<(), StartupError>
    where
        F: FnOnce(&SessionInfo) -> Result<M, MachineError> + Send + 'static,
        M: Machine + 'static,
    {
        let Some(hooks) = self.hooks.take() else {
            return Err(StartupError::AlreadyStarted);
        };
        if self.shared.state.advance(SessionState::Starting).is_err() {
            self.hooks = Some(hooks);
            return Err(StartupError::AlreadyStarted);
        }

        let worker = EmulationWorker {
            info: SessionInfo {
                session: self.session,
                options: self.options.clone(),
            },
            shared: Arc::clone(&self.shared),
            surface: Arc::clone(&self.surface),
            bridge: Arc::clone(&self.bridge),
            coordinator: LifecycleCoordinator::new(
                self.session,
                Arc::clone(&self.bridge),
                Arc::clone(&self.shared.state),
                hooks,
            ),
            debugger: self.debugger.take(),
        };

        match worker.spawn(factory) {
            Ok(handle) => {
                info!(session = self.session, "worker started");
                self.worker = Some(handle);
                Ok(())
            }
            Err(err) => {
                // The closure (and with it the coordinator) never ran; no hook
                // could have fired, so settle the state here.
                for to in [SessionState::Stopping, SessionState::Cleaned] {
                    if let Err(state_err) = self.shared.state.advance(to) {
                        warn!(session = self.session, %state_err, "session state out of step after spawn failure");
                    }
                }
                Err(StartupError::Spawn(err))
            }
        }
    }

    /// Ask the worker to stop at its next safe point. Idempotent.
    pub fn request_stop(&self) {
        if !self.shared.stop.swap(true, Ordering::AcqRel) {
            debug!(session = self.session, "stop requested");
        }
        self.surface.wake();
    }

    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.shared.stop_requested()
    }

    /// The worker has run onClean and is exiting, or its thread is gone.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.state().is_terminated()
            || self.worker.as_ref().is_some_and(JoinHandle::is_finished)
    }

    /// Wait for the worker to exit and report how it ended.
    ///
    /// Returns only after onClean has completed on the worker thread.
    pub fn join(&mut self) -> Result<ExitStatus, HostError> {
        let Some(handle) = self.worker.take() else {
            return Err(match self.state() {
                SessionState::Joined | SessionState::Destroyed => LifecycleError::AlreadyJoined,
                _ => LifecycleError::NotStarted,
            }
            .into());
        };

        let status = handle
            .join()
            .map_err(|payload| HostError::WorkerPanicked(panic_message(payload.as_ref())))?;
        self.shared.state.advance(SessionState::Joined)?;
        debug!(session = self.session, ?status, "worker joined");
        Ok(status)
    }
}

impl Drop for EmulationContext {
    fn drop(&mut self) {
        if self.worker.is_some() {
            warn!(session = self.session, "context dropped while running; stopping worker");
            self.request_stop();
            if let Err(err) = self.join() {
                warn!(session = self.session, %err, "worker did not join cleanly");
            }
        }
        if self.shared.state.advance(SessionState::Destroyed).is_ok() {
            debug!(session = self.session, "session destroyed");
        }
    }
}

impl std::fmt::Debug for EmulationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmulationContext")
            .field("session", &self.session)
            .field("state", &self.state())
            .field("stop_requested", &self.stop_requested())
            .field("debugger", &self.debugger.is_some())
            .finish_non_exhaustive()
    }
}
