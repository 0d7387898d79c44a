//! Lifecycle hooks and the coordinator that runs them.
//!
//! onStart and onClean are the only places where the worker's session and
//! the host's resources meet. The coordinator owns the audio side of that
//! contract (publishing and clearing the active source) and then hands over
//! to the user-supplied hooks.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use emu_core::AudioConfig;
use tracing::{debug, warn};

use crate::audio::{AudioBridge, AudioSourceHandle};
use crate::error::{WorkerFault, panic_message};
use crate::state::{SessionState, StateCell};
use crate::worker::ExitStatus;

/// What a hook gets to see.
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    pub session: u64,
    /// Machine name, absent when the machine could not be built.
    pub machine: Option<&'a str>,
    /// The audio source published for this session, if it got that far.
    pub audio: Option<AudioSourceHandle>,
    /// Why the session ended. Only set for onClean.
    pub exit: Option<&'a ExitStatus>,
}

type Hook = Box<dyn for<'a> FnOnce(&HookContext<'a>) + Send>;

/// The onStart/onClean pair.
///
/// Both run on the worker thread. Each runs at most once per session. A
/// panicking hook is caught and reported as [`WorkerFault::Hook`]; onClean
/// still runs after a panicking onStart.
#[derive(Default)]
pub struct LifecycleHooks {
    on_start: Option<Hook>,
    on_clean: Option<Hook>,
}

impl LifecycleHooks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs after the machine exists and before its first frame.
    #[must_use]
    pub fn on_start<F>(mut self, hook: F) -> Self
    where
        F: for<'a> FnOnce(&HookContext<'a>) + Send + 'static,
    {
        self.on_start = Some(Box::new(hook));
        self
    }

    /// Runs after the machine halts and the audio source is cleared, before
    /// the worker thread exits.
    #[must_use]
    pub fn on_clean<F>(mut self, hook: F) -> Self
    where
        F: for<'a> FnOnce(&HookContext<'a>) + Send + 'static,
    {
        self.on_clean = Some(Box::new(hook));
        self
    }
}

impl std::fmt::Debug for LifecycleHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleHooks")
            .field("on_start", &self.on_start.is_some())
            .field("on_clean", &self.on_clean.is_some())
            .finish()
    }
}

/// Drives the audio publish/clear protocol and the session state around the
/// user hooks.
///
/// `on_clean` consumes the coordinator, so it cannot run twice.
pub(crate) struct LifecycleCoordinator {
    session: u64,
    bridge: Arc<AudioBridge>,
    state: Arc<StateCell>,
    hooks: LifecycleHooks,
    published: Option<AudioSourceHandle>,
}

impl LifecycleCoordinator {
    pub(crate) fn new(
        session: u64,
        bridge: Arc<AudioBridge>,
        state: Arc<StateCell>,
        hooks: LifecycleHooks,
    ) -> Self {
        Self {
            session,
            bridge,
            state,
            hooks,
            published: None,
        }
    }

    /// Publish the session's audio source, enter `Running` and run the user
    /// hook.
    ///
    /// On a hook panic the source stays published; `on_clean` takes it down.
    pub(crate) fn on_start(
        &mut self,
        machine: &str,
        audio: AudioConfig,
    ) -> Result<AudioSourceHandle, WorkerFault> {
        let handle = AudioSourceHandle {
            session: self.session,
            sample_rate: audio.sample_rate,
            channels: audio.channels,
        };

        let output = self.bridge.output_format();
        if output.sample_rate != audio.sample_rate || output.channels != audio.channels {
            warn!(
                machine,
                machine_rate = audio.sample_rate,
                machine_channels = audio.channels,
                output_rate = output.sample_rate,
                output_channels = output.channels,
                "machine audio format differs from the output device; playback will be off-pitch"
            );
        }

        self.bridge.publish(handle);
        self.published = Some(handle);
        if let Err(err) = self.state.advance(SessionState::Running) {
            self.bridge.clear();
            self.published = None;
            return Err(WorkerFault::Lifecycle(err));
        }
        debug!(session = self.session, machine, "onStart: audio source published");

        if let Some(hook) = self.hooks.on_start.take() {
            let ctx = HookContext {
                session: self.session,
                machine: Some(machine),
                audio: Some(handle),
                exit: None,
            };
            run_hook("onStart", hook, &ctx)?;
        }
        Ok(handle)
    }

    /// Clear the audio source, run the user hook and enter `Cleaned`.
    ///
    /// When this returns no audio callback can still be reading on behalf of
    /// the session, and the state is `Cleaned` even if the hook panicked.
    pub(crate) fn on_clean(
        mut self,
        machine: Option<&str>,
        exit: &ExitStatus,
    ) -> Result<(), WorkerFault> {
        self.bridge.clear();
        debug!(session = self.session, "onClean: audio source cleared");

        let outcome = match self.hooks.on_clean.take() {
            Some(hook) => {
                let ctx = HookContext {
                    session: self.session,
                    machine,
                    audio: self.published,
                    exit: Some(exit),
                };
                run_hook("onClean", hook, &ctx)
            }
            None => Ok(()),
        };

        if let Err(err) = self.state.advance(SessionState::Cleaned) {
            warn!(%err, "session state out of step during onClean");
        }
        outcome
    }
}

fn run_hook(name: &'static str, hook: Hook, ctx: &HookContext<'_>) -> Result<(), WorkerFault> {
    panic::catch_unwind(AssertUnwindSafe(|| hook(ctx))).map_err(|payload| {
        let message = panic_message(payload.as_ref());
        warn!(hook = name, %message, "lifecycle hook panicked");
        WorkerFault::Hook {
            hook: name,
            message,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::OutputFormat;
    use crate::worker::StopCause;
    use std::sync::Mutex;

    const FORMAT: AudioConfig = AudioConfig {
        sample_rate: 44_100,
        channels: 2,
    };

    fn setup() -> (Arc<AudioBridge>, Arc<StateCell>) {
        let bridge = Arc::new(AudioBridge::new(
            OutputFormat {
                sample_rate: 44_100,
                channels: 2,
            },
            64,
        ));
        let state = Arc::new(StateCell::new());
        state.advance(SessionState::Starting).unwrap();
        (bridge, state)
    }

    #[test]
    fn start_publishes_and_clean_clears() {
        let (bridge, state) = setup();
        let mut coordinator =
            LifecycleCoordinator::new(9, Arc::clone(&bridge), Arc::clone(&state), LifecycleHooks::new());

        let handle = coordinator.on_start("test", FORMAT).unwrap();
        assert_eq!(handle.session, 9);
        assert_eq!(bridge.active_source(), Some(handle));
        assert_eq!(state.get(), SessionState::Running);

        state.advance(SessionState::Stopping).unwrap();
        coordinator
            .on_clean(Some("test"), &ExitStatus::Stopped(StopCause::HostRequest))
            .unwrap();
        assert_eq!(bridge.active_source(), None);
        assert_eq!(state.get(), SessionState::Cleaned);
    }

    #[test]
    fn hooks_see_session_details() {
        let (bridge, state) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));

        let hooks = LifecycleHooks::new()
            .on_start({
                let log = Arc::clone(&log);
                move |ctx| {
                    log.lock().unwrap().push(format!(
                        "start {} {:?} {}",
                        ctx.session,
                        ctx.machine,
                        ctx.audio.is_some()
                    ));
                }
            })
            .on_clean({
                let log = Arc::clone(&log);
                let bridge = Arc::clone(&bridge);
                move |ctx| {
                    // The source is already gone when the user hook runs.
                    assert!(bridge.active_source().is_none());
                    log.lock()
                        .unwrap()
                        .push(format!("clean {} {}", ctx.session, ctx.exit.is_some()));
                }
            });

        let mut coordinator =
            LifecycleCoordinator::new(3, Arc::clone(&bridge), Arc::clone(&state), hooks);
        coordinator.on_start("demo", FORMAT).unwrap();
        state.advance(SessionState::Stopping).unwrap();
        coordinator
            .on_clean(Some("demo"), &ExitStatus::Stopped(StopCause::MachineHalted))
            .unwrap();

        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec!["start 3 Some(\"demo\") true".to_string(), "clean 3 true".to_string()]
        );
    }

    #[test]
    fn start_after_stop_is_refused() {
        let (bridge, state) = setup();
        state.advance(SessionState::Stopping).unwrap();
        let mut coordinator =
            LifecycleCoordinator::new(1, Arc::clone(&bridge), state, LifecycleHooks::new());

        assert!(matches!(
            coordinator.on_start("late", FORMAT),
            Err(WorkerFault::Lifecycle(_))
        ));
        assert_eq!(bridge.active_source(), None);
    }

    #[test]
    fn panicking_on_start_leaves_cleanup_to_on_clean() {
        let (bridge, state) = setup();
        let hooks = LifecycleHooks::new().on_start(|_| panic!("no window"));
        let mut coordinator =
            LifecycleCoordinator::new(4, Arc::clone(&bridge), Arc::clone(&state), hooks);

        match coordinator.on_start("demo", FORMAT) {
            Err(WorkerFault::Hook { hook, message }) => {
                assert_eq!(hook, "onStart");
                assert_eq!(message, "no window");
            }
            other => panic!("expected a hook fault, got {other:?}"),
        }
        assert!(bridge.active_source().is_some());

        state.advance(SessionState::Stopping).unwrap();
        let exit = ExitStatus::Stopped(StopCause::HostRequest);
        coordinator.on_clean(Some("demo"), &exit).unwrap();
        assert_eq!(bridge.active_source(), None);
        assert_eq!(state.get(), SessionState::Cleaned);
    }

    #[test]
    fn panicking_on_clean_still_reaches_cleaned() {
        let (bridge, state) = setup();
        let hooks = LifecycleHooks::new().on_clean(|_| panic!("flush failed"));
        let mut coordinator =
            LifecycleCoordinator::new(5, Arc::clone(&bridge), Arc::clone(&state), hooks);
        coordinator.on_start("demo", FORMAT).unwrap();
        state.advance(SessionState::Stopping).unwrap();

        let result = coordinator.on_clean(Some("demo"), &ExitStatus::Stopped(StopCause::MachineHalted));

        assert!(matches!(result, Err(WorkerFault::Hook { hook: "onClean", .. })));
        assert_eq!(bridge.active_source(), None);
        assert_eq!(state.get(), SessionState::Cleaned);
    }
}
