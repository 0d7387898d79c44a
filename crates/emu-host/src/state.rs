//! Session state machine.

use std::sync::atomic::{AtomicU8, Ordering};

use tracing::debug;

use crate::error::LifecycleError;

/// Lifecycle of one emulation session.
///
/// States only ever move forward. The worker thread drives
/// `Starting..=Cleaned`; the host drives the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum SessionState {
    Created = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
    Cleaned = 4,
    Joined = 5,
    Destroyed = 6,
}

impl SessionState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SessionState::Created,
            1 => SessionState::Starting,
            2 => SessionState::Running,
            3 => SessionState::Stopping,
            4 => SessionState::Cleaned,
            5 => SessionState::Joined,
            _ => SessionState::Destroyed,
        }
    }

    /// Whether `self -> to` is an edge of the lifecycle graph.
    ///
    /// `Starting -> Stopping` covers a machine that could not be built, and
    /// `Created -> Destroyed` a context dropped without being started.
    #[must_use]
    pub const fn can_advance_to(self, to: SessionState) -> bool {
        use SessionState::{Cleaned, Created, Destroyed, Joined, Running, Starting, Stopping};
        matches!(
            (self, to),
            (Created, Starting | Destroyed)
                | (Starting, Running | Stopping)
                | (Running, Stopping)
                | (Stopping, Cleaned)
                | (Cleaned, Joined)
                | (Joined, Destroyed)
        )
    }

    /// The worker has finished: onClean ran and nothing touches the machine.
    #[must_use]
    pub const fn is_terminated(self) -> bool {
        self as u8 >= SessionState::Cleaned as u8
    }
}

/// Atomic holder for a [`SessionState`] shared between host and worker.
///
/// Only the lifecycle advances it:
///
/// ```compile_fail
/// let cell = emu_host::StateCell::new();
/// ```
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    #[must_use]
    pub(crate) const fn new() -> Self {
        Self(AtomicU8::new(SessionState::Created as u8))
    }

    pub(crate) fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `to`, failing if that is not a forward edge from the current
    /// state. Returns the previous state.
    pub(crate) fn advance(&self, to: SessionState) -> Result<SessionState, LifecycleError> {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let from = SessionState::from_u8(current);
            if !from.can_advance_to(to) {
                return Err(LifecycleError::IllegalTransition { from, to });
            }
            match self.0.compare_exchange_weak(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    debug!(?from, ?to, "session state");
                    return Ok(from);
                }
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
