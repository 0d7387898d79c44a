//! Debugger attachment.
//!
//! A debugger is polled by the worker at every frame boundary and may end
//! the session there. Interactive front ends (a CLI monitor, a GDB stub) are
//! built on the same trait.

use tracing::{debug, trace};

use crate::worker::SessionInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebuggerAction {
    Continue,
    Break,
}

/// Hooks a debugger gets on the worker thread.
pub trait Debugger: Send {
    /// Called once, after onStart and before the first frame.
    fn attach(&mut self, info: &SessionInfo, machine: &str);

    /// Called at every safe point, before frame `frame` runs.
    fn at_safe_point(&mut self, frame: u64) -> DebuggerAction;

    /// Called once, before onClean.
    fn detach(&mut self) {}
}

/// Stops the session after a fixed number of frames.
#[derive(Debug, Clone)]
pub struct FrameBudget {
    frames: u64,
    log_every: u64,
}

impl FrameBudget {
    #[must_use]
    pub fn new(frames: u64) -> Self {
        Self {
            frames,
            log_every: 60,
        }
    }

    /// Emit a trace line every `frames` frames (0 disables).
    #[must_use]
    pub fn log_every(mut self, frames: u64) -> Self {
        self.log_every = frames;
        self
    }
}

impl Debugger for FrameBudget {
    fn attach(&mut self, info: &SessionInfo, machine: &str) {
        debug!(session = info.session, machine, budget = self.frames, "frame budget attached");
    }

    fn at_safe_point(&mut self, frame: u64) -> DebuggerAction {
        if self.log_every != 0 && frame % self.log_every == 0 {
            trace!(frame, "safe point");
        }
        if frame >= self.frames {
            DebuggerAction::Break
        } else {
            DebuggerAction::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_breaks_at_limit() {
        let mut budget = FrameBudget::new(2).log_every(0);
        assert_eq!(budget.at_safe_point(0), DebuggerAction::Continue);
        assert_eq!(budget.at_safe_point(1), DebuggerAction::Continue);
        assert_eq!(budget.at_safe_point(2), DebuggerAction::Break);
    }

    #[test]
    fn zero_budget_breaks_immediately() {
        let mut budget = FrameBudget::new(0);
        assert_eq!(budget.at_safe_point(0), DebuggerAction::Break);
    }
}
