//! Error types for the host frontend.
//!
//! Startup failures and worker faults are separate types: a
//! startup failure aborts the session before any worker thread exists, while
//! a fault is something the worker hit mid-run and reports through
//! [`ExitStatus`](crate::ExitStatus) after join.

use std::io;
use std::path::PathBuf;

use emu_core::MachineError;
use thiserror::Error;

use crate::state::SessionState;

/// Fatal problems detected before the worker starts.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("no audio output device available")]
    NoAudioDevice,

    #[error("audio output setup failed: {0}")]
    Audio(String),

    #[error("video setup failed: {0}")]
    Video(String),

    #[error("invalid runtime options: {0}")]
    InvalidOptions(String),

    #[error("failed to spawn emulation worker thread")]
    Spawn(#[source] io::Error),

    #[error("session was already started")]
    AlreadyStarted,
}

/// A fatal error inside the running session.
#[derive(Debug, Error)]
pub enum WorkerFault {
    #[error("machine construction failed")]
    Init(#[source] MachineError),

    #[error("machine fault on frame {frame}")]
    Machine {
        frame: u64,
        #[source]
        source: MachineError,
    },

    #[error("machine panicked on frame {frame}: {message}")]
    Panic { frame: u64, message: String },

    #[error("{hook} hook panicked: {message}")]
    Hook { hook: &'static str, message: String },

    #[error("session state out of step")]
    Lifecycle(#[source] LifecycleError),
}

impl WorkerFault {
    /// Frame the fault occurred on, if the machine got that far.
    #[must_use]
    pub fn frame(&self) -> Option<u64> {
        match self {
            WorkerFault::Init(_) | WorkerFault::Hook { .. } | WorkerFault::Lifecycle(_) => None,
            WorkerFault::Machine { frame, .. } | WorkerFault::Panic { frame, .. } => Some(*frame),
        }
    }
}

/// Misuse of the session state machine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("illegal session transition {from:?} -> {to:?}")]
    IllegalTransition {
        from: SessionState,
        to: SessionState,
    },

    #[error("session has not been started")]
    NotStarted,

    #[error("session was already joined")]
    AlreadyJoined,
}

/// Errors surfaced by the host runloop and its platforms.
#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Startup(#[from] StartupError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("event polling failed: {0}")]
    Poll(String),

    #[error("frame presentation failed: {0}")]
    Present(String),

    #[error("worker thread panicked outside machine code: {0}")]
    WorkerPanicked(String),
}

/// Failures loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse configuration")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Invalid(#[from] StartupError),
}

/// Best-effort text for a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_frame_is_reported() {
        let fault = WorkerFault::Machine {
            frame: 3,
            source: MachineError::BusFault { address: 0x0400_0000 },
        };
        assert_eq!(fault.frame(), Some(3));
        assert_eq!(
            WorkerFault::Init(MachineError::Other("no bios".into())).frame(),
            None
        );
    }

    #[test]
    fn hook_fault_names_the_hook() {
        let fault = WorkerFault::Hook {
            hook: "onClean",
            message: "boom".into(),
        };
        assert_eq!(fault.to_string(), "onClean hook panicked: boom");
        assert_eq!(fault.frame(), None);
    }

    #[test]
    fn panic_payloads_are_readable() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(7u32);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }
}
