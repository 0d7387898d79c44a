//! Host frontend for emulation cores.
//!
//! Runs a [`Machine`](emu_core::Machine) on a dedicated worker thread and
//! connects it to the host through three channels: completed frames go
//! through a [`RendererSurface`], audio through a lock-free [`AudioBridge`]
//! read by the device callback, and input through an [`InputState`] fed by
//! the [`HostRunloop`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use emu_host::{
//!     AudioBridge, DemoMachine, EmulationContext, HeadlessPlatform, HostRunloop,
//!     InputBindingTable, RendererSurface, RuntimeOptions,
//! };
//!
//! let options = RuntimeOptions::default();
//! let surface = Arc::new(RendererSurface::from_options(&options));
//! let bridge = Arc::new(AudioBridge::from_options(&options));
//! let mut ctx = EmulationContext::new(options.clone(), surface, bridge)?;
//! ctx.start(|info| Ok(DemoMachine::from_options(&info.options).halt_after(60)))?;
//!
//! let mut runloop = HostRunloop::new(HeadlessPlatform::new(), InputBindingTable::defaults(), &options);
//! let report = runloop.run(&mut ctx)?;
//! ```

mod audio;
mod context;
mod debugger;
mod demo;
mod error;
mod headless;
mod hooks;
mod input;
mod options;
mod runloop;
mod state;
mod surface;
mod worker;

#[cfg(feature = "native")]
pub mod native;

pub use audio::{AudioBridge, AudioSourceHandle, AudioStats, FillReport, OutputFormat, SILENCE};
pub use context::EmulationContext;
pub use debugger::{Debugger, DebuggerAction, FrameBudget};
pub use demo::DemoMachine;
pub use error::{ConfigError, HostError, LifecycleError, StartupError, WorkerFault};
pub use headless::HeadlessPlatform;
pub use hooks::{HookContext, LifecycleHooks};
pub use input::{GamepadButton, HostInput, InputBindingTable, InputState};
pub use options::{BindingsConfig, HostConfig, RuntimeOptions, load_config};
pub use runloop::{HostEvent, HostPlatform, HostRunloop, SessionReport};
pub use state::SessionState;
pub use surface::{Frame, RendererSurface, Submitted, Viewport};
pub use worker::{ExitStatus, SessionInfo, StopCause};
