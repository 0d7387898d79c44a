//! Machine contract shared by emulation cores and the host frontend.
//!
//! An emulation core implements [`Machine`]. The host never looks inside it:
//! it asks for one frame at a time, reads back pixels and samples, and feeds
//! in the current button state.

mod input;
mod machine;

pub use input::{Button, ButtonSet, KeyCode};
pub use machine::{AudioConfig, FrameOutcome, Machine, MachineError, VideoConfig};
