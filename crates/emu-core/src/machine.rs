//! Machine abstraction for emulated systems.
//!
//! This module defines the `Machine` trait which provides a common interface
//! for emulation cores to run under the host frontend. The host drives the
//! machine from a dedicated worker thread, one frame at a time.

use thiserror::Error;

use crate::ButtonSet;

/// Video output configuration for a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoConfig {
    /// Native display width in pixels.
    pub width: u32,
    /// Native display height in pixels.
    pub height: u32,
}

impl VideoConfig {
    /// Size in bytes of one RGBA8 frame.
    #[must_use]
    pub const fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// Audio output configuration for a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConfig {
    /// Audio sample rate in Hz.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
}

/// What happened during one call to [`Machine::run_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame completed and the machine can keep running.
    Continue,
    /// The frame completed and the machine stopped itself (power-off,
    /// end of a test program, ...). No further frames will be requested.
    Halted,
}

/// A fatal error raised by an emulation core.
#[derive(Debug, Error)]
pub enum MachineError {
    #[error("illegal instruction {opcode:#010x} at {pc:#010x}")]
    IllegalInstruction { pc: u32, opcode: u32 },

    #[error("unmapped bus access at {address:#010x}")]
    BusFault { address: u32 },

    #[error("machine image rejected: {0}")]
    Image(String),

    #[error("{0}")]
    Other(String),
}

/// Trait for emulated machines.
///
/// Implementations are constructed on the worker thread and never leave it,
/// but they must be `Send` so the factory result can be moved there.
pub trait Machine: Send {
    /// Short human-readable name, used in logs and window titles.
    fn name(&self) -> &str;

    /// Get the video output configuration.
    fn video_config(&self) -> VideoConfig;

    /// Get the audio output configuration.
    fn audio_config(&self) -> AudioConfig;

    /// Latch the pad state the next frame should see.
    fn set_buttons(&mut self, buttons: ButtonSet);

    /// Execute one frame of emulation.
    ///
    /// The frame boundary is the only point where the host checks for stop
    /// requests, so implementations should not run for much longer than one
    /// display refresh.
    fn run_frame(&mut self) -> Result<FrameOutcome, MachineError>;

    /// Render the current display to an RGBA pixel buffer.
    ///
    /// The buffer size is `video_config().frame_len()` bytes.
    fn render(&mut self, buffer: &mut [u8]);

    /// Append the samples generated by the last frame, interleaved according
    /// to `audio_config().channels`.
    fn drain_audio(&mut self, out: &mut Vec<f32>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_len_is_rgba() {
        let config = VideoConfig {
            width: 240,
            height: 160,
        };
        assert_eq!(config.frame_len(), 240 * 160 * 4);
    }

    #[test]
    fn machine_error_messages_carry_addresses() {
        let err = MachineError::IllegalInstruction {
            pc: 0x0800_0000,
            opcode: 0xE7F0_00F0,
        };
        assert_eq!(
            err.to_string(),
            "illegal instruction 0xe7f000f0 at 0x08000000"
        );
    }
}
