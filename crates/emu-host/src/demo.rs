//! A stand-in machine so the host can run without an emulation core.
//!
//! Draws scrolling colour bars, shows the pressed buttons as lit cells along
//! the bottom edge, and plays one tone per held button.

use emu_core::{AudioConfig, Button, ButtonSet, FrameOutcome, Machine, MachineError, VideoConfig};

use crate::options::RuntimeOptions;

const FRAMES_PER_SECOND: u32 = 60;
const AMPLITUDE: f32 = 0.15;

/// 75% SMPTE bars, RGB.
const BARS: [[u8; 3]; 8] = [
    [191, 191, 191],
    [191, 191, 0],
    [0, 191, 191],
    [0, 191, 0],
    [191, 0, 191],
    [191, 0, 0],
    [0, 0, 191],
    [16, 16, 16],
];

/// Tone for each button, in `Button::ALL` order. A minor pentatonic from A3.
const TONES_HZ: [f32; 10] = [
    220.0, 261.63, 293.66, 329.63, 392.0, 440.0, 523.25, 587.33, 659.25, 783.99,
];

#[derive(Debug)]
pub struct DemoMachine {
    video: VideoConfig,
    audio: AudioConfig,
    buttons: ButtonSet,
    frame: u64,
    phases: [f32; 10],
    pending: Vec<f32>,
    halt_after: Option<u64>,
    fault_at: Option<u64>,
    panic_at: Option<u64>,
}

impl DemoMachine {
    #[must_use]
    pub fn new(video: VideoConfig, audio: AudioConfig) -> Self {
        Self {
            video,
            audio,
            buttons: ButtonSet::EMPTY,
            frame: 0,
            phases: [0.0; 10],
            pending: Vec::new(),
            halt_after: None,
            fault_at: None,
            panic_at: None,
        }
    }

    /// Match the host's viewport and output format.
    #[must_use]
    pub fn from_options(options: &RuntimeOptions) -> Self {
        Self::new(
            VideoConfig {
                width: options.width,
                height: options.height,
            },
            AudioConfig {
                sample_rate: options.sample_rate,
                channels: options.channels,
            },
        )
    }

    /// Report [`FrameOutcome::Halted`] once `frames` frames have run.
    #[must_use]
    pub fn halt_after(mut self, frames: u64) -> Self {
        self.halt_after = Some(frames);
        self
    }

    /// Fail with an illegal instruction on frame `frame` (0-based).
    #[must_use]
    pub fn fault_at(mut self, frame: u64) -> Self {
        self.fault_at = Some(frame);
        self
    }

    /// Panic inside `run_frame` on frame `frame` (0-based).
    #[must_use]
    pub fn panic_at(mut self, frame: u64) -> Self {
        self.panic_at = Some(frame);
        self
    }

    #[must_use]
    pub fn frames_run(&self) -> u64 {
        self.frame
    }

    fn samples_per_frame(&self) -> usize {
        (self.audio.sample_rate / FRAMES_PER_SECOND) as usize
    }

    fn synthesize(&mut self) {
        let channels = usize::from(self.audio.channels.max(1));
        let frames = self.samples_per_frame();
        let rate = self.audio.sample_rate.max(1) as f32;
        let held: Vec<usize> = Button::ALL
            .iter()
            .enumerate()
            .filter(|(_, b)| self.buttons.contains(**b))
            .map(|(i, _)| i)
            .collect();

        self.pending.reserve(frames * channels);
        for _ in 0..frames {
            let mut value = 0.0;
            for &i in &held {
                value += (self.phases[i] * std::f32::consts::TAU).sin() * AMPLITUDE;
                self.phases[i] = (self.phases[i] + TONES_HZ[i] / rate).fract();
            }
            let value = value.clamp(-1.0, 1.0);
            self.pending.extend(std::iter::repeat_n(value, channels));
        }
    }
}

impl Machine for DemoMachine {
    fn name(&self) -> &str {
        "demo"
    }

    fn video_config(&self) -> VideoConfig {
        self.video
    }

    fn audio_config(&self) -> AudioConfig {
        self.audio
    }

    fn set_buttons(&mut self, buttons: ButtonSet) {
        self.buttons = buttons;
    }

    fn run_frame(&mut self) -> Result<FrameOutcome, MachineError> {
        if self.fault_at == Some(self.frame) {
            return Err(MachineError::IllegalInstruction {
                pc: 0x0800_0000 + (self.frame as u32 & 0xFFFF) * 4,
                opcode: 0xE7F0_00F0,
            });
        }
        if self.panic_at == Some(self.frame) {
            panic!("demo machine panicked on frame {}", self.frame);
        }

        self.synthesize();
        self.frame += 1;

        if self.halt_after.is_some_and(|n| self.frame >= n) {
            Ok(FrameOutcome::Halted)
        } else {
            Ok(FrameOutcome::Continue)
        }
    }

    fn render(&mut self, buffer: &mut [u8]) {
        let width = self.video.width.max(1) as usize;
        let height = self.video.height as usize;
        let bar_width = width.div_ceil(BARS.len()).max(1);
        let scroll = self.frame as usize;
        let cell = (width / Button::ALL.len()).max(1);
        let strip = height.saturating_sub(height / 8);

        for (i, pixel) in buffer.chunks_exact_mut(4).enumerate() {
            let (x, y) = (i % width, i / width);
            let rgb = if y >= strip {
                let index = x / cell;
                match Button::ALL.get(index) {
                    Some(&b) if self.buttons.contains(b) => [255, 255, 255],
                    _ => [0, 0, 0],
                }
            } else {
                BARS[((x + scroll) / bar_width) % BARS.len()]
            };
            pixel.copy_from_slice(&[rgb[0], rgb[1], rgb[2], 0xFF]);
        }
    }

    fn drain_audio(&mut self, out: &mut Vec<f32>) {
        out.append(&mut self.pending);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> DemoMachine {
        DemoMachine::new(
            VideoConfig {
                width: 16,
                height: 8,
            },
            AudioConfig {
                sample_rate: 44_100,
                channels: 2,
            },
        )
    }

    #[test]
    fn one_frame_of_stereo_audio() {
        let mut m = machine();
        m.run_frame().unwrap();
        let mut out = Vec::new();
        m.drain_audio(&mut out);
        assert_eq!(out.len(), 735 * 2);
        assert!(out.iter().all(|&s| s == 0.0), "silent with no buttons held");
    }

    #[test]
    fn held_button_makes_a_tone() {
        let mut m = machine();
        m.set_buttons(ButtonSet::EMPTY.with(Button::A));
        m.run_frame().unwrap();
        let mut out = Vec::new();
        m.drain_audio(&mut out);
        assert!(out.iter().any(|&s| s.abs() > 0.01));
        assert!(out.iter().all(|&s| s.abs() <= 1.0));
        // Left and right carry the same signal.
        assert!(out.chunks_exact(2).all(|lr| lr[0] == lr[1]));
    }

    #[test]
    fn halts_after_budget() {
        let mut m = machine().halt_after(2);
        assert_eq!(m.run_frame().unwrap(), FrameOutcome::Continue);
        assert_eq!(m.run_frame().unwrap(), FrameOutcome::Halted);
    }

    #[test]
    fn fault_on_requested_frame() {
        let mut m = machine().fault_at(1);
        assert!(m.run_frame().is_ok());
        assert!(matches!(
            m.run_frame(),
            Err(MachineError::IllegalInstruction { .. })
        ));
    }

    #[test]
    fn render_fills_every_pixel_opaque() {
        let mut m = machine();
        let mut buffer = vec![0u8; m.video_config().frame_len()];
        m.render(&mut buffer);
        assert!(buffer.chunks_exact(4).all(|p| p[3] == 0xFF));
        assert_eq!(&buffer[..3], &BARS[0]);
    }

    #[test]
    fn pressed_button_lights_its_cell() {
        let mut m = machine();
        m.set_buttons(ButtonSet::EMPTY.with(Button::A));
        let mut buffer = vec![0u8; m.video_config().frame_len()];
        m.render(&mut buffer);
        let bottom_left = (7 * 16) * 4;
        assert_eq!(&buffer[bottom_left..bottom_left + 3], &[255, 255, 255]);
    }
}
