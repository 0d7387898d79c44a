//! A platform with no window, for tests and `--headless` runs.

use std::collections::VecDeque;

use tracing::trace;

use crate::error::HostError;
use crate::runloop::{HostEvent, HostPlatform};
use crate::surface::Frame;

/// Replays scripted events and records what it was asked to present.
#[derive(Debug, Default)]
pub struct HeadlessPlatform {
    /// `(poll index, event)` pairs, sorted by poll index.
    script: VecDeque<(u64, HostEvent)>,
    polls: u64,
    presented: Vec<u64>,
    fail_present_at: Option<u64>,
    checksum: u64,
}

impl HeadlessPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` on the `poll`-th call to `poll_events` (0-based).
    #[must_use]
    pub fn event_at(mut self, poll: u64, event: HostEvent) -> Self {
        let pos = self.script.partition_point(|(at, _)| *at <= poll);
        self.script.insert(pos, (poll, event));
        self
    }

    /// Make `present` fail once it has shown `frames` frames.
    #[must_use]
    pub fn fail_present_after(mut self, frames: u64) -> Self {
        self.fail_present_at = Some(frames);
        self
    }

    /// Sequence numbers of presented frames, in presentation order.
    #[must_use]
    pub fn presented(&self) -> &[u64] {
        &self.presented
    }

    #[must_use]
    pub fn polls(&self) -> u64 {
        self.polls
    }

    /// Running FNV-1a hash over every presented pixel.
    #[must_use]
    pub fn checksum(&self) -> u64 {
        self.checksum
    }
}

impl HostPlatform for HeadlessPlatform {
    fn poll_events(&mut self, events: &mut Vec<HostEvent>) -> Result<(), HostError> {
        while let Some((at, event)) = self.script.front().copied() {
            if at > self.polls {
                break;
            }
            self.script.pop_front();
            events.push(event);
        }
        self.polls += 1;
        Ok(())
    }

    fn present(&mut self, frame: &Frame) -> Result<(), HostError> {
        if self.fail_present_at == Some(self.presented.len() as u64) {
            return Err(HostError::Present(format!(
                "injected failure at frame {}",
                frame.seq
            )));
        }

        let mut hash = if self.checksum == 0 {
            0xcbf2_9ce4_8422_2325
        } else {
            self.checksum
        };
        for &byte in &frame.pixels {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        self.checksum = hash;

        trace!(seq = frame.seq, "headless present");
        self.presented.push(frame.seq);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emu_core::KeyCode;

    fn frame(seq: u64) -> Frame {
        Frame {
            seq,
            width: 1,
            height: 1,
            pixels: vec![1, 2, 3, 4],
        }
    }

    #[test]
    fn scripted_events_arrive_on_their_poll() {
        let press = HostEvent::Key {
            code: KeyCode::KeyX,
            pressed: true,
        };
        let mut platform = HeadlessPlatform::new()
            .event_at(2, HostEvent::Quit)
            .event_at(0, press);

        let mut events = Vec::new();
        platform.poll_events(&mut events).unwrap();
        assert_eq!(events, vec![press]);

        events.clear();
        platform.poll_events(&mut events).unwrap();
        assert!(events.is_empty());

        platform.poll_events(&mut events).unwrap();
        assert_eq!(events, vec![HostEvent::Quit]);
        assert_eq!(platform.polls(), 3);
    }

    #[test]
    fn injected_failure_hits_after_n_frames() {
        let mut platform = HeadlessPlatform::new().fail_present_after(1);
        assert!(platform.present(&frame(0)).is_ok());
        assert!(matches!(platform.present(&frame(1)), Err(HostError::Present(_))));
        assert_eq!(platform.presented(), &[0]);
    }

    #[test]
    fn checksum_changes_with_content() {
        let mut a = HeadlessPlatform::new();
        let mut b = HeadlessPlatform::new();
        a.present(&frame(0)).unwrap();
        let mut other = frame(0);
        other.pixels[0] = 9;
        b.present(&other).unwrap();
        assert_ne!(a.checksum(), b.checksum());
    }
}
