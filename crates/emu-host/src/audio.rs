//! Audio bridge between the emulation worker and the audio callback.
//!
//! The worker pushes interleaved samples into a fixed-size ring; the audio
//! device callback pulls them out. The callback runs on an OS thread with a
//! real-time deadline, so everything it touches here is wait-free and
//! allocation-free.
//!
//! # Active source
//!
//! The bridge also carries the "active source" handle. The lifecycle
//! coordinator publishes it when the machine starts and clears it when the
//! machine halts. The callback re-reads it on every invocation and emits
//! silence whenever it is absent, so it never reads samples on behalf of a
//! session that has not started or has already been cleaned up.
//!
//! Clearing is paired with a reader count: [`AudioBridge::clear`] returns only
//! once every callback that could have seen the old handle has left
//! [`AudioBridge::fill`].

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::options::RuntimeOptions;

/// Value written for every sample the bridge has no data for.
pub const SILENCE: f32 = 0.0;

/// Ring size in multiples of the device buffer.
///
/// Provides headroom against scheduling jitter between worker and device.
const RING_BUFFERS: usize = 8;

/// Identifies the audio stream of a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSourceHandle {
    /// Session that owns the samples. Never zero.
    pub session: u64,
    /// Sample rate of the pushed samples in Hz.
    pub sample_rate: u32,
    /// Interleaved channel count of the pushed samples.
    pub channels: u16,
}

impl AudioSourceHandle {
    fn pack_format(self) -> u64 {
        (u64::from(self.sample_rate) << 16) | u64::from(self.channels)
    }

    fn unpack(session: u64, format: u64) -> Self {
        Self {
            session,
            sample_rate: (format >> 16) as u32,
            channels: (format & 0xFFFF) as u16,
        }
    }
}

/// Format the output device was opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Result of one [`AudioBridge::fill`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillReport {
    /// The handle the callback saw, if any.
    pub source: Option<AudioSourceHandle>,
    /// Samples copied from the ring. The rest of the buffer is silence.
    pub samples: usize,
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioStats {
    /// Samples the callback had to pad with silence while a source was active.
    pub underrun_samples: u64,
    /// Samples overwritten before the callback read them.
    pub overrun_samples: u64,
}

/// Single-producer/single-consumer ring of `f32` samples.
///
/// `write` and `read` are monotonically increasing sample counters; slot
/// `n % capacity` holds sample `n`. The producer never looks at `read`: it
/// always writes, and a consumer that finds itself more than `capacity`
/// behind skips ahead to the oldest sample still in the ring. Slots are
/// atomics, so a sample being overwritten while it is copied out is merely
/// stale, never torn memory.
struct SampleRing {
    slots: Box<[AtomicU32]>,
    write: AtomicUsize,
    read: AtomicUsize,
}

impl SampleRing {
    fn new(capacity: usize) -> Self {
        let slots = (0..capacity.max(1))
            .map(|_| AtomicU32::new(SILENCE.to_bits()))
            .collect();
        Self {
            slots,
            write: AtomicUsize::new(0),
            read: AtomicUsize::new(0),
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Producer side. Returns how many unread samples were overwritten.
    fn push(&self, samples: &[f32]) -> usize {
        let cap = self.capacity();
        let start = self.write.load(Ordering::Relaxed);
        let unread = start.wrapping_sub(self.read.load(Ordering::Acquire)).min(cap);

        // Only the newest `cap` samples can survive anyway.
        let skip = samples.len().saturating_sub(cap);
        for (i, &sample) in samples.iter().enumerate().skip(skip) {
            let slot = start.wrapping_add(i) % cap;
            self.slots[slot].store(sample.to_bits(), Ordering::Relaxed);
        }
        self.write
            .store(start.wrapping_add(samples.len()), Ordering::Release);

        (unread + samples.len()).saturating_sub(cap)
    }

    /// Consumer side. Copies up to `out.len()` samples and returns the count.
    fn pop_into(&self, out: &mut [f32]) -> usize {
        let cap = self.capacity();
        let end = self.write.load(Ordering::Acquire);
        let mut start = self.read.load(Ordering::Relaxed);
        if end.wrapping_sub(start) > cap {
            start = end.wrapping_sub(cap);
        }

        let n = end.wrapping_sub(start).min(out.len());
        for (i, sample) in out[..n].iter_mut().enumerate() {
            let slot = start.wrapping_add(i) % cap;
            *sample = f32::from_bits(self.slots[slot].load(Ordering::Relaxed));
        }
        self.read.store(start.wrapping_add(n), Ordering::Release);
        n
    }

    fn len(&self) -> usize {
        let end = self.write.load(Ordering::Acquire);
        let start = self.read.load(Ordering::Acquire);
        end.wrapping_sub(start).min(self.capacity())
    }

    /// Drop everything unread. Only called while no consumer is active.
    fn discard(&self) {
        let end = self.write.load(Ordering::Acquire);
        self.read.store(end, Ordering::Release);
    }
}

/// Lock-free hand-off of audio from the worker to the audio callback.
pub struct AudioBridge {
    ring: SampleRing,
    output: OutputFormat,
    /// Session id of the active source, zero when there is none.
    active: AtomicU64,
    /// Packed format of the active source; written before `active`.
    format: AtomicU64,
    /// Callbacks currently inside `fill`.
    readers: AtomicUsize,
    underrun: AtomicU64,
    overrun: AtomicU64,
}

impl AudioBridge {
    /// Create a bridge holding `capacity` samples for an output device with
    /// the given format.
    #[must_use]
    pub fn new(output: OutputFormat, capacity: usize) -> Self {
        Self {
            ring: SampleRing::new(capacity),
            output,
            active: AtomicU64::new(0),
            format: AtomicU64::new(0),
            readers: AtomicUsize::new(0),
            underrun: AtomicU64::new(0),
            overrun: AtomicU64::new(0),
        }
    }

    /// Bridge sized from the runtime options: eight device buffers of
    /// interleaved samples.
    #[must_use]
    pub fn from_options(options: &RuntimeOptions) -> Self {
        let output = OutputFormat {
            sample_rate: options.sample_rate,
            channels: options.channels,
        };
        let capacity = options.audio_buffers as usize * usize::from(options.channels) * RING_BUFFERS;
        Self::new(output, capacity)
    }

    #[must_use]
    pub fn output_format(&self) -> OutputFormat {
        self.output
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Samples currently waiting to be played.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.ring.len()
    }

    /// Free space before the next push starts overwriting.
    #[must_use]
    pub fn vacant(&self) -> usize {
        self.capacity() - self.buffered()
    }

    /// The handle the callback would see right now.
    #[must_use]
    pub fn active_source(&self) -> Option<AudioSourceHandle> {
        let session = self.active.load(Ordering::SeqCst);
        if session == 0 {
            return None;
        }
        let format = self.format.load(Ordering::Acquire);
        Some(AudioSourceHandle::unpack(session, format))
    }

    #[must_use]
    pub fn stats(&self) -> AudioStats {
        AudioStats {
            underrun_samples: self.underrun.load(Ordering::Relaxed),
            overrun_samples: self.overrun.load(Ordering::Relaxed),
        }
    }

    /// Make `handle` the active source.
    ///
    /// Stale samples from a previous session are discarded first, so the
    /// callback's first read after publication only sees this session's audio.
    pub(crate) fn publish(&self, handle: AudioSourceHandle) {
        debug_assert_ne!(handle.session, 0, "session ids start at 1");
        self.reset();
        self.format.store(handle.pack_format(), Ordering::Release);
        self.active.store(handle.session, Ordering::SeqCst);
    }

    /// Discard every unread sample.
    ///
    /// Must not race a consumer that is reading on behalf of an active
    /// source; the coordinator only calls it between sessions.
    pub fn reset(&self) {
        self.ring.discard();
    }

    /// Remove the active source and wait until no callback is still reading
    /// on its behalf.
    ///
    /// The wait is bounded by the length of one `fill` call, which never
    /// blocks.
    pub(crate) fn clear(&self) {
        self.active.store(0, Ordering::SeqCst);
        let mut spins = 0u32;
        while self.readers.load(Ordering::SeqCst) != 0 {
            spins += 1;
            if spins < 64 {
                std::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
        }
    }

    /// Producer side: push interleaved samples, overwriting unread ones when
    /// the ring is full.
    pub fn push(&self, samples: &[f32]) {
        let overwritten = self.ring.push(samples);
        if overwritten > 0 {
            self.overrun
                .fetch_add(overwritten as u64, Ordering::Relaxed);
        }
    }

    /// Wait until `len` samples fit without overwriting, `stop` reports
    /// true, or `timeout` elapses. Returns whether the space is there.
    pub(crate) fn wait_for_space(
        &self,
        len: usize,
        timeout: Duration,
        stop: impl Fn() -> bool,
    ) -> bool {
        let want = len.min(self.capacity());
        let deadline = Instant::now() + timeout;
        while self.vacant() < want {
            if stop() || Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_micros(250));
        }
        true
    }

    /// Consumer side, called from the audio device callback.
    ///
    /// Fills `out` completely: samples from the ring while a source is
    /// active, silence for everything else. Never blocks or allocates.
    pub fn fill(&self, out: &mut [f32]) -> FillReport {
        self.readers.fetch_add(1, Ordering::SeqCst);

        let report = match self.active_source() {
            Some(source) => {
                let samples = self.ring.pop_into(out);
                if samples < out.len() {
                    out[samples..].fill(SILENCE);
                    self.underrun
                        .fetch_add((out.len() - samples) as u64, Ordering::Relaxed);
                }
                FillReport {
                    source: Some(source),
                    samples,
                }
            }
            None => {
                out.fill(SILENCE);
                FillReport {
                    source: None,
                    samples: 0,
                }
            }
        };

        self.readers.fetch_sub(1, Ordering::SeqCst);
        report
    }
}

impl std::fmt::Debug for AudioBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioBridge")
            .field("capacity", &self.capacity())
            .field("buffered", &self.buffered())
            .field("output", &self.output)
            .field("active", &self.active_source())
            .finish_non_exhaustive()
    }
}
