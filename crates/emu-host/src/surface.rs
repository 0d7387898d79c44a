//! Frame hand-off from the worker to the host.
//!
//! Completed frames go through a small bounded queue. The worker either waits
//! for room (video sync) or replaces the oldest queued frame, so under
//! backpressure the host skips frames but always sees them in the order they
//! were produced. Pixel buffers are recycled through a spare pool so the
//! steady state does not allocate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Observer, Producer, RingBuffer};
use tracing::{trace, warn};

use crate::options::RuntimeOptions;

/// Longest single wait while the worker blocks on a full queue. The stop
/// flag is re-checked between waits.
const SYNC_WAIT_SLICE: Duration = Duration::from_millis(5);

/// Display geometry the host presents into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    /// Integer scale applied by the window.
    pub scale: u32,
}

impl Viewport {
    #[must_use]
    pub const fn window_size(&self) -> (u32, u32) {
        (self.width * self.scale, self.height * self.scale)
    }
}

/// One completed frame in RGBA8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Position in the worker's output, starting at 0.
    pub seq: u64,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// How a submitted frame was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    /// Queued behind any frames already waiting.
    Queued,
    /// Queued after evicting the oldest waiting frame.
    ReplacedOldest,
    /// Dropped because the session is stopping.
    Abandoned,
}

/// Bounded, ordered frame queue with ready signalling.
pub struct RendererSurface {
    viewport: Viewport,
    queue: Mutex<HeapRb<Frame>>,
    /// Signalled when a frame is queued or the worker finishes.
    frame_ready: Condvar,
    /// Signalled when the host takes a frame.
    space_free: Condvar,
    spare: Mutex<Vec<Vec<u8>>>,
    produced: AtomicU64,
    dropped: AtomicU64,
}

impl RendererSurface {
    #[must_use]
    pub fn new(viewport: Viewport, depth: usize) -> Self {
        Self {
            viewport,
            queue: Mutex::new(HeapRb::new(depth.max(1))),
            frame_ready: Condvar::new(),
            space_free: Condvar::new(),
            spare: Mutex::new(Vec::new()),
            produced: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn from_options(options: &RuntimeOptions) -> Self {
        let viewport = Viewport {
            width: options.width,
            height: options.height,
            scale: options.scale,
        };
        Self::new(viewport, options.frame_queue_depth)
    }

    #[must_use]
    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Frames submitted so far, including dropped ones.
    #[must_use]
    pub fn produced(&self) -> u64 {
        self.produced.load(Ordering::Acquire)
    }

    /// Frames evicted or abandoned before the host saw them.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock_queue().occupied_len()
    }

    /// A zeroed-or-stale pixel buffer of `len` bytes, reused when possible.
    pub fn acquire_buffer(&self, len: usize) -> Vec<u8> {
        let mut spare = self.spare.lock().unwrap_or_else(PoisonError::into_inner);
        let mut buffer = spare.pop().unwrap_or_default();
        buffer.resize(len, 0);
        buffer
    }

    /// Hand a presented frame's storage back for reuse.
    pub fn recycle(&self, frame: Frame) {
        let mut spare = self.spare.lock().unwrap_or_else(PoisonError::into_inner);
        if spare.len() < self.capacity() + 1 {
            spare.push(frame.pixels);
        }
    }

    fn capacity(&self) -> usize {
        self.lock_queue().capacity().get()
    }

    /// Queue a frame from the worker.
    ///
    /// With `sync` the call waits for the host to make room, re-checking
    /// `stop` every few milliseconds, and abandons the frame once a stop is
    /// requested. Without it a full queue loses its oldest frame.
    pub fn submit(&self, frame: Frame, sync: bool, stop: impl Fn() -> bool) -> Submitted {
        self.produced.fetch_add(1, Ordering::AcqRel);
        let seq = frame.seq;
        let mut queue = self.lock_queue();

        let outcome = if sync {
            loop {
                if !queue.is_full() {
                    break Submitted::Queued;
                }
                if stop() {
                    break Submitted::Abandoned;
                }
                queue = self
                    .space_free
                    .wait_timeout(queue, SYNC_WAIT_SLICE)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
        } else if queue.is_full() {
            Submitted::ReplacedOldest
        } else {
            Submitted::Queued
        };

        match outcome {
            Submitted::Queued => {
                let pushed = queue.try_push(frame);
                debug_assert!(pushed.is_ok());
            }
            Submitted::ReplacedOldest => {
                if let Some(evicted) = queue.push_overwrite(frame) {
                    trace!(seq = evicted.seq, "frame evicted before presentation");
                    drop(queue);
                    self.recycle(evicted);
                }
                self.dropped.fetch_add(1, Ordering::AcqRel);
            }
            Submitted::Abandoned => {
                drop(queue);
                trace!(seq, "frame abandoned, session stopping");
                self.recycle(frame);
                self.dropped.fetch_add(1, Ordering::AcqRel);
            }
        }

        self.frame_ready.notify_all();
        outcome
    }

    /// Take the oldest queued frame without waiting.
    pub fn try_take(&self) -> Option<Frame> {
        let frame = self.lock_queue().try_pop();
        if frame.is_some() {
            self.space_free.notify_all();
        }
        frame
    }

    /// Take the oldest queued frame, waiting up to `timeout` for one.
    ///
    /// Returns early without a frame when [`RendererSurface::wake`] is called.
    pub fn wait_frame(&self, timeout: Duration) -> Option<Frame> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.lock_queue();
        loop {
            if let Some(frame) = queue.try_pop() {
                drop(queue);
                self.space_free.notify_all();
                return Some(frame);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, result) = self
                .frame_ready
                .wait_timeout(queue, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            queue = guard;
            if !result.timed_out() && queue.is_empty() {
                // Woken without a frame: the worker is finishing.
                return None;
            }
        }
    }

    /// Wake any host thread blocked in [`RendererSurface::wait_frame`].
    pub fn wake(&self) {
        self.frame_ready.notify_all();
        self.space_free.notify_all();
    }

    fn lock_queue(&self) -> MutexGuard<'_, HeapRb<Frame>> {
        self.queue.lock().unwrap_or_else(|poisoned| {
            warn!("frame queue mutex poisoned; continuing");
            poisoned.into_inner()
        })
    }
}

impl std::fmt::Debug for RendererSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendererSurface")
            .field("viewport", &self.viewport)
            .field("produced", &self.produced())
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const VIEW: Viewport = Viewport {
        width: 2,
        height: 2,
        scale: 1,
    };

    fn frame(seq: u64) -> Frame {
        Frame {
            seq,
            width: 2,
            height: 2,
            pixels: vec![0; 16],
        }
    }

    #[test]
    fn frames_come_out_in_order() {
        let surface = RendererSurface::new(VIEW, 4);
        for seq in 0..3 {
            assert_eq!(surface.submit(frame(seq), false, || false), Submitted::Queued);
        }
        let seqs: Vec<u64> = std::iter::from_fn(|| surface.try_take()).map(|f| f.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn full_queue_drops_oldest_without_sync() {
        let surface = RendererSurface::new(VIEW, 2);
        surface.submit(frame(0), false, || false);
        surface.submit(frame(1), false, || false);
        assert_eq!(
            surface.submit(frame(2), false, || false),
            Submitted::ReplacedOldest
        );

        assert_eq!(surface.dropped(), 1);
        assert_eq!(surface.produced(), 3);
        assert_eq!(surface.try_take().map(|f| f.seq), Some(1));
        assert_eq!(surface.try_take().map(|f| f.seq), Some(2));
        assert!(surface.try_take().is_none());
    }

    #[test]
    fn sync_submit_abandons_on_stop() {
        let surface = RendererSurface::new(VIEW, 1);
        surface.submit(frame(0), true, || false);
        assert_eq!(surface.submit(frame(1), true, || true), Submitted::Abandoned);
        assert_eq!(surface.try_take().map(|f| f.seq), Some(0));
        assert!(surface.try_take().is_none());
    }

    #[test]
    fn sync_submit_waits_for_host() {
        let surface = Arc::new(RendererSurface::new(VIEW, 1));
        surface.submit(frame(0), true, || false);

        let producer = {
            let surface = Arc::clone(&surface);
            thread::spawn(move || surface.submit(frame(1), true, || false))
        };

        let first = surface.wait_frame(Duration::from_secs(5)).unwrap();
        assert_eq!(first.seq, 0);
        assert_eq!(producer.join().unwrap(), Submitted::Queued);
        assert_eq!(surface.wait_frame(Duration::from_secs(5)).map(|f| f.seq), Some(1));
    }

    #[test]
    fn wait_frame_times_out_when_idle() {
        let surface = RendererSurface::new(VIEW, 1);
        assert!(surface.wait_frame(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn recycled_buffers_are_reused() {
        let surface = RendererSurface::new(VIEW, 2);
        let mut buffer = surface.acquire_buffer(16);
        buffer[0] = 0xAB;
        let ptr = buffer.as_ptr();
        surface.recycle(Frame {
            seq: 0,
            width: 2,
            height: 2,
            pixels: buffer,
        });

        let again = surface.acquire_buffer(16);
        assert_eq!(again.as_ptr(), ptr);
        assert_eq!(again.len(), 16);
    }

    #[test]
    fn window_size_applies_scale() {
        let viewport = Viewport {
            width: 240,
            height: 160,
            scale: 3,
        };
        assert_eq!(viewport.window_size(), (720, 480));
    }
}
