//! State shared between the capture context, the decode thread and the owner.

use super::pool::BufferPool;
use crate::error::StreamError;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct GrabState {
    should_be_grabbing: bool,
    error: Option<StreamError>,
}

/// Lock-free event counters, written from both pipeline threads.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub(crate) frames_received: AtomicU64,
    pub(crate) frames_invalid: AtomicU64,
    pub(crate) frames_dropped: AtomicU64,
    pub(crate) chunks_completed: AtomicU64,
    pub(crate) chunks_discarded: AtomicU64,
    pub(crate) chunks_truncated: AtomicU64,
    pub(crate) decode_failures: AtomicU64,
    pub(crate) images_delivered: AtomicU64,
    pub(crate) images_dropped: AtomicU64,
    receive_fps: AtomicU32,
    decode_fps: AtomicU32,
}

impl PipelineCounters {
    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_receive_fps(&self, fps: f32) {
        self.receive_fps.store(fps.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn set_decode_fps(&self, fps: f32) {
        self.decode_fps.store(fps.to_bits(), Ordering::Relaxed);
    }

    /// Copies the current values.
    pub fn snapshot(&self) -> CounterSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CounterSnapshot {
            frames_received: get(&self.frames_received),
            frames_invalid: get(&self.frames_invalid),
            frames_dropped: get(&self.frames_dropped),
            chunks_completed: get(&self.chunks_completed),
            chunks_discarded: get(&self.chunks_discarded),
            chunks_truncated: get(&self.chunks_truncated),
            decode_failures: get(&self.decode_failures),
            images_delivered: get(&self.images_delivered),
            images_dropped: get(&self.images_dropped),
            receive_fps: f32::from_bits(self.receive_fps.load(Ordering::Relaxed)),
            decode_fps: f32::from_bits(self.decode_fps.load(Ordering::Relaxed)),
        }
    }
}

/// Point-in-time copy of [`PipelineCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CounterSnapshot {
    /// Micro-frames seen by the assembler.
    pub frames_received: u64,
    /// Micro-frames the scanner rejected.
    pub frames_invalid: u64,
    /// Micro-frames lost because no empty buffer was available.
    pub frames_dropped: u64,
    /// Chunks sealed and queued for decoding.
    pub chunks_completed: u64,
    /// Partially filled chunks thrown away.
    pub chunks_discarded: u64,
    /// Chunks sealed after overflowing their buffer.
    pub chunks_truncated: u64,
    /// Chunks the decoder rejected.
    pub decode_failures: u64,
    /// Images handed to the application.
    pub images_delivered: u64,
    /// Decoded images dropped because the application lagged.
    pub images_dropped: u64,
    /// Chunk completion rate.
    pub receive_fps: f32,
    /// Decode rate.
    pub decode_fps: f32,
}

/// Per-pipeline state shared by the capture context and the decode thread.
///
/// The stop flag and error live under one state lock. The watchdog counter
/// uses a relaxed load and store with no lock; a lost increment only shifts
/// watchdog timing.
#[derive(Debug)]
pub struct GrabContext {
    pool: BufferPool,
    state: Mutex<GrabState>,
    frames_since_last_chunk: AtomicU64,
    max_frames_between_chunks: u64,
    counters: PipelineCounters,
}

impl GrabContext {
    /// Creates a context in the grabbing state.
    pub fn new(pool: BufferPool, max_frames_between_chunks: u64) -> Self {
        Self {
            pool,
            state: Mutex::new(GrabState {
                should_be_grabbing: true,
                error: None,
            }),
            frames_since_last_chunk: AtomicU64::new(0),
            max_frames_between_chunks,
            counters: PipelineCounters::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GrabState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn counters(&self) -> &PipelineCounters {
        &self.counters
    }

    /// Returns false once the pipeline has been told to stop.
    pub fn should_be_grabbing(&self) -> bool {
        self.lock().should_be_grabbing
    }

    /// Stops grabbing and wakes the decode thread.
    pub fn stop(&self) {
        self.lock().should_be_grabbing = false;
        self.pool.close();
        tracing::debug!("Grab context stopped");
    }

    /// Records a stream error; the first one is kept until taken.
    pub fn record_error(&self, error: StreamError) {
        let mut state = self.lock();
        if state.error.is_none() {
            tracing::warn!(%error, "Stream error");
            state.error = Some(error);
        }
    }

    /// Current stream error, if any.
    pub fn error(&self) -> Option<StreamError> {
        self.lock().error
    }

    /// Takes and clears the current stream error.
    pub fn take_error(&self) -> Option<StreamError> {
        self.lock().error.take()
    }

    /// Counts one micro-frame; returns the count if it passed the threshold.
    pub(crate) fn tick_watchdog(&self) -> Option<u64> {
        let frames = self.frames_since_last_chunk.load(Ordering::Relaxed) + 1;
        self.frames_since_last_chunk.store(frames, Ordering::Relaxed);
        (frames > self.max_frames_between_chunks).then_some(frames)
    }

    pub(crate) fn reset_watchdog(&self) {
        self.frames_since_last_chunk.store(0, Ordering::Relaxed);
    }

    /// Micro-frames since the last completed chunk.
    pub fn frames_since_last_chunk(&self) -> u64 {
        self.frames_since_last_chunk.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watchdog_trips_after_threshold() {
        let ctx = GrabContext::new(BufferPool::new(2, 4), 3);
        assert_eq!(ctx.tick_watchdog(), None);
        assert_eq!(ctx.tick_watchdog(), None);
        assert_eq!(ctx.tick_watchdog(), None);
        assert_eq!(ctx.tick_watchdog(), Some(4));

        ctx.reset_watchdog();
        assert_eq!(ctx.frames_since_last_chunk(), 0);
    }

    #[test]
    fn test_first_error_is_kept() {
        let ctx = GrabContext::new(BufferPool::new(2, 4), 3);
        ctx.record_error(StreamError::Desync { frames: 10 });
        ctx.record_error(StreamError::DecodeFailures { consecutive: 3 });
        assert_eq!(ctx.take_error(), Some(StreamError::Desync { frames: 10 }));
        assert_eq!(ctx.error(), None);
    }

    #[test]
    fn test_stop_closes_pool() {
        let ctx = GrabContext::new(BufferPool::new(2, 4), 3);
        assert!(ctx.should_be_grabbing());
        ctx.stop();
        assert!(!ctx.should_be_grabbing());
        assert!(ctx.pool().is_closed());
    }
}
