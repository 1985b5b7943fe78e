//! The closed-loop pool of chunk buffers.
//!
//! Buffers are allocated once and cycle between the empty queue, the
//! assembler, the full queue and the decode thread. One mutex guards both
//! queues; every critical section is a queue push or pop.

use super::chunk::ChunkBuffer;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Most chunk buffers a pool may hold.
pub const MAX_CHUNK_BUFFERS: usize = 9;
/// Fewest chunk buffers a working pipeline needs: one filling, one decoding.
pub const MIN_CHUNK_BUFFERS: usize = 2;

struct Queues {
    empty: VecDeque<ChunkBuffer>,
    full: VecDeque<ChunkBuffer>,
    closed: bool,
}

/// Where the pool's buffers currently are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolCounts {
    /// Ready to fill.
    pub empty: usize,
    /// Waiting to be decoded.
    pub full: usize,
    /// Held by the assembler or the decode thread.
    pub checked_out: usize,
}

/// Empty/full buffer queues shared by the capture context and decode thread.
pub struct BufferPool {
    queues: Mutex<Queues>,
    ready: Condvar,
    total: usize,
    buffer_capacity: usize,
}

impl BufferPool {
    /// Allocates `count` buffers of `capacity` bytes each.
    pub fn new(count: usize, capacity: usize) -> Self {
        let mut empty = VecDeque::with_capacity(count);
        for _ in 0..count {
            empty.push_back(ChunkBuffer::with_capacity(capacity));
        }
        tracing::debug!(buffers = count, capacity, "Allocated chunk buffer pool");
        Self {
            queues: Mutex::new(Queues {
                empty,
                full: VecDeque::with_capacity(count),
                closed: false,
            }),
            ready: Condvar::new(),
            total: count,
            buffer_capacity: capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Queues> {
        // A panic elsewhere must not take the capture context down with it.
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Total buffers owned by the pool, wherever they are.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Capacity of every buffer.
    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    /// Takes an empty buffer without waiting; `None` if all are in use.
    pub fn acquire_empty(&self) -> Option<ChunkBuffer> {
        self.lock().empty.pop_front()
    }

    /// Gives a buffer back to the empty queue, discarding its contents.
    pub fn return_empty(&self, mut buffer: ChunkBuffer) {
        buffer.reset();
        self.lock().empty.push_back(buffer);
    }

    /// Queues a completed chunk for decoding.
    pub fn push_full(&self, buffer: ChunkBuffer) {
        self.lock().full.push_back(buffer);
        self.ready.notify_one();
    }

    /// Takes the oldest full chunk, waiting up to `timeout` for one.
    ///
    /// Returns `None` on timeout or once the pool is closed.
    pub fn pop_full(&self, timeout: Duration) -> Option<ChunkBuffer> {
        let guard = self.lock();
        let (mut queues, _) = self
            .ready
            .wait_timeout_while(guard, timeout, |q| q.full.is_empty() && !q.closed)
            .unwrap_or_else(PoisonError::into_inner);
        if queues.closed {
            return None;
        }
        queues.full.pop_front()
    }

    /// Returns a decoded chunk to the empty queue.
    pub fn return_full_as_empty(&self, buffer: ChunkBuffer) {
        tracing::trace!(sequence = buffer.sequence(), "Recycling decoded chunk");
        self.return_empty(buffer);
    }

    /// Wakes any waiting consumer and makes further waits return at once.
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    /// Returns true once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Snapshot of where the buffers are.
    pub fn counts(&self) -> PoolCounts {
        let queues = self.lock();
        let (empty, full) = (queues.empty.len(), queues.full.len());
        PoolCounts {
            empty,
            full,
            checked_out: self.total - empty - full,
        }
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("total", &self.total)
            .field("buffer_capacity", &self.buffer_capacity)
            .field("counts", &self.counts())
            .finish()
    }
}
