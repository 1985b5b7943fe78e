//! Reassembles scanned micro-frames into chunks.
//!
//! Runs in the capture context, once per completed isochronous transfer.
//! Nothing here blocks or allocates: buffers come from the pool and, when
//! the pool is exhausted, data is dropped and counted.

use super::chunk::ChunkBuffer;
use super::context::{GrabContext, PipelineCounters};
use crate::analysis::FrameCounter;
use crate::capture::{FrameInfo, FrameScanResult, FrameScanner, IsochronousFrame, TransferBatch};
use crate::error::StreamError;
use std::sync::Arc;
use std::time::Instant;

/// Assembler state between micro-frames.
///
/// Sealing a chunk passes through a transient "chunk ready" step inside a
/// single frame: the chunk is queued, then a fresh buffer is taken (Filling)
/// or, if none is free, the assembler falls back to Idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    /// No buffer held.
    Idle,
    /// A buffer is being filled.
    Filling,
}

/// What happened while processing one transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Micro-frames examined.
    pub frames: usize,
    /// Micro-frames rejected by the scanner.
    pub invalid: usize,
    /// Micro-frames whose payload could not be stored.
    pub dropped: usize,
    /// Chunks sealed and queued.
    pub chunks_completed: usize,
    /// Chunks thrown away.
    pub chunks_discarded: usize,
    /// The watchdog tripped during this transfer.
    pub desync: bool,
}

/// Capture-side state machine feeding the buffer pool.
pub struct ChunkAssembler {
    ctx: Arc<GrabContext>,
    scanner: Arc<dyn FrameScanner>,
    header: Vec<u8>,
    filling: Option<ChunkBuffer>,
    info: FrameInfo,
    /// Scanner information as of the frame that started the current chunk.
    chunk_info: FrameInfo,
    sequence: u64,
    pool_exhausted: bool,
    /// Data was dropped mid-chunk; wait for the next boundary.
    awaiting_boundary: bool,
    receive_fps: FrameCounter,
}

impl ChunkAssembler {
    /// Creates an assembler writing into `ctx`'s pool.
    pub fn new(ctx: Arc<GrabContext>, scanner: Arc<dyn FrameScanner>, header: Vec<u8>) -> Self {
        Self {
            ctx,
            scanner,
            header,
            filling: None,
            info: FrameInfo::default(),
            chunk_info: FrameInfo::default(),
            sequence: 0,
            pool_exhausted: false,
            awaiting_boundary: false,
            receive_fps: FrameCounter::new(),
        }
    }

    pub fn state(&self) -> AssemblerState {
        if self.filling.is_some() {
            AssemblerState::Filling
        } else {
            AssemblerState::Idle
        }
    }

    /// Bytes in the chunk currently being filled.
    pub fn filling_len(&self) -> Option<usize> {
        self.filling.as_ref().map(ChunkBuffer::len)
    }

    pub fn context(&self) -> &Arc<GrabContext> {
        &self.ctx
    }

    /// Processes every micro-frame of a completed transfer.
    ///
    /// Once the pipeline is stopping the transfer is ignored.
    pub fn process_batch(&mut self, batch: &TransferBatch<'_>) -> BatchSummary {
        let mut summary = BatchSummary::default();
        if !self.ctx.should_be_grabbing() {
            self.release();
            return summary;
        }
        for frame in batch.frames() {
            self.process_frame(&frame, &mut summary);
        }
        if self.receive_fps.update() {
            self.ctx.counters().set_receive_fps(self.receive_fps.fps());
        }
        summary
    }

    /// Processes a single micro-frame.
    ///
    /// After a frame is dropped for lack of a buffer, payload keeps being
    /// dropped until the next chunk boundary, so a partial image is never
    /// queued.
    pub fn process_frame(&mut self, frame: &IsochronousFrame<'_>, summary: &mut BatchSummary) {
        summary.frames += 1;
        PipelineCounters::bump(&self.ctx.counters().frames_received);

        if let Some(frames) = self.ctx.tick_watchdog() {
            self.ctx.record_error(StreamError::Desync { frames });
            self.ctx.reset_watchdog();
            if self.discard() {
                summary.chunks_discarded += 1;
            }
            summary.desync = true;
        }

        match self.scanner.scan(frame, &mut self.info) {
            FrameScanResult::InvalidFrame => {
                summary.invalid += 1;
                PipelineCounters::bump(&self.ctx.counters().frames_invalid);
            }
            FrameScanResult::InvalidChunk => {
                if self.discard() {
                    summary.chunks_discarded += 1;
                }
            }
            FrameScanResult::ValidFrame { data } => {
                let bytes = data.slice(frame.data());
                if self.filling.is_none() && (self.awaiting_boundary || !self.start_chunk()) {
                    self.drop_frame(summary);
                    return;
                }
                if let Some(chunk) = self.filling.as_mut() {
                    chunk.append(bytes);
                }
            }
            FrameScanResult::NewChunkFrame { data, tail } => {
                if let Some(mut chunk) = self.filling.take() {
                    chunk.append(data.slice(frame.data()));
                    self.seal(chunk);
                    summary.chunks_completed += 1;
                }
                self.awaiting_boundary = false;
                if !self.start_chunk() {
                    self.drop_frame(summary);
                    return;
                }
                if let Some(chunk) = self.filling.as_mut() {
                    chunk.append(tail.slice(frame.data()));
                }
            }
        }
    }

    /// Idle -> Filling. Returns false if the pool is exhausted.
    fn start_chunk(&mut self) -> bool {
        let Some(mut chunk) = self.ctx.pool().acquire_empty() else {
            if !self.pool_exhausted {
                tracing::debug!("Chunk pool exhausted, dropping frames");
                self.pool_exhausted = true;
            }
            self.awaiting_boundary = true;
            return false;
        };
        if self.pool_exhausted {
            tracing::debug!("Chunk pool available again");
            self.pool_exhausted = false;
        }
        chunk.begin(&self.header, Instant::now());
        self.chunk_info = self.info;
        self.filling = Some(chunk);
        true
    }

    fn seal(&mut self, mut chunk: ChunkBuffer) {
        let counters = self.ctx.counters();
        self.sequence += 1;
        chunk.seal(self.chunk_info, self.sequence, Instant::now());
        if chunk.is_truncated() {
            PipelineCounters::bump(&counters.chunks_truncated);
        }
        tracing::trace!(
            sequence = self.sequence,
            len = chunk.len(),
            truncated = chunk.is_truncated(),
            "Sealed chunk"
        );
        self.ctx.pool().push_full(chunk);
        self.ctx.reset_watchdog();
        self.receive_fps.add_frame();
        PipelineCounters::bump(&counters.chunks_completed);
    }

    fn drop_frame(&self, summary: &mut BatchSummary) {
        summary.dropped += 1;
        PipelineCounters::bump(&self.ctx.counters().frames_dropped);
    }

    /// Throws away the chunk being filled. Returns true if there was one.
    fn discard(&mut self) -> bool {
        match self.filling.take() {
            Some(chunk) => {
                tracing::trace!(len = chunk.len(), "Discarding chunk");
                self.ctx.pool().return_empty(chunk);
                PipelineCounters::bump(&self.ctx.counters().chunks_discarded);
                true
            }
            None => false,
        }
    }

    /// Hands any held buffer back to the pool.
    fn release(&mut self) {
        if let Some(chunk) = self.filling.take() {
            self.ctx.pool().return_empty(chunk);
        }
    }
}

impl Drop for ChunkAssembler {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ChunkAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkAssembler")
            .field("scanner", &self.scanner.name())
            .field("state", &self.state())
            .field("sequence", &self.sequence)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::BufferPool;
    use crate::capture::{FrameDescriptor, FrameStatus, MarkerScanner, UvcPayloadScanner};
    use proptest::prelude::*;
    use std::time::Duration;

    const MARKER: [u8; 2] = [0xAA, 0x55];

    fn assembler(buffers: usize, capacity: usize, watchdog: u64) -> ChunkAssembler {
        let ctx = Arc::new(GrabContext::new(BufferPool::new(buffers, capacity), watchdog));
        ChunkAssembler::new(ctx, Arc::new(MarkerScanner::new(&MARKER)), Vec::new())
    }

    fn feed(asm: &mut ChunkAssembler, frames: &[Vec<u8>]) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for bytes in frames {
            asm.process_frame(&IsochronousFrame::new(FrameStatus::Ok, bytes), &mut summary);
        }
        summary
    }

    fn drain(asm: &ChunkAssembler) -> Vec<Vec<u8>> {
        let pool = asm.context().pool();
        let mut out = Vec::new();
        while let Some(chunk) = pool.pop_full(Duration::ZERO) {
            out.push(chunk.data().to_vec());
            pool.return_full_as_empty(chunk);
        }
        out
    }

    fn marked(before: &[u8], after: &[u8]) -> Vec<u8> {
        let mut v = before.to_vec();
        v.extend_from_slice(&MARKER);
        v.extend_from_slice(after);
        v
    }

    #[test]
    fn test_chunks_between_markers() {
        let mut asm = assembler(4, 64, 1000);
        let summary = feed(
            &mut asm,
            &[
                marked(&[], &[1, 2]),
                vec![3, 4],
                marked(&[5], &[10]),
                vec![11],
                marked(&[12], &[]),
            ],
        );

        assert_eq!(summary.chunks_completed, 2);
        assert_eq!(drain(&asm), vec![vec![1, 2, 3, 4, 5], vec![10, 11, 12]]);
        assert_eq!(asm.state(), AssemblerState::Filling);
    }

    #[test]
    fn test_idle_starts_filling_on_valid_data() {
        let mut asm = assembler(2, 16, 1000);
        assert_eq!(asm.state(), AssemblerState::Idle);
        feed(&mut asm, &[vec![7, 8]]);
        assert_eq!(asm.state(), AssemblerState::Filling);
        assert_eq!(asm.filling_len(), Some(2));
    }

    #[test]
    fn test_exhausted_pool_drops_frames() {
        let mut asm = assembler(2, 16, 1000);
        // Two sealed chunks and nobody decoding: the third cannot start.
        let summary = feed(
            &mut asm,
            &[
                vec![1],
                marked(&[], &[2]),
                marked(&[], &[3]),
                vec![4],
            ],
        );

        assert_eq!(summary.chunks_completed, 2);
        assert_eq!(summary.dropped, 2);
        assert_eq!(asm.state(), AssemblerState::Idle);
        assert_eq!(asm.context().counters().snapshot().frames_dropped, 2);

        // Once the consumer catches up, filling resumes at the next boundary.
        assert_eq!(drain(&asm).len(), 2);
        feed(&mut asm, &[vec![5]]);
        assert_eq!(asm.state(), AssemblerState::Idle);
        feed(&mut asm, &[marked(&[], &[6])]);
        assert_eq!(asm.state(), AssemblerState::Filling);
        assert_eq!(asm.filling_len(), Some(1));
    }

    #[test]
    fn test_no_partial_chunk_after_exhaustion() {
        let mut asm = assembler(2, 16, 1000);
        let summary = feed(
            &mut asm,
            &[
                marked(&[], &[1, 1]),
                marked(&[1, 1], &[2, 2]),
                // Start of the third image: no buffer left.
                marked(&[2, 2], &[3, 3]),
            ],
        );
        assert_eq!(summary.dropped, 1);

        let pool = asm.context().pool();
        let first = pool.pop_full(Duration::ZERO).unwrap();
        pool.return_full_as_empty(first);

        // The rest of the third image arrives after a buffer came back.
        let summary = feed(&mut asm, &[vec![3, 3], marked(&[3], &[4, 4]), vec![4]]);
        assert_eq!(summary.dropped, 1);
        assert_eq!(summary.chunks_completed, 0);
        assert_eq!(asm.context().counters().snapshot().frames_dropped, 2);

        assert_eq!(drain(&asm), vec![vec![2, 2, 2, 2]]);
        assert_eq!(asm.filling_len(), Some(3));
    }

    #[test]
    fn test_overflow_marks_truncated() {
        let mut asm = assembler(2, 4, 1000);
        feed(&mut asm, &[vec![1, 2, 3], vec![4, 5, 6], marked(&[], &[])]);

        let chunk = asm.context().pool().pop_full(Duration::ZERO).unwrap();
        assert_eq!(chunk.data(), &[1, 2, 3, 4]);
        assert!(chunk.is_truncated());
        assert_eq!(asm.context().counters().snapshot().chunks_truncated, 1);
    }

    #[test]
    fn test_invalid_frames_are_skipped() {
        let mut asm = assembler(2, 16, 1000);
        let mut summary = BatchSummary::default();
        asm.process_frame(&IsochronousFrame::new(FrameStatus::Ok, &[1]), &mut summary);
        asm.process_frame(&IsochronousFrame::new(FrameStatus::Error, &[9, 9]), &mut summary);
        asm.process_frame(&IsochronousFrame::new(FrameStatus::Ok, &[]), &mut summary);
        asm.process_frame(&IsochronousFrame::new(FrameStatus::Ok, &[2]), &mut summary);

        assert_eq!(summary.invalid, 2);
        assert_eq!(asm.filling_len(), Some(2));
    }

    #[test]
    fn test_invalid_chunk_discards_filling() {
        let ctx = Arc::new(GrabContext::new(BufferPool::new(2, 16), 1000));
        let mut asm = ChunkAssembler::new(ctx, Arc::new(UvcPayloadScanner), Vec::new());
        let mut summary = BatchSummary::default();
        asm.process_frame(&IsochronousFrame::new(FrameStatus::Ok, &[2, 0, 1, 2]), &mut summary);
        asm.process_frame(&IsochronousFrame::new(FrameStatus::Ok, &[2, 0x40, 3]), &mut summary);

        assert_eq!(summary.chunks_discarded, 1);
        assert_eq!(asm.state(), AssemblerState::Idle);
        assert_eq!(asm.context().pool().counts().empty, 2);
    }

    #[test]
    fn test_header_prefixes_every_chunk() {
        let ctx = Arc::new(GrabContext::new(BufferPool::new(3, 16), 1000));
        let mut asm = ChunkAssembler::new(ctx, Arc::new(MarkerScanner::new(&MARKER)), vec![0xF0]);
        feed(&mut asm, &[marked(&[], &[1]), marked(&[2], &[3]), marked(&[], &[])]);

        assert_eq!(drain(&asm), vec![vec![0xF0, 1, 2], vec![0xF0, 3]]);
    }

    #[test]
    fn test_luminance_follows_its_chunk() {
        let ctx = Arc::new(GrabContext::new(BufferPool::new(3, 16), 1000));
        let scanner = MarkerScanner::new(&MARKER).with_luminance_offset(2);
        let mut asm = ChunkAssembler::new(ctx, Arc::new(scanner), Vec::new());
        feed(
            &mut asm,
            &[marked(&[], &[40, 1]), marked(&[2], &[90, 3]), marked(&[], &[0])],
        );

        let pool = asm.context().pool();
        let first = pool.pop_full(Duration::ZERO).unwrap();
        assert_eq!(first.data(), &[1, 2]);
        assert_eq!(first.frame_info().average_luminance, Some(40));
        let second = pool.pop_full(Duration::ZERO).unwrap();
        assert_eq!(second.frame_info().average_luminance, Some(90));
    }

    #[test]
    fn test_watchdog_raises_desync() {
        let mut asm = assembler(2, 64, 3);
        let summary = feed(&mut asm, &[vec![1], vec![2], vec![3], vec![4]]);

        assert!(summary.desync);
        assert_eq!(
            asm.context().error(),
            Some(StreamError::Desync { frames: 4 })
        );
        // The stale chunk was dropped and a fresh one started with frame 4.
        assert_eq!(asm.filling_len(), Some(1));
        assert!(asm.context().should_be_grabbing());
    }

    #[test]
    fn test_stopped_context_ignores_transfers() {
        let mut asm = assembler(2, 16, 1000);
        feed(&mut asm, &[vec![1]]);
        asm.context().stop();

        let buffer = [1u8, 2, 3];
        let descriptors = [FrameDescriptor::ok(3)];
        let summary = asm.process_batch(&TransferBatch::new(&buffer, &descriptors, 3));
        assert_eq!(summary.frames, 0);
        assert_eq!(asm.state(), AssemblerState::Idle);
        assert_eq!(asm.context().pool().counts().empty, 2);
    }

    #[test]
    fn test_drop_returns_buffer() {
        let mut asm = assembler(2, 16, 1000);
        feed(&mut asm, &[vec![1]]);
        let ctx = Arc::clone(asm.context());
        drop(asm);
        assert_eq!(ctx.pool().counts().empty, 2);
    }

    proptest! {
        /// K markers, each preceded by chunk content, seal exactly K chunks
        /// holding the bytes between consecutive markers.
        #[test]
        fn prop_k_markers_give_k_chunks(
            chunks in proptest::collection::vec(
                proptest::collection::vec(
                    proptest::collection::vec(0u8..=0x7F, 1..8),
                    1..4,
                ),
                1..8,
            )
        ) {
            let mut asm = assembler(chunks.len() + 1, 256, 1_000_000);
            let mut frames = Vec::new();
            for pieces in &chunks {
                frames.extend(pieces.iter().cloned());
                frames.push(marked(&[], &[]));
            }
            let summary = feed(&mut asm, &frames);

            prop_assert_eq!(summary.chunks_completed, chunks.len());
            let expected: Vec<Vec<u8>> = chunks.iter().map(|p| p.concat()).collect();
            prop_assert_eq!(drain(&asm), expected);
        }
    }
}
