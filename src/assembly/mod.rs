//! Chunk reassembly and the buffer pool.
//!
//! The [`ChunkAssembler`] runs in the capture context and fills buffers taken
//! from the [`BufferPool`]; the decode thread drains full buffers and returns
//! them. Both sides share a [`GrabContext`].

mod assembler;
mod chunk;
mod context;
mod pool;

pub use assembler::{AssemblerState, BatchSummary, ChunkAssembler};
pub use chunk::ChunkBuffer;
pub use context::{CounterSnapshot, GrabContext, PipelineCounters};
pub use pool::{BufferPool, PoolCounts, MAX_CHUNK_BUFFERS, MIN_CHUNK_BUFFERS};
