//! Pipeline lifecycle: wiring the assembler, the buffer pool and the decode
//! thread together.
//!
//! ```text
//! USB completion ──► ChunkAssembler ──► BufferPool (full) ──► decode thread
//!                          ▲                                     │
//!                          └──────── BufferPool (empty) ◄────────┘
//!                                                                 │
//!                               bounded image channel ◄───────────┘
//! ```

mod camera;
mod worker;

pub use camera::GenericCamera;

use crate::analysis::{Agc, AgcMode, FrameCounter, Histogram};
use crate::assembly::{
    BufferPool, ChunkAssembler, CounterSnapshot, GrabContext, PoolCounts,
};
use crate::capture::{CameraControls, ConfigError, FileConfig, FrameScanner};
use crate::decode::{ChunkLimits, Decoder, Decompressor, Orientation};
use crate::error::{PipelineError, StreamError};
use crossbeam_channel::{Receiver, Sender};
use image::RgbImage;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use worker::DecodeWorker;

/// An image produced by the decode thread.
///
/// Every image received from the pipeline is new: each completed chunk is
/// sent at most once, so there is no separate "frame is new" flag. When the
/// application falls behind, images are dropped rather than repeated.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub image: RgbImage,
    /// Sequence number of the chunk it was decoded from.
    pub sequence: u64,
    /// When the chunk was sealed.
    pub captured_at: Option<Instant>,
    pub decoded_at: Instant,
    /// Luminance reported by the camera, if any.
    pub average_luminance: Option<u8>,
}

/// Settings changed on the decode thread between chunks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlUpdate {
    Contrast(f32),
    Gamma(f32),
    Saturation(f32),
    Gains { red: f32, green: f32, blue: f32 },
    Orientation(Orientation),
    AgcMode(AgcMode),
}

/// A running pipeline.
///
/// Dropping it stops the decode thread.
pub struct Pipeline {
    ctx: Arc<GrabContext>,
    worker: Option<JoinHandle<()>>,
    images: Receiver<DecodedImage>,
    updates: Sender<ControlUpdate>,
}

impl Pipeline {
    /// Allocates the buffer pool, spawns the decode thread and returns the
    /// assembler the USB transport must feed.
    pub fn start(
        config: &FileConfig,
        scanner: Arc<dyn FrameScanner>,
        controls: Arc<dyn CameraControls>,
        decompressor: Option<Box<dyn Decompressor>>,
    ) -> Result<(Self, ChunkAssembler), PipelineError> {
        let pc = &config.pipeline;
        pc.validate().map_err(|e| match e {
            ConfigError::InsufficientBuffers { requested, minimum } => {
                PipelineError::InsufficientBuffers { requested, minimum }
            }
            other => PipelineError::Config(other),
        })?;
        config.agc.validate()?;

        let decoder = Decoder::new(pc.format, &config.adjust, decompressor)?.with_limits(
            ChunkLimits {
                exact_length: pc.exact_length,
                minimum_length: pc.minimum_length,
                skip_bytes: pc.skip_bytes,
            },
        );

        let pool = BufferPool::new(pc.chunk_buffers, pc.chunk_capacity());
        let ctx = Arc::new(GrabContext::new(pool, pc.max_frames_between_chunks));
        let (image_tx, images) = crossbeam_channel::bounded(pc.image_queue_depth);
        let (updates, update_rx) = crossbeam_channel::unbounded();

        let worker = DecodeWorker {
            ctx: Arc::clone(&ctx),
            decoder,
            histogram: Histogram::new(config.histogram.clone()),
            agc: Agc::new(config.agc.clone()),
            controls,
            images: image_tx,
            updates: update_rx,
            timeout: pc.decode_timeout(),
            max_failures: pc.max_consecutive_decode_failures,
            consecutive_failures: 0,
            decode_fps: FrameCounter::new(),
        };
        let handle = std::thread::Builder::new()
            .name("isoc-decode".into())
            .spawn(move || worker.run())?;

        tracing::info!(
            scanner = scanner.name(),
            buffers = pc.chunk_buffers,
            capacity = pc.chunk_capacity(),
            "Pipeline started"
        );

        let assembler = ChunkAssembler::new(Arc::clone(&ctx), scanner, pc.chunk_header.clone());
        Ok((
            Self {
                ctx,
                worker: Some(handle),
                images,
                updates,
            },
            assembler,
        ))
    }

    pub fn context(&self) -> &Arc<GrabContext> {
        &self.ctx
    }

    /// Receiving end of the image channel.
    pub fn images(&self) -> &Receiver<DecodedImage> {
        &self.images
    }

    /// Waits up to `timeout` for the next decoded image.
    pub fn recv_image(&self, timeout: Duration) -> Option<DecodedImage> {
        self.images.recv_timeout(timeout).ok()
    }

    /// Queues a settings change for the decode thread.
    pub fn send_control(&self, update: ControlUpdate) {
        if self.updates.send(update).is_err() {
            tracing::debug!(?update, "Decode thread gone, control update ignored");
        }
    }

    pub fn take_error(&self) -> Option<StreamError> {
        self.ctx.take_error()
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.ctx.counters().snapshot()
    }

    pub fn pool_counts(&self) -> PoolCounts {
        self.ctx.pool().counts()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Stops grabbing and joins the decode thread.
    pub fn stop(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };
        self.ctx.stop();
        if handle.join().is_err() {
            tracing::error!("Decode thread panicked");
        }
        let counters = self.counters();
        tracing::info!(
            chunks = counters.chunks_completed,
            delivered = counters.images_delivered,
            dropped_frames = counters.frames_dropped,
            decode_failures = counters.decode_failures,
            "Pipeline stopped"
        );
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("running", &self.is_running())
            .field("pool", &self.pool_counts())
            .finish()
    }
}
