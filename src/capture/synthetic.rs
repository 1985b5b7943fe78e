//! Deterministic synthetic isochronous stream.
//!
//! Emulates a PAC207-style camera: each image is sent as the start-of-frame
//! marker, one average-luminance byte and a raw GRBG Bayer plane, split over
//! consecutive micro-frames. Every image starts on a fresh micro-frame.
//! Corrupt micro-frames are inserted at random between good ones, so they
//! never displace image data.

use super::camera::CameraControls;
use super::frame::{FrameDescriptor, FrameStatus, TransferBatch};
use super::scanner::MarkerScanner;
use crate::analysis::luminance;
use crate::decode::{BayerLayout, Encoding, SourceFormat};
use rand_chacha::ChaCha8Rng;
use rand_core::{RngCore, SeedableRng};
use std::sync::Arc;

/// Offset of the luminance byte from the start of the marker.
const LUMINANCE_OFFSET: usize = MarkerScanner::PAC207_MARKER.len();
const HEADER_LEN: usize = LUMINANCE_OFFSET + 1;

/// Shape of the synthetic stream.
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub width: u32,
    pub height: u32,
    /// Slot size of one micro-frame in the transfer buffer.
    pub bytes_per_frame: usize,
    /// Micro-frames per transfer.
    pub frames_per_transfer: usize,
    /// Probability of inserting a corrupt micro-frame before each good one.
    pub error_rate: f64,
    /// Scene colour at unit exposure.
    pub scene: [u8; 3],
    /// Peak per-pixel noise.
    pub noise: u8,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            bytes_per_frame: 1023,
            frames_per_transfer: 10,
            error_rate: 0.0,
            scene: [150, 128, 100],
            noise: 4,
        }
    }
}

/// Running totals of what the stream produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyntheticStats {
    pub frames: u64,
    pub error_frames: u64,
    pub images: u64,
}

/// Source of synthetic isochronous transfers.
pub struct SyntheticStream {
    config: SyntheticConfig,
    rng: ChaCha8Rng,
    controls: Arc<dyn CameraControls>,
    image: Vec<u8>,
    cursor: usize,
    forced_errors: u32,
    buffer: Vec<u8>,
    descriptors: Vec<FrameDescriptor>,
    stats: SyntheticStats,
}

impl SyntheticStream {
    /// Creates a stream seeded for reproducible output.
    pub fn new(config: SyntheticConfig, seed: u64, controls: Arc<dyn CameraControls>) -> Self {
        Self::with_rng(config, ChaCha8Rng::seed_from_u64(seed), controls)
    }

    /// Creates a stream seeded from the operating system.
    pub fn from_entropy(config: SyntheticConfig, controls: Arc<dyn CameraControls>) -> Self {
        Self::with_rng(config, ChaCha8Rng::from_entropy(), controls)
    }

    fn with_rng(config: SyntheticConfig, rng: ChaCha8Rng, controls: Arc<dyn CameraControls>) -> Self {
        let slot = config.bytes_per_frame.max(1);
        let frames = config.frames_per_transfer.max(1);
        Self {
            buffer: vec![0; slot * frames],
            descriptors: Vec::with_capacity(frames),
            image: Vec::with_capacity(HEADER_LEN + (config.width * config.height) as usize),
            cursor: 0,
            forced_errors: 0,
            config,
            rng,
            controls,
            stats: SyntheticStats::default(),
        }
    }

    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }

    /// Format of the images carried by the stream.
    pub fn format(&self) -> SourceFormat {
        SourceFormat::new(
            self.config.width,
            self.config.height,
            Encoding::Bayer {
                layout: BayerLayout::InterleavedGrbg,
            },
        )
    }

    /// Scanner that understands this stream.
    pub fn scanner(&self) -> MarkerScanner {
        MarkerScanner::pac207().with_luminance_offset(LUMINANCE_OFFSET)
    }

    /// Good micro-frames needed to carry one image.
    pub fn frames_per_image(&self) -> usize {
        let len = HEADER_LEN + (self.config.width * self.config.height) as usize;
        len.div_ceil(self.config.bytes_per_frame.max(1))
    }

    /// Makes the next micro-frame a corrupt one.
    pub fn force_error(&mut self) {
        self.forced_errors += 1;
    }

    pub fn stats(&self) -> SyntheticStats {
        self.stats
    }

    /// Produces the next transfer.
    pub fn next_batch(&mut self) -> TransferBatch<'_> {
        let slot = self.config.bytes_per_frame.max(1);
        let mut buffer = std::mem::take(&mut self.buffer);
        self.descriptors.clear();
        for frame in buffer.chunks_exact_mut(slot) {
            let descriptor = self.next_frame(frame);
            self.descriptors.push(descriptor);
        }
        self.buffer = buffer;
        TransferBatch::new(&self.buffer, &self.descriptors, slot)
    }

    /// Writes one micro-frame into `slot`.
    pub fn next_frame(&mut self, slot: &mut [u8]) -> FrameDescriptor {
        self.stats.frames += 1;
        if self.forced_errors > 0 || self.roll_error() {
            self.forced_errors = self.forced_errors.saturating_sub(1);
            self.stats.error_frames += 1;
            let len = slot.len() / 2;
            self.rng.fill_bytes(&mut slot[..len]);
            return FrameDescriptor {
                status: FrameStatus::Error,
                actual: len,
            };
        }

        if self.cursor >= self.image.len() {
            self.render();
        }
        let n = slot.len().min(self.image.len() - self.cursor);
        slot[..n].copy_from_slice(&self.image[self.cursor..self.cursor + n]);
        self.cursor += n;
        FrameDescriptor::ok(n)
    }

    fn roll_error(&mut self) -> bool {
        self.config.error_rate > 0.0
            && (self.rng.next_u32() as f64 / u32::MAX as f64) < self.config.error_rate
    }

    /// Exposure model: gain and shutter scale the scene, brightness offsets it.
    fn expose(&self, value: u8) -> f32 {
        let controls = &*self.controls;
        let scale = 4.0 * controls.gain() * controls.shutter();
        f32::from(value) * scale + (controls.brightness() - 0.5) * 128.0
    }

    fn render(&mut self) {
        let (w, h) = (self.config.width as usize, self.config.height as usize);
        let [r, g, b] = self.config.scene.map(|c| self.expose(c));
        let noise = i32::from(self.config.noise);

        self.image.clear();
        self.image.extend_from_slice(&MarkerScanner::PAC207_MARKER);
        self.image.push(luminance(clamp(r), clamp(g), clamp(b)));
        for y in 0..h {
            for x in 0..w {
                let level = match (y & 1, x & 1) {
                    (0, 0) | (1, 1) => g,
                    (0, _) => r,
                    _ => b,
                };
                let jitter = if noise > 0 {
                    (self.rng.next_u32() % (2 * noise as u32 + 1)) as i32 - noise
                } else {
                    0
                };
                self.image.push(clamp(level + jitter as f32));
            }
        }
        self.cursor = 0;
        self.stats.images += 1;
    }
}

#[inline]
fn clamp(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

impl std::fmt::Debug for SyntheticStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyntheticStream")
            .field("config", &self.config)
            .field("stats", &self.stats)
            .finish()
    }
}
