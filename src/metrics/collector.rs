//! Metrics collection and registry.

use crate::assembly::{CounterSnapshot, PoolCounts};
use crate::capture::CameraControls;
use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// A snapshot of pipeline state for metrics update.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// Pipeline event counters.
    pub counters: CounterSnapshot,
    /// Chunk buffers waiting to be filled.
    pub pool_empty: usize,
    /// Chunk buffers waiting to be decoded.
    pub pool_full: usize,
    /// Current gain control value.
    pub gain: f32,
    /// Current shutter control value.
    pub shutter: f32,
}

impl MetricsSnapshot {
    /// Creates a snapshot from the running pipeline and camera controls.
    pub fn from_parts(
        counters: CounterSnapshot,
        pool: PoolCounts,
        controls: &dyn CameraControls,
    ) -> Self {
        Self {
            counters,
            pool_empty: pool.empty,
            pool_full: pool.full,
            gain: controls.gain(),
            shutter: controls.shutter(),
        }
    }
}

/// Prometheus metrics registry for the capture pipeline.
pub struct MetricsRegistry {
    registry: Registry,

    // Capture side
    frames_received: IntCounter,
    frames_invalid: IntCounter,
    frames_dropped: IntCounter,
    chunks_completed: IntCounter,
    chunks_discarded: IntCounter,
    chunks_truncated: IntCounter,

    // Decode side
    decode_failures: IntCounter,
    images_delivered: IntCounter,
    images_dropped: IntCounter,

    // Rates and state
    receive_fps: Gauge,
    decode_fps: Gauge,
    pool_empty: IntGauge,
    pool_full: IntGauge,
    agc_gain: Gauge,
    agc_shutter: Gauge,
}

/// Advances a counter to `target`; counters never go backwards.
fn advance(counter: &IntCounter, target: u64) {
    let current = counter.get();
    if target > current {
        counter.inc_by(target - current);
    }
}

impl MetricsRegistry {
    /// Creates a new metrics registry with all pipeline metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let frames_received = IntCounter::new(
            "isoc_frames_received_total",
            "Isochronous micro-frames seen by the assembler",
        )?;
        let frames_invalid = IntCounter::new(
            "isoc_frames_invalid_total",
            "Micro-frames rejected by the frame scanner",
        )?;
        let frames_dropped = IntCounter::new(
            "isoc_frames_dropped_total",
            "Micro-frames dropped because no chunk buffer was free",
        )?;
        let chunks_completed = IntCounter::new(
            "isoc_chunks_completed_total",
            "Chunks sealed and queued for decoding",
        )?;
        let chunks_discarded = IntCounter::new(
            "isoc_chunks_discarded_total",
            "Partially assembled chunks thrown away",
        )?;
        let chunks_truncated = IntCounter::new(
            "isoc_chunks_truncated_total",
            "Chunks that overflowed their buffer",
        )?;
        let decode_failures = IntCounter::new(
            "isoc_decode_failures_total",
            "Chunks the decoder rejected",
        )?;
        let images_delivered = IntCounter::new(
            "isoc_images_delivered_total",
            "Decoded images handed to the application",
        )?;
        let images_dropped = IntCounter::new(
            "isoc_images_dropped_total",
            "Decoded images dropped because the application lagged",
        )?;
        let receive_fps = Gauge::new("isoc_receive_fps", "Chunk completion rate")?;
        let decode_fps = Gauge::new("isoc_decode_fps", "Image decode rate")?;
        let pool_empty = IntGauge::new("isoc_pool_empty", "Chunk buffers ready to fill")?;
        let pool_full = IntGauge::new("isoc_pool_full", "Chunk buffers waiting to be decoded")?;
        let agc_gain = Gauge::new("isoc_agc_gain", "Current gain control value")?;
        let agc_shutter = Gauge::new("isoc_agc_shutter", "Current shutter control value")?;

        registry.register(Box::new(frames_received.clone()))?;
        registry.register(Box::new(frames_invalid.clone()))?;
        registry.register(Box::new(frames_dropped.clone()))?;
        registry.register(Box::new(chunks_completed.clone()))?;
        registry.register(Box::new(chunks_discarded.clone()))?;
        registry.register(Box::new(chunks_truncated.clone()))?;
        registry.register(Box::new(decode_failures.clone()))?;
        registry.register(Box::new(images_delivered.clone()))?;
        registry.register(Box::new(images_dropped.clone()))?;
        registry.register(Box::new(receive_fps.clone()))?;
        registry.register(Box::new(decode_fps.clone()))?;
        registry.register(Box::new(pool_empty.clone()))?;
        registry.register(Box::new(pool_full.clone()))?;
        registry.register(Box::new(agc_gain.clone()))?;
        registry.register(Box::new(agc_shutter.clone()))?;

        Ok(Self {
            registry,
            frames_received,
            frames_invalid,
            frames_dropped,
            chunks_completed,
            chunks_discarded,
            chunks_truncated,
            decode_failures,
            images_delivered,
            images_dropped,
            receive_fps,
            decode_fps,
            pool_empty,
            pool_full,
            agc_gain,
            agc_shutter,
        })
    }

    /// Updates all metrics from a snapshot of pipeline state.
    pub fn update(&self, snapshot: &MetricsSnapshot) {
        let c = &snapshot.counters;
        advance(&self.frames_received, c.frames_received);
        advance(&self.frames_invalid, c.frames_invalid);
        advance(&self.frames_dropped, c.frames_dropped);
        advance(&self.chunks_completed, c.chunks_completed);
        advance(&self.chunks_discarded, c.chunks_discarded);
        advance(&self.chunks_truncated, c.chunks_truncated);
        advance(&self.decode_failures, c.decode_failures);
        advance(&self.images_delivered, c.images_delivered);
        advance(&self.images_dropped, c.images_dropped);

        self.receive_fps.set(f64::from(c.receive_fps));
        self.decode_fps.set(f64::from(c.decode_fps));
        self.pool_empty.set(snapshot.pool_empty as i64);
        self.pool_full.set(snapshot.pool_full as i64);
        self.agc_gain.set(f64::from(snapshot.gain));
        self.agc_shutter.set(f64::from(snapshot.shutter));
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
