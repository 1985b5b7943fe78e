//! Prometheus metrics for the capture pipeline.
//!
//! This module exposes pipeline counters in Prometheus format. The HTTP
//! exporter is only built with the `metrics` feature.
//!
//! # Metrics Exposed
//!
//! ## Capture
//! - `isoc_frames_received_total` - Micro-frames seen by the assembler
//! - `isoc_frames_invalid_total` - Micro-frames rejected by the scanner
//! - `isoc_frames_dropped_total` - Micro-frames lost to pool exhaustion
//! - `isoc_chunks_completed_total` / `_discarded_total` / `_truncated_total`
//! - `isoc_receive_fps` - Chunk completion rate
//!
//! ## Decode
//! - `isoc_decode_failures_total` - Chunks the decoder rejected
//! - `isoc_images_delivered_total` / `isoc_images_dropped_total`
//! - `isoc_decode_fps` - Decode rate
//!
//! ## State
//! - `isoc_pool_empty`, `isoc_pool_full` - Buffer pool occupancy
//! - `isoc_agc_gain`, `isoc_agc_shutter` - Exposure controls
//!
//! # Example
//!
//! ```no_run
//! use isoc_pipeline::assembly::{CounterSnapshot, PoolCounts};
//! use isoc_pipeline::capture::SoftwareControls;
//! use isoc_pipeline::metrics::{MetricsRegistry, MetricsSnapshot};
//!
//! let registry = MetricsRegistry::new().expect("Failed to create registry");
//! let controls = SoftwareControls::new();
//! let pool = PoolCounts { empty: 9, full: 0, checked_out: 0 };
//!
//! registry.update(&MetricsSnapshot::from_parts(CounterSnapshot::default(), pool, &controls));
//! ```

mod collector;
#[cfg(feature = "metrics")]
mod server;

pub use collector::{MetricsError, MetricsRegistry, MetricsSnapshot};
#[cfg(feature = "metrics")]
pub use server::{MetricsServer, MetricsServerConfig, MetricsState, ServerError};
