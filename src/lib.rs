//! USB Isochronous Webcam Pipeline
//!
//! Reassembles a continuous USB isochronous byte stream into discrete image
//! chunks, decodes them to RGB on a dedicated thread, and closes an auto
//! gain control loop back to the camera's exposure controls.
//!
//! # Architecture
//!
//! ```text
//! USB completion → FrameScanner → ChunkAssembler → BufferPool → decode thread
//!  (capture context, never blocks)                       ↓
//!                                          Decoder → Histogram → AGC
//!                                             ↓                   ↓
//!                                      image channel        CameraControls
//! ```
//!
//! # Design Principles
//!
//! - **Never block the capture context**: buffers are preallocated; when
//!   none is free, incoming data is dropped and counted.
//! - **Bounded resources**: a fixed pool of chunk buffers cycles between the
//!   assembler and the decoder.
//! - **Stream errors are signals**: desync and repeated decode failures are
//!   recorded for the owner to act on; neither thread unwinds.
//!
//! # Example
//!
//! ```no_run
//! use isoc_pipeline::{
//!     capture::{Camera, CameraControls, FileConfig, SoftwareControls, SyntheticConfig, SyntheticStream},
//!     GenericCamera,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let controls: Arc<dyn CameraControls> = Arc::new(SoftwareControls::new());
//! let mut stream = SyntheticStream::new(SyntheticConfig::default(), 1, Arc::clone(&controls));
//!
//! let mut config = FileConfig::default();
//! config.pipeline.format = stream.format();
//! let mut camera = GenericCamera::new(config, Arc::new(stream.scanner()), controls);
//!
//! let mut assembler = camera.start_stream().unwrap();
//! for _ in 0..100 {
//!     assembler.process_batch(&stream.next_batch());
//! }
//! while let Some(frame) = camera.get_frame(Duration::from_millis(50)) {
//!     println!("image {} {}x{}", frame.sequence, frame.image.width(), frame.image.height());
//! }
//! camera.stop_stream();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod analysis;
pub mod assembly;
pub mod capture;
pub mod decode;
pub mod error;
pub mod metrics;
pub mod pipeline;

// Re-export commonly used types at crate root
pub use analysis::{Agc, AgcConfig, FrameCounter, Histogram};
pub use assembly::{BufferPool, ChunkAssembler, ChunkBuffer, GrabContext};
pub use capture::{Camera, CameraControls, FileConfig, FrameScanner, PipelineConfig};
pub use decode::{Decoder, SourceFormat};
pub use error::{PipelineError, StreamError};
pub use pipeline::{DecodedImage, GenericCamera, Pipeline};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
