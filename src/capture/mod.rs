//! The USB side of the pipeline.
//!
//! Isochronous transfers arrive as a shared byte buffer plus per-micro-frame
//! descriptors. A [`FrameScanner`] classifies each micro-frame for the
//! assembler. This module also holds pipeline configuration, the camera
//! capability traits and a synthetic stream for demos and tests.

mod camera;
mod config;
mod frame;
mod scanner;
mod synthetic;

pub use camera::{Camera, CameraControls, CameraError, Control, SoftwareControls};
pub use config::{ConfigError, FileConfig, PipelineConfig};
pub use frame::{FrameDescriptor, FrameStatus, IsochronousFrame, TransferBatch};
pub use scanner::{
    FrameInfo, FrameScanResult, FrameScanner, GenericScanner, MarkerScanner, Span,
    UvcPayloadScanner,
};
pub use synthetic::{SyntheticConfig, SyntheticStats, SyntheticStream};
