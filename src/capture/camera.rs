//! Camera capability interfaces.
//!
//! [`CameraControls`] is the narrow channel through which auto gain control
//! writes exposure settings back to a device. [`Camera`] is what an
//! application drives: start and stop the stream, change controls, and pull
//! decoded images.

use crate::assembly::ChunkAssembler;
use crate::error::{PipelineError, StreamError};
use crate::pipeline::DecodedImage;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during camera operations.
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera is already streaming")]
    AlreadyStreaming,
    #[error("control {control:?} value {value} outside [0, 1]")]
    InvalidValue { control: Control, value: f32 },
    #[error("failed to start pipeline: {0}")]
    Pipeline(#[from] PipelineError),
}

/// User-facing camera controls, all normalized to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
    /// Exposure offset; also the auto gain target when brightness tracking is on.
    Brightness,
    Contrast,
    Gamma,
    Saturation,
    Gain,
    Shutter,
    Offset,
}

impl Control {
    /// Returns true for controls implemented by the decoder's lookup tables.
    pub fn is_software(self) -> bool {
        matches!(self, Self::Contrast | Self::Gamma | Self::Saturation)
    }
}

/// Exposure settings a device exposes to auto gain control.
///
/// Values are normalized to `[0, 1]`; callers clamp before writing.
/// Implementations are shared between the decode thread and the owner, so
/// every method takes `&self`.
pub trait CameraControls: Send + Sync {
    fn gain(&self) -> f32;
    fn set_gain(&self, value: f32);
    fn shutter(&self) -> f32;
    fn set_shutter(&self, value: f32);
    fn brightness(&self) -> f32;
    fn set_brightness(&self, value: f32);
    fn offset(&self) -> f32;
    fn set_offset(&self, value: f32);
}

/// Control values held in memory.
///
/// Stands in for a device without hardware controls; the synthetic stream
/// reads its exposure from here.
#[derive(Debug)]
pub struct SoftwareControls {
    gain: AtomicU32,
    shutter: AtomicU32,
    brightness: AtomicU32,
    offset: AtomicU32,
}

impl SoftwareControls {
    /// All controls at mid range.
    pub fn new() -> Self {
        let mid = 0.5f32.to_bits();
        Self {
            gain: AtomicU32::new(mid),
            shutter: AtomicU32::new(mid),
            brightness: AtomicU32::new(mid),
            offset: AtomicU32::new(mid),
        }
    }

    #[inline]
    fn load(slot: &AtomicU32) -> f32 {
        f32::from_bits(slot.load(Ordering::Relaxed))
    }

    #[inline]
    fn store(slot: &AtomicU32, value: f32) {
        slot.store(value.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }
}

impl Default for SoftwareControls {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraControls for SoftwareControls {
    fn gain(&self) -> f32 {
        Self::load(&self.gain)
    }

    fn set_gain(&self, value: f32) {
        Self::store(&self.gain, value);
    }

    fn shutter(&self) -> f32 {
        Self::load(&self.shutter)
    }

    fn set_shutter(&self, value: f32) {
        Self::store(&self.shutter, value);
    }

    fn brightness(&self) -> f32 {
        Self::load(&self.brightness)
    }

    fn set_brightness(&self, value: f32) {
        Self::store(&self.brightness, value);
    }

    fn offset(&self) -> f32 {
        Self::load(&self.offset)
    }

    fn set_offset(&self, value: f32) {
        Self::store(&self.offset, value);
    }
}

/// A streaming camera.
///
/// `start_stream` hands back the [`ChunkAssembler`] that the USB transport
/// must call from its completion context. Decoded images are pulled with
/// [`get_frame`](Camera::get_frame).
pub trait Camera {
    /// Builds the pipeline and starts the decode thread.
    fn start_stream(&mut self) -> Result<ChunkAssembler, CameraError>;

    /// Stops the pipeline and joins the decode thread.
    fn stop_stream(&mut self);

    /// Checks if the camera is currently streaming.
    fn is_streaming(&self) -> bool;

    /// Sets a control to a normalized value.
    fn set_control(&mut self, control: Control, value: f32) -> Result<(), CameraError>;

    /// Waits up to `timeout` for the next decoded image.
    fn get_frame(&mut self, timeout: Duration) -> Option<DecodedImage>;

    /// Takes the pending stream error, if any.
    fn take_stream_error(&mut self) -> Option<StreamError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_software_controls_clamp() {
        let controls = SoftwareControls::new();
        assert_eq!(controls.gain(), 0.5);

        controls.set_gain(1.5);
        assert_eq!(controls.gain(), 1.0);
        controls.set_shutter(-0.2);
        assert_eq!(controls.shutter(), 0.0);
        controls.set_brightness(0.25);
        assert_eq!(controls.brightness(), 0.25);
    }

    #[test]
    fn test_software_control_kinds() {
        assert!(Control::Gamma.is_software());
        assert!(!Control::Gain.is_software());
        assert!(!Control::Brightness.is_software());
    }
}
