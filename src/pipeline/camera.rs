//! A camera built from a scanner strategy and the shared pipeline.

use super::{ControlUpdate, DecodedImage, Pipeline};
use crate::assembly::{ChunkAssembler, CounterSnapshot};
use crate::capture::{Camera, CameraControls, CameraError, Control, FileConfig, FrameScanner};
use crate::decode::Decompressor;
use crate::error::StreamError;
use std::sync::Arc;
use std::time::Duration;

type DecompressorFactory = Box<dyn Fn() -> Box<dyn Decompressor> + Send>;

/// Device-independent camera.
///
/// Everything device specific is injected: the scanner that finds chunk
/// boundaries, the controls auto gain writes to, and optionally a
/// decompressor for vendor formats. Software controls are kept in the
/// configuration so they survive a stream restart.
pub struct GenericCamera {
    config: FileConfig,
    scanner: Arc<dyn FrameScanner>,
    controls: Arc<dyn CameraControls>,
    decompressor: Option<DecompressorFactory>,
    pipeline: Option<Pipeline>,
}

impl GenericCamera {
    /// Creates a camera that is not yet streaming.
    pub fn new(
        config: FileConfig,
        scanner: Arc<dyn FrameScanner>,
        controls: Arc<dyn CameraControls>,
    ) -> Self {
        Self {
            config,
            scanner,
            controls,
            decompressor: None,
            pipeline: None,
        }
    }

    /// Supplies a decompressor for each stream start.
    pub fn with_decompressor(
        mut self,
        factory: impl Fn() -> Box<dyn Decompressor> + Send + 'static,
    ) -> Self {
        self.decompressor = Some(Box::new(factory));
        self
    }

    /// Current configuration, including software control values.
    pub fn config(&self) -> &FileConfig {
        &self.config
    }

    /// Exposure controls shared with auto gain.
    pub fn controls(&self) -> &Arc<dyn CameraControls> {
        &self.controls
    }

    /// The running pipeline, if streaming.
    pub fn pipeline(&self) -> Option<&Pipeline> {
        self.pipeline.as_ref()
    }

    /// Counters of the running pipeline.
    pub fn counters(&self) -> Option<CounterSnapshot> {
        self.pipeline.as_ref().map(Pipeline::counters)
    }

    fn send(&self, update: ControlUpdate) {
        if let Some(pipeline) = &self.pipeline {
            pipeline.send_control(update);
        }
    }
}

impl Camera for GenericCamera {
    fn start_stream(&mut self) -> Result<ChunkAssembler, CameraError> {
        if self.pipeline.is_some() {
            return Err(CameraError::AlreadyStreaming);
        }
        let decompressor = self.decompressor.as_ref().map(|make| make());
        let (pipeline, assembler) = Pipeline::start(
            &self.config,
            Arc::clone(&self.scanner),
            Arc::clone(&self.controls),
            decompressor,
        )?;
        self.pipeline = Some(pipeline);
        Ok(assembler)
    }

    fn stop_stream(&mut self) {
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.stop();
        }
    }

    fn is_streaming(&self) -> bool {
        self.pipeline.is_some()
    }

    fn set_control(&mut self, control: Control, value: f32) -> Result<(), CameraError> {
        if !(0.0..=1.0).contains(&value) {
            return Err(CameraError::InvalidValue { control, value });
        }
        tracing::debug!(?control, value, "Set control");

        // Software controls map [0, 1] onto the lookup table's [0, 2].
        let adjust = &mut self.config.adjust;
        match control {
            Control::Brightness => self.controls.set_brightness(value),
            Control::Gain => self.controls.set_gain(value),
            Control::Shutter => self.controls.set_shutter(value),
            Control::Offset => self.controls.set_offset(value),
            Control::Contrast => {
                adjust.contrast = value * 2.0;
                let update = ControlUpdate::Contrast(adjust.contrast);
                self.send(update);
            }
            Control::Gamma => {
                adjust.gamma = value * 2.0;
                let update = ControlUpdate::Gamma(adjust.gamma);
                self.send(update);
            }
            Control::Saturation => {
                adjust.saturation = value * 2.0;
                let update = ControlUpdate::Saturation(adjust.saturation);
                self.send(update);
            }
        }
        Ok(())
    }

    fn get_frame(&mut self, timeout: Duration) -> Option<DecodedImage> {
        self.pipeline.as_ref()?.recv_image(timeout)
    }

    fn take_stream_error(&mut self) -> Option<StreamError> {
        self.pipeline.as_ref()?.take_error()
    }
}

impl Drop for GenericCamera {
    fn drop(&mut self) {
        self.stop_stream();
    }
}

impl std::fmt::Debug for GenericCamera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenericCamera")
            .field("scanner", &self.scanner.name())
            .field("streaming", &self.is_streaming())
            .finish()
    }
}
