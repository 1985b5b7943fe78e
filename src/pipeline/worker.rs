//! The decode thread.
//!
//! Blocks on the full queue with a timeout, then runs decode, histogram and
//! auto gain control for each chunk before handing the buffer back.

use super::{ControlUpdate, DecodedImage};
use crate::analysis::{Agc, AgcMode, FrameCounter, Histogram};
use crate::assembly::{ChunkBuffer, GrabContext, PipelineCounters};
use crate::capture::CameraControls;
use crate::decode::Decoder;
use crate::error::StreamError;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub(crate) struct DecodeWorker {
    pub(crate) ctx: Arc<GrabContext>,
    pub(crate) decoder: Decoder,
    pub(crate) histogram: Histogram,
    pub(crate) agc: Agc,
    pub(crate) controls: Arc<dyn CameraControls>,
    pub(crate) images: Sender<DecodedImage>,
    pub(crate) updates: Receiver<ControlUpdate>,
    pub(crate) timeout: Duration,
    pub(crate) max_failures: u32,
    pub(crate) consecutive_failures: u32,
    pub(crate) decode_fps: FrameCounter,
}

impl DecodeWorker {
    pub(crate) fn run(mut self) {
        tracing::debug!(format = ?self.decoder.format(), "Decode thread started");
        while self.ctx.should_be_grabbing() {
            self.apply_updates();
            let Some(chunk) = self.ctx.pool().pop_full(self.timeout) else {
                continue;
            };
            self.process(&chunk);
            self.ctx.pool().return_full_as_empty(chunk);
        }
        tracing::debug!(
            decoded = self.decode_fps.total_frames(),
            "Decode thread exiting"
        );
    }

    fn apply_updates(&mut self) {
        while let Ok(update) = self.updates.try_recv() {
            tracing::debug!(?update, "Applying control update");
            match update {
                ControlUpdate::Contrast(v) => self.decoder.lut_mut().set_contrast(v),
                ControlUpdate::Gamma(v) => self.decoder.lut_mut().set_gamma(v),
                ControlUpdate::Saturation(v) => self.decoder.lut_mut().set_saturation(v),
                ControlUpdate::Gains { red, green, blue } => {
                    self.decoder.lut_mut().set_gains(red, green, blue)
                }
                ControlUpdate::Orientation(o) => self.decoder.set_orientation(o),
                ControlUpdate::AgcMode(mode) => self.agc.set_mode(mode),
            }
        }
    }

    pub(crate) fn process(&mut self, chunk: &ChunkBuffer) {
        let counters = self.ctx.counters();
        let image = match self.decoder.decode(chunk) {
            Ok(image) => image,
            Err(error) => {
                PipelineCounters::bump(&counters.decode_failures);
                self.consecutive_failures += 1;
                tracing::debug!(
                    %error,
                    sequence = chunk.sequence(),
                    len = chunk.len(),
                    consecutive = self.consecutive_failures,
                    "Discarding chunk"
                );
                if self.consecutive_failures == self.max_failures {
                    self.ctx.record_error(StreamError::DecodeFailures {
                        consecutive: self.consecutive_failures,
                    });
                }
                return;
            }
        };
        self.consecutive_failures = 0;

        if self.agc.config().mode == AgcMode::Histogram {
            self.histogram.process_rgb(&image);
        }
        self.agc
            .update(&self.histogram, chunk.frame_info(), &*self.controls);

        self.decode_fps.add_frame();
        if self.decode_fps.update() {
            counters.set_decode_fps(self.decode_fps.fps());
        }

        let decoded = DecodedImage {
            image,
            sequence: chunk.sequence(),
            captured_at: chunk.fill_completed_at(),
            decoded_at: Instant::now(),
            average_luminance: chunk.frame_info().average_luminance,
        };
        match self.images.try_send(decoded) {
            Ok(()) => PipelineCounters::bump(&counters.images_delivered),
            Err(TrySendError::Full(dropped)) => {
                PipelineCounters::bump(&counters.images_dropped);
                tracing::trace!(sequence = dropped.sequence, "Consumer behind, dropping image");
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::trace!("No image receiver");
            }
        }
    }
}
