//! Image analysis on the decode thread.
//!
//! Luminance histograms feed the auto gain controller, which writes camera
//! exposure controls back through [`CameraControls`](crate::capture::CameraControls).
//! Frame counters measure receive and decode rates.

mod agc;
mod counter;
mod histogram;

pub use agc::{Agc, AgcAdjustment, AgcConfig, AgcEffect, AgcMeasure, AgcMode, AgcState};
pub use counter::FrameCounter;
pub use histogram::{luminance, Histogram, HistogramConfig, HistogramStats};
