//! Luminance histogram for exposure feedback.
//!
//! The histogram is rebuilt from zero for every image; there is no sliding
//! update.

use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Histogram sampling and clip settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistogramConfig {
    /// Every `sample_stride`-th pixel is sampled.
    pub sample_stride: usize,
    /// Samples below this count towards the low power.
    pub low_clip: u8,
    /// Samples above this count towards the high power.
    pub high_clip: u8,
    /// Fraction of samples that defines the low/high thresholds.
    pub threshold_fraction: f32,
}

impl Default for HistogramConfig {
    fn default() -> Self {
        Self {
            sample_stride: 4,
            low_clip: 16,
            high_clip: 240,
            threshold_fraction: 0.05,
        }
    }
}

/// Statistics derived from the bucket array.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HistogramStats {
    /// Number of samples.
    pub total: u64,
    /// Largest bucket count.
    pub max: u32,
    /// 50th percentile bucket.
    pub median: u8,
    /// Intensity-weighted mean bucket, rounded.
    pub centroid: u8,
    /// Lowest bucket such that `threshold_fraction` of samples lie at or below it.
    pub low_threshold: u8,
    /// Highest bucket such that `threshold_fraction` of samples lie at or above it.
    pub high_threshold: u8,
    /// Fraction of samples below `low_clip`.
    pub low_power: f32,
    /// Fraction of samples above `high_clip`.
    pub high_power: f32,
}

/// 256-bucket luminance histogram.
#[derive(Debug, Clone)]
pub struct Histogram {
    config: HistogramConfig,
    buckets: [u32; 256],
}

impl Histogram {
    pub fn new(config: HistogramConfig) -> Self {
        Self {
            config,
            buckets: [0; 256],
        }
    }

    pub fn config(&self) -> &HistogramConfig {
        &self.config
    }

    pub fn buckets(&self) -> &[u32; 256] {
        &self.buckets
    }

    pub fn reset(&mut self) {
        self.buckets = [0; 256];
    }

    #[inline]
    pub fn accumulate(&mut self, luminance: u8) {
        self.buckets[luminance as usize] += 1;
    }

    /// Rebuilds the histogram from a strided sample of an RGB image.
    pub fn process_rgb(&mut self, image: &RgbImage) {
        self.reset();
        let stride = self.config.sample_stride.max(1);
        for pixel in image.pixels().step_by(stride) {
            let [r, g, b] = pixel.0;
            self.accumulate(luminance(r, g, b));
        }
    }

    /// Rebuilds the histogram from single-channel samples.
    pub fn process_one(&mut self, samples: &[u8], stride: usize) {
        self.reset();
        for &sample in samples.iter().step_by(stride.max(1)) {
            self.accumulate(sample);
        }
    }

    /// Derives the statistics from the current buckets.
    pub fn calculate_statistics(&self) -> HistogramStats {
        let total: u64 = self.buckets.iter().map(|&c| u64::from(c)).sum();
        if total == 0 {
            return HistogramStats::default();
        }

        let max = self.buckets.iter().copied().max().unwrap_or(0);
        let weighted: u64 = self
            .buckets
            .iter()
            .enumerate()
            .map(|(value, &count)| value as u64 * u64::from(count))
            .sum();
        let centroid = ((weighted as f64 / total as f64).round() as u64).min(255) as u8;

        let mut median = 255u8;
        let mut cumulative = 0u64;
        for (value, &count) in self.buckets.iter().enumerate() {
            cumulative += u64::from(count);
            if cumulative * 2 >= total {
                median = value as u8;
                break;
            }
        }

        let fraction = f64::from(self.config.threshold_fraction.clamp(0.0, 1.0));
        let needed = ((total as f64 * fraction).ceil() as u64).max(1);

        let mut low_threshold = 255u8;
        cumulative = 0;
        for (value, &count) in self.buckets.iter().enumerate() {
            cumulative += u64::from(count);
            if cumulative >= needed {
                low_threshold = value as u8;
                break;
            }
        }

        let mut high_threshold = 0u8;
        cumulative = 0;
        for (value, &count) in self.buckets.iter().enumerate().rev() {
            cumulative += u64::from(count);
            if cumulative >= needed {
                high_threshold = value as u8;
                break;
            }
        }

        let low: u64 = self.buckets[..self.config.low_clip as usize]
            .iter()
            .map(|&c| u64::from(c))
            .sum();
        let high: u64 = self.buckets[self.config.high_clip as usize + 1..]
            .iter()
            .map(|&c| u64::from(c))
            .sum();

        HistogramStats {
            total,
            max,
            median,
            centroid,
            low_threshold,
            high_threshold,
            low_power: (low as f64 / total as f64) as f32,
            high_power: (high as f64 / total as f64) as f32,
        }
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new(HistogramConfig::default())
    }
}

/// Integer BT.601 luma.
#[inline]
pub fn luminance(r: u8, g: u8, b: u8) -> u8 {
    ((77 * u32::from(r) + 150 * u32::from(g) + 29 * u32::from(b)) >> 8) as u8
}
