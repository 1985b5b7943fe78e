//! Bayer demosaicing for raw sensor streams.
//!
//! Supported serializations, shown as the first two lines of a 6-pixel-wide
//! image:
//!
//! ```text
//! 1  GRBG, linear per line, inverted order   RRRGGG GGGBBB
//! 2  GRBG, interleaved                       GRGRGR BGBGBG
//! 3  GRBG, green line / red-blue line        xGxGxG RBRBRB
//! 4  BGGR, interleaved                       BGBGBG GRGRGR
//! 5  RGGB, interleaved                       RGRGRG GBGBGB
//! ```
//!
//! Layouts 1, 2, 4 and 5 are unpacked into a mosaic plane and interpolated
//! bilinearly; layout 3 carries one sample per colour per 2x2 quad and is
//! expanded per quad.

use super::lut::{LookUpTable, MAX_GAIN, MIN_GAIN};
use super::DecodeError;
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Byte layout of a raw Bayer stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BayerLayout {
    /// Format 1 (STV680 style).
    LinearGrbg,
    /// Format 2 (STV600 style).
    InterleavedGrbg,
    /// Format 3 (QuickCam Pro subsampled style).
    SubsampledGrbg,
    /// Format 4 (OV7630 style).
    InterleavedBggr,
    /// Format 5.
    InterleavedRggb,
}

impl BayerLayout {
    /// Maps the numeric source-format codes used by camera drivers.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::LinearGrbg),
            2 => Some(Self::InterleavedGrbg),
            3 => Some(Self::SubsampledGrbg),
            4 => Some(Self::InterleavedBggr),
            5 => Some(Self::InterleavedRggb),
            _ => None,
        }
    }

    /// Colour filter pattern of the top-left 2x2 quad, row major.
    fn pattern(self) -> [Channel; 4] {
        use Channel::*;
        match self {
            Self::LinearGrbg | Self::InterleavedGrbg | Self::SubsampledGrbg => {
                [Green, Red, Blue, Green]
            }
            Self::InterleavedBggr => [Blue, Green, Green, Red],
            Self::InterleavedRggb => [Red, Green, Green, Blue],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Red = 0,
    Green = 1,
    Blue = 2,
}

/// Mean channel values of the last converted image, before tone mapping.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ColorStats {
    pub mean_red: f32,
    pub mean_green: f32,
    pub mean_blue: f32,
}

impl ColorStats {
    /// Mean brightness in [0.0, 1.0].
    pub fn mean_brightness(&self) -> f32 {
        (0.299 * self.mean_red + 0.587 * self.mean_green + 0.114 * self.mean_blue) / 255.0
    }
}

/// Weight of the newest image in the white-balance running average.
const AVERAGE_WEIGHT: f32 = 0.1;

/// Converts raw Bayer chunks into RGB images.
#[derive(Debug, Clone)]
pub struct BayerConverter {
    layout: BayerLayout,
    width: usize,
    height: usize,
    mosaic: Vec<u8>,
    make_image_stats: bool,
    dynamic_gains: bool,
    last_stats: Option<ColorStats>,
    average: Option<ColorStats>,
}

impl BayerConverter {
    /// Creates a converter for `width` x `height` images in `layout`.
    pub fn new(layout: BayerLayout, width: u32, height: u32) -> Self {
        let (width, height) = (width as usize, height as usize);
        Self {
            layout,
            width,
            height,
            mosaic: vec![0; width * height],
            make_image_stats: false,
            dynamic_gains: false,
            last_stats: None,
            average: None,
        }
    }

    pub fn layout(&self) -> BayerLayout {
        self.layout
    }

    /// Number of raw bytes one image occupies.
    pub fn source_len(&self) -> usize {
        self.width * self.height
    }

    /// Enables collection of per-image colour statistics.
    pub fn set_make_image_stats(&mut self, on: bool) {
        self.make_image_stats = on;
        if !on {
            self.last_stats = None;
        }
    }

    /// Lets red and blue gains follow the image statistics.
    pub fn set_gains_dynamic(&mut self, dynamic: bool) {
        self.dynamic_gains = dynamic;
        self.average = None;
    }

    /// Statistics of the last image, if enabled.
    pub fn last_stats(&self) -> Option<ColorStats> {
        self.last_stats
    }

    /// Mean brightness of the last image, if statistics are enabled.
    pub fn last_mean_brightness(&self) -> Option<f32> {
        self.last_stats.map(|s| s.mean_brightness())
    }

    /// Demosaics `src` into `dst`, applying the lookup tables.
    pub fn convert(
        &mut self,
        src: &[u8],
        lut: &mut LookUpTable,
        dst: &mut RgbImage,
    ) -> Result<(), DecodeError> {
        let needed = self.source_len();
        if src.len() < needed {
            return Err(DecodeError::TooShort {
                actual: src.len(),
                minimum: needed,
            });
        }
        if dst.width() as usize != self.width || dst.height() as usize != self.height {
            *dst = RgbImage::new(self.width as u32, self.height as u32);
        }

        let src = &src[..needed];
        match self.layout {
            BayerLayout::SubsampledGrbg => self.expand_quads(src, dst),
            BayerLayout::LinearGrbg => {
                self.unpack_linear(src);
                self.interpolate(dst);
            }
            _ => {
                self.mosaic.copy_from_slice(src);
                self.interpolate(dst);
            }
        }

        if self.make_image_stats || self.dynamic_gains {
            let stats = channel_means(dst);
            self.last_stats = Some(stats);
            if self.dynamic_gains {
                self.update_gains(stats, lut);
            }
        }

        let transfer = lut.prepare();
        if !transfer.is_identity() {
            for pixel in dst.pixels_mut() {
                pixel.0 = transfer.triplet(pixel.0);
            }
        }
        Ok(())
    }

    /// Layout 1 sends each line's odd columns first, then its even columns.
    fn unpack_linear(&mut self, src: &[u8]) {
        let half = self.width / 2;
        for (row_in, row_out) in src
            .chunks_exact(self.width)
            .zip(self.mosaic.chunks_exact_mut(self.width))
        {
            let (odd, even) = row_in.split_at(half);
            for i in 0..half {
                row_out[2 * i + 1] = odd[i];
                row_out[2 * i] = even[i];
            }
        }
    }

    fn channel_at(&self, x: usize, y: usize) -> Channel {
        self.layout.pattern()[(y & 1) * 2 + (x & 1)]
    }

    fn interpolate(&self, dst: &mut RgbImage) {
        let (w, h) = (self.width, self.height);
        for y in 0..h {
            let rows = y.saturating_sub(1)..=(y + 1).min(h - 1);
            for x in 0..w {
                let own = self.channel_at(x, y);
                let mut sum = [0u32; 3];
                let mut count = [0u32; 3];

                for ny in rows.clone() {
                    for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                        let c = self.channel_at(nx, ny);
                        if c == own {
                            continue;
                        }
                        sum[c as usize] += self.mosaic[ny * w + nx] as u32;
                        count[c as usize] += 1;
                    }
                }

                let mut rgb = [0u8; 3];
                for c in 0..3 {
                    rgb[c] = if c == own as usize {
                        self.mosaic[y * w + x]
                    } else if count[c] > 0 {
                        (sum[c] / count[c]) as u8
                    } else {
                        0
                    };
                }
                dst.put_pixel(x as u32, y as u32, image::Rgb(rgb));
            }
        }
    }

    /// Layout 3: G at (1,0), R at (0,1), B at (1,1) of every quad.
    fn expand_quads(&self, src: &[u8], dst: &mut RgbImage) {
        let w = self.width;
        for qy in (0..self.height).step_by(2) {
            for qx in (0..w).step_by(2) {
                let g = src[qy * w + qx + 1];
                let r = src[(qy + 1) * w + qx];
                let b = src[(qy + 1) * w + qx + 1];
                let pixel = image::Rgb([r, g, b]);
                for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                    dst.put_pixel((qx + dx) as u32, (qy + dy) as u32, pixel);
                }
            }
        }
    }

    fn update_gains(&mut self, stats: ColorStats, lut: &mut LookUpTable) {
        let average = match self.average {
            None => stats,
            Some(prev) => ColorStats {
                mean_red: blend(prev.mean_red, stats.mean_red),
                mean_green: blend(prev.mean_green, stats.mean_green),
                mean_blue: blend(prev.mean_blue, stats.mean_blue),
            },
        };
        self.average = Some(average);

        if average.mean_red < 1.0 || average.mean_blue < 1.0 {
            return;
        }
        let red = (average.mean_green / average.mean_red).clamp(MIN_GAIN, MAX_GAIN);
        let blue = (average.mean_green / average.mean_blue).clamp(MIN_GAIN, MAX_GAIN);
        let (_, green, _) = lut.gains();
        lut.set_gains(red, green, blue);
    }
}

#[inline]
fn blend(previous: f32, current: f32) -> f32 {
    previous * (1.0 - AVERAGE_WEIGHT) + current * AVERAGE_WEIGHT
}

fn channel_means(image: &RgbImage) -> ColorStats {
    let mut sum = [0u64; 3];
    for pixel in image.pixels() {
        for c in 0..3 {
            sum[c] += pixel.0[c] as u64;
        }
    }
    let n = (image.width() as u64 * image.height() as u64).max(1) as f32;
    ColorStats {
        mean_red: sum[0] as f32 / n,
        mean_green: sum[1] as f32 / n,
        mean_blue: sum[2] as f32 / n,
    }
}
