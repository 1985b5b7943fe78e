//! Brightness, contrast, gamma, saturation and white-balance lookup tables.
//!
//! All tone adjustments are folded into one 256-entry table per channel.
//! Setters only mark the tables stale; they are rebuilt on the next
//! [`LookUpTable::prepare`], so a burst of control changes costs one rebuild.

use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Output orientation applied after decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    /// As sent by the camera.
    #[default]
    Normal,
    /// Mirrored left to right.
    Mirror,
    /// Upside down.
    Flip,
    /// Rotated by 180 degrees.
    Rotate180,
}

/// User-facing image adjustments.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Adjustments {
    /// [-1.0, 1.0], 0.0 = no change, more = brighter.
    pub brightness: f32,
    /// [0.0, 2.0], 1.0 = no change, more = more contrast.
    pub contrast: f32,
    /// [0.0, 2.0], 1.0 = no change, more = darker grey.
    pub gamma: f32,
    /// [0.0, 2.0], 1.0 = no change, less = less saturation.
    pub saturation: f32,
    /// White-balance gain for red.
    pub red_gain: f32,
    /// White-balance gain for green.
    pub green_gain: f32,
    /// White-balance gain for blue.
    pub blue_gain: f32,
    /// Let the Bayer converter adjust red/blue gains from image statistics.
    pub dynamic_gains: bool,
    /// Output orientation.
    pub orientation: Orientation,
}

impl Default for Adjustments {
    fn default() -> Self {
        Self {
            brightness: 0.0,
            contrast: 1.0,
            gamma: 1.0,
            saturation: 1.0,
            red_gain: 1.0,
            green_gain: 1.0,
            blue_gain: 1.0,
            dynamic_gains: false,
            orientation: Orientation::Normal,
        }
    }
}

pub(crate) const MIN_GAIN: f32 = 0.1;
pub(crate) const MAX_GAIN: f32 = 4.0;

/// Cached per-channel transfer tables.
#[derive(Debug, Clone)]
pub struct LookUpTable {
    brightness: f32,
    contrast: f32,
    gamma: f32,
    saturation: f32,
    red_gain: f32,
    green_gain: f32,
    blue_gain: f32,
    red: [u8; 256],
    green: [u8; 256],
    blue: [u8; 256],
    needs_transfer_lookup: bool,
}

impl LookUpTable {
    /// Creates tables for the given adjustments.
    pub fn new(adjust: &Adjustments) -> Self {
        let mut lut = Self {
            brightness: 0.0,
            contrast: 1.0,
            gamma: 1.0,
            saturation: 1.0,
            red_gain: 1.0,
            green_gain: 1.0,
            blue_gain: 1.0,
            red: [0; 256],
            green: [0; 256],
            blue: [0; 256],
            needs_transfer_lookup: true,
        };
        lut.set_brightness(adjust.brightness);
        lut.set_contrast(adjust.contrast);
        lut.set_gamma(adjust.gamma);
        lut.set_saturation(adjust.saturation);
        lut.set_gains(adjust.red_gain, adjust.green_gain, adjust.blue_gain);
        lut
    }

    pub fn brightness(&self) -> f32 {
        self.brightness
    }

    pub fn contrast(&self) -> f32 {
        self.contrast
    }

    pub fn gamma(&self) -> f32 {
        self.gamma
    }

    pub fn saturation(&self) -> f32 {
        self.saturation
    }

    /// Returns the (red, green, blue) white-balance gains.
    pub fn gains(&self) -> (f32, f32, f32) {
        (self.red_gain, self.green_gain, self.blue_gain)
    }

    /// Returns true if the tables will be rebuilt before next use.
    pub fn needs_transfer_lookup(&self) -> bool {
        self.needs_transfer_lookup
    }

    pub fn set_brightness(&mut self, value: f32) {
        self.needs_transfer_lookup |= replace(&mut self.brightness, value.clamp(-1.0, 1.0));
    }

    pub fn set_contrast(&mut self, value: f32) {
        self.needs_transfer_lookup |= replace(&mut self.contrast, value.clamp(0.0, 2.0));
    }

    pub fn set_gamma(&mut self, value: f32) {
        self.needs_transfer_lookup |= replace(&mut self.gamma, value.clamp(0.0, 2.0));
    }

    /// Saturation is applied per pixel, so it never invalidates the tables.
    pub fn set_saturation(&mut self, value: f32) {
        self.saturation = value.clamp(0.0, 2.0);
    }

    pub fn set_gains(&mut self, red: f32, green: f32, blue: f32) {
        let mut changed = replace(&mut self.red_gain, red.clamp(MIN_GAIN, MAX_GAIN));
        changed |= replace(&mut self.green_gain, green.clamp(MIN_GAIN, MAX_GAIN));
        changed |= replace(&mut self.blue_gain, blue.clamp(MIN_GAIN, MAX_GAIN));
        self.needs_transfer_lookup |= changed;
    }

    /// Rebuilds stale tables and returns a view for per-pixel use.
    pub fn prepare(&mut self) -> Transfer<'_> {
        if self.needs_transfer_lookup {
            self.recalc_transfer_lookup();
        }
        Transfer {
            red: &self.red,
            green: &self.green,
            blue: &self.blue,
            saturation: self.saturation,
        }
    }

    fn recalc_transfer_lookup(&mut self) {
        for i in 0..256 {
            let mut f = i as f32 / 255.0;
            f = f.powf(self.gamma);
            f = (f - 0.5) * self.contrast + 0.5 + self.brightness;

            self.red[i] = to_byte(f * self.red_gain);
            self.green[i] = to_byte(f * self.green_gain);
            self.blue[i] = to_byte(f * self.blue_gain);
        }
        self.needs_transfer_lookup = false;
        tracing::trace!(
            brightness = self.brightness,
            contrast = self.contrast,
            gamma = self.gamma,
            "Rebuilt transfer tables"
        );
    }

    /// Applies saturation and the transfer tables to an RGB image in place.
    pub fn process_image(&mut self, image: &mut RgbImage) {
        let transfer = self.prepare();
        if transfer.is_identity() {
            return;
        }
        for pixel in image.pixels_mut() {
            pixel.0 = transfer.triplet(pixel.0);
        }
    }
}

impl Default for LookUpTable {
    fn default() -> Self {
        Self::new(&Adjustments::default())
    }
}

/// Stores `value` in `slot`, returning true if it changed.
fn replace(slot: &mut f32, value: f32) -> bool {
    let changed = *slot != value;
    *slot = value;
    changed
}

#[inline]
fn to_byte(f: f32) -> u8 {
    (f.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Up-to-date transfer tables borrowed from a [`LookUpTable`].
#[derive(Debug, Clone, Copy)]
pub struct Transfer<'a> {
    red: &'a [u8; 256],
    green: &'a [u8; 256],
    blue: &'a [u8; 256],
    saturation: f32,
}

impl Transfer<'_> {
    /// Maps a red sample, desaturated towards its green neighbour.
    #[inline]
    pub fn red(&self, r: u8, g: u8) -> u8 {
        self.red[saturate(r, g, self.saturation) as usize]
    }

    #[inline]
    pub fn green(&self, g: u8) -> u8 {
        self.green[g as usize]
    }

    /// Maps a blue sample, desaturated towards its green neighbour.
    #[inline]
    pub fn blue(&self, b: u8, g: u8) -> u8 {
        self.blue[saturate(b, g, self.saturation) as usize]
    }

    #[inline]
    pub fn triplet(&self, [r, g, b]: [u8; 3]) -> [u8; 3] {
        [self.red(r, g), self.green(g), self.blue(b, g)]
    }

    /// Returns true if every table maps `i` to `i` and saturation is neutral.
    pub fn is_identity(&self) -> bool {
        self.saturation == 1.0
            && (0..256).all(|i| {
                let v = i as u8;
                self.red[i] == v && self.green[i] == v && self.blue[i] == v
            })
    }
}

#[inline]
fn saturate(c: u8, g: u8, saturation: f32) -> u8 {
    if saturation == 1.0 {
        return c;
    }
    let g = g as f32;
    (g + (c as f32 - g) * saturation).round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_tables() {
        let mut lut = LookUpTable::default();
        let transfer = lut.prepare();
        for i in 0..=255u8 {
            assert_eq!(transfer.red(i, i), i);
            assert_eq!(transfer.green(i), i);
            assert_eq!(transfer.blue(i, i), i);
        }
        assert!(transfer.is_identity());
    }

    #[test]
    fn test_setters_mark_tables_stale() {
        let mut lut = LookUpTable::default();
        lut.prepare();
        assert!(!lut.needs_transfer_lookup());

        lut.set_contrast(1.0);
        assert!(!lut.needs_transfer_lookup(), "unchanged value keeps tables");

        lut.set_brightness(0.25);
        lut.set_gamma(0.8);
        assert!(lut.needs_transfer_lookup());
        lut.prepare();
        assert!(!lut.needs_transfer_lookup());
    }

    #[test]
    fn test_brightness_raises_output() {
        let mut lut = LookUpTable::default();
        lut.set_brightness(0.2);
        let transfer = lut.prepare();
        assert!(transfer.green(100) > 100);
        assert_eq!(transfer.green(255), 255);
    }

    #[test]
    fn test_values_are_clamped() {
        let mut lut = LookUpTable::default();
        lut.set_brightness(5.0);
        lut.set_contrast(-1.0);
        assert_eq!(lut.brightness(), 1.0);
        assert_eq!(lut.contrast(), 0.0);
    }

    #[test]
    fn test_red_gain_only_affects_red() {
        let mut lut = LookUpTable::default();
        lut.set_gains(2.0, 1.0, 1.0);
        let transfer = lut.prepare();
        assert_eq!(transfer.triplet([50, 50, 50]), [100, 50, 50]);
    }

    #[test]
    fn test_zero_saturation_is_grey() {
        let mut lut = LookUpTable::default();
        lut.set_saturation(0.0);
        let transfer = lut.prepare();
        assert_eq!(transfer.triplet([200, 80, 10]), [80, 80, 80]);
    }

    #[test]
    fn test_process_image() {
        let mut lut = LookUpTable::default();
        lut.set_contrast(0.0);
        let mut image = RgbImage::from_pixel(2, 2, image::Rgb([0, 128, 255]));
        lut.process_image(&mut image);
        for pixel in image.pixels() {
            assert_eq!(pixel.0, [128, 128, 128]);
        }
    }
}
