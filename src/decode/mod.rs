//! Chunk decoding: raw Bayer, JPEG, or an external decompressor.
//!
//! The decoder runs on the decode thread only. A failed decode discards the
//! chunk and never stops the pipeline.

mod bayer;
mod lut;

pub use bayer::{BayerConverter, BayerLayout, ColorStats};
pub use lut::{Adjustments, LookUpTable, Orientation, Transfer};

use crate::assembly::ChunkBuffer;
use crate::error::PipelineError;
use image::{imageops, ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How images are encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Encoding {
    /// Raw sensor data, one byte per pixel.
    Bayer {
        /// Byte layout of the mosaic.
        layout: BayerLayout,
    },
    /// Baseline JPEG.
    Jpeg,
    /// Vendor compression handled by an external [`Decompressor`].
    Proprietary,
}

/// Dimensions and encoding of the images a camera sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFormat {
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Wire encoding.
    pub encoding: Encoding,
}

impl SourceFormat {
    /// Creates a source format.
    pub fn new(width: u32, height: u32, encoding: Encoding) -> Self {
        Self {
            width,
            height,
            encoding,
        }
    }

    /// Number of pixels per image.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Largest chunk one image can produce.
    pub fn max_chunk_len(&self) -> usize {
        match self.encoding {
            Encoding::Bayer { .. } => self.pixel_count(),
            Encoding::Jpeg | Encoding::Proprietary => self.pixel_count() * 3,
        }
    }
}

/// Reasons a single chunk could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("chunk overflowed its buffer and was truncated")]
    Truncated,
    #[error("chunk is {actual} bytes, expected exactly {expected}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("chunk is {actual} bytes, need at least {minimum}")]
    TooShort { actual: usize, minimum: usize },
    #[error("jpeg decode failed: {0}")]
    Jpeg(#[from] image::ImageError),
    #[error("decoded image is {actual_width}x{actual_height}, expected {width}x{height}")]
    DimensionMismatch {
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },
    #[error("decompressor failed: {0}")]
    Decompressor(String),
}

/// External decoder for vendor-specific compression.
pub trait Decompressor: Send {
    /// Decodes `data` into `out`, which is already sized to the source format.
    fn decompress(&mut self, data: &[u8], out: &mut RgbImage) -> Result<(), DecodeError>;
}

/// Length checks applied before a chunk is decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkLimits {
    /// Required exact chunk length, header included.
    pub exact_length: Option<usize>,
    /// Required minimum chunk length, header included.
    pub minimum_length: Option<usize>,
    /// Leading bytes ignored by the decoder.
    pub skip_bytes: usize,
}

impl ChunkLimits {
    fn check<'a>(&self, chunk: &'a ChunkBuffer) -> Result<&'a [u8], DecodeError> {
        if chunk.is_truncated() {
            return Err(DecodeError::Truncated);
        }
        let actual = chunk.len();
        if let Some(expected) = self.exact_length {
            if actual != expected {
                return Err(DecodeError::LengthMismatch { expected, actual });
            }
        }
        let minimum = self.minimum_length.unwrap_or(0).max(self.skip_bytes);
        if actual < minimum {
            return Err(DecodeError::TooShort { actual, minimum });
        }
        Ok(&chunk.data()[self.skip_bytes..])
    }
}

enum Backend {
    Bayer(BayerConverter),
    Jpeg,
    External(Box<dyn Decompressor>),
}

/// Turns completed chunks into RGB images.
pub struct Decoder {
    format: SourceFormat,
    limits: ChunkLimits,
    lut: LookUpTable,
    orientation: Orientation,
    backend: Backend,
    image: RgbImage,
}

impl Decoder {
    /// Creates a decoder, rejecting formats the pipeline cannot handle.
    pub fn new(
        format: SourceFormat,
        adjust: &Adjustments,
        decompressor: Option<Box<dyn Decompressor>>,
    ) -> Result<Self, PipelineError> {
        if format.width == 0 || format.height == 0 {
            return Err(PipelineError::UnsupportedFormat(
                "image has no pixels".into(),
            ));
        }

        let backend = match (format.encoding, decompressor) {
            (Encoding::Bayer { layout }, _) => {
                if format.width % 2 != 0 || format.height % 2 != 0 {
                    return Err(PipelineError::UnsupportedFormat(format!(
                        "bayer images need even dimensions, got {}x{}",
                        format.width, format.height
                    )));
                }
                let mut converter = BayerConverter::new(layout, format.width, format.height);
                converter.set_gains_dynamic(adjust.dynamic_gains);
                Backend::Bayer(converter)
            }
            (Encoding::Jpeg, _) => Backend::Jpeg,
            (Encoding::Proprietary, Some(d)) => Backend::External(d),
            (Encoding::Proprietary, None) => {
                return Err(PipelineError::UnsupportedFormat(
                    "proprietary compression needs a decompressor".into(),
                ))
            }
        };

        Ok(Self {
            format,
            limits: ChunkLimits::default(),
            lut: LookUpTable::new(adjust),
            orientation: adjust.orientation,
            backend,
            image: RgbImage::new(format.width, format.height),
        })
    }

    /// Sets the chunk length checks.
    pub fn with_limits(mut self, limits: ChunkLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn format(&self) -> &SourceFormat {
        &self.format
    }

    /// Lookup tables used for tone mapping.
    pub fn lut_mut(&mut self) -> &mut LookUpTable {
        &mut self.lut
    }

    pub fn set_orientation(&mut self, orientation: Orientation) {
        self.orientation = orientation;
    }

    /// The Bayer converter, if this decoder handles raw streams.
    pub fn bayer_mut(&mut self) -> Option<&mut BayerConverter> {
        match &mut self.backend {
            Backend::Bayer(converter) => Some(converter),
            _ => None,
        }
    }

    /// Decodes one chunk into an RGB image.
    pub fn decode(&mut self, chunk: &ChunkBuffer) -> Result<RgbImage, DecodeError> {
        let data = self.limits.check(chunk)?;

        match &mut self.backend {
            Backend::Bayer(converter) => converter.convert(data, &mut self.lut, &mut self.image)?,
            Backend::Jpeg => {
                let decoded = image::load_from_memory_with_format(data, ImageFormat::Jpeg)?;
                let rgb = decoded.to_rgb8();
                if rgb.dimensions() != (self.format.width, self.format.height) {
                    return Err(DecodeError::DimensionMismatch {
                        width: self.format.width,
                        height: self.format.height,
                        actual_width: rgb.width(),
                        actual_height: rgb.height(),
                    });
                }
                self.image = rgb;
                self.lut.process_image(&mut self.image);
            }
            Backend::External(decompressor) => {
                decompressor.decompress(data, &mut self.image)?;
                self.lut.process_image(&mut self.image);
            }
        }

        match self.orientation {
            Orientation::Normal => {}
            Orientation::Mirror => imageops::flip_horizontal_in_place(&mut self.image),
            Orientation::Flip => imageops::flip_vertical_in_place(&mut self.image),
            Orientation::Rotate180 => imageops::rotate180_in_place(&mut self.image),
        }

        Ok(self.image.clone())
    }
}

impl std::fmt::Debug for Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder")
            .field("format", &self.format)
            .field("limits", &self.limits)
            .field("orientation", &self.orientation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bayer_format() -> SourceFormat {
        SourceFormat::new(
            4,
            2,
            Encoding::Bayer {
                layout: BayerLayout::InterleavedRggb,
            },
        )
    }

    fn chunk_with(bytes: &[u8]) -> ChunkBuffer {
        let mut chunk = ChunkBuffer::with_capacity(64);
        chunk.append(bytes);
        chunk
    }

    #[test]
    fn test_odd_bayer_dimensions_rejected() {
        let format = SourceFormat::new(
            3,
            2,
            Encoding::Bayer {
                layout: BayerLayout::InterleavedGrbg,
            },
        );
        assert!(matches!(
            Decoder::new(format, &Adjustments::default(), None),
            Err(PipelineError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_proprietary_requires_decompressor() {
        let format = SourceFormat::new(4, 4, Encoding::Proprietary);
        assert!(Decoder::new(format, &Adjustments::default(), None).is_err());
    }

    #[test]
    fn test_decode_with_skip_and_exact_length() {
        let mut decoder = Decoder::new(bayer_format(), &Adjustments::default(), None)
            .unwrap()
            .with_limits(ChunkLimits {
                exact_length: Some(10),
                minimum_length: None,
                skip_bytes: 2,
            });

        let mut bytes = vec![0xEE, 0xEE];
        bytes.extend_from_slice(&[90, 60, 90, 60, 60, 30, 60, 30]);
        let image = decoder.decode(&chunk_with(&bytes)).unwrap();
        for pixel in image.pixels() {
            assert_eq!(pixel.0, [90, 60, 30]);
        }

        let err = decoder.decode(&chunk_with(&bytes[..9])).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::LengthMismatch {
                expected: 10,
                actual: 9
            }
        ));
    }

    #[test]
    fn test_truncated_chunk_rejected() {
        let mut decoder = Decoder::new(bayer_format(), &Adjustments::default(), None).unwrap();
        let mut chunk = ChunkBuffer::with_capacity(4);
        chunk.append(&[1; 8]);
        assert!(matches!(decoder.decode(&chunk), Err(DecodeError::Truncated)));
    }

    #[test]
    fn test_mirror_orientation() {
        let adjust = Adjustments {
            orientation: Orientation::Mirror,
            ..Default::default()
        };
        let format = SourceFormat::new(
            2,
            2,
            Encoding::Bayer {
                layout: BayerLayout::SubsampledGrbg,
            },
        );
        let mut decoder = Decoder::new(format, &adjust, None).unwrap();
        let image = decoder.decode(&chunk_with(&[0, 1, 2, 3])).unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [2, 1, 3]);
        assert_eq!(image.get_pixel(1, 1).0, [2, 1, 3]);
    }

    #[test]
    fn test_garbage_jpeg_is_decode_error() {
        let format = SourceFormat::new(8, 8, Encoding::Jpeg);
        let mut decoder = Decoder::new(format, &Adjustments::default(), None).unwrap();
        assert!(matches!(
            decoder.decode(&chunk_with(&[1, 2, 3, 4])),
            Err(DecodeError::Jpeg(_))
        ));
    }

    #[test]
    fn test_jpeg_round_trip() {
        let source = RgbImage::from_pixel(8, 8, image::Rgb([120, 120, 120]));
        let mut encoded = std::io::Cursor::new(Vec::new());
        source.write_to(&mut encoded, ImageFormat::Jpeg).unwrap();

        let format = SourceFormat::new(8, 8, Encoding::Jpeg);
        let mut decoder = Decoder::new(format, &Adjustments::default(), None).unwrap();
        let mut chunk = ChunkBuffer::with_capacity(encoded.get_ref().len());
        chunk.append(encoded.get_ref());

        let image = decoder.decode(&chunk).unwrap();
        assert_eq!(image.dimensions(), (8, 8));
        let px = image.get_pixel(4, 4).0;
        assert!(px.iter().all(|&v| (v as i32 - 120).abs() <= 3));
    }

    struct Fill(u8);

    impl Decompressor for Fill {
        fn decompress(&mut self, _data: &[u8], out: &mut RgbImage) -> Result<(), DecodeError> {
            for pixel in out.pixels_mut() {
                pixel.0 = [self.0; 3];
            }
            Ok(())
        }
    }

    #[test]
    fn test_external_decompressor() {
        let format = SourceFormat::new(2, 2, Encoding::Proprietary);
        let mut decoder =
            Decoder::new(format, &Adjustments::default(), Some(Box::new(Fill(42)))).unwrap();
        let image = decoder.decode(&chunk_with(&[0])).unwrap();
        assert_eq!(image.get_pixel(1, 1).0, [42, 42, 42]);
    }
}
