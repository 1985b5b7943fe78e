//! Pipeline configuration.
//!
//! Buffer counts and sizes are fixed when the pipeline is built; nothing on
//! the capture path allocates afterwards.

use crate::analysis::{AgcConfig, HistogramConfig};
use crate::assembly::{MAX_CHUNK_BUFFERS, MIN_CHUNK_BUFFERS};
use crate::decode::{Adjustments, BayerLayout, Encoding, SourceFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration of one capture/decode pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Layout of the encoded images the camera sends.
    pub format: SourceFormat,
    /// Total number of chunk buffers in the pool.
    pub chunk_buffers: usize,
    /// Payload capacity of each chunk buffer; derived from the format if unset.
    pub chunk_buffer_len: Option<usize>,
    /// Bytes copied to the front of every chunk before any payload.
    pub chunk_header: Vec<u8>,
    /// Watchdog threshold: micro-frames allowed without a completed chunk.
    pub max_frames_between_chunks: u64,
    /// How long the decode thread waits for a full chunk before re-checking state.
    pub decode_timeout_ms: u64,
    /// Chunks whose length differs from this are discarded.
    pub exact_length: Option<usize>,
    /// Chunks shorter than this are discarded.
    pub minimum_length: Option<usize>,
    /// Leading bytes to ignore when decoding a chunk.
    pub skip_bytes: usize,
    /// Consecutive decode failures before a stream error is raised.
    pub max_consecutive_decode_failures: u32,
    /// Decoded images that may wait for the application before new ones are dropped.
    pub image_queue_depth: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            format: SourceFormat::new(
                320,
                240,
                Encoding::Bayer {
                    layout: BayerLayout::InterleavedGrbg,
                },
            ),
            chunk_buffers: MAX_CHUNK_BUFFERS,
            chunk_buffer_len: None,
            chunk_header: Vec::new(),
            max_frames_between_chunks: 60_000, // one minute of 1 ms frames
            decode_timeout_ms: 100,
            exact_length: None,
            minimum_length: None,
            skip_bytes: 0,
            max_consecutive_decode_failures: 10,
            image_queue_depth: 2,
        }
    }
}

impl PipelineConfig {
    /// Creates a configuration for the given source format.
    pub fn with_format(format: SourceFormat) -> Self {
        Self {
            format,
            ..Default::default()
        }
    }

    /// Capacity of each chunk buffer, header included.
    pub fn chunk_capacity(&self) -> usize {
        self.chunk_buffer_len
            .unwrap_or_else(|| self.format.max_chunk_len())
            + self.chunk_header.len()
    }

    /// Decode thread wait timeout.
    pub fn decode_timeout(&self) -> Duration {
        Duration::from_millis(self.decode_timeout_ms)
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.format.width == 0 || self.format.height == 0 {
            return Err(ConfigError::InvalidDimensions);
        }
        if self.chunk_buffers < MIN_CHUNK_BUFFERS {
            return Err(ConfigError::InsufficientBuffers {
                requested: self.chunk_buffers,
                minimum: MIN_CHUNK_BUFFERS,
            });
        }
        if self.chunk_buffers > MAX_CHUNK_BUFFERS {
            return Err(ConfigError::TooManyBuffers {
                requested: self.chunk_buffers,
                maximum: MAX_CHUNK_BUFFERS,
            });
        }
        if self.chunk_capacity() <= self.chunk_header.len() {
            return Err(ConfigError::InvalidBufferLength);
        }
        if let Some(exact) = self.exact_length {
            if exact > self.chunk_capacity() {
                return Err(ConfigError::InvalidBufferLength);
            }
        }
        if self.max_frames_between_chunks == 0 {
            return Err(ConfigError::InvalidWatchdog);
        }
        if self.image_queue_depth == 0 {
            return Err(ConfigError::InvalidQueueDepth);
        }
        if self.decode_timeout_ms == 0 {
            return Err(ConfigError::InvalidDecodeTimeout);
        }
        if self.max_consecutive_decode_failures == 0 {
            return Err(ConfigError::InvalidFailureLimit);
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid frame dimensions")]
    InvalidDimensions,
    #[error("{requested} chunk buffers requested, at least {minimum} needed")]
    InsufficientBuffers { requested: usize, minimum: usize },
    #[error("{requested} chunk buffers requested, at most {maximum} supported")]
    TooManyBuffers { requested: usize, maximum: usize },
    #[error("chunk buffer length cannot hold a chunk")]
    InvalidBufferLength,
    #[error("watchdog threshold must be at least one frame")]
    InvalidWatchdog,
    #[error("image queue depth must be at least one")]
    InvalidQueueDepth,
    #[error("decode wait timeout must be at least one millisecond")]
    InvalidDecodeTimeout,
    #[error("decode failure limit must be at least one")]
    InvalidFailureLimit,
    #[error("invalid auto gain settings: {0}")]
    InvalidAgc(String),
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// Full configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub histogram: HistogramConfig,
    #[serde(default)]
    pub agc: AgcConfig,
    #[serde(default)]
    pub adjust: Adjustments,
}

impl FileConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: FileConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.pipeline.validate()?;
        config.agc.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AgcMode;
    use std::io::Write;

    #[test]
    fn test_default_config_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunk_buffers, 9);
        assert_eq!(config.chunk_capacity(), 320 * 240);
    }

    #[test]
    fn test_zero_dimensions_invalid() {
        let mut config = PipelineConfig::default();
        config.format.width = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDimensions)
        ));
    }

    #[test]
    fn test_single_buffer_rejected() {
        let config = PipelineConfig {
            chunk_buffers: 1,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InsufficientBuffers { requested: 1, .. })
        ));
    }

    #[test]
    fn test_zero_decode_limits_rejected() {
        let config = PipelineConfig {
            decode_timeout_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDecodeTimeout)
        ));

        let config = PipelineConfig {
            max_consecutive_decode_failures: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidFailureLimit)
        ));
    }

    #[test]
    fn test_header_counts_toward_capacity() {
        let config = PipelineConfig {
            chunk_buffer_len: Some(100),
            chunk_header: vec![0xFF, 0xD8],
            ..Default::default()
        };
        assert_eq!(config.chunk_capacity(), 102);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[pipeline]
chunk_buffers = 4
exact_length = 64

[pipeline.format]
width = 8
height = 8
encoding = {{ kind = "bayer", layout = "interleaved_bggr" }}

[agc]
mode = "histogram"
target = 100
"#
        )
        .unwrap();

        let config = FileConfig::from_file(file.path()).unwrap();
        assert_eq!(config.pipeline.chunk_buffers, 4);
        assert_eq!(config.pipeline.format.width, 8);
        assert_eq!(
            config.pipeline.format.encoding,
            Encoding::Bayer {
                layout: BayerLayout::InterleavedBggr
            }
        );
        assert_eq!(config.agc.mode, AgcMode::Histogram);
        assert_eq!(config.agc.target, 100);
    }

    #[test]
    fn test_invalid_toml_reports_parse_error() {
        assert!(matches!(
            FileConfig::from_toml("pipeline = 3"),
            Err(ConfigError::ParseError(_))
        ));
    }
}
