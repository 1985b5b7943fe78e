//! Frame scanners: classify each micro-frame and locate chunk boundaries.
//!
//! Boundary detection is device specific, so the pipeline takes the scanner
//! as a strategy object. Scanners run inside the capture context: they must
//! not allocate or block, and their cost must be bounded by the frame length.

use super::frame::IsochronousFrame;

/// A byte range inside a micro-frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// Offset of the first byte.
    pub start: usize,
    /// Number of bytes.
    pub len: usize,
}

impl Span {
    /// Creates a span.
    pub const fn new(start: usize, len: usize) -> Self {
        Self { start, len }
    }

    /// An empty span.
    pub const fn empty() -> Self {
        Self { start: 0, len: 0 }
    }

    /// Span covering `start..end`; empty if `end <= start`.
    pub fn between(start: usize, end: usize) -> Self {
        Self {
            start,
            len: end.saturating_sub(start),
        }
    }

    /// One past the last byte.
    #[inline]
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    /// Returns true if the span holds no bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Resolves the span against frame bytes, clamped to the frame.
    pub fn slice<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        let start = self.start.min(data.len());
        let end = self.end().min(data.len());
        &data[start..end]
    }
}

/// Classification of one micro-frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameScanResult {
    /// Nothing usable in this frame; skip it.
    InvalidFrame,
    /// The frame proves the chunk being assembled is corrupt; discard it.
    InvalidChunk,
    /// Payload that continues the current chunk.
    ValidFrame {
        /// Bytes belonging to the current chunk.
        data: Span,
    },
    /// A chunk boundary lies inside this frame.
    NewChunkFrame {
        /// Bytes that finish the current chunk.
        data: Span,
        /// Bytes that start the next chunk.
        tail: Span,
    },
}

/// Side information a scanner can report alongside the payload.
///
/// The record persists across calls, so scanners also keep whatever state
/// they need from the previous frame here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameInfo {
    /// Average luminance measured by the camera, if it reports one.
    pub average_luminance: Option<u8>,
    /// Frame-id bit of the last UVC payload header seen.
    pub last_fid: Option<bool>,
}

/// Strategy for classifying micro-frames of one device family.
pub trait FrameScanner: Send + Sync {
    /// Classifies `frame`, updating `info` with anything learned.
    fn scan(&self, frame: &IsochronousFrame<'_>, info: &mut FrameInfo) -> FrameScanResult;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Shared preconditions: error status and empty frames are never usable.
#[inline]
fn unusable(frame: &IsochronousFrame<'_>) -> bool {
    !frame.status().is_usable() || frame.is_empty()
}

/// Default scanner: every received frame is payload, no boundaries.
///
/// Only useful for devices that delimit images some other way; it never
/// completes a chunk on its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericScanner;

impl FrameScanner for GenericScanner {
    fn scan(&self, frame: &IsochronousFrame<'_>, _info: &mut FrameInfo) -> FrameScanResult {
        if unusable(frame) {
            return FrameScanResult::InvalidFrame;
        }
        FrameScanResult::ValidFrame {
            data: Span::new(0, frame.len()),
        }
    }

    fn name(&self) -> &'static str {
        "generic"
    }
}

/// Scanner for cameras that prefix each image with a fixed byte marker.
#[derive(Debug, Clone)]
pub struct MarkerScanner {
    marker: Vec<u8>,
    luminance_offset: Option<usize>,
}

impl MarkerScanner {
    /// Start-of-frame marker used by PAC207-based cameras.
    pub const PAC207_MARKER: [u8; 5] = [0xFF, 0xFF, 0x00, 0xFF, 0x96];

    /// Creates a scanner looking for `marker`. An empty marker never matches.
    pub fn new(marker: &[u8]) -> Self {
        Self {
            marker: marker.to_vec(),
            luminance_offset: None,
        }
    }

    /// Scanner preset for PAC207 cameras.
    pub fn pac207() -> Self {
        Self::new(&Self::PAC207_MARKER)
    }

    /// Reads an average-luminance byte at `offset` after the marker start.
    ///
    /// The byte is part of the chunk header, so it is skipped as well.
    pub fn with_luminance_offset(mut self, offset: usize) -> Self {
        self.luminance_offset = Some(offset);
        self
    }

    /// Returns the marker bytes.
    pub fn marker(&self) -> &[u8] {
        &self.marker
    }

    fn find_marker(&self, data: &[u8]) -> Option<usize> {
        if self.marker.is_empty() || data.len() < self.marker.len() {
            return None;
        }
        data.windows(self.marker.len())
            .position(|w| w == self.marker.as_slice())
    }
}

impl FrameScanner for MarkerScanner {
    fn scan(&self, frame: &IsochronousFrame<'_>, info: &mut FrameInfo) -> FrameScanResult {
        if unusable(frame) {
            return FrameScanResult::InvalidFrame;
        }

        let data = frame.data();
        let Some(position) = self.find_marker(data) else {
            return FrameScanResult::ValidFrame {
                data: Span::new(0, data.len()),
            };
        };

        let mut payload_start = position + self.marker.len();
        if let Some(offset) = self.luminance_offset {
            info.average_luminance = data.get(position + offset).copied();
            payload_start = payload_start.max(position + offset + 1);
        }

        FrameScanResult::NewChunkFrame {
            data: Span::new(0, position),
            tail: Span::between(payload_start.min(data.len()), data.len()),
        }
    }

    fn name(&self) -> &'static str {
        "marker"
    }
}

/// Scanner for UVC-style payloads: every micro-frame starts with a payload
/// header whose frame-id bit toggles at each new image.
#[derive(Debug, Clone, Copy, Default)]
pub struct UvcPayloadScanner;

impl UvcPayloadScanner {
    const FID: u8 = 0x01;
    const EOF: u8 = 0x02;
    const ERR: u8 = 0x40;
}

impl FrameScanner for UvcPayloadScanner {
    fn scan(&self, frame: &IsochronousFrame<'_>, info: &mut FrameInfo) -> FrameScanResult {
        if unusable(frame) {
            return FrameScanResult::InvalidFrame;
        }

        let data = frame.data();
        let header_len = data[0] as usize;
        if data.len() < 2 || header_len < 2 || header_len > data.len() {
            return FrameScanResult::InvalidFrame;
        }

        let flags = data[1];
        if flags & Self::ERR != 0 {
            return FrameScanResult::InvalidChunk;
        }

        let fid = flags & Self::FID != 0;
        let payload = Span::between(header_len, data.len());
        let previous = info.last_fid.replace(fid);

        if flags & Self::EOF != 0 {
            // The image ends here; the next frame will carry the other id.
            info.last_fid = Some(!fid);
            return FrameScanResult::NewChunkFrame {
                data: payload,
                tail: Span::empty(),
            };
        }

        match previous {
            Some(prev) if prev != fid => FrameScanResult::NewChunkFrame {
                data: Span::empty(),
                tail: payload,
            },
            _ => FrameScanResult::ValidFrame { data: payload },
        }
    }

    fn name(&self) -> &'static str {
        "uvc"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FrameStatus;

    fn ok(data: &[u8]) -> IsochronousFrame<'_> {
        IsochronousFrame::new(FrameStatus::Ok, data)
    }

    #[test]
    fn test_generic_rejects_empty_and_error_frames() {
        let mut info = FrameInfo::default();
        let scanner = GenericScanner;

        assert_eq!(scanner.scan(&ok(&[]), &mut info), FrameScanResult::InvalidFrame);
        let bad = IsochronousFrame::new(FrameStatus::Error, &[1, 2, 3]);
        assert_eq!(scanner.scan(&bad, &mut info), FrameScanResult::InvalidFrame);
        assert_eq!(
            scanner.scan(&ok(&[1, 2, 3]), &mut info),
            FrameScanResult::ValidFrame {
                data: Span::new(0, 3)
            }
        );
    }

    #[test]
    fn test_underrun_frame_is_still_data() {
        let mut info = FrameInfo::default();
        let short = IsochronousFrame::new(FrameStatus::Underrun, &[4, 5]);
        assert_eq!(
            GenericScanner.scan(&short, &mut info),
            FrameScanResult::ValidFrame {
                data: Span::new(0, 2)
            }
        );

        let marked = [9, 0xAA, 0x55, 1];
        let short = IsochronousFrame::new(FrameStatus::Underrun, &marked);
        assert!(matches!(
            MarkerScanner::new(&[0xAA, 0x55]).scan(&short, &mut info),
            FrameScanResult::NewChunkFrame { .. }
        ));
    }

    #[test]
    fn test_marker_splits_frame() {
        let scanner = MarkerScanner::new(&[0xAA, 0x55]);
        let mut info = FrameInfo::default();
        let bytes = [1, 2, 0xAA, 0x55, 3, 4, 5];

        let result = scanner.scan(&ok(&bytes), &mut info);
        match result {
            FrameScanResult::NewChunkFrame { data, tail } => {
                assert_eq!(data.slice(&bytes), &[1, 2]);
                assert_eq!(tail.slice(&bytes), &[3, 4, 5]);
                assert!(data.end() <= bytes.len());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_marker_reports_luminance() {
        let scanner = MarkerScanner::new(&[0xAA, 0x55]).with_luminance_offset(2);
        let mut info = FrameInfo::default();
        let bytes = [0xAA, 0x55, 77, 9, 9];

        let result = scanner.scan(&ok(&bytes), &mut info);
        assert_eq!(info.average_luminance, Some(77));
        match result {
            FrameScanResult::NewChunkFrame { data, tail } => {
                assert!(data.is_empty());
                assert_eq!(tail.slice(&bytes), &[9, 9]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_marker_at_end_leaves_empty_tail() {
        let scanner = MarkerScanner::pac207();
        let mut info = FrameInfo::default();
        let mut bytes = vec![1, 2, 3];
        bytes.extend_from_slice(&MarkerScanner::PAC207_MARKER);

        match scanner.scan(&ok(&bytes), &mut info) {
            FrameScanResult::NewChunkFrame { data, tail } => {
                assert_eq!(data.len, 3);
                assert!(tail.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_uvc_fid_toggle_starts_new_chunk() {
        let scanner = UvcPayloadScanner;
        let mut info = FrameInfo::default();

        let first = [2, 0x00, 10, 11];
        let second = [2, 0x00, 12];
        let third = [2, 0x01, 20, 21];

        assert_eq!(
            scanner.scan(&ok(&first), &mut info),
            FrameScanResult::ValidFrame {
                data: Span::new(2, 2)
            }
        );
        assert!(matches!(
            scanner.scan(&ok(&second), &mut info),
            FrameScanResult::ValidFrame { .. }
        ));
        assert_eq!(
            scanner.scan(&ok(&third), &mut info),
            FrameScanResult::NewChunkFrame {
                data: Span::empty(),
                tail: Span::new(2, 2)
            }
        );
    }

    #[test]
    fn test_uvc_error_bit_invalidates_chunk() {
        let scanner = UvcPayloadScanner;
        let mut info = FrameInfo::default();
        assert_eq!(
            scanner.scan(&ok(&[2, 0x40, 1]), &mut info),
            FrameScanResult::InvalidChunk
        );
    }

    #[test]
    fn test_uvc_bad_header_length() {
        let scanner = UvcPayloadScanner;
        let mut info = FrameInfo::default();
        assert_eq!(
            scanner.scan(&ok(&[9, 0x00, 1]), &mut info),
            FrameScanResult::InvalidFrame
        );
    }

    #[test]
    fn test_uvc_eof_seals_with_payload() {
        let scanner = UvcPayloadScanner;
        let mut info = FrameInfo::default();
        let bytes = [2, 0x02, 5, 6];

        assert_eq!(
            scanner.scan(&ok(&bytes), &mut info),
            FrameScanResult::NewChunkFrame {
                data: Span::new(2, 2),
                tail: Span::empty()
            }
        );
        // Next image arrives with the toggled id and simply continues.
        assert!(matches!(
            scanner.scan(&ok(&[2, 0x01, 7]), &mut info),
            FrameScanResult::ValidFrame { .. }
        ));
    }
}
