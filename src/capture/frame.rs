//! Isochronous frame descriptors as delivered by the USB transport.
//!
//! A completed isochronous transfer hands us one shared byte buffer and a
//! list of per-micro-frame descriptors. Micro-frame `i` occupies the slot
//! starting at `i * bytes_per_frame` in that buffer; only the first
//! `actual` bytes of a slot were actually received.

/// Completion status of a single isochronous micro-frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameStatus {
    /// The micro-frame completed normally.
    #[default]
    Ok,
    /// The host controller reported data underrun (short packet); the
    /// received bytes are still usable.
    Underrun,
    /// The micro-frame was lost or corrupted (CRC, overrun, not accessed).
    Error,
}

impl FrameStatus {
    /// Returns true if the received bytes can be trusted.
    #[inline]
    pub fn is_usable(self) -> bool {
        !matches!(self, FrameStatus::Error)
    }
}

/// Per-micro-frame metadata reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameDescriptor {
    /// Completion status.
    pub status: FrameStatus,
    /// Number of bytes actually received.
    pub actual: usize,
}

impl FrameDescriptor {
    /// Creates a descriptor for a normally completed micro-frame.
    pub fn ok(actual: usize) -> Self {
        Self {
            status: FrameStatus::Ok,
            actual,
        }
    }

    /// Creates a descriptor for a failed micro-frame.
    pub fn error() -> Self {
        Self {
            status: FrameStatus::Error,
            actual: 0,
        }
    }
}

/// A read-only view of one received micro-frame.
#[derive(Debug, Clone, Copy)]
pub struct IsochronousFrame<'a> {
    status: FrameStatus,
    data: &'a [u8],
}

impl<'a> IsochronousFrame<'a> {
    /// Creates a frame view over already-received bytes.
    pub fn new(status: FrameStatus, data: &'a [u8]) -> Self {
        Self { status, data }
    }

    /// Returns the completion status.
    #[inline]
    pub fn status(&self) -> FrameStatus {
        self.status
    }

    /// Returns the received bytes.
    #[inline]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Returns the number of received bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if nothing was received.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// One completed isochronous transfer: a shared buffer plus descriptors.
#[derive(Debug, Clone, Copy)]
pub struct TransferBatch<'a> {
    buffer: &'a [u8],
    descriptors: &'a [FrameDescriptor],
    bytes_per_frame: usize,
}

impl<'a> TransferBatch<'a> {
    /// Wraps a transfer buffer whose micro-frame slots are `bytes_per_frame` apart.
    pub fn new(buffer: &'a [u8], descriptors: &'a [FrameDescriptor], bytes_per_frame: usize) -> Self {
        Self {
            buffer,
            descriptors,
            bytes_per_frame,
        }
    }

    /// Number of micro-frames in the batch.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Returns true if the batch holds no micro-frames.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Iterates over the micro-frames in transfer order.
    ///
    /// A descriptor claiming more bytes than its slot (or than the buffer)
    /// holds is clamped to what is really there.
    pub fn frames(&self) -> impl Iterator<Item = IsochronousFrame<'a>> + '_ {
        let buffer = self.buffer;
        let stride = self.bytes_per_frame;
        self.descriptors.iter().enumerate().map(move |(i, desc)| {
            let start = (i * stride).min(buffer.len());
            let end = (start + desc.actual.min(stride)).min(buffer.len());
            IsochronousFrame::new(desc.status, &buffer[start..end])
        })
    }
}
