//! Frame and stream filter types

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::registry::McamId;

/// Resolution class a frame was produced at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScaleMode {
    /// Full sensor resolution (4K)
    FourK,
    /// Downscaled HD
    Hd,
}

impl ScaleMode {
    pub fn to_wire(self) -> u8 {
        match self {
            ScaleMode::FourK => 1,
            ScaleMode::Hd => 2,
        }
    }

    pub fn from_wire(b: u8) -> Result<Self, ProtocolError> {
        match b {
            1 => Ok(ScaleMode::FourK),
            2 => Ok(ScaleMode::Hd),
            other => Err(ProtocolError::InvalidScaleMode(other)),
        }
    }
}

/// Server-side narrowing of which resolution classes reach a receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StreamFilter {
    /// Both 4K and HD frames (host default)
    #[default]
    Unfiltered,
    /// Only 4K frames
    FourKOnly,
    /// Only HD frames
    HdOnly,
}

impl StreamFilter {
    /// Whether a frame of the given class passes this filter
    pub fn allows(self, mode: ScaleMode) -> bool {
        match self {
            StreamFilter::Unfiltered => true,
            StreamFilter::FourKOnly => mode == ScaleMode::FourK,
            StreamFilter::HdOnly => mode == ScaleMode::Hd,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            StreamFilter::Unfiltered => 0,
            StreamFilter::FourKOnly => 1,
            StreamFilter::HdOnly => 2,
        }
    }

    pub fn from_wire(b: u8) -> Result<Self, ProtocolError> {
        match b {
            0 => Ok(StreamFilter::Unfiltered),
            1 => Ok(StreamFilter::FourKOnly),
            2 => Ok(StreamFilter::HdOnly),
            other => Err(ProtocolError::InvalidFilter(other)),
        }
    }
}

/// Metadata carried in the fixed-layout header of every frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameMetadata {
    /// Source sensor (stream id)
    pub mcam_id: McamId,
    /// Per-stream frame counter assigned by the host
    pub sequence: u32,
    /// Capture time in microseconds
    pub timestamp_us: u64,
    /// Resolution class
    pub scale_mode: ScaleMode,
    pub width: u32,
    pub height: u32,
    /// Exposure time in microseconds
    pub exposure_us: u32,
    /// Analog gain
    pub gain: f32,
}

/// A complete received frame
///
/// The payload is the encoded image exactly as sent by the host (JPEG for
/// current hosts). Cloning is cheap; the payload is reference counted.
#[derive(Debug, Clone)]
pub struct Frame {
    pub metadata: FrameMetadata,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(metadata: FrameMetadata, payload: Bytes) -> Self {
        Self { metadata, payload }
    }

    /// Stream the frame belongs to
    pub fn mcam_id(&self) -> McamId {
        self.metadata.mcam_id
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_allows() {
        assert!(StreamFilter::Unfiltered.allows(ScaleMode::FourK));
        assert!(StreamFilter::Unfiltered.allows(ScaleMode::Hd));
        assert!(StreamFilter::FourKOnly.allows(ScaleMode::FourK));
        assert!(!StreamFilter::FourKOnly.allows(ScaleMode::Hd));
        assert!(!StreamFilter::HdOnly.allows(ScaleMode::FourK));
        assert!(StreamFilter::HdOnly.allows(ScaleMode::Hd));
    }

    #[test]
    fn test_invalid_wire_values() {
        assert_eq!(
            ScaleMode::from_wire(0),
            Err(ProtocolError::InvalidScaleMode(0))
        );
        assert_eq!(
            StreamFilter::from_wire(9),
            Err(ProtocolError::InvalidFilter(9))
        );
    }

    #[test]
    fn test_default_filter_is_unfiltered() {
        assert_eq!(StreamFilter::default(), StreamFilter::Unfiltered);
    }
}
