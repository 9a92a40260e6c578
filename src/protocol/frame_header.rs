//! Frame datagram codec
//!
//! Every frame travels as one or more UDP datagrams. Each datagram starts
//! with a fixed 48-byte big-endian header followed by a slice of the frame
//! payload:
//!
//! ```text
//!  0       4   5   6       8           12          16
//!  +-------+---+---+-------+-----------+-----------+
//!  | magic |ver|scl| flags |  mcam id  | sequence  |
//!  +-------+---+---+-------+-----------+-----------+
//!  16                      24          28          32
//!  +-----------------------+-----------+-----------+
//!  |    timestamp (us)     |   width   |  height   |
//!  +-----------------------+-----------+-----------+
//!  32          36          40    42    44          48
//!  +-----------+-----------+-----+-----+-----------+
//!  | exposure  |   gain    | idx | cnt | total len |
//!  +-----------+-----------+-----+-----+-----------+
//! ```
//!
//! Frames larger than the fragment size are split across `cnt` datagrams
//! sharing the same mcam id and sequence.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::media::{FrameMetadata, ScaleMode};
use crate::protocol::constants::{
    FRAME_HEADER_SIZE, FRAME_MAGIC, FRAME_VERSION, MAX_FRAGMENT_PAYLOAD,
};
use crate::registry::McamId;

/// Decoded datagram header
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameHeader {
    pub metadata: FrameMetadata,
    pub flags: u16,
    pub fragment_index: u16,
    pub fragment_count: u16,
    pub total_len: u32,
}

impl FrameHeader {
    /// Header for an unfragmented frame
    pub fn single(metadata: FrameMetadata, payload_len: usize) -> Self {
        Self {
            metadata,
            flags: 0,
            fragment_index: 0,
            fragment_count: 1,
            total_len: payload_len as u32,
        }
    }

    /// Write the header into `buf`
    pub fn encode(&self, buf: &mut BytesMut) {
        let m = &self.metadata;
        buf.reserve(FRAME_HEADER_SIZE);
        buf.put_u32(FRAME_MAGIC);
        buf.put_u8(FRAME_VERSION);
        buf.put_u8(m.scale_mode.to_wire());
        buf.put_u16(self.flags);
        buf.put_u32(m.mcam_id.0);
        buf.put_u32(m.sequence);
        buf.put_u64(m.timestamp_us);
        buf.put_u32(m.width);
        buf.put_u32(m.height);
        buf.put_u32(m.exposure_us);
        buf.put_f32(m.gain);
        buf.put_u16(self.fragment_index);
        buf.put_u16(self.fragment_count);
        buf.put_u32(self.total_len);
    }

    /// Read a header from the front of `buf`, leaving the payload slice
    pub fn decode(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                needed: FRAME_HEADER_SIZE,
                available: buf.len(),
            });
        }

        let magic = buf.get_u32();
        if magic != FRAME_MAGIC {
            return Err(ProtocolError::BadMagic(magic));
        }

        let version = buf.get_u8();
        if version != FRAME_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }

        let scale_mode = ScaleMode::from_wire(buf.get_u8())?;
        let flags = buf.get_u16();
        let mcam_id = McamId(buf.get_u32());
        let sequence = buf.get_u32();
        let timestamp_us = buf.get_u64();
        let width = buf.get_u32();
        let height = buf.get_u32();
        let exposure_us = buf.get_u32();
        let gain = buf.get_f32();
        let fragment_index = buf.get_u16();
        let fragment_count = buf.get_u16();
        let total_len = buf.get_u32();

        if fragment_count == 0 || fragment_index >= fragment_count {
            return Err(ProtocolError::InvalidFragment {
                index: fragment_index,
                count: fragment_count,
            });
        }

        Ok(Self {
            metadata: FrameMetadata {
                mcam_id,
                sequence,
                timestamp_us,
                scale_mode,
                width,
                height,
                exposure_us,
                gain,
            },
            flags,
            fragment_index,
            fragment_count,
            total_len,
        })
    }
}

/// Parse a whole datagram into its header and fragment payload
pub fn parse_datagram(mut datagram: Bytes) -> Result<(FrameHeader, Bytes), ProtocolError> {
    let header = FrameHeader::decode(&mut datagram)?;
    if header.fragment_count == 1 && datagram.len() != header.total_len as usize {
        return Err(ProtocolError::LengthMismatch {
            expected: header.total_len as usize,
            actual: datagram.len(),
        });
    }
    Ok((header, datagram))
}

/// Split a frame into datagrams of at most `max_payload` payload bytes
///
/// An empty payload still produces a single datagram.
pub fn fragment_frame(metadata: FrameMetadata, payload: &Bytes, max_payload: usize) -> Vec<Bytes> {
    let max_payload = max_payload.clamp(1, MAX_FRAGMENT_PAYLOAD);
    let count = payload.len().div_ceil(max_payload).max(1);
    let count = count.min(u16::MAX as usize);

    let mut datagrams = Vec::with_capacity(count);
    for index in 0..count {
        let start = index * max_payload;
        let end = (start + max_payload).min(payload.len());
        let chunk = if start < end {
            payload.slice(start..end)
        } else {
            Bytes::new()
        };

        let header = FrameHeader {
            metadata,
            flags: 0,
            fragment_index: index as u16,
            fragment_count: count as u16,
            total_len: payload.len() as u32,
        };

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + chunk.len());
        header.encode(&mut buf);
        buf.put_slice(&chunk);
        datagrams.push(buf.freeze());
    }

    datagrams
}
