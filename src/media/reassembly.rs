//! Fragment reassembly
//!
//! Frames larger than one datagram arrive as several fragments sharing an
//! mcam id and sequence number. Fragments may arrive out of order, be
//! duplicated, or never arrive at all. The reassembler keeps a small number
//! of partial frames per stream and evicts the oldest when a newer frame
//! starts arriving, so a lost fragment costs one frame and nothing more.

use std::collections::{HashMap, VecDeque};

use bytes::{Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::protocol::FrameHeader;
use crate::registry::McamId;

use super::frame::{Frame, FrameMetadata};

/// A frame with some fragments still missing
#[derive(Debug)]
struct PartialFrame {
    metadata: FrameMetadata,
    total_len: usize,
    fragments: Vec<Option<Bytes>>,
    received: usize,
    received_bytes: usize,
}

impl PartialFrame {
    fn new(header: &FrameHeader) -> Self {
        Self {
            metadata: header.metadata,
            total_len: header.total_len as usize,
            fragments: vec![None; header.fragment_count as usize],
            received: 0,
            received_bytes: 0,
        }
    }

    fn is_complete(&self) -> bool {
        self.received == self.fragments.len()
    }

    fn assemble(self) -> Result<Frame, ProtocolError> {
        if self.received_bytes != self.total_len {
            return Err(ProtocolError::LengthMismatch {
                expected: self.total_len,
                actual: self.received_bytes,
            });
        }

        let mut payload = BytesMut::with_capacity(self.total_len);
        for fragment in self.fragments.into_iter().flatten() {
            payload.extend_from_slice(&fragment);
        }

        Ok(Frame::new(self.metadata, payload.freeze()))
    }
}

/// Per-stream reassembly state
#[derive(Debug, Default)]
struct StreamAssembly {
    /// Partial frames, oldest first
    pending: VecDeque<PartialFrame>,
    /// Sequence of the last frame handed out
    last_completed: Option<u32>,
}

/// Reassembles fragmented frames for any number of streams
#[derive(Debug)]
pub struct Reassembler {
    max_pending: usize,
    streams: HashMap<McamId, StreamAssembly>,
    evicted: u64,
}

impl Reassembler {
    /// Create a reassembler keeping at most `max_pending` partial frames per stream
    pub fn new(max_pending: usize) -> Self {
        Self {
            max_pending: max_pending.max(1),
            streams: HashMap::new(),
            evicted: 0,
        }
    }

    /// Feed one fragment
    ///
    /// Returns the complete frame once its last missing fragment arrives.
    /// Duplicated fragments and fragments of an already completed frame are
    /// ignored.
    pub fn push(
        &mut self,
        header: &FrameHeader,
        fragment: Bytes,
    ) -> Result<Option<Frame>, ProtocolError> {
        let mcam = header.metadata.mcam_id;
        let sequence = header.metadata.sequence;

        if header.fragment_count == 1 {
            let stream = self.streams.entry(mcam).or_default();
            if stream.last_completed == Some(sequence) {
                return Ok(None);
            }
            stream.last_completed = Some(sequence);
            return Ok(Some(Frame::new(header.metadata, fragment)));
        }

        let stream = self.streams.entry(mcam).or_default();
        if stream.last_completed == Some(sequence) {
            return Ok(None);
        }

        let position = stream
            .pending
            .iter()
            .position(|p| p.metadata.sequence == sequence);

        let position = match position {
            Some(pos) => {
                let partial = &stream.pending[pos];
                if partial.fragments.len() != header.fragment_count as usize
                    || partial.total_len != header.total_len as usize
                {
                    return Err(ProtocolError::InvalidFragment {
                        index: header.fragment_index,
                        count: header.fragment_count,
                    });
                }
                pos
            }
            None => {
                if stream.pending.len() >= self.max_pending {
                    if let Some(old) = stream.pending.pop_front() {
                        self.evicted += 1;
                        tracing::trace!(
                            mcam = %mcam,
                            sequence = old.metadata.sequence,
                            received = old.received,
                            expected = old.fragments.len(),
                            "Evicted incomplete frame"
                        );
                    }
                }
                stream.pending.push_back(PartialFrame::new(header));
                stream.pending.len() - 1
            }
        };

        let partial = &mut stream.pending[position];
        let slot = &mut partial.fragments[header.fragment_index as usize];
        if slot.is_some() {
            return Ok(None);
        }
        partial.received_bytes += fragment.len();
        partial.received += 1;
        *slot = Some(fragment);

        if !partial.is_complete() {
            return Ok(None);
        }

        let complete = match stream.pending.remove(position) {
            Some(p) => p,
            None => return Ok(None),
        };
        stream.last_completed = Some(sequence);
        complete.assemble().map(Some)
    }

    /// Drop all state for a stream
    pub fn reset_stream(&mut self, mcam: McamId) {
        self.streams.remove(&mcam);
    }

    /// Number of streams with reassembly state
    pub fn streams(&self) -> usize {
        self.streams.len()
    }

    /// Number of partial frames currently held across all streams
    pub fn pending(&self) -> usize {
        self.streams.values().map(|s| s.pending.len()).sum()
    }

    /// Number of partial frames evicted before completion
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::ScaleMode;
    use crate::protocol::{fragment_frame, parse_datagram};

    fn meta(mcam: u32, sequence: u32) -> FrameMetadata {
        FrameMetadata {
            mcam_id: McamId(mcam),
            sequence,
            timestamp_us: sequence as u64 * 33_333,
            scale_mode: ScaleMode::FourK,
            width: 3840,
            height: 2160,
            exposure_us: 10_000,
            gain: 1.0,
        }
    }

    fn fragments(mcam: u32, sequence: u32, payload: &Bytes, size: usize) -> Vec<(FrameHeader, Bytes)> {
        fragment_frame(meta(mcam, sequence), payload, size)
            .into_iter()
            .map(|d| parse_datagram(d).unwrap())
            .collect()
    }

    #[test]
    fn test_single_fragment_passthrough() {
        let mut r = Reassembler::new(4);
        let payload = Bytes::from_static(b"jpeg");
        let frags = fragments(1, 0, &payload, 1024);

        let frame = r.push(&frags[0].0, frags[0].1.clone()).unwrap().unwrap();
        assert_eq!(frame.payload, payload);
        assert_eq!(r.pending(), 0);
    }

    #[test]
    fn test_out_of_order_reassembly() {
        let mut r = Reassembler::new(4);
        let payload = Bytes::from((0..=255u8).cycle().take(1000).collect::<Vec<_>>());
        let frags = fragments(1, 5, &payload, 300);
        assert_eq!(frags.len(), 4);

        for i in [3, 1, 0] {
            assert!(r.push(&frags[i].0, frags[i].1.clone()).unwrap().is_none());
        }
        let frame = r.push(&frags[2].0, frags[2].1.clone()).unwrap().unwrap();

        assert_eq!(frame.payload, payload);
        assert_eq!(frame.metadata.sequence, 5);
        assert_eq!(r.pending(), 0);
    }

    #[test]
    fn test_duplicates_ignored() {
        let mut r = Reassembler::new(4);
        let payload = Bytes::from(vec![7u8; 500]);
        let frags = fragments(1, 0, &payload, 300);

        assert!(r.push(&frags[0].0, frags[0].1.clone()).unwrap().is_none());
        assert!(r.push(&frags[0].0, frags[0].1.clone()).unwrap().is_none());
        assert!(r.push(&frags[1].0, frags[1].1.clone()).unwrap().is_some());

        // Late duplicate of a completed frame
        assert!(r.push(&frags[1].0, frags[1].1.clone()).unwrap().is_none());
        assert_eq!(r.pending(), 0);
    }

    #[test]
    fn test_eviction_of_stale_partials() {
        let mut r = Reassembler::new(2);
        let payload = Bytes::from(vec![1u8; 600]);

        for seq in 0..3 {
            let frags = fragments(1, seq, &payload, 300);
            r.push(&frags[0].0, frags[0].1.clone()).unwrap();
        }

        assert_eq!(r.pending(), 2);
        assert_eq!(r.evicted(), 1);

        // Frame 0 was evicted; its second fragment starts a fresh partial
        let frags = fragments(1, 0, &payload, 300);
        assert!(r.push(&frags[1].0, frags[1].1.clone()).unwrap().is_none());
        assert_eq!(r.evicted(), 2);
    }

    #[test]
    fn test_streams_are_independent() {
        let mut r = Reassembler::new(1);
        let payload = Bytes::from(vec![2u8; 600]);
        let a = fragments(1, 0, &payload, 300);
        let b = fragments(2, 0, &payload, 300);

        r.push(&a[0].0, a[0].1.clone()).unwrap();
        r.push(&b[0].0, b[0].1.clone()).unwrap();
        assert_eq!(r.evicted(), 0);

        assert!(r.push(&a[1].0, a[1].1.clone()).unwrap().is_some());
        assert!(r.push(&b[1].0, b[1].1.clone()).unwrap().is_some());
    }

    #[test]
    fn test_reset_stream_drops_partials() {
        let mut r = Reassembler::new(4);
        let payload = Bytes::from(vec![4u8; 600]);
        let a = fragments(1, 0, &payload, 300);
        let b = fragments(2, 0, &payload, 300);

        r.push(&a[0].0, a[0].1.clone()).unwrap();
        r.push(&b[0].0, b[0].1.clone()).unwrap();
        assert_eq!(r.streams(), 2);

        r.reset_stream(McamId(1));
        assert_eq!(r.streams(), 1);
        assert_eq!(r.pending(), 1);

        // The rest of the reset frame starts over and never completes alone
        assert!(r.push(&a[1].0, a[1].1.clone()).unwrap().is_none());
        assert!(r.push(&b[1].0, b[1].1.clone()).unwrap().is_some());
    }

    #[test]
    fn test_inconsistent_fragment_count() {
        let mut r = Reassembler::new(4);
        let payload = Bytes::from(vec![3u8; 900]);
        let three = fragments(1, 0, &payload, 300);
        let two = fragments(1, 0, &payload, 450);

        r.push(&three[0].0, three[0].1.clone()).unwrap();
        assert!(matches!(
            r.push(&two[1].0, two[1].1.clone()),
            Err(ProtocolError::InvalidFragment { .. })
        ));
    }
}
