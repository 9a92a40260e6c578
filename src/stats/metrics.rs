//! Statistics for receivers and streams

use std::time::{Duration, Instant};

use crate::media::FrameMetadata;
use crate::registry::McamId;

/// Per-stream statistics
#[derive(Debug, Clone)]
pub struct StreamStats {
    /// Stream (sensor) id
    pub mcam_id: McamId,
    /// First frame time
    pub started_at: Instant,
    /// Frames handed to the callback
    pub frames_delivered: u64,
    /// Frames rejected by the route filter
    pub frames_filtered: u64,
    /// Payload bytes handed to the callback
    pub bytes_delivered: u64,
    /// Capture timestamp of the last delivered frame
    pub last_timestamp_us: u64,
    /// Sequence of the last delivered frame
    pub last_sequence: Option<u32>,
    /// Frames missing between consecutive delivered sequences
    pub sequence_gaps: u64,
}

impl StreamStats {
    pub fn new(mcam_id: McamId) -> Self {
        Self {
            mcam_id,
            started_at: Instant::now(),
            frames_delivered: 0,
            frames_filtered: 0,
            bytes_delivered: 0,
            last_timestamp_us: 0,
            last_sequence: None,
            sequence_gaps: 0,
        }
    }

    /// Account for a delivered frame
    pub fn on_delivered(&mut self, metadata: &FrameMetadata, payload_len: usize) {
        if let Some(last) = self.last_sequence {
            let step = metadata.sequence.wrapping_sub(last);
            // Reordered or repeated sequences are not gaps
            if step > 1 && step < u32::MAX / 2 {
                self.sequence_gaps += (step - 1) as u64;
            }
        }

        self.last_sequence = Some(metadata.sequence);
        self.last_timestamp_us = metadata.timestamp_us;
        self.frames_delivered += 1;
        self.bytes_delivered += payload_len as u64;
    }

    /// Get duration since the first frame
    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Calculate bitrate in bits per second
    pub fn bitrate(&self) -> u64 {
        let secs = self.duration().as_secs();
        if secs > 0 {
            (self.bytes_delivered * 8) / secs
        } else {
            0
        }
    }

    /// Calculate delivered framerate
    pub fn framerate(&self) -> f64 {
        let secs = self.duration().as_secs_f64();
        if secs > 0.0 {
            self.frames_delivered as f64 / secs
        } else {
            0.0
        }
    }
}

/// Receiver-wide statistics
#[derive(Debug, Clone, Default)]
pub struct ReceiverStats {
    /// Datagrams read from the socket
    pub datagrams: u64,
    /// Datagrams that failed to decode or reassemble
    pub malformed: u64,
    /// Complete frames produced by reassembly
    pub frames_assembled: u64,
    /// Frames handed to the callback
    pub frames_delivered: u64,
    /// Frames dropped because the delivery queue was full
    pub dropped_backpressure: u64,
    /// Frames dropped because no route exists for their stream
    pub dropped_unrouted: u64,
    /// Frames dropped by a route filter
    pub dropped_filtered: u64,
    /// Frames dropped because no callback was registered
    pub dropped_no_callback: u64,
    /// Partial frames evicted before completion
    pub evicted_partials: u64,
    /// Per-stream statistics, ordered by mcam id
    pub streams: Vec<StreamStats>,
}

impl ReceiverStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total frames dropped for any reason
    pub fn frames_dropped(&self) -> u64 {
        self.dropped_backpressure
            + self.dropped_unrouted
            + self.dropped_filtered
            + self.dropped_no_callback
    }

    /// Statistics for one stream
    pub fn stream(&self, mcam: McamId) -> Option<&StreamStats> {
        self.streams.iter().find(|s| s.mcam_id == mcam)
    }
}
