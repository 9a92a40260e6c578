//! Host-side stream table and frame sender
//!
//! Every mcam streams to at most one target. Sending holds the table lock,
//! so once a stream is removed no datagram for it is in flight.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::media::{FrameMetadata, ScaleMode, StreamFilter};
use crate::protocol::{fragment_frame, RejectCode};
use crate::registry::McamId;

/// A stream the host is sending
#[derive(Debug, Clone, PartialEq)]
pub struct HostStream {
    pub mcam: McamId,
    /// Receiver address (client ip, requested port)
    pub target: SocketAddr,
    pub filter: StreamFilter,
    /// Control session that started the stream
    pub session_id: u64,
}

#[derive(Default)]
struct Table {
    streams: HashMap<McamId, HostStream>,
    sequences: HashMap<McamId, u32>,
}

pub(super) struct Streamer {
    socket: UdpSocket,
    max_payload: usize,
    apply_filters: bool,
    table: Mutex<Table>,
}

impl Streamer {
    pub(super) fn new(socket: UdpSocket, max_payload: usize, apply_filters: bool) -> Self {
        Self {
            socket,
            max_payload,
            apply_filters,
            table: Mutex::new(Table::default()),
        }
    }

    pub(super) async fn start(
        &self,
        session_id: u64,
        mcam: McamId,
        target: SocketAddr,
    ) -> std::result::Result<(), RejectCode> {
        let mut table = self.table.lock().await;

        if let Some(existing) = table.streams.get(&mcam) {
            if existing.target == target {
                return Ok(());
            }
            return Err(RejectCode::AlreadyStreaming);
        }

        table.streams.insert(
            mcam,
            HostStream {
                mcam,
                target,
                filter: StreamFilter::Unfiltered,
                session_id,
            },
        );
        tracing::info!(session_id, mcam = %mcam, target = %target, "Host stream started");
        Ok(())
    }

    /// Returns `true` if a stream was removed
    pub(super) async fn stop(&self, mcam: McamId, target: SocketAddr) -> bool {
        let mut table = self.table.lock().await;

        match table.streams.get(&mcam) {
            Some(stream) if stream.target == target => {
                table.streams.remove(&mcam);
                tracing::info!(mcam = %mcam, target = %target, "Host stream stopped");
                true
            }
            _ => false,
        }
    }

    pub(super) async fn set_filter(
        &self,
        mcam: McamId,
        target: SocketAddr,
        filter: StreamFilter,
    ) -> std::result::Result<(), RejectCode> {
        let mut table = self.table.lock().await;

        match table.streams.get_mut(&mcam) {
            Some(stream) if stream.target == target => {
                stream.filter = filter;
                tracing::debug!(mcam = %mcam, target = %target, ?filter, "Host stream filter set");
                Ok(())
            }
            _ => Err(RejectCode::NotStreaming),
        }
    }

    /// Remove every stream started by a session, returning how many
    pub(super) async fn stop_session(&self, session_id: u64) -> usize {
        let mut table = self.table.lock().await;
        let before = table.streams.len();
        table.streams.retain(|_, s| s.session_id != session_id);
        before - table.streams.len()
    }

    pub(super) async fn clear(&self) {
        self.table.lock().await.streams.clear();
    }

    pub(super) async fn streams(&self) -> Vec<HostStream> {
        let mut list: Vec<HostStream> = self.table.lock().await.streams.values().cloned().collect();
        list.sort_by_key(|s| s.mcam);
        list
    }

    /// Send one frame of `mcam` to its stream, if any
    ///
    /// Returns the number of datagrams sent. The frame sequence advances
    /// even when nothing is sent.
    pub(super) async fn emit(&self, mcam: McamId, scale_mode: ScaleMode, payload: &Bytes) -> Result<usize> {
        let mut table = self.table.lock().await;

        let sequence = {
            let seq = table.sequences.entry(mcam).or_insert(0);
            let current = *seq;
            *seq = seq.wrapping_add(1);
            current
        };

        let (target, filter) = match table.streams.get(&mcam) {
            Some(stream) => (stream.target, stream.filter),
            None => return Ok(0),
        };

        if self.apply_filters && !filter.allows(scale_mode) {
            tracing::trace!(mcam = %mcam, ?scale_mode, "Frame filtered at host");
            return Ok(0);
        }

        let (width, height) = dimensions(scale_mode);
        let metadata = FrameMetadata {
            mcam_id: mcam,
            sequence,
            timestamp_us: now_us(),
            scale_mode,
            width,
            height,
            exposure_us: 10_000,
            gain: 1.0,
        };

        let datagrams = fragment_frame(metadata, payload, self.max_payload);
        for datagram in &datagrams {
            if let Err(e) = self.socket.send_to(datagram, target).await {
                // Receiver gone; the stream stays until the client stops it
                tracing::debug!(mcam = %mcam, target = %target, error = %e, "Frame send failed");
                return Ok(0);
            }
        }

        // Table lock held until here
        drop(table);
        Ok(datagrams.len())
    }
}

fn dimensions(mode: ScaleMode) -> (u32, u32) {
    match mode {
        ScaleMode::FourK => (3840, 2160),
        ScaleMode::Hd => (1920, 1080),
    }
}

fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::parse_datagram;

    async fn streamer(max_payload: usize, apply_filters: bool) -> Streamer {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        Streamer::new(socket, max_payload, apply_filters)
    }

    async fn sink() -> (UdpSocket, SocketAddr) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        (socket, addr)
    }

    #[tokio::test]
    async fn test_one_target_per_mcam() {
        let streamer = streamer(1024, true).await;
        let a: SocketAddr = "127.0.0.1:9002".parse().unwrap();
        let b: SocketAddr = "127.0.0.1:9003".parse().unwrap();

        assert!(streamer.start(1, McamId(1), a).await.is_ok());
        assert!(streamer.start(1, McamId(1), a).await.is_ok());
        assert_eq!(
            streamer.start(2, McamId(1), b).await,
            Err(RejectCode::AlreadyStreaming)
        );

        assert!(!streamer.stop(McamId(1), b).await);
        assert!(streamer.stop(McamId(1), a).await);
        assert!(streamer.streams().await.is_empty());
    }

    #[tokio::test]
    async fn test_set_filter_requires_stream() {
        let streamer = streamer(1024, true).await;
        let a: SocketAddr = "127.0.0.1:9002".parse().unwrap();

        assert_eq!(
            streamer.set_filter(McamId(1), a, StreamFilter::HdOnly).await,
            Err(RejectCode::NotStreaming)
        );

        streamer.start(1, McamId(1), a).await.unwrap();
        streamer.set_filter(McamId(1), a, StreamFilter::HdOnly).await.unwrap();
        assert_eq!(streamer.streams().await[0].filter, StreamFilter::HdOnly);
    }

    #[tokio::test]
    async fn test_emit_fragments_and_filters() {
        let streamer = streamer(100, true).await;
        let (rx, addr) = sink().await;

        streamer.start(1, McamId(4), addr).await.unwrap();
        streamer
            .set_filter(McamId(4), addr, StreamFilter::FourKOnly)
            .await
            .unwrap();

        let payload = Bytes::from(vec![7u8; 250]);
        assert_eq!(streamer.emit(McamId(4), ScaleMode::Hd, &payload).await.unwrap(), 0);
        assert_eq!(streamer.emit(McamId(4), ScaleMode::FourK, &payload).await.unwrap(), 3);

        let mut buf = vec![0u8; 2048];
        let (n, _) = rx.recv_from(&mut buf).await.unwrap();
        let (header, fragment) = parse_datagram(Bytes::copy_from_slice(&buf[..n])).unwrap();
        assert_eq!(header.metadata.mcam_id, McamId(4));
        assert_eq!(header.metadata.scale_mode, ScaleMode::FourK);
        // The filtered HD frame consumed sequence 0
        assert_eq!(header.metadata.sequence, 1);
        assert_eq!(header.fragment_count, 3);
        assert_eq!(fragment.len(), 100);
    }

    #[tokio::test]
    async fn test_ignore_filters() {
        let streamer = streamer(1024, false).await;
        let (_rx, addr) = sink().await;

        streamer.start(1, McamId(1), addr).await.unwrap();
        streamer
            .set_filter(McamId(1), addr, StreamFilter::FourKOnly)
            .await
            .unwrap();

        let payload = Bytes::from_static(b"frame");
        assert_eq!(streamer.emit(McamId(1), ScaleMode::Hd, &payload).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stop_session() {
        let streamer = streamer(1024, true).await;

        streamer.start(1, McamId(1), "127.0.0.1:9002".parse().unwrap()).await.unwrap();
        streamer.start(1, McamId(2), "127.0.0.1:9002".parse().unwrap()).await.unwrap();
        streamer.start(2, McamId(3), "127.0.0.1:9004".parse().unwrap()).await.unwrap();

        assert_eq!(streamer.stop_session(1).await, 2);
        let left = streamer.streams().await;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].mcam, McamId(3));

        // Nothing is sent for stopped streams
        let payload = Bytes::from_static(b"frame");
        assert_eq!(streamer.emit(McamId(1), ScaleMode::Hd, &payload).await.unwrap(), 0);
    }
}
