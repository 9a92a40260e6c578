//! UDP frame receiver
//!
//! ```text
//!   UdpSocket ──► socket task ──► parse ──► route/filter ──► reassemble
//!                                                               │ try_send
//!                                                               ▼
//!                             callback ◄── delivery task ◄── mpsc(queue_depth)
//! ```
//!
//! The socket task never waits on the callback: when the queue is full the
//! frame is dropped. Fragments of frames that will be dropped are never
//! reassembled. The delivery task invokes the callback while holding
//! the callback slot, which is also what `close()` takes to detach it.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::media::{Frame, FrameMetadata, Reassembler, StreamFilter};
use crate::protocol::parse_datagram;
use crate::registry::McamId;
use crate::stats::{ReceiverStats, StreamStats};

use super::config::ReceiverConfig;
use super::endpoint::StreamEndpoint;

/// Frame delivery callback
pub type FrameCallback = Box<dyn Fn(FrameMetadata, Bytes) + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Accepted,
    Filtered,
    Unrouted,
}

/// State shared between the receiver handle and its tasks
struct Shared {
    config: ReceiverConfig,
    endpoint: StreamEndpoint,
    closed: AtomicBool,
    callback: Mutex<Option<FrameCallback>>,
    routes: RwLock<HashMap<McamId, StreamFilter>>,
    reassembler: Mutex<Reassembler>,
    latest: Mutex<HashMap<McamId, Frame>>,
    stats: Mutex<ReceiverStats>,
    streams: Mutex<HashMap<McamId, StreamStats>>,
}

struct Tasks {
    shutdown: watch::Sender<bool>,
    socket: JoinHandle<()>,
    delivery: JoinHandle<()>,
}

/// Receiver bound to one UDP endpoint
pub struct FrameReceiver {
    shared: Arc<Shared>,
    tasks: Mutex<Option<Tasks>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FrameReceiver {
    /// Bind a receiver on `port` with a delivery queue of `queue_depth` frames
    pub async fn open(port: u16, queue_depth: usize) -> Result<Self> {
        Self::open_with_config(ReceiverConfig::with_port(port).queue_depth(queue_depth)).await
    }

    /// Bind a receiver with full configuration
    pub async fn open_with_config(config: ReceiverConfig) -> Result<Self> {
        let socket = UdpSocket::bind((config.bind_ip, config.port))
            .await
            .map_err(|source| Error::Bind {
                port: config.port,
                source,
            })?;
        let local = socket.local_addr().map_err(|source| Error::Bind {
            port: config.port,
            source,
        })?;
        let endpoint = StreamEndpoint::from(local);

        let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let reassembler = Reassembler::new(config.max_pending_frames);
        let shared = Arc::new(Shared {
            config,
            endpoint,
            closed: AtomicBool::new(false),
            callback: Mutex::new(None),
            routes: RwLock::new(HashMap::new()),
            reassembler: Mutex::new(reassembler),
            latest: Mutex::new(HashMap::new()),
            stats: Mutex::new(ReceiverStats::new()),
            streams: Mutex::new(HashMap::new()),
        });

        let socket_task = tokio::spawn(socket_loop(
            Arc::clone(&shared),
            socket,
            tx,
            shutdown_rx,
        ));
        let delivery_task = tokio::spawn(delivery_loop(Arc::clone(&shared), rx));

        tracing::info!(endpoint = %endpoint, queue_depth = shared.config.queue_depth, "Frame receiver open");

        Ok(Self {
            shared,
            tasks: Mutex::new(Some(Tasks {
                shutdown,
                socket: socket_task,
                delivery: delivery_task,
            })),
        })
    }

    /// Bound endpoint
    pub fn endpoint(&self) -> StreamEndpoint {
        self.shared.endpoint
    }

    /// Bound port
    pub fn port(&self) -> u16 {
        self.shared.endpoint.port
    }

    /// Whether `close()` has been called
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Set the frame callback, replacing any previous one
    ///
    /// The callback runs on the receiver's delivery task and must not block;
    /// hand long work to a worker (see [`FrameHandoff`](super::FrameHandoff)).
    /// It must not call `close()` on this receiver.
    pub fn register_callback<F>(&self, callback: F)
    where
        F: Fn(FrameMetadata, Bytes) + Send + Sync + 'static,
    {
        let mut slot = lock(&self.shared.callback);
        if self.is_closed() {
            tracing::debug!(endpoint = %self.shared.endpoint, "Callback ignored, receiver closed");
            return;
        }
        *slot = Some(Box::new(callback));
    }

    /// Remove the frame callback
    pub fn clear_callback(&self) {
        lock(&self.shared.callback).take();
    }

    /// Accept frames from `mcam`, narrowed by `filter`
    pub fn add_route(&self, mcam: McamId, filter: StreamFilter) {
        self.shared.write_routes().insert(mcam, filter);
        tracing::debug!(endpoint = %self.shared.endpoint, mcam = %mcam, ?filter, "Route added");
    }

    /// Change the filter of an existing route
    ///
    /// Returns `false` if there is no route for `mcam`.
    pub fn set_route_filter(&self, mcam: McamId, filter: StreamFilter) -> bool {
        match self.shared.write_routes().get_mut(&mcam) {
            Some(existing) => {
                *existing = filter;
                true
            }
            None => false,
        }
    }

    /// Stop accepting frames from `mcam`
    ///
    /// Partial frames of the stream are discarded.
    pub fn remove_route(&self, mcam: McamId) -> bool {
        let removed = self.shared.write_routes().remove(&mcam).is_some();
        lock(&self.shared.reassembler).reset_stream(mcam);
        removed
    }

    /// Filter of the route for `mcam`, if any
    pub fn route(&self, mcam: McamId) -> Option<StreamFilter> {
        self.shared.read_routes().get(&mcam).copied()
    }

    /// Most recent delivered frame of a stream
    pub fn latest_frame(&self, mcam: McamId) -> Option<Frame> {
        lock(&self.shared.latest).get(&mcam).cloned()
    }

    /// Snapshot of the receiver statistics
    pub fn stats(&self) -> ReceiverStats {
        let mut stats = lock(&self.shared.stats).clone();
        let mut streams: Vec<StreamStats> = lock(&self.shared.streams).values().cloned().collect();
        streams.sort_by_key(|s| s.mcam_id);
        stats.streams = streams;
        stats
    }

    /// Close the receiver
    ///
    /// After this returns the callback registered before the call is never
    /// invoked again, buffered frames are discarded and the port is free.
    /// Calling it again is a no-op.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        // Waits for an in-flight invocation to finish
        let callback = lock(&self.shared.callback).take();
        drop(callback);

        let tasks = lock(&self.tasks).take();
        if let Some(tasks) = tasks {
            let _ = tasks.shutdown.send(true);
            tasks.delivery.abort();
            let _ = tasks.socket.await;
            let _ = tasks.delivery.await;
        }

        lock(&self.shared.latest).clear();

        let stats = self.stats();
        tracing::info!(
            endpoint = %self.shared.endpoint,
            delivered = stats.frames_delivered,
            dropped = stats.frames_dropped(),
            "Frame receiver closed"
        );
    }
}

impl Drop for FrameReceiver {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        if let Some(tasks) = lock(&self.tasks).take() {
            let _ = tasks.shutdown.send(true);
            tasks.socket.abort();
            tasks.delivery.abort();
        }
    }
}

impl Shared {
    fn read_routes(&self) -> std::sync::RwLockReadGuard<'_, HashMap<McamId, StreamFilter>> {
        self.routes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_routes(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<McamId, StreamFilter>> {
        self.routes.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn admission(&self, metadata: &FrameMetadata) -> Admission {
        let filter = self.read_routes().get(&metadata.mcam_id).copied();
        match filter {
            Some(filter) if filter.allows(metadata.scale_mode) => Admission::Accepted,
            Some(_) => Admission::Filtered,
            None if !self.config.drop_unrouted => Admission::Accepted,
            None => Admission::Unrouted,
        }
    }

    fn count_rejected(&self, metadata: &FrameMetadata, admission: Admission) {
        match admission {
            Admission::Accepted => {}
            Admission::Filtered => {
                lock(&self.stats).dropped_filtered += 1;
                lock(&self.streams)
                    .entry(metadata.mcam_id)
                    .or_insert_with(|| StreamStats::new(metadata.mcam_id))
                    .frames_filtered += 1;
            }
            Admission::Unrouted => {
                lock(&self.stats).dropped_unrouted += 1;
                tracing::trace!(endpoint = %self.endpoint, mcam = %metadata.mcam_id, "Dropped unrouted frame");
            }
        }
    }

    /// Route check; counts the frame when rejected
    fn admits(&self, metadata: &FrameMetadata) -> bool {
        match self.admission(metadata) {
            Admission::Accepted => true,
            rejected => {
                self.count_rejected(metadata, rejected);
                false
            }
        }
    }

    fn on_datagram(&self, datagram: Bytes, tx: &mpsc::Sender<Frame>) {
        lock(&self.stats).datagrams += 1;

        let (header, fragment) = match parse_datagram(datagram) {
            Ok(parts) => parts,
            Err(e) => {
                lock(&self.stats).malformed += 1;
                tracing::debug!(endpoint = %self.endpoint, error = %e, "Malformed datagram");
                return;
            }
        };

        let admission = self.admission(&header.metadata);
        if admission != Admission::Accepted {
            // Counted once per frame, on its first fragment
            lock(&self.reassembler).reset_stream(header.metadata.mcam_id);
            if header.fragment_index == 0 {
                self.count_rejected(&header.metadata, admission);
            }
            return;
        }

        let frame = {
            let mut reassembler = lock(&self.reassembler);
            let evicted_before = reassembler.evicted();
            let result = reassembler.push(&header, fragment);
            let evicted = reassembler.evicted() - evicted_before;
            if evicted > 0 {
                lock(&self.stats).evicted_partials += evicted;
            }
            result
        };

        let frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => return,
            Err(e) => {
                lock(&self.stats).malformed += 1;
                tracing::debug!(endpoint = %self.endpoint, error = %e, "Malformed datagram");
                return;
            }
        };

        lock(&self.stats).frames_assembled += 1;

        match tx.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(frame)) => {
                lock(&self.stats).dropped_backpressure += 1;
                tracing::trace!(
                    endpoint = %self.endpoint,
                    mcam = %frame.metadata.mcam_id,
                    sequence = frame.metadata.sequence,
                    "Delivery queue full, frame dropped"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    fn deliver(&self, frame: Frame) {
        let slot = lock(&self.callback);

        if self.is_closed() {
            tracing::trace!(endpoint = %self.endpoint, "Frame arrived after close, dropped");
            return;
        }

        // The route may have changed while the frame was queued
        if !self.admits(&frame.metadata) {
            return;
        }

        let callback = match slot.as_ref() {
            Some(callback) => callback,
            None => {
                lock(&self.stats).dropped_no_callback += 1;
                return;
            }
        };

        lock(&self.stats).frames_delivered += 1;
        lock(&self.streams)
            .entry(frame.metadata.mcam_id)
            .or_insert_with(|| StreamStats::new(frame.metadata.mcam_id))
            .on_delivered(&frame.metadata, frame.payload.len());

        if self.config.keep_latest {
            lock(&self.latest).insert(frame.metadata.mcam_id, frame.clone());
        }

        let Frame { metadata, payload } = frame;
        if catch_unwind(AssertUnwindSafe(|| callback(metadata, payload))).is_err() {
            tracing::error!(
                endpoint = %self.endpoint,
                mcam = %metadata.mcam_id,
                "Frame callback panicked"
            );
        }
    }
}

async fn socket_loop(
    shared: Arc<Shared>,
    socket: UdpSocket,
    tx: mpsc::Sender<Frame>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; shared.config.read_buffer_size];

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok((len, _peer)) => {
                    if shared.is_closed() {
                        break;
                    }
                    shared.on_datagram(Bytes::copy_from_slice(&buf[..len]), &tx);
                }
                Err(e) => {
                    // ICMP port-unreachable and similar surface here on some platforms
                    tracing::debug!(endpoint = %shared.endpoint, error = %e, "Receive error");
                }
            },
        }
    }

    tracing::debug!(endpoint = %shared.endpoint, "Socket task stopped");
}

async fn delivery_loop(shared: Arc<Shared>, mut rx: mpsc::Receiver<Frame>) {
    while let Some(frame) = rx.recv().await {
        if shared.is_closed() {
            break;
        }
        shared.deliver(frame);
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddr};
    use std::time::Duration;

    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::media::ScaleMode;
    use crate::protocol::fragment_frame;

    fn meta(mcam: u32, sequence: u32, scale_mode: ScaleMode) -> FrameMetadata {
        FrameMetadata {
            mcam_id: McamId(mcam),
            sequence,
            timestamp_us: 1_000 + sequence as u64,
            scale_mode,
            width: 1920,
            height: 1080,
            exposure_us: 5_000,
            gain: 1.0,
        }
    }

    async fn open_local() -> FrameReceiver {
        FrameReceiver::open_with_config(
            ReceiverConfig::default().bind_ip(Ipv4Addr::LOCALHOST.into()),
        )
        .await
        .unwrap()
    }

    async fn send(socket: &UdpSocket, to: SocketAddr, meta: FrameMetadata, payload: &[u8], frag: usize) {
        for datagram in fragment_frame(meta, &Bytes::copy_from_slice(payload), frag) {
            socket.send_to(&datagram, to).await.unwrap();
        }
    }

    fn collect(receiver: &FrameReceiver) -> UnboundedReceiver<(FrameMetadata, Bytes)> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        receiver.register_callback(move |meta, payload| {
            let _ = tx.send((meta, payload));
        });
        rx
    }

    async fn next(rx: &mut UnboundedReceiver<(FrameMetadata, Bytes)>) -> Option<(FrameMetadata, Bytes)> {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .ok()
            .flatten()
    }

    async fn sender() -> UdpSocket {
        UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap()
    }

    #[tokio::test]
    async fn test_delivers_routed_frames() {
        let receiver = open_local().await;
        receiver.add_route(McamId(1), StreamFilter::Unfiltered);
        let mut rx = collect(&receiver);
        let socket = sender().await;

        send(&socket, receiver.endpoint().socket_addr(), meta(1, 0, ScaleMode::Hd), b"jpeg-bytes", 1024).await;

        let (meta, payload) = next(&mut rx).await.unwrap();
        assert_eq!(meta.mcam_id, McamId(1));
        assert_eq!(&payload[..], b"jpeg-bytes");
        assert!(receiver.latest_frame(McamId(1)).is_some());

        receiver.close().await;
    }

    #[tokio::test]
    async fn test_reassembles_fragmented_frame() {
        let receiver = open_local().await;
        receiver.add_route(McamId(2), StreamFilter::Unfiltered);
        let mut rx = collect(&receiver);
        let socket = sender().await;

        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        send(&socket, receiver.endpoint().socket_addr(), meta(2, 1, ScaleMode::FourK), &payload, 1200).await;

        let (_, received) = next(&mut rx).await.unwrap();
        assert_eq!(&received[..], &payload[..]);

        receiver.close().await;
    }

    #[tokio::test]
    async fn test_filter_drops_other_class() {
        let receiver = open_local().await;
        receiver.add_route(McamId(1), StreamFilter::FourKOnly);
        let mut rx = collect(&receiver);
        let socket = sender().await;
        let addr = receiver.endpoint().socket_addr();

        send(&socket, addr, meta(1, 0, ScaleMode::Hd), b"hd", 1024).await;
        send(&socket, addr, meta(1, 1, ScaleMode::FourK), b"4k", 1024).await;

        let (meta, _) = next(&mut rx).await.unwrap();
        assert_eq!(meta.scale_mode, ScaleMode::FourK);
        assert_eq!(meta.sequence, 1);

        let stats = receiver.stats();
        assert_eq!(stats.dropped_filtered, 1);
        assert_eq!(stats.stream(McamId(1)).unwrap().frames_filtered, 1);

        receiver.close().await;
    }

    #[tokio::test]
    async fn test_unrouted_frames_dropped() {
        let receiver = open_local().await;
        receiver.add_route(McamId(1), StreamFilter::Unfiltered);
        let mut rx = collect(&receiver);
        let socket = sender().await;
        let addr = receiver.endpoint().socket_addr();

        send(&socket, addr, meta(9, 0, ScaleMode::Hd), b"stray", 1024).await;
        send(&socket, addr, meta(1, 0, ScaleMode::Hd), b"wanted", 1024).await;

        let (meta, _) = next(&mut rx).await.unwrap();
        assert_eq!(meta.mcam_id, McamId(1));
        assert_eq!(receiver.stats().dropped_unrouted, 1);

        receiver.close().await;
    }

    #[tokio::test]
    async fn test_dropped_streams_leave_no_reassembly_state() {
        let receiver = open_local().await;
        receiver.add_route(McamId(1), StreamFilter::Unfiltered);
        receiver.add_route(McamId(3), StreamFilter::Unfiltered);
        let mut rx = collect(&receiver);
        let socket = sender().await;
        let addr = receiver.endpoint().socket_addr();
        let large = Bytes::from(vec![5u8; 3000]);

        // First fragment only, for many streams nobody asked for
        for mcam in 100..150 {
            let datagrams = fragment_frame(meta(mcam, 0, ScaleMode::FourK), &large, 1200);
            assert!(datagrams.len() > 1);
            socket.send_to(&datagrams[0], addr).await.unwrap();
        }
        let partial = fragment_frame(meta(3, 0, ScaleMode::FourK), &large, 1200);
        socket.send_to(&partial[0], addr).await.unwrap();
        send(&socket, addr, meta(1, 0, ScaleMode::Hd), b"done", 1024).await;

        let (meta, _) = next(&mut rx).await.unwrap();
        assert_eq!(meta.mcam_id, McamId(1));
        assert_eq!(receiver.stats().dropped_unrouted, 50);
        assert_eq!(lock(&receiver.shared.reassembler).streams(), 2);

        assert!(receiver.remove_route(McamId(3)));
        assert_eq!(lock(&receiver.shared.reassembler).streams(), 1);
        assert_eq!(lock(&receiver.shared.reassembler).pending(), 0);

        receiver.close().await;
    }

    #[tokio::test]
    async fn test_malformed_datagram_counted() {
        let receiver = open_local().await;
        receiver.add_route(McamId(1), StreamFilter::Unfiltered);
        let mut rx = collect(&receiver);
        let socket = sender().await;
        let addr = receiver.endpoint().socket_addr();

        socket.send_to(b"not a frame", addr).await.unwrap();
        send(&socket, addr, meta(1, 0, ScaleMode::Hd), b"ok", 1024).await;

        assert!(next(&mut rx).await.is_some());
        let stats = receiver.stats();
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.datagrams, 2);

        receiver.close().await;
    }

    #[tokio::test]
    async fn test_callback_replaced() {
        let receiver = open_local().await;
        receiver.add_route(McamId(1), StreamFilter::Unfiltered);
        let mut first = collect(&receiver);
        let mut second = collect(&receiver);
        let socket = sender().await;

        send(&socket, receiver.endpoint().socket_addr(), meta(1, 0, ScaleMode::Hd), b"x", 1024).await;

        assert!(next(&mut second).await.is_some());
        assert!(first.try_recv().is_err());

        receiver.close().await;
    }

    #[tokio::test]
    async fn test_no_delivery_after_close() {
        let receiver = open_local().await;
        receiver.add_route(McamId(1), StreamFilter::Unfiltered);
        let mut rx = collect(&receiver);
        let socket = sender().await;
        let addr = receiver.endpoint().socket_addr();

        send(&socket, addr, meta(1, 0, ScaleMode::Hd), b"before", 1024).await;
        assert!(next(&mut rx).await.is_some());

        receiver.close().await;
        assert!(receiver.is_closed());

        // Sending to a closed port may fail; either way nothing arrives
        for seq in 1..3 {
            for datagram in fragment_frame(meta(1, seq, ScaleMode::Hd), &Bytes::from_static(b"after"), 1024) {
                let _ = socket.send_to(&datagram, addr).await;
            }
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        // The callback (and its sender) was dropped on close
        assert!(rx.recv().await.is_none());
        assert!(receiver.latest_frame(McamId(1)).is_none());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_releases_port() {
        let receiver = open_local().await;
        let port = receiver.port();

        receiver.close().await;
        receiver.close().await;

        let reopened = FrameReceiver::open_with_config(
            ReceiverConfig::with_port(port).bind_ip(Ipv4Addr::LOCALHOST.into()),
        )
        .await
        .unwrap();
        assert_eq!(reopened.port(), port);
        reopened.close().await;
    }

    #[tokio::test]
    async fn test_bind_error_on_port_in_use() {
        let receiver = open_local().await;

        let result = FrameReceiver::open_with_config(
            ReceiverConfig::with_port(receiver.port()).bind_ip(Ipv4Addr::LOCALHOST.into()),
        )
        .await;

        assert!(matches!(result, Err(Error::Bind { .. })));
        receiver.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_backpressure_drops_without_blocking() {
        let receiver = FrameReceiver::open_with_config(
            ReceiverConfig::default()
                .bind_ip(Ipv4Addr::LOCALHOST.into())
                .queue_depth(1),
        )
        .await
        .unwrap();
        receiver.add_route(McamId(1), StreamFilter::Unfiltered);

        let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
        let gate_rx = Mutex::new(gate_rx);
        let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();
        receiver.register_callback(move |meta, _| {
            let _ = seen_tx.send(meta.sequence);
            // Hold the first frame until the test releases it
            if meta.sequence == 0 {
                let _ = lock(&gate_rx).recv_timeout(Duration::from_secs(2));
            }
        });

        let socket = sender().await;
        let addr = receiver.endpoint().socket_addr();
        send(&socket, addr, meta(1, 0, ScaleMode::Hd), b"0", 1024).await;
        assert_eq!(tokio::time::timeout(Duration::from_secs(2), seen_rx.recv()).await.unwrap(), Some(0));

        for seq in 1..20 {
            send(&socket, addr, meta(1, seq, ScaleMode::Hd), b"n", 1024).await;
        }

        // The socket task keeps reading while the callback is stuck
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while receiver.stats().datagrams < 20 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let _ = gate_tx.send(());

        let stats = receiver.stats();
        assert_eq!(stats.datagrams, 20);
        assert!(stats.dropped_backpressure > 0);

        receiver.close().await;
    }
}
