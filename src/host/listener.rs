//! Simulated camera host
//!
//! Accepts control connections, serves a set of mcams and streams their
//! frames over UDP. Tests and demos run clients against it.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{broadcast, watch, RwLock, Semaphore};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::media::ScaleMode;
use crate::protocol::{read_message, write_message, ControlMessage, RejectCode};
use crate::registry::{CameraId, McamId};

use super::config::HostConfig;
use super::session::Session;
use super::streamer::{HostStream, Streamer};

const ANNOUNCE_CAPACITY: usize = 64;
const REJECT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// State shared by the host handle, the accept loop and every session
pub(super) struct HostShared {
    pub(super) config: HostConfig,
    pub(super) streamer: Streamer,
    pub(super) announce: broadcast::Sender<McamId>,
    mcams: RwLock<Vec<McamId>>,
    active_sessions: AtomicUsize,
}

impl HostShared {
    pub(super) async fn mcams(&self) -> Vec<McamId> {
        self.mcams.read().await.clone()
    }

    pub(super) async fn serves(&self, mcam: McamId) -> bool {
        self.mcams.read().await.contains(&mcam)
    }
}

/// A camera host serving mcams on localhost
pub struct CameraHost {
    shared: Arc<HostShared>,
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CameraHost {
    /// Bind the control listener and frame socket and start serving
    pub async fn bind(config: HostConfig) -> Result<Self> {
        let port = config.bind_addr.port();
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|source| Error::Bind { port, source })?;
        let local_addr = listener.local_addr()?;

        let socket = UdpSocket::bind((config.bind_addr.ip(), 0))
            .await
            .map_err(|source| Error::Bind { port: 0, source })?;

        let (announce, _) = broadcast::channel(ANNOUNCE_CAPACITY);
        let shared = Arc::new(HostShared {
            streamer: Streamer::new(socket, config.max_datagram_payload, config.apply_filters),
            announce,
            mcams: RwLock::new(config.mcams.clone()),
            active_sessions: AtomicUsize::new(0),
            config,
        });

        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut tasks = vec![tokio::spawn(accept_loop(
            listener,
            Arc::clone(&shared),
            shutdown_rx.clone(),
        ))];

        if let Some(interval) = shared.config.frame_interval {
            tasks.push(tokio::spawn(generate_frames(
                Arc::clone(&shared),
                interval,
                shutdown_rx,
            )));
        }

        tracing::info!(
            addr = %local_addr,
            camera = %shared.config.camera_id,
            mcams = shared.config.mcams.len(),
            "Camera host listening"
        );

        Ok(Self {
            shared,
            local_addr,
            shutdown,
            tasks: Mutex::new(tasks),
        })
    }

    /// Bound control address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Rig id reported to clients
    pub fn camera_id(&self) -> CameraId {
        self.shared.config.camera_id
    }

    /// Mcams currently online
    pub async fn mcams(&self) -> Vec<McamId> {
        self.shared.mcams().await
    }

    /// Active streams ordered by mcam id
    pub async fn streams(&self) -> Vec<HostStream> {
        self.shared.streamer.streams().await
    }

    /// Number of connected clients
    pub fn session_count(&self) -> usize {
        self.shared.active_sessions.load(Ordering::Relaxed)
    }

    /// Send one frame of `mcam` to its stream
    ///
    /// Returns the number of datagrams sent: zero when the mcam is not
    /// streaming or the stream's filter excludes `scale_mode`.
    pub async fn emit_frame(
        &self,
        mcam: McamId,
        scale_mode: ScaleMode,
        payload: impl Into<Bytes>,
    ) -> Result<usize> {
        if !self.shared.serves(mcam).await {
            return Err(Error::UnknownCamera(mcam));
        }
        let payload = payload.into();
        self.shared.streamer.emit(mcam, scale_mode, &payload).await
    }

    /// Bring a new mcam online and announce it to connected clients
    ///
    /// Returns `false` if the mcam was already online.
    pub async fn announce_mcam(&self, mcam: McamId) -> bool {
        {
            let mut mcams = self.shared.mcams.write().await;
            if mcams.contains(&mcam) {
                return false;
            }
            mcams.push(mcam);
        }

        tracing::info!(mcam = %mcam, "Mcam online");
        // No receivers just means no client is connected
        let _ = self.shared.announce.send(mcam);
        true
    }

    /// Stop accepting, close every session and stop all streams
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);

        let tasks: Vec<JoinHandle<()>> = lock(&self.tasks).drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        self.shared.streamer.clear().await;
        tracing::info!(addr = %self.local_addr, "Camera host stopped");
    }
}

impl Drop for CameraHost {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<HostShared>, mut shutdown: watch::Receiver<bool>) {
    let semaphore = match shared.config.max_connections {
        0 => None,
        max => Some(Arc::new(Semaphore::new(max))),
    };
    let next_session_id = AtomicU64::new(1);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::debug!("Accept loop stopped");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    let session_id = next_session_id.fetch_add(1, Ordering::Relaxed);
                    handle_connection(
                        session_id,
                        socket,
                        peer,
                        &shared,
                        semaphore.as_ref(),
                        shutdown.clone(),
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

fn handle_connection(
    session_id: u64,
    socket: TcpStream,
    peer: SocketAddr,
    shared: &Arc<HostShared>,
    semaphore: Option<&Arc<Semaphore>>,
    shutdown: watch::Receiver<bool>,
) {
    let permit = match semaphore.map(|sem| Arc::clone(sem).try_acquire_owned()) {
        None => None,
        Some(Ok(permit)) => Some(permit),
        Some(Err(_)) => {
            tracing::warn!(peer = %peer, "Connection rejected: limit reached");
            tokio::spawn(reject(socket));
            return;
        }
    };

    if shared.config.tcp_nodelay {
        if let Err(e) = socket.set_nodelay(true) {
            tracing::error!(error = %e, "Failed to configure socket");
            return;
        }
    }

    tracing::debug!(session_id, peer = %peer, "New connection");

    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        shared.active_sessions.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = Session::run(session_id, socket, peer, Arc::clone(&shared), shutdown).await {
            tracing::debug!(session_id, error = %e, "Session error");
        }

        // Free the slot before the session stops being counted
        drop(permit);
        shared.active_sessions.fetch_sub(1, Ordering::Relaxed);
        tracing::debug!(session_id, "Connection closed");
    });
}

async fn reject(mut socket: TcpStream) {
    // Consume the Hello first so closing does not reset the connection
    let _ = tokio::time::timeout(REJECT_READ_TIMEOUT, read_message(&mut socket)).await;

    let msg = ControlMessage::Nack {
        request_id: 0,
        code: RejectCode::BadRequest,
        message: "connection limit reached".into(),
    };
    let _ = write_message(&mut socket, &msg).await;
}

async fn generate_frames(
    shared: Arc<HostShared>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    let payload = synthetic_payload(shared.config.synthetic_frame_size);
    let mut tick: u64 = 0;

    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = ticker.tick() => {}
        }

        // Alternate resolution classes so filters have something to drop
        let scale_mode = if tick % 2 == 0 {
            ScaleMode::FourK
        } else {
            ScaleMode::Hd
        };
        tick += 1;

        for mcam in shared.mcams().await {
            if let Err(e) = shared.streamer.emit(mcam, scale_mode, &payload).await {
                tracing::debug!(mcam = %mcam, error = %e, "Synthetic frame not sent");
            }
        }
    }
}

fn synthetic_payload(size: usize) -> Bytes {
    // JPEG SOI/EOI around a byte ramp
    let mut data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    if size >= 4 {
        data[..2].copy_from_slice(&[0xFF, 0xD8]);
        data[size - 2..].copy_from_slice(&[0xFF, 0xD9]);
    }
    Bytes::from(data)
}
