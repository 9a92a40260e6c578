//! Control connection to a camera host
//!
//! One TCP connection per host. After the Hello/HostInfo handshake a reader
//! task owns the read half: it resolves pending requests by request id,
//! feeds announced mcams into the registry, and raises the teardown signal
//! when the host confirms a disconnect or closes the connection.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::{Error, ProtocolError, Result};
use crate::media::StreamFilter;
use crate::protocol::{read_message, write_message, ControlMessage};
use crate::registry::{CameraId, CameraRegistry, McamId, MicroCamera};

use super::config::ConnectionConfig;
use super::state::{ConnectionPhase, ConnectionState};
use super::teardown::Teardown;

type PendingMap = Arc<Mutex<HashMap<u32, oneshot::Sender<ControlMessage>>>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Live control connection to one camera host
pub struct CameraConnection {
    addr: SocketAddr,
    config: ConnectionConfig,
    camera_id: CameraId,
    writer: Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
    pending: PendingMap,
    next_request_id: AtomicU32,
    state: Arc<Mutex<ConnectionState>>,
    teardown_rx: watch::Receiver<bool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl CameraConnection {
    /// Connect to a host and complete the handshake
    ///
    /// Mcams reported by the host are added to `registry`, which notifies
    /// its discovery callback for each one not seen before.
    pub async fn connect(
        addr: SocketAddr,
        config: ConnectionConfig,
        registry: Arc<CameraRegistry>,
    ) -> Result<Self> {
        let mut state = ConnectionState::new(addr);
        state.begin_connect();

        tracing::debug!(host = %addr, "Connecting");

        let handshake = tokio::time::timeout(config.connect_timeout, handshake(addr, &config)).await;
        let (reader, writer, camera_id, mcams) = match handshake {
            Ok(Ok(parts)) => parts,
            Ok(Err(e)) => {
                state.fail_connect();
                return Err(Error::Connect {
                    addr,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                state.fail_connect();
                return Err(Error::Connect {
                    addr,
                    reason: format!("timed out after {:?}", config.connect_timeout),
                });
            }
        };

        state.complete_connect(camera_id, mcams.clone());
        tracing::info!(host = %addr, camera = %camera_id, mcams = mcams.len(), "Connected");

        for mcam in mcams {
            registry
                .discover(MicroCamera::new(mcam, camera_id, addr))
                .await;
        }

        let state = Arc::new(Mutex::new(state));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (teardown_tx, teardown_rx) = watch::channel(false);

        let reader = tokio::spawn(reader_loop(
            addr,
            camera_id,
            reader,
            Arc::clone(&pending),
            Arc::clone(&state),
            registry,
            teardown_tx,
        ));

        Ok(Self {
            addr,
            config,
            camera_id,
            writer: Arc::new(tokio::sync::Mutex::new(writer)),
            pending,
            next_request_id: AtomicU32::new(1),
            state,
            teardown_rx,
            reader: Mutex::new(Some(reader)),
        })
    }

    /// Host control address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Rig id reported by the host
    pub fn camera_id(&self) -> CameraId {
        self.camera_id
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> ConnectionPhase {
        lock(&self.state).phase
    }

    /// Check if requests may be sent
    pub fn is_connected(&self) -> bool {
        lock(&self.state).is_connected()
    }

    /// Mcams this host has reported
    pub fn mcams(&self) -> Vec<McamId> {
        lock(&self.state).mcams.clone()
    }

    /// Resolves once the connection is gone
    ///
    /// That is after a confirmed teardown, when the host closes the
    /// connection, or when this handle is dropped.
    pub fn closed(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut signal = self.teardown_rx.clone();
        async move {
            let _ = signal.wait_for(|gone| *gone).await;
        }
    }

    /// Ask the host to stream `mcam` to `port` on this client's address
    pub async fn start_stream(&self, mcam: McamId, port: u16) -> Result<()> {
        let request_id = self.next_id();
        self.expect_ack(ControlMessage::StartStream {
            request_id,
            mcam_id: mcam,
            port,
        })
        .await
    }

    /// Ask the host to stop streaming `mcam` to `port`
    pub async fn stop_stream(&self, mcam: McamId, port: u16) -> Result<()> {
        let request_id = self.next_id();
        self.expect_ack(ControlMessage::StopStream {
            request_id,
            mcam_id: mcam,
            port,
        })
        .await
    }

    /// Change the filter of the stream of `mcam` to `port`
    pub async fn set_filter(&self, mcam: McamId, port: u16, filter: StreamFilter) -> Result<()> {
        let request_id = self.next_id();
        self.expect_ack(ControlMessage::SetFilter {
            request_id,
            mcam_id: mcam,
            port,
            filter,
        })
        .await
    }

    /// Begin disconnecting
    ///
    /// Returns as soon as the request is sent; await [`Teardown::wait`] for
    /// the host's confirmation. Calling it again while a teardown is in
    /// progress or complete returns another handle to the same teardown.
    pub async fn disconnect(&self) -> Teardown {
        let started = lock(&self.state).begin_disconnect();

        if started {
            tracing::info!(host = %self.addr, "Disconnecting");
            let mut writer = self.writer.lock().await;
            if let Err(e) = write_message(&mut *writer, &ControlMessage::Disconnect).await {
                tracing::debug!(host = %self.addr, error = %e, "Disconnect write failed");
            }
        }

        Teardown {
            addr: self.addr,
            writer: Arc::clone(&self.writer),
            confirmed: self.teardown_rx.clone(),
            state: Arc::clone(&self.state),
            initial_backoff: self.config.teardown_initial_backoff,
            max_attempts: self.config.teardown_max_attempts,
        }
    }

    fn next_id(&self) -> u32 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn expect_ack(&self, msg: ControlMessage) -> Result<()> {
        match self.request(msg).await? {
            ControlMessage::Ack { .. } => Ok(()),
            ControlMessage::Nack { code, message, .. } => Err(Error::Rejected { code, message }),
            other => Err(ProtocolError::UnexpectedMessage(other.name()).into()),
        }
    }

    async fn request(&self, msg: ControlMessage) -> Result<ControlMessage> {
        if !self.is_connected() {
            return Err(Error::NotConnected(self.addr));
        }

        let request_id = msg.request_id().unwrap_or_default();
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(request_id, tx);

        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = write_message(&mut *writer, &msg).await {
                lock(&self.pending).remove(&request_id);
                tracing::debug!(host = %self.addr, request = msg.name(), error = %e, "Request write failed");
                return Err(Error::NotConnected(self.addr));
            }
        }

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(Error::NotConnected(self.addr)),
            Err(_) => {
                lock(&self.pending).remove(&request_id);
                Err(Error::Timeout(msg.name()))
            }
        }
    }
}

impl Drop for CameraConnection {
    fn drop(&mut self) {
        if let Some(reader) = lock(&self.reader).take() {
            reader.abort();
        }
    }
}

async fn handshake(
    addr: SocketAddr,
    config: &ConnectionConfig,
) -> Result<(OwnedReadHalf, OwnedWriteHalf, CameraId, Vec<McamId>)> {
    let socket = TcpStream::connect(addr).await?;
    if config.tcp_nodelay {
        socket.set_nodelay(true)?;
    }
    let (mut reader, mut writer) = socket.into_split();

    write_message(
        &mut writer,
        &ControlMessage::Hello {
            request_id: 0,
            client_name: config.client_name.clone(),
        },
    )
    .await?;

    match read_message(&mut reader).await? {
        Some(ControlMessage::HostInfo {
            request_id: 0,
            camera_id,
            mcams,
        }) => Ok((reader, writer, camera_id, mcams)),
        Some(ControlMessage::Nack { code, message, .. }) => Err(Error::Rejected { code, message }),
        Some(other) => Err(ProtocolError::UnexpectedMessage(other.name()).into()),
        None => Err(ProtocolError::UnexpectedMessage("connection closed during handshake").into()),
    }
}

async fn reader_loop(
    addr: SocketAddr,
    camera_id: CameraId,
    mut reader: OwnedReadHalf,
    pending: PendingMap,
    state: Arc<Mutex<ConnectionState>>,
    registry: Arc<CameraRegistry>,
    teardown: watch::Sender<bool>,
) {
    loop {
        let msg = match read_message(&mut reader).await {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                tracing::debug!(host = %addr, "Host closed control connection");
                break;
            }
            Err(e) => {
                tracing::warn!(host = %addr, error = %e, "Control connection failed");
                break;
            }
        };

        match msg {
            ControlMessage::Ack { request_id }
            | ControlMessage::Nack { request_id, .. }
            | ControlMessage::HostInfo { request_id, .. } => {
                match lock(&pending).remove(&request_id) {
                    Some(tx) => {
                        let _ = tx.send(msg);
                    }
                    None => {
                        tracing::debug!(host = %addr, request_id, "Response for unknown request");
                    }
                }
            }
            ControlMessage::McamAnnounce { mcam_id } => {
                lock(&state).add_mcam(mcam_id);
                registry
                    .discover(MicroCamera::new(mcam_id, camera_id, addr))
                    .await;
            }
            ControlMessage::TeardownComplete => {
                tracing::debug!(host = %addr, "Teardown acknowledged");
                let _ = teardown.send(true);
            }
            other => {
                tracing::warn!(host = %addr, message = other.name(), "Unexpected control message");
            }
        }
    }

    // Connection gone: nothing else can be in flight from this host
    lock(&state).complete_disconnect();
    lock(&pending).clear();
    let _ = teardown.send(true);
}
