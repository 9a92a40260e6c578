//! Client façade
//!
//! High-level API tying connections, receivers, the camera registry and
//! subscriptions together. It keeps the cross-component invariants:
//! a stream is only started toward an open receiver, closing a receiver
//! first stops every stream bound to it, and losing a host forgets every
//! stream it served.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::connection::{CameraConnection, ConnectionConfig};
use crate::error::{Error, Result};
use crate::media::StreamFilter;
use crate::receiver::{FrameReceiver, ReceiverConfig, StreamEndpoint};
use crate::registry::{CameraRegistry, McamId, MicroCamera};
use crate::subscription::{Subscription, SubscriptionManager};

/// Client for one or more camera hosts
///
/// # Example
/// ```no_run
/// use mcam_stream::{McamClient, McamId, StreamFilter};
///
/// # async fn example() -> mcam_stream::Result<()> {
/// let client = McamClient::new();
/// client.on_new_camera(|mcam| println!("found {}", mcam)).await;
/// client.connect("127.0.0.1:9999".parse().unwrap()).await?;
///
/// let receiver = client.open_receiver(9002, 16).await?;
/// receiver.register_callback(|meta, payload| {
///     println!("mcam {} frame {} ({} bytes)", meta.mcam_id, meta.sequence, payload.len());
/// });
/// client.start_stream(McamId(1), 9002, StreamFilter::Unfiltered).await?;
/// # Ok(())
/// # }
/// ```
pub struct McamClient {
    config: ConnectionConfig,
    registry: Arc<CameraRegistry>,
    state: Arc<ClientState>,
}

/// State shared with the per-connection watch tasks
struct ClientState {
    connections: RwLock<HashMap<SocketAddr, Arc<CameraConnection>>>,
    receivers: RwLock<HashMap<u16, Arc<FrameReceiver>>>,
    subscriptions: SubscriptionManager,
}

impl ClientState {
    /// Drop `conn` and everything it served, unless it was already replaced
    async fn forget_connection(&self, conn: &Arc<CameraConnection>) {
        let addr = conn.addr();
        {
            let mut connections = self.connections.write().await;
            match connections.get(&addr) {
                Some(current) if Arc::ptr_eq(current, conn) => {
                    connections.remove(&addr);
                }
                _ => return,
            }
        }

        let released = self.subscriptions.release_host(addr);
        self.remove_routes(&released).await;
        tracing::info!(host = %addr, streams = released.len(), "Host connection lost");
    }

    async fn remove_routes(&self, released: &[Subscription]) {
        if released.is_empty() {
            return;
        }
        let receivers = self.receivers.read().await;
        for sub in released {
            if let Some(receiver) = receivers.get(&sub.endpoint.port) {
                receiver.remove_route(sub.mcam.id);
            }
        }
    }
}

impl McamClient {
    /// Create a client with default connection settings
    pub fn new() -> Self {
        Self::with_config(ConnectionConfig::default())
    }

    /// Create a client with custom connection settings
    pub fn with_config(config: ConnectionConfig) -> Self {
        Self {
            config,
            registry: Arc::new(CameraRegistry::new()),
            state: Arc::new(ClientState {
                connections: RwLock::new(HashMap::new()),
                receivers: RwLock::new(HashMap::new()),
                subscriptions: SubscriptionManager::new(),
            }),
        }
    }

    /// Camera registry shared by all connections
    pub fn registry(&self) -> &Arc<CameraRegistry> {
        &self.registry
    }

    // === Connections ===

    /// Connect to a camera host
    ///
    /// Connecting to a host that is already connected is a no-op.
    pub async fn connect(&self, addr: SocketAddr) -> Result<()> {
        if self.live_connection(addr).await.is_some() {
            tracing::debug!(host = %addr, "Already connected");
            return Ok(());
        }

        let conn = CameraConnection::connect(addr, self.config.clone(), Arc::clone(&self.registry)).await?;
        let conn = Arc::new(conn);
        self.state
            .connections
            .write()
            .await
            .insert(addr, Arc::clone(&conn));
        self.watch_connection(&conn);
        Ok(())
    }

    /// Forget the streams of `conn` once it closes without a disconnect
    fn watch_connection(&self, conn: &Arc<CameraConnection>) {
        let closed = conn.closed();
        let conn = Arc::downgrade(conn);
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            closed.await;
            if let Some(conn) = conn.upgrade() {
                state.forget_connection(&conn).await;
            }
        });
    }

    /// Disconnect from a camera host
    ///
    /// Waits until the host confirms that it stopped streaming. Disconnecting
    /// an unknown host is a no-op.
    pub async fn disconnect(&self, addr: SocketAddr) -> Result<()> {
        let conn = match self.state.connections.write().await.remove(&addr) {
            Some(conn) => conn,
            None => return Ok(()),
        };

        let released = self.state.subscriptions.release_host(addr);
        self.state.remove_routes(&released).await;

        let teardown = conn.disconnect().await;
        teardown.wait().await
    }

    /// Connection to `addr`, if any
    pub async fn connection(&self, addr: SocketAddr) -> Option<Arc<CameraConnection>> {
        self.state.connections.read().await.get(&addr).cloned()
    }

    /// Connection to `addr` if it can still carry requests
    ///
    /// A connection the host dropped is forgotten along with its streams.
    async fn live_connection(&self, addr: SocketAddr) -> Option<Arc<CameraConnection>> {
        let conn = self.connection(addr).await?;
        if conn.is_connected() {
            return Some(conn);
        }
        self.state.forget_connection(&conn).await;
        None
    }

    /// Check if `addr` is connected
    pub async fn is_connected(&self, addr: SocketAddr) -> bool {
        match self.connection(addr).await {
            Some(conn) => conn.is_connected(),
            None => false,
        }
    }

    // === Discovery ===

    /// Set the discovery callback
    ///
    /// Invoked once per newly discovered mcam; mcams already known are
    /// replayed immediately.
    pub async fn on_new_camera<F>(&self, callback: F)
    where
        F: Fn(&MicroCamera) + Send + Sync + 'static,
    {
        self.registry.set_callback(callback).await;
    }

    /// All known mcams ordered by id
    pub async fn cameras(&self) -> Vec<MicroCamera> {
        self.registry.list().await
    }

    // === Receivers ===

    /// Open a frame receiver on `port`
    ///
    /// Opening a port that already has a receiver returns that receiver.
    pub async fn open_receiver(&self, port: u16, queue_depth: usize) -> Result<Arc<FrameReceiver>> {
        if port != 0 {
            if let Some(existing) = self.receiver(port).await {
                return Ok(existing);
            }
        }
        self.open_receiver_with_config(ReceiverConfig::with_port(port).queue_depth(queue_depth))
            .await
    }

    /// Open a frame receiver with full configuration
    pub async fn open_receiver_with_config(&self, config: ReceiverConfig) -> Result<Arc<FrameReceiver>> {
        let receiver = Arc::new(FrameReceiver::open_with_config(config).await?);
        self.state
            .receivers
            .write()
            .await
            .insert(receiver.port(), Arc::clone(&receiver));
        Ok(receiver)
    }

    /// Receiver open on `port`, if any
    ///
    /// A receiver closed directly through its handle is forgotten here and
    /// its streams are stopped.
    pub async fn receiver(&self, port: u16) -> Option<Arc<FrameReceiver>> {
        let receiver = self.state.receivers.read().await.get(&port).cloned()?;
        if !receiver.is_closed() {
            return Some(receiver);
        }

        let removed = {
            let mut receivers = self.state.receivers.write().await;
            match receivers.get(&port) {
                Some(current) if Arc::ptr_eq(current, &receiver) => receivers.remove(&port).is_some(),
                _ => false,
            }
        };
        if removed {
            tracing::debug!(port, "Forgetting closed receiver");
            self.release_receiver(&receiver).await;
        }
        None
    }

    /// Whether `receiver` is still the open receiver on its port
    async fn holds_receiver(&self, receiver: &Arc<FrameReceiver>) -> bool {
        if receiver.is_closed() {
            return false;
        }
        match self.state.receivers.read().await.get(&receiver.port()) {
            Some(current) => Arc::ptr_eq(current, receiver),
            None => false,
        }
    }

    /// Endpoint of the receiver on `port`
    pub async fn endpoint(&self, port: u16) -> Option<StreamEndpoint> {
        self.receiver(port).await.map(|r| r.endpoint())
    }

    /// Stop every stream bound to the receiver on `port`, then close it
    ///
    /// Closing a port without a receiver is a no-op.
    pub async fn close_receiver(&self, port: u16) -> Result<()> {
        let receiver = match self.state.receivers.write().await.remove(&port) {
            Some(receiver) => receiver,
            None => return Ok(()),
        };

        self.release_receiver(&receiver).await;
        receiver.close().await;
        Ok(())
    }

    /// Stop every stream bound to `receiver` on its host
    async fn release_receiver(&self, receiver: &FrameReceiver) {
        let port = receiver.port();
        let released = self.state.subscriptions.release_endpoint(receiver.endpoint());
        for sub in &released {
            receiver.remove_route(sub.mcam.id);
            if let Some(conn) = self.live_connection(sub.mcam.host).await {
                if let Err(e) = conn.stop_stream(sub.mcam.id, port).await {
                    tracing::debug!(mcam = %sub.mcam.id, port, error = %e, "Stop on receiver close failed");
                }
            }
        }
    }

    // === Streams ===

    /// Stream `mcam` to the receiver on `port`
    pub async fn start_stream(&self, mcam: McamId, port: u16, filter: StreamFilter) -> Result<()> {
        let receiver = self.receiver(port).await.ok_or(Error::ReceiverNotOpen(port))?;
        let info = self.registry.get(mcam).await.ok_or(Error::UnknownCamera(mcam))?;
        let conn = self.live_connection(info.host).await.ok_or_else(|| Error::StreamStart {
            mcam,
            reason: format!("host {} not connected", info.host),
        })?;
        let endpoint = receiver.endpoint();

        let already = self.state.subscriptions.get(mcam);
        let existing_filter = match already {
            Some(ref sub) if sub.endpoint == endpoint && sub.is_streaming() => Some(sub.filter),
            _ => None,
        };

        match existing_filter {
            Some(previous) => {
                receiver.set_route_filter(mcam, filter);
                let result = self.state.subscriptions.start(&*conn, &info, endpoint, filter).await;
                if result.is_err() {
                    receiver.set_route_filter(mcam, previous);
                }
                result?;
            }
            None => {
                let had_route = receiver.route(mcam).is_some();
                receiver.add_route(mcam, filter);
                let result = self.state.subscriptions.start(&*conn, &info, endpoint, filter).await;
                if result.is_err() && !had_route {
                    receiver.remove_route(mcam);
                }
                result?;
            }
        }

        // The receiver or the host may have gone away while the start was in flight
        if !self.holds_receiver(&receiver).await {
            self.state.subscriptions.stop(&*conn, mcam, endpoint).await?;
            receiver.remove_route(mcam);
            tracing::debug!(mcam = %mcam, port, "Receiver closed during start, stream rolled back");
            return Err(Error::ReceiverNotOpen(port));
        }
        if !conn.is_connected() {
            self.state.subscriptions.stop(&*conn, mcam, endpoint).await?;
            receiver.remove_route(mcam);
            self.state.forget_connection(&conn).await;
            return Err(Error::StreamStart {
                mcam,
                reason: format!("host {} disconnected", info.host),
            });
        }
        Ok(())
    }

    /// Change the filter of an active stream
    ///
    /// The receiver drops frames outside the new filter from the moment
    /// this is called, whether or not the host honors it.
    pub async fn set_stream_filter(&self, mcam: McamId, port: u16, filter: StreamFilter) -> Result<()> {
        let receiver = self.receiver(port).await.ok_or(Error::ReceiverNotOpen(port))?;
        let endpoint = receiver.endpoint();

        let sub = self
            .state
            .subscriptions
            .get(mcam)
            .filter(|s| s.endpoint == endpoint && s.is_streaming())
            .ok_or(Error::NotStreaming { mcam, endpoint })?;
        let conn = self
            .live_connection(sub.mcam.host)
            .await
            .ok_or(Error::NotStreaming { mcam, endpoint })?;

        receiver.set_route_filter(mcam, filter);
        let result = self.state.subscriptions.set_filter(&*conn, mcam, endpoint, filter).await;
        match result {
            Ok(()) => Ok(()),
            Err(_) if !conn.is_connected() => {
                self.state.forget_connection(&conn).await;
                Err(Error::NotStreaming { mcam, endpoint })
            }
            Err(e) => {
                receiver.set_route_filter(mcam, sub.filter);
                Err(e)
            }
        }
    }

    /// Stop streaming `mcam` to the receiver on `port`
    ///
    /// Idempotent; succeeds when nothing is streaming.
    pub async fn stop_stream(&self, mcam: McamId, port: u16) -> Result<()> {
        let receiver = match self.receiver(port).await {
            Some(receiver) => receiver,
            None => return Ok(()),
        };
        let endpoint = receiver.endpoint();

        let sub = match self.state.subscriptions.get(mcam) {
            Some(sub) if sub.endpoint == endpoint => sub,
            _ => return Ok(()),
        };

        receiver.remove_route(mcam);

        match self.live_connection(sub.mcam.host).await {
            Some(conn) => self.state.subscriptions.stop(&*conn, mcam, endpoint).await,
            None => {
                self.state.subscriptions.release_host(sub.mcam.host);
                Ok(())
            }
        }
    }

    /// Current subscriptions ordered by mcam id
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.state.subscriptions.subscriptions()
    }

    /// Close every receiver and disconnect every host
    ///
    /// Returns the first teardown error, after attempting all of them.
    pub async fn shutdown(&self) -> Result<()> {
        let ports: Vec<u16> = self.state.receivers.read().await.keys().copied().collect();
        for port in ports {
            self.close_receiver(port).await?;
        }

        let hosts: Vec<SocketAddr> = self.state.connections.read().await.keys().copied().collect();
        let mut first_error = None;
        for host in hosts {
            if let Err(e) = self.disconnect(host).await {
                tracing::warn!(host = %host, error = %e, "Disconnect failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Default for McamClient {
    fn default() -> Self {
        Self::new()
    }
}
