//! Camera host configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::protocol::constants::*;
use crate::registry::{CameraId, McamId};

/// Simulated camera host options
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Control listener address
    pub bind_addr: SocketAddr,

    /// Rig id reported in the handshake
    pub camera_id: CameraId,

    /// Mcams online at startup
    pub mcams: Vec<McamId>,

    /// Maximum concurrent control connections (0 = unlimited)
    pub max_connections: usize,

    /// Enable TCP_NODELAY on control connections
    pub tcp_nodelay: bool,

    /// Payload bytes per frame datagram; larger frames are fragmented
    pub max_datagram_payload: usize,

    /// Emit synthetic frames on every stream at this interval
    pub frame_interval: Option<Duration>,

    /// Payload size of synthetic frames
    pub synthetic_frame_size: usize,

    /// Drop frames outside a stream's filter before sending
    pub apply_filters: bool,

    /// Delay between stopping a client's streams and confirming its teardown
    pub teardown_delay: Duration,

    /// Send `TeardownComplete` on Disconnect
    pub ack_teardown: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_CONTROL_PORT)),
            camera_id: CameraId(1),
            mcams: Vec::new(),
            max_connections: 0, // Unlimited
            tcp_nodelay: true,
            max_datagram_payload: DEFAULT_FRAGMENT_PAYLOAD,
            frame_interval: None,
            synthetic_frame_size: 4 * 1024,
            apply_filters: true,
            teardown_delay: Duration::ZERO,
            ack_teardown: true,
        }
    }
}

impl HostConfig {
    /// Create a config with a custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Listen on an ephemeral localhost port
    pub fn ephemeral() -> Self {
        Self::with_addr(SocketAddr::from(([127, 0, 0, 1], 0)))
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the rig id
    pub fn camera_id(mut self, id: u32) -> Self {
        self.camera_id = CameraId(id);
        self
    }

    /// Set the mcams online at startup
    pub fn mcams<I: IntoIterator<Item = u32>>(mut self, ids: I) -> Self {
        self.mcams = ids.into_iter().map(McamId).collect();
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the datagram payload size
    pub fn max_datagram_payload(mut self, size: usize) -> Self {
        self.max_datagram_payload = size.clamp(1, MAX_FRAGMENT_PAYLOAD);
        self
    }

    /// Generate synthetic frames every `interval`
    pub fn frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval);
        self
    }

    /// Set the synthetic frame payload size
    pub fn synthetic_frame_size(mut self, size: usize) -> Self {
        self.synthetic_frame_size = size;
        self
    }

    /// Send every frame regardless of stream filters
    pub fn ignore_filters(mut self) -> Self {
        self.apply_filters = false;
        self
    }

    /// Delay teardown confirmation
    pub fn teardown_delay(mut self, delay: Duration) -> Self {
        self.teardown_delay = delay;
        self
    }

    /// Never confirm teardown
    pub fn disable_teardown_ack(mut self) -> Self {
        self.ack_teardown = false;
        self
    }
}
