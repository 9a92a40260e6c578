//! Connection state machine
//!
//! Tracks a control connection from the first connect attempt to the
//! acknowledged teardown.
//!
//! ```text
//! Disconnected ──► Connecting ──► Connected ──► Disconnecting ──► Disconnected
//!       ▲               │
//!       └───────────────┘ (refused / timed out)
//! ```

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::registry::{CameraId, McamId};

/// Connection lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// No control connection
    Disconnected,
    /// TCP connect or handshake in progress
    Connecting,
    /// Handshake complete, requests allowed
    Connected,
    /// Disconnect sent, waiting for the host to confirm teardown
    Disconnecting,
}

/// Complete connection state
#[derive(Debug)]
pub struct ConnectionState {
    /// Host control address
    pub addr: SocketAddr,

    /// Current phase
    pub phase: ConnectionPhase,

    /// Time the handshake completed
    pub connected_at: Option<Instant>,

    /// Time the disconnect was sent
    pub disconnect_started_at: Option<Instant>,

    /// Rig id reported by the host
    pub camera_id: Option<CameraId>,

    /// Mcams reported by the host (handshake and later announcements)
    pub mcams: Vec<McamId>,
}

impl ConnectionState {
    /// Create a new, disconnected state
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            phase: ConnectionPhase::Disconnected,
            connected_at: None,
            disconnect_started_at: None,
            camera_id: None,
            mcams: Vec::new(),
        }
    }

    /// Start connecting
    pub fn begin_connect(&mut self) -> bool {
        if self.phase != ConnectionPhase::Disconnected {
            return false;
        }
        self.phase = ConnectionPhase::Connecting;
        true
    }

    /// Handshake finished
    pub fn complete_connect(&mut self, camera_id: CameraId, mcams: Vec<McamId>) -> bool {
        if self.phase != ConnectionPhase::Connecting {
            return false;
        }
        self.phase = ConnectionPhase::Connected;
        self.connected_at = Some(Instant::now());
        self.camera_id = Some(camera_id);
        self.mcams = mcams;
        true
    }

    /// Connect attempt failed
    pub fn fail_connect(&mut self) {
        if self.phase == ConnectionPhase::Connecting {
            self.phase = ConnectionPhase::Disconnected;
        }
    }

    /// Record an mcam announced after the handshake
    pub fn add_mcam(&mut self, mcam: McamId) {
        if !self.mcams.contains(&mcam) {
            self.mcams.push(mcam);
        }
    }

    /// Disconnect sent
    pub fn begin_disconnect(&mut self) -> bool {
        if self.phase != ConnectionPhase::Connected {
            return false;
        }
        self.phase = ConnectionPhase::Disconnecting;
        self.disconnect_started_at = Some(Instant::now());
        true
    }

    /// Teardown confirmed, or the connection was lost
    pub fn complete_disconnect(&mut self) {
        self.phase = ConnectionPhase::Disconnected;
    }

    /// Check if requests may be sent
    pub fn is_connected(&self) -> bool {
        self.phase == ConnectionPhase::Connected
    }

    /// Time since the handshake completed
    pub fn uptime(&self) -> Option<Duration> {
        self.connected_at.map(|t| t.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:9999".parse().unwrap()
    }

    #[test]
    fn test_connection_lifecycle() {
        let mut state = ConnectionState::new(addr());
        assert_eq!(state.phase, ConnectionPhase::Disconnected);

        assert!(state.begin_connect());
        assert_eq!(state.phase, ConnectionPhase::Connecting);

        assert!(state.complete_connect(CameraId(1), vec![McamId(1), McamId(2)]));
        assert!(state.is_connected());
        assert!(state.connected_at.is_some());

        assert!(state.begin_disconnect());
        assert_eq!(state.phase, ConnectionPhase::Disconnecting);
        assert!(!state.is_connected());

        state.complete_disconnect();
        assert_eq!(state.phase, ConnectionPhase::Disconnected);
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let mut state = ConnectionState::new(addr());

        assert!(!state.complete_connect(CameraId(1), vec![]));
        assert!(!state.begin_disconnect());

        state.begin_connect();
        assert!(!state.begin_connect());
        assert!(!state.begin_disconnect());
    }

    #[test]
    fn test_failed_connect_returns_to_disconnected() {
        let mut state = ConnectionState::new(addr());
        state.begin_connect();
        state.fail_connect();

        assert_eq!(state.phase, ConnectionPhase::Disconnected);
        assert!(state.begin_connect());
    }

    #[test]
    fn test_announced_mcams_deduplicated() {
        let mut state = ConnectionState::new(addr());
        state.add_mcam(McamId(4));
        state.add_mcam(McamId(4));
        assert_eq!(state.mcams, vec![McamId(4)]);
    }
}
