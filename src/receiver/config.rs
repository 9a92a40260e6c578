//! Receiver configuration

use std::net::{IpAddr, Ipv4Addr};

use crate::protocol::constants::{DEFAULT_MAX_PENDING_FRAMES, DEFAULT_QUEUE_DEPTH, MAX_DATAGRAM_SIZE};

/// Frame receiver configuration options
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Local address to bind to
    pub bind_ip: IpAddr,

    /// UDP port to bind (0 = ephemeral)
    pub port: u16,

    /// Frames buffered between the socket and the callback
    pub queue_depth: usize,

    /// Partial frames kept per stream during reassembly
    pub max_pending_frames: usize,

    /// Drop frames whose stream has no route
    pub drop_unrouted: bool,

    /// Keep the most recent frame of each stream
    pub keep_latest: bool,

    /// Socket read buffer size
    pub read_buffer_size: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            drop_unrouted: true,
            keep_latest: true,
            read_buffer_size: MAX_DATAGRAM_SIZE,
        }
    }
}

impl ReceiverConfig {
    /// Create a config for the given port
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind_ip(mut self, ip: IpAddr) -> Self {
        self.bind_ip = ip;
        self
    }

    /// Set the port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the delivery queue depth (at least 1)
    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    /// Set the number of partial frames kept per stream
    pub fn max_pending_frames(mut self, max: usize) -> Self {
        self.max_pending_frames = max.max(1);
        self
    }

    /// Deliver frames from streams that have no route
    pub fn accept_unrouted(mut self) -> Self {
        self.drop_unrouted = false;
        self
    }

    /// Do not keep the latest frame per stream
    pub fn disable_latest(mut self) -> Self {
        self.keep_latest = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ReceiverConfig::default();

        assert_eq!(config.port, 0);
        assert_eq!(config.queue_depth, DEFAULT_QUEUE_DEPTH);
        assert_eq!(config.max_pending_frames, DEFAULT_MAX_PENDING_FRAMES);
        assert!(config.drop_unrouted);
        assert!(config.keep_latest);
        assert!(config.bind_ip.is_unspecified());
    }

    #[test]
    fn test_queue_depth_at_least_one() {
        let config = ReceiverConfig::default().queue_depth(0);
        assert_eq!(config.queue_depth, 1);
    }

    #[test]
    fn test_builder_chaining() {
        let config = ReceiverConfig::with_port(9002)
            .bind_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .queue_depth(4)
            .max_pending_frames(8)
            .accept_unrouted()
            .disable_latest();

        assert_eq!(config.port, 9002);
        assert_eq!(config.bind_ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.queue_depth, 4);
        assert_eq!(config.max_pending_frames, 8);
        assert!(!config.drop_unrouted);
        assert!(!config.keep_latest);
    }
}
