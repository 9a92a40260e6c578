//! Receiver endpoint

use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Network location a receiver is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamEndpoint {
    pub host: IpAddr,
    pub port: u16,
}

impl StreamEndpoint {
    pub fn new(host: IpAddr, port: u16) -> Self {
        Self { host, port }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl From<SocketAddr> for StreamEndpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl fmt::Display for StreamEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}
