//! Camera identity types

use std::fmt;
use std::net::SocketAddr;

/// Identifier of a single micro-camera (sensor). Also the stream id
/// carried in every frame datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct McamId(pub u32);

/// Identifier of the camera rig a micro-camera belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CameraId(pub u32);

impl fmt::Display for McamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A discovered micro-camera
///
/// Callers hold these by value and pass them back into stream operations;
/// the registry is the authority on which host serves which mcam.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MicroCamera {
    /// Sensor id
    pub id: McamId,
    /// Rig the sensor belongs to
    pub camera_id: CameraId,
    /// Control address of the host serving this sensor
    pub host: SocketAddr,
}

impl MicroCamera {
    pub fn new(id: McamId, camera_id: CameraId, host: SocketAddr) -> Self {
        Self {
            id,
            camera_id,
            host,
        }
    }
}

impl fmt::Display for MicroCamera {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mcam {} (camera {} @ {})", self.id, self.camera_id, self.host)
    }
}
