//! Protocol constants

use std::time::Duration;

/// Magic number at the start of every frame datagram ("MCAM")
pub const FRAME_MAGIC: u32 = 0x4D43_414D;

/// Frame header version understood by this crate
pub const FRAME_VERSION: u8 = 1;

/// Size of the fixed frame datagram header
pub const FRAME_HEADER_SIZE: usize = 48;

/// Largest UDP payload over IPv4
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Largest fragment payload that fits a single datagram
pub const MAX_FRAGMENT_PAYLOAD: usize = MAX_DATAGRAM_SIZE - FRAME_HEADER_SIZE;

/// Default fragment payload used by hosts
pub const DEFAULT_FRAGMENT_PAYLOAD: usize = 60_000;

/// Default control port of a camera host
pub const DEFAULT_CONTROL_PORT: u16 = 9999;

/// Upper bound for a single control message (opcode + body)
pub const MAX_CONTROL_MESSAGE: usize = 64 * 1024;

/// Default frame queue depth of a receiver
pub const DEFAULT_QUEUE_DEPTH: usize = 16;

/// Default number of partially reassembled frames kept per stream
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 4;

/// Default connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for a single control request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// First retry delay while waiting for a teardown acknowledgement
pub const DEFAULT_TEARDOWN_BACKOFF: Duration = Duration::from_millis(25);

/// Number of Disconnect attempts before giving up on an acknowledgement
pub const DEFAULT_TEARDOWN_ATTEMPTS: u32 = 5;
