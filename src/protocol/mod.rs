//! Wire protocol
//!
//! - `frame_header`: UDP frame datagrams (fixed header + payload fragment)
//! - `control`: TCP control messages between clients and camera hosts

pub mod constants;
pub mod control;
pub mod frame_header;

pub use control::{read_message, write_message, ControlMessage, RejectCode};
pub use frame_header::{fragment_frame, parse_datagram, FrameHeader};
