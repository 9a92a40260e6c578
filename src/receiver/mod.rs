//! Frame receiver
//!
//! A receiver owns one UDP endpoint, demultiplexes incoming frame datagrams
//! by stream id, and delivers complete frames to a single callback.

pub mod config;
pub mod endpoint;
pub mod handoff;
#[allow(clippy::module_inception)]
pub mod receiver;

pub use config::ReceiverConfig;
pub use endpoint::StreamEndpoint;
pub use handoff::FrameHandoff;
pub use receiver::{FrameCallback, FrameReceiver};
