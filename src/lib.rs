//! Frame receiving and stream control for multi-sensor camera rigs
//!
//! A camera rig is made of many micro-cameras (mcams), each one an
//! individually addressable sensor hosted by a camera host. Applications
//! connect to hosts over a TCP control channel, open UDP frame receivers,
//! and ask the hosts to stream selected mcams to those receivers.
//!
//! ```text
//!   McamClient
//!     ├── CameraRegistry        (mcams keyed by id, discovery callbacks)
//!     ├── CameraConnection(s)   (control channel, teardown handshake)
//!     ├── SubscriptionManager   (mcam -> endpoint + filter)
//!     └── FrameReceiver(s)      (UDP socket -> reassembly -> callback)
//! ```
//!
//! The [`host`] module contains a simulated camera host speaking the same
//! protocol, used by the demos and the test suite.

pub mod client;
pub mod connection;
pub mod error;
pub mod host;
pub mod media;
pub mod protocol;
pub mod receiver;
pub mod registry;
pub mod stats;
pub mod subscription;

pub use client::McamClient;
pub use connection::{CameraConnection, ConnectionConfig, ConnectionPhase, Teardown};
pub use error::{Error, ProtocolError, Result};
pub use host::{CameraHost, HostConfig, HostStream};
pub use media::{Frame, FrameMetadata, ScaleMode, StreamFilter};
pub use receiver::{FrameHandoff, FrameReceiver, ReceiverConfig, StreamEndpoint};
pub use registry::{CameraId, CameraRegistry, McamId, MicroCamera};
pub use stats::{ReceiverStats, StreamStats};
pub use subscription::{StreamControl, Subscription, SubscriptionManager, SubscriptionState};
