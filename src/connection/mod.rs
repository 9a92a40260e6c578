//! Connection lifecycle
//!
//! Manages control connections to camera hosts, including the
//! acknowledged teardown that replaces a fixed settling delay before local
//! receivers are closed.

pub mod config;
#[allow(clippy::module_inception)]
pub mod connection;
pub mod state;
pub mod teardown;

pub use config::ConnectionConfig;
pub use connection::CameraConnection;
pub use state::{ConnectionPhase, ConnectionState};
pub use teardown::Teardown;
