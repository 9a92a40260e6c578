//! Simulated camera host
//!
//! The server half of the control and frame protocols. It answers the same
//! requests a camera rig does, which makes it the counterpart for
//! integration tests and demos.
//!
//! ```no_run
//! use mcam_stream::{CameraHost, HostConfig};
//!
//! # async fn run() -> mcam_stream::Result<()> {
//! let host = CameraHost::bind(HostConfig::default().mcams([1, 2, 3])).await?;
//! println!("serving on {}", host.local_addr());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod listener;
mod session;
mod streamer;

pub use config::HostConfig;
pub use listener::CameraHost;
pub use streamer::HostStream;
