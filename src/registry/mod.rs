//! Camera registry
//!
//! Micro-cameras are tracked by identity rather than by discovery order.
//! Every connection reports the mcams its host serves; the registry keeps
//! one entry per mcam id and notifies the discovery callback once per
//! newly seen sensor.
//!
//! ```text
//!   CameraConnection(host A) ──┐
//!                              ├──► CameraRegistry ──► on_new_camera(&MicroCamera)
//!   CameraConnection(host B) ──┘      HashMap<McamId, MicroCamera>
//! ```

pub mod camera;
pub mod store;

pub use camera::{CameraId, McamId, MicroCamera};
pub use store::{CameraRegistry, DiscoveryCallback};
