//! Client API
//!
//! [`McamClient`] is the entry point for applications: connect to camera
//! hosts, open receivers, and start, filter and stop mcam streams.

pub mod mcam_client;

pub use mcam_client::McamClient;
