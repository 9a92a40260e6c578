//! Frame types and reassembly
//!
//! This module provides:
//! - Frame and metadata types shared by receivers and hosts
//! - Resolution classes and stream filters
//! - Reassembly of frames split across several datagrams

pub mod frame;
pub mod reassembly;

pub use frame::{Frame, FrameMetadata, ScaleMode, StreamFilter};
pub use reassembly::Reassembler;
