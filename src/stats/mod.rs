//! Receiver and stream statistics

pub mod metrics;

pub use metrics::{ReceiverStats, StreamStats};
