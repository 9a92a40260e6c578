//! Stream subscriptions
//!
//! A subscription asks one host to stream one mcam to one receiver endpoint,
//! optionally narrowed by a [`StreamFilter`](crate::media::StreamFilter).

pub mod entry;
pub mod manager;

pub use entry::{StreamControl, Subscription, SubscriptionState};
pub use manager::SubscriptionManager;
