//! Subscription entry types

use std::future::Future;
use std::time::Instant;

use crate::connection::CameraConnection;
use crate::error::Result;
use crate::media::StreamFilter;
use crate::receiver::StreamEndpoint;
use crate::registry::{McamId, MicroCamera};

/// State of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Start request sent, not yet acknowledged
    Starting,
    /// Host is streaming to the endpoint
    Streaming,
}

/// An mcam streaming to a receiver endpoint
#[derive(Debug, Clone)]
pub struct Subscription {
    /// Streamed sensor
    pub mcam: MicroCamera,
    /// Receiver the frames are sent to
    pub endpoint: StreamEndpoint,
    /// Current filter
    pub filter: StreamFilter,
    /// Current state
    pub state: SubscriptionState,
    /// When the subscription was created
    pub created_at: Instant,
}

impl Subscription {
    pub(super) fn starting(mcam: MicroCamera, endpoint: StreamEndpoint) -> Self {
        Self {
            mcam,
            endpoint,
            filter: StreamFilter::Unfiltered,
            state: SubscriptionState::Starting,
            created_at: Instant::now(),
        }
    }

    /// Check if the host is streaming
    pub fn is_streaming(&self) -> bool {
        self.state == SubscriptionState::Streaming
    }
}

/// Stream control requests a host understands
///
/// Implemented by [`CameraConnection`]; the subscription manager only
/// talks to hosts through this trait.
pub trait StreamControl: Send + Sync {
    fn start_stream(&self, mcam: McamId, port: u16) -> impl Future<Output = Result<()>> + Send;

    fn stop_stream(&self, mcam: McamId, port: u16) -> impl Future<Output = Result<()>> + Send;

    fn set_filter(
        &self,
        mcam: McamId,
        port: u16,
        filter: StreamFilter,
    ) -> impl Future<Output = Result<()>> + Send;
}

impl StreamControl for CameraConnection {
    async fn start_stream(&self, mcam: McamId, port: u16) -> Result<()> {
        CameraConnection::start_stream(self, mcam, port).await
    }

    async fn stop_stream(&self, mcam: McamId, port: u16) -> Result<()> {
        CameraConnection::stop_stream(self, mcam, port).await
    }

    async fn set_filter(&self, mcam: McamId, port: u16, filter: StreamFilter) -> Result<()> {
        CameraConnection::set_filter(self, mcam, port, filter).await
    }
}
