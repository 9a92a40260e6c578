//! Stream subscription manager
//!
//! Tracks which mcam streams to which receiver endpoint. An mcam streams to
//! at most one endpoint at a time. Failed operations leave no trace: a start
//! that the host rejects removes its reservation, and a filter that cannot
//! be applied after a start rolls the start back.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};
use crate::media::StreamFilter;
use crate::protocol::RejectCode;
use crate::receiver::StreamEndpoint;
use crate::registry::{McamId, MicroCamera};

use super::entry::{StreamControl, Subscription, SubscriptionState};

/// Registry of active subscriptions
pub struct SubscriptionManager {
    subscriptions: Mutex<HashMap<McamId, Subscription>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self {
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<McamId, Subscription>> {
        self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start streaming `mcam` to `endpoint`
    ///
    /// Starting an identical active subscription is a no-op; starting one
    /// with a different filter only changes the filter.
    pub async fn start<C: StreamControl>(
        &self,
        control: &C,
        mcam: &MicroCamera,
        endpoint: StreamEndpoint,
        filter: StreamFilter,
    ) -> Result<()> {
        let existing = {
            let mut subs = self.lock();
            match subs.get(&mcam.id) {
                Some(sub) if sub.endpoint != endpoint => {
                    return Err(Error::StreamStart {
                        mcam: mcam.id,
                        reason: format!("already streaming to {}", sub.endpoint),
                    });
                }
                Some(sub) if sub.state == SubscriptionState::Starting => {
                    return Err(Error::StreamStart {
                        mcam: mcam.id,
                        reason: "start already in progress".into(),
                    });
                }
                Some(sub) => Some(sub.filter),
                None => {
                    subs.insert(mcam.id, Subscription::starting(mcam.clone(), endpoint));
                    None
                }
            }
        };

        if let Some(current) = existing {
            if current == filter {
                return Ok(());
            }
            return self.set_filter(control, mcam.id, endpoint, filter).await;
        }

        if let Err(e) = control.start_stream(mcam.id, endpoint.port).await {
            self.lock().remove(&mcam.id);
            tracing::warn!(mcam = %mcam.id, endpoint = %endpoint, error = %e, "Stream start failed");
            return Err(start_error(mcam.id, e));
        }

        if filter != StreamFilter::Unfiltered {
            if let Err(e) = control.set_filter(mcam.id, endpoint.port, filter).await {
                self.lock().remove(&mcam.id);
                let _ = control.stop_stream(mcam.id, endpoint.port).await;
                tracing::warn!(mcam = %mcam.id, endpoint = %endpoint, error = %e, "Initial filter failed, stream rolled back");
                return Err(start_error(mcam.id, e));
            }
        }

        let still_wanted = match self.lock().get_mut(&mcam.id) {
            Some(sub) if sub.endpoint == endpoint => {
                sub.filter = filter;
                sub.state = SubscriptionState::Streaming;
                true
            }
            _ => false,
        };

        if !still_wanted {
            // Stopped while the start was in flight
            let _ = control.stop_stream(mcam.id, endpoint.port).await;
            return Ok(());
        }

        tracing::info!(mcam = %mcam.id, endpoint = %endpoint, ?filter, "Stream started");
        Ok(())
    }

    /// Narrow the classes of frames sent for an active subscription
    pub async fn set_filter<C: StreamControl>(
        &self,
        control: &C,
        mcam: McamId,
        endpoint: StreamEndpoint,
        filter: StreamFilter,
    ) -> Result<()> {
        let streaming = self
            .lock()
            .get(&mcam)
            .map(|sub| sub.endpoint == endpoint && sub.is_streaming())
            .unwrap_or(false);

        if !streaming {
            return Err(Error::NotStreaming { mcam, endpoint });
        }

        match control.set_filter(mcam, endpoint.port, filter).await {
            Ok(()) => {}
            Err(Error::Rejected {
                code: RejectCode::NotStreaming,
                ..
            }) => return Err(Error::NotStreaming { mcam, endpoint }),
            Err(e) => return Err(e),
        }

        if let Some(sub) = self.lock().get_mut(&mcam) {
            if sub.endpoint == endpoint {
                sub.filter = filter;
            }
        }

        tracing::info!(mcam = %mcam, endpoint = %endpoint, ?filter, "Stream filter set");
        Ok(())
    }

    /// Stop streaming `mcam` to `endpoint`
    ///
    /// Idempotent: stopping an unknown or already stopped subscription
    /// succeeds. Local state is cleared even when the host cannot be
    /// reached.
    pub async fn stop<C: StreamControl>(
        &self,
        control: &C,
        mcam: McamId,
        endpoint: StreamEndpoint,
    ) -> Result<()> {
        let removed = {
            let mut subs = self.lock();
            match subs.get(&mcam) {
                Some(sub) if sub.endpoint == endpoint => subs.remove(&mcam),
                _ => None,
            }
        };

        if removed.is_none() {
            return Ok(());
        }

        match control.stop_stream(mcam, endpoint.port).await {
            Ok(()) => {
                tracing::info!(mcam = %mcam, endpoint = %endpoint, "Stream stopped");
            }
            Err(e) => {
                tracing::debug!(mcam = %mcam, endpoint = %endpoint, error = %e, "Stop request not acknowledged");
            }
        }

        Ok(())
    }

    /// Forget every subscription bound to `endpoint`
    ///
    /// Returns the removed subscriptions so the caller can stop them on
    /// their hosts.
    pub fn release_endpoint(&self, endpoint: StreamEndpoint) -> Vec<Subscription> {
        self.drain(|sub| sub.endpoint == endpoint)
    }

    /// Forget every subscription served by `host`
    pub fn release_host(&self, host: SocketAddr) -> Vec<Subscription> {
        self.drain(|sub| sub.mcam.host == host)
    }

    fn drain<F: Fn(&Subscription) -> bool>(&self, pred: F) -> Vec<Subscription> {
        let mut subs = self.lock();
        let keys: Vec<McamId> = subs
            .values()
            .filter(|sub| pred(sub))
            .map(|sub| sub.mcam.id)
            .collect();
        let mut removed: Vec<Subscription> = keys.iter().filter_map(|k| subs.remove(k)).collect();
        removed.sort_by_key(|s| s.mcam.id);
        removed
    }

    /// Subscription of `mcam`, if any
    pub fn get(&self, mcam: McamId) -> Option<Subscription> {
        self.lock().get(&mcam).cloned()
    }

    /// Whether `mcam` is streaming to `endpoint`
    pub fn is_streaming(&self, mcam: McamId, endpoint: StreamEndpoint) -> bool {
        self.lock()
            .get(&mcam)
            .map(|s| s.endpoint == endpoint && s.is_streaming())
            .unwrap_or(false)
    }

    /// All subscriptions ordered by mcam id
    pub fn subscriptions(&self) -> Vec<Subscription> {
        let mut list: Vec<Subscription> = self.lock().values().cloned().collect();
        list.sort_by_key(|s| s.mcam.id);
        list
    }

    /// Number of subscriptions
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

fn start_error(mcam: McamId, e: Error) -> Error {
    let reason = match e {
        Error::Rejected {
            code: RejectCode::AlreadyStreaming,
            ..
        } => "already streaming to a different endpoint".to_string(),
        Error::NotConnected(addr) => format!("host {} unreachable", addr),
        other => other.to_string(),
    };
    Error::StreamStart { mcam, reason }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::registry::CameraId;

    /// In-memory host recording requests
    #[derive(Default)]
    struct FakeControl {
        log: Mutex<Vec<String>>,
        reject_start: Option<RejectCode>,
        reject_filter: bool,
        unreachable: bool,
    }

    impl FakeControl {
        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn check(&self) -> Result<()> {
            if self.unreachable {
                Err(Error::NotConnected("127.0.0.1:9999".parse().unwrap()))
            } else {
                Ok(())
            }
        }
    }

    impl StreamControl for FakeControl {
        async fn start_stream(&self, mcam: McamId, port: u16) -> Result<()> {
            self.check()?;
            self.log.lock().unwrap().push(format!("start {} {}", mcam, port));
            match self.reject_start {
                Some(code) => Err(Error::Rejected {
                    code,
                    message: String::new(),
                }),
                None => Ok(()),
            }
        }

        async fn stop_stream(&self, mcam: McamId, port: u16) -> Result<()> {
            self.check()?;
            self.log.lock().unwrap().push(format!("stop {} {}", mcam, port));
            Ok(())
        }

        async fn set_filter(&self, mcam: McamId, port: u16, filter: StreamFilter) -> Result<()> {
            self.check()?;
            self.log
                .lock()
                .unwrap()
                .push(format!("filter {} {} {:?}", mcam, port, filter));
            if self.reject_filter {
                Err(Error::Rejected {
                    code: RejectCode::BadRequest,
                    message: String::new(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn mcam(id: u32) -> MicroCamera {
        MicroCamera::new(McamId(id), CameraId(1), "127.0.0.1:9999".parse().unwrap())
    }

    fn endpoint(port: u16) -> StreamEndpoint {
        StreamEndpoint::new(Ipv4Addr::UNSPECIFIED.into(), port)
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let manager = SubscriptionManager::new();
        let control = FakeControl::default();

        manager
            .start(&control, &mcam(1), endpoint(9002), StreamFilter::Unfiltered)
            .await
            .unwrap();
        assert!(manager.is_streaming(McamId(1), endpoint(9002)));

        manager.stop(&control, McamId(1), endpoint(9002)).await.unwrap();
        assert!(manager.is_empty());
        assert_eq!(control.log(), vec!["start 1 9002", "stop 1 9002"]);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let manager = SubscriptionManager::new();
        let control = FakeControl::default();

        manager
            .start(&control, &mcam(1), endpoint(9002), StreamFilter::Unfiltered)
            .await
            .unwrap();
        manager.stop(&control, McamId(1), endpoint(9002)).await.unwrap();
        let after_first = (manager.subscriptions().len(), control.log());

        manager.stop(&control, McamId(1), endpoint(9002)).await.unwrap();
        assert_eq!((manager.subscriptions().len(), control.log()), after_first);

        // Never started at all
        manager.stop(&control, McamId(7), endpoint(9002)).await.unwrap();
    }

    #[tokio::test]
    async fn test_start_rejected_for_other_endpoint() {
        let manager = SubscriptionManager::new();
        let control = FakeControl::default();

        manager
            .start(&control, &mcam(1), endpoint(9002), StreamFilter::Unfiltered)
            .await
            .unwrap();
        let result = manager
            .start(&control, &mcam(1), endpoint(9003), StreamFilter::Unfiltered)
            .await;

        assert!(matches!(result, Err(Error::StreamStart { .. })));
        assert_eq!(manager.get(McamId(1)).unwrap().endpoint, endpoint(9002));
        assert_eq!(control.log().len(), 1);
    }

    #[tokio::test]
    async fn test_start_same_subscription_is_noop() {
        let manager = SubscriptionManager::new();
        let control = FakeControl::default();

        for _ in 0..2 {
            manager
                .start(&control, &mcam(1), endpoint(9002), StreamFilter::HdOnly)
                .await
                .unwrap();
        }

        assert_eq!(
            control.log(),
            vec!["start 1 9002", "filter 1 9002 HdOnly"]
        );
    }

    #[tokio::test]
    async fn test_host_rejection_leaves_no_state() {
        let manager = SubscriptionManager::new();
        let control = FakeControl {
            reject_start: Some(RejectCode::AlreadyStreaming),
            ..Default::default()
        };

        let err = manager
            .start(&control, &mcam(1), endpoint(9002), StreamFilter::Unfiltered)
            .await
            .unwrap_err();

        match err {
            Error::StreamStart { reason, .. } => assert!(reason.contains("different endpoint")),
            other => panic!("unexpected error: {}", other),
        }
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_host() {
        let manager = SubscriptionManager::new();
        let control = FakeControl {
            unreachable: true,
            ..Default::default()
        };

        let result = manager
            .start(&control, &mcam(1), endpoint(9002), StreamFilter::Unfiltered)
            .await;
        assert!(matches!(result, Err(Error::StreamStart { .. })));
        assert!(manager.is_empty());

        // Stop still succeeds with the host gone
        manager.stop(&control, McamId(1), endpoint(9002)).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_initial_filter_rolls_back() {
        let manager = SubscriptionManager::new();
        let control = FakeControl {
            reject_filter: true,
            ..Default::default()
        };

        let result = manager
            .start(&control, &mcam(1), endpoint(9002), StreamFilter::FourKOnly)
            .await;

        assert!(matches!(result, Err(Error::StreamStart { .. })));
        assert!(manager.is_empty());
        assert_eq!(control.log().last().unwrap(), "stop 1 9002");
    }

    #[tokio::test]
    async fn test_set_filter_requires_streaming() {
        let manager = SubscriptionManager::new();
        let control = FakeControl::default();

        let result = manager
            .set_filter(&control, McamId(1), endpoint(9002), StreamFilter::HdOnly)
            .await;
        assert!(matches!(result, Err(Error::NotStreaming { .. })));
        assert!(control.log().is_empty());

        manager
            .start(&control, &mcam(1), endpoint(9002), StreamFilter::Unfiltered)
            .await
            .unwrap();
        manager
            .set_filter(&control, McamId(1), endpoint(9002), StreamFilter::HdOnly)
            .await
            .unwrap();
        assert_eq!(manager.get(McamId(1)).unwrap().filter, StreamFilter::HdOnly);

        // Wrong endpoint
        let result = manager
            .set_filter(&control, McamId(1), endpoint(9003), StreamFilter::FourKOnly)
            .await;
        assert!(matches!(result, Err(Error::NotStreaming { .. })));
    }

    #[tokio::test]
    async fn test_release_endpoint() {
        let manager = SubscriptionManager::new();
        let control = FakeControl::default();

        for id in 1..=3 {
            let port = if id == 2 { 9003 } else { 9002 };
            manager
                .start(&control, &mcam(id), endpoint(port), StreamFilter::Unfiltered)
                .await
                .unwrap();
        }

        let released = manager.release_endpoint(endpoint(9002));
        let ids: Vec<McamId> = released.iter().map(|s| s.mcam.id).collect();
        assert_eq!(ids, vec![McamId(1), McamId(3)]);
        assert_eq!(manager.len(), 1);

        let released = manager.release_host("127.0.0.1:9999".parse().unwrap());
        assert_eq!(released.len(), 1);
        assert!(manager.is_empty());
    }
}
