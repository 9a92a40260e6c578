//! Camera registry implementation
//!
//! Holds every micro-camera discovered through any connection, keyed by
//! mcam id, and fans discovery notifications out to a single callback.

use std::collections::HashMap;
use std::net::SocketAddr;

use tokio::sync::{Mutex, RwLock};

use super::camera::{McamId, MicroCamera};

/// Callback invoked once per newly discovered micro-camera
pub type DiscoveryCallback = Box<dyn Fn(&MicroCamera) + Send + Sync + 'static>;

/// Registry of known micro-cameras
///
/// Discovery and callback registration are serialized on the callback slot,
/// so a callback sees every mcam exactly once: either through the replay
/// when it is registered, or through the notification when the mcam is
/// discovered later.
pub struct CameraRegistry {
    /// Known mcams
    mcams: RwLock<HashMap<McamId, MicroCamera>>,

    /// Discovery callback
    on_new: Mutex<Option<DiscoveryCallback>>,
}

impl CameraRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            mcams: RwLock::new(HashMap::new()),
            on_new: Mutex::new(None),
        }
    }

    /// Record a micro-camera reported by a host
    ///
    /// Returns `true` if the mcam was not known before. A known mcam that
    /// moved to another host has its address updated without a new
    /// notification.
    pub async fn discover(&self, mcam: MicroCamera) -> bool {
        let on_new = self.on_new.lock().await;

        {
            let mut mcams = self.mcams.write().await;
            if let Some(existing) = mcams.get_mut(&mcam.id) {
                if existing.host != mcam.host {
                    tracing::info!(
                        mcam = %mcam.id,
                        old_host = %existing.host,
                        new_host = %mcam.host,
                        "Mcam moved to a different host"
                    );
                    existing.host = mcam.host;
                }
                return false;
            }
            mcams.insert(mcam.id, mcam.clone());
        }

        tracing::info!(mcam = %mcam.id, camera = %mcam.camera_id, host = %mcam.host, "New mcam discovered");

        if let Some(ref callback) = *on_new {
            callback(&mcam);
        }

        true
    }

    /// Set the discovery callback, replacing any previous one
    ///
    /// The callback is immediately invoked for every mcam already known.
    pub async fn set_callback<F>(&self, callback: F)
    where
        F: Fn(&MicroCamera) + Send + Sync + 'static,
    {
        let mut on_new = self.on_new.lock().await;

        let mut known: Vec<MicroCamera> = self.mcams.read().await.values().cloned().collect();
        known.sort_by_key(|m| m.id);
        for mcam in &known {
            callback(mcam);
        }

        *on_new = Some(Box::new(callback));
    }

    /// Remove the discovery callback
    pub async fn clear_callback(&self) {
        *self.on_new.lock().await = None;
    }

    /// Look up a micro-camera by id
    pub async fn get(&self, id: McamId) -> Option<MicroCamera> {
        self.mcams.read().await.get(&id).cloned()
    }

    /// All known micro-cameras ordered by id
    pub async fn list(&self) -> Vec<MicroCamera> {
        let mut list: Vec<MicroCamera> = self.mcams.read().await.values().cloned().collect();
        list.sort_by_key(|m| m.id);
        list
    }

    /// Micro-cameras served by a given host, ordered by id
    pub async fn hosted_by(&self, host: SocketAddr) -> Vec<MicroCamera> {
        let mut list: Vec<MicroCamera> = self
            .mcams
            .read()
            .await
            .values()
            .filter(|m| m.host == host)
            .cloned()
            .collect();
        list.sort_by_key(|m| m.id);
        list
    }

    /// Number of known micro-cameras
    pub async fn len(&self) -> usize {
        self.mcams.read().await.len()
    }

    /// Whether no micro-camera is known
    pub async fn is_empty(&self) -> bool {
        self.mcams.read().await.is_empty()
    }

    /// Forget a micro-camera; it will be reported as new if seen again
    pub async fn forget(&self, id: McamId) -> Option<MicroCamera> {
        self.mcams.write().await.remove(&id)
    }
}

impl Default for CameraRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::registry::CameraId;

    fn mcam(id: u32, port: u16) -> MicroCamera {
        MicroCamera::new(
            McamId(id),
            CameraId(1),
            SocketAddr::from(([127, 0, 0, 1], port)),
        )
    }

    #[tokio::test]
    async fn test_discover_notifies_once() {
        let registry = CameraRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        registry
            .set_callback(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        assert!(registry.discover(mcam(1, 9999)).await);
        assert!(!registry.discover(mcam(1, 9999)).await);
        assert!(registry.discover(mcam(2, 9999)).await);

        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_callback_replays_known_mcams() {
        let registry = CameraRegistry::new();
        registry.discover(mcam(3, 9999)).await;
        registry.discover(mcam(1, 9999)).await;

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        registry
            .set_callback(move |m| s.lock().unwrap().push(m.id))
            .await;

        assert_eq!(*seen.lock().unwrap(), vec![McamId(1), McamId(3)]);
    }

    #[tokio::test]
    async fn test_mcam_moved_updates_host() {
        let registry = CameraRegistry::new();
        registry.discover(mcam(1, 9999)).await;

        assert!(!registry.discover(mcam(1, 10000)).await);

        let found = registry.get(McamId(1)).await.unwrap();
        assert_eq!(found.host.port(), 10000);
        assert_eq!(registry.hosted_by(found.host).await.len(), 1);
    }

    #[tokio::test]
    async fn test_forget_allows_rediscovery() {
        let registry = CameraRegistry::new();
        registry.discover(mcam(5, 9999)).await;

        assert!(registry.forget(McamId(5)).await.is_some());
        assert!(registry.is_empty().await);
        assert!(registry.discover(mcam(5, 9999)).await);
    }
}
