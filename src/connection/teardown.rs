//! Acknowledged teardown
//!
//! A disconnect is asynchronous on the host: streams are stopped after the
//! request arrives. Instead of sleeping for a fixed time before releasing
//! local resources, the client waits for the host's `TeardownComplete`,
//! re-sending the request with exponential backoff until it is confirmed or
//! the attempts run out.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::protocol::{write_message, ControlMessage};

use super::state::{ConnectionPhase, ConnectionState};

/// Handle to a disconnect in progress
pub struct Teardown {
    pub(super) addr: SocketAddr,
    pub(super) writer: Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
    pub(super) confirmed: watch::Receiver<bool>,
    pub(super) state: Arc<Mutex<ConnectionState>>,
    pub(super) initial_backoff: Duration,
    pub(super) max_attempts: u32,
}

impl Teardown {
    /// Host address being disconnected
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Whether the host has already confirmed
    pub fn is_confirmed(&self) -> bool {
        *self.confirmed.borrow()
    }

    /// Wait for the host to confirm the teardown
    ///
    /// Once this returns `Ok`, the host has stopped every stream of the
    /// connection. On `Err(TeardownTimeout)` the connection is considered
    /// gone anyway and the phase is `Disconnected`.
    pub async fn wait(mut self) -> Result<()> {
        let mut backoff = self.initial_backoff;
        let max_attempts = self.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            if self.is_confirmed() {
                break;
            }

            let confirmed = tokio::time::timeout(backoff, self.confirmed.wait_for(|c| *c))
                .await
                .is_ok();
            if confirmed {
                break;
            }

            if attempt == max_attempts {
                self.finish();
                tracing::warn!(host = %self.addr, attempts = attempt, "Teardown not acknowledged");
                return Err(Error::TeardownTimeout(self.addr));
            }

            tracing::debug!(
                host = %self.addr,
                attempt = attempt,
                backoff_ms = backoff.as_millis() as u64,
                "Teardown not yet acknowledged, resending disconnect"
            );

            let mut writer = self.writer.lock().await;
            if write_message(&mut *writer, &ControlMessage::Disconnect).await.is_err() {
                // Write failure means the connection is already gone
                drop(writer);
                break;
            }
            drop(writer);

            backoff = backoff.saturating_mul(2);
        }

        self.finish();
        tracing::info!(host = %self.addr, "Teardown confirmed");
        Ok(())
    }

    fn finish(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.phase != ConnectionPhase::Disconnected {
            state.complete_disconnect();
        }
    }
}
