//! Host side of one control connection
//!
//! A reader task turns the read half into a message queue so the session
//! loop can wait on requests, mcam announcements and shutdown at once.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};

use crate::error::Result;
use crate::protocol::{read_message, write_message, ControlMessage, RejectCode};
use crate::registry::McamId;

use super::listener::HostShared;

const INBOUND_QUEUE: usize = 32;

pub(super) struct Session {
    id: u64,
    peer: SocketAddr,
    shared: Arc<HostShared>,
    writer: OwnedWriteHalf,
    torn_down: bool,
}

impl Session {
    /// Serve a control connection until the client leaves or the host shuts down
    pub(super) async fn run(
        id: u64,
        socket: TcpStream,
        peer: SocketAddr,
        shared: Arc<HostShared>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let (reader, writer) = socket.into_split();
        let (tx, mut inbound) = mpsc::channel(INBOUND_QUEUE);
        let reader_task = tokio::spawn(read_loop(id, reader, tx));

        // Subscribe before the handshake snapshot so no announcement is missed
        let mut announcements = shared.announce.subscribe();

        let mut session = Session {
            id,
            peer,
            shared,
            writer,
            torn_down: false,
        };

        let result = session
            .serve(&mut inbound, &mut announcements, &mut shutdown)
            .await;

        reader_task.abort();
        let stopped = session.shared.streamer.stop_session(id).await;
        if stopped > 0 {
            tracing::debug!(session_id = id, streams = stopped, "Stopped streams of closed session");
        }

        result
    }

    async fn serve(
        &mut self,
        inbound: &mut mpsc::Receiver<ControlMessage>,
        announcements: &mut broadcast::Receiver<McamId>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        if !self.handshake(inbound, shutdown).await? {
            return Ok(());
        }

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::debug!(session_id = self.id, "Session closed by host shutdown");
                    return Ok(());
                }
                msg = inbound.recv() => match msg {
                    Some(msg) => self.handle(msg).await?,
                    None => return Ok(()),
                },
                Ok(mcam_id) = announcements.recv() => {
                    if !self.torn_down {
                        write_message(&mut self.writer, &ControlMessage::McamAnnounce { mcam_id }).await?;
                    }
                }
            }
        }
    }

    async fn handshake(
        &mut self,
        inbound: &mut mpsc::Receiver<ControlMessage>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<bool> {
        let msg = tokio::select! {
            _ = shutdown.changed() => return Ok(false),
            msg = inbound.recv() => msg,
        };

        match msg {
            Some(ControlMessage::Hello {
                request_id,
                client_name,
            }) => {
                let mcams = self.shared.mcams().await;
                tracing::info!(
                    session_id = self.id,
                    peer = %self.peer,
                    client = %client_name,
                    mcams = mcams.len(),
                    "Client connected"
                );
                write_message(
                    &mut self.writer,
                    &ControlMessage::HostInfo {
                        request_id,
                        camera_id: self.shared.config.camera_id,
                        mcams,
                    },
                )
                .await?;
                Ok(true)
            }
            Some(other) => {
                tracing::warn!(session_id = self.id, message = other.name(), "Expected Hello");
                self.nack(other.request_id().unwrap_or_default(), RejectCode::BadRequest, "expected Hello")
                    .await?;
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn handle(&mut self, msg: ControlMessage) -> Result<()> {
        match msg {
            ControlMessage::StartStream {
                request_id,
                mcam_id,
                port,
            } => {
                if self.torn_down {
                    return self.nack(request_id, RejectCode::BadRequest, "disconnecting").await;
                }
                if !self.shared.serves(mcam_id).await {
                    return self
                        .nack(request_id, RejectCode::UnknownMcam, &format!("mcam {} not served here", mcam_id))
                        .await;
                }
                let target = self.target(port);
                match self.shared.streamer.start(self.id, mcam_id, target).await {
                    Ok(()) => self.ack(request_id).await,
                    Err(code) => {
                        tracing::warn!(session_id = self.id, mcam = %mcam_id, target = %target, "Stream start rejected: {}", code);
                        self.nack(request_id, code, "mcam streams to another endpoint").await
                    }
                }
            }
            ControlMessage::StopStream {
                request_id,
                mcam_id,
                port,
            } => {
                let target = self.target(port);
                self.shared.streamer.stop(mcam_id, target).await;
                self.ack(request_id).await
            }
            ControlMessage::SetFilter {
                request_id,
                mcam_id,
                port,
                filter,
            } => {
                let target = self.target(port);
                match self.shared.streamer.set_filter(mcam_id, target, filter).await {
                    Ok(()) => self.ack(request_id).await,
                    Err(code) => self.nack(request_id, code, "no such stream").await,
                }
            }
            ControlMessage::Disconnect => self.teardown().await,
            ControlMessage::Hello { request_id, .. } => {
                self.nack(request_id, RejectCode::BadRequest, "already greeted").await
            }
            other => {
                tracing::warn!(session_id = self.id, message = other.name(), "Unexpected message from client");
                Ok(())
            }
        }
    }

    /// Stop the session's streams, then confirm
    ///
    /// Repeated Disconnects (client retries) are confirmed again without
    /// another delay.
    async fn teardown(&mut self) -> Result<()> {
        if !self.torn_down {
            self.torn_down = true;
            let stopped = self.shared.streamer.stop_session(self.id).await;
            tracing::info!(session_id = self.id, peer = %self.peer, streams = stopped, "Client disconnecting");

            if !self.shared.config.teardown_delay.is_zero() {
                tokio::time::sleep(self.shared.config.teardown_delay).await;
            }
        }

        if self.shared.config.ack_teardown {
            write_message(&mut self.writer, &ControlMessage::TeardownComplete).await?;
        }
        Ok(())
    }

    fn target(&self, port: u16) -> SocketAddr {
        SocketAddr::new(self.peer.ip(), port)
    }

    async fn ack(&mut self, request_id: u32) -> Result<()> {
        write_message(&mut self.writer, &ControlMessage::Ack { request_id }).await
    }

    async fn nack(&mut self, request_id: u32, code: RejectCode, message: &str) -> Result<()> {
        write_message(
            &mut self.writer,
            &ControlMessage::Nack {
                request_id,
                code,
                message: message.to_string(),
            },
        )
        .await
    }
}

async fn read_loop(session_id: u64, mut reader: OwnedReadHalf, tx: mpsc::Sender<ControlMessage>) {
    loop {
        match read_message(&mut reader).await {
            Ok(Some(msg)) => {
                if tx.send(msg).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "Bad control message");
                break;
            }
        }
    }
}
