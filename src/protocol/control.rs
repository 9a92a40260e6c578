//! Control channel messages
//!
//! The control channel is a TCP stream of length-prefixed messages:
//!
//! ```text
//! +----------------+--------+------------------+
//! | length (u32be) | opcode |   body ...       |
//! +----------------+--------+------------------+
//!                   \___ length bytes ________/
//! ```
//!
//! Requests carry a request id echoed by the matching `Ack`/`Nack`/`HostInfo`.
//! `McamAnnounce` and `TeardownComplete` are unsolicited.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, Result};
use crate::media::StreamFilter;
use crate::protocol::constants::MAX_CONTROL_MESSAGE;
use crate::registry::{CameraId, McamId};

const OP_HELLO: u8 = 0x01;
const OP_HOST_INFO: u8 = 0x02;
const OP_MCAM_ANNOUNCE: u8 = 0x03;
const OP_START_STREAM: u8 = 0x10;
const OP_STOP_STREAM: u8 = 0x11;
const OP_SET_FILTER: u8 = 0x12;
const OP_DISCONNECT: u8 = 0x1F;
const OP_ACK: u8 = 0x20;
const OP_NACK: u8 = 0x21;
const OP_TEARDOWN_COMPLETE: u8 = 0x2F;

/// Reason a host rejected a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectCode {
    /// Host does not serve this mcam
    UnknownMcam,
    /// Mcam already streams to another endpoint
    AlreadyStreaming,
    /// No stream for this mcam/endpoint
    NotStreaming,
    /// Request malformed or not allowed now
    BadRequest,
    /// Code not known to this version
    Other(u8),
}

impl RejectCode {
    pub fn to_wire(self) -> u8 {
        match self {
            RejectCode::UnknownMcam => 1,
            RejectCode::AlreadyStreaming => 2,
            RejectCode::NotStreaming => 3,
            RejectCode::BadRequest => 4,
            RejectCode::Other(c) => c,
        }
    }

    pub fn from_wire(b: u8) -> Self {
        match b {
            1 => RejectCode::UnknownMcam,
            2 => RejectCode::AlreadyStreaming,
            3 => RejectCode::NotStreaming,
            4 => RejectCode::BadRequest,
            other => RejectCode::Other(other),
        }
    }
}

impl fmt::Display for RejectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectCode::UnknownMcam => write!(f, "unknown mcam"),
            RejectCode::AlreadyStreaming => write!(f, "already streaming"),
            RejectCode::NotStreaming => write!(f, "not streaming"),
            RejectCode::BadRequest => write!(f, "bad request"),
            RejectCode::Other(c) => write!(f, "code {}", c),
        }
    }
}

/// A control channel message
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    /// Client greeting, answered with `HostInfo`
    Hello { request_id: u32, client_name: String },
    /// Host identity and the mcams it serves
    HostInfo {
        request_id: u32,
        camera_id: CameraId,
        mcams: Vec<McamId>,
    },
    /// A sensor came online after the handshake
    McamAnnounce { mcam_id: McamId },
    /// Stream an mcam to `port` on the client's address
    StartStream {
        request_id: u32,
        mcam_id: McamId,
        port: u16,
    },
    /// Stop streaming an mcam to `port`
    StopStream {
        request_id: u32,
        mcam_id: McamId,
        port: u16,
    },
    /// Narrow the resolution classes sent to `port`
    SetFilter {
        request_id: u32,
        mcam_id: McamId,
        port: u16,
        filter: StreamFilter,
    },
    /// Client is leaving; host stops all its streams then acknowledges
    Disconnect,
    Ack { request_id: u32 },
    Nack {
        request_id: u32,
        code: RejectCode,
        message: String,
    },
    /// All streams of the connection are stopped
    TeardownComplete,
}

impl ControlMessage {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            ControlMessage::Hello { .. } => "Hello",
            ControlMessage::HostInfo { .. } => "HostInfo",
            ControlMessage::McamAnnounce { .. } => "McamAnnounce",
            ControlMessage::StartStream { .. } => "StartStream",
            ControlMessage::StopStream { .. } => "StopStream",
            ControlMessage::SetFilter { .. } => "SetFilter",
            ControlMessage::Disconnect => "Disconnect",
            ControlMessage::Ack { .. } => "Ack",
            ControlMessage::Nack { .. } => "Nack",
            ControlMessage::TeardownComplete => "TeardownComplete",
        }
    }

    /// Request id for request/response messages
    pub fn request_id(&self) -> Option<u32> {
        match self {
            ControlMessage::Hello { request_id, .. }
            | ControlMessage::HostInfo { request_id, .. }
            | ControlMessage::StartStream { request_id, .. }
            | ControlMessage::StopStream { request_id, .. }
            | ControlMessage::SetFilter { request_id, .. }
            | ControlMessage::Ack { request_id }
            | ControlMessage::Nack { request_id, .. } => Some(*request_id),
            _ => None,
        }
    }

    /// Encode including the length prefix
    pub fn encode(&self) -> Bytes {
        let mut body = BytesMut::with_capacity(32);

        match self {
            ControlMessage::Hello {
                request_id,
                client_name,
            } => {
                body.put_u8(OP_HELLO);
                body.put_u32(*request_id);
                put_string(&mut body, client_name);
            }
            ControlMessage::HostInfo {
                request_id,
                camera_id,
                mcams,
            } => {
                body.put_u8(OP_HOST_INFO);
                body.put_u32(*request_id);
                body.put_u32(camera_id.0);
                body.put_u16(mcams.len() as u16);
                for mcam in mcams {
                    body.put_u32(mcam.0);
                }
            }
            ControlMessage::McamAnnounce { mcam_id } => {
                body.put_u8(OP_MCAM_ANNOUNCE);
                body.put_u32(mcam_id.0);
            }
            ControlMessage::StartStream {
                request_id,
                mcam_id,
                port,
            } => {
                body.put_u8(OP_START_STREAM);
                body.put_u32(*request_id);
                body.put_u32(mcam_id.0);
                body.put_u16(*port);
            }
            ControlMessage::StopStream {
                request_id,
                mcam_id,
                port,
            } => {
                body.put_u8(OP_STOP_STREAM);
                body.put_u32(*request_id);
                body.put_u32(mcam_id.0);
                body.put_u16(*port);
            }
            ControlMessage::SetFilter {
                request_id,
                mcam_id,
                port,
                filter,
            } => {
                body.put_u8(OP_SET_FILTER);
                body.put_u32(*request_id);
                body.put_u32(mcam_id.0);
                body.put_u16(*port);
                body.put_u8(filter.to_wire());
            }
            ControlMessage::Disconnect => body.put_u8(OP_DISCONNECT),
            ControlMessage::Ack { request_id } => {
                body.put_u8(OP_ACK);
                body.put_u32(*request_id);
            }
            ControlMessage::Nack {
                request_id,
                code,
                message,
            } => {
                body.put_u8(OP_NACK);
                body.put_u32(*request_id);
                body.put_u8(code.to_wire());
                put_string(&mut body, message);
            }
            ControlMessage::TeardownComplete => body.put_u8(OP_TEARDOWN_COMPLETE),
        }

        let mut out = BytesMut::with_capacity(4 + body.len());
        out.put_u32(body.len() as u32);
        out.put_slice(&body);
        out.freeze()
    }

    /// Decode a message body (opcode + fields, without the length prefix)
    pub fn decode(mut body: Bytes) -> std::result::Result<Self, ProtocolError> {
        let opcode = get_u8(&mut body)?;

        let msg = match opcode {
            OP_HELLO => ControlMessage::Hello {
                request_id: get_u32(&mut body)?,
                client_name: get_string(&mut body)?,
            },
            OP_HOST_INFO => {
                let request_id = get_u32(&mut body)?;
                let camera_id = CameraId(get_u32(&mut body)?);
                let count = get_u16(&mut body)? as usize;
                ensure(&body, count * 4)?;
                let mcams = (0..count).map(|_| McamId(body.get_u32())).collect();
                ControlMessage::HostInfo {
                    request_id,
                    camera_id,
                    mcams,
                }
            }
            OP_MCAM_ANNOUNCE => ControlMessage::McamAnnounce {
                mcam_id: McamId(get_u32(&mut body)?),
            },
            OP_START_STREAM => ControlMessage::StartStream {
                request_id: get_u32(&mut body)?,
                mcam_id: McamId(get_u32(&mut body)?),
                port: get_u16(&mut body)?,
            },
            OP_STOP_STREAM => ControlMessage::StopStream {
                request_id: get_u32(&mut body)?,
                mcam_id: McamId(get_u32(&mut body)?),
                port: get_u16(&mut body)?,
            },
            OP_SET_FILTER => ControlMessage::SetFilter {
                request_id: get_u32(&mut body)?,
                mcam_id: McamId(get_u32(&mut body)?),
                port: get_u16(&mut body)?,
                filter: StreamFilter::from_wire(get_u8(&mut body)?)?,
            },
            OP_DISCONNECT => ControlMessage::Disconnect,
            OP_ACK => ControlMessage::Ack {
                request_id: get_u32(&mut body)?,
            },
            OP_NACK => ControlMessage::Nack {
                request_id: get_u32(&mut body)?,
                code: RejectCode::from_wire(get_u8(&mut body)?),
                message: get_string(&mut body)?,
            },
            OP_TEARDOWN_COMPLETE => ControlMessage::TeardownComplete,
            other => return Err(ProtocolError::UnknownOpcode(other)),
        };

        Ok(msg)
    }
}

/// Read one message
///
/// Returns `Ok(None)` when the peer closed the stream on a message boundary.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<ControlMessage>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 {
        return Err(ProtocolError::Truncated {
            needed: 1,
            available: 0,
        }
        .into());
    }
    if len > MAX_CONTROL_MESSAGE {
        return Err(ProtocolError::MessageTooLarge(len).into());
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;

    Ok(Some(ControlMessage::decode(Bytes::from(body))?))
}

/// Write one message and flush
pub async fn write_message<W>(writer: &mut W, msg: &ControlMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&msg.encode()).await?;
    writer.flush().await?;
    Ok(())
}

fn ensure(buf: &Bytes, needed: usize) -> std::result::Result<(), ProtocolError> {
    if buf.remaining() < needed {
        Err(ProtocolError::Truncated {
            needed,
            available: buf.remaining(),
        })
    } else {
        Ok(())
    }
}

fn get_u8(buf: &mut Bytes) -> std::result::Result<u8, ProtocolError> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

fn get_u16(buf: &mut Bytes) -> std::result::Result<u16, ProtocolError> {
    ensure(buf, 2)?;
    Ok(buf.get_u16())
}

fn get_u32(buf: &mut Bytes) -> std::result::Result<u32, ProtocolError> {
    ensure(buf, 4)?;
    Ok(buf.get_u32())
}

fn put_string(buf: &mut BytesMut, s: &str) {
    let bytes = &s.as_bytes()[..s.len().min(u16::MAX as usize)];
    buf.put_u16(bytes.len() as u16);
    buf.put_slice(bytes);
}

fn get_string(buf: &mut Bytes) -> std::result::Result<String, ProtocolError> {
    let len = get_u16(buf)? as usize;
    ensure(buf, len)?;
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidString)
}
