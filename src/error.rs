//! Error types
//!
//! All fallible operations in the crate return [`Result`]. Lifecycle misuse
//! (closing twice, stopping a stopped stream) is never an error.

use std::fmt;
use std::io;
use std::net::SocketAddr;

use crate::protocol::RejectCode;
use crate::receiver::StreamEndpoint;
use crate::registry::McamId;

/// Crate result type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug)]
pub enum Error {
    /// Underlying I/O failure
    Io(io::Error),
    /// Receiver could not bind its port
    Bind { port: u16, source: io::Error },
    /// Connection to a camera host failed (refused, timed out, bad handshake)
    Connect { addr: SocketAddr, reason: String },
    /// Malformed data on the wire
    Protocol(ProtocolError),
    /// Host unreachable or mcam already streaming elsewhere
    StreamStart { mcam: McamId, reason: String },
    /// Filter applied to a subscription that is not streaming
    NotStreaming { mcam: McamId, endpoint: StreamEndpoint },
    /// No live connection to the host
    NotConnected(SocketAddr),
    /// No open receiver on the given port
    ReceiverNotOpen(u16),
    /// Host answered a request with a rejection
    Rejected { code: RejectCode, message: String },
    /// A request did not complete in time
    Timeout(&'static str),
    /// Host never acknowledged a disconnect
    TeardownTimeout(SocketAddr),
    /// Mcam id not present in the registry
    UnknownCamera(McamId),
}

/// Wire format errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Datagram or message shorter than its header
    Truncated { needed: usize, available: usize },
    /// Frame datagram does not start with the expected magic
    BadMagic(u32),
    /// Unsupported frame header version
    UnsupportedVersion(u8),
    /// Unknown scale mode byte
    InvalidScaleMode(u8),
    /// Unknown stream filter byte
    InvalidFilter(u8),
    /// Unknown control opcode
    UnknownOpcode(u8),
    /// Fragment index/count are inconsistent
    InvalidFragment { index: u16, count: u16 },
    /// Fragment lengths do not add up to the advertised total
    LengthMismatch { expected: usize, actual: usize },
    /// Control message exceeds the size limit
    MessageTooLarge(usize),
    /// String field is not valid UTF-8
    InvalidString,
    /// Peer sent a message that is not valid in the current state
    UnexpectedMessage(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Bind { port, source } => {
                write!(f, "Failed to bind receiver on port {}: {}", port, source)
            }
            Error::Connect { addr, reason } => {
                write!(f, "Failed to connect to {}: {}", addr, reason)
            }
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::StreamStart { mcam, reason } => {
                write!(f, "Failed to start stream for mcam {}: {}", mcam, reason)
            }
            Error::NotStreaming { mcam, endpoint } => {
                write!(f, "Mcam {} is not streaming to {}", mcam, endpoint)
            }
            Error::NotConnected(addr) => write!(f, "Not connected to {}", addr),
            Error::ReceiverNotOpen(port) => write!(f, "No receiver open on port {}", port),
            Error::Rejected { code, message } => {
                write!(f, "Request rejected ({}): {}", code, message)
            }
            Error::Timeout(what) => write!(f, "Timed out: {}", what),
            Error::TeardownTimeout(addr) => {
                write!(f, "Host {} did not acknowledge disconnect", addr)
            }
            Error::UnknownCamera(mcam) => write!(f, "Unknown mcam {}", mcam),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Truncated { needed, available } => {
                write!(f, "Truncated: need {} bytes, have {}", needed, available)
            }
            ProtocolError::BadMagic(m) => write!(f, "Bad magic 0x{:08x}", m),
            ProtocolError::UnsupportedVersion(v) => write!(f, "Unsupported version {}", v),
            ProtocolError::InvalidScaleMode(m) => write!(f, "Invalid scale mode {}", m),
            ProtocolError::InvalidFilter(m) => write!(f, "Invalid stream filter {}", m),
            ProtocolError::UnknownOpcode(op) => write!(f, "Unknown opcode 0x{:02x}", op),
            ProtocolError::InvalidFragment { index, count } => {
                write!(f, "Invalid fragment {}/{}", index, count)
            }
            ProtocolError::LengthMismatch { expected, actual } => {
                write!(f, "Length mismatch: expected {}, got {}", expected, actual)
            }
            ProtocolError::MessageTooLarge(len) => write!(f, "Message too large: {} bytes", len),
            ProtocolError::InvalidString => write!(f, "Invalid UTF-8 string"),
            ProtocolError::UnexpectedMessage(what) => write!(f, "Unexpected message: {}", what),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Bind { source, .. } => Some(source),
            Error::Protocol(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = Error::StreamStart {
            mcam: McamId(7),
            reason: "already streaming".into(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to start stream for mcam 7: already streaming"
        );

        let err: Error = ProtocolError::BadMagic(0xdeadbeef).into();
        assert_eq!(err.to_string(), "Protocol error: Bad magic 0xdeadbeef");
    }

    #[test]
    fn test_source_chain() {
        use std::error::Error as _;

        let err = Error::Bind {
            port: 9002,
            source: io::Error::new(io::ErrorKind::AddrInUse, "in use"),
        };
        assert!(err.source().is_some());
        assert!(Error::Timeout("start").source().is_none());
    }
}
