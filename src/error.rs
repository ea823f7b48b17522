//! Error types
//!
//! Each layer of the relay has its own error enum. Only [`HandshakeError`] and
//! I/O failures end a connection; framing, config-parse and subscriber-send
//! errors are recovered from locally and surface as log events.

use std::fmt;
use std::io;

use crate::registry::RegistryError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error
#[derive(Debug)]
pub enum Error {
    /// Socket or listener failure
    Io(io::Error),
    /// Handshake failed; the connection is closed
    Handshake(HandshakeError),
    /// Malformed control or command message
    Protocol(ProtocolError),
    /// AMF0 decode failure
    Amf(AmfError),
    /// Codec configuration record could not be decoded
    ConfigParse(ConfigParseError),
    /// Stream registry rejected an operation
    Registry(RegistryError),
    /// Peer closed the connection
    ConnectionClosed,
    /// No traffic within the configured deadline
    Timeout,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Handshake(e) => write!(f, "Handshake error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Amf(e) => write!(f, "AMF error: {}", e),
            Error::ConfigParse(e) => write!(f, "Config parse error: {}", e),
            Error::Registry(e) => write!(f, "Registry error: {}", e),
            Error::ConnectionClosed => write!(f, "Connection closed"),
            Error::Timeout => write!(f, "Operation timed out"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Handshake(e) => Some(e),
            Error::Protocol(e) => Some(e),
            Error::Amf(e) => Some(e),
            Error::ConfigParse(e) => Some(e),
            Error::Registry(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<HandshakeError> for Error {
    fn from(e: HandshakeError) -> Self {
        Error::Handshake(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

impl From<AmfError> for Error {
    fn from(e: AmfError) -> Self {
        Error::Amf(e)
    }
}

impl From<ConfigParseError> for Error {
    fn from(e: ConfigParseError) -> Self {
        Error::ConfigParse(e)
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Error::Registry(e)
    }
}

/// Handshake failures (always fatal)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// C0 carried something other than version 3
    InvalidVersion(u8),
    /// Peer went away before the exchange completed
    Incomplete { stage: &'static str, received: usize },
    /// Peer did not finish the exchange in time
    Timeout,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::InvalidVersion(v) => write!(f, "unsupported protocol version {}", v),
            HandshakeError::Incomplete { stage, received } => {
                write!(f, "connection closed while awaiting {} ({} bytes buffered)", stage, received)
            }
            HandshakeError::Timeout => write!(f, "handshake timed out"),
        }
    }
}

impl std::error::Error for HandshakeError {}

/// Chunk framing inconsistencies
///
/// Never fatal: the demuxer drops the affected message and resynchronizes
/// on the next chunk header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// A compressed header (format 1-3) arrived on a chunk stream with no prior header
    MissingBaseHeader { csid: u32, fmt: u8 },
    /// A new message header arrived before the previous message was complete
    InterruptedMessage { csid: u32, received: u32, expected: u32 },
    /// Declared message length exceeds the accepted maximum
    MessageTooLarge { csid: u32, length: u32 },
}

impl fmt::Display for FramingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FramingError::MissingBaseHeader { csid, fmt: kind } => {
                write!(f, "format {} header on chunk stream {} without a prior header", kind, csid)
            }
            FramingError::InterruptedMessage { csid, received, expected } => write!(
                f,
                "message on chunk stream {} interrupted after {}/{} bytes",
                csid, received, expected
            ),
            FramingError::MessageTooLarge { csid, length } => {
                write!(f, "message of {} bytes on chunk stream {} exceeds limit", length, csid)
            }
        }
    }
}

impl std::error::Error for FramingError {}

/// Malformed control, command or data messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Control message payload shorter than its fixed layout
    ShortPayload { type_id: u8, len: usize },
    /// Command message without a name or transaction id
    InvalidCommand(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::ShortPayload { type_id, len } => {
                write!(f, "message type {} has truncated payload ({} bytes)", type_id, len)
            }
            ProtocolError::InvalidCommand(msg) => write!(f, "invalid command: {}", msg),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// AMF0 decoding errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmfError {
    UnexpectedEof,
    UnknownMarker(u8),
    InvalidUtf8,
    NestingTooDeep,
}

impl fmt::Display for AmfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmfError::UnexpectedEof => write!(f, "unexpected end of data"),
            AmfError::UnknownMarker(m) => write!(f, "unknown type marker 0x{:02x}", m),
            AmfError::InvalidUtf8 => write!(f, "invalid UTF-8 string"),
            AmfError::NestingTooDeep => write!(f, "nesting too deep"),
        }
    }
}

impl std::error::Error for AmfError {}

/// Codec configuration record errors
///
/// Truncation past the fixed prefix is not an error; parsers return the
/// fields decoded so far instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigParseError {
    /// Input shorter than the record's fixed prefix
    TooShort { needed: usize, actual: usize },
    /// Bytes do not start with an ADTS sync word
    MissingSyncWord,
}

impl fmt::Display for ConfigParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigParseError::TooShort { needed, actual } => {
                write!(f, "record too short: need {} bytes, got {}", needed, actual)
            }
            ConfigParseError::MissingSyncWord => write!(f, "missing ADTS sync word"),
        }
    }
}

impl std::error::Error for ConfigParseError {}
