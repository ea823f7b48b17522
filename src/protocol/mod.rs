//! RTMP wire protocol
//!
//! - [`handshake`]: the C0/C1/C2 exchange that opens every connection
//! - [`header`]: basic and message header codecs
//! - [`chunk`]: chunk stream demultiplexing and outbound chunking
//! - [`message`]: typed control, command, data and media messages

pub mod chunk;
pub mod constants;
pub mod handshake;
pub mod header;
pub mod message;

pub use chunk::{ChunkDecoder, ChunkEncoder, RtmpChunk};
pub use handshake::{HandshakeEngine, HandshakeState};
pub use message::{Command, ConnectParams, DataMessage, RtmpMessage, UserControlEvent};
