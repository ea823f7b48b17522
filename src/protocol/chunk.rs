//! Chunk stream demultiplexing and multiplexing
//!
//! RTMP splits every message into chunks of at most the negotiated chunk size
//! and interleaves chunks of different chunk streams on one socket. Each
//! chunk's header may be compressed against the previous header seen on the
//! same chunk stream, so both directions keep per-csid state.
//!
//! [`ChunkDecoder`] is fed raw bytes in whatever pieces the socket produced and
//! hands back complete messages. A chunk is only consumed once its header and
//! payload are both buffered, so a read boundary can fall anywhere.
//!
//! Framing inconsistencies drop the affected message and decoding carries on
//! with the next header; the connection is never failed for them.

use std::collections::HashMap;

use bytes::{Buf, Bytes, BytesMut};

use crate::error::FramingError;
use crate::protocol::constants::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, MAX_MESSAGE_SIZE};
use crate::protocol::header::{BasicHeader, MessageHeader, FMT_CONTINUATION, FMT_FULL};

/// A complete message reassembled from one or more chunks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtmpChunk {
    /// Chunk stream the message arrived on (or should be sent on)
    pub csid: u32,
    /// Absolute timestamp in milliseconds, wrapping at 2^32
    pub timestamp: u32,
    pub message_type: u8,
    /// Message stream id
    pub stream_id: u32,
    pub payload: Bytes,
}

impl RtmpChunk {
    pub fn new(csid: u32, timestamp: u32, message_type: u8, stream_id: u32, payload: Bytes) -> Self {
        Self {
            csid,
            timestamp,
            message_type,
            stream_id,
            payload,
        }
    }
}

/// Per chunk stream reassembly state
#[derive(Debug, Default)]
struct ChunkStreamState {
    /// A format 0 or 1 header has been seen, so compressed headers have a base
    has_base: bool,
    timestamp: u32,
    /// Delta re-applied when a format 3 chunk starts a new message
    timestamp_delta: u32,
    length: u32,
    type_id: u8,
    stream_id: u32,
    /// Last header used the extended timestamp field
    extended: bool,
    /// Bytes of the current message received so far
    received: u32,
    payload: BytesMut,
    /// Current message is being skipped (oversized)
    discarding: bool,
}

impl ChunkStreamState {
    fn in_progress(&self) -> bool {
        self.received > 0 && self.received < self.length
    }

    fn reset_message(&mut self) {
        self.received = 0;
        self.payload = BytesMut::new();
        self.discarding = false;
    }
}

/// Header fields resolved for the chunk about to be consumed
struct PendingChunk {
    csid: u32,
    header_len: usize,
    payload_len: usize,
    starts_message: bool,
    timestamp: u32,
    delta: u32,
    length: u32,
    type_id: u8,
    stream_id: u32,
    extended: bool,
    has_base: bool,
}

/// Inbound chunk stream demultiplexer
#[derive(Debug)]
pub struct ChunkDecoder {
    chunk_size: u32,
    max_message_size: u32,
    streams: HashMap<u32, ChunkStreamState>,
    framing_errors: u64,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_message_size: MAX_MESSAGE_SIZE,
            streams: HashMap::new(),
            framing_errors: 0,
        }
    }

    /// Messages declaring more than `size` bytes are skipped instead of buffered
    pub fn with_max_message_size(mut self, size: u32) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Apply a Set Chunk Size received from the peer
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    /// Drop the partial message on `csid` (Abort message)
    pub fn abort(&mut self, csid: u32) {
        if let Some(state) = self.streams.get_mut(&csid) {
            state.reset_message();
        }
    }

    /// Number of messages dropped for framing errors
    pub fn framing_errors(&self) -> u64 {
        self.framing_errors
    }

    /// Decode the next complete message from `buf`
    ///
    /// Consumes whole chunks only. Returns `None` once the buffered bytes no
    /// longer hold a complete chunk that finishes a message; call again after
    /// appending more input.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Option<RtmpChunk> {
        loop {
            let pending = match self.peek_chunk(&buf[..]) {
                Peek::Incomplete => return None,
                Peek::Invalid { consumed, error } => {
                    buf.advance(consumed);
                    self.record_framing_error(error);
                    continue;
                }
                Peek::Chunk(pending) => pending,
            };

            if buf.len() < pending.header_len + pending.payload_len {
                return None;
            }

            buf.advance(pending.header_len);
            let data = buf.split_to(pending.payload_len);

            if let Some(message) = self.commit(pending, data) {
                return Some(message);
            }
        }
    }

    fn peek_chunk(&self, buf: &[u8]) -> Peek {
        let Some((basic, basic_len)) = BasicHeader::decode(buf) else {
            return Peek::Incomplete;
        };

        let state = self.streams.get(&basic.csid);
        let continuation_extended = basic.fmt == FMT_CONTINUATION && state.map_or(false, |s| s.extended);

        let Some((header, msg_len)) =
            MessageHeader::decode(basic.fmt, &buf[basic_len..], continuation_extended)
        else {
            return Peek::Incomplete;
        };
        let header_len = basic_len + msg_len;

        let base = match state {
            Some(s) if s.has_base => s,
            _ if basic.fmt == FMT_FULL => {
                return Peek::Chunk(self.resolve_new(basic.csid, header_len, header, None));
            }
            _ => {
                return Peek::Invalid {
                    consumed: header_len,
                    error: FramingError::MissingBaseHeader {
                        csid: basic.csid,
                        fmt: basic.fmt,
                    },
                };
            }
        };

        if header == MessageHeader::Continuation && base.in_progress() {
            let remaining = (base.length - base.received) as usize;
            return Peek::Chunk(PendingChunk {
                csid: basic.csid,
                header_len,
                payload_len: remaining.min(self.chunk_size as usize),
                starts_message: false,
                timestamp: base.timestamp,
                delta: base.timestamp_delta,
                length: base.length,
                type_id: base.type_id,
                stream_id: base.stream_id,
                extended: base.extended,
                has_base: true,
            });
        }

        Peek::Chunk(self.resolve_new(basic.csid, header_len, header, Some(base)))
    }

    /// Resolve a header that begins a new message
    fn resolve_new(
        &self,
        csid: u32,
        header_len: usize,
        header: MessageHeader,
        base: Option<&ChunkStreamState>,
    ) -> PendingChunk {
        let extended = header.is_extended();
        let (timestamp, delta, length, type_id, stream_id, extended) = match (header, base) {
            (
                MessageHeader::Full {
                    timestamp,
                    length,
                    type_id,
                    stream_id,
                },
                _,
            ) => (timestamp, timestamp, length, type_id, stream_id, extended),
            (
                MessageHeader::SameStream {
                    delta,
                    length,
                    type_id,
                },
                Some(b),
            ) => (b.timestamp.wrapping_add(delta), delta, length, type_id, b.stream_id, extended),
            (MessageHeader::Delta { delta }, Some(b)) => (
                b.timestamp.wrapping_add(delta),
                delta,
                b.length,
                b.type_id,
                b.stream_id,
                extended,
            ),
            (MessageHeader::Continuation, Some(b)) => (
                b.timestamp.wrapping_add(b.timestamp_delta),
                b.timestamp_delta,
                b.length,
                b.type_id,
                b.stream_id,
                b.extended,
            ),
            // Compressed headers without a base are rejected in peek_chunk
            (_, None) => (0, 0, 0, 0, 0, false),
        };

        PendingChunk {
            csid,
            header_len,
            payload_len: (length as usize).min(self.chunk_size as usize),
            starts_message: true,
            timestamp,
            delta,
            length,
            type_id,
            stream_id,
            extended,
            has_base: true,
        }
    }

    fn commit(&mut self, chunk: PendingChunk, data: BytesMut) -> Option<RtmpChunk> {
        let max_message_size = self.max_message_size;
        let state = self.streams.entry(chunk.csid).or_default();
        let mut error = None;

        if chunk.starts_message {
            if state.in_progress() {
                error = Some(FramingError::InterruptedMessage {
                    csid: chunk.csid,
                    received: state.received,
                    expected: state.length,
                });
            }
            state.reset_message();
            state.has_base = chunk.has_base;
            state.timestamp = chunk.timestamp;
            state.timestamp_delta = chunk.delta;
            state.length = chunk.length;
            state.type_id = chunk.type_id;
            state.stream_id = chunk.stream_id;
            state.extended = chunk.extended;
            state.discarding = chunk.length > max_message_size;
            if !state.discarding {
                state.payload.reserve(chunk.length as usize);
            }
        }

        state.received += data.len() as u32;
        if !state.discarding {
            state.payload.extend_from_slice(&data);
        }

        let mut message = None;
        if state.received >= state.length {
            if state.discarding {
                error = error.or(Some(FramingError::MessageTooLarge {
                    csid: chunk.csid,
                    length: state.length,
                }));
            } else {
                message = Some(RtmpChunk {
                    csid: chunk.csid,
                    timestamp: state.timestamp,
                    message_type: state.type_id,
                    stream_id: state.stream_id,
                    payload: std::mem::take(&mut state.payload).freeze(),
                });
            }
            state.reset_message();
        }

        if let Some(error) = error {
            self.record_framing_error(error);
        }
        message
    }

    fn record_framing_error(&mut self, error: FramingError) {
        self.framing_errors += 1;
        tracing::warn!(error = %error, "Dropping malformed chunk message");
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

enum Peek {
    Incomplete,
    Invalid { consumed: usize, error: FramingError },
    Chunk(PendingChunk),
}

/// Last header written on an outbound chunk stream
#[derive(Debug, Clone, Copy)]
struct OutboundState {
    timestamp: u32,
    length: u32,
    type_id: u8,
    stream_id: u32,
}

/// Outbound chunk stream multiplexer
///
/// Picks the most compact header each message allows and splits payloads at
/// the encoder's chunk size with format 3 continuation chunks.
#[derive(Debug)]
pub struct ChunkEncoder {
    chunk_size: u32,
    streams: HashMap<u32, OutboundState>,
}

impl ChunkEncoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
        }
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Change the outbound chunk size
    ///
    /// The peer must be told with a Set Chunk Size message sent before any
    /// chunk that uses the new size.
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    /// Append the chunks for `message` to `out`
    pub fn encode(&mut self, message: &RtmpChunk, out: &mut BytesMut) {
        let length = message.payload.len() as u32;
        let header = match self.streams.get(&message.csid) {
            Some(prev)
                if prev.stream_id == message.stream_id && message.timestamp >= prev.timestamp =>
            {
                let delta = message.timestamp - prev.timestamp;
                if prev.length == length && prev.type_id == message.message_type {
                    MessageHeader::Delta { delta }
                } else {
                    MessageHeader::SameStream {
                        delta,
                        length,
                        type_id: message.message_type,
                    }
                }
            }
            _ => MessageHeader::Full {
                timestamp: message.timestamp,
                length,
                type_id: message.message_type,
                stream_id: message.stream_id,
            },
        };

        let extended = match header {
            MessageHeader::Full { timestamp, .. } if header.is_extended() => Some(timestamp),
            MessageHeader::SameStream { delta, .. } | MessageHeader::Delta { delta }
                if header.is_extended() =>
            {
                Some(delta)
            }
            _ => None,
        };

        let chunk_size = self.chunk_size as usize;
        out.reserve(message.payload.len() + 16);

        BasicHeader::new(header.fmt(), message.csid).encode(out);
        header.encode(out, None);

        let mut chunks = message.payload.chunks(chunk_size);
        if let Some(first) = chunks.next() {
            out.extend_from_slice(first);
        }
        for piece in chunks {
            BasicHeader::new(FMT_CONTINUATION, message.csid).encode(out);
            MessageHeader::Continuation.encode(out, extended);
            out.extend_from_slice(piece);
        }

        self.streams.insert(
            message.csid,
            OutboundState {
                timestamp: message.timestamp,
                length,
                type_id: message.message_type,
                stream_id: message.stream_id,
            },
        );
    }
}

impl Default for ChunkEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn message(csid: u32, timestamp: u32, type_id: u8, len: usize) -> RtmpChunk {
        let payload: Vec<u8> = (0..len).map(|i| (i * 7 % 256) as u8).collect();
        RtmpChunk::new(csid, timestamp, type_id, 1, Bytes::from(payload))
    }

    fn decode_all(decoder: &mut ChunkDecoder, buf: &mut BytesMut) -> Vec<RtmpChunk> {
        let mut out = Vec::new();
        while let Some(msg) = decoder.decode(buf) {
            out.push(msg);
        }
        out
    }

    #[test]
    fn test_single_chunk_message() {
        let mut buf = BytesMut::new();
        // fmt 0, csid 3, ts 0, len 4, type 20, msid 0
        buf.put_slice(&[0x03, 0, 0, 0, 0, 0, 4, 20, 0, 0, 0, 0]);
        buf.put_slice(b"abcd");

        let mut decoder = ChunkDecoder::new();
        let msg = decoder.decode(&mut buf).unwrap();
        assert_eq!(msg.csid, 3);
        assert_eq!(msg.message_type, 20);
        assert_eq!(msg.stream_id, 0);
        assert_eq!(&msg.payload[..], b"abcd");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_message_split_across_chunks() {
        let original = message(6, 40, 9, 300);
        let mut encoder = ChunkEncoder::new();
        let mut wire = BytesMut::new();
        encoder.encode(&original, &mut wire);

        // 12 header + 128 + 1 + 128 + 1 + 44
        assert_eq!(wire.len(), 12 + 300 + 2);

        let mut decoder = ChunkDecoder::new();
        let decoded = decode_all(&mut decoder, &mut wire);
        assert_eq!(decoded, vec![original]);
    }

    #[test]
    fn test_round_trip_under_any_fragmentation() {
        let messages = vec![
            message(3, 0, 20, 90),
            message(6, 0, 9, 1000),
            message(4, 0, 8, 200),
            message(6, 33, 9, 1000),
            message(6, 66, 9, 17),
            message(4, 23, 8, 200),
            message(5, 70, 18, 0),
            message(400, 80, 9, 129),
        ];

        let mut encoder = ChunkEncoder::new();
        let mut wire = BytesMut::new();
        for m in &messages {
            encoder.encode(m, &mut wire);
        }
        let wire = wire.freeze();

        for step in [1usize, 2, 3, 7, 11, 64, 129, 4096] {
            let mut decoder = ChunkDecoder::new();
            let mut buf = BytesMut::new();
            let mut decoded = Vec::new();
            for piece in wire.chunks(step) {
                buf.extend_from_slice(piece);
                decoded.extend(decode_all(&mut decoder, &mut buf));
            }
            assert_eq!(decoded, messages, "read size {}", step);
            assert_eq!(decoder.framing_errors(), 0);
        }
    }

    #[test]
    fn test_interleaved_chunk_streams() {
        let mut buf = BytesMut::new();
        // Video (csid 6) 200 bytes starts, audio (csid 4) whole message, video finishes
        buf.put_slice(&[0x06, 0, 0, 10, 0, 0, 200, 9, 1, 0, 0, 0]);
        buf.put_slice(&[0xAA; 128]);
        buf.put_slice(&[0x04, 0, 0, 10, 0, 0, 3, 8, 1, 0, 0, 0]);
        buf.put_slice(&[0xBB; 3]);
        buf.put_slice(&[0xC6]);
        buf.put_slice(&[0xAA; 72]);

        let mut decoder = ChunkDecoder::new();
        let out = decode_all(&mut decoder, &mut buf);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].message_type, 8);
        assert_eq!(out[0].payload.len(), 3);
        assert_eq!(out[1].message_type, 9);
        assert_eq!(out[1].payload.len(), 200);
        assert_eq!(out[1].timestamp, 10);
    }

    #[test]
    fn test_compressed_headers_inherit_fields() {
        let mut buf = BytesMut::new();
        // fmt 0: ts 100, len 2, type 8, msid 1
        buf.put_slice(&[0x04, 0, 0, 100, 0, 0, 2, 8, 1, 0, 0, 0, 1, 2]);
        // fmt 1: delta 20, len 3, type 8
        buf.put_slice(&[0x44, 0, 0, 20, 0, 0, 3, 8, 3, 4, 5]);
        // fmt 2: delta 25
        buf.put_slice(&[0x84, 0, 0, 25, 6, 7, 8]);
        // fmt 3 new message: re-applies delta 25
        buf.put_slice(&[0xC4, 9, 10, 11]);

        let mut decoder = ChunkDecoder::new();
        let out = decode_all(&mut decoder, &mut buf);
        let timestamps: Vec<u32> = out.iter().map(|m| m.timestamp).collect();
        assert_eq!(timestamps, vec![100, 120, 145, 170]);
        assert!(out.iter().all(|m| m.stream_id == 1 && m.message_type == 8));
        assert_eq!(&out[3].payload[..], &[9, 10, 11]);
    }

    #[test]
    fn test_fmt3_after_fmt0_uses_absolute_timestamp_as_delta() {
        let mut buf = BytesMut::new();
        buf.put_slice(&[0x04, 0, 0, 40, 0, 0, 1, 8, 1, 0, 0, 0, 0xAF]);
        buf.put_slice(&[0xC4, 0xAE]);

        let mut decoder = ChunkDecoder::new();
        let out = decode_all(&mut decoder, &mut buf);
        assert_eq!(out[1].timestamp, 80);
    }

    #[test]
    fn test_extended_timestamp_round_trip() {
        let messages = vec![
            message(6, 0x0100_0000, 9, 300),
            message(6, 0x0100_0021, 9, 300),
            message(4, 0xFFFF_FFF0, 8, 10),
        ];
        let mut encoder = ChunkEncoder::new();
        let mut wire = BytesMut::new();
        for m in &messages {
            encoder.encode(m, &mut wire);
        }

        let mut decoder = ChunkDecoder::new();
        assert_eq!(decode_all(&mut decoder, &mut wire), messages);
    }

    #[test]
    fn test_timestamp_delta_wraps() {
        let mut buf = BytesMut::new();
        buf.put_slice(&[0x04, 0xFF, 0xFF, 0xFF, 0, 0, 1, 8, 1, 0, 0, 0]);
        buf.put_u32(0xFFFF_FFF0);
        buf.put_u8(1);
        buf.put_slice(&[0x84, 0, 0, 0x20, 2]);

        let mut decoder = ChunkDecoder::new();
        let out = decode_all(&mut decoder, &mut buf);
        assert_eq!(out[0].timestamp, 0xFFFF_FFF0);
        assert_eq!(out[1].timestamp, 0x10);
    }

    #[test]
    fn test_set_chunk_size_applies_to_following_chunks() {
        let original = message(6, 0, 9, 5000);
        let mut encoder = ChunkEncoder::new();
        encoder.set_chunk_size(4096);
        let mut wire = BytesMut::new();
        encoder.encode(&original, &mut wire);

        let mut decoder = ChunkDecoder::new();
        decoder.set_chunk_size(4096);
        assert_eq!(decode_all(&mut decoder, &mut wire), vec![original]);
    }

    #[test]
    fn test_missing_base_header_is_skipped() {
        let mut buf = BytesMut::new();
        // fmt 2 on an unknown chunk stream
        buf.put_slice(&[0x87, 0, 0, 5]);
        buf.put_slice(&[0x03, 0, 0, 0, 0, 0, 2, 20, 0, 0, 0, 0, 0xAB, 0xCD]);

        let mut decoder = ChunkDecoder::new();
        let out = decode_all(&mut decoder, &mut buf);
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0].payload[..], &[0xAB, 0xCD]);
        assert_eq!(decoder.framing_errors(), 1);
    }

    #[test]
    fn test_interrupted_message_is_dropped() {
        let mut buf = BytesMut::new();
        // 200-byte message, only the first chunk arrives
        buf.put_slice(&[0x06, 0, 0, 0, 0, 0, 200, 9, 1, 0, 0, 0]);
        buf.put_slice(&[0x11; 128]);
        // New fmt 1 header on the same csid before completion
        buf.put_slice(&[0x46, 0, 0, 33, 0, 0, 4, 9, 1, 2, 3, 4]);

        let mut decoder = ChunkDecoder::new();
        let out = decode_all(&mut decoder, &mut buf);
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0].payload[..], &[1, 2, 3, 4]);
        assert_eq!(out[0].timestamp, 33);
        assert_eq!(decoder.framing_errors(), 1);
    }

    #[test]
    fn test_oversized_message_is_skipped() {
        let mut encoder = ChunkEncoder::new();
        let mut wire = BytesMut::new();
        encoder.encode(&message(6, 0, 9, 600), &mut wire);
        encoder.encode(&message(3, 0, 20, 10), &mut wire);

        let mut decoder = ChunkDecoder::new().with_max_message_size(512);
        let out = decode_all(&mut decoder, &mut wire);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].csid, 3);
        assert_eq!(decoder.framing_errors(), 1);
    }

    #[test]
    fn test_abort_discards_partial_message() {
        let mut buf = BytesMut::new();
        buf.put_slice(&[0x06, 0, 0, 0, 0, 0, 200, 9, 1, 0, 0, 0]);
        buf.put_slice(&[0x11; 128]);

        let mut decoder = ChunkDecoder::new();
        assert!(decoder.decode(&mut buf).is_none());
        decoder.abort(6);

        // A format 3 chunk now starts a fresh 200-byte message
        buf.put_slice(&[0xC6]);
        buf.put_slice(&[0x22; 128]);
        buf.put_slice(&[0xC6]);
        buf.put_slice(&[0x22; 72]);
        let out = decode_all(&mut decoder, &mut buf);
        assert_eq!(out.len(), 1);
        assert!(out[0].payload.iter().all(|&b| b == 0x22));
    }

    #[test]
    fn test_zero_length_message() {
        let mut buf = BytesMut::new();
        buf.put_slice(&[0x03, 0, 0, 0, 0, 0, 0, 20, 0, 0, 0, 0]);
        let mut decoder = ChunkDecoder::new();
        let msg = decoder.decode(&mut buf).unwrap();
        assert!(msg.payload.is_empty());
    }

    #[test]
    fn test_encoder_header_compression() {
        let mut encoder = ChunkEncoder::new();
        let mut wire = BytesMut::new();

        encoder.encode(&message(4, 0, 8, 10), &mut wire);
        assert_eq!(wire[0] >> 6, 0);
        wire.clear();

        encoder.encode(&message(4, 23, 8, 10), &mut wire);
        assert_eq!(wire[0] >> 6, 2);
        wire.clear();

        encoder.encode(&message(4, 46, 8, 12), &mut wire);
        assert_eq!(wire[0] >> 6, 1);
        wire.clear();

        // Going backwards in time needs an absolute timestamp
        encoder.encode(&message(4, 10, 8, 12), &mut wire);
        assert_eq!(wire[0] >> 6, 0);
    }
}
