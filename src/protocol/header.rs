//! Chunk header wire codec
//!
//! Pure encode/decode helpers shared by [`ChunkDecoder`](super::chunk::ChunkDecoder)
//! and [`ChunkEncoder`](super::chunk::ChunkEncoder). Decoders work on a borrowed
//! slice and never consume: they return the decoded value plus its encoded
//! length, or `None` when the slice is too short to tell.
//!
//! ```text
//! Basic header:       +-+-+-+-+-+-+-+-+
//!                     |fmt|   csid    |   csid 0 -> 1 more byte  (+64)
//!                     +-+-+-+-+-+-+-+-+   csid 1 -> 2 more bytes LE (+64)
//!
//! Message header:     fmt 0: timestamp(3) length(3) type(1) stream id(4, LE)
//!                     fmt 1: delta(3) length(3) type(1)
//!                     fmt 2: delta(3)
//!                     fmt 3: -
//! ```
//!
//! A timestamp field of `0xFFFFFF` is followed by a 4-byte extended timestamp.

use bytes::{BufMut, BytesMut};

use crate::protocol::constants::EXTENDED_TIMESTAMP_THRESHOLD;

pub const FMT_FULL: u8 = 0;
pub const FMT_SAME_STREAM: u8 = 1;
pub const FMT_DELTA: u8 = 2;
pub const FMT_CONTINUATION: u8 = 3;

/// Smallest and largest chunk stream ids representable
pub const MIN_CSID: u32 = 2;
pub const MAX_CSID: u32 = 65599;

/// Format selector plus chunk stream id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicHeader {
    pub fmt: u8,
    pub csid: u32,
}

impl BasicHeader {
    pub fn new(fmt: u8, csid: u32) -> Self {
        Self { fmt, csid }
    }

    pub fn decode(buf: &[u8]) -> Option<(Self, usize)> {
        let first = *buf.first()?;
        let fmt = first >> 6;
        match first & 0x3F {
            0 => {
                let b = *buf.get(1)?;
                Some((Self::new(fmt, b as u32 + 64), 2))
            }
            1 => {
                if buf.len() < 3 {
                    return None;
                }
                let id = u16::from_le_bytes([buf[1], buf[2]]) as u32;
                Some((Self::new(fmt, id + 64), 3))
            }
            id => Some((Self::new(fmt, id as u32), 1)),
        }
    }

    /// Write the header; `csid` must lie in `MIN_CSID..=MAX_CSID`
    pub fn encode(&self, out: &mut BytesMut) {
        debug_assert!(
            (MIN_CSID..=MAX_CSID).contains(&self.csid),
            "chunk stream id {} is not encodable",
            self.csid
        );
        let fmt = (self.fmt & 0x03) << 6;
        match self.csid {
            0..=63 => out.put_u8(fmt | self.csid as u8),
            64..=319 => {
                out.put_u8(fmt);
                out.put_u8((self.csid - 64) as u8);
            }
            _ => {
                out.put_u8(fmt | 1);
                out.put_u16_le((self.csid - 64) as u16);
            }
        }
    }

    pub fn encoded_len(csid: u32) -> usize {
        match csid {
            0..=63 => 1,
            64..=319 => 2,
            _ => 3,
        }
    }
}

/// Message header in one of its four compressed forms
///
/// `timestamp` holds the absolute timestamp for format 0 and the delta
/// for formats 1 and 2, always already resolved from the extended field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageHeader {
    Full {
        timestamp: u32,
        length: u32,
        type_id: u8,
        stream_id: u32,
    },
    SameStream {
        delta: u32,
        length: u32,
        type_id: u8,
    },
    Delta {
        delta: u32,
    },
    Continuation,
}

impl MessageHeader {
    pub fn fmt(&self) -> u8 {
        match self {
            MessageHeader::Full { .. } => FMT_FULL,
            MessageHeader::SameStream { .. } => FMT_SAME_STREAM,
            MessageHeader::Delta { .. } => FMT_DELTA,
            MessageHeader::Continuation => FMT_CONTINUATION,
        }
    }

    /// Whether the timestamp field spilled into the extended field
    pub fn is_extended(&self) -> bool {
        match *self {
            MessageHeader::Full { timestamp, .. } => timestamp >= EXTENDED_TIMESTAMP_THRESHOLD,
            MessageHeader::SameStream { delta, .. } | MessageHeader::Delta { delta } => {
                delta >= EXTENDED_TIMESTAMP_THRESHOLD
            }
            MessageHeader::Continuation => false,
        }
    }

    /// Decode the header for `fmt` from the start of `buf`
    ///
    /// `continuation_extended` says whether a format-3 header carries the
    /// repeated extended timestamp of its chunk stream. For format 3 the
    /// returned length includes those 4 bytes when present.
    pub fn decode(fmt: u8, buf: &[u8], continuation_extended: bool) -> Option<(Self, usize)> {
        match fmt {
            FMT_FULL => {
                if buf.len() < 11 {
                    return None;
                }
                let (timestamp, ext) = resolve_timestamp(read_u24(&buf[0..3]), &buf[11..])?;
                let header = MessageHeader::Full {
                    timestamp,
                    length: read_u24(&buf[3..6]),
                    type_id: buf[6],
                    stream_id: u32::from_le_bytes([buf[7], buf[8], buf[9], buf[10]]),
                };
                Some((header, 11 + ext))
            }
            FMT_SAME_STREAM => {
                if buf.len() < 7 {
                    return None;
                }
                let (delta, ext) = resolve_timestamp(read_u24(&buf[0..3]), &buf[7..])?;
                let header = MessageHeader::SameStream {
                    delta,
                    length: read_u24(&buf[3..6]),
                    type_id: buf[6],
                };
                Some((header, 7 + ext))
            }
            FMT_DELTA => {
                if buf.len() < 3 {
                    return None;
                }
                let (delta, ext) = resolve_timestamp(read_u24(&buf[0..3]), &buf[3..])?;
                Some((MessageHeader::Delta { delta }, 3 + ext))
            }
            _ => {
                if continuation_extended {
                    if buf.len() < 4 {
                        return None;
                    }
                    Some((MessageHeader::Continuation, 4))
                } else {
                    Some((MessageHeader::Continuation, 0))
                }
            }
        }
    }

    /// Encode the header; `continuation_extended` carries the chunk stream's
    /// extended timestamp into a format-3 header
    pub fn encode(&self, out: &mut BytesMut, continuation_extended: Option<u32>) {
        match *self {
            MessageHeader::Full {
                timestamp,
                length,
                type_id,
                stream_id,
            } => {
                write_u24(out, timestamp.min(EXTENDED_TIMESTAMP_THRESHOLD));
                write_u24(out, length);
                out.put_u8(type_id);
                out.put_u32_le(stream_id);
                if timestamp >= EXTENDED_TIMESTAMP_THRESHOLD {
                    out.put_u32(timestamp);
                }
            }
            MessageHeader::SameStream {
                delta,
                length,
                type_id,
            } => {
                write_u24(out, delta.min(EXTENDED_TIMESTAMP_THRESHOLD));
                write_u24(out, length);
                out.put_u8(type_id);
                if delta >= EXTENDED_TIMESTAMP_THRESHOLD {
                    out.put_u32(delta);
                }
            }
            MessageHeader::Delta { delta } => {
                write_u24(out, delta.min(EXTENDED_TIMESTAMP_THRESHOLD));
                if delta >= EXTENDED_TIMESTAMP_THRESHOLD {
                    out.put_u32(delta);
                }
            }
            MessageHeader::Continuation => {
                if let Some(ts) = continuation_extended {
                    out.put_u32(ts);
                }
            }
        }
    }
}

/// Returns the effective timestamp and how many extended bytes were used
fn resolve_timestamp(field: u32, rest: &[u8]) -> Option<(u32, usize)> {
    if field < EXTENDED_TIMESTAMP_THRESHOLD {
        return Some((field, 0));
    }
    if rest.len() < 4 {
        return None;
    }
    Some((u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]), 4))
}

#[inline]
pub fn read_u24(b: &[u8]) -> u32 {
    ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | b[2] as u32
}

#[inline]
pub fn write_u24(out: &mut BytesMut, value: u32) {
    out.put_u8((value >> 16) as u8);
    out.put_u8((value >> 8) as u8);
    out.put_u8(value as u8);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_header_one_byte() {
        let (h, n) = BasicHeader::decode(&[0x43]).unwrap();
        assert_eq!(h, BasicHeader::new(1, 3));
        assert_eq!(n, 1);
    }

    #[test]
    fn test_basic_header_two_byte() {
        let (h, n) = BasicHeader::decode(&[0x80, 0x0A]).unwrap();
        assert_eq!(h, BasicHeader::new(2, 74));
        assert_eq!(n, 2);
        assert!(BasicHeader::decode(&[0x80]).is_none());
    }

    #[test]
    fn test_basic_header_three_byte() {
        // 0x0134 + 64 = 372
        let (h, n) = BasicHeader::decode(&[0xC1, 0x34, 0x01]).unwrap();
        assert_eq!(h, BasicHeader::new(3, 372));
        assert_eq!(n, 3);
        assert!(BasicHeader::decode(&[0xC1, 0x34]).is_none());
    }

    #[test]
    fn test_basic_header_encode_matches_decode() {
        for csid in [2u32, 63, 64, 319, 320, MAX_CSID] {
            let mut out = BytesMut::new();
            BasicHeader::new(1, csid).encode(&mut out);
            assert_eq!(out.len(), BasicHeader::encoded_len(csid));
            let (h, n) = BasicHeader::decode(&out).unwrap();
            assert_eq!(h.csid, csid);
            assert_eq!(h.fmt, 1);
            assert_eq!(n, out.len());
        }
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "not encodable")]
    fn test_basic_header_rejects_csid_above_range() {
        BasicHeader::new(0, MAX_CSID + 1).encode(&mut BytesMut::new());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "not encodable")]
    fn test_basic_header_rejects_reserved_csid() {
        BasicHeader::new(0, 1).encode(&mut BytesMut::new());
    }

    #[test]
    fn test_full_header_layout() {
        let header = MessageHeader::Full {
            timestamp: 1000,
            length: 300,
            type_id: 9,
            stream_id: 1,
        };
        let mut out = BytesMut::new();
        header.encode(&mut out, None);
        assert_eq!(
            &out[..],
            &[0x00, 0x03, 0xE8, 0x00, 0x01, 0x2C, 0x09, 0x01, 0x00, 0x00, 0x00]
        );

        let (decoded, n) = MessageHeader::decode(FMT_FULL, &out, false).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(n, 11);
    }

    #[test]
    fn test_extended_timestamp() {
        let header = MessageHeader::Full {
            timestamp: 0x0100_0000,
            length: 5,
            type_id: 8,
            stream_id: 1,
        };
        assert!(header.is_extended());

        let mut out = BytesMut::new();
        header.encode(&mut out, None);
        assert_eq!(out.len(), 15);
        assert_eq!(&out[0..3], &[0xFF, 0xFF, 0xFF]);

        // Missing extended bytes means "not enough data yet"
        assert!(MessageHeader::decode(FMT_FULL, &out[..13], false).is_none());

        let (decoded, n) = MessageHeader::decode(FMT_FULL, &out, false).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(n, 15);
    }

    #[test]
    fn test_continuation_with_extended_timestamp() {
        assert_eq!(
            MessageHeader::decode(FMT_CONTINUATION, &[], false),
            Some((MessageHeader::Continuation, 0))
        );
        assert!(MessageHeader::decode(FMT_CONTINUATION, &[0, 0], true).is_none());
        assert_eq!(
            MessageHeader::decode(FMT_CONTINUATION, &[1, 0, 0, 0], true),
            Some((MessageHeader::Continuation, 4))
        );
    }

    #[test]
    fn test_short_headers() {
        assert!(MessageHeader::decode(FMT_SAME_STREAM, &[0; 6], false).is_none());
        assert!(MessageHeader::decode(FMT_DELTA, &[0; 2], false).is_none());

        let (h, n) = MessageHeader::decode(FMT_DELTA, &[0x00, 0x00, 0x21], false).unwrap();
        assert_eq!(h, MessageHeader::Delta { delta: 33 });
        assert_eq!(n, 3);
    }
}
