//! Server-side RTMP handshake
//!
//! ```text
//! Client                                   Server
//!   |------- C0 (1 byte: version) --------->|
//!   |------- C1 (1536 bytes: time+random) ->|   AwaitingC0C1
//!   |<------ S0 (1 byte: version) ----------|
//!   |<------ S1 (1536 bytes: time+random) --|
//!   |------- C2 (1536 bytes: echo S1) ----->|   AwaitingC2
//!   |<------ S2 (1536 bytes: echo C1) ------|
//!   |          [Established]                 |
//! ```
//!
//! The engine never reads from a socket itself. The caller appends whatever
//! arrived to a buffer and calls [`HandshakeEngine::process`] until it reports
//! [`HandshakeState::Established`]; bytes beyond the handshake stay in the
//! buffer for the chunk demuxer.
//!
//! Only the "simple" handshake (no HMAC digest) is implemented.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{HandshakeError, Result};
use crate::protocol::constants::{HANDSHAKE_SIZE, RTMP_VERSION};

/// Handshake progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Waiting for the 1537-byte C0+C1
    AwaitingC0C1,
    /// S0+S1 sent, waiting for the 1536-byte C2
    AwaitingC2,
    /// Terminal; everything after this is chunk traffic
    Established,
}

/// Handshake state machine for an accepted connection
#[derive(Debug)]
pub struct HandshakeEngine {
    state: HandshakeState,
    /// Peer's C1, echoed back as S2
    peer_packet: Option<Box<[u8; HANDSHAKE_SIZE]>>,
    /// Our S1, kept so callers can inspect what was sent
    our_packet: Option<Box<[u8; HANDSHAKE_SIZE]>>,
}

impl HandshakeEngine {
    pub fn new() -> Self {
        Self {
            state: HandshakeState::AwaitingC0C1,
            peer_packet: None,
            our_packet: None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn is_established(&self) -> bool {
        self.state == HandshakeState::Established
    }

    /// Bytes required before the next transition
    pub fn bytes_needed(&self) -> usize {
        match self.state {
            HandshakeState::AwaitingC0C1 => 1 + HANDSHAKE_SIZE,
            HandshakeState::AwaitingC2 => HANDSHAKE_SIZE,
            HandshakeState::Established => 0,
        }
    }

    /// Peer's C1 timestamp, once C1 has been received
    pub fn peer_timestamp(&self) -> Option<u32> {
        self.peer_packet
            .as_ref()
            .map(|p| u32::from_be_bytes([p[0], p[1], p[2], p[3]]))
    }

    /// Advance the state machine with buffered input
    ///
    /// Consumes exactly the bytes of one handshake stage when enough are
    /// buffered and returns the bytes to send back. With too little input
    /// nothing is consumed and `Ok(None)` is returned. A bad version byte
    /// fails without producing any response.
    pub fn process(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>> {
        match self.state {
            HandshakeState::AwaitingC0C1 => self.process_c0c1(buf),
            HandshakeState::AwaitingC2 => self.process_c2(buf),
            HandshakeState::Established => Ok(None),
        }
    }

    fn process_c0c1(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>> {
        if buf.is_empty() {
            return Ok(None);
        }

        // Reject as soon as the version byte is visible
        let version = buf[0];
        if version != RTMP_VERSION {
            return Err(HandshakeError::InvalidVersion(version).into());
        }

        if buf.len() < 1 + HANDSHAKE_SIZE {
            return Ok(None);
        }

        buf.advance(1);
        let mut c1 = Box::new([0u8; HANDSHAKE_SIZE]);
        buf.copy_to_slice(&mut c1[..]);

        let s1 = Box::new(generate_packet());

        let mut response = BytesMut::with_capacity(1 + HANDSHAKE_SIZE);
        response.put_u8(RTMP_VERSION);
        response.put_slice(&s1[..]);

        tracing::trace!(
            peer_timestamp = u32::from_be_bytes([c1[0], c1[1], c1[2], c1[3]]),
            "Received C0C1, sending S0S1"
        );

        self.peer_packet = Some(c1);
        self.our_packet = Some(s1);
        self.state = HandshakeState::AwaitingC2;
        Ok(Some(response.freeze()))
    }

    fn process_c2(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>> {
        if buf.len() < HANDSHAKE_SIZE {
            return Ok(None);
        }

        // C2 should echo S1; clients in the wild vary, so it is not verified
        buf.advance(HANDSHAKE_SIZE);

        let s2 = match &self.peer_packet {
            Some(c1) => Bytes::copy_from_slice(&c1[..]),
            None => Bytes::from(vec![0u8; HANDSHAKE_SIZE]),
        };

        self.state = HandshakeState::Established;
        tracing::trace!("Received C2, handshake established");
        Ok(Some(s2))
    }

    /// S1 as sent to the peer
    pub fn server_packet(&self) -> Option<&[u8]> {
        self.our_packet.as_ref().map(|p| &p[..])
    }
}

impl Default for HandshakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Build S1: 4-byte timestamp, 4 zero bytes, 1528 pseudo-random bytes
fn generate_packet() -> [u8; HANDSHAKE_SIZE] {
    let mut packet = [0u8; HANDSHAKE_SIZE];

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let timestamp = now.as_millis() as u32;
    packet[0..4].copy_from_slice(&timestamp.to_be_bytes());

    // LCG filler
    let mut seed = now.as_nanos() as u64 | 1;
    for chunk in packet[8..].chunks_mut(8) {
        seed = seed
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let bytes = seed.to_le_bytes();
        chunk.copy_from_slice(&bytes[..chunk.len()]);
    }

    packet
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn c0c1(version: u8) -> BytesMut {
        let mut buf = BytesMut::with_capacity(1 + HANDSHAKE_SIZE);
        buf.put_u8(version);
        buf.put_u32(0x0102_0304);
        buf.put_u32(0);
        for i in 0..(HANDSHAKE_SIZE - 8) {
            buf.put_u8((i % 251) as u8);
        }
        buf
    }

    #[test]
    fn test_full_exchange() {
        let mut engine = HandshakeEngine::new();
        assert_eq!(engine.state(), HandshakeState::AwaitingC0C1);

        let mut input = c0c1(3);
        let c1 = input[1..].to_vec();

        let s0s1 = engine.process(&mut input).unwrap().expect("S0S1");
        assert_eq!(s0s1.len(), 1 + HANDSHAKE_SIZE);
        assert_eq!(s0s1[0], RTMP_VERSION);
        assert_eq!(&s0s1[5..9], &[0, 0, 0, 0]);
        assert_eq!(engine.state(), HandshakeState::AwaitingC2);
        assert_eq!(engine.peer_timestamp(), Some(0x0102_0304));
        assert!(input.is_empty());

        let mut c2 = BytesMut::from(&s0s1[1..]);
        let s2 = engine.process(&mut c2).unwrap().expect("S2");
        assert_eq!(s2.len(), HANDSHAKE_SIZE);
        assert_eq!(&s2[..], &c1[..]);
        assert!(engine.is_established());
        assert_eq!(engine.bytes_needed(), 0);
    }

    #[test]
    fn test_rejects_bad_version_without_response() {
        let mut engine = HandshakeEngine::new();
        let mut input = c0c1(6);

        let result = engine.process(&mut input);
        assert!(matches!(
            result,
            Err(Error::Handshake(HandshakeError::InvalidVersion(6)))
        ));
        assert_eq!(engine.state(), HandshakeState::AwaitingC0C1);
    }

    #[test]
    fn test_bad_version_detected_on_first_byte() {
        let mut engine = HandshakeEngine::new();
        let mut input = BytesMut::from(&[0x16u8, 0x03, 0x01][..]);
        assert!(engine.process(&mut input).is_err());
    }

    #[test]
    fn test_partial_input_is_buffered() {
        let mut engine = HandshakeEngine::new();
        let full = c0c1(3);

        let mut buf = BytesMut::new();
        for piece in full.chunks(100) {
            assert_eq!(engine.state(), HandshakeState::AwaitingC0C1);
            buf.extend_from_slice(piece);
            if let Some(resp) = engine.process(&mut buf).unwrap() {
                assert_eq!(resp.len(), 1 + HANDSHAKE_SIZE);
            }
        }
        assert_eq!(engine.state(), HandshakeState::AwaitingC2);

        let mut c2 = BytesMut::from(&vec![7u8; HANDSHAKE_SIZE - 1][..]);
        assert!(engine.process(&mut c2).unwrap().is_none());
        assert_eq!(c2.len(), HANDSHAKE_SIZE - 1);

        c2.put_u8(7);
        assert!(engine.process(&mut c2).unwrap().is_some());
        assert!(engine.is_established());
    }

    #[test]
    fn test_trailing_bytes_left_for_demuxer() {
        let mut engine = HandshakeEngine::new();
        let mut buf = c0c1(3);
        engine.process(&mut buf).unwrap();

        buf.extend_from_slice(&[0u8; HANDSHAKE_SIZE]);
        buf.extend_from_slice(&[0x02, 0x00, 0x00]);
        engine.process(&mut buf).unwrap();

        assert!(engine.is_established());
        assert_eq!(&buf[..], &[0x02, 0x00, 0x00]);

        // Established ignores further input
        assert!(engine.process(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_server_packet_layout() {
        let packet = generate_packet();
        assert_eq!(&packet[4..8], &[0, 0, 0, 0]);
        assert!(packet[8..].iter().any(|&b| b != 0));
    }
}
