//! Session state machine
//!
//! Tracks the overall state of an RTMP session from connection to disconnection.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use super::stream::StreamState;
use crate::protocol::constants::{DEFAULT_CHUNK_SIZE, DEFAULT_WINDOW_ACK_SIZE};
use crate::protocol::message::ConnectParams;
use crate::registry::{StreamKey, SubscriberId};

/// Message streams one connection may hold at a time
pub const MAX_MESSAGE_STREAMS: usize = 16;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Handshake in progress
    Handshaking,
    /// Handshake complete, waiting for connect command
    WaitingConnect,
    /// Connect command received and accepted
    Active,
    /// Session is closing
    Closing,
}

/// What this connection does in the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRole {
    Publisher {
        key: StreamKey,
        stream_id: u32,
    },
    Subscriber {
        key: StreamKey,
        stream_id: u32,
        subscriber_id: SubscriberId,
    },
}

impl SessionRole {
    pub fn key(&self) -> &StreamKey {
        match self {
            SessionRole::Publisher { key, .. } | SessionRole::Subscriber { key, .. } => key,
        }
    }

    pub fn stream_id(&self) -> u32 {
        match self {
            SessionRole::Publisher { stream_id, .. } | SessionRole::Subscriber { stream_id, .. } => {
                *stream_id
            }
        }
    }
}

/// Complete session state
#[derive(Debug)]
pub struct SessionState {
    /// Unique session ID
    pub id: u64,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    /// Current phase
    pub phase: SessionPhase,

    /// Connection start time
    pub connected_at: Instant,

    /// Time when handshake completed
    pub handshake_completed_at: Option<Instant>,

    /// Connect parameters (after connect command)
    pub connect_params: Option<ConnectParams>,

    /// Registry role, at most one per connection
    role: Option<SessionRole>,

    /// Per-stream states (keyed by message stream ID)
    pub streams: HashMap<u32, StreamState>,

    /// Next message stream ID to allocate
    next_stream_id: u32,

    /// Negotiated chunk size (incoming)
    pub in_chunk_size: u32,

    /// Negotiated chunk size (outgoing)
    pub out_chunk_size: u32,

    /// Window acknowledgement size announced by the peer
    pub window_ack_size: u32,

    /// Total bytes received
    pub bytes_received: u64,

    /// Bytes sent
    pub bytes_sent: u64,

    /// Sequence number of the last acknowledgement we sent
    pub last_ack_sequence: u32,
}

impl SessionState {
    /// Create a new session state
    pub fn new(id: u64, peer_addr: SocketAddr) -> Self {
        Self {
            id,
            peer_addr,
            phase: SessionPhase::Handshaking,
            connected_at: Instant::now(),
            handshake_completed_at: None,
            connect_params: None,
            role: None,
            streams: HashMap::new(),
            next_stream_id: 1, // Stream 0 is reserved for NetConnection
            in_chunk_size: DEFAULT_CHUNK_SIZE,
            out_chunk_size: DEFAULT_CHUNK_SIZE,
            window_ack_size: DEFAULT_WINDOW_ACK_SIZE,
            bytes_received: 0,
            bytes_sent: 0,
            last_ack_sequence: 0,
        }
    }

    /// Complete handshake
    pub fn complete_handshake(&mut self) {
        if self.phase == SessionPhase::Handshaking {
            self.phase = SessionPhase::WaitingConnect;
            self.handshake_completed_at = Some(Instant::now());
        }
    }

    /// Handle connect command
    pub fn on_connect(&mut self, params: ConnectParams) {
        self.connect_params = Some(params);
        self.phase = SessionPhase::Active;
    }

    /// Allocate a new message stream ID
    pub fn allocate_stream_id(&mut self) -> u32 {
        let id = self.next_stream_id;
        self.next_stream_id += 1;
        self.streams.insert(id, StreamState::new(id));
        id
    }

    /// Get a stream by ID
    pub fn get_stream(&self, stream_id: u32) -> Option<&StreamState> {
        self.streams.get(&stream_id)
    }

    /// Get a mutable stream by ID
    pub fn get_stream_mut(&mut self, stream_id: u32) -> Option<&mut StreamState> {
        self.streams.get_mut(&stream_id)
    }

    /// Get a mutable stream by ID, creating it for clients that skip `createStream`
    ///
    /// Only `publish` and `play` call this, and each binds the session's
    /// single role, so peers cannot grow the table through it.
    pub fn stream_mut(&mut self, stream_id: u32) -> &mut StreamState {
        self.streams
            .entry(stream_id)
            .or_insert_with(|| StreamState::new(stream_id))
    }

    /// Remove a stream
    pub fn remove_stream(&mut self, stream_id: u32) -> Option<StreamState> {
        self.streams.remove(&stream_id)
    }

    pub fn role(&self) -> Option<&SessionRole> {
        self.role.as_ref()
    }

    pub fn set_role(&mut self, role: SessionRole) {
        self.role = Some(role);
    }

    /// Take the role out so teardown runs once
    pub fn take_role(&mut self) -> Option<SessionRole> {
        self.role.take()
    }

    /// Update bytes received and check if acknowledgement needed
    ///
    /// Sequence numbers are the low 32 bits of the byte count, so the
    /// distance is computed with wrapping arithmetic.
    pub fn add_bytes_received(&mut self, bytes: u64) -> bool {
        self.bytes_received += bytes;

        if self.window_ack_size == 0 {
            return false;
        }
        let delta = (self.bytes_received as u32).wrapping_sub(self.last_ack_sequence);
        delta >= self.window_ack_size
    }

    /// Mark acknowledgement sent; returns the sequence number to send
    pub fn mark_ack_sent(&mut self) -> u32 {
        self.last_ack_sequence = self.bytes_received as u32;
        self.last_ack_sequence
    }

    /// Get session duration
    pub fn duration(&self) -> std::time::Duration {
        self.connected_at.elapsed()
    }

    /// Check if session is active
    pub fn is_active(&self) -> bool {
        self.phase == SessionPhase::Active
    }

    /// Start closing the session
    pub fn close(&mut self) {
        self.phase = SessionPhase::Closing;
    }

    /// Get the application name
    pub fn app(&self) -> &str {
        self.connect_params
            .as_ref()
            .map(|p| p.app.as_str())
            .unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn state() -> SessionState {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1935);
        SessionState::new(1, addr)
    }

    #[test]
    fn test_session_lifecycle() {
        let mut state = state();
        assert_eq!(state.phase, SessionPhase::Handshaking);

        state.complete_handshake();
        assert_eq!(state.phase, SessionPhase::WaitingConnect);
        assert!(state.handshake_completed_at.is_some());

        let params = ConnectParams {
            app: "live".into(),
            ..Default::default()
        };
        state.on_connect(params);
        assert!(state.is_active());
        assert_eq!(state.app(), "live");

        state.close();
        assert_eq!(state.phase, SessionPhase::Closing);
    }

    #[test]
    fn test_stream_allocation() {
        let mut state = state();

        let id1 = state.allocate_stream_id();
        let id2 = state.allocate_stream_id();

        assert_eq!(id1, 1);
        assert_eq!(id2, 2);
        assert!(state.get_stream(1).is_some());
        assert!(state.get_stream(2).is_some());

        // Streams used without createStream are created on demand
        assert!(state.get_stream_mut(7).is_none());
        state.stream_mut(7);
        assert!(state.get_stream_mut(7).is_some());
        assert!(state.remove_stream(7).is_some());
    }

    #[test]
    fn test_role_taken_once() {
        let mut state = state();
        state.set_role(SessionRole::Publisher {
            key: StreamKey::new("live/cam"),
            stream_id: 1,
        });
        assert_eq!(state.role().map(SessionRole::stream_id), Some(1));

        assert!(state.take_role().is_some());
        assert!(state.take_role().is_none());
    }

    #[test]
    fn test_acknowledgement_window() {
        let mut state = state();
        state.window_ack_size = 1000;

        assert!(!state.add_bytes_received(600));
        assert!(state.add_bytes_received(600));
        assert_eq!(state.mark_ack_sent(), 1200);
        assert!(!state.add_bytes_received(999));
        assert!(state.add_bytes_received(1));
    }

    #[test]
    fn test_acknowledgement_wraps() {
        let mut state = state();
        state.window_ack_size = 100;
        state.bytes_received = u32::MAX as u64 - 10;
        state.mark_ack_sent();

        assert!(!state.add_bytes_received(50));
        assert!(state.add_bytes_received(50));
    }
}
