//! RTMP wire constants
//!
//! Reference: Adobe RTMP Specification (December 2012)

/// Protocol version carried in C0/S0
pub const RTMP_VERSION: u8 = 3;

/// Default listening port
pub const RTMP_PORT: u16 = 1935;

/// Size of C1/S1/C2/S2
pub const HANDSHAKE_SIZE: usize = 1536;

/// Chunk size every connection starts with
pub const DEFAULT_CHUNK_SIZE: u32 = 128;

/// Chunk size the server announces for its own outbound traffic
pub const RECOMMENDED_CHUNK_SIZE: u32 = 4096;

/// Set Chunk Size values must keep the top bit clear
pub const MAX_CHUNK_SIZE: u32 = 0x7FFF_FFFF;

/// Upper bound on a single reassembled message
pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// A 3-byte timestamp field holding this value means a 4-byte one follows
pub const EXTENDED_TIMESTAMP_THRESHOLD: u32 = 0xFF_FFFF;

pub const DEFAULT_WINDOW_ACK_SIZE: u32 = 2_500_000;
pub const DEFAULT_PEER_BANDWIDTH: u32 = 2_500_000;

// Chunk stream ids used for outbound traffic

pub const CSID_PROTOCOL_CONTROL: u32 = 2;
pub const CSID_COMMAND: u32 = 3;
pub const CSID_AUDIO: u32 = 4;
pub const CSID_DATA: u32 = 5;
pub const CSID_VIDEO: u32 = 6;

// Message type ids

pub const MSG_SET_CHUNK_SIZE: u8 = 1;
pub const MSG_ABORT: u8 = 2;
pub const MSG_ACKNOWLEDGEMENT: u8 = 3;
pub const MSG_USER_CONTROL: u8 = 4;
pub const MSG_WINDOW_ACK_SIZE: u8 = 5;
pub const MSG_SET_PEER_BANDWIDTH: u8 = 6;
pub const MSG_AUDIO: u8 = 8;
pub const MSG_VIDEO: u8 = 9;
pub const MSG_DATA_AMF3: u8 = 15;
pub const MSG_COMMAND_AMF3: u8 = 17;
pub const MSG_DATA_AMF0: u8 = 18;
pub const MSG_COMMAND_AMF0: u8 = 20;

// User control events

pub const UC_STREAM_BEGIN: u16 = 0;
pub const UC_STREAM_EOF: u16 = 1;
pub const UC_SET_BUFFER_LENGTH: u16 = 3;
pub const UC_PING_REQUEST: u16 = 6;
pub const UC_PING_RESPONSE: u16 = 7;

/// Dynamic limit type for Set Peer Bandwidth
pub const BANDWIDTH_LIMIT_DYNAMIC: u8 = 2;

// Command names

pub const CMD_CONNECT: &str = "connect";
pub const CMD_CREATE_STREAM: &str = "createStream";
pub const CMD_RELEASE_STREAM: &str = "releaseStream";
pub const CMD_FC_PUBLISH: &str = "FCPublish";
pub const CMD_FC_UNPUBLISH: &str = "FCUnpublish";
pub const CMD_PUBLISH: &str = "publish";
pub const CMD_PLAY: &str = "play";
pub const CMD_DELETE_STREAM: &str = "deleteStream";
pub const CMD_CLOSE_STREAM: &str = "closeStream";
pub const CMD_RESULT: &str = "_result";
pub const CMD_ERROR: &str = "_error";
pub const CMD_ON_STATUS: &str = "onStatus";

// Data message handlers

pub const DATA_SET_DATA_FRAME: &str = "@setDataFrame";
pub const DATA_ON_METADATA: &str = "onMetaData";

// NetConnection / NetStream status codes

pub const NC_CONNECT_SUCCESS: &str = "NetConnection.Connect.Success";
pub const NC_CALL_FAILED: &str = "NetConnection.Call.Failed";
pub const NS_PUBLISH_START: &str = "NetStream.Publish.Start";
pub const NS_PUBLISH_BAD_NAME: &str = "NetStream.Publish.BadName";
pub const NS_UNPUBLISH_SUCCESS: &str = "NetStream.Unpublish.Success";
pub const NS_PLAY_RESET: &str = "NetStream.Play.Reset";
pub const NS_PLAY_START: &str = "NetStream.Play.Start";
pub const NS_PLAY_STOP: &str = "NetStream.Play.Stop";
pub const NS_PLAY_STREAM_NOT_FOUND: &str = "NetStream.Play.StreamNotFound";
