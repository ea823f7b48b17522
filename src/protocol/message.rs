//! RTMP message classification
//!
//! Turns reassembled chunks into typed messages and back. Control messages
//! (types 1-6) have fixed binary layouts; commands and data messages are
//! AMF0 value sequences. The AMF3 flavoured types 15 and 17 are accepted
//! when their body is AMF0 behind the one-byte format prefix, which is what
//! encoders send in practice.

use bytes::{BufMut, Bytes, BytesMut};

use crate::amf::{amf0, AmfValue};
use crate::error::{ProtocolError, Result};
use crate::protocol::chunk::RtmpChunk;
use crate::protocol::constants::*;

/// User control event (message type 4)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserControlEvent {
    StreamBegin(u32),
    StreamEof(u32),
    SetBufferLength { stream_id: u32, buffer_ms: u32 },
    PingRequest(u32),
    PingResponse(u32),
    Unknown { event_type: u16, data: Bytes },
}

/// Command message (`connect`, `publish`, `_result`, ...)
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    pub transaction_id: f64,
    /// Command object, `Null` for most stream commands
    pub command_object: AmfValue,
    pub arguments: Vec<AmfValue>,
    /// Message stream the command arrived on
    pub stream_id: u32,
}

impl Command {
    pub fn new(name: impl Into<String>, transaction_id: f64) -> Self {
        Self {
            name: name.into(),
            transaction_id,
            command_object: AmfValue::Null,
            arguments: Vec::new(),
            stream_id: 0,
        }
    }

    /// `_result` reply to a transaction
    pub fn result(transaction_id: f64, properties: AmfValue, info: AmfValue) -> Self {
        Self {
            name: CMD_RESULT.to_string(),
            transaction_id,
            command_object: properties,
            arguments: vec![info],
            stream_id: 0,
        }
    }

    /// `_error` reply to a transaction
    pub fn error(transaction_id: f64, properties: AmfValue, info: AmfValue) -> Self {
        Self {
            name: CMD_ERROR.to_string(),
            transaction_id,
            command_object: properties,
            arguments: vec![info],
            stream_id: 0,
        }
    }

    /// `onStatus` notification on a message stream
    pub fn on_status(stream_id: u32, level: &str, code: &str, description: &str) -> Self {
        Self {
            name: CMD_ON_STATUS.to_string(),
            transaction_id: 0.0,
            command_object: AmfValue::Null,
            arguments: vec![AmfValue::object([
                ("level", AmfValue::from(level)),
                ("code", AmfValue::from(code)),
                ("description", AmfValue::from(description)),
            ])],
            stream_id,
        }
    }

    /// First argument as a string, e.g. the stream name of `publish`/`play`
    pub fn first_string_arg(&self) -> Option<&str> {
        self.arguments.first().and_then(AmfValue::as_str)
    }

    /// `code` of an `onStatus` info object
    pub fn status_code(&self) -> Option<&str> {
        self.arguments.first().and_then(|info| info.get_string("code"))
    }

    fn decode(payload: &[u8], stream_id: u32) -> Result<Self> {
        let mut values = amf0::decode_all(payload)?.into_iter();

        let name = match values.next() {
            Some(AmfValue::String(name)) => name,
            Some(other) => {
                return Err(ProtocolError::InvalidCommand(format!(
                    "command name is {:?}",
                    other
                ))
                .into())
            }
            None => return Err(ProtocolError::InvalidCommand("empty command".into()).into()),
        };
        let transaction_id = values.next().and_then(|v| v.as_number()).unwrap_or(0.0);
        let command_object = values.next().unwrap_or(AmfValue::Null);

        Ok(Self {
            name,
            transaction_id,
            command_object,
            arguments: values.collect(),
            stream_id,
        })
    }

    fn encode(&self) -> Bytes {
        let mut encoder = amf0::Amf0Encoder::new();
        encoder.encode(&AmfValue::String(self.name.clone()));
        encoder.encode(&AmfValue::Number(self.transaction_id));
        encoder.encode(&self.command_object);
        for arg in &self.arguments {
            encoder.encode(arg);
        }
        encoder.finish()
    }
}

/// Data message (`@setDataFrame`, `onMetaData`)
#[derive(Debug, Clone, PartialEq)]
pub struct DataMessage {
    /// Handler name, the leading string value
    pub name: String,
    pub values: Vec<AmfValue>,
    pub stream_id: u32,
}

impl DataMessage {
    /// `onMetaData` carrying `properties`
    pub fn on_metadata(stream_id: u32, properties: AmfValue) -> Self {
        Self {
            name: DATA_ON_METADATA.to_string(),
            values: vec![properties],
            stream_id,
        }
    }

    /// Metadata properties, unwrapping `@setDataFrame("onMetaData", ...)`
    pub fn metadata(&self) -> Option<&AmfValue> {
        match self.name.as_str() {
            DATA_ON_METADATA => self.values.first(),
            DATA_SET_DATA_FRAME => match self.values.first() {
                Some(AmfValue::String(inner)) if inner == DATA_ON_METADATA => self.values.get(1),
                _ => None,
            },
            _ => None,
        }
    }

    fn decode(payload: &[u8], stream_id: u32) -> Result<Self> {
        let mut values = amf0::decode_all(payload)?.into_iter();
        let name = match values.next() {
            Some(AmfValue::String(name)) => name,
            _ => String::new(),
        };
        Ok(Self {
            name,
            values: values.collect(),
            stream_id,
        })
    }

    fn encode(&self) -> Bytes {
        let mut encoder = amf0::Amf0Encoder::new();
        encoder.encode(&AmfValue::String(self.name.clone()));
        for value in &self.values {
            encoder.encode(value);
        }
        encoder.finish()
    }
}

/// Fields of the `connect` command object the relay uses
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectParams {
    pub app: String,
    pub tc_url: Option<String>,
    pub flash_ver: Option<String>,
    pub object_encoding: f64,
}

impl ConnectParams {
    pub fn from_amf(obj: &AmfValue) -> Self {
        Self {
            app: obj.get_string("app").unwrap_or_default().to_string(),
            tc_url: obj.get_string("tcUrl").map(str::to_string),
            flash_ver: obj.get_string("flashVer").map(str::to_string),
            object_encoding: obj.get_number("objectEncoding").unwrap_or(0.0),
        }
    }
}

/// A classified RTMP message
#[derive(Debug, Clone, PartialEq)]
pub enum RtmpMessage {
    SetChunkSize(u32),
    Abort { csid: u32 },
    Acknowledgement { sequence: u32 },
    UserControl(UserControlEvent),
    WindowAckSize(u32),
    SetPeerBandwidth { size: u32, limit_type: u8 },
    Audio { timestamp: u32, data: Bytes },
    Video { timestamp: u32, data: Bytes },
    Command(Command),
    Data(DataMessage),
    /// Anything else (shared objects, aggregates), passed through untouched
    Unknown { type_id: u8, payload: Bytes },
}

impl RtmpMessage {
    /// Classify a reassembled message
    pub fn from_chunk(chunk: &RtmpChunk) -> Result<Self> {
        let payload = &chunk.payload;
        let type_id = chunk.message_type;

        let message = match type_id {
            MSG_SET_CHUNK_SIZE => RtmpMessage::SetChunkSize(read_u32(type_id, payload, 0)? & 0x7FFF_FFFF),
            MSG_ABORT => RtmpMessage::Abort {
                csid: read_u32(type_id, payload, 0)?,
            },
            MSG_ACKNOWLEDGEMENT => RtmpMessage::Acknowledgement {
                sequence: read_u32(type_id, payload, 0)?,
            },
            MSG_USER_CONTROL => RtmpMessage::UserControl(decode_user_control(payload)?),
            MSG_WINDOW_ACK_SIZE => RtmpMessage::WindowAckSize(read_u32(type_id, payload, 0)?),
            MSG_SET_PEER_BANDWIDTH => {
                if payload.len() < 5 {
                    return Err(short(type_id, payload));
                }
                RtmpMessage::SetPeerBandwidth {
                    size: read_u32(type_id, payload, 0)?,
                    limit_type: payload[4],
                }
            }
            MSG_AUDIO => RtmpMessage::Audio {
                timestamp: chunk.timestamp,
                data: payload.clone(),
            },
            MSG_VIDEO => RtmpMessage::Video {
                timestamp: chunk.timestamp,
                data: payload.clone(),
            },
            MSG_COMMAND_AMF0 => RtmpMessage::Command(Command::decode(payload, chunk.stream_id)?),
            MSG_COMMAND_AMF3 => {
                RtmpMessage::Command(Command::decode(skip_format_byte(payload), chunk.stream_id)?)
            }
            MSG_DATA_AMF0 => RtmpMessage::Data(DataMessage::decode(payload, chunk.stream_id)?),
            MSG_DATA_AMF3 => {
                RtmpMessage::Data(DataMessage::decode(skip_format_byte(payload), chunk.stream_id)?)
            }
            _ => RtmpMessage::Unknown {
                type_id,
                payload: payload.clone(),
            },
        };

        Ok(message)
    }

    /// Message type id and payload for sending
    pub fn encode(&self) -> (u8, Bytes) {
        match self {
            RtmpMessage::SetChunkSize(size) => (MSG_SET_CHUNK_SIZE, u32_payload(size & 0x7FFF_FFFF)),
            RtmpMessage::Abort { csid } => (MSG_ABORT, u32_payload(*csid)),
            RtmpMessage::Acknowledgement { sequence } => (MSG_ACKNOWLEDGEMENT, u32_payload(*sequence)),
            RtmpMessage::UserControl(event) => (MSG_USER_CONTROL, encode_user_control(event)),
            RtmpMessage::WindowAckSize(size) => (MSG_WINDOW_ACK_SIZE, u32_payload(*size)),
            RtmpMessage::SetPeerBandwidth { size, limit_type } => {
                let mut buf = BytesMut::with_capacity(5);
                buf.put_u32(*size);
                buf.put_u8(*limit_type);
                (MSG_SET_PEER_BANDWIDTH, buf.freeze())
            }
            RtmpMessage::Audio { data, .. } => (MSG_AUDIO, data.clone()),
            RtmpMessage::Video { data, .. } => (MSG_VIDEO, data.clone()),
            RtmpMessage::Command(cmd) => (MSG_COMMAND_AMF0, cmd.encode()),
            RtmpMessage::Data(data) => (MSG_DATA_AMF0, data.encode()),
            RtmpMessage::Unknown { type_id, payload } => (*type_id, payload.clone()),
        }
    }
}

fn short(type_id: u8, payload: &[u8]) -> crate::error::Error {
    ProtocolError::ShortPayload {
        type_id,
        len: payload.len(),
    }
    .into()
}

fn read_u32(type_id: u8, payload: &[u8], offset: usize) -> Result<u32> {
    payload
        .get(offset..offset + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| short(type_id, payload))
}

fn u32_payload(value: u32) -> Bytes {
    Bytes::copy_from_slice(&value.to_be_bytes())
}

/// AMF3 command/data bodies start with a format byte (0 = AMF0 follows)
fn skip_format_byte(payload: &[u8]) -> &[u8] {
    match payload.first() {
        Some(0x00) => &payload[1..],
        _ => payload,
    }
}

fn decode_user_control(payload: &[u8]) -> Result<UserControlEvent> {
    if payload.len() < 2 {
        return Err(short(MSG_USER_CONTROL, payload));
    }
    let event_type = u16::from_be_bytes([payload[0], payload[1]]);
    let value = |offset| read_u32(MSG_USER_CONTROL, payload, offset);

    let event = match event_type {
        UC_STREAM_BEGIN => UserControlEvent::StreamBegin(value(2)?),
        UC_STREAM_EOF => UserControlEvent::StreamEof(value(2)?),
        UC_SET_BUFFER_LENGTH => UserControlEvent::SetBufferLength {
            stream_id: value(2)?,
            buffer_ms: value(6)?,
        },
        UC_PING_REQUEST => UserControlEvent::PingRequest(value(2)?),
        UC_PING_RESPONSE => UserControlEvent::PingResponse(value(2)?),
        _ => UserControlEvent::Unknown {
            event_type,
            data: Bytes::copy_from_slice(&payload[2..]),
        },
    };
    Ok(event)
}

fn encode_user_control(event: &UserControlEvent) -> Bytes {
    let mut buf = BytesMut::with_capacity(10);
    match event {
        UserControlEvent::StreamBegin(id) => {
            buf.put_u16(UC_STREAM_BEGIN);
            buf.put_u32(*id);
        }
        UserControlEvent::StreamEof(id) => {
            buf.put_u16(UC_STREAM_EOF);
            buf.put_u32(*id);
        }
        UserControlEvent::SetBufferLength {
            stream_id,
            buffer_ms,
        } => {
            buf.put_u16(UC_SET_BUFFER_LENGTH);
            buf.put_u32(*stream_id);
            buf.put_u32(*buffer_ms);
        }
        UserControlEvent::PingRequest(ts) => {
            buf.put_u16(UC_PING_REQUEST);
            buf.put_u32(*ts);
        }
        UserControlEvent::PingResponse(ts) => {
            buf.put_u16(UC_PING_RESPONSE);
            buf.put_u32(*ts);
        }
        UserControlEvent::Unknown { event_type, data } => {
            buf.put_u16(*event_type);
            buf.put_slice(data);
        }
    }
    buf.freeze()
}
