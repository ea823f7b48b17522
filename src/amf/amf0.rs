//! AMF0 encoder and decoder
//!
//! Type markers understood:
//! ```text
//! 0x00 Number      0x05 Null         0x0A Strict Array
//! 0x01 Boolean     0x06 Undefined    0x0B Date
//! 0x02 String      0x08 ECMA Array   0x0C Long String
//! 0x03 Object      0x09 Object End   0x10 Typed Object (class name dropped)
//! ```
//!
//! Decoding is lenient where encoders in the wild are sloppy: an object or
//! ECMA array that runs into the end of the buffer without an end marker is
//! returned with the properties read so far.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use super::value::AmfValue;
use crate::error::AmfError;

const MARKER_NUMBER: u8 = 0x00;
const MARKER_BOOLEAN: u8 = 0x01;
const MARKER_STRING: u8 = 0x02;
const MARKER_OBJECT: u8 = 0x03;
const MARKER_NULL: u8 = 0x05;
const MARKER_UNDEFINED: u8 = 0x06;
const MARKER_ECMA_ARRAY: u8 = 0x08;
const MARKER_OBJECT_END: u8 = 0x09;
const MARKER_STRICT_ARRAY: u8 = 0x0A;
const MARKER_DATE: u8 = 0x0B;
const MARKER_LONG_STRING: u8 = 0x0C;
const MARKER_TYPED_OBJECT: u8 = 0x10;

/// Objects nested deeper than this are rejected
const MAX_NESTING_DEPTH: usize = 64;

/// AMF0 decoder
#[derive(Debug, Default)]
pub struct Amf0Decoder {
    depth: usize,
}

impl Amf0Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one value from the front of `buf`
    pub fn decode(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        if !buf.has_remaining() {
            return Err(AmfError::UnexpectedEof);
        }
        let marker = buf.get_u8();
        self.decode_value(marker, buf)
    }

    /// Decode values until `buf` is exhausted
    pub fn decode_all(&mut self, buf: &mut Bytes) -> Result<Vec<AmfValue>, AmfError> {
        let mut values = Vec::new();
        while buf.has_remaining() {
            values.push(self.decode(buf)?);
        }
        Ok(values)
    }

    fn decode_value(&mut self, marker: u8, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        match marker {
            MARKER_NUMBER => {
                need(buf, 8)?;
                Ok(AmfValue::Number(buf.get_f64()))
            }
            MARKER_BOOLEAN => {
                need(buf, 1)?;
                Ok(AmfValue::Boolean(buf.get_u8() != 0))
            }
            MARKER_STRING => Ok(AmfValue::String(read_utf8(buf)?)),
            MARKER_LONG_STRING => Ok(AmfValue::String(read_utf8_long(buf)?)),
            MARKER_OBJECT => Ok(AmfValue::Object(self.decode_properties(buf)?)),
            MARKER_TYPED_OBJECT => {
                let _class_name = read_utf8(buf)?;
                Ok(AmfValue::Object(self.decode_properties(buf)?))
            }
            MARKER_NULL => Ok(AmfValue::Null),
            MARKER_UNDEFINED => Ok(AmfValue::Undefined),
            MARKER_ECMA_ARRAY => {
                // The count is advisory; entries run until the end marker
                need(buf, 4)?;
                let _count = buf.get_u32();
                Ok(AmfValue::EcmaArray(self.decode_properties(buf)?))
            }
            MARKER_STRICT_ARRAY => {
                need(buf, 4)?;
                let count = buf.get_u32() as usize;
                self.enter()?;
                let mut items = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    items.push(self.decode(buf)?);
                }
                self.depth -= 1;
                Ok(AmfValue::Array(items))
            }
            MARKER_DATE => {
                need(buf, 10)?;
                let millis = buf.get_f64();
                let _timezone = buf.get_i16();
                Ok(AmfValue::Date(millis))
            }
            other => Err(AmfError::UnknownMarker(other)),
        }
    }

    fn decode_properties(&mut self, buf: &mut Bytes) -> Result<HashMap<String, AmfValue>, AmfError> {
        self.enter()?;
        let mut props = HashMap::new();

        loop {
            if buf.remaining() < 2 {
                // Missing end marker at end of buffer
                break;
            }
            let key = read_utf8(buf)?;
            if key.is_empty() {
                if buf.has_remaining() && buf[0] == MARKER_OBJECT_END {
                    buf.advance(1);
                }
                break;
            }
            if !buf.has_remaining() {
                break;
            }
            let value = self.decode(buf)?;
            props.insert(key, value);
        }

        self.depth -= 1;
        Ok(props)
    }

    fn enter(&mut self) -> Result<(), AmfError> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            self.depth -= 1;
            return Err(AmfError::NestingTooDeep);
        }
        Ok(())
    }
}

fn need(buf: &Bytes, n: usize) -> Result<(), AmfError> {
    if buf.remaining() < n {
        Err(AmfError::UnexpectedEof)
    } else {
        Ok(())
    }
}

fn read_utf8(buf: &mut Bytes) -> Result<String, AmfError> {
    need(buf, 2)?;
    let len = buf.get_u16() as usize;
    read_utf8_bytes(buf, len)
}

fn read_utf8_long(buf: &mut Bytes) -> Result<String, AmfError> {
    need(buf, 4)?;
    let len = buf.get_u32() as usize;
    read_utf8_bytes(buf, len)
}

fn read_utf8_bytes(buf: &mut Bytes, len: usize) -> Result<String, AmfError> {
    need(buf, len)?;
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| AmfError::InvalidUtf8)
}

/// AMF0 encoder
#[derive(Debug)]
pub struct Amf0Encoder {
    buf: BytesMut,
}

impl Amf0Encoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
        }
    }

    /// Take the encoded bytes, leaving the encoder empty
    pub fn finish(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    pub fn encode(&mut self, value: &AmfValue) {
        match value {
            AmfValue::Number(n) => {
                self.buf.put_u8(MARKER_NUMBER);
                self.buf.put_f64(*n);
            }
            AmfValue::Boolean(b) => {
                self.buf.put_u8(MARKER_BOOLEAN);
                self.buf.put_u8(*b as u8);
            }
            AmfValue::String(s) => {
                if s.len() > u16::MAX as usize {
                    self.buf.put_u8(MARKER_LONG_STRING);
                    self.buf.put_u32(s.len() as u32);
                    self.buf.put_slice(s.as_bytes());
                } else {
                    self.buf.put_u8(MARKER_STRING);
                    self.write_utf8(s);
                }
            }
            AmfValue::Object(props) => {
                self.buf.put_u8(MARKER_OBJECT);
                self.write_properties(props);
            }
            AmfValue::Null => self.buf.put_u8(MARKER_NULL),
            AmfValue::Undefined => self.buf.put_u8(MARKER_UNDEFINED),
            AmfValue::EcmaArray(props) => {
                self.buf.put_u8(MARKER_ECMA_ARRAY);
                self.buf.put_u32(props.len() as u32);
                self.write_properties(props);
            }
            AmfValue::Array(items) => {
                self.buf.put_u8(MARKER_STRICT_ARRAY);
                self.buf.put_u32(items.len() as u32);
                for item in items {
                    self.encode(item);
                }
            }
            AmfValue::Date(millis) => {
                self.buf.put_u8(MARKER_DATE);
                self.buf.put_f64(*millis);
                self.buf.put_i16(0);
            }
        }
    }

    fn write_properties(&mut self, props: &HashMap<String, AmfValue>) {
        for (key, value) in props {
            self.write_utf8(key);
            self.encode(value);
        }
        self.buf.put_u16(0);
        self.buf.put_u8(MARKER_OBJECT_END);
    }

    fn write_utf8(&mut self, s: &str) {
        let bytes = &s.as_bytes()[..s.len().min(u16::MAX as usize)];
        self.buf.put_u16(bytes.len() as u16);
        self.buf.put_slice(bytes);
    }
}

impl Default for Amf0Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a sequence of values back to back
pub fn encode_all(values: &[AmfValue]) -> Bytes {
    let mut encoder = Amf0Encoder::new();
    for value in values {
        encoder.encode(value);
    }
    encoder.finish()
}

/// Decode every value in `data`
pub fn decode_all(data: &[u8]) -> Result<Vec<AmfValue>, AmfError> {
    let mut buf = Bytes::copy_from_slice(data);
    Amf0Decoder::new().decode_all(&mut buf)
}
