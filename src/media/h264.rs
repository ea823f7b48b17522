//! H.264 parameter sets and keyframe detection
//!
//! AVCDecoderConfigurationRecord:
//! ```text
//! configurationVersion (1) | AVCProfileIndication (1) | profile_compatibility (1)
//! | AVCLevelIndication (1) | lengthSizeMinusOne (1, low 2 bits)
//! | numOfSPS (1, low 5 bits) | { spsLength (2) | spsNALUnit }*
//! | numOfPPS (1) | { ppsLength (2) | ppsNALUnit }*
//! ```
//!
//! Records in the wild are often cut short, so parsing stops at the first
//! truncated length prefix and returns what it has with `complete == false`.

use bytes::Bytes;

use crate::error::ConfigParseError;

/// Fixed prefix of the configuration record, up to and including numOfSPS,
/// plus the first byte of the SPS section
const MIN_RECORD_LEN: usize = 7;

/// NAL unit type (low 5 bits of the NAL header byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    Slice,
    Idr,
    Sei,
    Sps,
    Pps,
    Aud,
    Other(u8),
}

impl NaluType {
    pub fn from_byte(b: u8) -> Self {
        match b & 0x1F {
            1 => NaluType::Slice,
            5 => NaluType::Idr,
            6 => NaluType::Sei,
            7 => NaluType::Sps,
            8 => NaluType::Pps,
            9 => NaluType::Aud,
            other => NaluType::Other(other),
        }
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(self, NaluType::Idr)
    }
}

/// Decoded AVC decoder configuration record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoConfig {
    pub version: u8,
    pub profile: u8,
    pub compatibility: u8,
    pub level: u8,
    /// Size in bytes of the NAL unit length prefix in frame payloads (1, 2 or 4)
    pub nalu_length_size: u8,
    pub sps: Vec<Bytes>,
    pub pps: Vec<Bytes>,
    /// False when the record ended before all announced parameter sets
    pub complete: bool,
}

impl VideoConfig {
    /// Human-readable profile name
    pub fn profile_name(&self) -> &'static str {
        match self.profile {
            66 => "Baseline",
            77 => "Main",
            88 => "Extended",
            100 => "High",
            110 => "High 10",
            122 => "High 4:2:2",
            244 => "High 4:4:4",
            _ => "Unknown",
        }
    }

    /// Level as written in codec strings, e.g. 31 -> 3.1
    pub fn level_value(&self) -> f32 {
        self.level as f32 / 10.0
    }
}

/// Parse an AVCDecoderConfigurationRecord
///
/// Only input shorter than the fixed prefix is an error. Truncation inside
/// the SPS or PPS lists yields the parameter sets read so far.
pub fn parse_video_config(data: &Bytes) -> Result<VideoConfig, ConfigParseError> {
    if data.len() < MIN_RECORD_LEN {
        return Err(ConfigParseError::TooShort {
            needed: MIN_RECORD_LEN,
            actual: data.len(),
        });
    }

    let mut config = VideoConfig {
        version: data[0],
        profile: data[1],
        compatibility: data[2],
        level: data[3],
        nalu_length_size: (data[4] & 0x03) + 1,
        ..Default::default()
    };

    let sps_count = (data[5] & 0x1F) as usize;
    let mut pos = 6;

    for _ in 0..sps_count {
        match read_parameter_set(data, pos) {
            Some((set, next)) => {
                config.sps.push(set);
                pos = next;
            }
            None => return Ok(config),
        }
    }

    let Some(&pps_count) = data.get(pos) else {
        return Ok(config);
    };
    pos += 1;

    for _ in 0..pps_count {
        match read_parameter_set(data, pos) {
            Some((set, next)) => {
                config.pps.push(set);
                pos = next;
            }
            None => return Ok(config),
        }
    }

    config.complete = true;
    Ok(config)
}

/// Read a 2-byte length prefixed blob at `pos`
fn read_parameter_set(data: &Bytes, pos: usize) -> Option<(Bytes, usize)> {
    if pos + 2 > data.len() {
        return None;
    }
    let len = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
    let start = pos + 2;
    if start + len > data.len() {
        return None;
    }
    Some((data.slice(start..start + len), start + len))
}

/// Whether an Annex-B payload holds an IDR slice
///
/// Scans for `00 00 01` start codes (which also covers the 4-byte
/// `00 00 00 01` form) and checks the NAL type of the unit that follows
/// each one. A payload without any start code is not a keyframe.
pub fn is_keyframe(payload: &[u8]) -> bool {
    let mut i = 0;
    while i + 3 < payload.len() {
        if payload[i] == 0 && payload[i + 1] == 0 && payload[i + 2] == 1 {
            if NaluType::from_byte(payload[i + 3]).is_keyframe() {
                return true;
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    false
}

/// Whether length-prefixed NAL units tile `data` exactly
pub fn is_avcc_framed(data: &[u8], length_size: u8) -> bool {
    let length_size = length_size.clamp(1, 4) as usize;
    let mut rest = data;
    while !rest.is_empty() {
        if rest.len() < length_size {
            return false;
        }
        let len = rest[..length_size]
            .iter()
            .fold(0usize, |acc, &b| (acc << 8) | b as usize);
        rest = &rest[length_size..];
        if len == 0 || len > rest.len() {
            return false;
        }
        rest = &rest[len..];
    }
    !data.is_empty()
}

/// Iterator over length-prefixed (AVCC) NAL units
///
/// Stops at the first unit whose declared length runs past the data.
pub struct NaluIterator<'a> {
    data: &'a [u8],
    length_size: usize,
}

impl<'a> NaluIterator<'a> {
    pub fn new(data: &'a [u8], length_size: u8) -> Self {
        Self {
            data,
            length_size: length_size.clamp(1, 4) as usize,
        }
    }
}

impl<'a> Iterator for NaluIterator<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.len() < self.length_size {
            return None;
        }
        let len = self.data[..self.length_size]
            .iter()
            .fold(0usize, |acc, &b| (acc << 8) | b as usize);
        let rest = &self.data[self.length_size..];
        if len == 0 || len > rest.len() {
            self.data = &[];
            return None;
        }
        let (nalu, tail) = rest.split_at(len);
        self.data = tail;
        Some(nalu)
    }
}

/// Whether length-prefixed NAL units contain an IDR slice
pub fn avcc_contains_idr(data: &[u8], length_size: u8) -> bool {
    NaluIterator::new(data, length_size)
        .any(|nalu| NaluType::from_byte(nalu[0]).is_keyframe())
}
