//! FLV tag body headers
//!
//! RTMP audio and video messages carry FLV tag bodies: a codec header byte
//! (plus a few more for AVC and AAC) in front of the codec data.
//!
//! ```text
//! Video: FrameType(4) | CodecID(4) | [AVCPacketType(1) | CompositionTime(SI24)] | data
//! Audio: SoundFormat(4) | SoundRate(2) | SoundSize(1) | SoundType(1) | [AACPacketType(1)] | data
//! ```

use bytes::Bytes;

/// Video codec id (low nibble of the first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    SorensonH263,
    Vp6,
    Avc,
    Hevc,
    Av1,
    /// Payload is not FLV wrapped (e.g. Annex-B pushed through the logical API)
    Raw,
    Other(u8),
}

impl VideoCodec {
    pub fn from_id(id: u8) -> Self {
        match id {
            2 => VideoCodec::SorensonH263,
            4 => VideoCodec::Vp6,
            7 => VideoCodec::Avc,
            12 => VideoCodec::Hevc,
            13 => VideoCodec::Av1,
            other => VideoCodec::Other(other),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            VideoCodec::SorensonH263 => "H.263",
            VideoCodec::Vp6 => "VP6",
            VideoCodec::Avc => "H.264",
            VideoCodec::Hevc => "H.265",
            VideoCodec::Av1 => "AV1",
            VideoCodec::Raw => "raw",
            VideoCodec::Other(_) => "unknown",
        }
    }
}

/// Audio format (high nibble of the first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    LinearPcm,
    Mp3,
    G711,
    Aac,
    Speex,
    /// Payload is not FLV wrapped
    Raw,
    Other(u8),
}

impl AudioFormat {
    pub fn from_id(id: u8) -> Self {
        match id {
            0 | 3 => AudioFormat::LinearPcm,
            2 | 14 => AudioFormat::Mp3,
            7 | 8 => AudioFormat::G711,
            10 => AudioFormat::Aac,
            11 => AudioFormat::Speex,
            other => AudioFormat::Other(other),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AudioFormat::LinearPcm => "PCM",
            AudioFormat::Mp3 => "MP3",
            AudioFormat::G711 => "G.711",
            AudioFormat::Aac => "AAC",
            AudioFormat::Speex => "Speex",
            AudioFormat::Raw => "raw",
            AudioFormat::Other(_) => "unknown",
        }
    }
}

/// AVC packet type byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvcPacketType {
    SequenceHeader,
    Nalu,
    EndOfSequence,
}

/// Parsed video tag header
#[derive(Debug, Clone)]
pub struct VideoTagHeader {
    /// FLV frame type 1 (keyframe) or 4 (generated keyframe)
    pub keyframe_flag: bool,
    pub codec: VideoCodec,
    /// Present for AVC only
    pub avc_packet_type: Option<AvcPacketType>,
    pub composition_time: i32,
    /// Codec data following the header
    pub body: Bytes,
}

impl VideoTagHeader {
    /// Parse the header of an FLV video tag body
    ///
    /// Returns `None` when the first byte is not a valid FLV frame type,
    /// which is how raw Annex-B payloads are told apart.
    pub fn parse(data: &Bytes) -> Option<Self> {
        let first = *data.first()?;
        let frame_type = first >> 4;
        if !(1..=5).contains(&frame_type) {
            return None;
        }
        let codec = VideoCodec::from_id(first & 0x0F);

        if codec != VideoCodec::Avc {
            return Some(Self {
                keyframe_flag: matches!(frame_type, 1 | 4),
                codec,
                avc_packet_type: None,
                composition_time: 0,
                body: data.slice(1..),
            });
        }

        if data.len() < 5 {
            return None;
        }
        let avc_packet_type = match data[1] {
            0 => AvcPacketType::SequenceHeader,
            1 => AvcPacketType::Nalu,
            2 => AvcPacketType::EndOfSequence,
            _ => return None,
        };
        // SI24, sign-extended
        let raw = ((data[2] as i32) << 16) | ((data[3] as i32) << 8) | data[4] as i32;
        let composition_time = (raw << 8) >> 8;

        Some(Self {
            keyframe_flag: matches!(frame_type, 1 | 4),
            codec,
            avc_packet_type: Some(avc_packet_type),
            composition_time,
            body: data.slice(5..),
        })
    }

    pub fn is_sequence_header(&self) -> bool {
        self.avc_packet_type == Some(AvcPacketType::SequenceHeader)
    }
}

/// Parsed audio tag header
#[derive(Debug, Clone)]
pub struct AudioTagHeader {
    pub format: AudioFormat,
    /// True for an AAC sequence header (AudioSpecificConfig follows)
    pub aac_sequence_header: bool,
    pub body: Bytes,
}

impl AudioTagHeader {
    pub fn parse(data: &Bytes) -> Option<Self> {
        let first = *data.first()?;
        let format = AudioFormat::from_id(first >> 4);

        if format == AudioFormat::Aac {
            let packet_type = *data.get(1)?;
            return Some(Self {
                format,
                aac_sequence_header: packet_type == 0,
                body: data.slice(2..),
            });
        }

        Some(Self {
            format,
            aac_sequence_header: false,
            body: data.slice(1..),
        })
    }
}
