//! Codec configuration extraction and keyframe detection
//!
//! Stateless helpers that look inside audio/video payloads:
//! - AVC decoder configuration records (SPS/PPS)
//! - AAC AudioSpecificConfig and ADTS headers
//! - keyframe detection for Annex-B and length-prefixed H.264
//! - FLV tag body headers, which wrap all of the above on RTMP

pub mod aac;
pub mod flv;
pub mod h264;

use bytes::Bytes;

pub use aac::{parse_audio_config, AdtsHeader, AudioConfig};
pub use flv::{AudioFormat, AudioTagHeader, VideoCodec, VideoTagHeader};
pub use h264::{is_keyframe, parse_video_config, NaluType, VideoConfig};

/// NAL length prefix size assumed until a configuration record says otherwise
pub const DEFAULT_NALU_LENGTH_SIZE: u8 = 4;

/// What a video payload turned out to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoInfo {
    pub codec: VideoCodec,
    pub is_keyframe: bool,
    /// AVC decoder configuration record, when the payload is a sequence header
    pub config_record: Option<Bytes>,
}

/// What an audio payload turned out to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioInfo {
    pub format: AudioFormat,
    /// AudioSpecificConfig, when the payload is an AAC sequence header
    pub config_record: Option<Bytes>,
}

/// Classify a video payload
///
/// FLV-wrapped AVC is checked NAL unit by NAL unit using `nalu_length_size`,
/// then with the start-code scan for encoders that put Annex-B inside AVC
/// packets. Other FLV codecs have no NAL layer and rely on the FLV frame
/// type. Payloads that are not FLV at all are scanned for start codes.
pub fn classify_video(data: &Bytes, nalu_length_size: u8) -> VideoInfo {
    let Some(header) = VideoTagHeader::parse(data) else {
        return VideoInfo {
            codec: VideoCodec::Raw,
            is_keyframe: h264::is_keyframe(data),
            config_record: None,
        };
    };

    match header.avc_packet_type {
        Some(flv::AvcPacketType::SequenceHeader) => VideoInfo {
            codec: header.codec,
            is_keyframe: false,
            config_record: Some(header.body),
        },
        Some(flv::AvcPacketType::Nalu) => VideoInfo {
            codec: header.codec,
            // A length prefix such as `00 00 01 25` reads like a start code,
            // so the Annex-B scan only applies when the length framing fails
            is_keyframe: if h264::is_avcc_framed(&header.body, nalu_length_size) {
                h264::avcc_contains_idr(&header.body, nalu_length_size)
            } else {
                h264::is_keyframe(&header.body)
            },
            config_record: None,
        },
        Some(flv::AvcPacketType::EndOfSequence) => VideoInfo {
            codec: header.codec,
            is_keyframe: false,
            config_record: None,
        },
        None => VideoInfo {
            codec: header.codec,
            is_keyframe: header.keyframe_flag,
            config_record: None,
        },
    }
}

/// Classify an audio payload
pub fn classify_audio(data: &Bytes) -> AudioInfo {
    if aac::is_adts(data) {
        return AudioInfo {
            format: AudioFormat::Raw,
            config_record: None,
        };
    }

    match AudioTagHeader::parse(data) {
        Some(header) if header.aac_sequence_header => AudioInfo {
            format: header.format,
            config_record: Some(header.body),
        },
        Some(header) => AudioInfo {
            format: header.format,
            config_record: None,
        },
        None => AudioInfo {
            format: AudioFormat::Raw,
            config_record: None,
        },
    }
}
