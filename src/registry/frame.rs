//! Stream identity and the media units routed through the registry
//!
//! Frames hold their payload as `Bytes`, so fanning one frame out to many
//! subscribers clones a reference count, not the data.

use std::fmt;

use bytes::Bytes;

use crate::amf::AmfValue;
use crate::media::{self, AudioFormat, VideoCodec, DEFAULT_NALU_LENGTH_SIZE};

/// Name of a logical stream, unique within a registry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamKey(String);

impl StreamKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Key for stream `name` published under RTMP application `app`
    pub fn from_parts(app: &str, name: &str) -> Self {
        let app = app.trim_matches('/');
        if app.is_empty() {
            Self(name.to_string())
        } else {
            Self(format!("{}/{}", app, name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamKey {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// One video message as published
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub timestamp: u32,
    /// Payload exactly as received, FLV tag body or raw Annex-B
    pub data: Bytes,
    pub is_keyframe: bool,
    pub codec: VideoCodec,
    /// Decoder configuration record carried by this frame, if it is a sequence header
    pub config_record: Option<Bytes>,
}

impl VideoFrame {
    /// Classify `data`, assuming 4-byte NAL length prefixes
    pub fn new(timestamp: u32, data: Bytes) -> Self {
        Self::with_nalu_length_size(timestamp, data, DEFAULT_NALU_LENGTH_SIZE)
    }

    /// Classify `data` using the NAL length size from the stream's configuration
    pub fn with_nalu_length_size(timestamp: u32, data: Bytes, nalu_length_size: u8) -> Self {
        let info = media::classify_video(&data, nalu_length_size);
        Self {
            timestamp,
            data,
            is_keyframe: info.is_keyframe,
            codec: info.codec,
            config_record: info.config_record,
        }
    }

    pub fn is_config(&self) -> bool {
        self.config_record.is_some()
    }
}

/// One audio message as published
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub timestamp: u32,
    pub data: Bytes,
    pub format: AudioFormat,
    /// AudioSpecificConfig carried by this frame, if it is a sequence header
    pub config_record: Option<Bytes>,
}

impl AudioFrame {
    pub fn new(timestamp: u32, data: Bytes) -> Self {
        let info = media::classify_audio(&data);
        Self {
            timestamp,
            data,
            format: info.format,
            config_record: info.config_record,
        }
    }

    pub fn is_config(&self) -> bool {
        self.config_record.is_some()
    }
}

/// Either kind of frame, for feeding a publisher from a single queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaFrame {
    Video(VideoFrame),
    Audio(AudioFrame),
}

/// Stream description from `onMetaData`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamMetadata {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// kbit/s
    pub video_bitrate: f64,
    /// kbit/s
    pub audio_bitrate: f64,
    pub video_codec: String,
    pub audio_codec: String,
    /// Original AMF0 properties, replayed to subscribers unchanged
    pub properties: Option<AmfValue>,
}

impl StreamMetadata {
    /// Extract known fields from an `onMetaData` object or ECMA array
    pub fn from_amf(value: &AmfValue) -> Self {
        let number = |key: &str| value.get_number(key).unwrap_or(0.0);

        let video_codec = match value.get("videocodecid") {
            Some(AmfValue::Number(id)) => VideoCodec::from_id(*id as u8).name().to_string(),
            Some(AmfValue::String(s)) => s.clone(),
            _ => String::new(),
        };
        let audio_codec = match value.get("audiocodecid") {
            Some(AmfValue::Number(id)) => AudioFormat::from_id(*id as u8).name().to_string(),
            Some(AmfValue::String(s)) => s.clone(),
            _ => String::new(),
        };

        Self {
            width: number("width") as u32,
            height: number("height") as u32,
            fps: number("framerate"),
            video_bitrate: number("videodatarate"),
            audio_bitrate: number("audiodatarate"),
            video_codec,
            audio_codec,
            properties: value.as_object().map(|_| value.clone()),
        }
    }

    /// Properties to send in an `onMetaData` message
    pub fn to_amf(&self) -> AmfValue {
        if let Some(props) = &self.properties {
            return props.clone();
        }
        AmfValue::EcmaArray(
            [
                ("width", AmfValue::Number(self.width as f64)),
                ("height", AmfValue::Number(self.height as f64)),
                ("framerate", AmfValue::Number(self.fps)),
                ("videodatarate", AmfValue::Number(self.video_bitrate)),
                ("audiodatarate", AmfValue::Number(self.audio_bitrate)),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
        )
    }

    /// Nothing worth replaying to a late subscriber
    pub fn is_empty(&self) -> bool {
        self.properties.is_none()
            && self.width == 0
            && self.height == 0
            && self.fps == 0.0
            && self.video_bitrate == 0.0
            && self.audio_bitrate == 0.0
            && self.video_codec.is_empty()
            && self.audio_codec.is_empty()
    }
}

/// What a subscriber receives, in publication order
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Metadata(StreamMetadata),
    Video(VideoFrame),
    Audio(AudioFrame),
    /// The publisher stopped; more frames follow only if publishing restarts
    StreamEnd,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_stream_key_from_parts() {
        assert_eq!(StreamKey::from_parts("live", "cam1").as_str(), "live/cam1");
        assert_eq!(StreamKey::from_parts("/live/", "cam1").as_str(), "live/cam1");
        assert_eq!(StreamKey::from_parts("", "cam1").as_str(), "cam1");
        assert_eq!(StreamKey::from("s1").to_string(), "s1");
    }

    #[test]
    fn test_video_frame_classification() {
        let config = VideoFrame::new(0, Bytes::from_static(&[0x17, 0x00, 0, 0, 0, 0x01, 0x64]));
        assert!(config.is_config());
        assert!(!config.is_keyframe);
        assert_eq!(config.codec, VideoCodec::Avc);

        let key = VideoFrame::new(40, Bytes::from_static(&[0x00, 0x00, 0x00, 0x01, 0x65, 0x88]));
        assert!(key.is_keyframe);
        assert!(!key.is_config());
    }

    #[test]
    fn test_audio_frame_classification() {
        let config = AudioFrame::new(0, Bytes::from_static(&[0xAF, 0x00, 0x12, 0x10]));
        assert!(config.is_config());
        assert_eq!(config.format, AudioFormat::Aac);

        let raw = AudioFrame::new(23, Bytes::from_static(&[0xAF, 0x01, 0x21, 0x00]));
        assert!(!raw.is_config());
    }

    #[test]
    fn test_metadata_from_amf() {
        let mut props = HashMap::new();
        props.insert("width".to_string(), AmfValue::Number(1280.0));
        props.insert("height".to_string(), AmfValue::Number(720.0));
        props.insert("framerate".to_string(), AmfValue::Number(30.0));
        props.insert("videocodecid".to_string(), AmfValue::Number(7.0));
        props.insert("audiocodecid".to_string(), AmfValue::String("mp4a".into()));
        let value = AmfValue::EcmaArray(props);

        let metadata = StreamMetadata::from_amf(&value);
        assert_eq!(metadata.width, 1280);
        assert_eq!(metadata.height, 720);
        assert_eq!(metadata.fps, 30.0);
        assert_eq!(metadata.video_codec, "H.264");
        assert_eq!(metadata.audio_codec, "mp4a");
        assert!(!metadata.is_empty());
        assert_eq!(metadata.to_amf(), value);
    }

    #[test]
    fn test_empty_metadata() {
        let metadata = StreamMetadata::default();
        assert!(metadata.is_empty());
        assert_eq!(metadata.to_amf().get_number("width"), Some(0.0));
    }
}
