//! Per-stream state management
//!
//! Each RTMP message stream (identified by stream ID) has its own state,
//! including publish/play mode, stream name and media counters.

use std::time::Instant;

use crate::media::DEFAULT_NALU_LENGTH_SIZE;

/// Stream mode (publishing or playing)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Stream is idle (created but not publishing/playing)
    Idle,
    /// Stream is publishing (receiving media)
    Publishing,
    /// Stream is playing (sending media)
    Playing,
}

/// Per-stream state
#[derive(Debug)]
pub struct StreamState {
    /// Message stream ID
    pub id: u32,

    /// Current mode
    pub mode: StreamMode,

    /// Stream name given to publish/play
    pub stream_name: Option<String>,

    /// Publish type ("live", "record", "append")
    pub publish_type: Option<String>,

    /// Time when stream became active
    pub started_at: Option<Instant>,

    /// NAL length prefix size from the latest AVC configuration record
    pub nalu_length_size: u8,

    pub has_video_header: bool,
    pub has_audio_header: bool,
    pub has_metadata: bool,

    pub last_video_ts: u32,
    pub last_audio_ts: u32,

    pub video_frames: u64,
    pub audio_frames: u64,
    pub keyframes: u64,

    /// Media bytes received on this stream
    pub bytes_received: u64,
}

impl StreamState {
    /// Create a new stream state
    pub fn new(id: u32) -> Self {
        Self {
            id,
            mode: StreamMode::Idle,
            stream_name: None,
            publish_type: None,
            started_at: None,
            nalu_length_size: DEFAULT_NALU_LENGTH_SIZE,
            has_video_header: false,
            has_audio_header: false,
            has_metadata: false,
            last_video_ts: 0,
            last_audio_ts: 0,
            video_frames: 0,
            audio_frames: 0,
            keyframes: 0,
            bytes_received: 0,
        }
    }

    /// Start publishing on this stream
    pub fn start_publish(&mut self, stream_name: String, publish_type: String) {
        self.mode = StreamMode::Publishing;
        self.stream_name = Some(stream_name);
        self.publish_type = Some(publish_type);
        self.started_at = Some(Instant::now());
    }

    /// Start playing on this stream
    pub fn start_play(&mut self, stream_name: String) {
        self.mode = StreamMode::Playing;
        self.stream_name = Some(stream_name);
        self.started_at = Some(Instant::now());
    }

    /// Stop the stream
    pub fn stop(&mut self) {
        self.mode = StreamMode::Idle;
        self.nalu_length_size = DEFAULT_NALU_LENGTH_SIZE;
        self.has_video_header = false;
        self.has_audio_header = false;
        self.has_metadata = false;
    }

    pub fn is_publishing(&self) -> bool {
        self.mode == StreamMode::Publishing
    }

    pub fn is_playing(&self) -> bool {
        self.mode == StreamMode::Playing
    }

    /// Get stream duration
    pub fn duration(&self) -> Option<std::time::Duration> {
        self.started_at.map(|t| t.elapsed())
    }

    /// Update video state
    pub fn on_video(&mut self, timestamp: u32, is_keyframe: bool, is_header: bool, size: usize) {
        self.last_video_ts = timestamp;
        self.video_frames += 1;
        self.bytes_received += size as u64;

        if is_header {
            self.has_video_header = true;
        }
        if is_keyframe {
            self.keyframes += 1;
        }
    }

    /// Update audio state
    pub fn on_audio(&mut self, timestamp: u32, is_header: bool, size: usize) {
        self.last_audio_ts = timestamp;
        self.audio_frames += 1;
        self.bytes_received += size as u64;

        if is_header {
            self.has_audio_header = true;
        }
    }

    /// Mark metadata received
    pub fn on_metadata(&mut self) {
        self.has_metadata = true;
    }

    /// Get bitrate estimate (bits per second)
    pub fn bitrate(&self) -> Option<u64> {
        let duration = self.duration()?.as_secs();
        if duration > 0 {
            Some((self.bytes_received * 8) / duration)
        } else {
            None
        }
    }
}
