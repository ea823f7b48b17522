//! Per-stream publisher state
//!
//! A [`Publisher`] lives in the registry behind its own mutex. Every method
//! here runs with that lock held, so cache updates, subscriber set changes
//! and fan-out are observed atomically and in one order by all subscribers.

use std::time::Instant;

use crate::media::{self, AudioConfig, VideoConfig};

use super::error::RegistryError;
use super::frame::{AudioFrame, StreamKey, StreamEvent, StreamMetadata, VideoFrame};
use super::subscriber::{Subscriber, SubscriberId};

/// Publisher lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherStatus {
    /// No session is publishing
    Idle,
    /// A session holds the stream and frames are flowing
    Publishing,
    /// The last session ended abnormally
    Error,
}

/// Counters for one publisher
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherStats {
    pub video_frames: u64,
    pub audio_frames: u64,
    pub keyframes: u64,
    pub bytes: u64,
    pub subscribers_dropped: u64,
}

/// State of one named stream
pub struct Publisher {
    key: StreamKey,
    status: PublisherStatus,
    session_id: Option<u64>,
    metadata: Option<StreamMetadata>,
    video_config: Option<VideoConfig>,
    video_config_frame: Option<VideoFrame>,
    audio_config: Option<AudioConfig>,
    audio_config_frame: Option<AudioFrame>,
    last_keyframe: Option<VideoFrame>,
    subscribers: Vec<Subscriber>,
    stats: PublisherStats,
    created_at: Instant,
    publishing_since: Option<Instant>,
}

impl Publisher {
    pub(super) fn new(key: StreamKey) -> Self {
        Self {
            key,
            status: PublisherStatus::Idle,
            session_id: None,
            metadata: None,
            video_config: None,
            video_config_frame: None,
            audio_config: None,
            audio_config_frame: None,
            last_keyframe: None,
            subscribers: Vec::new(),
            stats: PublisherStats::default(),
            created_at: Instant::now(),
            publishing_since: None,
        }
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    pub fn status(&self) -> PublisherStatus {
        self.status
    }

    pub fn is_publishing(&self) -> bool {
        self.status == PublisherStatus::Publishing
    }

    /// Session currently holding the stream
    pub fn session_id(&self) -> Option<u64> {
        self.session_id
    }

    pub fn metadata(&self) -> Option<&StreamMetadata> {
        self.metadata.as_ref()
    }

    pub fn video_config(&self) -> Option<&VideoConfig> {
        self.video_config.as_ref()
    }

    pub fn audio_config(&self) -> Option<&AudioConfig> {
        self.audio_config.as_ref()
    }

    pub fn last_keyframe(&self) -> Option<&VideoFrame> {
        self.last_keyframe.as_ref()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn subscriber_ids(&self) -> Vec<SubscriberId> {
        self.subscribers.iter().map(Subscriber::id).collect()
    }

    pub fn stats(&self) -> PublisherStats {
        self.stats
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// When the current session started publishing
    pub fn publishing_since(&self) -> Option<Instant> {
        self.publishing_since
    }

    /// Anything a late subscriber would be replayed
    pub fn has_cached_state(&self) -> bool {
        self.metadata.is_some()
            || self.video_config_frame.is_some()
            || self.audio_config_frame.is_some()
            || self.last_keyframe.is_some()
    }

    /// Returns true when this call moved the stream into `Publishing`
    pub(super) fn start(
        &mut self,
        session_id: u64,
        metadata: StreamMetadata,
    ) -> Result<bool, RegistryError> {
        if self.is_publishing() {
            if self.session_id != Some(session_id) {
                return Err(RegistryError::PublisherConflict(self.key.clone()));
            }
            self.store_metadata(metadata);
            return Ok(false);
        }

        self.status = PublisherStatus::Publishing;
        self.session_id = Some(session_id);
        self.publishing_since = Some(Instant::now());
        self.stats = PublisherStats::default();
        self.store_metadata(metadata);
        Ok(true)
    }

    /// End the session; returns false when `session_id` does not hold the stream
    pub(super) fn stop(&mut self, session_id: u64, status: PublisherStatus) -> bool {
        if !self.is_publishing() || self.session_id != Some(session_id) {
            return false;
        }

        self.status = status;
        self.session_id = None;
        self.publishing_since = None;
        self.clear_caches();
        self.broadcast(StreamEvent::StreamEnd);
        true
    }

    pub(super) fn update_metadata(&mut self, metadata: StreamMetadata) {
        if !self.is_publishing() {
            return;
        }
        self.store_metadata(metadata);
        if let Some(metadata) = self.metadata.clone() {
            self.broadcast(StreamEvent::Metadata(metadata));
        }
    }

    fn store_metadata(&mut self, metadata: StreamMetadata) {
        if !metadata.is_empty() {
            self.metadata = Some(metadata);
        }
    }

    pub(super) fn push_video(&mut self, frame: VideoFrame) -> bool {
        if !self.is_publishing() {
            return false;
        }

        self.stats.video_frames += 1;
        self.stats.bytes += frame.data.len() as u64;

        if let Some(record) = &frame.config_record {
            match media::parse_video_config(record) {
                Ok(config) => {
                    if !config.complete {
                        tracing::warn!(
                            stream = %self.key,
                            sps = config.sps.len(),
                            pps = config.pps.len(),
                            "Truncated video configuration record"
                        );
                    }
                    tracing::debug!(
                        stream = %self.key,
                        profile = config.profile_name(),
                        level = config.level,
                        "Video configuration updated"
                    );
                    self.video_config = Some(config);
                }
                Err(e) => {
                    tracing::warn!(stream = %self.key, error = %e, "Unparseable video configuration");
                }
            }
            self.video_config_frame = Some(frame.clone());
        } else if frame.is_keyframe {
            self.stats.keyframes += 1;
            self.last_keyframe = Some(frame.clone());
        }

        self.broadcast(StreamEvent::Video(frame));
        true
    }

    pub(super) fn push_audio(&mut self, frame: AudioFrame) -> bool {
        if !self.is_publishing() {
            return false;
        }

        self.stats.audio_frames += 1;
        self.stats.bytes += frame.data.len() as u64;

        if let Some(record) = &frame.config_record {
            match media::parse_audio_config(record) {
                Ok(config) => {
                    tracing::debug!(
                        stream = %self.key,
                        sample_rate = config.sampling_rate,
                        channels = config.channel_config,
                        "Audio configuration updated"
                    );
                    self.audio_config = Some(config);
                }
                Err(e) => {
                    tracing::warn!(stream = %self.key, error = %e, "Unparseable audio configuration");
                }
            }
            self.audio_config_frame = Some(frame.clone());
        } else if self.audio_config.is_none() && media::aac::is_adts(&frame.data) {
            if let Ok(header) = media::AdtsHeader::parse(&frame.data) {
                self.audio_config = Some(header.config);
            }
        }

        self.broadcast(StreamEvent::Audio(frame));
        true
    }

    /// Attach a subscriber after replaying the cached state to it
    ///
    /// Replay order: metadata, video configuration, audio configuration,
    /// last keyframe. A subscriber whose sink rejects the replay is not added.
    pub(super) fn add_subscriber(&mut self, subscriber: Subscriber) -> bool {
        if !self.is_publishing() {
            return false;
        }

        let mut replay = Vec::with_capacity(4);
        if let Some(metadata) = &self.metadata {
            replay.push(StreamEvent::Metadata(metadata.clone()));
        }
        if let Some(frame) = &self.video_config_frame {
            replay.push(StreamEvent::Video(frame.clone()));
        }
        if let Some(frame) = &self.audio_config_frame {
            replay.push(StreamEvent::Audio(frame.clone()));
        }
        if let Some(frame) = &self.last_keyframe {
            replay.push(StreamEvent::Video(frame.clone()));
        }

        for event in replay {
            if let Err(e) = subscriber.deliver(event) {
                tracing::warn!(
                    stream = %self.key,
                    subscriber = subscriber.id(),
                    error = %e,
                    "Subscriber failed during catch-up"
                );
                return false;
            }
        }

        self.subscribers.push(subscriber);
        true
    }

    pub(super) fn remove_subscriber(&mut self, id: SubscriberId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id() != id);
        self.subscribers.len() != before
    }

    /// Deliver to every subscriber, dropping the ones whose sink fails
    fn broadcast(&mut self, event: StreamEvent) {
        let key = &self.key;
        let mut dropped = 0;
        self.subscribers.retain(|subscriber| match subscriber.deliver(event.clone()) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    stream = %key,
                    subscriber = subscriber.id(),
                    error = %e,
                    "Removing subscriber after failed send"
                );
                dropped += 1;
                false
            }
        });
        self.stats.subscribers_dropped += dropped;
    }

    fn clear_caches(&mut self) {
        self.metadata = None;
        self.video_config = None;
        self.video_config_frame = None;
        self.audio_config = None;
        self.audio_config_frame = None;
        self.last_keyframe = None;
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("key", &self.key)
            .field("status", &self.status)
            .field("session_id", &self.session_id)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
