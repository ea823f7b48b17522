//! Stream registry implementation
//!
//! The central registry that maps stream keys to publishers and routes
//! frames from each publisher to its subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex, RwLock};

use super::config::RegistryConfig;
use super::error::RegistryError;
use super::frame::{AudioFrame, MediaFrame, StreamEvent, StreamKey, StreamMetadata, VideoFrame};
use super::publisher::{Publisher, PublisherStatus};
use super::subscriber::{Subscriber, SubscriberId};

/// Shared handle to one publisher's state
pub type SharedPublisher = Arc<Mutex<Publisher>>;

/// Publish lifecycle notifications
///
/// Each publishing session produces exactly one `PublishStarted` and, once
/// it ends, exactly one `PublishStopped`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    PublishStarted {
        key: StreamKey,
        session_id: u64,
    },
    PublishStopped {
        key: StreamKey,
        session_id: u64,
        /// `Idle` for a clean stop, `Error` for an aborted session
        status: PublisherStatus,
    },
}

/// Registry-wide counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub total_streams: usize,
    pub active_streams: usize,
    pub total_viewers: usize,
}

/// Result of [`StreamRegistry::publish_from`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    pub video_frames: u64,
    pub audio_frames: u64,
}

/// Central registry for all streams
///
/// The key table sits behind a `RwLock`; each publisher has its own `Mutex`
/// so fan-out on one stream does not serialize the others. Operations take
/// the table's read lock, then the publisher's lock. Only creation, cleanup
/// and shutdown take the write lock.
pub struct StreamRegistry {
    streams: RwLock<HashMap<StreamKey, SharedPublisher>>,
    events: broadcast::Sender<RegistryEvent>,
    next_subscriber_id: AtomicU64,
    config: RegistryConfig,
}

impl StreamRegistry {
    /// Create a new stream registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new stream registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity);
        Self {
            streams: RwLock::new(HashMap::new()),
            events,
            next_subscriber_id: AtomicU64::new(1),
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Receive publish start/stop notifications from now on
    pub fn events(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    pub fn allocate_subscriber_id(&self) -> SubscriberId {
        self.next_subscriber_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Get the publisher for `key`, creating an idle one if needed
    ///
    /// The handle is meant for inspection. Do not call back into the
    /// registry while holding its lock.
    pub async fn create_or_get_publisher(
        &self,
        key: &StreamKey,
    ) -> Result<SharedPublisher, RegistryError> {
        if let Some(publisher) = self.streams.read().await.get(key) {
            return Ok(Arc::clone(publisher));
        }

        let mut streams = self.streams.write().await;
        if let Some(publisher) = streams.get(key) {
            return Ok(Arc::clone(publisher));
        }
        if streams.len() >= self.config.max_streams {
            tracing::warn!(stream = %key, limit = self.config.max_streams, "Stream limit reached");
            return Err(RegistryError::TooManyStreams {
                limit: self.config.max_streams,
            });
        }

        let publisher = Arc::new(Mutex::new(Publisher::new(key.clone())));
        streams.insert(key.clone(), Arc::clone(&publisher));
        tracing::debug!(stream = %key, "Publisher created");
        Ok(publisher)
    }

    /// Run `f` on the publisher for `key` with its lock held
    async fn with_publisher<R>(
        &self,
        key: &StreamKey,
        f: impl FnOnce(&mut Publisher) -> R,
    ) -> Option<R> {
        let streams = self.streams.read().await;
        let publisher = streams.get(key)?;
        let mut guard = publisher.lock().await;
        Some(f(&mut guard))
    }

    /// Mark `session_id` as the live publisher of `key`
    ///
    /// Fails with [`RegistryError::PublisherConflict`] while a different
    /// session is publishing; the existing session is left untouched.
    /// Calling again from the same session only refreshes the metadata.
    pub async fn start_publishing(
        &self,
        key: &StreamKey,
        session_id: u64,
        metadata: StreamMetadata,
    ) -> Result<(), RegistryError> {
        let mut metadata = Some(metadata);
        loop {
            self.create_or_get_publisher(key).await?;

            let result = self
                .with_publisher(key, |publisher| {
                    let metadata = metadata.take().unwrap_or_default();
                    let started = publisher.start(session_id, metadata)?;
                    if started {
                        tracing::info!(stream = %key, session_id, "Publishing started");
                        let _ = self.events.send(RegistryEvent::PublishStarted {
                            key: key.clone(),
                            session_id,
                        });
                    }
                    Ok(())
                })
                .await;

            match result {
                Some(Err(e)) => {
                    tracing::info!(stream = %key, session_id, "Publish rejected, stream busy");
                    return Err(e);
                }
                Some(Ok(())) => return Ok(()),
                // Swept by cleanup between creation and locking
                None => continue,
            }
        }
    }

    /// Replace the metadata of a stream `session_id` is publishing
    pub async fn update_metadata(
        &self,
        key: &StreamKey,
        session_id: u64,
        metadata: StreamMetadata,
    ) -> Result<(), RegistryError> {
        self.with_publisher(key, |publisher| {
            if !publisher.is_publishing() || publisher.session_id() != Some(session_id) {
                return Err(RegistryError::NotPublisher(key.clone()));
            }
            publisher.update_metadata(metadata);
            Ok(())
        })
        .await
        .unwrap_or_else(|| Err(RegistryError::NotPublisher(key.clone())))
    }

    /// Cache and fan out a video frame; false when `key` is not publishing
    pub async fn publish_video_frame(&self, key: &StreamKey, frame: VideoFrame) -> bool {
        self.with_publisher(key, |publisher| publisher.push_video(frame))
            .await
            .unwrap_or(false)
    }

    /// Cache and fan out an audio frame; false when `key` is not publishing
    pub async fn publish_audio_frame(&self, key: &StreamKey, frame: AudioFrame) -> bool {
        self.with_publisher(key, |publisher| publisher.push_audio(frame))
            .await
            .unwrap_or(false)
    }

    /// Attach `subscriber` to a live stream
    ///
    /// Returns false when nothing is publishing `key`. On success the
    /// subscriber has already been sent the cached metadata, configuration
    /// records and last keyframe, ahead of any later frame.
    pub async fn subscribe(&self, key: &StreamKey, subscriber: Subscriber) -> bool {
        let id = subscriber.id();
        let added = self
            .with_publisher(key, |publisher| {
                let added = publisher.add_subscriber(subscriber);
                if added {
                    tracing::info!(
                        stream = %key,
                        subscriber = id,
                        subscribers = publisher.subscriber_count(),
                        "Subscriber added"
                    );
                }
                added
            })
            .await
            .unwrap_or(false);

        if !added {
            tracing::debug!(stream = %key, subscriber = id, "Subscribe refused, stream not live");
        }
        added
    }

    /// Subscribe through a bounded channel sized by the registry config
    pub async fn subscribe_channel(
        &self,
        key: &StreamKey,
    ) -> Option<(SubscriberId, mpsc::Receiver<StreamEvent>)> {
        let id = self.allocate_subscriber_id();
        let (subscriber, rx) = Subscriber::channel(id, self.config.subscriber_queue_capacity);
        if self.subscribe(key, subscriber).await {
            Some((id, rx))
        } else {
            None
        }
    }

    /// Detach a subscriber; true only for the call that removed it
    pub async fn unsubscribe(&self, key: &StreamKey, id: SubscriberId) -> bool {
        let removed = self
            .with_publisher(key, |publisher| publisher.remove_subscriber(id))
            .await
            .unwrap_or(false);
        if removed {
            tracing::debug!(stream = %key, subscriber = id, "Subscriber removed");
        }
        removed
    }

    /// End `session_id`'s publishing session normally
    ///
    /// Caches are cleared, the stream goes idle and subscribers receive
    /// [`StreamEvent::StreamEnd`] but stay attached. Returns false when the
    /// session was not publishing `key`, so repeated calls are harmless.
    pub async fn stop_publishing(&self, key: &StreamKey, session_id: u64) -> bool {
        self.end_session(key, session_id, PublisherStatus::Idle).await
    }

    /// Like [`stop_publishing`](Self::stop_publishing) but leaves the stream in `Error`
    pub async fn abort_publishing(&self, key: &StreamKey, session_id: u64) -> bool {
        self.end_session(key, session_id, PublisherStatus::Error).await
    }

    async fn end_session(&self, key: &StreamKey, session_id: u64, status: PublisherStatus) -> bool {
        self.with_publisher(key, |publisher| {
            let stopped = publisher.stop(session_id, status);
            if stopped {
                tracing::info!(
                    stream = %key,
                    session_id,
                    status = ?status,
                    subscribers = publisher.subscriber_count(),
                    "Publishing stopped"
                );
                let _ = self.events.send(RegistryEvent::PublishStopped {
                    key: key.clone(),
                    session_id,
                    status,
                });
            }
            stopped
        })
        .await
        .unwrap_or(false)
    }

    /// Publish a whole frame sequence as one session
    ///
    /// Starts publishing, forwards frames until the channel closes, then
    /// stops publishing.
    pub async fn publish_from(
        &self,
        key: &StreamKey,
        session_id: u64,
        metadata: StreamMetadata,
        mut frames: mpsc::Receiver<MediaFrame>,
    ) -> Result<PublishOutcome, RegistryError> {
        self.start_publishing(key, session_id, metadata).await?;

        let mut outcome = PublishOutcome::default();
        while let Some(frame) = frames.recv().await {
            match frame {
                MediaFrame::Video(frame) => {
                    if self.publish_video_frame(key, frame).await {
                        outcome.video_frames += 1;
                    }
                }
                MediaFrame::Audio(frame) => {
                    if self.publish_audio_frame(key, frame).await {
                        outcome.audio_frames += 1;
                    }
                }
            }
        }

        self.stop_publishing(key, session_id).await;
        Ok(outcome)
    }

    /// Remove publishers that are not publishing and have nothing cached
    /// or attached; returns how many were removed
    ///
    /// Publishers that are locked at the moment are left for the next sweep.
    pub async fn cleanup_inactive(&self) -> usize {
        let mut streams = self.streams.write().await;
        let before = streams.len();

        streams.retain(|key, publisher| match publisher.try_lock() {
            Ok(publisher) => {
                let inactive = !publisher.is_publishing()
                    && !publisher.has_cached_state()
                    && publisher.subscriber_count() == 0;
                if inactive {
                    tracing::info!(stream = %key, "Stream removed by cleanup");
                }
                !inactive
            }
            Err(_) => true,
        });

        before - streams.len()
    }

    /// Spawn the periodic cleanup sweep
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        let interval = registry.config.cleanup_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = registry.cleanup_inactive().await;
                if removed > 0 {
                    tracing::debug!(removed, "Cleanup sweep finished");
                }
            }
        })
    }

    pub async fn publisher_status(&self, key: &StreamKey) -> Option<PublisherStatus> {
        self.with_publisher(key, |publisher| publisher.status()).await
    }

    pub async fn subscriber_count(&self, key: &StreamKey) -> usize {
        self.with_publisher(key, |publisher| publisher.subscriber_count())
            .await
            .unwrap_or(0)
    }

    /// Keys currently being published, sorted
    pub async fn active_streams(&self) -> Vec<StreamKey> {
        let streams = self.streams.read().await;
        let mut active = Vec::new();
        for (key, publisher) in streams.iter() {
            if publisher.lock().await.is_publishing() {
                active.push(key.clone());
            }
        }
        active.sort();
        active
    }

    pub async fn stats(&self) -> RegistryStats {
        let streams = self.streams.read().await;
        let mut stats = RegistryStats {
            total_streams: streams.len(),
            ..Default::default()
        };
        for publisher in streams.values() {
            let publisher = publisher.lock().await;
            if publisher.is_publishing() {
                stats.active_streams += 1;
            }
            stats.total_viewers += publisher.subscriber_count();
        }
        stats
    }

    /// Stop every live session and drop all streams
    ///
    /// Subscribers get [`StreamEvent::StreamEnd`], then their channels close
    /// as the publishers are dropped.
    pub async fn shutdown(&self) {
        let mut streams = self.streams.write().await;
        for (key, publisher) in streams.drain() {
            let mut publisher = publisher.lock().await;
            if let Some(session_id) = publisher.session_id() {
                if publisher.stop(session_id, PublisherStatus::Idle) {
                    let _ = self.events.send(RegistryEvent::PublishStopped {
                        key: key.clone(),
                        session_id,
                        status: PublisherStatus::Idle,
                    });
                }
            }
        }
        tracing::info!("Stream registry shut down");
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}
