//! Stream registry for pub/sub routing
//!
//! The registry maps stream keys to publishers and routes media from each
//! publisher to its subscribers. It also caches what a viewer joining late
//! needs to start decoding: metadata, codec configuration and the last
//! keyframe.
//!
//! # Architecture
//!
//! ```text
//!                          Arc<StreamRegistry>
//!                     ┌──────────────────────────┐
//!                     │ streams: RwLock<HashMap< │
//!                     │   StreamKey,             │
//!                     │   Mutex<Publisher> {     │
//!                     │     caches,              │
//!                     │     subscribers,         │
//!                     │   }                      │
//!                     │ >>                       │
//!                     └───────────┬──────────────┘
//!                                 │
//!         ┌───────────────────────┼───────────────────────┐
//!         │                       │                       │
//!         ▼                       ▼                       ▼
//!    [Publisher]            [Subscriber]            [Subscriber]
//!  publish_video_frame()     rx.recv()               rx.recv()
//!         │                       ▲                       ▲
//!         └──► Publisher::broadcast ──► try_send ─────────┘
//! ```
//!
//! # Zero-Copy Design
//!
//! `bytes::Bytes` uses reference counting, so all subscribers share the same
//! memory allocation. Cloning a frame per subscriber only bumps a counter.
//!
//! # Backpressure
//!
//! Fan-out never waits. A subscriber whose queue is full or closed is
//! removed on the spot and the remaining subscribers are unaffected.

pub mod config;
pub mod error;
pub mod frame;
pub mod publisher;
pub mod store;
pub mod subscriber;

pub use config::RegistryConfig;
pub use error::RegistryError;
pub use frame::{AudioFrame, MediaFrame, StreamEvent, StreamKey, StreamMetadata, VideoFrame};
pub use publisher::{Publisher, PublisherStats, PublisherStatus};
pub use store::{PublishOutcome, RegistryEvent, RegistryStats, SharedPublisher, StreamRegistry};
pub use subscriber::{FrameSink, SinkError, Subscriber, SubscriberId};
