//! Live RTMP ingest and relay engine
//!
//! Publishers (OBS, ffmpeg, hardware encoders) push a stream to the relay;
//! any number of players pull it back out. Late joiners are primed with the
//! cached metadata, codec configuration and latest keyframe so playback
//! starts without waiting for the next GOP.
//!
//! ```no_run
//! use rtmp_relay::{RelayServer, ServerConfig};
//!
//! # async fn run() -> rtmp_relay::Result<()> {
//! let server = RelayServer::new(ServerConfig::default());
//! server
//!     .run_until(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! # }
//! ```
//!
//! The pieces are usable on their own as well:
//! - [`protocol`]: handshake engine, chunk codec and typed messages
//! - [`amf`]: AMF0 values for commands and metadata
//! - [`media`]: codec configuration parsing and keyframe detection
//! - [`registry`]: publisher/subscriber routing with late-join replay
//! - [`session`]: per-connection bookkeeping
//! - [`server`]: the TCP front end

pub mod amf;
pub mod error;
pub mod media;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;

pub use error::{Error, Result};
pub use registry::{
    RegistryConfig, RegistryError, RegistryEvent, StreamEvent, StreamKey, StreamMetadata,
    StreamRegistry,
};
pub use server::{RelayServer, ServerConfig};
