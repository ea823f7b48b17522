//! RTMP relay server
//!
//! [`RelayServer`] accepts TCP connections and runs one [`Connection`] task
//! per peer. Connections meet each other only through the shared
//! [`StreamRegistry`](crate::registry::StreamRegistry).

pub mod config;
pub mod connection;
pub mod listener;

pub use config::ServerConfig;
pub use connection::Connection;
pub use listener::RelayServer;
