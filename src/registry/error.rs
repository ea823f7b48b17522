//! Registry error types

use super::frame::StreamKey;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Another session is already publishing this key
    PublisherConflict(StreamKey),
    /// The calling session does not hold the stream
    NotPublisher(StreamKey),
    /// The registry is at its stream limit
    TooManyStreams { limit: usize },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::PublisherConflict(key) => {
                write!(f, "Stream already has a publisher: {}", key)
            }
            RegistryError::NotPublisher(key) => {
                write!(f, "Session is not publishing stream: {}", key)
            }
            RegistryError::TooManyStreams { limit } => {
                write!(f, "Stream limit of {} reached", limit)
            }
        }
    }
}

impl std::error::Error for RegistryError {}
