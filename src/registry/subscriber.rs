//! Subscribers and their outbound sinks
//!
//! A publish call must never wait on a viewer, so delivery goes through
//! [`FrameSink::try_deliver`], which either accepts the event immediately or
//! fails. Any failure gets the subscriber removed.

use std::fmt;

use tokio::sync::mpsc;

use super::frame::StreamEvent;

/// Registry-assigned subscriber identity
pub type SubscriberId = u64;

/// Why an event could not be handed to a subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkError {
    /// The subscriber's queue is full (it is not keeping up)
    Full,
    /// The receiving side is gone
    Closed,
    /// The subscriber was marked disconnected
    Disconnected,
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Full => write!(f, "subscriber queue full"),
            SinkError::Closed => write!(f, "subscriber channel closed"),
            SinkError::Disconnected => write!(f, "subscriber disconnected"),
        }
    }
}

impl std::error::Error for SinkError {}

/// Non-blocking destination for stream events
pub trait FrameSink: Send + Sync + 'static {
    fn try_deliver(&self, event: StreamEvent) -> Result<(), SinkError>;
}

impl FrameSink for mpsc::Sender<StreamEvent> {
    fn try_deliver(&self, event: StreamEvent) -> Result<(), SinkError> {
        self.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

/// One viewer attached to a publisher
pub struct Subscriber {
    id: SubscriberId,
    connected: bool,
    sink: Box<dyn FrameSink>,
}

impl Subscriber {
    pub fn new(id: SubscriberId, sink: impl FrameSink) -> Self {
        Self {
            id,
            connected: true,
            sink: Box::new(sink),
        }
    }

    /// Subscriber backed by a bounded channel of `capacity` events
    pub fn channel(id: SubscriberId, capacity: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(id, tx), rx)
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn disconnect(&mut self) {
        self.connected = false;
    }

    pub(crate) fn deliver(&self, event: StreamEvent) -> Result<(), SinkError> {
        if !self.connected {
            return Err(SinkError::Disconnected);
        }
        self.sink.try_deliver(event)
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("connected", &self.connected)
            .finish()
    }
}
