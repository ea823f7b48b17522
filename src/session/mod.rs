//! Per-connection session state
//!
//! [`SessionState`] holds what one connection has negotiated (chunk sizes,
//! acknowledgement window, application name) and the role it plays in the
//! registry. [`StreamState`] tracks each message stream it has created.

pub mod state;
pub mod stream;

pub use state::{SessionPhase, SessionRole, SessionState, MAX_MESSAGE_STREAMS};
pub use stream::{StreamMode, StreamState};
