//! Device-link error taxonomy

use thiserror::Error;

use crate::pipeline::state::InvalidTransition;

/// Errors raised by a device link's receive loop
///
/// Connect and stream failures drive the link into `Faulted`; decode
/// failures are absorbed inside the loop (frame dropped, link stays
/// `Opened`) and only surface here if the decoder itself is unusable.
/// None of these cross the task boundary into the consumer; the lifecycle
/// layer observes them and decides whether to retry.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Transport refused the connection or the endpoint is unreachable
    #[error("connect failed: {reason}")]
    Connect { reason: String },

    /// Mid-session read or write error
    #[error("stream interrupted: {reason}")]
    Stream { reason: String },

    /// Decoder rejected a frame in a way that cannot be skipped
    #[error("decode failed: {reason}")]
    Decode { reason: String },

    /// The link attempted an impossible lifecycle transition
    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

impl LinkError {
    /// Wrap a transport connect error
    pub fn connect(err: impl std::fmt::Display) -> Self {
        LinkError::Connect {
            reason: err.to_string(),
        }
    }

    /// Wrap a mid-session transport error
    pub fn stream(err: impl std::fmt::Display) -> Self {
        LinkError::Stream {
            reason: err.to_string(),
        }
    }
}
