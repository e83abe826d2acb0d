// ABOUTME: Layered error types for the framer, router, and process bootstrap
// ABOUTME: Small per-module enums with #[from] conversions, boxed errors only at the outer boundary

use std::io;

use thiserror::Error;

/// Errors surfaced by a [`crate::frame::Framer`].
///
/// I/O failures pass straight through; anything the framer can't make sense
/// of on the wire becomes `Protocol`.
#[derive(Debug, Error)]
pub enum FramerError {
    #[error("connection error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl FramerError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }
}

/// Errors surfaced by the slot router's discovery and routing paths.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error(transparent)]
    Framer(#[from] FramerError),

    #[error("dial failed: {0}")]
    Dial(#[source] io::Error),

    #[error("slot {0} out of range [0, 16384)")]
    SlotOutOfRange(i64),

    #[error("Error! MOVED after MOVED")]
    MovedAfterMoved,

    #[error("cluster not ready: {0}")]
    ClusterNotReady(String),

    #[error("malformed CLUSTER SLOTS reply: {0}")]
    MalformedSlotsReply(String),
}

/// Top-level error returned from `main`, covering bootstrap failures.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    Router(#[from] RouterError),

    #[error("failed to bind listener: {0}")]
    Listen(#[source] io::Error),
}

impl From<io::Error> for RouterError {
    fn from(err: io::Error) -> Self {
        Self::Dial(err)
    }
}
