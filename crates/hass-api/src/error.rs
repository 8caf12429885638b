use std::time::Duration;

use thiserror::Error;

/// Top-level error type for the `hass-api` crate.
///
/// Covers every failure mode of a session: argument validation, lifecycle
/// preconditions, per-call deadlines, cancellation, the WebSocket
/// transport, and wire decoding. An `auth_invalid` from the server is not
/// an error here — `connect` reports it as `Ok(false)`. `hass-core` maps
/// these into its own diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Arguments & lifecycle ───────────────────────────────────────
    /// A required argument was missing or empty.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// URL parsing error.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// `connect` called while a session is already active.
    #[error("session is already connected")]
    AlreadyConnected,

    /// Operation attempted without an active session.
    #[error("session is not connected")]
    NotConnected,

    // ── Calls ───────────────────────────────────────────────────────
    /// No reply arrived within the per-call deadline. The session is
    /// still live; only this call gave up.
    #[error("no reply within {timeout:?}")]
    Timeout { timeout: Duration },

    /// Session cancellation was requested while the call was in flight.
    #[error("operation cancelled")]
    Cancelled,

    /// The outbound queue is saturated, which means the transport has
    /// stalled. Fail fast rather than buffer unboundedly.
    #[error("outbound queue full")]
    OutboundQueueFull,

    /// `subscribe_events` got `success = false`.
    #[error("event subscription rejected by the server")]
    SubscriptionRejected,

    // ── Transport & wire ────────────────────────────────────────────
    /// WebSocket send, receive, or upgrade failure.
    #[error("WebSocket transport error: {0}")]
    Transport(String),

    /// The server violated the protocol (unexpected handshake message,
    /// reply shape mismatch).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A `result` subtree could not be decoded to the shape the issuing
    /// command expects. Carries the raw body for debugging.
    #[error("deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying at a
    /// higher layer.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::OutboundQueueFull | Self::Transport(_)
        )
    }

    /// Returns `true` if the session itself is gone (as opposed to a
    /// single call failing).
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Cancelled | Self::NotConnected)
    }
}
