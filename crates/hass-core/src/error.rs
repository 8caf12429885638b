use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The server rejected the access token during connect.
    #[error("authentication rejected by the server")]
    AuthFailed,

    /// Operation attempted while the hub is not connected.
    #[error("hub is not connected")]
    NotConnected,

    /// Failure in the underlying WebSocket session.
    #[error(transparent)]
    Api(#[from] hass_api::Error),
}

impl CoreError {
    /// Returns `true` if the underlying session is gone and the hub has
    /// to be reconnected by whoever owns it.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::NotConnected => true,
            Self::Api(e) => e.is_disconnect(),
            Self::AuthFailed => false,
        }
    }
}
