//! Async Rust client for the Home Assistant WebSocket API.
//!
//! The crate centers on [`HassClient`], a long-lived session over a single
//! WebSocket connection: it authenticates with a long-lived access token,
//! issues request/response commands (`get_config`, `get_states`,
//! `call_service`, `ping`), consumes the asynchronous event stream, and
//! keeps a connect-time mirror of entity state.
//!
//! Internally a connected session runs two pumps — one reader, one writer —
//! over independently-owned transport halves, correlates replies to callers
//! through a pending-commands map with per-id one-shot completions, and
//! coordinates shutdown across both pumps with a cancellation token.
//!
//! # Example
//!
//! ```rust,ignore
//! use hass_api::{ConnectOptions, HassClient, SessionConfig};
//!
//! let client = HassClient::new(SessionConfig::new(
//!     "ws://hass.local:8123/api/websocket",
//!     std::env::var("HASS_TOKEN")?,
//! ));
//!
//! let authed = client
//!     .connect(ConnectOptions { get_states_on_connect: true, subscribe_events: true })
//!     .await?;
//! assert!(authed);
//!
//! client.call_service("light", "turn_on", None).await?;
//! while let Ok(event) = client.read_event().await {
//!     println!("{}: {:?}", event.event_type, event.data);
//! }
//!
//! client.close().await?;
//! ```
//!
//! Reconnection policy is deliberately out of scope: the session surfaces
//! disconnects (through errors and the connection-state watch) and a higher
//! layer decides what to do about them.

pub mod error;
pub mod messages;
pub mod models;
mod pump;
pub mod session;
pub mod transport;

pub use error::Error;
pub use messages::inbound::{CommandReply, InboundKind, InboundMessage, ReplyPayload};
pub use messages::outbound::{CommandKind, CommandRequest, OutboundMessage};
pub use models::{
    EventData, HassConfig, HassContext, HassEvent, HassState, ServiceCalledData,
    StateChangedData, UnitSystem,
};
pub use session::{ConnectOptions, ConnectionState, HassClient, SessionConfig};
pub use transport::{
    Frame, TransportFactory, TransportPair, TransportReader, TransportWriter, TungsteniteFactory,
};
