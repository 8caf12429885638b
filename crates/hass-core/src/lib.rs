//! Reactive entity-state layer over the `hass-api` WebSocket client.
//!
//! The session in `hass-api` mirrors entity state once, at connect time.
//! This crate is the layer above: [`Hub`] keeps an [`EntityStore`] live by
//! folding `state_changed` events in as they arrive, and fans every server
//! event out to any number of consumers through a broadcast channel.
//! Reconnection stays out of scope here too — the hub reports a lost
//! session through [`HubStatus`] and lets its owner decide.

pub mod error;
pub mod hub;
pub mod model;
pub mod store;
pub mod stream;

pub use error::CoreError;
pub use hub::{Hub, HubConfig, HubStatus};
pub use model::EntityId;
pub use store::EntityStore;
pub use stream::{EntityStream, EventFilter};

// Re-export the wire-level types consumers handle constantly.
pub use hass_api::{
    ConnectOptions, EventData, HassConfig, HassEvent, HassState, SessionConfig,
};
