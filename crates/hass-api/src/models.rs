//! Home Assistant payload shapes the engine must discriminate.
//!
//! Only the structures the client itself decodes live here: entity state
//! snapshots (`get_states`), the server configuration (`get_config`), and
//! the event payloads carried on the `event` channel. Everything else stays
//! an undecoded JSON subtree.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ── Entity state ─────────────────────────────────────────────────────

/// One entity's latest state snapshot, as returned by `get_states` and
/// embedded in `state_changed` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HassState {
    /// Entity id, e.g. `light.kitchen`.
    pub entity_id: String,

    /// Current state value (`"on"`, `"23.5"`, `"unavailable"`, ...).
    pub state: String,

    /// Arbitrary per-entity attributes.
    #[serde(default)]
    pub attributes: HashMap<String, Value>,

    #[serde(default)]
    pub last_changed: Option<DateTime<Utc>>,

    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,

    #[serde(default)]
    pub context: Option<HassContext>,
}

/// Change-tracking context attached to states and events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HassContext {
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

// ── Server configuration ─────────────────────────────────────────────

/// Decoded `get_config` result.
///
/// Fields default individually: Home Assistant grows this payload release
/// to release and the client must not reject new servers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HassConfig {
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    #[serde(default)]
    pub elevation: f64,
    #[serde(default)]
    pub unit_system: UnitSystem,
    #[serde(default)]
    pub location_name: String,
    #[serde(default)]
    pub time_zone: String,
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub config_dir: Option<String>,
    /// Running state of the server (`"RUNNING"` once started).
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub external_url: Option<String>,
    #[serde(default)]
    pub internal_url: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

/// Measurement units the server reports with.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitSystem {
    #[serde(default)]
    pub length: String,
    #[serde(default)]
    pub mass: String,
    #[serde(default)]
    pub temperature: String,
    #[serde(default)]
    pub volume: String,
    #[serde(default)]
    pub pressure: Option<String>,
    #[serde(default)]
    pub wind_speed: Option<String>,
    #[serde(default)]
    pub accumulated_precipitation: Option<String>,
}

// ── Events ───────────────────────────────────────────────────────────

/// An unsolicited server event, with its `data` payload already
/// discriminated into the shapes consumers care about.
#[derive(Debug, Clone)]
pub struct HassEvent {
    /// Event type, e.g. `state_changed`, `call_service`.
    pub event_type: String,

    /// `LOCAL` or `REMOTE`.
    pub origin: Option<String>,

    pub time_fired: Option<DateTime<Utc>>,

    pub data: EventData,
}

/// Typed `event.data` payloads.
///
/// Anything that is not a recognized shape (or fails to decode as one)
/// falls back to the raw JSON subtree rather than being dropped.
#[derive(Debug, Clone)]
pub enum EventData {
    StateChanged(StateChangedData),
    ServiceCalled(ServiceCalledData),
    Other(Value),
}

/// `state_changed` payload. `new_state` is `None` when the entity was
/// removed, `old_state` is `None` when it first appeared.
#[derive(Debug, Clone, Deserialize)]
pub struct StateChangedData {
    #[serde(default)]
    pub entity_id: String,
    #[serde(default)]
    pub old_state: Option<HassState>,
    #[serde(default)]
    pub new_state: Option<HassState>,
}

/// `call_service` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceCalledData {
    pub domain: String,
    pub service: String,
    #[serde(default)]
    pub service_data: Value,
}

impl HassEvent {
    /// The `state_changed` payload, if that is what this event carries.
    pub fn state_change(&self) -> Option<&StateChangedData> {
        match &self.data {
            EventData::StateChanged(data) => Some(data),
            _ => None,
        }
    }

    /// The `call_service` payload, if that is what this event carries.
    pub fn service_call(&self) -> Option<&ServiceCalledData> {
        match &self.data {
            EventData::ServiceCalled(data) => Some(data),
            _ => None,
        }
    }
}

/// Wire shape of an event before `data` is discriminated.
#[derive(Debug, Deserialize)]
struct WireEvent {
    event_type: String,
    #[serde(default)]
    origin: Option<String>,
    #[serde(default)]
    time_fired: Option<DateTime<Utc>>,
    #[serde(default)]
    data: Value,
}

impl From<WireEvent> for HassEvent {
    fn from(wire: WireEvent) -> Self {
        let data = match wire.event_type.as_str() {
            "state_changed" => match serde_json::from_value::<StateChangedData>(wire.data.clone())
            {
                Ok(data) => EventData::StateChanged(data),
                Err(_) => EventData::Other(wire.data),
            },
            "call_service" => match serde_json::from_value::<ServiceCalledData>(wire.data.clone())
            {
                Ok(data) => EventData::ServiceCalled(data),
                Err(_) => EventData::Other(wire.data),
            },
            _ => EventData::Other(wire.data),
        };

        Self {
            event_type: wire.event_type,
            origin: wire.origin,
            time_fired: wire.time_fired,
            data,
        }
    }
}

impl<'de> Deserialize<'de> for HassEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        WireEvent::deserialize(deserializer).map(Into::into)
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn state_changed_event_is_typed() {
        let event: HassEvent = serde_json::from_value(json!({
            "event_type": "state_changed",
            "origin": "LOCAL",
            "time_fired": "2026-07-01T12:00:00+00:00",
            "data": {
                "entity_id": "light.kitchen",
                "old_state": {
                    "entity_id": "light.kitchen",
                    "state": "off",
                    "attributes": {}
                },
                "new_state": {
                    "entity_id": "light.kitchen",
                    "state": "on",
                    "attributes": { "brightness": 254 }
                }
            }
        }))
        .unwrap();

        let change = event.state_change().expect("typed state_changed payload");
        assert_eq!(change.entity_id, "light.kitchen");
        assert_eq!(change.old_state.as_ref().unwrap().state, "off");
        let new_state = change.new_state.as_ref().unwrap();
        assert_eq!(new_state.state, "on");
        assert_eq!(new_state.attributes["brightness"], 254);
    }

    #[test]
    fn call_service_event_is_typed() {
        let event: HassEvent = serde_json::from_value(json!({
            "event_type": "call_service",
            "origin": "LOCAL",
            "data": {
                "domain": "light",
                "service": "turn_on",
                "service_data": { "entity_id": "light.kitchen" }
            }
        }))
        .unwrap();

        let call = event.service_call().expect("typed call_service payload");
        assert_eq!(call.domain, "light");
        assert_eq!(call.service, "turn_on");
        assert_eq!(call.service_data["entity_id"], "light.kitchen");
    }

    #[test]
    fn unknown_event_type_keeps_raw_data() {
        let event: HassEvent = serde_json::from_value(json!({
            "event_type": "zone_entered",
            "data": { "zone": "home" }
        }))
        .unwrap();

        assert!(matches!(&event.data, EventData::Other(v) if v["zone"] == "home"));
        assert!(event.state_change().is_none());
    }

    #[test]
    fn malformed_known_payload_falls_back_to_raw() {
        // call_service without required fields must not fail the whole event
        let event: HassEvent = serde_json::from_value(json!({
            "event_type": "call_service",
            "data": { "unexpected": true }
        }))
        .unwrap();

        assert!(matches!(event.data, EventData::Other(_)));
    }

    #[test]
    fn config_tolerates_missing_fields() {
        let config: HassConfig =
            serde_json::from_value(json!({ "location_name": "Home", "version": "2026.7.0" }))
                .unwrap();
        assert_eq!(config.location_name, "Home");
        assert_eq!(config.version, "2026.7.0");
        assert!(config.components.is_empty());
    }
}
