// ── Filter predicates for the event stream ──
//
// Used by consumers to pick events out of the hub's broadcast channel
// without re-subscribing on the server side.

use hass_api::HassEvent;

use crate::model::EntityId;

/// Filter predicate for server events.
pub enum EventFilter {
    All,
    /// Match on the raw `event_type` string.
    ByType(String),
    /// `state_changed` events for one entity.
    ByEntity(EntityId),
    /// Any `state_changed` event.
    StateChanges,
    /// Any `call_service` event.
    ServiceCalls,
    Custom(Box<dyn Fn(&HassEvent) -> bool + Send + Sync>),
}

impl EventFilter {
    pub fn matches(&self, event: &HassEvent) -> bool {
        match self {
            Self::All => true,
            Self::ByType(event_type) => event.event_type == *event_type,
            Self::ByEntity(id) => event
                .state_change()
                .is_some_and(|change| change.entity_id == id.as_str()),
            Self::StateChanges => event.state_change().is_some(),
            Self::ServiceCalls => event.service_call().is_some(),
            Self::Custom(predicate) => predicate(event),
        }
    }
}
