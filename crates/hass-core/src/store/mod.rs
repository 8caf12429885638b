// ── Live entity-state store ──
//
// The WebSocket session's mirror is a connect-time snapshot; this store is
// the layer that keeps it live, folding `state_changed` events in as they
// arrive. Mutations are broadcast to subscribers via `watch` channels.

mod collection;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use hass_api::{HassEvent, HassState};
use tokio::sync::watch;

use crate::model::EntityId;
use crate::stream::EntityStream;
use collection::EntityCollection;

/// Thread-safe store of the latest known state per entity.
///
/// Seeded from the bulk `get_states` snapshot at connect, then updated
/// entity-by-entity from `state_changed` events. All reads are snapshot
/// or point lookups; subscribers get push notification on change.
pub struct EntityStore {
    entities: EntityCollection,
    last_event: watch::Sender<Option<DateTime<Utc>>>,
}

impl EntityStore {
    pub fn new() -> Self {
        let (last_event, _) = watch::channel(None);
        Self {
            entities: EntityCollection::new(),
            last_event,
        }
    }

    /// Replace the store contents with a bulk snapshot.
    pub(crate) fn seed(&self, states: Vec<HassState>) {
        self.entities.clear();
        for state in states {
            self.entities.upsert(state);
        }
    }

    /// Fold one event into the store. Only `state_changed` events mutate
    /// it: a present `new_state` upserts, an absent one removes the
    /// entity. Returns `true` if the store changed.
    pub(crate) fn apply_event(&self, event: &HassEvent) -> bool {
        let Some(change) = event.state_change() else {
            return false;
        };

        match &change.new_state {
            Some(new_state) => {
                self.entities.upsert(new_state.clone());
            }
            None => {
                if self
                    .entities
                    .remove(&EntityId::from(change.entity_id.as_str()))
                    .is_none()
                {
                    return false;
                }
            }
        }

        let stamp = event.time_fired.unwrap_or_else(Utc::now);
        self.last_event.send_modify(|last| *last = Some(stamp));
        true
    }

    // ── Lookups ──────────────────────────────────────────────────────

    pub fn get(&self, id: &EntityId) -> Option<Arc<HassState>> {
        self.entities.get(id)
    }

    pub fn snapshot(&self) -> Arc<Vec<Arc<HassState>>> {
        self.entities.snapshot()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Mutation counter; handy for cheap change detection in tests and
    /// polling consumers.
    pub fn version(&self) -> u64 {
        self.entities.version()
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub fn subscribe(&self) -> EntityStream {
        EntityStream::new(self.entities.subscribe())
    }

    /// When the store last changed due to an event.
    pub fn last_event(&self) -> watch::Receiver<Option<DateTime<Utc>>> {
        self.last_event.subscribe()
    }
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}
