// ── Reactive entity collection ──
//
// Lock-free concurrent storage for entity states with push-based change
// notification via `watch` channels.

use std::sync::Arc;

use dashmap::DashMap;
use hass_api::HassState;
use tokio::sync::watch;

use crate::model::EntityId;

/// Concurrent entity-state collection.
///
/// Reads are wait-free (`DashMap` shards for writes). Every mutation bumps
/// a version counter and rebuilds the snapshot that subscribers receive.
pub(crate) struct EntityCollection {
    by_id: DashMap<EntityId, Arc<HassState>>,
    version: watch::Sender<u64>,
    snapshot: watch::Sender<Arc<Vec<Arc<HassState>>>>,
}

impl EntityCollection {
    pub(crate) fn new() -> Self {
        let (version, _) = watch::channel(0u64);
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            by_id: DashMap::new(),
            version,
            snapshot,
        }
    }

    /// Insert or replace an entity's state. Returns `true` if the entity
    /// was new.
    pub(crate) fn upsert(&self, state: HassState) -> bool {
        let id = EntityId::from(state.entity_id.clone());
        let is_new = self.by_id.insert(id, Arc::new(state)).is_none();
        self.rebuild_snapshot();
        self.bump_version();
        is_new
    }

    /// Remove an entity. Returns the removed state if it existed.
    pub(crate) fn remove(&self, id: &EntityId) -> Option<Arc<HassState>> {
        let removed = self.by_id.remove(id).map(|(_, state)| state);
        if removed.is_some() {
            self.rebuild_snapshot();
            self.bump_version();
        }
        removed
    }

    pub(crate) fn get(&self, id: &EntityId) -> Option<Arc<HassState>> {
        self.by_id.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Current snapshot (cheap `Arc` clone).
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<HassState>>> {
        self.snapshot.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<HassState>>>> {
        self.snapshot.subscribe()
    }

    pub(crate) fn version(&self) -> u64 {
        *self.version.borrow()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub(crate) fn clear(&self) {
        self.by_id.clear();
        self.rebuild_snapshot();
        self.bump_version();
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn rebuild_snapshot(&self) {
        let values: Vec<Arc<HassState>> = self
            .by_id
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }

    fn bump_version(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(entity_id: &str, value: &str) -> HassState {
        serde_json::from_value(serde_json::json!({
            "entity_id": entity_id,
            "state": value
        }))
        .unwrap()
    }

    #[test]
    fn upsert_reports_new_vs_replaced() {
        let col = EntityCollection::new();
        assert!(col.upsert(state("light.a", "on")));
        assert!(!col.upsert(state("light.a", "off")));
        assert_eq!(col.get(&EntityId::from("light.a")).unwrap().state, "off");
    }

    #[test]
    fn remove_updates_snapshot() {
        let col = EntityCollection::new();
        col.upsert(state("light.a", "on"));
        col.upsert(state("light.b", "on"));
        assert_eq!(col.snapshot().len(), 2);

        let removed = col.remove(&EntityId::from("light.a"));
        assert_eq!(removed.unwrap().entity_id, "light.a");
        assert_eq!(col.snapshot().len(), 1);
        assert!(col.remove(&EntityId::from("light.a")).is_none());
    }

    #[test]
    fn version_bumps_on_every_mutation() {
        let col = EntityCollection::new();
        assert_eq!(col.version(), 0);
        col.upsert(state("light.a", "on"));
        col.upsert(state("light.a", "off"));
        col.remove(&EntityId::from("light.a"));
        assert_eq!(col.version(), 3);
    }

    #[test]
    fn clear_empties_everything() {
        let col = EntityCollection::new();
        col.upsert(state("light.a", "on"));
        col.clear();
        assert!(col.is_empty());
        assert!(col.snapshot().is_empty());
    }
}
