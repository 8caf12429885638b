// ── Domain identifiers ──
//
// The wire DTOs (states, config, events) live in `hass-api`; this module
// adds the strongly-typed identifier the store keys on.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A Home Assistant entity identifier: `domain.object_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The domain prefix, e.g. `light` for `light.kitchen`.
    pub fn domain(&self) -> &str {
        self.0.split('.').next().unwrap_or(&self.0)
    }

    /// The part after the domain, empty when the id carries no dot.
    pub fn object_id(&self) -> &str {
        self.0.split_once('.').map_or("", |(_, object)| object)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_domain_and_object() {
        let id = EntityId::from("light.kitchen_ceiling");
        assert_eq!(id.domain(), "light");
        assert_eq!(id.object_id(), "kitchen_ceiling");
        assert_eq!(id.to_string(), "light.kitchen_ceiling");
    }

    #[test]
    fn tolerates_missing_dot() {
        let id = EntityId::from("weird");
        assert_eq!(id.domain(), "weird");
        assert_eq!(id.object_id(), "");
    }
}
