//! In-memory item and supply-profile registries.
//!
//! Content loading (file formats, search paths) is owned by external tooling;
//! the kernel only consumes registries that were built programmatically or
//! decoded from an already-loaded JSON value.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemDef {
    pub item_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ItemDef {
    pub fn new(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            name: None,
            metadata: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ItemRegistry {
    items: BTreeMap<String, ItemDef>,
}

impl ItemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: impl IntoIterator<Item = ItemDef>) -> Self {
        let mut registry = Self::new();
        for item in items {
            registry.insert(item);
        }
        registry
    }

    pub fn insert(&mut self, item: ItemDef) {
        self.items.insert(item.item_id.clone(), item);
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.items.contains_key(item_id)
    }

    pub fn get(&self, item_id: &str) -> Option<&ItemDef> {
        self.items.get(item_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// One recurring consumption lane of a supply profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupplyConsumeDef {
    pub item_id: String,
    pub quantity: u64,
    pub interval_ticks: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupplyProfile {
    pub profile_id: String,
    #[serde(default)]
    pub consumes: Vec<SupplyConsumeDef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SupplyProfileRegistry {
    profiles: BTreeMap<String, SupplyProfile>,
}

impl SupplyProfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_profiles(profiles: impl IntoIterator<Item = SupplyProfile>) -> Self {
        let mut registry = Self::new();
        for profile in profiles {
            registry.insert(profile);
        }
        registry
    }

    pub fn insert(&mut self, profile: SupplyProfile) {
        self.profiles.insert(profile.profile_id.clone(), profile);
    }

    pub fn get(&self, profile_id: &str) -> Option<&SupplyProfile> {
        self.profiles.get(profile_id)
    }

    pub fn profiles(&self) -> impl Iterator<Item = &SupplyProfile> {
        self.profiles.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_lookup_by_id() {
        let registry = ItemRegistry::from_items([ItemDef::new("ration"), ItemDef::new("torch")]);
        assert!(registry.contains("ration"));
        assert!(!registry.contains("sword"));
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec!["ration", "torch"]);
    }

    #[test]
    fn supply_profile_round_trip() {
        let registry = SupplyProfileRegistry::from_profiles([SupplyProfile {
            profile_id: "player_default".to_string(),
            consumes: vec![SupplyConsumeDef {
                item_id: "ration".to_string(),
                quantity: 1,
                interval_ticks: 240,
            }],
        }]);
        let encoded = serde_json::to_string(&registry).expect("encode");
        let decoded: SupplyProfileRegistry = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(registry, decoded);
    }
}
