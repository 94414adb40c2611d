//! Per-session registry of discovered devices

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::bluetooth::advertisement::IdentityKey;

/// Name shown for devices that never advertised one
pub const UNKNOWN_NAME: &str = "N/A";

/// Attributes carried by one sighting of a device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceAttributes {
    pub name: Option<String>,
    pub rssi: i16,
    pub tx_power_level: Option<i16>,
    pub advertise_flags: Option<i32>,
    pub service_uuids: Option<Vec<String>>,
    pub manufacturer_specific_data: Option<Vec<String>>,
}

/// Latest known state of one physical peripheral
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub identity_key: IdentityKey,
    pub name: String,
    /// Signal strength in dBm, most recent sighting
    pub rssi: i16,
    pub tx_power_level: Option<i16>,
    pub advertise_flags: Option<i32>,
    /// `None` when not advertised, `Some(vec![])` when advertised empty
    pub service_uuids: Option<Vec<String>>,
    /// `key=value` entries
    pub manufacturer_specific_data: Option<Vec<String>>,
}

impl DeviceRecord {
    fn new(identity_key: IdentityKey, attributes: DeviceAttributes) -> Self {
        let name = attributes
            .name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| UNKNOWN_NAME.to_string());

        Self {
            identity_key,
            name,
            rssi: attributes.rssi,
            tx_power_level: attributes.tx_power_level,
            advertise_flags: attributes.advertise_flags,
            service_uuids: attributes.service_uuids,
            manufacturer_specific_data: attributes.manufacturer_specific_data,
        }
    }

    fn merge(&mut self, attributes: DeviceAttributes) {
        // A blank name never replaces a known one
        if let Some(name) = attributes.name.filter(|n| !n.is_empty()) {
            self.name = name;
        }
        self.rssi = attributes.rssi;
        self.tx_power_level = attributes.tx_power_level;
        self.advertise_flags = attributes.advertise_flags;
        self.service_uuids = attributes.service_uuids;
        self.manufacturer_specific_data = attributes.manufacturer_specific_data;
    }
}

/// Devices seen so far, in first-seen order
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    records: Vec<DeviceRecord>,
    index: HashMap<IdentityKey, usize>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new device or merge a sighting into the existing record.
    ///
    /// Returns `true` when the key was seen for the first time.
    pub fn upsert(&mut self, key: IdentityKey, attributes: DeviceAttributes) -> bool {
        if let Some(&position) = self.index.get(&key) {
            self.records[position].merge(attributes);
            return false;
        }

        self.index.insert(key.clone(), self.records.len());
        self.records.push(DeviceRecord::new(key, attributes));
        true
    }

    /// Copy of all records in first-seen order
    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        self.records.clone()
    }

    pub fn get(&self, key: &IdentityKey) -> Option<&DeviceRecord> {
        self.index.get(key).map(|&position| &self.records[position])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sighting(name: Option<&str>, rssi: i16) -> DeviceAttributes {
        DeviceAttributes {
            name: name.map(str::to_string),
            rssi,
            ..DeviceAttributes::default()
        }
    }

    #[test]
    fn test_repeated_sightings_keep_one_record_with_last_values() {
        let mut registry = DeviceRegistry::new();
        let key = IdentityKey::from("AA:BB");

        for rssi in [-40, -55, -70] {
            registry.upsert(key.clone(), sighting(Some("Widget"), rssi));
        }

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&key).unwrap().rssi, -70);
    }

    #[test]
    fn test_first_seen_order_is_kept_on_update() {
        let mut registry = DeviceRegistry::new();
        assert!(registry.upsert("AA:BB".into(), sighting(None, -40)));
        assert!(registry.upsert("CC:DD".into(), sighting(None, -50)));
        assert!(!registry.upsert("AA:BB".into(), sighting(None, -90)));

        let keys: Vec<_> = registry
            .snapshot()
            .into_iter()
            .map(|r| r.identity_key.to_string())
            .collect();
        assert_eq!(keys, vec!["AA:BB", "CC:DD"]);
    }

    #[test]
    fn test_name_merge_rule() {
        let mut registry = DeviceRegistry::new();
        let key = IdentityKey::from("AA:BB");

        registry.upsert(key.clone(), sighting(Some("Widget"), -40));
        registry.upsert(key.clone(), sighting(None, -41));
        assert_eq!(registry.get(&key).unwrap().name, "Widget");

        registry.upsert(key.clone(), sighting(Some(""), -42));
        assert_eq!(registry.get(&key).unwrap().name, "Widget");

        registry.upsert("CC:DD".into(), sighting(None, -50));
        assert_eq!(registry.get(&"CC:DD".into()).unwrap().name, UNKNOWN_NAME);
    }

    #[test]
    fn test_optional_attributes_are_replaced() {
        let mut registry = DeviceRegistry::new();
        let key = IdentityKey::from("AA:BB");

        registry.upsert(
            key.clone(),
            DeviceAttributes {
                service_uuids: Some(vec!["180d".into()]),
                tx_power_level: Some(4),
                ..sighting(Some("Widget"), -40)
            },
        );
        registry.upsert(key.clone(), sighting(None, -45));

        let record = registry.get(&key).unwrap();
        assert_eq!(record.service_uuids, None);
        assert_eq!(record.tx_power_level, None);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let mut registry = DeviceRegistry::new();
        registry.upsert("AA:BB".into(), sighting(None, -40));
        let before = registry.snapshot();
        registry.upsert("AA:BB".into(), sighting(None, -80));
        assert_eq!(before[0].rssi, -40);
    }
}
