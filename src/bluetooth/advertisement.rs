//! Decoding of native advertisement payloads and device identity

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bluetooth::registry::DeviceAttributes;
use crate::error::{Result, ScanError};

/// How a platform identifies peripherals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityPlatform {
    /// The hardware address is exposed and used verbatim
    HardwareAddress,
    /// The address is hidden; the platform supplies a stable per-peripheral UUID
    PeripheralUuid,
}

impl IdentityPlatform {
    /// The identity scheme of the platform this binary was built for
    pub fn current() -> Self {
        if cfg!(any(target_os = "macos", target_os = "ios")) {
            Self::PeripheralUuid
        } else {
            Self::HardwareAddress
        }
    }
}

impl Default for IdentityPlatform {
    fn default() -> Self {
        Self::current()
    }
}

/// Stable key used to deduplicate sightings of one peripheral within a session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdentityKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A single advertisement as delivered by the native layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAdvertisement {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub uuid: Option<String>,
    pub rssi: i16,
    #[serde(default)]
    pub tx_power_level: Option<i16>,
    #[serde(default)]
    pub advertise_flags: Option<i32>,
    #[serde(default)]
    pub service_uuids: Option<Vec<String>>,
    #[serde(default)]
    pub manufacturer_specific_data: Option<Vec<String>>,
}

impl RawAdvertisement {
    /// Validate an untyped payload. Anything that does not decode is rejected here
    /// and never reaches the registry.
    pub fn decode(payload: &Value) -> Result<Self> {
        if !payload.is_object() {
            return Err(ScanError::InvalidAdvertisement(format!(
                "expected an object, got {}",
                payload
            )));
        }
        Self::deserialize(payload).map_err(|e| ScanError::InvalidAdvertisement(e.to_string()))
    }

    /// The attributes carried by this advertisement
    pub fn attributes(&self) -> DeviceAttributes {
        DeviceAttributes {
            name: self.name.clone(),
            rssi: self.rssi,
            tx_power_level: self.tx_power_level,
            advertise_flags: self.advertise_flags,
            service_uuids: self.service_uuids.clone(),
            manufacturer_specific_data: self.manufacturer_specific_data.clone(),
        }
    }
}

/// Derives identity keys from advertisements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityResolver {
    platform: IdentityPlatform,
}

impl IdentityResolver {
    pub fn new(platform: IdentityPlatform) -> Self {
        Self { platform }
    }

    pub fn platform(&self) -> IdentityPlatform {
        self.platform
    }

    /// Resolve the identity key of an advertisement.
    ///
    /// Only the platform's identity field is consulted, never the name or RSSI.
    /// A missing or blank identifier is rejected rather than mapped to a
    /// placeholder that could collide with other devices.
    pub fn resolve(&self, advertisement: &RawAdvertisement) -> Result<IdentityKey> {
        let (field, value) = match self.platform {
            IdentityPlatform::HardwareAddress => ("address", advertisement.address.as_deref()),
            IdentityPlatform::PeripheralUuid => ("uuid", advertisement.uuid.as_deref()),
        };

        match value.map(str::trim) {
            Some(id) if !id.is_empty() => Ok(IdentityKey(id.to_string())),
            _ => Err(ScanError::InvalidAdvertisement(format!(
                "missing {} identity",
                field
            ))),
        }
    }

    /// Decode a payload and resolve its identity in one step
    pub fn decode(&self, payload: &Value) -> Result<(IdentityKey, DeviceAttributes)> {
        let advertisement = RawAdvertisement::decode(payload)?;
        let key = self.resolve(&advertisement)?;
        Ok((key, advertisement.attributes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_address_platform_uses_address_verbatim() {
        let resolver = IdentityResolver::new(IdentityPlatform::HardwareAddress);
        let (key, attrs) = resolver
            .decode(&json!({ "address": "AA:BB:CC:DD:EE:FF", "uuid": "ignored", "rssi": -40 }))
            .unwrap();
        assert_eq!(key.as_str(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(attrs.rssi, -40);
    }

    #[test]
    fn test_uuid_platform_ignores_address() {
        let resolver = IdentityResolver::new(IdentityPlatform::PeripheralUuid);
        let payload = json!({
            "name": "Widget",
            "address": "00:00:00:00:00:00",
            "uuid": "6c1f3f5e-8a3b-4bd1-9d5e-0f2a7d1c9b11",
            "rssi": -60
        });
        let (key, _) = resolver.decode(&payload).unwrap();
        assert_eq!(key.as_str(), "6c1f3f5e-8a3b-4bd1-9d5e-0f2a7d1c9b11");
    }

    #[test]
    fn test_missing_identity_is_rejected() {
        let resolver = IdentityResolver::new(IdentityPlatform::PeripheralUuid);
        let err = resolver
            .decode(&json!({ "name": "Widget", "address": "AA:BB", "rssi": -60 }))
            .unwrap_err();
        assert!(matches!(err, ScanError::InvalidAdvertisement(_)));

        let blank = resolver.decode(&json!({ "uuid": "  ", "rssi": -60 }));
        assert!(blank.is_err());
    }

    #[test]
    fn test_malformed_payloads_are_rejected() {
        let resolver = IdentityResolver::new(IdentityPlatform::HardwareAddress);
        assert!(resolver.decode(&json!(5)).is_err());
        assert!(resolver.decode(&json!({ "address": "AA:BB" })).is_err());
        assert!(resolver.decode(&json!({ "address": "AA:BB", "rssi": "loud" })).is_err());
    }

    #[test]
    fn test_empty_service_list_is_kept_distinct_from_absent() {
        let resolver = IdentityResolver::new(IdentityPlatform::HardwareAddress);
        let (_, absent) = resolver.decode(&json!({ "address": "AA", "rssi": -1 })).unwrap();
        let (_, empty) = resolver
            .decode(&json!({ "address": "AA", "rssi": -1, "serviceUuids": [] }))
            .unwrap();
        assert_eq!(absent.service_uuids, None);
        assert_eq!(empty.service_uuids, Some(vec![]));
    }
}
