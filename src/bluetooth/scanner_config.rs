use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bluetooth::advertisement::IdentityPlatform;

/// Configuration for discovery sessions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Identity scheme override; `None` follows the build target
    pub identity_platform: Option<IdentityPlatform>,
    /// Index of the adapter to scan with
    pub adapter_index: usize,
    /// Only report peripherals advertising one of these services (empty = all)
    pub service_filter: Vec<Uuid>,
}

impl ScanConfig {
    /// Create a new scan configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// The identity scheme sessions will use
    pub fn identity_platform(&self) -> IdentityPlatform {
        self.identity_platform.unwrap_or_else(IdentityPlatform::current)
    }

    /// Force an identity scheme
    pub fn with_identity_platform(mut self, platform: IdentityPlatform) -> Self {
        self.identity_platform = Some(platform);
        self
    }

    /// Set the adapter index
    pub fn with_adapter_index(mut self, index: usize) -> Self {
        self.adapter_index = index;
        self
    }

    /// Set the service filter
    pub fn with_service_filter(mut self, services: Vec<Uuid>) -> Self {
        self.service_filter = services;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_identity_follows_target() {
        let config = ScanConfig::default();
        assert_eq!(config.identity_platform(), IdentityPlatform::current());
        assert_eq!(config.adapter_index, 0);
        assert!(config.service_filter.is_empty());
    }

    #[test]
    fn test_builder_methods() {
        let heart_rate = Uuid::from_u128(0x0000180d_0000_1000_8000_00805f9b34fb);
        let config = ScanConfig::new()
            .with_identity_platform(IdentityPlatform::PeripheralUuid)
            .with_adapter_index(1)
            .with_service_filter(vec![heart_rate]);

        assert_eq!(config.identity_platform(), IdentityPlatform::PeripheralUuid);
        assert_eq!(config.adapter_index, 1);
        assert_eq!(config.service_filter, vec![heart_rate]);
    }
}
