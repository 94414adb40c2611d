//! BLE discovery sessions and the native layer they drive

pub mod adapter;
pub mod advertisement;
pub mod btleplug_backend;
pub mod fake;
pub mod native;
pub mod publisher;
pub mod registry;
pub mod session;
mod scanner_config;

pub use adapter::{on_state_change, AdapterState, ProgressSignal};

pub use advertisement::{IdentityKey, IdentityPlatform, IdentityResolver, RawAdvertisement};

pub use btleplug_backend::BtleplugManager;

pub use fake::{CallCounts, FakeBleManager};

pub use native::{
    EventKeys, ListenerId, ListenerTable, NativeBleManager, NativeListener, NativePayload,
};

pub use publisher::{CachePublisher, SessionSnapshot, SubscriberId};

pub use registry::{DeviceAttributes, DeviceRecord, DeviceRegistry, UNKNOWN_NAME};

pub use scanner_config::ScanConfig;

pub use session::{ScanSession, SessionId, SessionPhase};
