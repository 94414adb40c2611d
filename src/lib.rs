// Root module exports
pub mod bluetooth;
pub mod config;
pub mod error;
pub mod logging;
pub mod service;

// Re-export common items for convenience
pub use bluetooth::{
    AdapterState, BtleplugManager, CachePublisher, DeviceRecord, FakeBleManager,
    NativeBleManager, ProgressSignal, ScanConfig, ScanSession, SessionPhase, SessionSnapshot,
};
pub use config::{AppConfig, LogLevel};
pub use error::{ErrorContext, Result, ScanError};
pub use logging::configure_logging;
pub use service::{DiscoveryService, SessionHandle};
