//! Error types for nearby device discovery

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::bluetooth::ProgressSignal;

/// Discovery error type
#[derive(Debug, Error)]
pub enum ScanError {
    /// The user declined the platform permission request
    #[error("Bluetooth permission denied")]
    PermissionDenied,

    /// The adapter reported that Bluetooth is not supported
    #[error("Bluetooth adapter is not supported")]
    AdapterUnsupported,

    /// The adapter reported that the app is not authorized to use it
    #[error("Bluetooth adapter is unauthorized")]
    AdapterUnauthorized,

    /// The native layer failed to start scanning
    #[error("Failed to start native scan: {0}")]
    NativeStartFailure(String),

    /// The native layer failed to stop scanning
    #[error("Failed to stop native scan: {0}")]
    NativeStopFailure(String),

    /// A native advertisement payload could not be decoded
    #[error("Invalid advertisement: {0}")]
    InvalidAdvertisement(String),

    /// A session is already live
    #[error("A scan session is already active")]
    SessionActive,

    /// No Bluetooth adapter is available
    #[error("No Bluetooth adapter found")]
    NoAdapter,

    /// Adding or removing a native listener failed
    #[error("Native listener error: {0}")]
    Listener(String),

    /// Error reported by the platform Bluetooth API
    #[error("Bluetooth API error: {0}")]
    Native(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ScanError>;

impl ScanError {
    /// The progress signal a user-facing error is surfaced as, if any.
    ///
    /// Errors without a user-facing representation (decode failures,
    /// teardown faults) are logged and never shown.
    pub fn progress_signal(&self) -> Option<ProgressSignal> {
        match self {
            Self::PermissionDenied => Some(ProgressSignal::permission_denied()),
            Self::AdapterUnsupported => Some(ProgressSignal::unsupported()),
            Self::AdapterUnauthorized => Some(ProgressSignal::unauthorized()),
            Self::NativeStartFailure(_) | Self::NoAdapter | Self::Listener(_) | Self::Native(_) => {
                Some(ProgressSignal::start_failure())
            }
            _ => None,
        }
    }
}

impl From<btleplug::Error> for ScanError {
    fn from(error: btleplug::Error) -> Self {
        Self::Native(error.to_string())
    }
}

/// Where an error happened, for log lines
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// Component that raised the error
    pub component: String,
    /// Operation in progress
    pub operation: String,
    /// Extra key/value details
    pub metadata: BTreeMap<String, String>,
    /// Message suitable for showing to a user
    pub user_message: Option<String>,
}

impl ErrorContext {
    /// Create a context for a component operation
    pub fn new(component: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            operation: operation.into(),
            metadata: BTreeMap::new(),
            user_message: None,
        }
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }

    /// Attach a user-facing message
    pub fn with_user_message(mut self, message: impl Into<String>) -> Self {
        self.user_message = Some(message.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}::{}] ", self.component, self.operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_error_display() {
        let err = ScanError::NativeStartFailure("radio busy".to_string());
        assert_eq!(err.to_string(), "Failed to start native scan: radio busy");
        assert_eq!(ScanError::SessionActive.to_string(), "A scan session is already active");
    }

    #[test]
    fn test_user_facing_errors_map_to_signals() {
        let denied = ScanError::PermissionDenied.progress_signal().unwrap();
        assert!(!denied.is_scanning);
        assert_eq!(denied, ProgressSignal::permission_denied());

        let failed = ScanError::NativeStartFailure("boom".into()).progress_signal().unwrap();
        assert_eq!(failed.title, "Something went wrong!");

        assert!(ScanError::NativeStopFailure("x".into()).progress_signal().is_none());
        assert!(ScanError::InvalidAdvertisement("x".into()).progress_signal().is_none());
    }

    #[test]
    fn test_error_context_prefix() {
        let ctx = ErrorContext::new("ScanSession", "teardown").with_metadata("session", 3);
        assert_eq!(ctx.to_string(), "[ScanSession::teardown] ");
        assert_eq!(ctx.metadata.get("session").map(String::as_str), Some("3"));
    }
}
