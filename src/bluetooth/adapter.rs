//! Adapter operability states and the progress signals derived from them

use std::fmt;

use serde::{Deserialize, Serialize};

/// Operability of the Bluetooth radio, as reported by the native layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdapterState {
    /// State not yet known
    Unknown,
    /// Radio is resetting
    Resetting,
    /// Bluetooth LE is not supported on this device
    Unsupported,
    /// The app is not authorized to use Bluetooth
    Unauthorized,
    /// Radio is off
    PoweredOff,
    /// Radio is on and usable
    PoweredOn,
}

impl AdapterState {
    /// Decode a native state code. Reserved and vendor codes yield `None`.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Unknown),
            1 => Some(Self::Resetting),
            2 => Some(Self::Unsupported),
            3 => Some(Self::Unauthorized),
            4 => Some(Self::PoweredOff),
            5 => Some(Self::PoweredOn),
            _ => None,
        }
    }

    /// The native code for this state
    pub fn code(self) -> i64 {
        match self {
            Self::Unknown => 0,
            Self::Resetting => 1,
            Self::Unsupported => 2,
            Self::Unauthorized => 3,
            Self::PoweredOff => 4,
            Self::PoweredOn => 5,
        }
    }

    /// The progress signal for this state
    pub fn progress(self) -> ProgressSignal {
        match self {
            Self::Unknown | Self::Unsupported => ProgressSignal::unsupported(),
            Self::Resetting => ProgressSignal::new(
                "Bluetooth is resetting",
                "Please wait until your bluetooth turned on to use this application.",
                false,
            ),
            Self::Unauthorized => ProgressSignal::unauthorized(),
            Self::PoweredOff => ProgressSignal::new(
                "Bluetooth is turned off",
                "Please turned on your bluetooth to use this application.",
                false,
            ),
            Self::PoweredOn => ProgressSignal::new(
                "Scanning...",
                "Please kindly wait while we scan the nearby devices.",
                true,
            ),
        }
    }
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Resetting => "resetting",
            Self::Unsupported => "unsupported",
            Self::Unauthorized => "unauthorized",
            Self::PoweredOff => "powered off",
            Self::PoweredOn => "powered on",
        };
        f.write_str(name)
    }
}

/// User-facing progress of a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSignal {
    pub title: String,
    pub message: String,
    pub is_scanning: bool,
}

impl ProgressSignal {
    pub fn new(title: impl Into<String>, message: impl Into<String>, is_scanning: bool) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            is_scanning,
        }
    }

    /// Shown for the unknown and unsupported adapter states
    pub fn unsupported() -> Self {
        Self::new("Device not Supported!", "Sorry, this device is not supported.", false)
    }

    /// Shown when the adapter reports the app as unauthorized
    pub fn unauthorized() -> Self {
        Self::new(
            "Permissions not granted!",
            "Please accept all requested permission to use this application.",
            false,
        )
    }

    /// Shown when the permission request is declined
    pub fn permission_denied() -> Self {
        Self::new(
            "Permissions not granted!",
            "Please accept permission for location and nearby devices to use this application.",
            false,
        )
    }

    /// Shown when the native scan could not be started
    pub fn start_failure() -> Self {
        Self::new(
            "Something went wrong!",
            "Oops something went wrong when scanning the bluetooth.",
            false,
        )
    }
}

/// Map a native state code to a progress signal.
///
/// Returns `None` for codes outside the documented range, meaning "no change".
/// Never decides anything about the session itself.
pub fn on_state_change(code: i64) -> Option<ProgressSignal> {
    AdapterState::from_code(code).map(AdapterState::progress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_every_documented_code_maps_to_its_signal() {
        let expected = [
            (0, "Device not Supported!", "Sorry, this device is not supported.", false),
            (1, "Bluetooth is resetting", "Please wait until your bluetooth turned on to use this application.", false),
            (2, "Device not Supported!", "Sorry, this device is not supported.", false),
            (3, "Permissions not granted!", "Please accept all requested permission to use this application.", false),
            (4, "Bluetooth is turned off", "Please turned on your bluetooth to use this application.", false),
            (5, "Scanning...", "Please kindly wait while we scan the nearby devices.", true),
        ];

        for (code, title, message, is_scanning) in expected {
            assert_eq!(
                on_state_change(code),
                Some(ProgressSignal::new(title, message, is_scanning)),
                "code {}",
                code
            );
        }
    }

    #[test]
    fn test_undocumented_codes_are_no_change() {
        assert_eq!(on_state_change(99), None);
        assert_eq!(on_state_change(-1), None);
        assert_eq!(on_state_change(6), None);
    }

    #[test]
    fn test_only_powered_on_scans() {
        for code in 0..=5 {
            let state = AdapterState::from_code(code).unwrap();
            assert_eq!(state.code(), code);
            assert_eq!(state.progress().is_scanning, state == AdapterState::PoweredOn);
        }
    }

    #[test]
    fn test_progress_serializes_camel_case() {
        let json = serde_json::to_value(ProgressSignal::start_failure()).unwrap();
        assert_eq!(json["isScanning"], serde_json::json!(false));
    }
}
