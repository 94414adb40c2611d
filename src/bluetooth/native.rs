//! Capability boundary to the platform Bluetooth layer

use std::collections::HashMap;

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::error::{Result, ScanError};

/// Untyped payload delivered by the native layer
pub type NativePayload = Value;

/// Identifier of a registered native listener
pub type ListenerId = u32;

/// Default key of the device discovery channel
pub const NEARBY_DEVICES_KEY: &str = "NearbyDevice";
/// Default key of the adapter state channel
pub const BLUETOOTH_STATE_KEY: &str = "BluetoothState";

/// Names of the two native event channels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventKeys {
    pub nearby_devices: String,
    pub bluetooth_state: String,
}

impl Default for EventKeys {
    fn default() -> Self {
        Self {
            nearby_devices: NEARBY_DEVICES_KEY.to_string(),
            bluetooth_state: BLUETOOTH_STATE_KEY.to_string(),
        }
    }
}

/// A registered listener and the payloads delivered to it, in native order
#[derive(Debug)]
pub struct NativeListener {
    pub id: ListenerId,
    pub events: UnboundedReceiver<NativePayload>,
}

/// The platform Bluetooth module.
///
/// Injected into sessions so tests can substitute a fake.
#[async_trait]
pub trait NativeBleManager: Send + Sync {
    /// Ask the user for scan permissions. Platforms without a permission model return `true`.
    async fn request_permissions(&self) -> bool;

    /// Begin delivering discovery events
    async fn start_scan(&self) -> Result<()>;

    /// Stop scanning. Safe to call when not scanning.
    async fn stop_scan(&self) -> Result<()>;

    /// Names of the event channels
    fn event_keys(&self) -> EventKeys;

    /// Register a listener on the named channel
    fn add_listener(&self, event_key: &str) -> Result<NativeListener>;

    /// Remove a previously registered listener
    fn remove_listener(&self, id: ListenerId) -> Result<()>;
}

/// Listener registry shared by backends to fan native events out
#[derive(Debug, Default)]
pub struct ListenerTable {
    next_id: ListenerId,
    listeners: HashMap<ListenerId, (String, UnboundedSender<NativePayload>)>,
}

impl ListenerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, event_key: &str) -> NativeListener {
        let (tx, rx) = unbounded_channel();
        self.next_id += 1;
        let id = self.next_id;
        self.listeners.insert(id, (event_key.to_string(), tx));
        debug!("Added native listener {} on '{}'", id, event_key);
        NativeListener { id, events: rx }
    }

    pub fn remove(&mut self, id: ListenerId) -> Result<()> {
        match self.listeners.remove(&id) {
            Some((key, _)) => {
                debug!("Removed native listener {} on '{}'", id, key);
                Ok(())
            }
            None => Err(ScanError::Listener(format!("unknown listener {}", id))),
        }
    }

    /// Deliver a payload to every listener on `event_key`.
    ///
    /// Returns how many listeners received it. Listeners whose receiver is gone
    /// are skipped.
    pub fn emit(&self, event_key: &str, payload: NativePayload) -> usize {
        self.listeners
            .values()
            .filter(|(key, _)| key == event_key)
            .filter(|(_, tx)| tx.send(payload.clone()).is_ok())
            .count()
    }

    /// Deliver a payload to a single listener. Returns `false` if it is gone.
    pub fn send_to(&self, id: ListenerId, payload: NativePayload) -> bool {
        self.listeners
            .get(&id)
            .map(|(_, tx)| tx.send(payload).is_ok())
            .unwrap_or(false)
    }

    pub fn count(&self, event_key: &str) -> usize {
        self.listeners.values().filter(|(key, _)| key == event_key).count()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}
