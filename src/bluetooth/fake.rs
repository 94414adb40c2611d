//! In-process native backend with scripted behaviour and call counters

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use log::debug;
use serde_json::{json, Value};
use tokio::sync::watch;

use crate::bluetooth::native::{EventKeys, ListenerId, ListenerTable, NativeBleManager, NativeListener};
use crate::error::{Result, ScanError};

/// Number of calls made into a [`FakeBleManager`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub request_permissions: usize,
    pub start_scan: usize,
    pub stop_scan: usize,
    pub add_listener: usize,
    pub remove_listener: usize,
}

#[derive(Default)]
struct Counters {
    request_permissions: AtomicUsize,
    start_scan: AtomicUsize,
    stop_scan: AtomicUsize,
    add_listener: AtomicUsize,
    remove_listener: AtomicUsize,
}

/// Fake platform module.
///
/// Permission answers can be given up front or later with
/// [`FakeBleManager::resolve_permission`]; events are pushed with
/// [`FakeBleManager::emit_device`] and [`FakeBleManager::emit_state`].
pub struct FakeBleManager {
    keys: EventKeys,
    permission: watch::Sender<Option<bool>>,
    fail_start: AtomicBool,
    fail_stop: AtomicBool,
    fail_remove: AtomicBool,
    failing_key: Mutex<Option<String>>,
    scanning: AtomicBool,
    listeners: Mutex<ListenerTable>,
    counters: Counters,
}

impl Default for FakeBleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBleManager {
    /// A backend that grants permission and starts cleanly
    pub fn new() -> Self {
        let (permission, _) = watch::channel(Some(true));
        Self {
            keys: EventKeys::default(),
            permission,
            fail_start: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            fail_remove: AtomicBool::new(false),
            failing_key: Mutex::new(None),
            scanning: AtomicBool::new(false),
            listeners: Mutex::new(ListenerTable::new()),
            counters: Counters::default(),
        }
    }

    pub fn with_permission(self, granted: bool) -> Self {
        self.permission.send_replace(Some(granted));
        self
    }

    /// Leave the permission request unanswered until `resolve_permission`
    pub fn with_pending_permission(self) -> Self {
        self.permission.send_replace(None);
        self
    }

    pub fn with_start_failure(self) -> Self {
        self.fail_start.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_stop_failure(self) -> Self {
        self.fail_stop.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_listener_removal_failure(self) -> Self {
        self.fail_remove.store(true, Ordering::SeqCst);
        self
    }

    /// Make `add_listener` fail for one event key
    pub fn with_failing_listener(self, event_key: &str) -> Self {
        if let Ok(mut key) = self.failing_key.lock() {
            *key = Some(event_key.to_string());
        }
        self
    }

    pub fn with_event_keys(mut self, keys: EventKeys) -> Self {
        self.keys = keys;
        self
    }

    /// Answer a pending permission request
    pub fn resolve_permission(&self, granted: bool) {
        self.permission.send_replace(Some(granted));
    }

    /// Deliver a device advertisement payload. Returns the number of listeners reached.
    pub fn emit_device(&self, payload: Value) -> usize {
        self.emit(&self.keys.nearby_devices, payload)
    }

    /// Deliver an adapter state code. Returns the number of listeners reached.
    pub fn emit_state(&self, code: i64) -> usize {
        self.emit(&self.keys.bluetooth_state, json!(code))
    }

    fn emit(&self, key: &str, payload: Value) -> usize {
        self.listeners
            .lock()
            .map(|table| table.emit(key, payload))
            .unwrap_or(0)
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    /// Number of listeners currently registered
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().map(|table| table.len()).unwrap_or(0)
    }

    pub fn calls(&self) -> CallCounts {
        CallCounts {
            request_permissions: self.counters.request_permissions.load(Ordering::SeqCst),
            start_scan: self.counters.start_scan.load(Ordering::SeqCst),
            stop_scan: self.counters.stop_scan.load(Ordering::SeqCst),
            add_listener: self.counters.add_listener.load(Ordering::SeqCst),
            remove_listener: self.counters.remove_listener.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl NativeBleManager for FakeBleManager {
    async fn request_permissions(&self) -> bool {
        self.counters.request_permissions.fetch_add(1, Ordering::SeqCst);
        let mut answer = self.permission.subscribe();
        loop {
            if let Some(granted) = *answer.borrow_and_update() {
                return granted;
            }
            if answer.changed().await.is_err() {
                return false;
            }
        }
    }

    async fn start_scan(&self) -> Result<()> {
        self.counters.start_scan.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(ScanError::NativeStartFailure("fake radio refused to scan".to_string()));
        }
        if self.scanning.swap(true, Ordering::SeqCst) {
            debug!("Fake scan restarted while already scanning");
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.counters.stop_scan.fetch_add(1, Ordering::SeqCst);
        self.scanning.store(false, Ordering::SeqCst);
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(ScanError::NativeStopFailure("fake radio refused to stop".to_string()));
        }
        Ok(())
    }

    fn event_keys(&self) -> EventKeys {
        self.keys.clone()
    }

    fn add_listener(&self, event_key: &str) -> Result<NativeListener> {
        self.counters.add_listener.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_key
            .lock()
            .map(|key| key.as_deref() == Some(event_key))
            .unwrap_or(false);
        if failing {
            return Err(ScanError::Listener(format!("cannot listen on '{}'", event_key)));
        }

        let mut table = self
            .listeners
            .lock()
            .map_err(|_| ScanError::Listener("listener table poisoned".to_string()))?;
        Ok(table.add(event_key))
    }

    fn remove_listener(&self, id: ListenerId) -> Result<()> {
        self.counters.remove_listener.fetch_add(1, Ordering::SeqCst);
        let mut table = self
            .listeners
            .lock()
            .map_err(|_| ScanError::Listener("listener table poisoned".to_string()))?;
        // The listener is dropped either way so a failing removal still closes the stream
        let removed = table.remove(id);
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(ScanError::Listener(format!("fake failure removing listener {}", id)));
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pending_permission_resolves_later() {
        let fake = std::sync::Arc::new(FakeBleManager::new().with_pending_permission());
        let waiter = {
            let fake = fake.clone();
            tokio::spawn(async move { fake.request_permissions().await })
        };

        tokio::task::yield_now().await;
        fake.resolve_permission(false);

        assert!(!waiter.await.unwrap());
        assert_eq!(fake.calls().request_permissions, 1);
    }

    #[tokio::test]
    async fn test_start_and_stop_are_counted() {
        let fake = FakeBleManager::new();
        fake.start_scan().await.unwrap();
        assert!(fake.is_scanning());
        fake.stop_scan().await.unwrap();
        fake.stop_scan().await.unwrap();
        assert!(!fake.is_scanning());

        let calls = fake.calls();
        assert_eq!(calls.start_scan, 1);
        assert_eq!(calls.stop_scan, 2);
    }

    #[test]
    fn test_failing_listener_key() {
        let fake = FakeBleManager::new().with_failing_listener("BluetoothState");
        assert!(fake.add_listener("NearbyDevice").is_ok());
        assert!(fake.add_listener("BluetoothState").is_err());
        assert_eq!(fake.listener_count(), 1);
    }
}
