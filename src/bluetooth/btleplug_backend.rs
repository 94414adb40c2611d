//! Native backend on top of btleplug

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, Manager as _, Peripheral as _, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use futures::{Stream, StreamExt};
use log::{debug, info, warn};
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::bluetooth::adapter::AdapterState;
use crate::bluetooth::native::{EventKeys, ListenerId, ListenerTable, NativeBleManager, NativeListener};
use crate::bluetooth::scanner_config::ScanConfig;
use crate::error::{ErrorContext, Result, ScanError};

/// Platform Bluetooth module backed by the system adapter
pub struct BtleplugManager {
    _manager: Manager,
    adapter: Adapter,
    filter: ScanFilter,
    keys: EventKeys,
    listeners: Arc<Mutex<ListenerTable>>,
    /// Last adapter state code, replayed to new state listeners
    last_state: Arc<Mutex<Option<i64>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl BtleplugManager {
    /// Open the adapter selected by `config.adapter_index`
    pub async fn new(config: &ScanConfig) -> Result<Self> {
        let ctx = ErrorContext::new("BtleplugManager", "new");
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        debug!("{}Found {} adapters", ctx, adapters.len());

        let adapter = adapters
            .into_iter()
            .nth(config.adapter_index)
            .ok_or(ScanError::NoAdapter)?;
        match adapter.adapter_info().await {
            Ok(info) => info!("{}Using adapter {}", ctx, info),
            Err(e) => warn!("{}Adapter info unavailable: {}", ctx, e),
        }

        Ok(Self {
            _manager: manager,
            adapter,
            filter: ScanFilter {
                services: config.service_filter.clone(),
            },
            keys: EventKeys::default(),
            listeners: Arc::new(Mutex::new(ListenerTable::new())),
            last_state: Arc::new(Mutex::new(None)),
            pump: Mutex::new(None),
        })
    }

    fn take_pump(&self) -> Option<JoinHandle<()>> {
        self.pump.lock().ok().and_then(|mut pump| pump.take())
    }

    fn lock_listeners(&self) -> Result<std::sync::MutexGuard<'_, ListenerTable>> {
        self.listeners
            .lock()
            .map_err(|_| ScanError::Listener("listener table poisoned".to_string()))
    }
}

#[async_trait]
impl NativeBleManager for BtleplugManager {
    async fn request_permissions(&self) -> bool {
        // Desktop platforms have no runtime permission prompt
        true
    }

    async fn start_scan(&self) -> Result<()> {
        let ctx = ErrorContext::new("BtleplugManager", "start_scan");

        if let Some(previous) = self.take_pump() {
            debug!("{}Restarting, stopping previous scan first", ctx);
            previous.abort();
            if let Err(e) = self.adapter.stop_scan().await {
                warn!("{}Failed to stop previous scan: {}", ctx, e);
            }
        }

        let events = self
            .adapter
            .events()
            .await
            .map_err(|e| ScanError::NativeStartFailure(format!("event stream: {}", e)))?;
        self.adapter
            .start_scan(self.filter.clone())
            .await
            .map_err(|e| ScanError::NativeStartFailure(e.to_string()))?;

        // A scan that started means the radio is on
        if let Ok(mut state) = self.last_state.lock() {
            *state = Some(AdapterState::PoweredOn.code());
        }

        let task = tokio::spawn(pump_events(
            self.adapter.clone(),
            events,
            self.listeners.clone(),
            self.last_state.clone(),
            self.keys.clone(),
        ));
        if let Ok(mut pump) = self.pump.lock() {
            *pump = Some(task);
        }

        info!("{}Scan started", ctx);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        let Some(pump) = self.take_pump() else {
            debug!("Stop requested while not scanning");
            return Ok(());
        };
        pump.abort();

        self.adapter
            .stop_scan()
            .await
            .map_err(|e| ScanError::NativeStopFailure(e.to_string()))?;
        info!("Scan stopped");
        Ok(())
    }

    fn event_keys(&self) -> EventKeys {
        self.keys.clone()
    }

    fn add_listener(&self, event_key: &str) -> Result<NativeListener> {
        let last = self.last_state.lock().ok().and_then(|state| *state);
        let mut listeners = self.lock_listeners()?;
        Ok(register_listener(&mut listeners, &self.keys, event_key, last))
    }

    fn remove_listener(&self, id: ListenerId) -> Result<()> {
        self.lock_listeners()?.remove(id)
    }
}

/// Add a listener, replaying the last adapter state to it alone when it
/// listens for state changes
fn register_listener(
    listeners: &mut ListenerTable,
    keys: &EventKeys,
    event_key: &str,
    last_state: Option<i64>,
) -> NativeListener {
    let listener = listeners.add(event_key);
    if event_key == keys.bluetooth_state {
        if let Some(code) = last_state {
            listeners.send_to(listener.id, json!(code));
        }
    }
    listener
}

async fn pump_events<S>(
    adapter: Adapter,
    mut events: S,
    listeners: Arc<Mutex<ListenerTable>>,
    last_state: Arc<Mutex<Option<i64>>>,
    keys: EventKeys,
) where
    S: Stream<Item = CentralEvent> + Unpin + Send,
{
    let ctx = ErrorContext::new("BtleplugManager", "pump_events");

    while let Some(event) = events.next().await {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                match advertisement_payload(&adapter, &id).await {
                    Ok(Some(payload)) => emit(&listeners, &keys.nearby_devices, payload),
                    Ok(None) => debug!("{}No advertisement data yet for {:?}", ctx, id),
                    Err(e) => warn!("{}Failed to read peripheral {:?}: {}", ctx, id, e),
                }
            }
            CentralEvent::StateUpdate(state) => {
                let code = state_code(state);
                if let Ok(mut last) = last_state.lock() {
                    *last = Some(code);
                }
                emit(&listeners, &keys.bluetooth_state, json!(code));
            }
            _ => {}
        }
    }

    debug!("{}Adapter event stream ended", ctx);
}

fn emit(listeners: &Arc<Mutex<ListenerTable>>, key: &str, payload: Value) {
    if let Ok(table) = listeners.lock() {
        table.emit(key, payload);
    }
}

async fn advertisement_payload(adapter: &Adapter, id: &PeripheralId) -> Result<Option<Value>> {
    let peripheral = adapter.peripheral(id).await?;
    let Some(properties) = peripheral.properties().await? else {
        return Ok(None);
    };
    let Some(rssi) = properties.rssi else {
        return Ok(None);
    };

    let services: Vec<String> = properties
        .services
        .iter()
        .map(|uuid| uuid.hyphenated().to_string())
        .collect();
    let manufacturer = format_manufacturer_data(&properties.manufacturer_data);

    Ok(Some(json!({
        "name": properties.local_name,
        "address": properties.address.to_string(),
        "uuid": peripheral.id().to_string(),
        "rssi": rssi,
        "txPowerLevel": properties.tx_power_level,
        "serviceUuids": (!services.is_empty()).then_some(services),
        "manufacturerSpecificData": (!manufacturer.is_empty()).then_some(manufacturer),
    })))
}

/// Map btleplug's adapter state onto the native state codes
fn state_code(state: CentralState) -> i64 {
    match state {
        CentralState::PoweredOn => AdapterState::PoweredOn.code(),
        CentralState::PoweredOff => AdapterState::PoweredOff.code(),
        #[allow(unreachable_patterns)]
        _ => AdapterState::Unknown.code(),
    }
}

/// `company=hexbytes` entries ordered by company id
fn format_manufacturer_data(data: &HashMap<u16, Vec<u8>>) -> Vec<String> {
    let mut entries: Vec<_> = data.iter().collect();
    entries.sort_by_key(|(company, _)| **company);
    entries
        .into_iter()
        .map(|(company, bytes)| {
            let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
            format!("{}={}", company, hex)
        })
        .collect()
}
