//! Lifecycle of a single discovery session

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::bluetooth::adapter::{on_state_change, AdapterState, ProgressSignal};
use crate::bluetooth::advertisement::IdentityResolver;
use crate::bluetooth::native::{NativeBleManager, NativeListener, NativePayload};
use crate::bluetooth::publisher::{CachePublisher, SessionSnapshot};
use crate::bluetooth::registry::DeviceRegistry;
use crate::bluetooth::scanner_config::ScanConfig;
use crate::error::{ErrorContext, Result, ScanError};
use crate::logging::{log_error, PerformanceLogger};

/// Session ID type
pub type SessionId = u64;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    /// Created, nothing requested yet
    Idle,
    /// Permission request in flight
    Starting,
    /// Native scan running and both streams subscribed
    Active,
    /// Tearing down subscriptions and the native scan
    Stopping,
    /// Terminal; no further events are applied
    Stopped,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

struct SessionShared {
    disposed: AtomicBool,
    phase: watch::Sender<SessionPhase>,
    adapter_state: Mutex<Option<AdapterState>>,
}

impl SessionShared {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn set_phase(&self, id: SessionId, phase: SessionPhase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            info!("Session {} {} -> {}", id, previous, phase);
        }
    }
}

/// One discovery session.
///
/// Starting a session spawns a single task that owns the device registry and
/// applies native events in delivery order. Stopping is idempotent and always
/// succeeds; dropping the session stops it in the background.
pub struct ScanSession {
    id: SessionId,
    shared: Arc<SessionShared>,
    publisher: CachePublisher,
    cancel: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ScanSession {
    /// Start a session. Must be called from within a tokio runtime.
    pub fn start(
        manager: Arc<dyn NativeBleManager>,
        publisher: CachePublisher,
        config: &ScanConfig,
    ) -> Self {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::SeqCst);
        let (phase, _) = watch::channel(SessionPhase::Idle);
        let shared = Arc::new(SessionShared {
            disposed: AtomicBool::new(false),
            phase,
            adapter_state: Mutex::new(None),
        });
        let (cancel, cancel_rx) = watch::channel(false);

        shared.set_phase(id, SessionPhase::Starting);

        let driver = SessionDriver {
            id,
            manager,
            publisher: publisher.clone(),
            shared: shared.clone(),
            resolver: IdentityResolver::new(config.identity_platform()),
            registry: DeviceRegistry::new(),
            progress: None,
            is_scanning: false,
            cache_disposal: publisher.disposal(),
        };
        let task = tokio::spawn(driver.run(cancel_rx));

        Self {
            id,
            shared,
            publisher,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn phase(&self) -> SessionPhase {
        *self.shared.phase.borrow()
    }

    /// Last adapter state reported during this session
    pub fn adapter_state(&self) -> Option<AdapterState> {
        self.shared.adapter_state.lock().ok().and_then(|state| *state)
    }

    pub fn publisher(&self) -> &CachePublisher {
        &self.publisher
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.is_disposed()
    }

    /// Wait until the session reaches `phase`
    pub async fn wait_for_phase(&self, phase: SessionPhase) {
        let mut rx = self.shared.phase.subscribe();
        loop {
            if *rx.borrow_and_update() == phase {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Wait until the session is stopped without requesting it
    pub async fn stopped(&self) {
        self.wait_for_phase(SessionPhase::Stopped).await
    }

    /// Stop the session and wait for teardown to finish.
    ///
    /// Calling this again, or on a session that already stopped on its own,
    /// makes no native calls.
    ///
    /// Concurrent callers all wait for teardown. A panic inside the session
    /// task is resumed on the caller that joins it.
    pub async fn stop(&self) {
        if !self.shared.disposed.swap(true, Ordering::SeqCst) {
            info!("Stopping session {}", self.id);
        }
        self.cancel.send_replace(true);

        let task = self.task.lock().ok().and_then(|mut task| task.take());
        let Some(task) = task else {
            self.wait_for_phase(SessionPhase::Stopped).await;
            return;
        };

        if let Err(e) = task.await {
            self.shared.set_phase(self.id, SessionPhase::Stopped);
            if e.is_panic() {
                std::panic::resume_unwind(e.into_panic());
            }
            warn!("Session {} task ended abnormally: {}", self.id, e);
        }
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        self.shared.disposed.store(true, Ordering::SeqCst);
        self.cancel.send_replace(true);
    }
}

impl fmt::Debug for ScanSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanSession")
            .field("id", &self.id)
            .field("phase", &self.phase())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

struct Subscriptions {
    devices: NativeListener,
    state: NativeListener,
}

/// The single writer of a session's state
struct SessionDriver {
    id: SessionId,
    manager: Arc<dyn NativeBleManager>,
    publisher: CachePublisher,
    shared: Arc<SessionShared>,
    resolver: IdentityResolver,
    registry: DeviceRegistry,
    progress: Option<ProgressSignal>,
    is_scanning: bool,
    cache_disposal: watch::Receiver<bool>,
}

impl SessionDriver {
    async fn run(mut self, mut cancel: watch::Receiver<bool>) {
        let ctx = ErrorContext::new("ScanSession", "start").with_metadata("session", self.id);
        let mut disposal = self.publisher.disposal();
        let perf = PerformanceLogger::new("ScanSession", "start");

        let granted = tokio::select! {
            biased;
            _ = stop_requested(&mut cancel, &mut disposal) => {
                info!("{}Abandoned while waiting for permission", ctx);
                self.finish();
                return;
            }
            granted = self.manager.request_permissions() => granted,
        };

        if self.stop_pending() {
            info!("{}Permission answered after disposal, ignoring", ctx);
            self.finish();
            return;
        }

        if !granted {
            warn!("{}Permission denied", ctx);
            self.surface(&ScanError::PermissionDenied);
            self.finish();
            return;
        }

        let mut subscriptions = match self.open().await {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                log_error(&e, &ctx.clone().with_user_message(ProgressSignal::start_failure().message));
                self.surface(&e);
                self.finish();
                return;
            }
        };

        self.shared.set_phase(self.id, SessionPhase::Active);
        perf.finish();

        self.pump(&mut subscriptions, &mut cancel, &mut disposal).await;
        self.teardown(subscriptions).await;
    }

    /// Start the native scan, then subscribe to both streams as a unit
    async fn open(&self) -> Result<Subscriptions> {
        let keys = self.manager.event_keys();

        self.manager.start_scan().await.map_err(|e| match e {
            ScanError::NativeStartFailure(_) => e,
            other => ScanError::NativeStartFailure(other.to_string()),
        })?;

        let devices = match self.manager.add_listener(&keys.nearby_devices) {
            Ok(listener) => listener,
            Err(e) => {
                self.rollback(None).await;
                return Err(e);
            }
        };

        let state = match self.manager.add_listener(&keys.bluetooth_state) {
            Ok(listener) => listener,
            Err(e) => {
                self.rollback(Some(devices)).await;
                return Err(e);
            }
        };

        Ok(Subscriptions { devices, state })
    }

    /// Undo a partial start
    async fn rollback(&self, devices: Option<NativeListener>) {
        let ctx = ErrorContext::new("ScanSession", "rollback").with_metadata("session", self.id);
        if let Some(listener) = devices {
            if let Err(e) = self.manager.remove_listener(listener.id) {
                log_error(&e, &ctx);
            }
        }
        if let Err(e) = self.manager.stop_scan().await {
            log_error(&e, &ctx);
        }
    }

    async fn pump(
        &mut self,
        subscriptions: &mut Subscriptions,
        cancel: &mut watch::Receiver<bool>,
        disposal: &mut watch::Receiver<bool>,
    ) {
        let mut devices_open = true;
        let mut state_open = true;

        loop {
            tokio::select! {
                biased;
                _ = stop_requested(cancel, disposal) => break,
                payload = subscriptions.devices.events.recv(), if devices_open => match payload {
                    Some(payload) => self.on_device(payload),
                    None => {
                        debug!("Session {} device stream closed", self.id);
                        devices_open = false;
                    }
                },
                payload = subscriptions.state.events.recv(), if state_open => match payload {
                    Some(payload) => self.on_state(payload),
                    None => {
                        debug!("Session {} state stream closed", self.id);
                        state_open = false;
                    }
                },
            }
        }
    }

    fn on_device(&mut self, payload: NativePayload) {
        if self.stop_pending() {
            return;
        }

        match self.resolver.decode(&payload) {
            Ok((key, attributes)) => {
                if self.registry.upsert(key.clone(), attributes) {
                    debug!("Session {} discovered {}", self.id, key);
                }
                self.publish();
            }
            Err(e) => warn!("Session {} dropping advertisement: {}", self.id, e),
        }
    }

    fn on_state(&mut self, payload: NativePayload) {
        if self.stop_pending() {
            return;
        }

        let Some(code) = payload.as_i64() else {
            warn!("Session {} dropping non-numeric adapter state {}", self.id, payload);
            return;
        };

        let Some(signal) = on_state_change(code) else {
            debug!("Session {} ignoring unmapped adapter state {}", self.id, code);
            return;
        };

        if let Some(state) = AdapterState::from_code(code) {
            info!("Session {} adapter is {}", self.id, state);
            if let Ok(mut current) = self.shared.adapter_state.lock() {
                *current = Some(state);
            }
        }
        // Advisory only: the native scan keeps running until an explicit stop
        self.apply_progress(signal);
        self.publish();
    }

    /// True once the session was stopped or its cache disposed
    fn stop_pending(&self) -> bool {
        if self.shared.is_disposed() {
            return true;
        }
        if *self.cache_disposal.borrow() {
            self.shared.disposed.store(true, Ordering::SeqCst);
            return true;
        }
        false
    }

    fn surface(&mut self, error: &ScanError) {
        if let Some(signal) = error.progress_signal() {
            self.apply_progress(signal);
            self.publish();
        }
    }

    fn apply_progress(&mut self, signal: ProgressSignal) {
        self.is_scanning = signal.is_scanning;
        self.progress = Some(signal);
    }

    fn publish(&self) {
        self.publisher.publish(SessionSnapshot {
            devices: self.registry.snapshot(),
            progress: self.progress.clone(),
            is_scanning: self.is_scanning,
        });
    }

    /// Unsubscribe both streams and stop the native scan. Every step runs even if
    /// an earlier one fails.
    async fn teardown(&mut self, subscriptions: Subscriptions) {
        self.shared.disposed.store(true, Ordering::SeqCst);
        self.shared.set_phase(self.id, SessionPhase::Stopping);
        let ctx = ErrorContext::new("ScanSession", "teardown").with_metadata("session", self.id);

        let Subscriptions { devices, state } = subscriptions;
        for listener in [devices, state] {
            if let Err(e) = self.manager.remove_listener(listener.id) {
                log_error(&e, &ctx);
            }
        }

        if let Err(e) = self.manager.stop_scan().await {
            let e = match e {
                ScanError::NativeStopFailure(_) => e,
                other => ScanError::NativeStopFailure(other.to_string()),
            };
            log_error(&e, &ctx);
        }

        debug!(
            "{}Discarding {} devices",
            ctx,
            self.registry.len()
        );
        self.finish();
    }

    fn finish(&self) {
        self.shared.disposed.store(true, Ordering::SeqCst);
        self.shared.set_phase(self.id, SessionPhase::Stopped);
    }
}

/// Resolves once either the session or its cache asks to stop
async fn stop_requested(cancel: &mut watch::Receiver<bool>, disposal: &mut watch::Receiver<bool>) {
    tokio::select! {
        _ = flag_raised(cancel) => {}
        _ = flag_raised(disposal) => {}
    }
}

async fn flag_raised(flag: &mut watch::Receiver<bool>) {
    loop {
        if *flag.borrow_and_update() {
            return;
        }
        // A dropped sender counts as a stop request
        if flag.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::fake::FakeBleManager;
    use crate::bluetooth::IdentityPlatform;
    use serde_json::json;

    fn config() -> ScanConfig {
        ScanConfig::default().with_identity_platform(IdentityPlatform::HardwareAddress)
    }

    async fn active_session(fake: &Arc<FakeBleManager>) -> ScanSession {
        let session = ScanSession::start(fake.clone(), CachePublisher::new(), &config());
        session.wait_for_phase(SessionPhase::Active).await;
        session
    }

    #[tokio::test]
    async fn test_session_reaches_active_with_two_listeners() {
        let fake = Arc::new(FakeBleManager::new());
        let session = active_session(&fake).await;

        assert_eq!(session.phase(), SessionPhase::Active);
        assert_eq!(fake.listener_count(), 2);
        assert!(fake.is_scanning());

        session.stop().await;
        assert_eq!(session.phase(), SessionPhase::Stopped);
        assert_eq!(fake.listener_count(), 0);
        assert!(!fake.is_scanning());
    }

    #[tokio::test]
    async fn test_advisory_state_does_not_stop_scan() {
        let fake = Arc::new(FakeBleManager::new());
        let session = active_session(&fake).await;
        let (_, mut updates) = session.publisher().subscribe();

        fake.emit_state(4);
        let snapshot = updates.recv().await.unwrap();
        assert!(!snapshot.is_scanning);
        assert_eq!(session.adapter_state(), Some(AdapterState::PoweredOff));
        assert_eq!(session.phase(), SessionPhase::Active);
        assert_eq!(fake.calls().stop_scan, 0);

        session.stop().await;
    }

    #[tokio::test]
    async fn test_bad_payloads_do_not_end_discovery() {
        let fake = Arc::new(FakeBleManager::new());
        let session = active_session(&fake).await;
        let (_, mut updates) = session.publisher().subscribe();

        fake.emit_device(json!({ "name": "no identity", "rssi": -50 }));
        fake.emit_device(json!("garbage"));
        fake.emit_state(99);
        fake.emit_device(json!({ "address": "AA:BB", "rssi": -50 }));

        let snapshot = updates.recv().await.unwrap();
        assert_eq!(snapshot.devices.len(), 1);
        assert_eq!(snapshot.devices[0].identity_key.as_str(), "AA:BB");
        assert!(updates.try_recv().is_err());

        session.stop().await;
    }

    #[tokio::test]
    async fn test_concurrent_stops_both_wait_for_teardown() {
        let fake = Arc::new(FakeBleManager::new());
        let session = active_session(&fake).await;

        let first = async {
            session.stop().await;
            session.phase()
        };
        let second = async {
            session.stop().await;
            session.phase()
        };
        let (first, second) = tokio::join!(first, second);

        assert_eq!(first, SessionPhase::Stopped);
        assert_eq!(second, SessionPhase::Stopped);
        assert_eq!(fake.calls().stop_scan, 1);
        assert_eq!(fake.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_drop_stops_session_in_background() {
        let fake = Arc::new(FakeBleManager::new());
        let session = active_session(&fake).await;
        drop(session);

        for _ in 0..100 {
            if fake.calls().stop_scan == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(fake.calls().stop_scan, 1);
        assert_eq!(fake.listener_count(), 0);
    }
}
