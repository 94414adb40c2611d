//! Session start/stop boundary for presentation layers

use std::sync::{Arc, Mutex, MutexGuard};

use log::{info, warn};

use crate::bluetooth::{
    CachePublisher, NativeBleManager, ScanConfig, ScanSession, SessionId, SessionPhase,
    SessionSnapshot, SubscriberId,
};
use crate::error::{Result, ScanError};

/// Handle to a started session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    publisher: CachePublisher,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The session's snapshot cache
    pub fn publisher(&self) -> &CachePublisher {
        &self.publisher
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.publisher.current()
    }

    pub fn subscribe(
        &self,
    ) -> (SubscriberId, tokio::sync::mpsc::UnboundedReceiver<SessionSnapshot>) {
        self.publisher.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.publisher.unsubscribe(id)
    }
}

/// Owns the native capability and at most one live session
pub struct DiscoveryService {
    manager: Arc<dyn NativeBleManager>,
    config: ScanConfig,
    current: Mutex<Option<Arc<ScanSession>>>,
}

impl DiscoveryService {
    pub fn new(manager: Arc<dyn NativeBleManager>, config: ScanConfig) -> Self {
        Self {
            manager,
            config,
            current: Mutex::new(None),
        }
    }

    /// Start a new session.
    ///
    /// Fails with [`ScanError::SessionActive`] while a previous session is still
    /// running; callers must stop it first. A session that already ended on its
    /// own (permission denied, start failure) is replaced.
    pub fn start_session(&self) -> Result<SessionHandle> {
        let mut current = self.slot();

        if let Some(existing) = current.as_ref() {
            if existing.phase() != SessionPhase::Stopped {
                warn!("Refusing to start while session {} is {}", existing.id(), existing.phase());
                return Err(ScanError::SessionActive);
            }
        }

        let publisher = CachePublisher::new();
        let session = Arc::new(ScanSession::start(
            self.manager.clone(),
            publisher.clone(),
            &self.config,
        ));
        let handle = SessionHandle {
            id: session.id(),
            publisher,
        };
        info!("Started session {}", handle.id);
        *current = Some(session);
        Ok(handle)
    }

    /// Stop a session. Unknown or already stopped handles are a no-op.
    pub async fn stop_session(&self, handle: &SessionHandle) {
        let session = self
            .slot()
            .as_ref()
            .filter(|session| session.id() == handle.id)
            .cloned();

        match session {
            Some(session) => session.stop().await,
            None => info!("Session {} is not current, nothing to stop", handle.id),
        }
    }

    /// The live session, if any
    pub fn current_session(&self) -> Option<Arc<ScanSession>> {
        self.slot().clone()
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Lock the session slot, recovering it if a holder panicked
    fn slot(&self) -> MutexGuard<'_, Option<Arc<ScanSession>>> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
