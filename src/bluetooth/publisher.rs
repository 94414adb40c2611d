//! Snapshot fan-out to observers of a discovery session

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use futures::Stream;
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::bluetooth::adapter::ProgressSignal;
use crate::bluetooth::registry::DeviceRecord;

/// Everything an observer needs to render the session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Devices in first-seen order
    pub devices: Vec<DeviceRecord>,
    pub progress: Option<ProgressSignal>,
    pub is_scanning: bool,
}

/// Subscriber ID type
pub type SubscriberId = u32;

struct Subscriber {
    id: SubscriberId,
    sender: UnboundedSender<SessionSnapshot>,
}

struct PublisherInner {
    snapshot: RwLock<SessionSnapshot>,
    subscribers: Mutex<Vec<Subscriber>>,
    next_subscriber_id: AtomicU32,
    disposed: watch::Sender<bool>,
}

/// Latest session snapshot plus its observers.
///
/// Clones share the same state. Disposing the publisher tells the owning
/// session that nobody needs the cache any more, which tears the session down.
#[derive(Clone)]
pub struct CachePublisher {
    inner: Arc<PublisherInner>,
}

impl Default for CachePublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl CachePublisher {
    pub fn new() -> Self {
        let (disposed, _) = watch::channel(false);
        Self {
            inner: Arc::new(PublisherInner {
                snapshot: RwLock::new(SessionSnapshot::default()),
                subscribers: Mutex::new(Vec::new()),
                next_subscriber_id: AtomicU32::new(1),
                disposed,
            }),
        }
    }

    /// The most recently published snapshot
    pub fn current(&self) -> SessionSnapshot {
        self.inner
            .snapshot
            .read()
            .map(|snapshot| snapshot.clone())
            .unwrap_or_default()
    }

    /// Receive every snapshot published from now on
    pub fn subscribe(&self) -> (SubscriberId, UnboundedReceiver<SessionSnapshot>) {
        let (tx, rx) = unbounded_channel();
        let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut subscribers) = self.inner.subscribers.lock() {
            subscribers.push(Subscriber { id, sender: tx });
        }
        debug!("Snapshot subscriber {} added", id);
        (id, rx)
    }

    /// Snapshot updates as a stream
    pub fn stream(&self) -> impl Stream<Item = SessionSnapshot> {
        let (_, rx) = self.subscribe();
        UnboundedReceiverStream::new(rx)
    }

    /// Remove a subscriber. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let Ok(mut subscribers) = self.inner.subscribers.lock() else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        before != subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Store a new snapshot and hand it to every observer before returning
    pub(crate) fn publish(&self, snapshot: SessionSnapshot) {
        if let Ok(mut current) = self.inner.snapshot.write() {
            *current = snapshot.clone();
        }

        if let Ok(mut subscribers) = self.inner.subscribers.lock() {
            // Observers that dropped their receiver are pruned
            subscribers.retain(|subscriber| subscriber.sender.send(snapshot.clone()).is_ok());
        }
    }

    /// Signal that the cache is no longer needed. Idempotent.
    pub fn dispose(&self) {
        if !self.inner.disposed.send_replace(true) {
            debug!("Cache publisher disposed");
        }
    }

    pub fn is_disposed(&self) -> bool {
        *self.inner.disposed.borrow()
    }

    /// Watch for disposal
    pub(crate) fn disposal(&self) -> watch::Receiver<bool> {
        self.inner.disposed.subscribe()
    }
}

impl std::fmt::Debug for CachePublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachePublisher")
            .field("subscribers", &self.subscriber_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
