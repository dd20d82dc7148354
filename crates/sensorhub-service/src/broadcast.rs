//! Fan-out of live events to connected viewers.
//!
//! The [`Broadcaster`] owns a registry of viewer channels. Publishing
//! serializes an event once and offers it to every open channel without
//! waiting: a viewer whose queue is full misses that event, and a closed
//! viewer is skipped until its owner unregisters it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

/// Registry handle for one viewer.
pub type ViewerId = u64;

/// Why a payload could not be handed to a viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("viewer channel closed")]
    Closed,
    #[error("viewer channel full")]
    Full,
}

/// Transport to one live viewer.
///
/// Implementations must not block: `try_send` either queues the payload
/// immediately or fails.
pub trait ViewerChannel: Send + Sync {
    fn is_open(&self) -> bool;
    fn try_send(&self, payload: Arc<str>) -> Result<(), SendError>;
}

/// A viewer backed by a bounded mpsc queue.
///
/// The receiving half is drained by whatever owns the connection, such as a
/// WebSocket writer task.
pub struct QueuedViewer {
    tx: mpsc::Sender<Arc<str>>,
}

impl QueuedViewer {
    /// Create a viewer holding at most `buffer` undelivered payloads.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

impl ViewerChannel for QueuedViewer {
    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    fn try_send(&self, payload: Arc<str>) -> Result<(), SendError> {
        self.tx.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }
}

/// Outcome of one publish.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    /// Viewers the payload was queued for.
    pub delivered: usize,
    /// Viewers that were closed or full.
    pub skipped: usize,
}

/// Owned registry of live viewers.
#[derive(Default)]
pub struct Broadcaster {
    next_id: AtomicU64,
    viewers: RwLock<HashMap<ViewerId, Arc<dyn ViewerChannel>>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a viewer. It receives every event published from now on.
    pub fn register(&self, channel: Arc<dyn ViewerChannel>) -> ViewerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.viewers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, channel);
        debug!("Registered viewer {}", id);
        id
    }

    /// Register a viewer for as long as the returned guard lives.
    pub fn register_guarded(self: &Arc<Self>, channel: Arc<dyn ViewerChannel>) -> ViewerRegistration {
        let id = self.register(channel);
        ViewerRegistration {
            broadcaster: Arc::clone(self),
            id,
        }
    }

    /// Remove a viewer. Returns false if it was not registered.
    pub fn unregister(&self, id: ViewerId) -> bool {
        let removed = self
            .viewers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some();
        if removed {
            debug!("Unregistered viewer {}", id);
        }
        removed
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Serialize `event` as JSON and offer it to every viewer.
    pub fn publish<T: Serialize>(&self, event: &T) -> Result<PublishReport, serde_json::Error> {
        let payload: Arc<str> = serde_json::to_string(event)?.into();
        Ok(self.publish_payload(payload))
    }

    /// Offer an already serialized payload to every viewer.
    pub fn publish_payload(&self, payload: Arc<str>) -> PublishReport {
        // Snapshot so no lock is held while sending
        let viewers: Vec<Arc<dyn ViewerChannel>> = self
            .viewers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut report = PublishReport::default();
        for viewer in viewers {
            if !viewer.is_open() {
                report.skipped += 1;
                continue;
            }
            match viewer.try_send(Arc::clone(&payload)) {
                Ok(()) => report.delivered += 1,
                Err(_) => report.skipped += 1,
            }
        }
        report
    }
}

/// Keeps a viewer registered until dropped.
pub struct ViewerRegistration {
    broadcaster: Arc<Broadcaster>,
    id: ViewerId,
}

impl ViewerRegistration {
    pub fn id(&self) -> ViewerId {
        self.id
    }
}

impl Drop for ViewerRegistration {
    fn drop(&mut self) {
        self.broadcaster.unregister(self.id);
    }
}
