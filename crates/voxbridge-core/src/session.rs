//! Call session registry: call identifier → response queue.
//!
//! The registry is shared by every webhook and media-stream handler in the
//! process. Entries are keyed by call identifier, so different calls never
//! contend on the same queue; the map itself sits behind an async `RwLock`
//! and is only held for the duration of a lookup or insert.
//!
//! Lifecycle of an entry:
//! 1. `create` when the start webhook arrives (overwrites any previous entry).
//! 2. `get` by the transcript listener and every continuation webhook.
//! 3. `remove` by the continuation handler once it has delivered the end-marker,
//!    or `remove_if_current` once the media session is over and the grace
//!    period for a late continuation has passed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};

use crate::protocol::ResponseMessage;

/// Ordered per-call channel of spoken text, terminated by exactly one
/// [`ResponseMessage::End`].
///
/// Cloning yields another handle to the same queue. Any number of handles may
/// push; reads are serialized so one continuation request dequeues at a time.
#[derive(Clone)]
pub struct ResponseQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    tx: mpsc::UnboundedSender<ResponseMessage>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ResponseMessage>>,
    // Guards the send so nothing can be enqueued behind the end-marker.
    finished: Mutex<bool>,
}

impl ResponseQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(QueueInner {
                tx,
                rx: tokio::sync::Mutex::new(rx),
                finished: Mutex::new(false),
            }),
        }
    }

    /// Enqueue text to speak. Returns `false` (and drops the text) once the
    /// queue has been finished.
    pub fn push(&self, text: impl Into<String>) -> bool {
        let finished = self.lock_finished();
        if *finished {
            warn!("Dropping response enqueued after end-marker");
            return false;
        }
        self.inner.tx.send(ResponseMessage::Speak(text.into())).is_ok()
    }

    /// Enqueue the end-marker. Idempotent: returns `true` only for the call
    /// that actually enqueued it.
    pub fn finish(&self) -> bool {
        let mut finished = self.lock_finished();
        if *finished {
            return false;
        }
        *finished = true;
        self.inner.tx.send(ResponseMessage::End).is_ok()
    }

    /// Whether both handles point at the same underlying queue.
    pub fn same_queue(&self, other: &ResponseQueue) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_finished(&self) -> bool {
        *self.lock_finished()
    }

    /// Wait for the next item.
    pub async fn next(&self) -> ResponseMessage {
        let mut rx = self.inner.rx.lock().await;
        // The sender lives as long as `inner`, so `recv` only yields `None`
        // if the queue is torn down underneath us.
        rx.recv().await.unwrap_or(ResponseMessage::End)
    }

    fn lock_finished(&self) -> std::sync::MutexGuard<'_, bool> {
        self.inner
            .finished
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ResponseQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide map from call identifier to that call's response queue.
#[derive(Default)]
pub struct SessionRegistry {
    queues: RwLock<HashMap<String, ResponseQueue>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh queue for `call_sid`, replacing any existing one.
    pub async fn create(&self, call_sid: &str) -> ResponseQueue {
        let queue = ResponseQueue::new();
        let previous = self
            .queues
            .write()
            .await
            .insert(call_sid.to_string(), queue.clone());
        if previous.is_some() {
            warn!(call_sid, "Replaced existing session queue");
        } else {
            debug!(call_sid, "Created session queue");
        }
        queue
    }

    /// Look up the queue for `call_sid`. Absence means the start webhook was
    /// never seen for this call; callers must treat it as an error.
    pub async fn get(&self, call_sid: &str) -> Option<ResponseQueue> {
        self.queues.read().await.get(call_sid).cloned()
    }

    pub async fn remove(&self, call_sid: &str) -> Option<ResponseQueue> {
        let removed = self.queues.write().await.remove(call_sid);
        if removed.is_some() {
            debug!(call_sid, "Removed session queue");
        }
        removed
    }

    /// Remove `call_sid` only while it still maps to `queue`. A later start
    /// webhook for the same identifier keeps its fresh queue.
    pub async fn remove_if_current(&self, call_sid: &str, queue: &ResponseQueue) -> bool {
        let mut queues = self.queues.write().await;
        match queues.get(call_sid) {
            Some(current) if current.same_queue(queue) => {
                queues.remove(call_sid);
                debug!(call_sid, "Removed session queue");
                true
            }
            _ => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.queues.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queues.read().await.is_empty()
    }
}
