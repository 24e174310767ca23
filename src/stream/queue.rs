//! Per-thread event queues and the delivery loop.
//!
//! A service-owned registry maps thread ids to bounded FIFO queues,
//! created lazily with atomic insert-if-absent semantics. Each queue
//! has exactly one producer (the running workflow) and one consumer
//! (the delivery loop bound to that thread's client connection); for a
//! fixed thread, delivery order equals enqueue order and no other
//! thread's frames ever appear in the sequence.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use super::event::{Event, ThreadId};
use crate::error::WorkflowError;

/// Cooperative cancellation signal shared by a thread's workflow and
/// its delivery loop.
///
/// A closed client connection must stop both sides: the delivery loop
/// exits, and the workflow checks the token before every tool dispatch
/// so it abandons further work instead of running to completion.
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl CancelToken {
    /// Creates an uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    /// Signals cancellation to every clone of this token.
    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }

    /// Returns `true` once cancellation was signalled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once cancellation is signalled.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        loop {
            if *receiver.borrow() {
                return;
            }
            if receiver.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

struct ThreadEntry {
    sender: mpsc::Sender<Event>,
    receiver: Option<mpsc::Receiver<Event>>,
    cancel: CancelToken,
}

/// Service-owned registry mapping thread id → bounded event queue.
///
/// Create-if-absent is atomic under concurrent first touch: two
/// workflows racing to create the same thread's queue observe one
/// entry. Queues are bounded; a slow consumer exerts backpressure on
/// [`QueueHandle::publish`] instead of exhausting memory.
pub struct ThreadRegistry {
    inner: Mutex<HashMap<ThreadId, ThreadEntry>>,
    capacity: usize,
}

impl ThreadRegistry {
    /// Creates a registry whose queues hold at most `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Returns the producer handle for a thread, creating its queue on
    /// first touch.
    #[must_use]
    pub fn handle(&self, thread_id: &ThreadId) -> QueueHandle {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let entry = inner
            .entry(thread_id.clone())
            .or_insert_with(|| Self::new_entry(self.capacity));
        QueueHandle {
            thread_id: thread_id.clone(),
            sender: entry.sender.clone(),
            cancel: entry.cancel.clone(),
            capacity: self.capacity,
        }
    }

    /// Hands out the consumer end of a thread's queue.
    ///
    /// The single-consumer discipline is enforced here: the receiver
    /// exists exactly once, and a second call returns `None`.
    #[must_use]
    pub fn take_receiver(&self, thread_id: &ThreadId) -> Option<mpsc::Receiver<Event>> {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        inner
            .entry(thread_id.clone())
            .or_insert_with(|| Self::new_entry(self.capacity))
            .receiver
            .take()
    }

    /// Tears down a thread: signals cancellation and removes its entry.
    ///
    /// Outstanding handles keep working until dropped, but the token
    /// they carry is cancelled, so the workflow stops dispatching and
    /// the delivery loop exits.
    pub fn close(&self, thread_id: &ThreadId) {
        let removed = {
            let mut inner = self
                .inner
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            inner.remove(thread_id)
        };
        if let Some(entry) = removed {
            entry.cancel.cancel();
            debug!(thread = %thread_id, "thread queue closed");
        }
    }

    /// Returns `true` if the thread has a live queue.
    #[must_use]
    pub fn contains(&self, thread_id: &ThreadId) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(thread_id)
    }

    /// Number of live thread queues.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` when no thread queues exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn new_entry(capacity: usize) -> ThreadEntry {
        let (sender, receiver) = mpsc::channel(capacity);
        ThreadEntry {
            sender,
            receiver: Some(receiver),
            cancel: CancelToken::new(),
        }
    }
}

impl std::fmt::Debug for ThreadRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadRegistry")
            .field("threads", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Producer handle for one thread's queue.
#[derive(Debug, Clone)]
pub struct QueueHandle {
    thread_id: ThreadId,
    sender: mpsc::Sender<Event>,
    cancel: CancelToken,
    capacity: usize,
}

impl QueueHandle {
    /// The thread this handle publishes to.
    #[must_use]
    pub const fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    /// Enqueues an event, waiting when the queue is full.
    ///
    /// Backpressure path: a slow consumer slows the workflow down
    /// instead of growing the queue without bound.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::QueueClosed`] when the consumer side is
    /// gone.
    pub async fn publish(&self, event: Event) -> Result<(), WorkflowError> {
        self.sender
            .send(event)
            .await
            .map_err(|_| WorkflowError::QueueClosed {
                thread: self.thread_id.to_string(),
            })
    }

    /// Enqueues an event without waiting.
    ///
    /// Drop-with-signal path for callers that must not block: a full
    /// queue is reported as a typed error instead of being dropped
    /// silently.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::QueueFull`] when the queue is at
    /// capacity, [`WorkflowError::QueueClosed`] when the consumer side
    /// is gone.
    pub fn try_publish(&self, event: Event) -> Result<(), WorkflowError> {
        self.sender.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(dropped) => {
                warn!(
                    thread = %self.thread_id,
                    kind = dropped.payload.kind(),
                    "event queue full; dropping with signal"
                );
                WorkflowError::QueueFull {
                    thread: self.thread_id.to_string(),
                    capacity: self.capacity,
                }
            }
            mpsc::error::TrySendError::Closed(_) => WorkflowError::QueueClosed {
                thread: self.thread_id.to_string(),
            },
        })
    }

    /// Returns the thread's cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}

/// Transport the delivery loop forwards events to.
///
/// Implementations own the client connection (WebSocket, SSE, stdout);
/// the loop guarantees per-thread FIFO order and stops on the first
/// delivery failure.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Delivers one event frame.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError`] when the client connection is gone; the
    /// loop treats this as a disconnect.
    async fn deliver(&self, event: &Event) -> Result<(), WorkflowError>;
}

/// Drains one thread's queue into a transport in strict FIFO order.
pub struct DeliveryLoop;

impl DeliveryLoop {
    /// Runs until the queue closes, cancellation fires, or the
    /// transport fails.
    ///
    /// A transport failure is treated as a client disconnect: the loop
    /// cancels the shared token so the workflow abandons further tool
    /// dispatch, then exits. Returns the number of events delivered.
    pub async fn run(
        mut receiver: mpsc::Receiver<Event>,
        transport: Arc<dyn Transport>,
        cancel: CancelToken,
    ) -> usize {
        let mut delivered: usize = 0;
        loop {
            // Biased toward the queue so already-enqueued frames drain
            // in order before cancellation is observed; cancellation
            // wins as soon as the queue goes idle.
            tokio::select! {
                biased;
                maybe_event = receiver.recv() => match maybe_event {
                    Some(event) => {
                        if let Err(e) = transport.deliver(&event).await {
                            warn!(
                                error = %e,
                                kind = event.payload.kind(),
                                "transport failed; treating as disconnect"
                            );
                            cancel.cancel();
                            break;
                        }
                        delivered += 1;
                    }
                    None => {
                        debug!(delivered, "queue drained and closed");
                        break;
                    }
                },
                () = cancel.cancelled() => {
                    debug!(delivered, "delivery loop cancelled");
                    break;
                }
            }
        }
        delivered
    }
}
