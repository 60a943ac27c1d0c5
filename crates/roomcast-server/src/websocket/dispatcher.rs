//! Serialized fan-out of outbound events.
//!
//! Every broadcast funnels through one bounded FIFO drained by a single task, so events
//! for the same scope reach each session in publish order. Writing to a session means
//! admission into that session's writer queue, bounded by a per-write timeout; a session
//! that fails is closed and dropped from the registry and delivery carries on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use roomcast_core::{OutboundEvent, RoomId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::registry::ConnectionRegistry;
use super::session::CloseReason;
use crate::metrics::{
    BROADCAST_DELIVERED_TOTAL, BROADCAST_PUBLISHED_TOTAL, BROADCAST_REJECTED_TOTAL, BROADCAST_WRITE_FAILURES_TOTAL,
};

/// Broadcast queue tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Events accepted before `publish` starts rejecting.
    pub queue_capacity: usize,
    /// How long one session write may wait for room in its queue.
    #[serde(with = "crate::config::duration_ms")]
    pub write_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            write_timeout: Duration::from_secs(5),
        }
    }
}

/// Why an event was not queued.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The queue is at capacity; the event is rejected.
    #[error("broadcast queue full ({capacity} events)")]
    QueueFull {
        /// Configured queue size.
        capacity: usize,
    },
    /// The dispatcher task has exited.
    #[error("broadcast dispatcher stopped")]
    Stopped,
    /// The payload could not be serialized.
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Default)]
struct DispatchStats {
    published: AtomicU64,
    rejected: AtomicU64,
    delivered: AtomicU64,
    failed_writes: AtomicU64,
}

/// Counter snapshot for `/health`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSnapshot {
    /// Events accepted into the queue.
    pub published: u64,
    /// Events rejected by a full queue.
    pub rejected: u64,
    /// Payloads admitted into a session queue.
    pub delivered: u64,
    /// Session writes that failed or timed out.
    pub failed_writes: u64,
}

impl DispatchStats {
    fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            published: self.published.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed_writes: self.failed_writes.load(Ordering::Relaxed),
        }
    }
}

/// Producer handle for the dispatcher queue.
#[derive(Clone)]
pub struct Publisher {
    tx: mpsc::Sender<OutboundEvent>,
    stats: Arc<DispatchStats>,
    capacity: usize,
}

impl Publisher {
    /// Enqueue an event. Never waits: a full queue rejects the event.
    pub fn publish(&self, event: OutboundEvent) -> Result<(), PublishError> {
        let scope = event.scope();
        match self.tx.try_send(event) {
            Ok(()) => {
                let _ = self.stats.published.fetch_add(1, Ordering::Relaxed);
                counter!(BROADCAST_PUBLISHED_TOTAL).increment(1);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                counter!(BROADCAST_REJECTED_TOTAL).increment(1);
                warn!(scope = %scope, capacity = self.capacity, "broadcast queue full, event rejected");
                Err(PublishError::QueueFull {
                    capacity: self.capacity,
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PublishError::Stopped),
        }
    }

    /// Serialize `payload` once and publish it to a room.
    pub fn publish_room_event<T: Serialize>(&self, room_id: RoomId, payload: &T) -> Result<(), PublishError> {
        self.publish(OutboundEvent::room(room_id, payload)?)
    }

    /// Serialize `payload` once and publish it to every global session.
    pub fn publish_global_event<T: Serialize>(&self, payload: &T) -> Result<(), PublishError> {
        self.publish(OutboundEvent::global(payload)?)
    }

    /// Counters since startup.
    pub fn stats(&self) -> DispatchSnapshot {
        self.stats.snapshot()
    }
}

/// The single consumer of the broadcast queue.
pub struct BroadcastDispatcher {
    rx: mpsc::Receiver<OutboundEvent>,
    registry: Arc<ConnectionRegistry>,
    stats: Arc<DispatchStats>,
    write_timeout: Duration,
}

impl BroadcastDispatcher {
    /// Build the dispatcher and its producer handle without starting it.
    pub fn new(registry: Arc<ConnectionRegistry>, config: &DispatcherConfig) -> (Self, Publisher) {
        let capacity = config.queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let stats = Arc::new(DispatchStats::default());
        let dispatcher = Self {
            rx,
            registry,
            stats: Arc::clone(&stats),
            write_timeout: config.write_timeout,
        };
        let publisher = Publisher { tx, stats, capacity };
        (dispatcher, publisher)
    }

    /// Start the dispatch loop. It stops once every [`Publisher`] is dropped.
    pub fn spawn(registry: Arc<ConnectionRegistry>, config: &DispatcherConfig) -> (Publisher, JoinHandle<()>) {
        let (dispatcher, publisher) = Self::new(registry, config);
        (publisher, tokio::spawn(dispatcher.run()))
    }

    /// Drain the queue until every publisher is gone.
    pub async fn run(mut self) {
        info!(write_timeout_ms = self.write_timeout.as_millis() as u64, "broadcast dispatcher started");
        while let Some(event) = self.rx.recv().await {
            self.deliver(&event).await;
        }
        info!("broadcast dispatcher stopped");
    }

    #[instrument(skip_all, fields(scope = %event.scope()))]
    async fn deliver(&self, event: &OutboundEvent) {
        let recipients = self.registry.sessions_for(event.scope());
        debug!(recipients = recipients.len(), "dispatching event");

        for session in recipients {
            match session.send(Arc::clone(event.payload()), self.write_timeout).await {
                Ok(()) => {
                    let _ = self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                    counter!(BROADCAST_DELIVERED_TOTAL).increment(1);
                }
                Err(e) => {
                    let _ = self.stats.failed_writes.fetch_add(1, Ordering::Relaxed);
                    counter!(BROADCAST_WRITE_FAILURES_TOTAL, "error_kind" => e.error_kind()).increment(1);
                    warn!(
                        session_id = %session.id(),
                        user_id = %session.user_id(),
                        error = %e,
                        error_kind = e.error_kind(),
                        "write failed, dropping session"
                    );
                    let _ = session.close(CloseReason::WriteFailed);
                    let _ = self.registry.remove(&session);
                }
            }
        }
    }
}
