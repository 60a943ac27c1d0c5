//! Read receipts: reconciliation on history fetch, and the outbox behind `read` frames.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use roomcast_core::{ChatFrame, ChatStore, PersistenceError, ReadStatus, RoomId, StoredMessage, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::metrics::RECEIPT_JOBS_TOTAL;
use crate::presence::PresenceTracker;

/// Result of a history fetch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct History {
    /// Frames in creation order.
    pub messages: Vec<ChatFrame>,
    /// Receipts created by this fetch.
    pub new_receipts: usize,
}

/// Turns current presence into persisted receipts whenever a room's history is read.
pub struct ReadReceiptReconciler {
    store: Arc<dyn ChatStore>,
    presence: Arc<PresenceTracker>,
    attachment_base_url: String,
}

impl ReadReceiptReconciler {
    /// `attachment_base_url` is prefixed to stored attachment names.
    pub fn new(store: Arc<dyn ChatStore>, presence: Arc<PresenceTracker>, attachment_base_url: impl Into<String>) -> Self {
        Self {
            store,
            presence,
            attachment_base_url: attachment_base_url.into(),
        }
    }

    /// Messages of `room_id` in creation order, with read counts reflecting everyone
    /// currently present. Receipt write failures are logged and skipped.
    #[instrument(skip(self), fields(room_id = %room_id, requester = %requester))]
    pub fn fetch_history(&self, room_id: RoomId, requester: UserId) -> Result<History, PersistenceError> {
        let is_group = self.store.is_group_room(room_id)?;
        let stored = self.store.fetch_messages(room_id)?;
        let present = self.presence.present_set(room_id);
        let other_present = present.iter().any(|user| *user != requester);

        let mut history = History::default();
        history.messages.reserve(stored.len());

        for message in stored {
            let mut readers: HashSet<UserId> = message.readers.iter().copied().collect();
            for &user in &present {
                if user == requester || user == message.sender_id || readers.contains(&user) {
                    continue;
                }
                match self.store.insert_read_receipt(message.id, user) {
                    Ok(created) => {
                        if created {
                            history.new_receipts += 1;
                        }
                        let _ = readers.insert(user);
                    }
                    Err(e) => warn!(message_id = %message.id, reader = %user, error = %e, "receipt insert failed"),
                }
            }

            let read_status = if is_group {
                None
            } else if message.sender_id == requester {
                Some(if other_present { ReadStatus::Read } else { ReadStatus::Unread })
            } else {
                Some(ReadStatus::Read)
            };
            history
                .messages
                .push(self.to_frame(message, readers.len() as u32, read_status));
        }

        debug!(messages = history.messages.len(), new_receipts = history.new_receipts, "history reconciled");
        Ok(history)
    }

    fn to_frame(&self, message: StoredMessage, read_count: u32, read_status: Option<ReadStatus>) -> ChatFrame {
        ChatFrame {
            id: Some(message.id),
            text: message.text,
            sender: message.sender_name,
            read_count,
            read_status,
            images: message
                .attachments
                .iter()
                .map(|file| format!("{}{}", self.attachment_base_url, file))
                .collect(),
            room_id: Some(message.room_id),
            kind: "message".into(),
            user_id: Some(message.sender_id),
            client_id: message.client_id,
        }
    }
}

/// "Mark everything in this room read for this reader."
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReceiptJob {
    /// Room whose messages are marked.
    pub room_id: RoomId,
    /// Identity doing the reading.
    pub reader_id: UserId,
}

/// Receipt outbox tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    /// Jobs queued before `enqueue` starts dropping.
    pub capacity: usize,
    /// Attempts per job, including the first.
    pub max_attempts: u32,
    /// Delay before retry `n` is `n * retry_backoff`.
    #[serde(with = "crate::config::duration_ms")]
    pub retry_backoff: Duration,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            max_attempts: 3,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Default)]
struct OutboxStats {
    completed: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Counter snapshot for `/health`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct OutboxSnapshot {
    /// Jobs persisted.
    pub completed: u64,
    /// Attempts that failed and were retried.
    pub retried: u64,
    /// Jobs abandoned after the last attempt.
    pub failed: u64,
    /// Jobs refused by a full outbox.
    pub dropped: u64,
}

/// Bounded queue of receipt jobs, drained by one persistence worker off the broadcast path.
#[derive(Clone)]
pub struct ReceiptOutbox {
    tx: mpsc::Sender<ReceiptJob>,
    stats: Arc<OutboxStats>,
}

impl ReceiptOutbox {
    /// Start the persistence worker. It stops once every handle is dropped.
    pub fn spawn(store: Arc<dyn ChatStore>, config: OutboxConfig) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let stats = Arc::new(OutboxStats::default());
        let worker = tokio::spawn(run_worker(rx, store, config, Arc::clone(&stats)));
        (Self { tx, stats }, worker)
    }

    /// Queue a job without waiting. A full outbox drops the job.
    pub fn enqueue(&self, job: ReceiptJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(e) => {
                let _ = self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                counter!(RECEIPT_JOBS_TOTAL, "outcome" => "dropped").increment(1);
                warn!(room_id = %job.room_id, reader_id = %job.reader_id, error = %e, "receipt job dropped");
                false
            }
        }
    }

    /// Counters since startup.
    pub fn stats(&self) -> OutboxSnapshot {
        OutboxSnapshot {
            completed: self.stats.completed.load(Ordering::Relaxed),
            retried: self.stats.retried.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
        }
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<ReceiptJob>,
    store: Arc<dyn ChatStore>,
    config: OutboxConfig,
    stats: Arc<OutboxStats>,
) {
    info!(max_attempts = config.max_attempts, "receipt worker started");
    while let Some(job) = rx.recv().await {
        process(job, &store, &config, &stats).await;
    }
    info!("receipt worker stopped");
}

async fn process(job: ReceiptJob, store: &Arc<dyn ChatStore>, config: &OutboxConfig, stats: &OutboxStats) {
    let max_attempts = config.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        let store = Arc::clone(store);
        let result = tokio::task::spawn_blocking(move || store.insert_read_receipts_if_absent(job.room_id, job.reader_id))
            .await
            .unwrap_or_else(|e| Err(PersistenceError::Backend(format!("receipt task panicked: {e}"))));

        match result {
            Ok(inserted) => {
                let _ = stats.completed.fetch_add(1, Ordering::Relaxed);
                counter!(RECEIPT_JOBS_TOTAL, "outcome" => "completed").increment(1);
                debug!(room_id = %job.room_id, reader_id = %job.reader_id, inserted, attempt, "receipts persisted");
                return;
            }
            Err(e) if attempt < max_attempts => {
                let _ = stats.retried.fetch_add(1, Ordering::Relaxed);
                counter!(RECEIPT_JOBS_TOTAL, "outcome" => "retried").increment(1);
                warn!(room_id = %job.room_id, reader_id = %job.reader_id, attempt, error = %e, "receipt insert failed, retrying");
                tokio::time::sleep(config.retry_backoff * attempt).await;
            }
            Err(e) => {
                let _ = stats.failed.fetch_add(1, Ordering::Relaxed);
                counter!(RECEIPT_JOBS_TOTAL, "outcome" => "failed").increment(1);
                error!(room_id = %job.room_id, reader_id = %job.reader_id, attempts = attempt, error = %e, "receipt insert gave up");
            }
        }
    }
}
