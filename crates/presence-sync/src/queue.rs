//! Durable FIFO of attendance events captured while disconnected.
//!
//! Entries are mirrored into a [`LocalStore`] under `queue/<seq>` keys, with
//! the sequence zero-padded so lexical key order equals capture order. A
//! failed write never drops an entry: it stays in memory, flagged
//! non-durable, and is written again by [`OfflineQueue::flush`].

use crate::seal::{SealError, Sealer};
use crate::store::{LocalStore, StoreError};
use crate::submission::SubmissionError;
use chrono::{DateTime, Utc};
use presence_core::{AttendanceEvent, FeatureVector};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;
use uuid::Uuid;

pub const QUEUE_PREFIX: &str = "queue/";

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("queue persistence failed: {0}")]
    Persistence(#[from] StoreError),
    #[error("queue entry encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error(transparent)]
    Seal(#[from] SealError),
    #[error("entry {0} is not dead-lettered")]
    NotDeadLettered(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryState {
    Pending,
    /// Confirmed by the endpoint; waiting only for removal from the store.
    Submitted,
    /// Exceeded the retry budget; skipped until explicitly requeued.
    DeadLettered,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: Uuid,
    pub seq: u64,
    pub event: AttendanceEvent,
    pub descriptor: FeatureVector,
    pub captured_at: DateTime<Utc>,
    /// Failed submissions of any kind.
    pub attempts: u32,
    /// Failed submissions the endpoint refused. Only these count toward
    /// dead-lettering; an outage never moves an entry out of the way.
    #[serde(default)]
    pub rejections: u32,
    pub last_error: Option<String>,
    state: EntryState,
    #[serde(skip)]
    durable: bool,
}

impl QueueEntry {
    pub fn state(&self) -> EntryState {
        self.state
    }

    /// Whether the latest version of this entry reached the store.
    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn key(&self) -> String {
        entry_key(self.seq)
    }
}

/// Result of [`OfflineQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueReceipt {
    pub id: Uuid,
    pub seq: u64,
    /// False when the store write failed; the entry is retried on flush.
    pub durable: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStatus {
    pub pending: usize,
    pub awaiting_purge: usize,
    pub dead_lettered: usize,
    pub non_durable: usize,
}

fn entry_key(seq: u64) -> String {
    format!("{QUEUE_PREFIX}{seq:020}")
}

fn seq_from_key(key: &str) -> Option<u64> {
    key.strip_prefix(QUEUE_PREFIX)?.parse().ok()
}

fn encode_entry(sealer: &Sealer, entry: &QueueEntry) -> Result<Vec<u8>, QueueError> {
    let json = serde_json::to_vec(entry)?;
    Ok(sealer.seal(&json)?)
}

fn decode_entry(sealer: &Sealer, bytes: &[u8]) -> Result<QueueEntry, QueueError> {
    let json = sealer.open(bytes)?;
    Ok(serde_json::from_slice(&json)?)
}

pub struct OfflineQueue<S> {
    store: S,
    sealer: Sealer,
    entries: VecDeque<QueueEntry>,
    next_seq: u64,
}

impl<S: LocalStore> OfflineQueue<S> {
    /// Open the queue, restoring every readable entry from `store`.
    ///
    /// Unreadable entries are logged and left in the store untouched.
    pub async fn open(store: S, sealer: Sealer) -> Result<Self, QueueError> {
        let keys = store.list_keys(QUEUE_PREFIX).await?;
        let mut entries = VecDeque::with_capacity(keys.len());
        let mut next_seq = 0u64;

        for key in keys {
            let Some(seq) = seq_from_key(&key) else {
                tracing::warn!(key = %key, "offline queue: ignoring foreign key");
                continue;
            };
            let Some(after) = seq.checked_add(1) else {
                tracing::warn!(key = %key, "offline queue: ignoring out-of-range sequence");
                continue;
            };
            next_seq = next_seq.max(after);

            let Some(bytes) = store.get(&key).await? else {
                continue;
            };
            match decode_entry(&sealer, &bytes) {
                Ok(mut entry) => {
                    entry.durable = true;
                    entries.push_back(entry);
                }
                Err(e) => {
                    tracing::error!(key = %key, error = %e, "offline queue: unreadable entry left in store");
                }
            }
        }

        let queue = Self {
            store,
            sealer,
            entries,
            next_seq,
        };
        let status = queue.status();
        tracing::info!(
            pending = status.pending,
            dead_lettered = status.dead_lettered,
            awaiting_purge = status.awaiting_purge,
            encrypted = queue.sealer.is_encrypting(),
            "offline queue restored"
        );
        Ok(queue)
    }

    /// Append a pending entry at the tail.
    pub async fn enqueue(&mut self, event: AttendanceEvent, descriptor: FeatureVector) -> EnqueueReceipt {
        let seq = self.next_seq;
        self.next_seq = seq.saturating_add(1);

        let entry = QueueEntry {
            id: Uuid::new_v4(),
            seq,
            captured_at: event.captured_at,
            event,
            descriptor,
            attempts: 0,
            rejections: 0,
            last_error: None,
            state: EntryState::Pending,
            durable: false,
        };
        let id = entry.id;
        self.entries.push_back(entry);

        let durable = self.persist_at(self.entries.len() - 1).await;
        tracing::info!(entry = %id, seq, durable, "offline queue: event enqueued");
        EnqueueReceipt { id, seq, durable }
    }

    /// Retry writes that previously failed. Returns how many are still non-durable.
    pub async fn flush(&mut self) -> usize {
        let mut failed = 0;
        for index in 0..self.entries.len() {
            if !self.entries[index].durable && !self.persist_at(index).await {
                failed += 1;
            }
        }
        failed
    }

    /// Put a dead-lettered entry back in line at its original position.
    pub async fn requeue_dead_letter(&mut self, id: Uuid) -> Result<(), QueueError> {
        let index = self
            .entries
            .iter()
            .position(|e| e.id == id && e.state == EntryState::DeadLettered)
            .ok_or(QueueError::NotDeadLettered(id))?;

        let entry = &mut self.entries[index];
        entry.state = EntryState::Pending;
        entry.attempts = 0;
        entry.rejections = 0;
        tracing::info!(entry = %id, seq = entry.seq, "offline queue: dead letter requeued");
        self.persist_at(index).await;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter()
    }

    pub fn pending(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter().filter(|e| e.state == EntryState::Pending)
    }

    pub fn dead_letters(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter().filter(|e| e.state == EntryState::DeadLettered)
    }

    pub fn status(&self) -> QueueStatus {
        self.entries.iter().fold(QueueStatus::default(), |mut s, e| {
            match e.state {
                EntryState::Pending => s.pending += 1,
                EntryState::Submitted => s.awaiting_purge += 1,
                EntryState::DeadLettered => s.dead_lettered += 1,
            }
            if !e.durable {
                s.non_durable += 1;
            }
            s
        })
    }

    pub(crate) fn get(&self, index: usize) -> Option<&QueueEntry> {
        self.entries.get(index)
    }

    /// Record a confirmed submission. The entry is never offered again.
    pub(crate) async fn mark_submitted(&mut self, index: usize) {
        let entry = &mut self.entries[index];
        entry.state = EntryState::Submitted;
        entry.last_error = None;
        entry.event.mark_submitted();
        self.persist_at(index).await;
    }

    /// Record a failed attempt. Returns true when the entry was dead-lettered.
    pub(crate) async fn record_failure(
        &mut self,
        index: usize,
        error: &SubmissionError,
        max_rejections: Option<u32>,
    ) -> bool {
        let entry = &mut self.entries[index];
        entry.attempts += 1;
        entry.last_error = Some(error.to_string());
        if !error.is_unreachable() {
            entry.rejections += 1;
        }
        let dead = max_rejections.is_some_and(|max| entry.rejections >= max);
        if dead {
            entry.state = EntryState::DeadLettered;
        }
        self.persist_at(index).await;
        dead
    }

    /// Remove a submitted entry from the store and the queue.
    ///
    /// On a store failure the entry stays, still marked submitted.
    pub(crate) async fn purge(&mut self, index: usize) -> bool {
        let key = self.entries[index].key();
        match self.store.remove(&key).await {
            Ok(()) => {
                self.entries.remove(index);
                true
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "offline queue: purge failed; will retry");
                false
            }
        }
    }

    async fn persist_at(&mut self, index: usize) -> bool {
        let entry = &self.entries[index];
        let key = entry.key();
        let result = match encode_entry(&self.sealer, entry) {
            Ok(bytes) => self.store.set(&key, &bytes).await.map_err(QueueError::from),
            Err(e) => Err(e),
        };

        let durable = match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "offline queue: write failed; kept in memory");
                false
            }
        };
        self.entries[index].durable = durable;
        durable
    }
}
