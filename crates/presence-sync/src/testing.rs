//! Fakes shared by the sync tests.

use crate::store::{LocalStore, MemoryStore, StoreError};
use crate::submission::{Submission, SubmissionError, SubmissionReceipt, Submitter};
use async_trait::async_trait;
use chrono::Utc;
use presence_core::{AttendanceEvent, EventKind, EventOrigin, FeatureVector, DESCRIPTOR_LEN};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub fn descriptor(fill: f32) -> FeatureVector {
    FeatureVector::new(vec![fill; DESCRIPTOR_LEN]).unwrap()
}

pub fn offline_event(kind: EventKind) -> AttendanceEvent {
    AttendanceEvent::new("alice".into(), kind, Utc::now(), 0.9, EventOrigin::Offline)
}

/// Memory store whose writes and removals can be made to fail.
#[derive(Clone, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_writes: Arc<AtomicBool>,
    fail_removes: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_removes(&self, fail: bool) {
        self.fail_removes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl LocalStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("disk full".into()));
        }
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        if self.fail_removes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("disk full".into()));
        }
        self.inner.remove(key).await
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.inner.list_keys(prefix).await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.inner.clear().await
    }
}

/// Submitter that replays scripted outcomes, then accepts everything.
#[derive(Default)]
pub struct ScriptedSubmitter {
    outcomes: Mutex<VecDeque<Result<(), SubmissionError>>>,
    calls: Mutex<Vec<Uuid>>,
}

impl ScriptedSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, outcome: Result<(), SubmissionError>) -> Self {
        self.outcomes.lock().unwrap().push_back(outcome);
        self
    }

    /// Event ids in the order they were offered, including failed attempts.
    pub fn calls(&self) -> Vec<Uuid> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Submitter for ScriptedSubmitter {
    async fn submit(&self, submission: &Submission) -> Result<SubmissionReceipt, SubmissionError> {
        self.calls.lock().unwrap().push(submission.event_id);
        let outcome = self.outcomes.lock().unwrap().pop_front().unwrap_or(Ok(()));
        outcome.map(|()| SubmissionReceipt {
            record_id: format!("rec-{}", submission.event_id),
        })
    }
}
