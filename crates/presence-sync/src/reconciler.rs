//! Sequential reconciliation of the offline queue against the endpoint.
//!
//! A drain walks the queue head to tail and submits one entry at a time.
//! The first failure ends the pass with the failed entry still at its
//! position, so server-side order always equals capture order.

use crate::queue::{EntryState, OfflineQueue};
use crate::store::LocalStore;
use crate::submission::{Submission, SubmissionError, Submitter};
use presence_core::AttendanceEvent;
use uuid::Uuid;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// How many endpoint rejections an entry may accumulate before it is
/// dead-lettered. `None` retries forever. Unreachable failures are never
/// counted, so an outage cannot push the head aside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub fn bounded(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
        }
    }

    pub fn unbounded() -> Self {
        Self { max_attempts: None }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::bounded(DEFAULT_MAX_ATTEMPTS)
    }
}

#[derive(Debug, Clone)]
pub struct DrainFailure {
    pub entry_id: Uuid,
    pub seq: u64,
    pub error: SubmissionError,
    pub dead_lettered: bool,
}

#[derive(Debug, Default)]
pub struct DrainReport {
    /// Events confirmed during this pass, in submission order.
    pub submitted: Vec<AttendanceEvent>,
    /// The failure that ended the pass early, if any.
    pub failure: Option<DrainFailure>,
    pub skipped_dead_letters: usize,
    /// Pending entries left after the pass.
    pub remaining: usize,
    /// Entries whose store write still fails after the pre-drain flush.
    pub unflushed: usize,
}

impl DrainReport {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncReconciler {
    policy: RetryPolicy,
}

impl SyncReconciler {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub async fn drain<S: LocalStore>(&self, queue: &mut OfflineQueue<S>, submitter: &dyn Submitter) -> DrainReport {
        let mut report = DrainReport {
            unflushed: queue.flush().await,
            ..DrainReport::default()
        };

        let mut index = 0;
        while let Some(entry) = queue.get(index) {
            match entry.state() {
                EntryState::DeadLettered => {
                    report.skipped_dead_letters += 1;
                    index += 1;
                    continue;
                }
                // Confirmed on an earlier pass; only the removal is outstanding.
                EntryState::Submitted => {
                    if !queue.purge(index).await {
                        index += 1;
                    }
                    continue;
                }
                EntryState::Pending => {}
            }

            let submission = Submission::new(&entry.event, &entry.descriptor);
            let (entry_id, seq) = (entry.id, entry.seq);

            match submitter.submit(&submission).await {
                Ok(receipt) => {
                    queue.mark_submitted(index).await;
                    if let Some(done) = queue.get(index) {
                        report.submitted.push(done.event.clone());
                    }
                    tracing::debug!(entry = %entry_id, seq, record = %receipt.record_id, "offline entry submitted");
                    if !queue.purge(index).await {
                        index += 1;
                    }
                }
                Err(error) => {
                    let dead_lettered = queue
                        .record_failure(index, &error, self.policy.max_attempts)
                        .await;
                    tracing::warn!(
                        entry = %entry_id,
                        seq,
                        error = %error,
                        dead_lettered,
                        "offline drain stopped at failed entry"
                    );
                    report.failure = Some(DrainFailure {
                        entry_id,
                        seq,
                        error,
                        dead_lettered,
                    });
                    break;
                }
            }
        }

        report.remaining = queue.status().pending;
        tracing::info!(
            submitted = report.submitted.len(),
            remaining = report.remaining,
            skipped_dead_letters = report.skipped_dead_letters,
            complete = report.is_complete(),
            "offline drain finished"
        );
        report
    }
}
