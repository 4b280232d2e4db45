//! presence-sync — Offline durability for attendance events: a persistent local log, the
//! FIFO queue built on it, and the reconciler that drains it in order.

pub mod queue;
pub mod reconciler;
pub mod seal;
pub mod store;
pub mod submission;

#[cfg(test)]
mod testing;

pub use queue::{EnqueueReceipt, EntryState, OfflineQueue, QueueEntry, QueueError, QueueStatus};
pub use reconciler::{DrainFailure, DrainReport, RetryPolicy, SyncReconciler};
pub use seal::{SealError, Sealer};
pub use store::{LocalStore, MemoryStore, SqliteStore, StoreError};
pub use submission::{Submission, SubmissionError, SubmissionReceipt, Submitter};
