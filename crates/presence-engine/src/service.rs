//! The attendance service.
//!
//! Owns every piece of mutable state: enrollments, per-day event history,
//! the offline queue and the connectivity flag. It is driven by exactly one
//! task (see [`crate::engine`]), so none of that state is locked.

use crate::config::Config;
use crate::connectivity::Connectivity;
use crate::extractor::{DescriptorExtractor, ExtractorError};
use crate::lifecycle::MatcherRuntime;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use presence_core::attendance::day_worked_time;
use presence_core::quality::format_issues;
use presence_core::{
    AttendanceError, AttendanceEvent, AttendanceStateMachine, DescriptorError, Detection,
    EnrollmentAccumulator, EnrollmentError, EnrollmentPhase, EnrollmentProgress, EuclideanMatcher,
    EventKind, EventOrigin, EventRequest, FeatureVector, Geolocation, IdentityId, QualityGate,
    QualityIssue, Template,
};
use presence_hw::Frame;
use presence_sync::{
    DrainReport, EnqueueReceipt, LocalStore, OfflineQueue, QueueEntry, QueueError, QueueStatus,
    SealError, Sealer, SqliteStore, StoreError, Submission, SubmissionReceipt, Submitter,
    SyncReconciler,
};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("matcher is not initialized")]
    NotReady,
    #[error("no face detected in frame")]
    NoFaceDetected,
    #[error("capture rejected: {}", format_issues(.0))]
    QualityRejected(Vec<QualityIssue>),
    #[error("extractor error: {0}")]
    Extractor(#[from] ExtractorError),
    #[error("descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),
    #[error("enrollment error: {0}")]
    Enrollment(#[from] EnrollmentError),
    #[error("attendance error: {0}")]
    Attendance(#[from] AttendanceError),
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("seal error: {0}")]
    Seal(#[from] SealError),
    #[error("engine task exited")]
    ChannelClosed,
}

/// Caller-supplied details attached to an attendance capture.
#[derive(Debug, Clone, Default)]
pub struct CaptureContext {
    pub geolocation: Option<Geolocation>,
    pub notes: Option<String>,
    /// Sent with a direct online submission only; never written to the queue.
    pub image_blob: Option<Vec<u8>>,
    /// Defaults to the time of the call.
    pub captured_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub enum AttendanceOutcome {
    /// Accepted by the endpoint immediately.
    Submitted {
        event: AttendanceEvent,
        receipt: SubmissionReceipt,
    },
    /// Written to the offline queue. The event shows `submitted` if a drain
    /// triggered by this capture already delivered it.
    Queued {
        event: AttendanceEvent,
        receipt: EnqueueReceipt,
    },
}

impl AttendanceOutcome {
    pub fn event(&self) -> &AttendanceEvent {
        match self {
            AttendanceOutcome::Submitted { event, .. } | AttendanceOutcome::Queued { event, .. } => event,
        }
    }
}

/// Open the durable queue described by `config`.
pub async fn open_offline_queue(config: &Config) -> Result<OfflineQueue<SqliteStore>, EngineError> {
    let store = SqliteStore::open(&config.queue_db_path)?;
    let sealer = match &config.queue_passphrase {
        Some(passphrase) => Sealer::from_passphrase(passphrase)?,
        None => Sealer::plaintext(),
    };
    Ok(OfflineQueue::open(store, sealer).await?)
}

pub struct AttendanceService<S> {
    runtime: MatcherRuntime,
    gate: QualityGate,
    enrollment: EnrollmentAccumulator,
    attendance: AttendanceStateMachine<EuclideanMatcher>,
    /// Events per identity and UTC day. Only the newest day is kept.
    history: HashMap<(IdentityId, NaiveDate), Vec<AttendanceEvent>>,
    queue: OfflineQueue<S>,
    reconciler: SyncReconciler,
    submitter: Arc<dyn Submitter>,
    connectivity: Connectivity,
}

impl<S: LocalStore> AttendanceService<S> {
    /// Build the service. Connectivity starts online; models start unloaded.
    pub fn new(
        config: &Config,
        extractor: Arc<dyn DescriptorExtractor>,
        submitter: Arc<dyn Submitter>,
        queue: OfflineQueue<S>,
    ) -> Self {
        Self {
            runtime: MatcherRuntime::new(extractor),
            gate: QualityGate::new(config.quality),
            enrollment: EnrollmentAccumulator::new(config.enroll_attempts),
            attendance: AttendanceStateMachine::new(
                EuclideanMatcher::new(config.confidence_threshold),
                config.transition_policy,
            ),
            history: HashMap::new(),
            queue,
            reconciler: SyncReconciler::new(config.retry),
            submitter,
            connectivity: Connectivity::new(true),
        }
    }

    pub async fn initialize_matcher(&self) -> Result<(), EngineError> {
        Ok(self.runtime.initialize().await?)
    }

    pub fn is_ready(&self) -> bool {
        self.runtime.is_ready()
    }

    pub fn dispose(&mut self) {
        self.runtime.dispose();
    }

    /// The loaded extractor, for driving a live capture session.
    pub fn extractor(&self) -> Option<Arc<dyn DescriptorExtractor>> {
        self.runtime.extractor().cloned()
    }

    pub fn quality_gate(&self) -> QualityGate {
        self.gate
    }

    pub async fn submit_enrollment_capture(
        &mut self,
        identity: &IdentityId,
        frame: &Frame,
    ) -> Result<EnrollmentProgress, EngineError> {
        let detection = self.detect(frame).await?;
        let vector = detection.feature_vector()?;
        let report = self.gate.assess_detection(&detection);
        let progress = self
            .enrollment
            .submit_capture(identity, vector, &report, Utc::now())?;

        tracing::info!(
            identity = %identity,
            templates = progress.templates,
            remaining = progress.remaining,
            "enrollment capture accepted"
        );
        Ok(progress)
    }

    pub async fn submit_attendance_capture(
        &mut self,
        identity: &IdentityId,
        frame: &Frame,
        kind: EventKind,
        context: CaptureContext,
    ) -> Result<AttendanceOutcome, EngineError> {
        let detection = self.detect(frame).await?;
        let report = self.gate.assess_detection(&detection);
        if !report.valid {
            tracing::info!(
                identity = %identity,
                issues = %format_issues(&report.issues),
                "attendance capture rejected"
            );
            return Err(EngineError::QualityRejected(report.issues));
        }
        let probe = detection.feature_vector()?;

        let captured_at = context.captured_at.unwrap_or_else(Utc::now);
        let origin = if self.connectivity.is_online() {
            EventOrigin::Online
        } else {
            EventOrigin::Offline
        };
        let day = (identity.clone(), captured_at.date_naive());

        let request = EventRequest {
            identity: identity.clone(),
            kind,
            probe: probe.clone(),
            captured_at,
            origin,
            geolocation: context.geolocation,
            notes: context.notes,
        };
        let history = self.history.get(&day).map(Vec::as_slice).unwrap_or(&[]);
        let event = self
            .attendance
            .request_event(request, self.enrollment.enrolled_templates(identity), history)?;

        if !self.history.contains_key(&day) {
            let date = day.1;
            self.history.retain(|(_, kept), _| *kept >= date);
        }
        self.history.entry(day).or_default().push(event.clone());
        Ok(self.deliver(event, probe, context.image_blob).await)
    }

    /// Submit queued events in capture order, stopping at the first failure.
    pub async fn drain_offline_queue(&mut self) -> DrainReport {
        let report = self
            .reconciler
            .drain(&mut self.queue, self.submitter.as_ref())
            .await;
        if report
            .failure
            .as_ref()
            .is_some_and(|failure| failure.error.is_unreachable())
        {
            self.connectivity.set(false);
        }
        self.mark_history_submitted(&report.submitted);
        report
    }

    /// Record connectivity. Coming back online drains the queue.
    pub async fn set_online(&mut self, online: bool) -> Option<DrainReport> {
        if self.connectivity.set(online) {
            Some(self.drain_offline_queue().await)
        } else {
            None
        }
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    pub fn subscribe_connectivity(&self) -> watch::Receiver<bool> {
        self.connectivity.subscribe()
    }

    pub fn reset_enrollment(&mut self, identity: &IdentityId) {
        self.enrollment.reset(identity);
    }

    /// Install templates enrolled on another device.
    pub fn restore_enrollment(&mut self, identity: &IdentityId, templates: Vec<Template>) {
        self.enrollment.restore(identity, templates);
    }

    pub fn enrollment_phase(&self, identity: &IdentityId) -> EnrollmentPhase {
        self.enrollment.phase(identity)
    }

    /// Events for a UTC `date`. Days are evicted once a later day starts.
    pub fn day_history(&self, identity: &IdentityId, date: NaiveDate) -> &[AttendanceEvent] {
        self.history
            .get(&(identity.clone(), date))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Worked time for the UTC `date`, or `None` until the day has a check-in and a check-out.
    pub fn working_hours(&self, identity: &IdentityId, date: NaiveDate) -> Result<Option<Duration>, EngineError> {
        Ok(day_worked_time(self.day_history(identity, date))?)
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.queue.status()
    }

    pub fn dead_letters(&self) -> Vec<QueueEntry> {
        self.queue.dead_letters().cloned().collect()
    }

    pub async fn requeue_dead_letter(&mut self, id: Uuid) -> Result<(), EngineError> {
        Ok(self.queue.requeue_dead_letter(id).await?)
    }

    async fn detect(&self, frame: &Frame) -> Result<Detection, EngineError> {
        let extractor = self.runtime.extractor().ok_or(EngineError::NotReady)?;
        extractor
            .extract(frame)
            .await?
            .ok_or(EngineError::NoFaceDetected)
    }

    /// Submit directly when online with nothing queued ahead; otherwise queue.
    async fn deliver(
        &mut self,
        mut event: AttendanceEvent,
        descriptor: FeatureVector,
        image_blob: Option<Vec<u8>>,
    ) -> AttendanceOutcome {
        let mut attempted = false;
        if self.connectivity.is_online() && self.queue.status().pending == 0 {
            attempted = true;
            let submission = Submission::new(&event, &descriptor).with_image(image_blob);
            match self.submitter.submit(&submission).await {
                Ok(receipt) => {
                    event.mark_submitted();
                    self.mark_history_submitted(std::slice::from_ref(&event));
                    tracing::info!(event = %event.id, record = %receipt.record_id, "attendance event submitted");
                    return AttendanceOutcome::Submitted { event, receipt };
                }
                Err(e) => {
                    tracing::warn!(event = %event.id, error = %e, "submission failed; queueing event");
                    if e.is_unreachable() {
                        self.connectivity.set(false);
                    }
                }
            }
        }

        let receipt = self.queue.enqueue(event.clone(), descriptor).await;

        // Older entries are queued ahead of this one; drain to keep capture order.
        if !attempted && self.connectivity.is_online() {
            let report = self.drain_offline_queue().await;
            if report.submitted.iter().any(|e| e.id == event.id) {
                event.mark_submitted();
            }
        }
        AttendanceOutcome::Queued { event, receipt }
    }

    fn mark_history_submitted(&mut self, submitted: &[AttendanceEvent]) {
        for done in submitted {
            let key = (done.identity.clone(), done.captured_at.date_naive());
            if let Some(event) = self
                .history
                .get_mut(&key)
                .and_then(|day| day.iter_mut().find(|e| e.id == done.id))
            {
                event.mark_submitted();
            }
        }
    }
}
