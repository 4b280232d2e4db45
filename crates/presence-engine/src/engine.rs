use crate::service::{AttendanceOutcome, AttendanceService, CaptureContext, EngineError};
use chrono::{Duration, NaiveDate};
use presence_core::{EnrollmentProgress, EventKind, IdentityId};
use presence_hw::Frame;
use presence_sync::{DrainReport, LocalStore, QueueStatus};
use tokio::sync::{mpsc, oneshot};

const REQUEST_BUFFER: usize = 16;

/// Messages sent from callers to the engine task.
enum EngineRequest {
    Initialize {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    IsReady {
        reply: oneshot::Sender<bool>,
    },
    Dispose {
        reply: oneshot::Sender<()>,
    },
    Enroll {
        identity: IdentityId,
        frame: Frame,
        reply: oneshot::Sender<Result<EnrollmentProgress, EngineError>>,
    },
    Attend {
        identity: IdentityId,
        frame: Frame,
        kind: EventKind,
        context: CaptureContext,
        reply: oneshot::Sender<Result<AttendanceOutcome, EngineError>>,
    },
    Drain {
        reply: oneshot::Sender<DrainReport>,
    },
    SetOnline {
        online: bool,
        reply: oneshot::Sender<Option<DrainReport>>,
    },
    ResetEnrollment {
        identity: IdentityId,
        reply: oneshot::Sender<()>,
    },
    WorkingHours {
        identity: IdentityId,
        date: NaiveDate,
        reply: oneshot::Sender<Result<Option<Duration>, EngineError>>,
    },
    QueueStatus {
        reply: oneshot::Sender<QueueStatus>,
    },
}

/// Clone-safe handle to the engine task.
///
/// Requests are processed strictly one at a time, in arrival order.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn call<T>(&self, request: impl FnOnce(oneshot::Sender<T>) -> EngineRequest) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(request(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Load the extraction models. Safe to call repeatedly.
    pub async fn initialize_matcher(&self) -> Result<(), EngineError> {
        self.call(|reply| EngineRequest::Initialize { reply }).await?
    }

    pub async fn is_ready(&self) -> Result<bool, EngineError> {
        self.call(|reply| EngineRequest::IsReady { reply }).await
    }

    pub async fn dispose(&self) -> Result<(), EngineError> {
        self.call(|reply| EngineRequest::Dispose { reply }).await
    }

    pub async fn submit_enrollment_capture(
        &self,
        identity: IdentityId,
        frame: Frame,
    ) -> Result<EnrollmentProgress, EngineError> {
        self.call(|reply| EngineRequest::Enroll { identity, frame, reply })
            .await?
    }

    pub async fn submit_attendance_capture(
        &self,
        identity: IdentityId,
        frame: Frame,
        kind: EventKind,
        context: CaptureContext,
    ) -> Result<AttendanceOutcome, EngineError> {
        self.call(|reply| EngineRequest::Attend {
            identity,
            frame,
            kind,
            context,
            reply,
        })
        .await?
    }

    pub async fn drain_offline_queue(&self) -> Result<DrainReport, EngineError> {
        self.call(|reply| EngineRequest::Drain { reply }).await
    }

    /// Report connectivity. An offline to online change drains the queue
    /// and returns its report.
    pub async fn set_online(&self, online: bool) -> Result<Option<DrainReport>, EngineError> {
        self.call(|reply| EngineRequest::SetOnline { online, reply }).await
    }

    pub async fn reset_enrollment(&self, identity: IdentityId) -> Result<(), EngineError> {
        self.call(|reply| EngineRequest::ResetEnrollment { identity, reply })
            .await
    }

    pub async fn working_hours(&self, identity: IdentityId, date: NaiveDate) -> Result<Option<Duration>, EngineError> {
        self.call(|reply| EngineRequest::WorkingHours { identity, date, reply })
            .await?
    }

    pub async fn queue_status(&self) -> Result<QueueStatus, EngineError> {
        self.call(|reply| EngineRequest::QueueStatus { reply }).await
    }
}

/// Move `service` onto its own task and return a handle to it.
///
/// Must be called from within a Tokio runtime. The task exits once every
/// handle has been dropped.
pub fn spawn_engine<S: LocalStore + 'static>(mut service: AttendanceService<S>) -> EngineHandle {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(REQUEST_BUFFER);

    tokio::spawn(async move {
        tracing::info!("engine task started");
        while let Some(req) = rx.recv().await {
            handle_request(&mut service, req).await;
        }
        tracing::info!("engine task exiting");
    });

    EngineHandle { tx }
}

async fn handle_request<S: LocalStore>(service: &mut AttendanceService<S>, req: EngineRequest) {
    match req {
        EngineRequest::Initialize { reply } => {
            let _ = reply.send(service.initialize_matcher().await);
        }
        EngineRequest::IsReady { reply } => {
            let _ = reply.send(service.is_ready());
        }
        EngineRequest::Dispose { reply } => {
            service.dispose();
            let _ = reply.send(());
        }
        EngineRequest::Enroll {
            identity,
            frame,
            reply,
        } => {
            let result = service.submit_enrollment_capture(&identity, &frame).await;
            let _ = reply.send(result);
        }
        EngineRequest::Attend {
            identity,
            frame,
            kind,
            context,
            reply,
        } => {
            let result = service
                .submit_attendance_capture(&identity, &frame, kind, context)
                .await;
            let _ = reply.send(result);
        }
        EngineRequest::Drain { reply } => {
            let _ = reply.send(service.drain_offline_queue().await);
        }
        EngineRequest::SetOnline { online, reply } => {
            let _ = reply.send(service.set_online(online).await);
        }
        EngineRequest::ResetEnrollment { identity, reply } => {
            service.reset_enrollment(&identity);
            let _ = reply.send(());
        }
        EngineRequest::WorkingHours {
            identity,
            date,
            reply,
        } => {
            let _ = reply.send(service.working_hours(&identity, date));
        }
        EngineRequest::QueueStatus { reply } => {
            let _ = reply.send(service.queue_status());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::testing::{frame, init_tracing, FakeEndpoint, FakeExtractor};
    use presence_core::{EnrollmentPhase, EventOrigin, SyncState};
    use presence_sync::{MemoryStore, OfflineQueue, Sealer};
    use std::sync::Arc;

    async fn engine(store: MemoryStore) -> (EngineHandle, Arc<FakeEndpoint>) {
        init_tracing();
        let endpoint = Arc::new(FakeEndpoint::new());
        let queue = OfflineQueue::open(store, Sealer::plaintext()).await.unwrap();
        let service = AttendanceService::new(
            &Config::default(),
            Arc::new(FakeExtractor::new()),
            endpoint.clone(),
            queue,
        );
        (spawn_engine(service), endpoint)
    }

    async fn enroll(handle: &EngineHandle, identity: &IdentityId) {
        for seq in 0..3 {
            handle
                .submit_enrollment_capture(identity.clone(), frame(seq))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_requests_before_initialize_fail() {
        let (handle, _) = engine(MemoryStore::new()).await;
        assert!(!handle.is_ready().await.unwrap());
        let err = handle
            .submit_enrollment_capture("alice".into(), frame(0))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotReady));
    }

    #[tokio::test]
    async fn test_handles_share_one_engine() {
        let (handle, _) = engine(MemoryStore::new()).await;
        let other = handle.clone();
        handle.initialize_matcher().await.unwrap();
        assert!(other.is_ready().await.unwrap());

        let alice = IdentityId::new("alice");
        enroll(&other, &alice).await;
        let progress = handle
            .submit_enrollment_capture(alice.clone(), frame(3))
            .await;
        assert!(matches!(progress, Err(EngineError::Enrollment(_))));

        other.reset_enrollment(alice.clone()).await.unwrap();
        let progress = handle.submit_enrollment_capture(alice, frame(4)).await.unwrap();
        assert_eq!(progress.phase, EnrollmentPhase::Partial(1));

        other.dispose().await.unwrap();
        assert!(!handle.is_ready().await.unwrap());
    }

    #[tokio::test]
    async fn test_offline_day_survives_restart() {
        let store = MemoryStore::new();
        let alice = IdentityId::new("alice");

        {
            let (handle, _) = engine(store.clone()).await;
            handle.initialize_matcher().await.unwrap();
            enroll(&handle, &alice).await;
            handle.set_online(false).await.unwrap();
            for kind in [EventKind::CheckIn, EventKind::BreakStart] {
                let outcome = handle
                    .submit_attendance_capture(alice.clone(), frame(7), kind, CaptureContext::default())
                    .await
                    .unwrap();
                assert_eq!(outcome.event().origin, EventOrigin::Offline);
            }
            assert_eq!(handle.queue_status().await.unwrap().pending, 2);
        }

        let (handle, endpoint) = engine(store).await;
        assert_eq!(handle.queue_status().await.unwrap().pending, 2);
        let report = handle.drain_offline_queue().await.unwrap();
        assert!(report.is_complete());
        let kinds: Vec<EventKind> = report.submitted.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::CheckIn, EventKind::BreakStart]);
        assert!(report.submitted.iter().all(|e| e.sync_state() == SyncState::Submitted));
        assert_eq!(endpoint.calls().len(), 2);
        assert_eq!(handle.queue_status().await.unwrap(), QueueStatus::default());
    }

    #[tokio::test]
    async fn test_working_hours_through_handle() {
        let (handle, _) = engine(MemoryStore::new()).await;
        handle.initialize_matcher().await.unwrap();
        let alice = IdentityId::new("alice");
        enroll(&handle, &alice).await;

        let outcome = handle
            .submit_attendance_capture(alice.clone(), frame(1), EventKind::CheckIn, CaptureContext::default())
            .await
            .unwrap();
        let date = outcome.event().captured_at.date_naive();
        assert_eq!(handle.working_hours(alice, date).await.unwrap(), None);
    }
}
