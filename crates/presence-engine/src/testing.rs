//! In-process fakes for the engine tests.

use crate::extractor::{DescriptorExtractor, ExtractorError};
use async_trait::async_trait;
use presence_core::{BoundingBox, Detection, DESCRIPTOR_LEN};
use presence_hw::{Camera, CameraError, Frame, MediaSource, MediaStream};
use presence_sync::{Submission, SubmissionError, SubmissionReceipt, Submitter};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn frame(sequence: u32) -> Frame {
    Frame::from_gray(8, 8, vec![128; 64], sequence).unwrap()
}

/// A frontal, well-sized face whose descriptor is zero except `values[0]`.
pub fn detection(first: f32) -> Detection {
    let mut descriptor = vec![0.0; DESCRIPTOR_LEN];
    descriptor[0] = first;
    Detection {
        bbox: BoundingBox {
            x: 40.0,
            y: 40.0,
            width: 180.0,
            height: 200.0,
        },
        score: 0.95,
        landmarks: Some([(90.0, 110.0), (150.0, 110.0), (120.0, 140.0), (95.0, 175.0), (145.0, 175.0)]),
        descriptor,
    }
}

pub struct FakeExtractor {
    next: Mutex<Option<Detection>>,
    delay: Duration,
    loads: AtomicUsize,
    unloads: AtomicUsize,
    fail_load: AtomicBool,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl FakeExtractor {
    pub fn new() -> Self {
        Self {
            next: Mutex::new(Some(detection(0.0))),
            delay: Duration::ZERO,
            loads: AtomicUsize::new(0),
            unloads: AtomicUsize::new(0),
            fail_load: AtomicBool::new(false),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// What every following extraction returns.
    pub fn set_detection(&self, detection: Option<Detection>) {
        *self.next.lock().unwrap() = detection;
    }

    pub fn fail_next_load(&self) {
        self.fail_load.store(true, Ordering::SeqCst);
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn unloads(&self) -> usize {
        self.unloads.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DescriptorExtractor for FakeExtractor {
    async fn load(&self) -> Result<(), ExtractorError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if self.fail_load.swap(false, Ordering::SeqCst) {
            return Err(ExtractorError::Load("model file missing".into()));
        }
        Ok(())
    }

    async fn extract(&self, _frame: &Frame) -> Result<Option<Detection>, ExtractorError> {
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(self.next.lock().unwrap().clone())
    }

    fn unload(&self) {
        self.unloads.fetch_add(1, Ordering::SeqCst);
    }
}

/// Observes and perturbs a [`FakeCamera`].
#[derive(Default)]
pub struct CameraProbe {
    stopped: AtomicUsize,
    fail_capture: AtomicBool,
}

impl CameraProbe {
    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn fail_capture(&self) {
        self.fail_capture.store(true, Ordering::SeqCst);
    }
}

pub struct FakeCamera {
    probe: Arc<CameraProbe>,
}

impl FakeCamera {
    pub fn new() -> (Camera, Arc<CameraProbe>) {
        let probe = Arc::new(CameraProbe::default());
        (Camera::new(Self { probe: probe.clone() }), probe)
    }
}

impl MediaSource for FakeCamera {
    fn name(&self) -> &str {
        "fake0"
    }

    fn open(&self) -> Result<Box<dyn MediaStream>, CameraError> {
        Ok(Box::new(FakeStream {
            probe: self.probe.clone(),
            sequence: 0,
        }))
    }
}

struct FakeStream {
    probe: Arc<CameraProbe>,
    sequence: u32,
}

impl MediaStream for FakeStream {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        if self.probe.fail_capture.load(Ordering::SeqCst) {
            return Err(CameraError::CaptureFailed("sensor timeout".into()));
        }
        self.sequence += 1;
        Ok(frame(self.sequence))
    }

    fn stop_tracks(&mut self) {
        self.probe.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

/// Endpoint fake: accepts while up, records every attempt.
#[derive(Default)]
pub struct FakeEndpoint {
    down: AtomicBool,
    reject: AtomicBool,
    calls: Mutex<Vec<Submission>>,
}

impl FakeEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Submission> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Submitter for FakeEndpoint {
    async fn submit(&self, submission: &Submission) -> Result<SubmissionReceipt, SubmissionError> {
        self.calls.lock().unwrap().push(submission.clone());
        if self.down.load(Ordering::SeqCst) {
            return Err(SubmissionError::Unreachable("connection refused".into()));
        }
        if self.reject.load(Ordering::SeqCst) {
            return Err(SubmissionError::Rejected("422 unprocessable".into()));
        }
        Ok(SubmissionReceipt {
            record_id: format!("att-{}", submission.event_id),
        })
    }
}

/// Route engine logs to the test harness; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
