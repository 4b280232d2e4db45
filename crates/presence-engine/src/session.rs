//! Live capture sessions.

use crate::detection::{DetectionLoop, DetectionStats, LiveDetection};
use crate::extractor::DescriptorExtractor;
use presence_core::QualityGate;
use presence_hw::{Camera, CameraError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

const RESULT_BUFFER: usize = 8;

/// A running live-detection session holding the camera.
///
/// The camera lease lives inside the session task, so it is released when
/// the task ends: on [`finish`](Self::finish), on a capture error, or after
/// the session handle is dropped.
pub struct CaptureSession {
    cancel: watch::Sender<bool>,
    task: JoinHandle<Result<DetectionStats, CameraError>>,
    device: String,
}

impl CaptureSession {
    /// Acquire `camera` and start detecting. Fails with `DeviceBusy` while
    /// another session holds the camera.
    pub fn start(
        camera: &Camera,
        extractor: Arc<dyn DescriptorExtractor>,
        gate: QualityGate,
        interval: Duration,
    ) -> Result<(Self, mpsc::Receiver<LiveDetection>), CameraError> {
        let lease = camera.acquire()?;
        let device = lease.device().to_string();
        let (results, rx) = mpsc::channel(RESULT_BUFFER);
        let (cancel, cancel_rx) = watch::channel(false);

        let detection = DetectionLoop {
            extractor,
            gate,
            interval,
            results,
        };
        let task = tokio::spawn(detection.run(lease, cancel_rx));

        Ok((Self { cancel, task, device }, rx))
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Ask the session to stop without waiting for it.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Stop the session and wait until the camera is released.
    pub async fn finish(self) -> Result<DetectionStats, CameraError> {
        self.cancel();
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(CameraError::CaptureFailed(format!("{}: session task ended: {e}", self.device))),
        }
    }
}
