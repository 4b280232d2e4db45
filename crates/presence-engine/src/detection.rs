//! Periodic live detection over a leased camera.
//!
//! Each tick grabs a frame and hands it to the extractor on its own task.
//! At most one extraction is in flight; a tick that finds one running is
//! skipped and counted, never queued behind it.

use crate::extractor::DescriptorExtractor;
use presence_core::{Detection, QualityGate, QualityReport};
use presence_hw::{CameraError, CameraLease, Frame};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

/// One extraction result from the live loop.
pub struct LiveDetection {
    pub frame: Frame,
    pub detection: Option<Detection>,
    /// Gate verdict for the detected face, for on-screen guidance.
    pub quality: Option<QualityReport>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectionStats {
    pub ticks: u64,
    pub extracted: u64,
    /// Ticks dropped because an extraction was still running.
    pub skipped: u64,
    pub dark: u64,
}

#[derive(Clone, Default)]
struct InFlight(Arc<AtomicBool>);

impl InFlight {
    fn try_begin(&self) -> Option<InFlightGuard> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard(self.0.clone()))
    }
}

/// Clears the in-flight flag when the extraction task ends, however it ends.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub(crate) struct DetectionLoop {
    pub extractor: Arc<dyn DescriptorExtractor>,
    pub gate: QualityGate,
    pub interval: Duration,
    pub results: mpsc::Sender<LiveDetection>,
}

impl DetectionLoop {
    /// Run until cancelled or the camera fails. The lease is dropped on return.
    pub async fn run(
        self,
        mut lease: CameraLease,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<DetectionStats, CameraError> {
        let in_flight = InFlight::default();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stats = DetectionStats::default();

        tracing::info!(device = %lease.device(), interval_ms = self.interval.as_millis() as u64, "live detection started");

        loop {
            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    stats.ticks += 1;
                    let Some(guard) = in_flight.try_begin() else {
                        stats.skipped += 1;
                        tracing::trace!(tick = stats.ticks, "detection: previous extraction running; tick skipped");
                        continue;
                    };

                    let frame = lease.capture_frame()?;
                    if frame.is_dark() {
                        stats.dark += 1;
                        continue;
                    }
                    stats.extracted += 1;

                    let extractor = self.extractor.clone();
                    let results = self.results.clone();
                    let gate = self.gate;
                    tokio::spawn(async move {
                        let _guard = guard;
                        let detection = match extractor.extract(&frame).await {
                            Ok(detection) => detection,
                            Err(e) => {
                                tracing::warn!(sequence = frame.sequence, error = %e, "detection: extraction failed");
                                None
                            }
                        };
                        let quality = detection.as_ref().map(|d| gate.assess_detection(d));
                        let _ = results.send(LiveDetection { frame, detection, quality }).await;
                    });
                }
            }
        }

        tracing::info!(
            ticks = stats.ticks,
            extracted = stats.extracted,
            skipped = stats.skipped,
            dark = stats.dark,
            "live detection stopped"
        );
        Ok(stats)
    }
}
