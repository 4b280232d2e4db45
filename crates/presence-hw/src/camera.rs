//! Scoped camera access.
//!
//! A [`Camera`] hands out at most one [`CameraLease`] at a time. The lease
//! stops every media track exactly once when it goes out of scope, whether
//! the session finished, was cancelled, or failed.

use crate::frame::Frame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device busy: {0} is already leased")]
    DeviceBusy(String),
    #[error("device unavailable: {0}")]
    Unavailable(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
}

/// Capture backend supplied by the embedding application.
pub trait MediaSource: Send + Sync {
    fn name(&self) -> &str;

    /// Start streaming. Called once per lease.
    fn open(&self) -> Result<Box<dyn MediaStream>, CameraError>;
}

/// A live stream of frames from a [`MediaSource`].
pub trait MediaStream: Send {
    fn next_frame(&mut self) -> Result<Frame, CameraError>;

    /// Stop all underlying media tracks. Called exactly once by the lease.
    fn stop_tracks(&mut self);
}

/// Shared handle to one capture device.
#[derive(Clone)]
pub struct Camera {
    source: Arc<dyn MediaSource>,
    held: Arc<AtomicBool>,
}

impl Camera {
    pub fn new(source: impl MediaSource + 'static) -> Self {
        Self {
            source: Arc::new(source),
            held: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &str {
        self.source.name()
    }

    /// Whether a lease is currently outstanding.
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    /// Acquire the device. Fails with `DeviceBusy` while another lease is alive.
    pub fn acquire(&self) -> Result<CameraLease, CameraError> {
        if self
            .held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CameraError::DeviceBusy(self.name().to_string()));
        }

        let stream = match self.source.open() {
            Ok(stream) => stream,
            Err(e) => {
                self.held.store(false, Ordering::Release);
                return Err(e);
            }
        };

        tracing::debug!(device = self.name(), "camera acquired");
        Ok(CameraLease {
            stream: Some(stream),
            held: Arc::clone(&self.held),
            device: self.name().to_string(),
        })
    }
}

/// Exclusive, scoped use of a [`Camera`].
pub struct CameraLease {
    stream: Option<Box<dyn MediaStream>>,
    held: Arc<AtomicBool>,
    device: String,
}

impl CameraLease {
    pub fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        match self.stream.as_mut() {
            Some(stream) => stream.next_frame(),
            None => Err(CameraError::CaptureFailed(format!("{} already released", self.device))),
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Release the device now rather than at end of scope.
    pub fn release(self) {}
}

impl Drop for CameraLease {
    fn drop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop_tracks();
            self.held.store(false, Ordering::Release);
            tracing::debug!(device = %self.device, "camera released");
        }
    }
}
