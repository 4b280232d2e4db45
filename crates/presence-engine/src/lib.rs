//! presence-engine — the attendance service and the task that runs it.
//!
//! An embedding application supplies a [`DescriptorExtractor`], a
//! [`presence_sync::Submitter`] and optionally a camera backend, builds an
//! [`AttendanceService`] and moves it onto its own task with
//! [`spawn_engine`]. Every exposed operation then goes through the
//! returned [`EngineHandle`].

pub mod config;
pub mod connectivity;
pub mod detection;
pub mod engine;
pub mod extractor;
pub mod lifecycle;
pub mod service;
pub mod session;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use connectivity::Connectivity;
pub use detection::{DetectionStats, LiveDetection};
pub use engine::{spawn_engine, EngineHandle};
pub use extractor::{DescriptorExtractor, ExtractorError};
pub use lifecycle::MatcherRuntime;
pub use service::{open_offline_queue, AttendanceOutcome, AttendanceService, CaptureContext, EngineError};
pub use session::CaptureSession;
