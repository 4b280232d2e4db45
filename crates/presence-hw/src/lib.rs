//! presence-hw — Camera access for capture sessions.
//!
//! Capture backends are supplied by the embedding application through
//! [`MediaSource`]; this crate owns the exclusivity and release guarantees.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CameraLease, MediaSource, MediaStream};
pub use frame::{Frame, FrameError};
