//! presence-core — Descriptor matching, capture quality gate, enrollment
//! accumulation and the attendance event state machine.
//!
//! Everything here is pure and synchronous; I/O lives in `presence-sync`
//! and `presence-engine`.

pub mod attendance;
pub mod enrollment;
pub mod matcher;
pub mod quality;
pub mod types;

pub use attendance::{AttendanceError, AttendanceState, AttendanceStateMachine, EventRequest, TransitionPolicy};
pub use enrollment::{EnrollmentAccumulator, EnrollmentError, EnrollmentPhase, EnrollmentProgress};
pub use matcher::{BestMatch, EuclideanMatcher, Matcher};
pub use quality::{QualityGate, QualityIssue, QualityReport, QualityThresholds};
pub use types::{
    AttendanceEvent, BoundingBox, CaptureQuality, DescriptorError, Detection, EventKind, EventOrigin,
    FeatureVector, Geolocation, IdentityId, Landmarks, MatchResult, SyncState, Template, DESCRIPTOR_LEN,
};
