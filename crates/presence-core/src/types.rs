use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Number of values in a face descriptor produced by the extractor.
pub const DESCRIPTOR_LEN: usize = 128;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("feature vector must have {expected} values, got {actual}")]
    InvalidVectorLength { expected: usize, actual: usize },
}

/// Opaque identifier of an enrolled person.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(String);

impl IdentityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdentityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for IdentityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Face bounding box in the pixel space of the source frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
pub type Landmarks = [(f32, f32); 5];

/// A single face reported by the descriptor extractor.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// Detector confidence in [0, 1].
    pub score: f32,
    pub landmarks: Option<Landmarks>,
    /// Raw descriptor values, validated into a [`FeatureVector`] on use.
    pub descriptor: Vec<f32>,
}

impl Detection {
    /// Validate the raw descriptor at the boundary.
    pub fn feature_vector(&self) -> Result<FeatureVector, DescriptorError> {
        FeatureVector::from_slice(&self.descriptor)
    }
}

/// Fixed-length face descriptor.
///
/// Construction is the only validation point: a `FeatureVector` always holds
/// exactly [`DESCRIPTOR_LEN`] values, so comparisons never see a short vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct FeatureVector {
    values: Vec<f32>,
}

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Result<Self, DescriptorError> {
        if values.len() != DESCRIPTOR_LEN {
            return Err(DescriptorError::InvalidVectorLength {
                expected: DESCRIPTOR_LEN,
                actual: values.len(),
            });
        }
        Ok(Self { values })
    }

    pub fn from_slice(values: &[f32]) -> Result<Self, DescriptorError> {
        Self::new(values.to_vec())
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Euclidean distance, accumulated in f64.
    pub fn euclidean_distance(&self, other: &FeatureVector) -> f64 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(&a, &b)| (f64::from(a) - f64::from(b)).powi(2))
            .sum::<f64>()
            .sqrt()
    }
}

impl TryFrom<Vec<f32>> for FeatureVector {
    type Error = DescriptorError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl From<FeatureVector> for Vec<f32> {
    fn from(vector: FeatureVector) -> Self {
        vector.values
    }
}

/// Per-capture quality measurements. Derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureQuality {
    pub detection_score: f32,
    pub box_width: f32,
    pub box_height: f32,
    /// Horizontal nose offset from the eye midpoint, relative to inter-eye distance.
    pub pose_offset_ratio: f32,
}

/// A descriptor accepted into an identity's enrollment set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub identity: IdentityId,
    pub vector: FeatureVector,
    pub captured_at: DateTime<Utc>,
}

/// Outcome of comparing two descriptors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub distance: f64,
    /// `max(0, 1 - distance)`.
    pub confidence: f64,
    pub matched: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    CheckIn,
    CheckOut,
    BreakStart,
    BreakEnd,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::CheckIn => "check-in",
            EventKind::CheckOut => "check-out",
            EventKind::BreakStart => "break-start",
            EventKind::BreakEnd => "break-end",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geolocation {
    pub lat: f64,
    pub lng: f64,
    pub address: Option<String>,
}

/// Connectivity at the moment the event was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOrigin {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Pending,
    Submitted,
}

/// A confirmed, typed attendance record.
///
/// Everything except the sync state is fixed at construction; the sync state
/// only ever moves from pending to submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub id: Uuid,
    pub identity: IdentityId,
    pub kind: EventKind,
    pub captured_at: DateTime<Utc>,
    pub confidence: f64,
    pub geolocation: Option<Geolocation>,
    pub notes: Option<String>,
    pub origin: EventOrigin,
    sync_state: SyncState,
}

impl AttendanceEvent {
    pub fn new(
        identity: IdentityId,
        kind: EventKind,
        captured_at: DateTime<Utc>,
        confidence: f64,
        origin: EventOrigin,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity,
            kind,
            captured_at,
            confidence,
            geolocation: None,
            notes: None,
            origin,
            sync_state: SyncState::Pending,
        }
    }

    pub fn with_geolocation(mut self, geolocation: Option<Geolocation>) -> Self {
        self.geolocation = geolocation;
        self
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes;
        self
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync_state
    }

    /// Record a confirmed submission. Idempotent.
    pub fn mark_submitted(&mut self) {
        self.sync_state = SyncState::Submitted;
    }
}
