//! Submission endpoint collaborator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use presence_core::{AttendanceEvent, EventKind, FeatureVector, Geolocation};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Payload accepted by the attendance submission endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    /// Client-side event id; lets the endpoint deduplicate retries.
    pub event_id: Uuid,
    pub feature_vector: FeatureVector,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub confidence: f64,
    pub captured_at: DateTime<Utc>,
    pub geolocation: Option<Geolocation>,
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_blob: Option<Vec<u8>>,
}

impl Submission {
    pub fn new(event: &AttendanceEvent, descriptor: &FeatureVector) -> Self {
        Self {
            event_id: event.id,
            feature_vector: descriptor.clone(),
            kind: event.kind,
            confidence: event.confidence,
            captured_at: event.captured_at,
            geolocation: event.geolocation.clone(),
            notes: event.notes.clone(),
            image_blob: None,
        }
    }

    pub fn with_image(mut self, image_blob: Option<Vec<u8>>) -> Self {
        self.image_blob = image_blob;
        self
    }
}

/// Acknowledgement from the endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceipt {
    /// Server-side id of the created attendance record.
    pub record_id: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),
    #[error("submission rejected: {0}")]
    Rejected(String),
}

impl SubmissionError {
    /// Whether the failure indicates lost connectivity rather than a refusal.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, SubmissionError::Unreachable(_))
    }
}

#[async_trait]
pub trait Submitter: Send + Sync {
    async fn submit(&self, submission: &Submission) -> Result<SubmissionReceipt, SubmissionError>;
}
