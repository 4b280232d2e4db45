//! Capture quality gate.
//!
//! Every capture must pass before it may become a template or a live match
//! attempt. Any detected issue blocks the capture, even when the aggregate
//! score would still clear the minimum.

use crate::types::{CaptureQuality, Detection, Landmarks};
use serde::{Deserialize, Serialize};
use std::fmt;

const LOW_CONFIDENCE_PENALTY: f32 = 0.2;
const SMALL_FACE_PENALTY: f32 = 0.3;
const EXTREME_POSE_PENALTY: f32 = 0.2;
const MIN_VALID_SCORE: f32 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityIssue {
    LowDetectionConfidence,
    FaceTooSmall,
    ExtremeHeadPose,
}

impl fmt::Display for QualityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QualityIssue::LowDetectionConfidence => "low detection confidence",
            QualityIssue::FaceTooSmall => "face too small",
            QualityIssue::ExtremeHeadPose => "extreme head pose",
        })
    }
}

/// Comma-separated issue list for error messages.
pub fn format_issues(issues: &[QualityIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Rule thresholds. Defaults match the production gate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityThresholds {
    pub min_detection_score: f32,
    /// Minimum box width and height, in source-frame pixels.
    pub min_face_size: f32,
    pub max_pose_offset_ratio: f32,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_detection_score: 0.8,
            min_face_size: 100.0,
            max_pose_offset_ratio: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QualityReport {
    pub valid: bool,
    /// Failed rules, in evaluation order.
    pub issues: Vec<QualityIssue>,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QualityGate {
    thresholds: QualityThresholds,
}

impl QualityGate {
    pub fn new(thresholds: QualityThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &QualityThresholds {
        &self.thresholds
    }

    pub fn assess(&self, quality: &CaptureQuality) -> QualityReport {
        let t = &self.thresholds;
        let mut score = 1.0f32;
        let mut issues = Vec::new();

        if below(quality.detection_score, t.min_detection_score) {
            issues.push(QualityIssue::LowDetectionConfidence);
            score -= LOW_CONFIDENCE_PENALTY;
        }
        if below(quality.box_width, t.min_face_size) || below(quality.box_height, t.min_face_size) {
            issues.push(QualityIssue::FaceTooSmall);
            score -= SMALL_FACE_PENALTY;
        }
        if above(quality.pose_offset_ratio, t.max_pose_offset_ratio) {
            issues.push(QualityIssue::ExtremeHeadPose);
            score -= EXTREME_POSE_PENALTY;
        }

        QualityReport {
            valid: score >= MIN_VALID_SCORE && issues.is_empty(),
            issues,
            score,
        }
    }

    /// Measure and assess a detection in one step.
    pub fn assess_detection(&self, detection: &Detection) -> QualityReport {
        self.assess(&CaptureQuality::from_detection(detection))
    }
}

// A NaN measurement fails whichever rule reads it.
fn below(value: f32, min: f32) -> bool {
    value.is_nan() || value < min
}

fn above(value: f32, max: f32) -> bool {
    value.is_nan() || value > max
}

impl CaptureQuality {
    pub fn from_detection(detection: &Detection) -> Self {
        Self {
            detection_score: detection.score,
            box_width: detection.bbox.width,
            box_height: detection.bbox.height,
            pose_offset_ratio: detection
                .landmarks
                .as_ref()
                .map(pose_offset_ratio)
                .unwrap_or(0.0),
        }
    }
}

/// Horizontal nose offset from the eye midpoint, relative to inter-eye distance.
///
/// Degenerate landmarks (coincident eyes) yield infinity so the pose rule
/// always fires for them.
pub fn pose_offset_ratio(landmarks: &Landmarks) -> f32 {
    let (left_eye, right_eye, nose) = (landmarks[0], landmarks[1], landmarks[2]);
    let eye_center_x = (left_eye.0 + right_eye.0) / 2.0;
    let inter_eye = ((right_eye.0 - left_eye.0).powi(2) + (right_eye.1 - left_eye.1).powi(2)).sqrt();
    if inter_eye <= f32::EPSILON {
        return f32::INFINITY;
    }
    (nose.0 - eye_center_x).abs() / inter_eye
}
