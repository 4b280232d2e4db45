//! Per-identity enrollment accumulator.
//!
//! Quality-passing captures are collected as templates until the completion
//! threshold is reached. Completion is terminal until an explicit reset.

use crate::quality::{format_issues, QualityIssue, QualityReport};
use crate::types::{FeatureVector, IdentityId, Template};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// Templates required before an identity counts as enrolled.
pub const TEMPLATES_PER_IDENTITY: usize = 3;
/// Rejected captures tolerated before a reset is required.
pub const DEFAULT_ENROLL_ATTEMPTS: u32 = 5;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnrollmentError {
    #[error("capture rejected: {}", format_issues(.issues))]
    QualityRejected {
        issues: Vec<QualityIssue>,
        attempts_remaining: u32,
    },
    #[error("identity {0} is already enrolled")]
    AlreadyEnrolled(IdentityId),
    #[error("no enrollment attempts left for {0}; reset required")]
    AttemptsExhausted(IdentityId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentPhase {
    Empty,
    /// Holds 1 or 2 templates.
    Partial(usize),
    Complete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrollmentState {
    templates: Vec<Template>,
    completed: bool,
    attempts_remaining: u32,
}

impl EnrollmentState {
    fn new(attempts: u32) -> Self {
        Self {
            templates: Vec::with_capacity(TEMPLATES_PER_IDENTITY),
            completed: false,
            attempts_remaining: attempts,
        }
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub fn completed(&self) -> bool {
        self.completed
    }

    pub fn attempts_remaining(&self) -> u32 {
        self.attempts_remaining
    }

    pub fn phase(&self) -> EnrollmentPhase {
        match self.templates.len() {
            _ if self.completed => EnrollmentPhase::Complete,
            0 => EnrollmentPhase::Empty,
            n => EnrollmentPhase::Partial(n),
        }
    }
}

/// Snapshot returned after an accepted capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrollmentProgress {
    pub phase: EnrollmentPhase,
    pub templates: usize,
    /// Captures still needed to complete.
    pub remaining: usize,
    pub completed: bool,
    pub attempts_remaining: u32,
}

impl EnrollmentProgress {
    fn of(state: &EnrollmentState) -> Self {
        Self {
            phase: state.phase(),
            templates: state.templates.len(),
            remaining: TEMPLATES_PER_IDENTITY - state.templates.len(),
            completed: state.completed,
            attempts_remaining: state.attempts_remaining,
        }
    }
}

pub struct EnrollmentAccumulator {
    states: HashMap<IdentityId, EnrollmentState>,
    max_attempts: u32,
}

impl EnrollmentAccumulator {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            states: HashMap::new(),
            max_attempts,
        }
    }

    /// Offer one capture for `identity`.
    ///
    /// A rejected capture leaves the templates untouched and spends one attempt.
    pub fn submit_capture(
        &mut self,
        identity: &IdentityId,
        vector: FeatureVector,
        report: &QualityReport,
        captured_at: DateTime<Utc>,
    ) -> Result<EnrollmentProgress, EnrollmentError> {
        let max_attempts = self.max_attempts;
        let state = self
            .states
            .entry(identity.clone())
            .or_insert_with(|| EnrollmentState::new(max_attempts));

        if state.completed {
            return Err(EnrollmentError::AlreadyEnrolled(identity.clone()));
        }
        if state.attempts_remaining == 0 {
            return Err(EnrollmentError::AttemptsExhausted(identity.clone()));
        }

        if !report.valid {
            state.attempts_remaining -= 1;
            tracing::debug!(
                identity = %identity,
                issues = %format_issues(&report.issues),
                attempts_remaining = state.attempts_remaining,
                "enroll: capture rejected"
            );
            return Err(EnrollmentError::QualityRejected {
                issues: report.issues.clone(),
                attempts_remaining: state.attempts_remaining,
            });
        }

        state.templates.push(Template {
            identity: identity.clone(),
            vector,
            captured_at,
        });
        if state.templates.len() == TEMPLATES_PER_IDENTITY {
            state.completed = true;
            tracing::info!(identity = %identity, "enroll: identity complete");
        } else {
            tracing::debug!(
                identity = %identity,
                templates = state.templates.len(),
                "enroll: template accepted"
            );
        }

        Ok(EnrollmentProgress::of(state))
    }

    /// Drop every template and restore the attempt budget.
    pub fn reset(&mut self, identity: &IdentityId) {
        if self.states.remove(identity).is_some() {
            tracing::info!(identity = %identity, "enroll: state reset");
        }
    }

    /// Install templates enrolled elsewhere (e.g. loaded from the user store).
    ///
    /// At most [`TEMPLATES_PER_IDENTITY`] templates are kept; the identity is
    /// complete when exactly that many are supplied.
    pub fn restore(&mut self, identity: &IdentityId, mut templates: Vec<Template>) {
        templates.truncate(TEMPLATES_PER_IDENTITY);
        let completed = templates.len() == TEMPLATES_PER_IDENTITY;
        self.states.insert(
            identity.clone(),
            EnrollmentState {
                templates,
                completed,
                attempts_remaining: self.max_attempts,
            },
        );
    }

    pub fn state(&self, identity: &IdentityId) -> Option<&EnrollmentState> {
        self.states.get(identity)
    }

    pub fn phase(&self, identity: &IdentityId) -> EnrollmentPhase {
        self.state(identity)
            .map(EnrollmentState::phase)
            .unwrap_or(EnrollmentPhase::Empty)
    }

    /// Templates of a completed enrollment; empty otherwise.
    pub fn enrolled_templates(&self, identity: &IdentityId) -> &[Template] {
        match self.states.get(identity) {
            Some(state) if state.completed => &state.templates[..],
            _ => &[],
        }
    }
}

impl Default for EnrollmentAccumulator {
    fn default() -> Self {
        Self::new(DEFAULT_ENROLL_ATTEMPTS)
    }
}
