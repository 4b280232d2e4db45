//! Attendance event state machine and working-hours projection.
//!
//! Per identity and day: `NotCheckedIn -> CheckedIn -> OnBreak <-> CheckedIn
//! -> CheckedOut`. The current state is derived from the last event of the
//! day. Whether the transition table is enforced is a policy choice.

use crate::matcher::{EuclideanMatcher, Matcher};
use crate::types::{
    AttendanceEvent, EventKind, EventOrigin, FeatureVector, Geolocation, IdentityId, Template,
};
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AttendanceError {
    #[error("identity {identity} not confirmed (confidence {confidence:.3})")]
    IdentityNotConfirmed { identity: IdentityId, confidence: f64 },
    #[error("{requested} is not allowed while {from}")]
    InvalidTransition {
        from: AttendanceState,
        requested: EventKind,
    },
    #[error("check-out at {check_out} precedes check-in at {check_in}")]
    NegativeDuration {
        check_in: DateTime<Utc>,
        check_out: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceState {
    NotCheckedIn,
    CheckedIn,
    OnBreak,
    CheckedOut,
}

impl AttendanceState {
    /// State implied by the last event of the day.
    pub fn from_history(day_history: &[AttendanceEvent]) -> Self {
        day_history
            .last()
            .map(|event| Self::reached_by(event.kind))
            .unwrap_or(AttendanceState::NotCheckedIn)
    }

    pub fn reached_by(kind: EventKind) -> Self {
        match kind {
            EventKind::CheckIn | EventKind::BreakEnd => AttendanceState::CheckedIn,
            EventKind::BreakStart => AttendanceState::OnBreak,
            EventKind::CheckOut => AttendanceState::CheckedOut,
        }
    }

    /// Whether the strict transition table permits `kind` from this state.
    pub fn allows(self, kind: EventKind) -> bool {
        matches!(
            (self, kind),
            (AttendanceState::NotCheckedIn, EventKind::CheckIn)
                | (AttendanceState::CheckedIn, EventKind::BreakStart)
                | (AttendanceState::CheckedIn, EventKind::CheckOut)
                | (AttendanceState::OnBreak, EventKind::BreakEnd)
        )
    }
}

impl fmt::Display for AttendanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AttendanceState::NotCheckedIn => "not checked in",
            AttendanceState::CheckedIn => "checked in",
            AttendanceState::OnBreak => "on break",
            AttendanceState::CheckedOut => "checked out",
        })
    }
}

/// How out-of-sequence event types are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransitionPolicy {
    /// Accept any type at any time; out-of-sequence requests are only logged.
    #[default]
    Permissive,
    /// Enforce the transition table and fail with `InvalidTransition`.
    Strict,
}

/// A confirmed-capture request for a new event.
#[derive(Debug, Clone)]
pub struct EventRequest {
    pub identity: IdentityId,
    pub kind: EventKind,
    /// Descriptor from the (already quality-gated) live capture.
    pub probe: FeatureVector,
    pub captured_at: DateTime<Utc>,
    pub origin: EventOrigin,
    pub geolocation: Option<Geolocation>,
    pub notes: Option<String>,
}

pub struct AttendanceStateMachine<M = EuclideanMatcher> {
    matcher: M,
    policy: TransitionPolicy,
}

impl<M: Matcher> AttendanceStateMachine<M> {
    pub fn new(matcher: M, policy: TransitionPolicy) -> Self {
        Self { matcher, policy }
    }

    pub fn policy(&self) -> TransitionPolicy {
        self.policy
    }

    /// Confirm the identity and validate the requested type against today's events.
    ///
    /// No event is created on failure.
    pub fn request_event(
        &self,
        request: EventRequest,
        templates: &[Template],
        day_history: &[AttendanceEvent],
    ) -> Result<AttendanceEvent, AttendanceError> {
        let result = self.matcher.verify(&request.probe, templates);
        if !result.matched {
            tracing::info!(
                identity = %request.identity,
                confidence = result.confidence,
                templates = templates.len(),
                "attendance: identity not confirmed"
            );
            return Err(AttendanceError::IdentityNotConfirmed {
                identity: request.identity,
                confidence: result.confidence,
            });
        }

        let current = AttendanceState::from_history(day_history);
        if !current.allows(request.kind) {
            match self.policy {
                TransitionPolicy::Strict => {
                    return Err(AttendanceError::InvalidTransition {
                        from: current,
                        requested: request.kind,
                    });
                }
                TransitionPolicy::Permissive => {
                    tracing::warn!(
                        identity = %request.identity,
                        from = %current,
                        requested = %request.kind,
                        "attendance: out-of-sequence event accepted"
                    );
                }
            }
        }

        let event = AttendanceEvent::new(
            request.identity,
            request.kind,
            request.captured_at,
            result.confidence,
            request.origin,
        )
        .with_geolocation(request.geolocation)
        .with_notes(request.notes);

        tracing::info!(
            identity = %event.identity,
            kind = %event.kind,
            confidence = event.confidence,
            origin = ?event.origin,
            "attendance: event accepted"
        );
        Ok(event)
    }
}

impl Default for AttendanceStateMachine<EuclideanMatcher> {
    fn default() -> Self {
        Self::new(EuclideanMatcher::default(), TransitionPolicy::default())
    }
}

/// Time between a check-in and a check-out. Negative spans are an error.
pub fn working_duration(
    check_in: DateTime<Utc>,
    check_out: DateTime<Utc>,
) -> Result<Duration, AttendanceError> {
    let span = check_out - check_in;
    if span < Duration::zero() {
        return Err(AttendanceError::NegativeDuration { check_in, check_out });
    }
    Ok(span)
}

/// Worked time for one day: first check-in to last check-out, minus breaks.
///
/// Returns `None` until both a check-in and a check-out exist. A break left
/// open is closed at the check-out.
pub fn day_worked_time(day_history: &[AttendanceEvent]) -> Result<Option<Duration>, AttendanceError> {
    let check_in = day_history.iter().find(|e| e.kind == EventKind::CheckIn);
    let check_out = day_history.iter().rev().find(|e| e.kind == EventKind::CheckOut);
    let (Some(check_in), Some(check_out)) = (check_in, check_out) else {
        return Ok(None);
    };

    let span = working_duration(check_in.captured_at, check_out.captured_at)?;

    let mut on_break = Duration::zero();
    let mut break_started: Option<DateTime<Utc>> = None;
    for event in day_history {
        match event.kind {
            EventKind::BreakStart if break_started.is_none() => {
                break_started = Some(event.captured_at);
            }
            EventKind::BreakEnd => {
                if let Some(start) = break_started.take() {
                    on_break = on_break + clamp_break(start, event.captured_at, check_in, check_out);
                }
            }
            _ => {}
        }
    }
    if let Some(start) = break_started {
        on_break = on_break + clamp_break(start, check_out.captured_at, check_in, check_out);
    }

    Ok(Some((span - on_break).max(Duration::zero())))
}

fn clamp_break(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    check_in: &AttendanceEvent,
    check_out: &AttendanceEvent,
) -> Duration {
    let start = start.max(check_in.captured_at);
    let end = end.min(check_out.captured_at);
    (end - start).max(Duration::zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SyncState, DESCRIPTOR_LEN};
    use chrono::TimeZone;

    fn vector_with(first: f32) -> FeatureVector {
        let mut values = vec![0.0; DESCRIPTOR_LEN];
        values[0] = first;
        FeatureVector::new(values).unwrap()
    }

    fn templates(identity: &str) -> Vec<Template> {
        (0..3)
            .map(|_| Template {
                identity: identity.into(),
                vector: vector_with(0.0),
                captured_at: Utc::now(),
            })
            .collect()
    }

    fn at(hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, hour, min, 0).unwrap()
    }

    fn request(kind: EventKind, probe: f32) -> EventRequest {
        EventRequest {
            identity: "alice".into(),
            kind,
            probe: vector_with(probe),
            captured_at: at(9, 0),
            origin: EventOrigin::Online,
            geolocation: None,
            notes: None,
        }
    }

    fn event(kind: EventKind, time: DateTime<Utc>) -> AttendanceEvent {
        AttendanceEvent::new("alice".into(), kind, time, 0.9, EventOrigin::Online)
    }

    #[test]
    fn test_state_from_history() {
        assert_eq!(AttendanceState::from_history(&[]), AttendanceState::NotCheckedIn);
        let history = vec![event(EventKind::CheckIn, at(9, 0)), event(EventKind::BreakStart, at(12, 0))];
        assert_eq!(AttendanceState::from_history(&history), AttendanceState::OnBreak);
        let history = vec![event(EventKind::CheckIn, at(9, 0)), event(EventKind::CheckOut, at(17, 0))];
        assert_eq!(AttendanceState::from_history(&history), AttendanceState::CheckedOut);
    }

    #[test]
    fn test_confirmed_capture_creates_online_event() {
        let sm = AttendanceStateMachine::default();
        let mut req = request(EventKind::CheckIn, 0.18);
        req.geolocation = Some(Geolocation { lat: 59.33, lng: 18.06, address: None });
        let event = sm.request_event(req, &templates("alice"), &[]).unwrap();
        assert_eq!(event.kind, EventKind::CheckIn);
        assert_eq!(event.origin, EventOrigin::Online);
        assert_eq!(event.sync_state(), SyncState::Pending);
        assert!((event.confidence - 0.82).abs() < 1e-6);
        assert!(event.geolocation.is_some());
    }

    #[test]
    fn test_unconfirmed_identity_creates_no_event() {
        let sm = AttendanceStateMachine::default();
        let err = sm
            .request_event(request(EventKind::CheckIn, 0.9), &templates("alice"), &[])
            .unwrap_err();
        match err {
            AttendanceError::IdentityNotConfirmed { confidence, .. } => {
                assert!((confidence - 0.1).abs() < 1e-6);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_no_templates_is_not_confirmed() {
        let sm = AttendanceStateMachine::default();
        let err = sm.request_event(request(EventKind::CheckIn, 0.0), &[], &[]).unwrap_err();
        assert!(matches!(err, AttendanceError::IdentityNotConfirmed { .. }));
    }

    #[test]
    fn test_permissive_accepts_out_of_sequence() {
        let sm = AttendanceStateMachine::default();
        let accepted = sm
            .request_event(request(EventKind::CheckOut, 0.0), &templates("alice"), &[])
            .unwrap();
        assert_eq!(accepted.kind, EventKind::CheckOut);

        let history = vec![event(EventKind::CheckIn, at(8, 0))];
        assert!(sm
            .request_event(request(EventKind::CheckIn, 0.0), &templates("alice"), &history)
            .is_ok());
    }

    #[test]
    fn test_strict_rejects_out_of_sequence() {
        let sm = AttendanceStateMachine::new(EuclideanMatcher::default(), TransitionPolicy::Strict);
        let err = sm
            .request_event(request(EventKind::CheckOut, 0.0), &templates("alice"), &[])
            .unwrap_err();
        assert_eq!(
            err,
            AttendanceError::InvalidTransition {
                from: AttendanceState::NotCheckedIn,
                requested: EventKind::CheckOut,
            }
        );

        let history = vec![event(EventKind::CheckIn, at(8, 0)), event(EventKind::CheckOut, at(12, 0))];
        let err = sm
            .request_event(request(EventKind::CheckIn, 0.0), &templates("alice"), &history)
            .unwrap_err();
        assert!(matches!(
            err,
            AttendanceError::InvalidTransition { from: AttendanceState::CheckedOut, .. }
        ));
    }

    #[test]
    fn test_strict_allows_full_day() {
        let sm = AttendanceStateMachine::new(EuclideanMatcher::default(), TransitionPolicy::Strict);
        let mut history = Vec::new();
        for kind in [
            EventKind::CheckIn,
            EventKind::BreakStart,
            EventKind::BreakEnd,
            EventKind::BreakStart,
            EventKind::BreakEnd,
            EventKind::CheckOut,
        ] {
            let accepted = sm
                .request_event(request(kind, 0.0), &templates("alice"), &history)
                .unwrap();
            history.push(accepted);
        }
        assert_eq!(AttendanceState::from_history(&history), AttendanceState::CheckedOut);
    }

    #[test]
    fn test_strict_rejects_checkout_while_on_break() {
        assert!(!AttendanceState::OnBreak.allows(EventKind::CheckOut));
        assert!(!AttendanceState::CheckedIn.allows(EventKind::CheckIn));
    }

    #[test]
    fn test_working_duration() {
        let span = working_duration(at(9, 0), at(17, 30)).unwrap();
        assert_eq!(span, Duration::minutes(8 * 60 + 30));
    }

    #[test]
    fn test_negative_working_duration_is_error() {
        let err = working_duration(at(17, 0), at(9, 0)).unwrap_err();
        assert!(matches!(err, AttendanceError::NegativeDuration { .. }));
    }

    #[test]
    fn test_day_worked_time_subtracts_breaks() {
        let history = vec![
            event(EventKind::CheckIn, at(9, 0)),
            event(EventKind::BreakStart, at(12, 0)),
            event(EventKind::BreakEnd, at(12, 45)),
            event(EventKind::CheckOut, at(17, 0)),
        ];
        let worked = day_worked_time(&history).unwrap().unwrap();
        assert_eq!(worked, Duration::minutes(8 * 60 - 45));
    }

    #[test]
    fn test_day_worked_time_incomplete_day() {
        let history = vec![event(EventKind::CheckIn, at(9, 0))];
        assert_eq!(day_worked_time(&history).unwrap(), None);
    }

    #[test]
    fn test_day_worked_time_rejects_skewed_clock() {
        let history = vec![
            event(EventKind::CheckIn, at(10, 0)),
            event(EventKind::CheckOut, at(8, 0)),
        ];
        assert!(day_worked_time(&history).is_err());
    }
}
