//! Tracking session lifecycle: inactive → active ⇄ paused → completed.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::TrackingConfig;
use crate::filter::{process_fix, FilterState, FixDecision, RejectReason};
use crate::{elapsed_seconds, Fix, TrackError};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Inactive,
    Active,
    Paused,
    Completed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionStatus::Inactive => "inactive",
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
        })
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionAction {
    Start,
    Pause,
    Resume,
    Stop,
}

impl fmt::Display for SessionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionAction::Start => "start",
            SessionAction::Pause => "pause",
            SessionAction::Resume => "resume",
            SessionAction::Stop => "stop",
        })
    }
}

/// Session timing handed to the statistics engine.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionTiming {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Pause-adjusted duration; preferred over `end - start` when present.
    pub active_duration_sec: Option<f64>,
}

#[derive(Clone, Debug)]
pub struct TrackingSession {
    status: SessionStatus,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    paused_at: Option<DateTime<Utc>>,
    paused_secs: f64,
    last_accepted: Option<Fix>,
    filter: FilterState,
}

impl Default for TrackingSession {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackingSession {
    pub fn new() -> Self {
        Self {
            status: SessionStatus::Inactive,
            start_time: None,
            end_time: None,
            paused_at: None,
            paused_secs: 0.0,
            last_accepted: None,
            filter: FilterState::new(),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn last_accepted(&self) -> Option<&Fix> {
        self.last_accepted.as_ref()
    }

    pub fn filter(&self) -> &FilterState {
        &self.filter
    }

    pub fn start(&mut self, at: DateTime<Utc>) -> Result<(), TrackError> {
        self.require(SessionAction::Start, &[SessionStatus::Inactive])?;
        self.filter = FilterState::new();
        self.last_accepted = None;
        self.start_time = Some(at);
        self.end_time = None;
        self.paused_at = None;
        self.paused_secs = 0.0;
        self.transition(SessionStatus::Active);
        Ok(())
    }

    pub fn pause(&mut self, at: DateTime<Utc>) -> Result<(), TrackError> {
        self.require(SessionAction::Pause, &[SessionStatus::Active])?;
        self.paused_at = Some(at);
        self.transition(SessionStatus::Paused);
        Ok(())
    }

    pub fn resume(&mut self, at: DateTime<Utc>) -> Result<(), TrackError> {
        self.require(SessionAction::Resume, &[SessionStatus::Paused])?;
        self.close_pause(at);
        self.transition(SessionStatus::Active);
        Ok(())
    }

    /// Complete the session, clearing all filter state, and return its timing.
    pub fn stop(&mut self, at: DateTime<Utc>) -> Result<SessionTiming, TrackError> {
        self.require(
            SessionAction::Stop,
            &[SessionStatus::Active, SessionStatus::Paused],
        )?;
        self.close_pause(at);
        self.end_time = Some(at);
        self.filter.reset();
        self.last_accepted = None;
        self.transition(SessionStatus::Completed);
        Ok(self.timing(at))
    }

    /// Filter a fix if the session is active; otherwise it is dropped.
    pub fn process_fix(&mut self, raw: &Fix, config: &TrackingConfig) -> FixDecision {
        if self.status != SessionStatus::Active {
            return FixDecision::Rejected(RejectReason::NotTracking);
        }
        let decision = process_fix(&mut self.filter, raw, config);
        if let FixDecision::Accepted(fix) = &decision {
            self.last_accepted = Some(fix.clone());
        }
        decision
    }

    /// Wall time since start minus paused time, measured up to `now` (or the stop time).
    pub fn active_duration_sec(&self, now: DateTime<Utc>) -> f64 {
        let start = match self.start_time {
            Some(start) => start,
            None => return 0.0,
        };
        let end = self.end_time.unwrap_or(now);
        let ongoing_pause = self
            .paused_at
            .map(|p| elapsed_seconds(p, end).max(0.0))
            .unwrap_or(0.0);
        (elapsed_seconds(start, end) - self.paused_secs - ongoing_pause).max(0.0)
    }

    pub fn timing(&self, now: DateTime<Utc>) -> SessionTiming {
        SessionTiming {
            start: self.start_time,
            end: Some(self.end_time.unwrap_or(now)),
            active_duration_sec: self.start_time.map(|_| self.active_duration_sec(now)),
        }
    }

    fn close_pause(&mut self, at: DateTime<Utc>) {
        if let Some(paused_at) = self.paused_at.take() {
            self.paused_secs += elapsed_seconds(paused_at, at).max(0.0);
        }
    }

    fn require(&self, action: SessionAction, allowed: &[SessionStatus]) -> Result<(), TrackError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(TrackError::State {
                action,
                state: self.status,
            })
        }
    }

    fn transition(&mut self, next: SessionStatus) {
        debug!(from = %self.status, to = %next, "session transition");
        self.status = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_pause_from_inactive_fails() {
        let mut session = TrackingSession::new();
        let err = session.pause(at(0)).unwrap_err();
        assert_eq!(
            err,
            TrackError::State {
                action: SessionAction::Pause,
                state: SessionStatus::Inactive
            }
        );
        assert_eq!(session.status(), SessionStatus::Inactive);
    }

    #[test]
    fn test_start_while_active_or_paused_fails() {
        let mut session = TrackingSession::new();
        session.start(at(0)).unwrap();
        assert!(matches!(
            session.start(at(1)),
            Err(TrackError::State {
                action: SessionAction::Start,
                state: SessionStatus::Active
            })
        ));
        session.pause(at(2)).unwrap();
        assert!(matches!(
            session.start(at(3)),
            Err(TrackError::State { .. })
        ));
        assert_eq!(session.start_time(), Some(at(0)));
    }

    #[test]
    fn test_stop_is_terminal() {
        let mut session = TrackingSession::new();
        session.start(at(0)).unwrap();
        session.stop(at(10)).unwrap();
        assert_eq!(session.status(), SessionStatus::Completed);
        assert!(session.resume(at(11)).is_err());
        assert!(session.pause(at(11)).is_err());
        assert!(session.stop(at(11)).is_err());
        assert!(session.start(at(11)).is_err());
    }

    #[test]
    fn test_resume_only_from_paused() {
        let mut session = TrackingSession::new();
        session.start(at(0)).unwrap();
        assert!(session.resume(at(1)).is_err());
        session.pause(at(1)).unwrap();
        assert!(session.pause(at(2)).is_err());
        session.resume(at(3)).unwrap();
        assert_eq!(session.status(), SessionStatus::Active);
    }

    #[test]
    fn test_paused_session_drops_fixes_and_keeps_filter_state() {
        let config = TrackingConfig::default();
        let mut session = TrackingSession::new();
        assert_eq!(
            session.process_fix(&Fix::new(45.0, 7.0, at(0)), &config),
            FixDecision::Rejected(RejectReason::NotTracking)
        );

        session.start(at(0)).unwrap();
        assert!(session
            .process_fix(&Fix::new(45.0, 7.0, at(0)), &config)
            .is_accepted());
        session.pause(at(1)).unwrap();
        let frozen = session.filter().clone();
        assert_eq!(
            session.process_fix(&Fix::new(45.0001, 7.0, at(2)), &config),
            FixDecision::Rejected(RejectReason::NotTracking)
        );
        assert_eq!(session.filter(), &frozen);

        session.resume(at(3)).unwrap();
        assert!(session.filter().is_initialized());
        assert!(session
            .process_fix(&Fix::new(45.0001, 7.0, at(4)), &config)
            .is_accepted());
        assert_eq!(session.filter().history().len(), 2);
        assert!(session.last_accepted().is_some());
    }

    #[test]
    fn test_stop_clears_state_and_reports_active_duration() {
        let config = TrackingConfig::default();
        let mut session = TrackingSession::new();
        session.start(at(0)).unwrap();
        session.process_fix(&Fix::new(45.0, 7.0, at(1)), &config);
        session.pause(at(100)).unwrap();
        session.resume(at(160)).unwrap();
        session.pause(at(200)).unwrap();
        let timing = session.stop(at(230)).unwrap();

        assert_eq!(timing.start, Some(at(0)));
        assert_eq!(timing.end, Some(at(230)));
        assert_eq!(timing.active_duration_sec, Some(140.0));
        assert!(!session.filter().is_initialized());
        assert!(session.filter().history().is_empty());
        assert!(session.last_accepted().is_none());
    }

    #[test]
    fn test_active_duration_during_pause() {
        let mut session = TrackingSession::new();
        assert_eq!(session.active_duration_sec(at(50)), 0.0);
        session.start(at(0)).unwrap();
        session.pause(at(30)).unwrap();
        assert_eq!(session.active_duration_sec(at(50)), 30.0);
        assert_eq!(session.timing(at(50)).active_duration_sec, Some(30.0));
    }

    #[test]
    fn test_state_error_message() {
        let err = TrackError::State {
            action: SessionAction::Resume,
            state: SessionStatus::Completed,
        };
        assert_eq!(err.to_string(), "cannot resume a session that is completed");
    }
}
