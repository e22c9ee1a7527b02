//! Session owner that fans accepted fixes out to subscribers.
//!
//! Delivery uses unbounded channels: a send never blocks, so a slow display or
//! persistence subscriber cannot hold up fix acceptance. Subscribers whose
//! receiver has been dropped are pruned on the next send.

use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{info, warn};

use crate::config::TrackingConfig;
use crate::filter::{FixDecision, RejectReason, SamplingCadence};
use crate::geo::{distance_between, initial_bearing_deg};
use crate::session::{SessionAction, SessionStatus, SessionTiming, TrackingSession};
use crate::stats::{calculate_activity_statistics, ActivityStatistics};
use crate::{Fix, TrackError, TrackPoint};

/// Grants or denies access to the location sensor.
pub trait PermissionGate: Send + Sync {
    fn location_permitted(&self) -> bool;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysGranted;

impl PermissionGate for AlwaysGranted {
    fn location_permitted(&self) -> bool {
        true
    }
}

impl<F> PermissionGate for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn location_permitted(&self) -> bool {
        self()
    }
}

pub struct LocationTracker {
    config: TrackingConfig,
    session: TrackingSession,
    permission: Box<dyn PermissionGate>,
    subscribers: Vec<Sender<Fix>>,
    diagnostics: Vec<Sender<RejectReason>>,
}

impl LocationTracker {
    pub fn new(config: TrackingConfig) -> Result<Self, TrackError> {
        config.validate()?;
        Ok(Self {
            config,
            session: TrackingSession::new(),
            permission: Box::new(AlwaysGranted),
            subscribers: Vec::new(),
            diagnostics: Vec::new(),
        })
    }

    pub fn with_permission_gate(mut self, gate: impl PermissionGate + 'static) -> Self {
        self.permission = Box::new(gate);
        self
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    pub fn session(&self) -> &TrackingSession {
        &self.session
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    /// Accepted (and passed-through) fixes, in acceptance order.
    pub fn subscribe(&mut self) -> Receiver<Fix> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Why fixes were dropped. Purely diagnostic.
    pub fn subscribe_rejections(&mut self) -> Receiver<RejectReason> {
        let (tx, rx) = unbounded();
        self.diagnostics.push(tx);
        rx
    }

    pub fn start(&mut self, at: DateTime<Utc>) -> Result<(), TrackError> {
        let status = self.session.status();
        if matches!(status, SessionStatus::Active | SessionStatus::Paused) {
            return Err(TrackError::State {
                action: SessionAction::Start,
                state: status,
            });
        }
        if !self.permission.location_permitted() {
            warn!("location permission denied; tracking not started");
            return Err(TrackError::PermissionDenied);
        }
        if status == SessionStatus::Completed {
            self.session = TrackingSession::new();
        }
        self.session.start(at)?;
        info!(start = %at, "tracking session started");
        Ok(())
    }

    pub fn pause(&mut self, at: DateTime<Utc>) -> Result<(), TrackError> {
        self.session.pause(at)
    }

    pub fn resume(&mut self, at: DateTime<Utc>) -> Result<(), TrackError> {
        self.session.resume(at)
    }

    pub fn stop(&mut self, at: DateTime<Utc>) -> Result<SessionTiming, TrackError> {
        let timing = self.session.stop(at)?;
        info!(
            active_secs = timing.active_duration_sec.unwrap_or(0.0),
            "tracking session completed"
        );
        Ok(timing)
    }

    /// Filter one raw fix and publish the outcome. Never blocks.
    pub fn handle_fix(&mut self, raw: &Fix) -> Option<Fix> {
        match self.session.process_fix(raw, &self.config) {
            FixDecision::Accepted(fix) | FixDecision::PassedThrough(fix) => {
                publish(&mut self.subscribers, &fix, "fix");
                Some(fix)
            }
            FixDecision::Rejected(reason) => {
                publish(&mut self.diagnostics, &reason, "rejection");
                None
            }
        }
    }

    pub fn cadence(&self) -> SamplingCadence {
        self.session.filter().cadence()
    }

    /// Sensor interval the throttling hook currently suggests.
    pub fn suggested_interval_ms(&self) -> u64 {
        if self.config.adaptive_throttling {
            self.cadence().interval_ms(self.config.interval)
        } else {
            self.config.interval
        }
    }

    /// Statistics over `points` using the session's timing as of `now`.
    pub fn live_statistics(&self, points: &[TrackPoint], now: DateTime<Utc>) -> ActivityStatistics {
        calculate_activity_statistics(
            points,
            &self.session.timing(now),
            &self.config.statistics_options(),
        )
    }
}

fn publish<T: Clone>(subscribers: &mut Vec<Sender<T>>, value: &T, kind: &str) {
    subscribers.retain(|tx| {
        if tx.send(value.clone()).is_ok() {
            true
        } else {
            warn!("dropping disconnected {} subscriber", kind);
            false
        }
    });
}

/// Shorter moves give no usable direction.
const MIN_HEADING_DISTANCE_M: f64 = 1.0;

/// In-memory append-only track log fed by a fix subscription.
pub struct TrackLog {
    receiver: Receiver<Fix>,
    points: Vec<TrackPoint>,
}

impl TrackLog {
    pub fn new(receiver: Receiver<Fix>) -> Self {
        Self {
            receiver,
            points: Vec::new(),
        }
    }

    /// Append everything delivered so far; returns how many points were added.
    pub fn drain(&mut self) -> usize {
        let before = self.points.len();
        for fix in self.receiver.try_iter() {
            if fix.source.is_degraded() {
                continue;
            }
            let sequence = self.points.len() as u64;
            let mut point = TrackPoint::from_fix(sequence, &fix);
            if point.heading.is_none() {
                point.heading = self.points.last().and_then(|prev| {
                    (distance_between(prev, &point) >= MIN_HEADING_DISTANCE_M)
                        .then(|| initial_bearing_deg(prev, &point))
                });
            }
            self.points.push(point);
        }
        self.points.len() - before
    }

    pub fn points(&self) -> &[TrackPoint] {
        &self.points
    }

    pub fn into_points(mut self) -> Vec<TrackPoint> {
        self.drain();
        self.points
    }
}
