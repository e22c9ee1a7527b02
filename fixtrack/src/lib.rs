//! Real-time GPS fix processing pipeline and activity statistics engine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod config;
pub mod filter;
pub mod geo;
pub mod import;
pub mod session;
pub mod simplify;
pub mod stats;
pub mod tracker;
pub mod validate;

pub use config::{LocationAccuracy, StatisticsOptions, TrackingConfig};
pub use filter::{process_fix, FilterState, FixDecision, RejectReason, SamplingCadence};
pub use geo::{haversine_distance_m, Position};
pub use import::parse_fixes;
pub use session::{SessionAction, SessionStatus, SessionTiming, TrackingSession};
pub use simplify::simplify_polyline;
pub use stats::{calculate_activity_statistics, ActivityStatistics, Split};
pub use tracker::{AlwaysGranted, LocationTracker, PermissionGate, TrackLog};
pub use validate::{validate_track, TrackIssue, TrackValidation};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackError {
    #[error("invalid fix: {0}")]
    Validation(String),
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("cannot {action} a session that is {state}")]
    State {
        action: SessionAction,
        state: SessionStatus,
    },
    #[error("location permission denied")]
    PermissionDenied,
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to parse FIT file: {0}")]
    FitParse(String),
    #[error("failed to parse GPX file: {0}")]
    GpxParse(String),
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FixSource {
    Gps,
    Network,
    Passive,
    Error,
    Unavailable,
}

impl FixSource {
    /// Sources that carry no usable position and bypass filtering.
    pub fn is_degraded(self) -> bool {
        matches!(self, FixSource::Error | FixSource::Unavailable)
    }
}

impl Default for FixSource {
    fn default() -> Self {
        FixSource::Gps
    }
}

impl fmt::Display for FixSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FixSource::Gps => "gps",
            FixSource::Network => "network",
            FixSource::Passive => "passive",
            FixSource::Error => "error",
            FixSource::Unavailable => "unavailable",
        };
        f.write_str(name)
    }
}

/// One raw sample from a location sensor.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    /// Horizontal accuracy radius in metres.
    pub accuracy: f64,
    /// Device-reported ground speed in m/s.
    pub speed: Option<f64>,
    /// Degrees clockwise from true north.
    pub heading: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub source: FixSource,
}

impl Fix {
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
            accuracy: 0.0,
            speed: None,
            heading: None,
            timestamp,
            source: FixSource::Gps,
        }
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = accuracy;
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn with_heading(mut self, heading: f64) -> Self {
        self.heading = Some(heading);
        self
    }

    pub fn with_source(mut self, source: FixSource) -> Self {
        self.source = source;
        self
    }

    /// True when every numeric field present is finite.
    pub fn is_finite(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.accuracy.is_finite()
            && self.altitude.map_or(true, f64::is_finite)
            && self.speed.map_or(true, f64::is_finite)
            && self.heading.map_or(true, f64::is_finite)
    }

    pub fn validate(&self) -> Result<(), TrackError> {
        if !self.is_finite() {
            return Err(TrackError::Validation(
                "non-finite numeric field".to_string(),
            ));
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(TrackError::Validation(format!(
                "latitude {} outside [-90, 90]",
                self.latitude
            )));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(TrackError::Validation(format!(
                "longitude {} outside [-180, 180]",
                self.longitude
            )));
        }
        if self.accuracy < 0.0 {
            return Err(TrackError::Validation(format!(
                "negative accuracy {}",
                self.accuracy
            )));
        }
        if let Some(speed) = self.speed {
            if speed < 0.0 {
                return Err(TrackError::Validation(format!("negative speed {}", speed)));
            }
        }
        if let Some(heading) = self.heading {
            if !(0.0..360.0).contains(&heading) {
                return Err(TrackError::Validation(format!(
                    "heading {} outside [0, 360)",
                    heading
                )));
            }
        }
        Ok(())
    }

    /// Seconds elapsed from `earlier` to this fix (negative if out of order).
    pub fn seconds_since(&self, earlier: &Fix) -> f64 {
        elapsed_seconds(earlier.timestamp, self.timestamp)
    }
}

/// A fix accepted into the canonical track, numbered in append order.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TrackPoint {
    pub sequence: u64,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub accuracy: f64,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl TrackPoint {
    pub fn from_fix(sequence: u64, fix: &Fix) -> Self {
        Self {
            sequence,
            latitude: fix.latitude,
            longitude: fix.longitude,
            altitude: fix.altitude,
            accuracy: fix.accuracy,
            speed: fix.speed,
            heading: fix.heading,
            timestamp: fix.timestamp,
        }
    }
}

pub(crate) fn elapsed_seconds(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}
