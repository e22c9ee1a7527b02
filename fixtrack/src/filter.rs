//! Per-fix filtering: outlier rejection, single-gain smoothing and a bounded
//! history of accepted fixes.
//!
//! [`process_fix`] is synchronous and free of I/O and clocks. Given the same
//! ordered fixes and configuration it produces bit-identical output, so it can
//! run directly on whatever thread the sensor delivers on.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::config::TrackingConfig;
use crate::geo::{distance_between, wrap_longitude};
use crate::{elapsed_seconds, Fix};

pub const HISTORY_CAPACITY: usize = 10;

/// Weight of the measurement against the motion prediction.
const SMOOTHING_GAIN: f64 = 0.5;

const RELAXED_VARIANCE_MAX: f64 = 0.25;
const INTENSIVE_VARIANCE_MIN: f64 = 4.0;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum RejectReason {
    Malformed(String),
    PoorAccuracy { accuracy: f64, limit: f64 },
    ImpliedSpeed { speed: f64, limit: f64 },
    NotTracking,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Malformed(msg) => write!(f, "malformed fix: {}", msg),
            RejectReason::PoorAccuracy { accuracy, limit } => {
                write!(f, "accuracy {:.1} m exceeds {:.1} m", accuracy, limit)
            }
            RejectReason::ImpliedSpeed { speed, limit } => {
                write!(f, "implied speed {:.1} m/s exceeds {:.1} m/s", speed, limit)
            }
            RejectReason::NotTracking => f.write_str("no active tracking session"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum FixDecision {
    Accepted(Fix),
    /// Error/unavailable sources are forwarded untouched and never filtered.
    PassedThrough(Fix),
    Rejected(RejectReason),
}

impl FixDecision {
    pub fn fix(&self) -> Option<&Fix> {
        match self {
            FixDecision::Accepted(fix) | FixDecision::PassedThrough(fix) => Some(fix),
            FixDecision::Rejected(_) => None,
        }
    }

    pub fn into_fix(self) -> Option<Fix> {
        match self {
            FixDecision::Accepted(fix) | FixDecision::PassedThrough(fix) => Some(fix),
            FixDecision::Rejected(_) => None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, FixDecision::Accepted(_))
    }

    pub fn rejection(&self) -> Option<&RejectReason> {
        match self {
            FixDecision::Rejected(reason) => Some(reason),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SamplingCadence {
    /// Steady movement: the sensor may sample at half rate.
    Relaxed,
    Standard,
    /// Erratic speed: the sensor should sample at double rate.
    Intensive,
}

impl SamplingCadence {
    pub fn interval_ms(self, base_interval_ms: u64) -> u64 {
        match self {
            SamplingCadence::Relaxed => base_interval_ms.saturating_mul(2),
            SamplingCadence::Standard => base_interval_ms,
            SamplingCadence::Intensive => (base_interval_ms / 2).max(1),
        }
    }

    pub fn from_variance(variance: Option<f64>) -> Self {
        match variance {
            Some(v) if v < RELAXED_VARIANCE_MAX => SamplingCadence::Relaxed,
            Some(v) if v > INTENSIVE_VARIANCE_MIN => SamplingCadence::Intensive,
            _ => SamplingCadence::Standard,
        }
    }
}

impl Default for SamplingCadence {
    fn default() -> Self {
        SamplingCadence::Standard
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Estimate {
    lat: f64,
    lon: f64,
    v_lat: f64,
    v_lon: f64,
    timestamp: DateTime<Utc>,
}

/// Mutable filter state owned by a single tracking session.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilterState {
    estimate: Option<Estimate>,
    history: VecDeque<Fix>,
    cadence: SamplingCadence,
}

impl FilterState {
    pub fn new() -> Self {
        Self {
            estimate: None,
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            cadence: SamplingCadence::Standard,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.estimate.is_some()
    }

    pub fn history(&self) -> &VecDeque<Fix> {
        &self.history
    }

    pub fn last_accepted(&self) -> Option<&Fix> {
        self.history.back()
    }

    /// Current `(lat, lon, v_lat, v_lon)` estimate, velocities in degrees/s.
    pub fn estimate(&self) -> Option<(f64, f64, f64, f64)> {
        self.estimate.map(|e| (e.lat, e.lon, e.v_lat, e.v_lon))
    }

    pub fn cadence(&self) -> SamplingCadence {
        self.cadence
    }

    pub fn reset(&mut self) {
        self.estimate = None;
        self.history.clear();
        self.cadence = SamplingCadence::Standard;
    }

    fn push_history(&mut self, fix: Fix) {
        while self.history.len() >= HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(fix);
    }

    fn smooth(&mut self, raw: &Fix) -> Fix {
        let est = match self.estimate {
            Some(est) => est,
            None => {
                self.estimate = Some(Estimate {
                    lat: raw.latitude,
                    lon: raw.longitude,
                    v_lat: 0.0,
                    v_lon: 0.0,
                    timestamp: raw.timestamp,
                });
                return raw.clone();
            }
        };

        let dt = elapsed_seconds(est.timestamp, raw.timestamp);
        let (pred_lat, pred_lon) = if dt > 0.0 {
            (est.lat + est.v_lat * dt, est.lon + est.v_lon * dt)
        } else {
            (est.lat, est.lon)
        };

        let lat = (pred_lat + SMOOTHING_GAIN * (raw.latitude - pred_lat)).clamp(-90.0, 90.0);
        let lon = wrap_longitude(
            pred_lon + SMOOTHING_GAIN * wrap_longitude(raw.longitude - pred_lon),
        );

        let mut next = Estimate {
            lat,
            lon,
            ..est
        };
        if dt > 0.0 {
            next.v_lat = (lat - est.lat) / dt;
            next.v_lon = wrap_longitude(lon - est.lon) / dt;
            next.timestamp = raw.timestamp;
        }
        self.estimate = Some(next);

        let mut out = raw.clone();
        out.latitude = lat;
        out.longitude = lon;
        out
    }
}

/// Run one raw fix through the pipeline, updating `state` in place.
pub fn process_fix(state: &mut FilterState, raw: &Fix, config: &TrackingConfig) -> FixDecision {
    if !raw.is_finite() {
        debug!(timestamp = %raw.timestamp, "dropping fix with non-finite fields");
        return FixDecision::Rejected(RejectReason::Malformed(
            "non-finite numeric field".to_string(),
        ));
    }

    if raw.source.is_degraded() {
        return FixDecision::PassedThrough(raw.clone());
    }

    if let Err(err) = raw.validate() {
        debug!(timestamp = %raw.timestamp, "dropping fix: {}", err);
        return FixDecision::Rejected(RejectReason::Malformed(err.to_string()));
    }

    if config.outlier_detection_enabled {
        if let Some(reason) = outlier_reason(state.last_accepted(), raw, config) {
            debug!(timestamp = %raw.timestamp, "outlier rejected: {}", reason);
            return FixDecision::Rejected(reason);
        }
    }

    let out = if config.kalman_filter_enabled {
        state.smooth(raw)
    } else {
        raw.clone()
    };

    state.push_history(out.clone());

    if config.adaptive_throttling {
        // Cadence is advisory for the sensor; the fix itself is always forwarded.
        state.cadence = SamplingCadence::from_variance(recent_speed_variance(&state.history));
    }

    FixDecision::Accepted(out)
}

fn outlier_reason(prev: Option<&Fix>, raw: &Fix, config: &TrackingConfig) -> Option<RejectReason> {
    if raw.accuracy > config.max_accuracy_threshold {
        return Some(RejectReason::PoorAccuracy {
            accuracy: raw.accuracy,
            limit: config.max_accuracy_threshold,
        });
    }
    let prev = prev?;
    let dt = raw.seconds_since(prev);
    if dt <= 0.0 {
        return None;
    }
    let speed = distance_between(prev, raw) / dt;
    if speed > config.max_speed_threshold {
        return Some(RejectReason::ImpliedSpeed {
            speed,
            limit: config.max_speed_threshold,
        });
    }
    None
}

/// Population variance of consecutive-pair speeds in the history (m/s squared).
///
/// Needs at least two measurable pairs; pairs with non-increasing time are skipped.
pub fn recent_speed_variance(history: &VecDeque<Fix>) -> Option<f64> {
    let speeds: Vec<f64> = history
        .iter()
        .zip(history.iter().skip(1))
        .filter_map(|(a, b)| {
            let dt = b.seconds_since(a);
            (dt > 0.0).then(|| distance_between(a, b) / dt)
        })
        .collect();
    if speeds.len() < 2 {
        return None;
    }
    let n = speeds.len() as f64;
    let mean = speeds.iter().sum::<f64>() / n;
    Some(speeds.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FixSource;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn fix(lat: f64, lon: f64, secs: i64) -> Fix {
        Fix::new(lat, lon, at(secs)).with_accuracy(5.0)
    }

    #[test]
    fn test_first_fix_initializes_and_passes_unmodified() {
        let mut state = FilterState::new();
        let raw = fix(45.0, 7.0, 0);
        let decision = process_fix(&mut state, &raw, &TrackingConfig::default());
        assert_eq!(decision, FixDecision::Accepted(raw.clone()));
        assert!(state.is_initialized());
        assert_eq!(state.estimate(), Some((45.0, 7.0, 0.0, 0.0)));
        assert_eq!(state.history().len(), 1);
    }

    #[test]
    fn test_poor_accuracy_is_rejected() {
        let mut state = FilterState::new();
        let raw = fix(45.0, 7.0, 0).with_accuracy(150.0);
        let decision = process_fix(&mut state, &raw, &TrackingConfig::default());
        assert!(decision.clone().into_fix().is_none());
        assert!(matches!(
            decision.rejection(),
            Some(RejectReason::PoorAccuracy { .. })
        ));
        assert!(!state.is_initialized());
        assert!(state.history().is_empty());
    }

    #[test]
    fn test_implied_speed_outlier_is_rejected() {
        let mut state = FilterState::new();
        let config = TrackingConfig::default();
        process_fix(&mut state, &fix(45.0, 7.0, 0), &config);
        // ~11 km in one second
        let jump = fix(45.1, 7.0, 1);
        let decision = process_fix(&mut state, &jump, &config);
        match decision {
            FixDecision::Rejected(RejectReason::ImpliedSpeed { speed, limit }) => {
                assert!(speed > 10_000.0);
                assert_eq!(limit, 50.0);
            }
            other => panic!("expected speed rejection, got {:?}", other),
        }
        assert_eq!(state.history().len(), 1);
    }

    #[test]
    fn test_outlier_detection_can_be_disabled() {
        let mut state = FilterState::new();
        let config = TrackingConfig {
            outlier_detection_enabled: false,
            kalman_filter_enabled: false,
            ..TrackingConfig::default()
        };
        let raw = fix(45.0, 7.0, 0).with_accuracy(500.0);
        assert!(process_fix(&mut state, &raw, &config).is_accepted());
        let jump = fix(46.0, 7.0, 1);
        assert_eq!(
            process_fix(&mut state, &jump, &config),
            FixDecision::Accepted(jump.clone())
        );
    }

    #[test]
    fn test_zero_elapsed_time_skips_speed_check() {
        let mut state = FilterState::new();
        let config = TrackingConfig::default();
        process_fix(&mut state, &fix(45.0, 7.0, 0), &config);
        let same_time = fix(45.001, 7.0, 0);
        let decision = process_fix(&mut state, &same_time, &config);
        assert!(decision.is_accepted());
        // Velocity is not updated without elapsed time.
        let (_, _, v_lat, v_lon) = state.estimate().unwrap();
        assert_eq!((v_lat, v_lon), (0.0, 0.0));
    }

    #[test]
    fn test_smoothing_blends_prediction_and_measurement() {
        let mut state = FilterState::new();
        let config = TrackingConfig::default();
        process_fix(&mut state, &fix(0.0, 0.0, 0), &config);

        let second = process_fix(&mut state, &fix(0.0001, 0.0, 1), &config)
            .into_fix()
            .unwrap();
        assert!((second.latitude - 0.00005).abs() < 1e-12);

        // Prediction 0.00005 + 0.00005 * 1 s = 0.0001, blended halfway to 0.0002.
        let third = process_fix(&mut state, &fix(0.0002, 0.0, 2), &config)
            .into_fix()
            .unwrap();
        assert!((third.latitude - 0.00015).abs() < 1e-12);
        assert_eq!(third.longitude, 0.0);
    }

    #[test]
    fn test_smoothing_disabled_returns_raw() {
        let mut state = FilterState::new();
        let config = TrackingConfig {
            kalman_filter_enabled: false,
            ..TrackingConfig::default()
        };
        process_fix(&mut state, &fix(0.0, 0.0, 0), &config);
        let raw = fix(0.0001, 0.0, 1);
        assert_eq!(
            process_fix(&mut state, &raw, &config),
            FixDecision::Accepted(raw.clone())
        );
        assert!(!state.is_initialized());
    }

    #[test]
    fn test_malformed_fix_does_not_corrupt_state() {
        let mut state = FilterState::new();
        let config = TrackingConfig::default();
        process_fix(&mut state, &fix(45.0, 7.0, 0), &config);
        let before = state.clone();

        let nan = fix(f64::NAN, 7.0, 1);
        assert!(matches!(
            process_fix(&mut state, &nan, &config),
            FixDecision::Rejected(RejectReason::Malformed(_))
        ));
        let out_of_range = fix(95.0, 7.0, 1);
        assert!(matches!(
            process_fix(&mut state, &out_of_range, &config),
            FixDecision::Rejected(RejectReason::Malformed(_))
        ));
        assert_eq!(state, before);

        assert!(process_fix(&mut state, &fix(45.0001, 7.0, 2), &config).is_accepted());
    }

    #[test]
    fn test_degraded_sources_pass_through_untouched() {
        let mut state = FilterState::new();
        let config = TrackingConfig::default();
        let raw = fix(0.0, 0.0, 0)
            .with_accuracy(9999.0)
            .with_source(FixSource::Unavailable);
        assert_eq!(
            process_fix(&mut state, &raw, &config),
            FixDecision::PassedThrough(raw.clone())
        );
        assert_eq!(state, FilterState::new());

        let nan = Fix::new(f64::NAN, 0.0, at(1)).with_source(FixSource::Error);
        assert!(process_fix(&mut state, &nan, &config).rejection().is_some());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut state = FilterState::new();
        let config = TrackingConfig::default();
        for i in 0..25 {
            let raw = fix(45.0 + i as f64 * 0.00005, 7.0, i);
            assert!(process_fix(&mut state, &raw, &config).is_accepted());
        }
        assert_eq!(state.history().len(), HISTORY_CAPACITY);
        assert_eq!(state.history().front().unwrap().timestamp, at(15));
        assert_eq!(state.last_accepted().unwrap().timestamp, at(24));
    }

    #[test]
    fn test_identical_input_is_deterministic() {
        let config = TrackingConfig::default();
        let inputs: Vec<Fix> = (0..40)
            .map(|i| {
                let wobble = if i % 3 == 0 { 0.00002 } else { -0.00001 };
                let accuracy = if i % 7 == 0 { 120.0 } else { 8.0 };
                fix(45.0 + i as f64 * 0.0001 + wobble, 7.0 + wobble, i).with_accuracy(accuracy)
            })
            .collect();

        let run = || {
            let mut state = FilterState::new();
            inputs
                .iter()
                .map(|raw| process_fix(&mut state, raw, &config))
                .collect::<Vec<_>>()
        };
        let first = run();
        let second = run();
        assert_eq!(first, second);
        for (a, b) in first.iter().zip(second.iter()) {
            if let (Some(a), Some(b)) = (a.fix(), b.fix()) {
                assert_eq!(a.latitude.to_bits(), b.latitude.to_bits());
                assert_eq!(a.longitude.to_bits(), b.longitude.to_bits());
            }
        }
    }

    #[test]
    fn test_adaptive_throttling_never_drops() {
        let mut state = FilterState::new();
        let config = TrackingConfig {
            adaptive_throttling: true,
            kalman_filter_enabled: false,
            ..TrackingConfig::default()
        };
        let mut accepted = 0;
        for i in 0..12 {
            // steady ~5.5 m/s northward
            let raw = fix(45.0 + i as f64 * 0.00005, 7.0, i);
            if process_fix(&mut state, &raw, &config).is_accepted() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 12);
        assert_eq!(state.cadence(), SamplingCadence::Relaxed);
    }

    #[test]
    fn test_speed_variance_and_cadence() {
        let mut history = VecDeque::new();
        assert_eq!(recent_speed_variance(&history), None);
        history.push_back(fix(0.0, 0.0, 0));
        history.push_back(fix(0.0001, 0.0, 1));
        assert_eq!(recent_speed_variance(&history), None);
        history.push_back(fix(0.0011, 0.0, 2));
        let variance = recent_speed_variance(&history).unwrap();
        assert!(variance > INTENSIVE_VARIANCE_MIN);
        assert_eq!(
            SamplingCadence::from_variance(Some(variance)),
            SamplingCadence::Intensive
        );
        assert_eq!(SamplingCadence::from_variance(None), SamplingCadence::Standard);
        assert_eq!(SamplingCadence::Relaxed.interval_ms(1000), 2000);
        assert_eq!(SamplingCadence::Intensive.interval_ms(1000), 500);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut state = FilterState::new();
        process_fix(&mut state, &fix(45.0, 7.0, 0), &TrackingConfig::default());
        state.reset();
        assert_eq!(state, FilterState::new());
    }
}
