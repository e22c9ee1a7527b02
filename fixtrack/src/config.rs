use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::TrackError;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LocationAccuracy {
    High,
    Balanced,
    Low,
}


impl Default for LocationAccuracy {
    fn default() -> Self {
        LocationAccuracy::High
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackingConfig {
    pub accuracy: LocationAccuracy,
    /// Requested sensor interval in milliseconds.
    pub interval: u64,
    /// Minimum displacement in metres the sensor should wait for. Hint only.
    pub distance_filter: f64,
    pub adaptive_throttling: bool,
    pub kalman_filter_enabled: bool,
    pub outlier_detection_enabled: bool,
    pub max_speed_threshold: f64,
    pub max_accuracy_threshold: f64,
    pub smoothing_window: usize,
    pub elevation_threshold: f64,
    pub min_split_distance: f64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            accuracy: LocationAccuracy::High,
            interval: 1000,
            distance_filter: 5.0,
            adaptive_throttling: false,
            kalman_filter_enabled: true,
            outlier_detection_enabled: true,
            max_speed_threshold: 50.0,
            max_accuracy_threshold: 100.0,
            smoothing_window: 5,
            elevation_threshold: 3.0,
            min_split_distance: 950.0,
        }
    }
}

impl TrackingConfig {
    pub fn validate(&self) -> Result<(), TrackError> {
        if self.interval == 0 {
            return Err(invalid("interval must be > 0 ms"));
        }
        if !self.distance_filter.is_finite() || self.distance_filter < 0.0 {
            return Err(invalid("distanceFilter must be a non-negative number"));
        }
        check_range("maxSpeedThreshold", self.max_speed_threshold, 0.0, 1000.0)?;
        check_range(
            "maxAccuracyThreshold",
            self.max_accuracy_threshold,
            0.0,
            10_000.0,
        )?;
        if !(1..=101).contains(&self.smoothing_window) {
            return Err(invalid(format!(
                "smoothingWindow {} outside 1..=101",
                self.smoothing_window
            )));
        }
        if !self.elevation_threshold.is_finite()
            || !(0.0..=100.0).contains(&self.elevation_threshold)
        {
            return Err(invalid(format!(
                "elevationThreshold {} outside [0, 100]",
                self.elevation_threshold
            )));
        }
        check_range("minSplitDistance", self.min_split_distance, 0.0, 10_000.0)?;
        Ok(())
    }

    pub fn from_json_str(text: &str) -> Result<Self, TrackError> {
        let config: TrackingConfig =
            serde_json::from_str(text).map_err(|e| invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn statistics_options(&self) -> StatisticsOptions {
        StatisticsOptions {
            smoothing_window: self.smoothing_window,
            elevation_threshold: self.elevation_threshold,
            min_split_distance: self.min_split_distance,
        }
    }

    /// SHA-256 of the canonical JSON form, identifying a replayable configuration.
    pub fn fingerprint(&self) -> Result<String, TrackError> {
        let bytes = serde_json::to_vec(self).map_err(|e| invalid(e.to_string()))?;
        let digest = Sha256::digest(&bytes);
        let mut out = String::with_capacity(digest.len() * 2);
        for b in digest {
            use std::fmt::Write;
            let _ = write!(&mut out, "{:02x}", b);
        }
        Ok(out)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct StatisticsOptions {
    pub smoothing_window: usize,
    pub elevation_threshold: f64,
    pub min_split_distance: f64,
}

impl Default for StatisticsOptions {
    fn default() -> Self {
        TrackingConfig::default().statistics_options()
    }
}

fn invalid(msg: impl Into<String>) -> TrackError {
    TrackError::Configuration(msg.into())
}

/// Open at `lo`, closed at `hi`.
fn check_range(name: &str, value: f64, lo: f64, hi: f64) -> Result<(), TrackError> {
    if value.is_finite() && value > lo && value <= hi {
        Ok(())
    } else {
        Err(invalid(format!("{} {} outside ({}, {}]", name, value, lo, hi)))
    }
}
