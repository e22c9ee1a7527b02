use serde::Serialize;
use thiserror::Error;

use crate::geo::distance_between;
use crate::{elapsed_seconds, TrackPoint};

const ACCURACY_WARNING_M: f64 = 100.0;
const SPEED_WARNING_MPS: f64 = 50.0;
const MIN_ELEVATION_COVERAGE: f64 = 0.5;

#[derive(Error, Clone, Debug, PartialEq, Serialize)]
pub enum TrackIssue {
    #[error("track has {count} points, at least 2 are required")]
    TooFewPoints { count: usize },
    #[error("point {index} has invalid coordinates ({latitude}, {longitude})")]
    InvalidCoordinates {
        index: usize,
        latitude: f64,
        longitude: f64,
    },
    #[error("point {index} accuracy {accuracy:.1} m exceeds {limit:.0} m")]
    PoorAccuracy {
        index: usize,
        accuracy: f64,
        limit: f64,
    },
    #[error("segment ending at point {index} implies {speed:.1} m/s, above {limit:.0} m/s")]
    ImpliedSpeed { index: usize, speed: f64, limit: f64 },
    #[error("point {index} is timestamped before its predecessor")]
    NonChronological { index: usize },
    #[error("only {with_elevation} of {total} points carry elevation")]
    SparseElevation { with_elevation: usize, total: usize },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackValidation {
    pub is_valid: bool,
    /// Issues that make the track unusable.
    pub errors: Vec<TrackIssue>,
    /// Advisory issues; statistics can still be computed.
    pub warnings: Vec<TrackIssue>,
}

fn coordinates_valid(point: &TrackPoint) -> bool {
    point.latitude.is_finite()
        && point.longitude.is_finite()
        && (-90.0..=90.0).contains(&point.latitude)
        && (-180.0..=180.0).contains(&point.longitude)
}

pub fn validate_track(points: &[TrackPoint]) -> TrackValidation {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if points.len() < 2 {
        errors.push(TrackIssue::TooFewPoints {
            count: points.len(),
        });
    }

    for (index, point) in points.iter().enumerate() {
        if !coordinates_valid(point) {
            errors.push(TrackIssue::InvalidCoordinates {
                index,
                latitude: point.latitude,
                longitude: point.longitude,
            });
        }
        if point.accuracy > ACCURACY_WARNING_M {
            warnings.push(TrackIssue::PoorAccuracy {
                index,
                accuracy: point.accuracy,
                limit: ACCURACY_WARNING_M,
            });
        }
    }

    for (offset, w) in points.windows(2).enumerate() {
        let index = offset + 1;
        let dt = elapsed_seconds(w[0].timestamp, w[1].timestamp);
        if dt < 0.0 {
            warnings.push(TrackIssue::NonChronological { index });
            continue;
        }
        if dt > 0.0 && coordinates_valid(&w[0]) && coordinates_valid(&w[1]) {
            let speed = distance_between(&w[0], &w[1]) / dt;
            if speed > SPEED_WARNING_MPS {
                warnings.push(TrackIssue::ImpliedSpeed {
                    index,
                    speed,
                    limit: SPEED_WARNING_MPS,
                });
            }
        }
    }

    if !points.is_empty() {
        let with_elevation = points.iter().filter(|p| p.altitude.is_some()).count();
        if (with_elevation as f64) < points.len() as f64 * MIN_ELEVATION_COVERAGE {
            warnings.push(TrackIssue::SparseElevation {
                with_elevation,
                total: points.len(),
            });
        }
    }

    TrackValidation {
        is_valid: errors.is_empty(),
        errors,
        warnings,
    }
}
