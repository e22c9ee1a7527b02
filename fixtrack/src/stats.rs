//! Activity statistics over an accepted track.
//!
//! Everything here is a pure function of an immutable point slice, so live
//! partial statistics and final statistics can be computed concurrently.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::config::StatisticsOptions;
use crate::geo::distance_between;
use crate::session::SessionTiming;
use crate::{elapsed_seconds, TrackPoint};

const METERS_PER_KM: f64 = 1000.0;
/// Slack for summed haversine legs that land on a boundary up to rounding.
const SPLIT_EPSILON_M: f64 = 1e-6;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Split {
    pub km_index: u32,
    /// Actual distance covered; may exceed 1000 m when fixes straddle the boundary.
    pub distance_m: f64,
    pub duration_sec: f64,
    pub pace_sec_per_km: f64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityStatistics {
    pub duration_sec: f64,
    pub distance_m: f64,
    pub avg_pace_sec_per_km: f64,
    pub avg_speed_mps: f64,
    pub elev_gain_m: f64,
    pub elev_loss_m: f64,
    pub splits: Vec<Split>,
    pub max_speed: f64,
    pub min_elevation: Option<f64>,
    pub max_elevation: Option<f64>,
    pub total_ascent: f64,
    pub total_descent: f64,
    pub point_count: usize,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElevationSummary {
    /// Sum of rises whose magnitude reaches the threshold.
    pub gain_m: f64,
    pub loss_m: f64,
    /// Sum of every rise, no threshold.
    pub total_ascent: f64,
    pub total_descent: f64,
    pub min_elevation: Option<f64>,
    pub max_elevation: Option<f64>,
}

pub fn calculate_activity_statistics(
    points: &[TrackPoint],
    timing: &SessionTiming,
    options: &StatisticsOptions,
) -> ActivityStatistics {
    if points.len() < 2 {
        return ActivityStatistics {
            point_count: points.len(),
            ..ActivityStatistics::default()
        };
    }

    let distances = cumulative_distances(points);
    let distance_m = distances.last().copied().unwrap_or(0.0);
    let duration_sec = resolve_duration(points, timing);
    let elevation = calculate_elevation(points, options.smoothing_window, options.elevation_threshold);

    ActivityStatistics {
        duration_sec,
        distance_m,
        avg_pace_sec_per_km: calculate_average_pace(duration_sec, distance_m),
        avg_speed_mps: if duration_sec > 0.0 {
            distance_m / duration_sec
        } else {
            0.0
        },
        elev_gain_m: elevation.gain_m,
        elev_loss_m: elevation.loss_m,
        splits: calculate_splits(points, &distances, options.min_split_distance),
        max_speed: calculate_max_speed(points),
        min_elevation: elevation.min_elevation,
        max_elevation: elevation.max_elevation,
        total_ascent: elevation.total_ascent,
        total_descent: elevation.total_descent,
        point_count: points.len(),
    }
}

/// Running distance in metres at each point; the first entry is zero.
pub fn cumulative_distances(points: &[TrackPoint]) -> Vec<f64> {
    let mut out = Vec::with_capacity(points.len());
    let mut total = 0.0;
    if !points.is_empty() {
        out.push(0.0);
    }
    for w in points.windows(2) {
        total += distance_between(&w[0], &w[1]);
        out.push(total);
    }
    out
}

pub fn calculate_total_distance(points: &[TrackPoint]) -> f64 {
    points
        .windows(2)
        .map(|w| distance_between(&w[0], &w[1]))
        .sum()
}

/// Seconds per kilometre; zero whenever either input is not a positive number.
pub fn calculate_average_pace(duration_sec: f64, distance_m: f64) -> f64 {
    if duration_sec > 0.0 && distance_m > 0.0 && duration_sec.is_finite() && distance_m.is_finite()
    {
        duration_sec / distance_m * METERS_PER_KM
    } else {
        0.0
    }
}

// Gaps between fixes are not inspected for pauses; only the session's
// pause-adjusted figure excludes paused time.
fn resolve_duration(points: &[TrackPoint], timing: &SessionTiming) -> f64 {
    if let Some(active) = timing.active_duration_sec {
        if active.is_finite() && active >= 0.0 {
            return active;
        }
    }
    let wall = match (timing.start, timing.end) {
        (Some(start), Some(end)) => elapsed_seconds(start, end),
        _ => match (points.first(), points.last()) {
            (Some(first), Some(last)) => elapsed_seconds(first.timestamp, last.timestamp),
            _ => 0.0,
        },
    };
    wall.max(0.0)
}

/// Centred moving average over the points that carry altitude.
///
/// Slots without altitude stay `None` and contribute nothing to their
/// neighbours' averages. Even windows behave like the next odd width.
pub fn smooth_elevations(altitudes: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    let half = window.max(1) / 2;
    let n = altitudes.len();
    altitudes
        .iter()
        .enumerate()
        .map(|(i, alt)| {
            alt.map(|_| {
                let lo = i.saturating_sub(half);
                let hi = (i + half + 1).min(n);
                let (sum, count) = altitudes[lo..hi]
                    .iter()
                    .flatten()
                    .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
                sum / count as f64
            })
        })
        .collect()
}

pub fn calculate_elevation(
    points: &[TrackPoint],
    smoothing_window: usize,
    threshold_m: f64,
) -> ElevationSummary {
    let raw: Vec<Option<f64>> = points.iter().map(|p| p.altitude).collect();
    let smoothed = smooth_elevations(&raw, smoothing_window);

    let mut summary = ElevationSummary {
        min_elevation: raw.iter().flatten().copied().map(OrderedFloat).min().map(|v| v.0),
        max_elevation: raw.iter().flatten().copied().map(OrderedFloat).max().map(|v| v.0),
        ..ElevationSummary::default()
    };

    let mut prev: Option<f64> = None;
    for alt in smoothed.into_iter().flatten() {
        if let Some(p) = prev {
            let delta = alt - p;
            if delta > 0.0 {
                summary.total_ascent += delta;
            } else {
                summary.total_descent -= delta;
            }
            if delta.abs() >= threshold_m {
                if delta > 0.0 {
                    summary.gain_m += delta;
                } else {
                    summary.loss_m -= delta;
                }
            }
        }
        prev = Some(alt);
    }
    summary
}

/// Per-kilometre splits from precomputed cumulative distances.
///
/// A split closes at the first point whose cumulative distance reaches
/// `max(km_index * 1000, min_split_distance_m)`, covering the actual distance
/// and time since the previous boundary. A trailing partial kilometre is not
/// reported.
pub fn calculate_splits(
    points: &[TrackPoint],
    cumulative: &[f64],
    min_split_distance_m: f64,
) -> Vec<Split> {
    let n = points.len().min(cumulative.len());
    let mut splits = Vec::new();
    let mut km_index = 1u32;
    let mut boundary_idx = 0usize;
    for i in 1..n {
        let boundary = (km_index as f64 * METERS_PER_KM).max(min_split_distance_m);
        if cumulative[i] >= boundary - SPLIT_EPSILON_M {
            let distance_m = cumulative[i] - cumulative[boundary_idx];
            let duration_sec =
                elapsed_seconds(points[boundary_idx].timestamp, points[i].timestamp).max(0.0);
            splits.push(Split {
                km_index,
                distance_m,
                duration_sec,
                pace_sec_per_km: calculate_average_pace(duration_sec, distance_m),
            });
            km_index += 1;
            boundary_idx = i;
        }
    }
    splits
}

/// Highest device-reported speed, or the highest point-to-point speed when no
/// point carries one.
pub fn calculate_max_speed(points: &[TrackPoint]) -> f64 {
    let reported = points
        .iter()
        .filter_map(|p| p.speed)
        .filter(|s| s.is_finite())
        .map(OrderedFloat)
        .max();
    if let Some(speed) = reported {
        return speed.0;
    }
    points
        .windows(2)
        .filter_map(|w| {
            let dt = elapsed_seconds(w[0].timestamp, w[1].timestamp);
            (dt > 0.0).then(|| distance_between(&w[0], &w[1]) / dt)
        })
        .map(OrderedFloat)
        .max()
        .map(|v| v.0)
        .unwrap_or(0.0)
}
