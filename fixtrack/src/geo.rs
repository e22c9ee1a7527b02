//! Geospatial primitives shared by the pipeline, simplifier and statistics.

use crate::{Fix, TrackPoint};

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

const METERS_PER_DEGREE: f64 = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;

pub trait Position {
    fn latitude(&self) -> f64;
    fn longitude(&self) -> f64;
}

impl Position for Fix {
    fn latitude(&self) -> f64 {
        self.latitude
    }

    fn longitude(&self) -> f64 {
        self.longitude
    }
}

impl Position for TrackPoint {
    fn latitude(&self) -> f64 {
        self.latitude
    }

    fn longitude(&self) -> f64 {
        self.longitude
    }
}

impl Position for (f64, f64) {
    fn latitude(&self) -> f64 {
        self.0
    }

    fn longitude(&self) -> f64 {
        self.1
    }
}

/// Great-circle distance in metres.
pub fn haversine_distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    // Rounding can push `a` a hair past 1 for antipodal points.
    let a = a.clamp(0.0, 1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

pub fn distance_between<A: Position + ?Sized, B: Position + ?Sized>(a: &A, b: &B) -> f64 {
    haversine_distance_m(a.latitude(), a.longitude(), b.latitude(), b.longitude())
}

/// Initial great-circle bearing from `a` to `b`, clockwise from north in [0, 360).
pub fn initial_bearing_deg<A: Position + ?Sized, B: Position + ?Sized>(a: &A, b: &B) -> f64 {
    let phi1 = a.latitude().to_radians();
    let phi2 = b.latitude().to_radians();
    let dlon = (b.longitude() - a.longitude()).to_radians();
    let y = dlon.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlon.cos();
    let bearing = (y.atan2(x).to_degrees() + 360.0) % 360.0;
    if bearing >= 360.0 {
        0.0
    } else {
        bearing
    }
}

/// Distance in metres from `point` to the segment `start..end`.
///
/// Uses an equirectangular projection centred on the segment, which is accurate
/// to well under a metre for the segment lengths found in activity tracks. A
/// zero-length segment degenerates to the haversine distance to its endpoint.
pub fn perpendicular_distance_m<P, A, B>(point: &P, start: &A, end: &B) -> f64
where
    P: Position + ?Sized,
    A: Position + ?Sized,
    B: Position + ?Sized,
{
    let ref_lat = ((start.latitude() + end.latitude()) / 2.0).to_radians();
    let lon_scale = ref_lat.cos() * METERS_PER_DEGREE;
    let project = |lat: f64, lon: f64| {
        let dlon = wrap_longitude(lon - start.longitude());
        (dlon * lon_scale, (lat - start.latitude()) * METERS_PER_DEGREE)
    };

    let (ex, ey) = project(end.latitude(), end.longitude());
    let len_sq = ex * ex + ey * ey;
    if len_sq < 1e-12 {
        return distance_between(point, start);
    }

    let (px, py) = project(point.latitude(), point.longitude());
    let t = ((px * ex + py * ey) / len_sq).clamp(0.0, 1.0);
    let dx = px - t * ex;
    let dy = py - t * ey;
    (dx * dx + dy * dy).sqrt()
}

/// Wrap a longitude (or longitude delta) into [-180, 180].
pub fn wrap_longitude(lon: f64) -> f64 {
    if (-180.0..=180.0).contains(&lon) {
        return lon;
    }
    let wrapped = (lon + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 && lon > 0.0 {
        180.0
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_distance() {
        let dist = haversine_distance_m(0.0, 0.0, 0.0, 1.0);
        assert!((dist - 111_195.0).abs() < 200.0);
    }

    #[test]
    fn test_distance_is_symmetric_and_zero_on_identity() {
        let samples = [
            (0.0, 0.0, 10.0, 10.0),
            (45.5, -73.6, 48.85, 2.35),
            (-33.9, 151.2, 35.7, 139.7),
            (89.9, 0.0, -89.9, 180.0),
            (10.0, 179.9, 10.0, -179.9),
        ];
        for &(lat1, lon1, lat2, lon2) in &samples {
            let ab = haversine_distance_m(lat1, lon1, lat2, lon2);
            let ba = haversine_distance_m(lat2, lon2, lat1, lon1);
            assert_eq!(ab, ba);
            assert_eq!(haversine_distance_m(lat1, lon1, lat1, lon1), 0.0);
            assert!(ab.is_finite());
        }
    }

    #[test]
    fn test_antipodal_distance_is_finite() {
        let d = haversine_distance_m(0.0, 0.0, 0.0, 180.0);
        assert!((d - EARTH_RADIUS_M * std::f64::consts::PI).abs() < 1.0);
    }

    #[test]
    fn test_bearing_cardinal_directions() {
        let origin = (0.0, 0.0);
        assert!(initial_bearing_deg(&origin, &(1.0, 0.0)).abs() < 1e-9);
        assert!((initial_bearing_deg(&origin, &(0.0, 1.0)) - 90.0).abs() < 1e-9);
        assert!((initial_bearing_deg(&origin, &(-1.0, 0.0)) - 180.0).abs() < 1e-9);
        assert!((initial_bearing_deg(&origin, &(0.0, -1.0)) - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_perpendicular_distance_to_segment() {
        let start = (0.0, 0.0);
        let end = (0.0, 0.01);
        // ~111 m north of the middle of an east-west segment
        let above = (0.001, 0.005);
        let d = perpendicular_distance_m(&above, &start, &end);
        assert!((d - 111.19).abs() < 0.5, "got {}", d);

        // Beyond the end of the segment the distance is to the endpoint.
        let beyond = (0.0, 0.02);
        let d = perpendicular_distance_m(&beyond, &start, &end);
        assert!((d - distance_between(&beyond, &end)).abs() < 1.0);
    }

    #[test]
    fn test_perpendicular_distance_degenerate_chord() {
        let shared = (10.0, 10.0);
        let point = (10.001, 10.0);
        let d = perpendicular_distance_m(&point, &shared, &shared);
        assert_eq!(d, distance_between(&point, &shared));
        assert!(d.is_finite());
    }

    #[test]
    fn test_wrap_longitude() {
        assert_eq!(wrap_longitude(10.0), 10.0);
        assert!((wrap_longitude(190.0) + 170.0).abs() < 1e-9);
        assert!((wrap_longitude(-190.0) - 170.0).abs() < 1e-9);
        assert_eq!(wrap_longitude(540.0), 180.0);
    }
}
