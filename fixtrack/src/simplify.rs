use crate::geo::{perpendicular_distance_m, Position};

/// Douglas-Peucker polyline simplification with a tolerance in metres.
///
/// The output is an order-preserving subset of `points` that always keeps the
/// first and last point. Inputs of two points or fewer come back unchanged.
/// Negative or NaN tolerances behave as zero.
pub fn simplify_polyline<P: Position + Clone>(points: &[P], tolerance_m: f64) -> Vec<P> {
    if points.len() <= 2 {
        return points.to_vec();
    }
    let tolerance_m = if tolerance_m > 0.0 { tolerance_m } else { 0.0 };

    let last = points.len() - 1;
    let mut keep = vec![false; points.len()];
    keep[0] = true;
    keep[last] = true;

    // Explicit stack so long tracks cannot exhaust the call stack.
    let mut pending = vec![(0usize, last)];
    while let Some((start, end)) = pending.pop() {
        if end <= start + 1 {
            continue;
        }
        let mut max_dist = 0.0;
        let mut max_idx = start;
        for i in (start + 1)..end {
            let dist = perpendicular_distance_m(&points[i], &points[start], &points[end]);
            if dist > max_dist {
                max_dist = dist;
                max_idx = i;
            }
        }
        if max_idx > start && max_dist > tolerance_m {
            keep[max_idx] = true;
            pending.push((start, max_idx));
            pending.push((max_idx, end));
        }
    }

    points
        .iter()
        .zip(keep)
        .filter_map(|(p, kept)| kept.then(|| p.clone()))
        .collect()
}
