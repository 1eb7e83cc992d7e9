//! Interpolation algorithms for smooth brush strokes

use crate::input::Point;

/// Catmull-Rom spline interpolation for smooth curves
///
/// This produces natural-looking curves that pass through all control points.
/// Optional channels (pressure, tilt) are blended only where every
/// contributing sample reported them.
pub fn interpolate_catmull_rom(points: &[Point], spacing: f32) -> Vec<Point> {
    if points.len() < 4 {
        return points.to_vec();
    }
    let spacing = spacing.max(0.1);

    let mut result = Vec::with_capacity(points.len() * 8);

    // Process each segment (need 4 points for each segment)
    for i in 0..points.len() - 1 {
        let p0 = if i == 0 { &points[0] } else { &points[i - 1] };
        let p1 = &points[i];
        let p2 = &points[i + 1];
        let p3 = if i + 2 < points.len() {
            &points[i + 2]
        } else {
            &points[points.len() - 1]
        };

        let segment_length = p1.distance_to(p2);
        let steps = ((segment_length / spacing).ceil() as usize).max(1);

        for step in 0..steps {
            let t = step as f32 / steps as f32;
            result.push(catmull_rom_point(p0, p1, p2, p3, t));
        }
    }

    // Add the last point
    if let Some(last) = points.last() {
        result.push(*last);
    }

    result
}

/// Calculate a single point on a Catmull-Rom spline
fn catmull_rom_point(p0: &Point, p1: &Point, p2: &Point, p3: &Point, t: f32) -> Point {
    let t2 = t * t;
    let t3 = t2 * t;

    // Catmull-Rom basis functions
    let b0 = -0.5 * t3 + t2 - 0.5 * t;
    let b1 = 1.5 * t3 - 2.5 * t2 + 1.0;
    let b2 = -1.5 * t3 + 2.0 * t2 + 0.5 * t;
    let b3 = 0.5 * t3 - 0.5 * t2;

    let spline = |a: Option<f32>, b: Option<f32>, c: Option<f32>, d: Option<f32>| {
        Some(b0 * a? + b1 * b? + b2 * c? + b3 * d?)
    };

    Point {
        x: b0 * p0.x + b1 * p1.x + b2 * p2.x + b3 * p3.x,
        y: b0 * p0.y + b1 * p1.y + b2 * p2.y + b3 * p3.y,
        pressure: spline(p0.pressure, p1.pressure, p2.pressure, p3.pressure)
            .map(|p| p.clamp(0.0, 1.0))
            .or_else(|| lerp_opt(p1.pressure, p2.pressure, t)),
        tilt_x: spline(p0.tilt_x, p1.tilt_x, p2.tilt_x, p3.tilt_x)
            .map(|v| v.clamp(-90.0, 90.0))
            .or_else(|| lerp_opt(p1.tilt_x, p2.tilt_x, t)),
        tilt_y: spline(p0.tilt_y, p1.tilt_y, p2.tilt_y, p3.tilt_y)
            .map(|v| v.clamp(-90.0, 90.0))
            .or_else(|| lerp_opt(p1.tilt_y, p2.tilt_y, t)),
        timestamp_ms: lerp_time(p1.timestamp_ms, p2.timestamp_ms, t),
    }
}

/// Linear interpolation at fixed spacing between consecutive samples
pub fn interpolate_linear(points: &[Point], spacing: f32) -> Vec<Point> {
    if points.len() < 2 {
        return points.to_vec();
    }
    let spacing = spacing.max(0.1);

    let mut result = Vec::with_capacity(points.len() * 4);

    for w in points.windows(2) {
        let (p0, p1) = (&w[0], &w[1]);
        let dist = p0.distance_to(p1);

        if dist < spacing {
            result.push(*p0);
            continue;
        }

        let steps = (dist / spacing).ceil() as usize;
        for step in 0..steps {
            let t = step as f32 / steps as f32;
            result.push(lerp_point(p0, p1, t));
        }
    }

    // Add last point
    if let Some(last) = points.last() {
        result.push(*last);
    }

    result
}

fn lerp_point(p0: &Point, p1: &Point, t: f32) -> Point {
    Point {
        x: p0.x + (p1.x - p0.x) * t,
        y: p0.y + (p1.y - p0.y) * t,
        pressure: lerp_opt(p0.pressure, p1.pressure, t),
        tilt_x: lerp_opt(p0.tilt_x, p1.tilt_x, t),
        tilt_y: lerp_opt(p0.tilt_y, p1.tilt_y, t),
        timestamp_ms: lerp_time(p0.timestamp_ms, p1.timestamp_ms, t),
    }
}

fn lerp_opt(a: Option<f32>, b: Option<f32>, t: f32) -> Option<f32> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a + (b - a) * t),
        (Some(a), None) => Some(a),
        (None, _) => None,
    }
}

fn lerp_time(a: u64, b: u64, t: f32) -> u64 {
    if b <= a {
        return a;
    }
    a + ((b - a) as f64 * t as f64).round() as u64
}

/// Calculate the length of a path through points
pub fn path_length(points: &[Point]) -> f32 {
    points.windows(2).map(|w| w[0].distance_to(&w[1])).sum()
}

/// Speed between two samples in pixels per second
///
/// Samples sharing a timestamp report zero rather than infinity.
pub fn velocity_between(a: &Point, b: &Point) -> f32 {
    let dt_ms = b.timestamp_ms.abs_diff(a.timestamp_ms);
    if dt_ms == 0 {
        return 0.0;
    }
    a.distance_to(b) / (dt_ms as f32 / 1000.0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn make_line_points() -> Vec<Point> {
        vec![
            Point::with_pressure(0.0, 0.0, 0.5, 0),
            Point::with_pressure(10.0, 0.0, 0.5, 10),
            Point::with_pressure(20.0, 0.0, 0.5, 20),
            Point::with_pressure(30.0, 0.0, 0.5, 30),
        ]
    }

    #[test]
    fn test_catmull_rom_interpolation() {
        let points = make_line_points();
        let result = interpolate_catmull_rom(&points, 2.0);

        // Should have more points than input
        assert!(result.len() > points.len());

        // First and last points should be preserved
        assert!((result.first().unwrap().x - points.first().unwrap().x).abs() < 0.01);
        assert!((result.last().unwrap().x - points.last().unwrap().x).abs() < 0.01);
        assert!(result.iter().all(|p| p.pressure == Some(0.5)));
    }

    #[test]
    fn catmull_rom_keeps_missing_pressure_absent() {
        let points: Vec<Point> = (0..4).map(|i| Point::new(i as f32 * 10.0, 0.0, i)).collect();
        let result = interpolate_catmull_rom(&points, 2.0);
        assert!(result.iter().all(|p| p.pressure.is_none()));
    }

    #[test]
    fn linear_interpolation_respects_spacing() {
        let points = vec![Point::new(0.0, 0.0, 0), Point::new(10.0, 0.0, 100)];
        let result = interpolate_linear(&points, 2.0);

        assert_eq!(result.len(), 6);
        assert!(result.windows(2).all(|w| w[1].x - w[0].x <= 2.0 + 1e-4));
        assert_eq!(result[1].timestamp_ms, 20);
    }

    #[test]
    fn test_path_length() {
        let points = make_line_points();
        let length = path_length(&points);

        // Should be approximately 30 (3 segments of 10 each)
        assert!((length - 30.0).abs() < 0.01);
    }

    #[test]
    fn test_path_length_empty() {
        let points: Vec<Point> = vec![];
        assert_eq!(path_length(&points), 0.0);
    }

    #[test]
    fn test_catmull_rom_few_points() {
        // With fewer than 4 points, should return input unchanged
        let points = vec![
            Point::with_pressure(0.0, 0.0, 0.5, 0),
            Point::with_pressure(10.0, 10.0, 0.5, 8),
        ];

        let result = interpolate_catmull_rom(&points, 2.0);
        assert_eq!(result.len(), points.len());
    }

    #[test]
    fn velocity_uses_timestamps() {
        let a = Point::new(0.0, 0.0, 0);
        let b = Point::new(50.0, 0.0, 100);
        assert!((velocity_between(&a, &b) - 500.0).abs() < 1e-3);
        assert_eq!(velocity_between(&a, &Point::new(5.0, 0.0, 0)), 0.0);
    }
}
