//! Stroke point reduction: uniform density subsampling and
//! Ramer-Douglas-Peucker simplification. Both keep the exact endpoints.

use crate::input::Point;

/// Keep roughly `density` of the points at a uniform stride
pub fn reduce_density(points: &[Point], density: f32) -> Vec<Point> {
    if points.len() < 3 || density >= 1.0 || !density.is_finite() {
        return points.to_vec();
    }
    let density = density.max(0.05);
    let last = points.len() - 1;

    let mut out = Vec::with_capacity((points.len() as f32 * density).ceil() as usize + 2);
    out.push(points[0]);
    for i in 1..last {
        let before = (i as f32 * density).floor();
        let after = ((i + 1) as f32 * density).floor();
        if after > before {
            out.push(points[i]);
        }
    }
    out.push(points[last]);
    out
}

/// Ramer-Douglas-Peucker path simplification
pub fn douglas_peucker(points: &[Point], epsilon: f32) -> Vec<Point> {
    if points.len() < 3 || epsilon <= 0.0 {
        return points.to_vec();
    }
    rdp_recursive(points, epsilon)
}

fn rdp_recursive(points: &[Point], epsilon: f32) -> Vec<Point> {
    if points.len() < 3 {
        return points.to_vec();
    }

    let first = points[0];
    let last = points[points.len() - 1];

    let mut max_dist = 0.0f32;
    let mut max_idx = 0;
    for (i, p) in points.iter().enumerate().skip(1).take(points.len() - 2) {
        let dist = point_line_distance(p, &first, &last);
        if dist > max_dist {
            max_dist = dist;
            max_idx = i;
        }
    }

    if max_dist > epsilon {
        let mut left = rdp_recursive(&points[..=max_idx], epsilon);
        let right = rdp_recursive(&points[max_idx..], epsilon);
        left.pop();
        left.extend(right);
        left
    } else {
        vec![first, last]
    }
}

fn point_line_distance(p: &Point, start: &Point, end: &Point) -> f32 {
    let dx = end.x - start.x;
    let dy = end.y - start.y;
    let len_sq = dx * dx + dy * dy;

    if len_sq < 1e-10 {
        return p.distance_to(start);
    }

    let cross = (p.x - start.x) * dy - (p.y - start.y) * dx;
    cross.abs() / len_sq.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(coords: &[(f32, f32)]) -> Vec<Point> {
        coords
            .iter()
            .enumerate()
            .map(|(i, (x, y))| Point::new(*x, *y, i as u64))
            .collect()
    }

    #[test]
    fn collinear_points_collapse_to_endpoints() {
        let points = path(&[(0.0, 0.0), (1.0, 0.0), (2.0, 0.01), (3.0, 0.0)]);
        let simplified = douglas_peucker(&points, 0.5);
        assert_eq!(simplified.len(), 2);
        assert_eq!(simplified[0], points[0]);
        assert_eq!(simplified[1], points[3]);
    }

    #[test]
    fn corners_survive() {
        let points = path(&[(0.0, 0.0), (5.0, 0.0), (10.0, 0.0), (10.0, 5.0), (10.0, 10.0)]);
        let simplified = douglas_peucker(&points, 1.0);
        let corner = simplified.iter().any(|p| p.x == 10.0 && p.y == 0.0);
        assert!(corner);
        assert_eq!(simplified.first(), points.first());
        assert_eq!(simplified.last(), points.last());
    }

    #[test]
    fn zero_epsilon_keeps_everything() {
        let points = path(&[(0.0, 0.0), (1.0, 0.0), (2.0, 0.0)]);
        assert_eq!(douglas_peucker(&points, 0.0), points);
    }

    #[test]
    fn density_reduction_keeps_endpoints() {
        let points: Vec<Point> = (0..100).map(|i| Point::new(i as f32, 0.0, i)).collect();
        let reduced = reduce_density(&points, 0.4);
        assert!(reduced.len() >= 38 && reduced.len() <= 44, "{}", reduced.len());
        assert_eq!(reduced.first(), points.first());
        assert_eq!(reduced.last(), points.last());
        assert_eq!(reduce_density(&points, 1.0).len(), 100);
    }

    #[test]
    fn short_paths_pass_through() {
        let points = path(&[(0.0, 0.0), (9.0, 9.0)]);
        assert_eq!(reduce_density(&points, 0.1), points);
        assert_eq!(douglas_peucker(&points, 5.0), points);
    }
}
