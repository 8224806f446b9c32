use imageproc::geometry::convex_hull;
use imageproc::point::Point;
use serde::Serialize;

/// Circle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Circle {
    pub x: f64,
    pub y: f64,
    pub radius: f64,
}

impl Circle {
    const EPS: f64 = 1e-7;

    fn from_point(p: (f64, f64)) -> Self {
        Self {
            x: p.0,
            y: p.1,
            radius: 0.0,
        }
    }

    fn from_diameter(a: (f64, f64), b: (f64, f64)) -> Self {
        let x = (a.0 + b.0) / 2.0;
        let y = (a.1 + b.1) / 2.0;
        Self {
            x,
            y,
            radius: distance((x, y), a).max(distance((x, y), b)),
        }
    }

    /// Circumscribed circle. Collinear triples fall back to the widest pair.
    fn from_triangle(a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> Self {
        let d = 2.0 * (a.0 * (b.1 - c.1) + b.0 * (c.1 - a.1) + c.0 * (a.1 - b.1));
        if d.abs() < Self::EPS {
            let candidates = [
                Self::from_diameter(a, b),
                Self::from_diameter(b, c),
                Self::from_diameter(a, c),
            ];
            return candidates
                .into_iter()
                .fold(Self::from_point(a), |best, c| if c.radius > best.radius { c } else { best });
        }

        let a2 = a.0 * a.0 + a.1 * a.1;
        let b2 = b.0 * b.0 + b.1 * b.1;
        let c2 = c.0 * c.0 + c.1 * c.1;
        let x = (a2 * (b.1 - c.1) + b2 * (c.1 - a.1) + c2 * (a.1 - b.1)) / d;
        let y = (a2 * (c.0 - b.0) + b2 * (a.0 - c.0) + c2 * (b.0 - a.0)) / d;
        let radius = distance((x, y), a)
            .max(distance((x, y), b))
            .max(distance((x, y), c));
        Self { x, y, radius }
    }

    pub fn contains(&self, p: (f64, f64)) -> bool {
        distance((self.x, self.y), p) <= self.radius + Self::EPS
    }

    /// Integer center and radius for raster drawing.
    pub fn to_pixels(&self) -> ((i32, i32), i32) {
        ((self.x as i32, self.y as i32), self.radius as i32)
    }
}

fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// Smallest circle enclosing every point, or `None` for an empty set.
///
/// The points are reduced to their convex hull and visited in a fixed
/// interleaved order, so the result is deterministic for a given input.
pub fn min_enclosing_circle(points: &[Point<i32>]) -> Option<Circle> {
    if points.is_empty() {
        return None;
    }

    let mut unique = points.to_vec();
    unique.sort_by_key(|p| (p.y, p.x));
    unique.dedup();

    let hull = convex_hull(unique.as_slice());
    let hull = if hull.is_empty() { unique } else { hull };
    let pts: Vec<(f64, f64)> = interleave(&hull)
        .into_iter()
        .map(|p| (p.x as f64, p.y as f64))
        .collect();

    let mut circle = Circle::from_point(pts[0]);
    for i in 1..pts.len() {
        if circle.contains(pts[i]) {
            continue;
        }
        circle = Circle::from_point(pts[i]);
        for j in 0..i {
            if circle.contains(pts[j]) {
                continue;
            }
            circle = Circle::from_diameter(pts[i], pts[j]);
            for k in 0..j {
                if !circle.contains(pts[k]) {
                    circle = Circle::from_triangle(pts[i], pts[j], pts[k]);
                }
            }
        }
    }
    Some(circle)
}

/// Reorders hull vertices with a stride coprime to their count. Consecutive hull
/// points tend to fall outside the running circle one after another, which is
/// the slow path of the incremental algorithm.
fn interleave(points: &[Point<i32>]) -> Vec<Point<i32>> {
    let n = points.len();
    if n < 4 {
        return points.to_vec();
    }
    let mut stride = (n as f64 * 0.618) as usize;
    while gcd(stride, n) != 1 {
        stride += 1;
    }
    (0..n).map(|i| points[(i * stride) % n]).collect()
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_single_point_has_zero_radius() {
        let circle = min_enclosing_circle(&[Point::new(4, 7)]).unwrap();
        assert_eq!((circle.x, circle.y, circle.radius), (4.0, 7.0, 0.0));
    }

    #[test]
    fn test_empty_point_set() {
        assert!(min_enclosing_circle(&[]).is_none());
    }

    #[test]
    fn test_square_outline() {
        let mut points = Vec::new();
        for i in 0..=10 {
            points.push(Point::new(i, 0));
            points.push(Point::new(i, 10));
            points.push(Point::new(0, i));
            points.push(Point::new(10, i));
        }
        let circle = min_enclosing_circle(&points).unwrap();
        assert!(close(circle.x, 5.0));
        assert!(close(circle.y, 5.0));
        assert!(close(circle.radius, 50f64.sqrt()));
    }

    #[test]
    fn test_collinear_points() {
        let points = [Point::new(0, 0), Point::new(3, 0), Point::new(8, 0)];
        let circle = min_enclosing_circle(&points).unwrap();
        assert!(close(circle.x, 4.0));
        assert!(close(circle.radius, 4.0));
    }

    #[test]
    fn test_every_point_is_enclosed() {
        let points: Vec<Point<i32>> = (0..40)
            .map(|i| Point::new((i * 7) % 23, (i * 11) % 17))
            .collect();
        let circle = min_enclosing_circle(&points).unwrap();
        for p in &points {
            assert!(circle.contains((p.x as f64, p.y as f64)));
        }
    }

    #[test]
    fn test_triangle_circumcircle() {
        let points = [Point::new(0, 0), Point::new(6, 0), Point::new(3, 5)];
        let circle = min_enclosing_circle(&points).unwrap();
        assert!(close(circle.x, 3.0));
        assert!(close(circle.y, 1.6));
        assert!(close(circle.radius, 3.4));
    }
}
