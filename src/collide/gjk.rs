//! Gilbert-Johnson-Keerthi distance algorithm between two convex sets given
//! as support functions.
//!
//! Classic expanding-simplex, origin-containment case analysis, generalized
//! from raw vertex lists to arbitrary support-function closures, since this
//! crate's shapes (sphere, capsule, rounded box, convex hull) are not all
//! vertex sets.

use nalgebra::Vector3;
use smallvec::SmallVec;

/// Iteration cap; GJK is bounded so a degenerate pair (near-parallel faces,
/// numerical noise) can never hang the solver. Per spec.md §7, the
/// best-so-far result is returned rather than treated as an error.
const MAX_ITERATIONS: usize = 64;
/// Distance-improvement threshold below which GJK is considered converged.
const DEFAULT_TOLERANCE: f64 = 1e-6;

/// A support function over the Minkowski difference `A - B`: given a world
/// direction, returns the farthest point of `A - B` along it plus the
/// witness points on `A` and `B` that produced it.
pub trait MinkowskiSupport {
    /// Returns `(a - b, point_on_a, point_on_b)` for the given direction.
    fn support(&self, direction: Vector3<f64>) -> (Vector3<f64>, Vector3<f64>, Vector3<f64>);
}

/// A closure-backed [`MinkowskiSupport`], the common case when the caller
/// already has world-space support closures for each shape.
pub struct ClosureSupport<'a> {
    pub support_a: &'a dyn Fn(Vector3<f64>) -> Vector3<f64>,
    pub support_b: &'a dyn Fn(Vector3<f64>) -> Vector3<f64>,
}

impl MinkowskiSupport for ClosureSupport<'_> {
    fn support(&self, direction: Vector3<f64>) -> (Vector3<f64>, Vector3<f64>, Vector3<f64>) {
        let pa = (self.support_a)(direction);
        let pb = (self.support_b)(-direction);
        (pa - pb, pa, pb)
    }
}

#[derive(Debug, Clone, Copy)]
struct SimplexPoint {
    /// Point on the Minkowski difference.
    point: Vector3<f64>,
    /// Witness point on shape A.
    witness_a: Vector3<f64>,
    /// Witness point on shape B.
    witness_b: Vector3<f64>,
}

/// Result of a GJK run.
#[derive(Debug, Clone)]
pub enum GjkResult {
    /// The two shapes' Minkowski difference contains the origin; they
    /// overlap. Carries the final simplex for EPA to grow from.
    Intersecting { simplex: SmallVec<[SimplexPointPublic; 4]> },
    /// The shapes are separated by `distance`, with the closest points on
    /// each shape given.
    Separated { distance: f64, closest_a: Vector3<f64>, closest_b: Vector3<f64> },
}

/// Public mirror of [`SimplexPoint`] so EPA (a sibling module) can consume
/// a GJK-terminated simplex without this module exposing its private type.
#[derive(Debug, Clone, Copy)]
pub struct SimplexPointPublic {
    pub point: Vector3<f64>,
    pub witness_a: Vector3<f64>,
    pub witness_b: Vector3<f64>,
}

/// Runs GJK to determine whether two convex sets (given via `support`)
/// overlap, and if not, their closest points and separation distance.
pub fn gjk(support: &impl MinkowskiSupport, tolerance: Option<f64>) -> GjkResult {
    let tolerance = tolerance.unwrap_or(DEFAULT_TOLERANCE);
    let mut simplex: SmallVec<[SimplexPoint; 4]> = SmallVec::new();

    let mut direction = Vector3::new(1.0, 0.0, 0.0);
    let (p, wa, wb) = support.support(direction);
    simplex.push(SimplexPoint { point: p, witness_a: wa, witness_b: wb });
    direction = -p;
    if direction.norm() < 1e-12 {
        direction = Vector3::x();
    }

    let mut last_distance = f64::INFINITY;

    for _ in 0..MAX_ITERATIONS {
        let (p, wa, wb) = support.support(direction);
        let d = p.dot(&direction);

        if d < 0.0 {
            // The support point doesn't pass the origin: separated. Compute
            // closest points from the current simplex.
            let (distance, ca, cb) = closest_points_on_simplex(&simplex);
            return GjkResult::Separated { distance, closest_a: ca, closest_b: cb };
        }

        simplex.push(SimplexPoint { point: p, witness_a: wa, witness_b: wb });

        if do_simplex(&mut simplex, &mut direction) {
            let public: SmallVec<[SimplexPointPublic; 4]> = simplex
                .iter()
                .map(|s| SimplexPointPublic { point: s.point, witness_a: s.witness_a, witness_b: s.witness_b })
                .collect();
            return GjkResult::Intersecting { simplex: public };
        }

        let new_distance = direction.norm();
        if (last_distance - new_distance).abs() < tolerance {
            let (distance, ca, cb) = closest_points_on_simplex(&simplex);
            return GjkResult::Separated { distance, closest_a: ca, closest_b: cb };
        }
        last_distance = new_distance;
    }

    let (distance, ca, cb) = closest_points_on_simplex(&simplex);
    GjkResult::Separated { distance, closest_a: ca, closest_b: cb }
}

/// Reduces the simplex towards the origin, updating `direction` to point
/// from the simplex towards the origin. Returns `true` if the simplex now
/// encloses the origin (tetrahedron case succeeded).
fn do_simplex(simplex: &mut SmallVec<[SimplexPoint; 4]>, direction: &mut Vector3<f64>) -> bool {
    match simplex.len() {
        2 => line_case(simplex, direction),
        3 => triangle_case(simplex, direction),
        4 => tetrahedron_case(simplex, direction),
        _ => false,
    }
}

fn line_case(simplex: &mut SmallVec<[SimplexPoint; 4]>, direction: &mut Vector3<f64>) -> bool {
    let a = simplex[1];
    let b = simplex[0];
    let ab = b.point - a.point;
    let ao = -a.point;

    if ab.dot(&ao) > 0.0 {
        *direction = triple_cross(ab, ao, ab);
        if direction.norm_squared() < 1e-18 {
            *direction = ab.cross(&Vector3::x());
            if direction.norm_squared() < 1e-18 {
                *direction = ab.cross(&Vector3::y());
            }
        }
    } else {
        *simplex = SmallVec::from_slice(&[a]);
        *direction = ao;
    }
    false
}

fn triangle_case(simplex: &mut SmallVec<[SimplexPoint; 4]>, direction: &mut Vector3<f64>) -> bool {
    let a = simplex[2];
    let b = simplex[1];
    let c = simplex[0];

    let ab = b.point - a.point;
    let ac = c.point - a.point;
    let ao = -a.point;
    let abc = ab.cross(&ac);

    if abc.cross(&ac).dot(&ao) > 0.0 {
        if ac.dot(&ao) > 0.0 {
            *simplex = SmallVec::from_slice(&[c, a]);
            *direction = triple_cross(ac, ao, ac);
        } else {
            return ab_region(simplex, a, b, ab, ao, direction);
        }
    } else if ab.cross(&abc).dot(&ao) > 0.0 {
        return ab_region(simplex, a, b, ab, ao, direction);
    } else if abc.dot(&ao) > 0.0 {
        *simplex = SmallVec::from_slice(&[c, b, a]);
        *direction = abc;
    } else {
        *simplex = SmallVec::from_slice(&[b, c, a]);
        *direction = -abc;
    }
    false
}

fn ab_region(
    simplex: &mut SmallVec<[SimplexPoint; 4]>,
    a: SimplexPoint,
    b: SimplexPoint,
    ab: Vector3<f64>,
    ao: Vector3<f64>,
    direction: &mut Vector3<f64>,
) -> bool {
    if ab.dot(&ao) > 0.0 {
        *simplex = SmallVec::from_slice(&[b, a]);
        *direction = triple_cross(ab, ao, ab);
    } else {
        *simplex = SmallVec::from_slice(&[a]);
        *direction = ao;
    }
    false
}

fn tetrahedron_case(simplex: &mut SmallVec<[SimplexPoint; 4]>, direction: &mut Vector3<f64>) -> bool {
    let a = simplex[3];
    let b = simplex[2];
    let c = simplex[1];
    let d = simplex[0];

    let ab = b.point - a.point;
    let ac = c.point - a.point;
    let ad = d.point - a.point;
    let ao = -a.point;

    let abc = ab.cross(&ac);
    let acd = ac.cross(&ad);
    let adb = ad.cross(&ab);

    if abc.dot(&ao) > 0.0 {
        *simplex = SmallVec::from_slice(&[c, b, a]);
        return triangle_case(simplex, direction);
    }
    if acd.dot(&ao) > 0.0 {
        *simplex = SmallVec::from_slice(&[d, c, a]);
        return triangle_case(simplex, direction);
    }
    if adb.dot(&ao) > 0.0 {
        *simplex = SmallVec::from_slice(&[b, d, a]);
        return triangle_case(simplex, direction);
    }
    true
}

fn triple_cross(a: Vector3<f64>, b: Vector3<f64>, c: Vector3<f64>) -> Vector3<f64> {
    a.cross(&b).cross(&c)
}

/// Closest points on each shape from the final (non-enclosing) simplex,
/// approximated as the witness points of the simplex vertex closest to the
/// origin on the Minkowski difference (adequate since GJK has already
/// converged to a near-minimal simplex at termination).
fn closest_points_on_simplex(simplex: &[SimplexPoint]) -> (f64, Vector3<f64>, Vector3<f64>) {
    let mut best = &simplex[0];
    let mut best_dist = best.point.norm();
    for s in &simplex[1..] {
        let dist = s.point.norm();
        if dist < best_dist {
            best_dist = dist;
            best = s;
        }
    }
    (best_dist, best.witness_a, best.witness_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sphere_support(center: Vector3<f64>, radius: f64) -> impl Fn(Vector3<f64>) -> Vector3<f64> {
        move |dir: Vector3<f64>| {
            let d = if dir.norm() > 1e-12 { dir.normalize() } else { Vector3::x() };
            center + d * radius
        }
    }

    #[test]
    fn separated_spheres_report_positive_distance() {
        let sa = sphere_support(Vector3::zeros(), 1.0);
        let sb = sphere_support(Vector3::new(5.0, 0.0, 0.0), 1.0);
        let support = ClosureSupport { support_a: &sa, support_b: &sb };
        match gjk(&support, None) {
            GjkResult::Separated { distance, .. } => assert!((distance - 3.0).abs() < 1e-3),
            GjkResult::Intersecting { .. } => panic!("expected separation"),
        }
    }

    #[test]
    fn overlapping_spheres_are_intersecting() {
        let sa = sphere_support(Vector3::zeros(), 1.0);
        let sb = sphere_support(Vector3::new(0.5, 0.0, 0.0), 1.0);
        let support = ClosureSupport { support_a: &sa, support_b: &sb };
        match gjk(&support, None) {
            GjkResult::Intersecting { .. } => {}
            GjkResult::Separated { distance, .. } => panic!("expected overlap, got distance {distance}"),
        }
    }
}
