//! Shape-vs-shape collision: GJK/EPA-driven closest-point and penetration
//! queries between two convex leaf shapes, manifold extraction via face
//! clipping, and shape/ray casting via conservative advancement.
//!
//! Grounded on spec.md §4.2. This module only ever sees convex leaves;
//! `crate::narrowphase` recurses through `Compound`/`TriangleMesh` children
//! and calls in here once per resulting leaf pair.

pub mod epa;
pub mod gjk;
pub mod manifold;

pub use manifold::{AllHitsCollector, AnyHitCollector, ClosestHitCollector, Collector, Hit, Manifold, ManifoldPoint};

use crate::shape::{ConvexRadiusMode, Shape, SubShapeId};
use epa::epa;
use gjk::{gjk, ClosureSupport, GjkResult};
use nalgebra::{UnitQuaternion, Vector3};

/// Penetration/closest-point result between two convex leaf shapes, before
/// manifold extraction folds it into one or more [`ManifoldPoint`]s.
#[derive(Debug, Clone, Copy)]
pub struct ShapePairHit {
    /// World-space unit normal, pointing from A into B.
    pub normal: Vector3<f64>,
    /// Positive when overlapping (including convex radius), negative (a
    /// gap) only ever returned by `collide_convex` as `None` instead.
    pub depth: f64,
    /// World-space point on A's outer (convex-radius-inflated) surface.
    pub point_a: Vector3<f64>,
    /// World-space point on B's outer surface.
    pub point_b: Vector3<f64>,
}

/// Runs GJK on the two shapes' convex cores (excluding convex radius), then
/// EPA if they overlap, and folds the convex radius back in as a surface
/// offset. Returns `None` if the shapes (including their radii) do not
/// touch within `tolerance`.
pub fn collide_convex(
    shape_a: &Shape,
    pos_a: Vector3<f64>,
    rot_a: UnitQuaternion<f64>,
    shape_b: &Shape,
    pos_b: Vector3<f64>,
    rot_b: UnitQuaternion<f64>,
    tolerance: f64,
) -> Option<ShapePairHit> {
    let radius_a = shape_a.convex_radius();
    let radius_b = shape_b.convex_radius();
    let radius_sum = radius_a + radius_b;

    let support_a = |dir: Vector3<f64>| {
        let local = rot_a.inverse() * dir;
        pos_a + rot_a * shape_a.support_point(local, ConvexRadiusMode::ExcludeConvexRadius)
    };
    let support_b = |dir: Vector3<f64>| {
        let local = rot_b.inverse() * dir;
        pos_b + rot_b * shape_b.support_point(local, ConvexRadiusMode::ExcludeConvexRadius)
    };
    let support = ClosureSupport { support_a: &support_a, support_b: &support_b };

    match gjk(&support, Some(tolerance)) {
        GjkResult::Separated { distance, closest_a, closest_b } => {
            let gap = distance - radius_sum;
            if gap > tolerance {
                return None;
            }
            let normal = if distance > 1e-9 { (closest_b - closest_a) / distance } else { Vector3::y() };
            Some(ShapePairHit {
                normal,
                depth: -gap,
                point_a: closest_a + normal * radius_a,
                point_b: closest_b - normal * radius_b,
            })
        }
        GjkResult::Intersecting { simplex } => {
            let result = epa(&support, &simplex);
            let normal = result.normal;
            Some(ShapePairHit {
                normal,
                depth: result.depth + radius_sum,
                point_a: result.witness_a + normal * radius_a,
                point_b: result.witness_b - normal * radius_b,
            })
        }
    }
}

/// Builds a manifold (up to four points) from a [`ShapePairHit`] by clipping
/// the two shapes' supporting faces against each other; falls back to a
/// single-point manifold when either shape has no flat face along the hit
/// normal (spheres, capsule/cylinder curved surfaces).
pub fn generate_manifold(
    shape_a: &Shape,
    pos_a: Vector3<f64>,
    rot_a: UnitQuaternion<f64>,
    sub_a: SubShapeId,
    shape_b: &Shape,
    pos_b: Vector3<f64>,
    rot_b: UnitQuaternion<f64>,
    sub_b: SubShapeId,
    hit: &ShapePairHit,
) -> Manifold {
    let local_dir_a = rot_a.inverse() * hit.normal;
    let local_dir_b = rot_b.inverse() * (-hit.normal);
    let face_a = shape_a.supporting_face(local_dir_a, sub_a);
    let face_b = shape_b.supporting_face(local_dir_b, sub_b);

    if face_a.len() >= 3 && face_b.len() >= 3 {
        let world_a: Vec<Vector3<f64>> = face_a.iter().map(|p| pos_a + rot_a * p).collect();
        let world_b: Vec<Vector3<f64>> = face_b.iter().map(|p| pos_b + rot_b * p).collect();
        clip_faces(&world_a, &world_b, hit.normal)
    } else {
        single_point_manifold(hit)
    }
}

/// Exposes [`clip_faces`] to `crate::narrowphase`, which needs it for
/// triangle-vs-convex manifolds (a raw triangle is not a [`Shape`], so it
/// cannot go through [`generate_manifold`] directly).
pub(crate) fn clip_faces_pub(face_a: &[Vector3<f64>], face_b: &[Vector3<f64>], normal: Vector3<f64>) -> Manifold {
    clip_faces(face_a, face_b, normal)
}

fn single_point_manifold(hit: &ShapePairHit) -> Manifold {
    let mut points = smallvec::SmallVec::new();
    points.push(ManifoldPoint { local_a: hit.point_a, local_b: hit.point_b, depth: hit.depth });
    Manifold { normal: hit.normal, points }
}

/// Clips the incident face (`face_b`) against the reference face's (`face_a`)
/// side planes, keeping points behind the reference plane, then reduces the
/// clipped polygon to at most four points. Depth at each surviving point is
/// measured along `normal` between the two faces.
fn clip_faces(face_a: &[Vector3<f64>], face_b: &[Vector3<f64>], normal: Vector3<f64>) -> Manifold {
    let ref_centroid = centroid(face_a);
    let ref_normal = polygon_normal(face_a).unwrap_or(normal);
    let ref_normal = if ref_normal.dot(&normal) < 0.0 { -ref_normal } else { ref_normal };

    let mut clipped = face_b.to_vec();
    for i in 0..face_a.len() {
        let a = face_a[i];
        let b = face_a[(i + 1) % face_a.len()];
        let edge = b - a;
        let side_normal = edge.cross(&ref_normal);
        let side_normal = if side_normal.dot(&(ref_centroid - a)) > 0.0 { side_normal } else { -side_normal };
        clipped = sutherland_hodgman(&clipped, a, side_normal);
        if clipped.is_empty() {
            break;
        }
    }

    if clipped.is_empty() {
        // Degenerate clip (faces don't project onto each other); fall back
        // to the incident face's own vertices projected onto the reference
        // plane, rather than reporting no contact at all.
        clipped = face_b.to_vec();
    }

    let reduced = reduce_to_four(&clipped, ref_normal);
    let mut points = smallvec::SmallVec::new();
    for p in reduced {
        let depth = ref_normal.dot(&(ref_centroid - p));
        if depth >= -1e-4 {
            points.push(ManifoldPoint { local_a: project_onto_plane(p, ref_centroid, ref_normal), local_b: p, depth: depth.max(0.0) });
        }
    }
    if points.is_empty() {
        points.push(ManifoldPoint { local_a: ref_centroid, local_b: ref_centroid, depth: 0.0 });
    }
    Manifold { normal, points }
}

fn project_onto_plane(p: Vector3<f64>, plane_point: Vector3<f64>, normal: Vector3<f64>) -> Vector3<f64> {
    p - normal * normal.dot(&(p - plane_point))
}

fn centroid(points: &[Vector3<f64>]) -> Vector3<f64> {
    points.iter().fold(Vector3::zeros(), |a, b| a + b) / points.len() as f64
}

fn polygon_normal(points: &[Vector3<f64>]) -> Option<Vector3<f64>> {
    if points.len() < 3 {
        return None;
    }
    let a = points[1] - points[0];
    let b = points[2] - points[0];
    let n = a.cross(&b);
    if n.norm() > 1e-12 { Some(n.normalize()) } else { None }
}

/// Clips a polygon against a single half-space (`point`, `normal`), keeping
/// the side the normal points into.
fn sutherland_hodgman(polygon: &[Vector3<f64>], point: Vector3<f64>, normal: Vector3<f64>) -> Vec<Vector3<f64>> {
    if polygon.is_empty() {
        return Vec::new();
    }
    let mut output = Vec::with_capacity(polygon.len() + 1);
    for i in 0..polygon.len() {
        let current = polygon[i];
        let prev = polygon[(i + polygon.len() - 1) % polygon.len()];
        let current_inside = normal.dot(&(current - point)) >= 0.0;
        let prev_inside = normal.dot(&(prev - point)) >= 0.0;
        if current_inside {
            if !prev_inside {
                output.push(segment_plane_intersection(prev, current, point, normal));
            }
            output.push(current);
        } else if prev_inside {
            output.push(segment_plane_intersection(prev, current, point, normal));
        }
    }
    output
}

fn segment_plane_intersection(a: Vector3<f64>, b: Vector3<f64>, plane_point: Vector3<f64>, normal: Vector3<f64>) -> Vector3<f64> {
    let denom = normal.dot(&(b - a));
    let t = if denom.abs() > 1e-12 { normal.dot(&(plane_point - a)) / denom } else { 0.0 };
    a + (b - a) * t.clamp(0.0, 1.0)
}

/// Reduces a (possibly large) convex polygon to at most four points by
/// greedily maximizing enclosed area, a standard manifold-point-culling
/// technique (Box2D/Bullet-style) that keeps the points most representative
/// of the true contact area.
fn reduce_to_four(points: &[Vector3<f64>], normal: Vector3<f64>) -> Vec<Vector3<f64>> {
    if points.len() <= 4 {
        return points.to_vec();
    }
    let tangent = arbitrary_tangent(normal);
    let bitangent = normal.cross(&tangent);
    let proj = |p: Vector3<f64>| (p.dot(&tangent), p.dot(&bitangent));

    let first = (0..points.len())
        .max_by(|&a, &b| proj(points[a]).0.partial_cmp(&proj(points[b]).0).unwrap())
        .unwrap();
    let second = (0..points.len())
        .filter(|&i| i != first)
        .max_by(|&a, &b| (points[a] - points[first]).norm_squared().partial_cmp(&(points[b] - points[first]).norm_squared()).unwrap())
        .unwrap();
    let tri_area = |i: usize| (points[i] - points[first]).cross(&(points[second] - points[first])).norm();
    let third = (0..points.len())
        .filter(|i| *i != first && *i != second)
        .max_by(|&a, &b| tri_area(a).partial_cmp(&tri_area(b)).unwrap())
        .unwrap();
    let quad_area = |i: usize| {
        (points[i] - points[first]).cross(&(points[second] - points[first])).norm()
            + (points[i] - points[second]).cross(&(points[third] - points[second])).norm()
    };
    let fourth = (0..points.len())
        .filter(|i| *i != first && *i != second && *i != third)
        .max_by(|&a, &b| quad_area(a).partial_cmp(&quad_area(b)).unwrap())
        .unwrap();

    vec![points[first], points[second], points[third], points[fourth]]
}

fn arbitrary_tangent(normal: Vector3<f64>) -> Vector3<f64> {
    let candidate = if normal.x.abs() < 0.9 { Vector3::x() } else { Vector3::y() };
    let t = normal.cross(&candidate);
    if t.norm() > 1e-9 { t.normalize() } else { Vector3::z() }
}

/// Conservative-advancement shape cast: advances `shape_a` (moving) along
/// `displacement` against stationary `shape_b`, returning the fraction in
/// `[0, 1]` of first contact plus the hit data at that fraction, or `None`
/// if they never come within `tolerance` of touching.
///
/// Early termination: if already penetrating at fraction 0, that is
/// reported immediately (spec.md §4.2) rather than advancing further.
pub fn shape_cast(
    shape_a: &Shape,
    start_pos_a: Vector3<f64>,
    rot_a: UnitQuaternion<f64>,
    displacement: Vector3<f64>,
    shape_b: &Shape,
    pos_b: Vector3<f64>,
    rot_b: UnitQuaternion<f64>,
    tolerance: f64,
) -> Option<ShapePairHit> {
    const MAX_ITERATIONS: usize = 32;
    let mut fraction = 0.0f64;
    let mut pos_a = start_pos_a;

    if let Some(hit) = collide_convex(shape_a, pos_a, rot_a, shape_b, pos_b, rot_b, tolerance) {
        return Some(hit);
    }

    for _ in 0..MAX_ITERATIONS {
        let support_a = |dir: Vector3<f64>| {
            let local = rot_a.inverse() * dir;
            pos_a + rot_a * shape_a.support_point(local, ConvexRadiusMode::IncludeConvexRadius)
        };
        let support_b = |dir: Vector3<f64>| {
            let local = rot_b.inverse() * dir;
            pos_b + rot_b * shape_b.support_point(local, ConvexRadiusMode::IncludeConvexRadius)
        };
        let support = ClosureSupport { support_a: &support_a, support_b: &support_b };

        match gjk(&support, Some(tolerance)) {
            GjkResult::Intersecting { .. } => {
                return collide_convex(shape_a, pos_a, rot_a, shape_b, pos_b, rot_b, tolerance).or(Some(ShapePairHit {
                    normal: Vector3::y(),
                    depth: 0.0,
                    point_a: pos_a,
                    point_b: pos_b,
                }));
            }
            GjkResult::Separated { distance, closest_a, closest_b } => {
                if distance < tolerance {
                    let normal = if distance > 1e-9 { (closest_b - closest_a) / distance } else { Vector3::y() };
                    return Some(ShapePairHit { normal, depth: tolerance - distance, point_a: closest_a, point_b: closest_b });
                }
                let towards = displacement.normalize_or_zero();
                let separating_direction = (closest_b - closest_a).normalize_or_zero();
                let closing_speed = towards.dot(&separating_direction);
                if closing_speed <= 1e-9 {
                    return None;
                }
                let step = distance / closing_speed;
                let remaining = 1.0 - fraction;
                let advance = (step / displacement.norm().max(1e-12)).min(remaining);
                if advance <= 1e-9 {
                    let normal = separating_direction;
                    return Some(ShapePairHit { normal, depth: 0.0, point_a: closest_a, point_b: closest_b });
                }
                fraction += advance;
                pos_a = start_pos_a + displacement * fraction;
                if fraction >= 1.0 {
                    return None;
                }
            }
        }
    }
    None
}

/// Specialized cast of a point (zero-extent "shape") against a target
/// shape, used to implement `World::cast_ray`.
pub fn raycast(
    origin: Vector3<f64>,
    direction: Vector3<f64>,
    shape_b: &Shape,
    pos_b: Vector3<f64>,
    rot_b: UnitQuaternion<f64>,
    tolerance: f64,
) -> Option<ShapePairHit> {
    let point_shape = Shape::Sphere(crate::shape::Sphere { radius: tolerance.max(1e-6) });
    shape_cast(&point_shape, origin, UnitQuaternion::identity(), direction, shape_b, pos_b, rot_b, tolerance)
}

trait NormalizeOrZero {
    fn normalize_or_zero(self) -> Vector3<f64>;
}

impl NormalizeOrZero for Vector3<f64> {
    fn normalize_or_zero(self) -> Vector3<f64> {
        let n = self.norm();
        if n > 1e-12 { self / n } else { Vector3::zeros() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Sphere;
    use nalgebra::UnitQuaternion;

    #[test]
    fn collide_convex_spheres_reports_depth() {
        let a = Shape::Sphere(Sphere { radius: 1.0 });
        let b = Shape::Sphere(Sphere { radius: 1.0 });
        let hit = collide_convex(&a, Vector3::zeros(), UnitQuaternion::identity(), &b, Vector3::new(1.5, 0.0, 0.0), UnitQuaternion::identity(), 1e-4).unwrap();
        assert!((hit.depth - 0.5).abs() < 1e-2);
    }

    #[test]
    fn separated_spheres_report_none() {
        let a = Shape::Sphere(Sphere { radius: 1.0 });
        let b = Shape::Sphere(Sphere { radius: 1.0 });
        let hit = collide_convex(&a, Vector3::zeros(), UnitQuaternion::identity(), &b, Vector3::new(10.0, 0.0, 0.0), UnitQuaternion::identity(), 1e-4);
        assert!(hit.is_none());
    }

    #[test]
    fn shape_cast_sphere_hits_static_wall() {
        let moving = Shape::Sphere(Sphere { radius: 0.5 });
        let wall = Shape::cuboid(Vector3::new(0.1, 5.0, 5.0), 0.0).unwrap();
        let hit = shape_cast(
            &moving,
            Vector3::new(-10.0, 0.0, 0.0),
            UnitQuaternion::identity(),
            Vector3::new(20.0, 0.0, 0.0),
            &wall,
            Vector3::new(0.0, 0.0, 0.0),
            UnitQuaternion::identity(),
            1e-4,
        );
        assert!(hit.is_some());
    }
}
