//! Narrowphase driver: dispatches each broadphase pair to the right
//! shape-vs-shape routine via the cross product of shape kinds, recursing
//! through `Compound`/`TriangleMesh` children, then folds the resulting
//! manifolds into the contact cache — creating new contacts, refreshing
//! persisting ones (matching points to their predecessor for warm start),
//! and leaving untouched ones for end-of-step destruction.
//!
//! Grounded on spec.md §4.5. `Plane` is handled here rather than in
//! `crate::collide` because it has no GJK support function (it is an
//! unbounded half-space clipped to a finite extent, not a point set) —
//! this is exactly the layer that dispatches by shape kind.

use crate::body::{BodyId, BodyPool, CombineMode};
use crate::collide::{self, generate_manifold, Manifold, ManifoldPoint, ShapePairHit};
use crate::config::SolverSettings;
use crate::contact::{Contact, ContactCache};
use crate::listener::{ContactListener, ContactSettings};
use crate::shape::composite::{Plane, COMPOUND_CHILD_BITS};
use crate::shape::{Shape, SubShapeId, MESH_TRIANGLE_BITS};
use nalgebra::{UnitQuaternion, Vector3};

/// Aggregate counters for one narrowphase pass, surfaced to the host via
/// `World::update`'s `StepStats` (spec.md §7 NEW, ambient telemetry).
#[derive(Debug, Clone, Copy, Default)]
pub struct NarrowPhaseStats {
    pub pairs_tested: u32,
    pub contacts_created: u32,
    pub contacts_persisted: u32,
    pub contacts_removed: u32,
}

/// Cosine of the default manifold-reduction normal threshold (~10 degrees).
const MANIFOLD_REDUCTION_COS: f64 = 0.98;
/// How close (in local units) a manifold point must land to a triangle edge
/// before enhanced-internal-edge removal considers it "on" that edge.
const EDGE_PROXIMITY: f64 = 1e-3;

struct RawContact {
    body_a: BodyId,
    body_b: BodyId,
    sub_a: SubShapeId,
    sub_b: SubShapeId,
    manifold: Manifold,
    sensor: bool,
}

/// Runs narrowphase over every sorted broadphase pair, updating `contacts`
/// in place and firing `listener` callbacks. Does not sweep unprocessed
/// contacts — the caller does that once after all pairs (and CCD) have run,
/// since CCD can also touch the cache this step.
pub fn run(
    bodies: &mut BodyPool,
    contacts: &mut ContactCache,
    listener: &mut dyn ContactListener,
    settings: &SolverSettings,
    pairs: &[(BodyId, BodyId)],
) -> NarrowPhaseStats {
    let mut stats = NarrowPhaseStats::default();
    let mut raw = Vec::new();

    for &(a_id, b_id) in pairs {
        stats.pairs_tested += 1;
        if !listener.on_body_pair_validate(a_id, b_id) {
            continue;
        }
        let (Some(body_a), Some(body_b)) = (bodies.get(a_id), bodies.get(b_id)) else { continue };
        if body_a.pooled || body_b.pooled {
            continue;
        }
        let sensor = body_a.sensor || body_b.sensor;
        let edge_removal = body_a.enhanced_internal_edge_removal || body_b.enhanced_internal_edge_removal;

        collide_recursive(
            &body_a.shape,
            body_a.position,
            body_a.rotation,
            SubShapeId::EMPTY,
            &body_b.shape,
            body_b.position,
            body_b.rotation,
            SubShapeId::EMPTY,
            settings.collision_tolerance,
            edge_removal,
            &mut |sub_a, sub_b, manifold| {
                raw.push(RawContact { body_a: a_id, body_b: b_id, sub_a, sub_b, manifold, sensor });
            },
        );
    }

    reduce_manifolds(bodies, &mut raw);

    for RawContact { body_a, body_b, sub_a, sub_b, manifold, sensor } in raw {
        if !listener.on_contact_validate(body_a, body_b, sub_a, sub_b) {
            continue;
        }
        let mut contact_settings = combined_contact_settings(bodies, body_a, body_b);
        let existing = contacts.find(body_a, sub_a, body_b, sub_b);
        match existing {
            Some(index) => {
                if let Some(c) = contacts.get_mut(index) {
                    rebind_points(c, &manifold);
                }
                listener.on_contact_persisted(body_a, body_b, &manifold, &mut contact_settings);
                apply_contact_settings(contacts, index, &contact_settings);
                contacts.mark_processed(index);
                stats.contacts_persisted += 1;
            }
            None => {
                let index = contacts.create(bodies, body_a, sub_a, body_b, sub_b, sensor);
                if let Some(c) = contacts.get_mut(index) {
                    rebind_points(c, &manifold);
                }
                listener.on_contact_added(body_a, body_b, &manifold, &mut contact_settings);
                apply_contact_settings(contacts, index, &contact_settings);
                stats.contacts_created += 1;
            }
        }
    }

    stats
}

/// Seeds a [`ContactSettings`] from both bodies' materials via
/// [`CombineMode::combine`], before handing it to the listener for any
/// per-contact override (spec.md §6: listener overrides apply on top of the
/// material-combined defaults, not instead of them).
fn combined_contact_settings(bodies: &BodyPool, body_a: BodyId, body_b: BodyId) -> ContactSettings {
    let (Some(a), Some(b)) = (bodies.get(body_a), bodies.get(body_b)) else {
        return ContactSettings::default();
    };
    ContactSettings {
        combined_friction: CombineMode::combine(a.material.friction, b.material.friction, a.material.friction_combine, b.material.friction_combine),
        combined_restitution: CombineMode::combine(a.material.restitution, b.material.restitution, a.material.restitution_combine, b.material.restitution_combine),
        can_push_character: true,
        can_receive_impulses: true,
    }
}

/// Persists the (possibly listener-overridden) settings onto the contact so
/// the solver and character controller can read them without redoing the
/// material combine every step.
fn apply_contact_settings(contacts: &mut ContactCache, index: u32, settings: &ContactSettings) {
    if let Some(c) = contacts.get_mut(index) {
        c.friction = settings.combined_friction;
        c.restitution = settings.combined_restitution;
        c.can_push_character = settings.can_push_character;
        c.can_receive_impulses = settings.can_receive_impulses;
    }
}

/// Replaces a contact's points with a freshly computed manifold, carrying
/// over each surviving point's accumulated impulses from whichever old
/// point is nearest it in B's local frame (spec.md §4.5: "preserving the
/// four points that best persist").
fn rebind_points(contact: &mut Contact, manifold: &Manifold) {
    let old_points = contact.points.clone();
    contact.normal_local_b = manifold.normal;
    contact.points.clear();
    for p in &manifold.points {
        let mut point = crate::contact::ContactPoint { local_a: p.local_a, local_b: p.local_b, depth: p.depth, normal_impulse: 0.0, tangent_impulse: [0.0, 0.0] };
        if let Some(nearest) = old_points.iter().min_by(|a, b| {
            (a.local_b - p.local_b).norm_squared().partial_cmp(&(b.local_b - p.local_b).norm_squared()).unwrap()
        }) {
            if (nearest.local_b - p.local_b).norm() < 0.05 {
                point.normal_impulse = nearest.normal_impulse;
                point.tangent_impulse = nearest.tangent_impulse;
            }
        }
        contact.points.push(point);
    }
}

/// Opt-in manifold reduction (spec.md §4.5): for a body with
/// `use_manifold_reduction`, contacts against other sub-shapes whose
/// normals are within [`MANIFOLD_REDUCTION_COS`] of each other are merged,
/// deepest wins. Operates per unordered body pair since that is the
/// granularity contacts are keyed at.
fn reduce_manifolds(bodies: &BodyPool, raw: &mut Vec<RawContact>) {
    let reduce_for = |id: BodyId| bodies.get(id).map(|b| b.use_manifold_reduction).unwrap_or(false);

    let mut groups: std::collections::HashMap<(u32, u32), Vec<usize>> = std::collections::HashMap::new();
    for (i, rc) in raw.iter().enumerate() {
        if reduce_for(rc.body_a) || reduce_for(rc.body_b) {
            groups.entry((rc.body_a.index, rc.body_b.index)).or_default().push(i);
        }
    }

    let mut drop = vec![false; raw.len()];
    for (_, indices) in groups {
        for i in 0..indices.len() {
            if drop[indices[i]] {
                continue;
            }
            for j in (i + 1)..indices.len() {
                if drop[indices[j]] {
                    continue;
                }
                let ni = raw[indices[i]].manifold.normal;
                let nj = raw[indices[j]].manifold.normal;
                if ni.dot(&nj) > MANIFOLD_REDUCTION_COS {
                    let di = raw[indices[i]].manifold.points.iter().map(|p| p.depth).fold(0.0f64, f64::max);
                    let dj = raw[indices[j]].manifold.points.iter().map(|p| p.depth).fold(0.0f64, f64::max);
                    if dj > di {
                        drop[indices[i]] = true;
                    } else {
                        drop[indices[j]] = true;
                    }
                }
            }
        }
    }

    let mut kept = Vec::with_capacity(raw.len());
    for (i, rc) in raw.drain(..).enumerate() {
        if !drop[i] {
            kept.push(rc);
        }
    }
    *raw = kept;
}

/// Recursively descends `shape_a`/`shape_b` through `Compound`/
/// `TriangleMesh` children, invoking `emit` once per resulting convex leaf
/// pair that actually touches.
#[allow(clippy::too_many_arguments)]
fn collide_recursive(
    shape_a: &Shape,
    pos_a: Vector3<f64>,
    rot_a: UnitQuaternion<f64>,
    sub_a: SubShapeId,
    shape_b: &Shape,
    pos_b: Vector3<f64>,
    rot_b: UnitQuaternion<f64>,
    sub_b: SubShapeId,
    tolerance: f64,
    edge_removal: bool,
    emit: &mut dyn FnMut(SubShapeId, SubShapeId, Manifold),
) {
    match shape_a {
        Shape::Compound(c) => {
            let aabb_b = shape_b.aabb(pos_b, rot_b);
            for (idx, child) in c.children.iter().enumerate() {
                let child_pos = pos_a + rot_a * child.local_position;
                let child_rot = rot_a * child.local_rotation;
                let child_aabb = child.shape.aabb(child_pos, child_rot);
                if !child_aabb.overlaps(&aabb_b) {
                    continue;
                }
                collide_recursive(
                    &child.shape,
                    child_pos,
                    child_rot,
                    sub_a.push(idx as u32, COMPOUND_CHILD_BITS),
                    shape_b,
                    pos_b,
                    rot_b,
                    sub_b,
                    tolerance,
                    edge_removal,
                    emit,
                );
            }
            return;
        }
        Shape::TriangleMesh(m) => {
            let aabb_b = shape_b.aabb(pos_b, rot_b);
            // Meshes are practically always static (identity world
            // transform relative to the body), but honor `pos_a`/`rot_a`
            // in case a mesh is attached under a `Compound`.
            let local_aabb_b = transform_aabb_into(&aabb_b, pos_a, rot_a);
            m.query_aabb(&local_aabb_b, |tri_index| {
                let triangle = &m.triangles()[tri_index as usize];
                if let Some(hit) = collide_triangle(triangle, pos_a, rot_a, shape_b, pos_b, rot_b, tolerance) {
                    if edge_removal && suppresses_via_inactive_edge(triangle, &hit) {
                        return;
                    }
                    let tri_sub = sub_a.push(tri_index, MESH_TRIANGLE_BITS);
                    let manifold = generate_manifold_triangle(triangle, pos_a, rot_a, shape_b, pos_b, rot_b, sub_b, &hit);
                    emit(tri_sub, sub_b, manifold);
                }
            });
            return;
        }
        _ => {}
    }

    match shape_b {
        Shape::Compound(_) | Shape::TriangleMesh(_) => {
            collide_recursive(shape_b, pos_b, rot_b, sub_b, shape_a, pos_a, rot_a, sub_a, tolerance, edge_removal, &mut |s_b, s_a, mut manifold| {
                manifold.normal = -manifold.normal;
                for p in manifold.points.iter_mut() {
                    std::mem::swap(&mut p.local_a, &mut p.local_b);
                }
                emit(s_a, s_b, manifold);
            });
            return;
        }
        _ => {}
    }

    if let Some(hit) = collide_leaf(shape_a, pos_a, rot_a, shape_b, pos_b, rot_b, tolerance) {
        let manifold = generate_manifold(shape_a, pos_a, rot_a, sub_a, shape_b, pos_b, rot_b, sub_b, &hit);
        emit(sub_a, sub_b, manifold);
    }
}

fn transform_aabb_into(aabb: &crate::math::Aabb3, pos: Vector3<f64>, rot: UnitQuaternion<f64>) -> crate::math::Aabb3 {
    // Conservative: express `aabb` (world space) back into the frame `pos`/
    // `rot` defines, by rotating the inverse and re-enclosing corners.
    let inv_rot = rot.inverse();
    let c = aabb.center() - pos;
    let e = aabb.half_extents();
    let mut result = crate::math::Aabb3::empty();
    for sx in [-1.0, 1.0] {
        for sy in [-1.0, 1.0] {
            for sz in [-1.0, 1.0] {
                let corner = c + Vector3::new(sx * e.x, sy * e.y, sz * e.z);
                result.encapsulate_point(inv_rot * corner);
            }
        }
    }
    result
}

/// Leaf-vs-leaf dispatch: convex-vs-convex goes through GJK/EPA; anything
/// involving a `Plane` uses the dedicated half-space routine since a plane
/// has no GJK support function.
fn collide_leaf(
    shape_a: &Shape,
    pos_a: Vector3<f64>,
    rot_a: UnitQuaternion<f64>,
    shape_b: &Shape,
    pos_b: Vector3<f64>,
    rot_b: UnitQuaternion<f64>,
    tolerance: f64,
) -> Option<ShapePairHit> {
    match (shape_a, shape_b) {
        (Shape::Empty, _) | (_, Shape::Empty) => None,
        (Shape::Plane(p), _) => collide_plane_convex(p, shape_b, pos_b, rot_b, tolerance),
        (_, Shape::Plane(p)) => collide_plane_convex(p, shape_a, pos_a, rot_a, tolerance).map(flip_hit),
        _ => collide::collide_convex(shape_a, pos_a, rot_a, shape_b, pos_b, rot_b, tolerance),
    }
}

fn flip_hit(hit: ShapePairHit) -> ShapePairHit {
    ShapePairHit { normal: -hit.normal, depth: hit.depth, point_a: hit.point_b, point_b: hit.point_a }
}

/// Half-space (`plane`, world-placed at identity — planes are static-only
/// in practice, spec.md §4.1) versus an arbitrary convex shape: finds the
/// deepest point of `shape_b` along `-plane.normal` and reports penetration
/// if it is behind the plane.
fn collide_plane_convex(plane: &Plane, shape_b: &Shape, pos_b: Vector3<f64>, rot_b: UnitQuaternion<f64>, tolerance: f64) -> Option<ShapePairHit> {
    let local_dir = rot_b.inverse() * (-plane.normal);
    let deepest_local = shape_b.support_point(local_dir, crate::shape::ConvexRadiusMode::IncludeConvexRadius);
    let deepest_world = pos_b + rot_b * deepest_local;
    let depth = plane.constant - deepest_world.dot(&plane.normal);
    if depth < -tolerance {
        return None;
    }
    let point_a = deepest_world + plane.normal * depth;
    Some(ShapePairHit { normal: plane.normal, depth, point_a, point_b: deepest_world })
}

/// GJK/EPA between a raw mesh triangle (not wrapped in `Shape`, since
/// triangles are never addressed except through their parent
/// `TriangleMesh`) and an arbitrary convex shape.
fn collide_triangle(
    triangle: &crate::shape::mesh::Triangle,
    pos_a: Vector3<f64>,
    rot_a: UnitQuaternion<f64>,
    shape_b: &Shape,
    pos_b: Vector3<f64>,
    rot_b: UnitQuaternion<f64>,
    tolerance: f64,
) -> Option<ShapePairHit> {
    use crate::collide::gjk::{gjk, ClosureSupport, GjkResult};

    let world_verts: [Vector3<f64>; 3] = [
        pos_a + rot_a * triangle.vertices[0],
        pos_a + rot_a * triangle.vertices[1],
        pos_a + rot_a * triangle.vertices[2],
    ];
    let support_a = |dir: Vector3<f64>| triangle_support(&world_verts, dir);
    let support_b = |dir: Vector3<f64>| {
        let local = rot_b.inverse() * dir;
        pos_b + rot_b * shape_b.support_point(local, crate::shape::ConvexRadiusMode::ExcludeConvexRadius)
    };
    let support = ClosureSupport { support_a: &support_a, support_b: &support_b };
    let radius_b = shape_b.convex_radius();

    match gjk(&support, Some(tolerance)) {
        GjkResult::Separated { distance, closest_a, closest_b } => {
            let gap = distance - radius_b;
            if gap > tolerance {
                return None;
            }
            let normal = if distance > 1e-9 { (closest_b - closest_a) / distance } else { triangle_normal(&world_verts) };
            Some(ShapePairHit { normal, depth: -gap, point_a: closest_a, point_b: closest_b - normal * radius_b })
        }
        GjkResult::Intersecting { simplex } => {
            let result = crate::collide::epa::epa(&support, &simplex);
            Some(ShapePairHit {
                normal: result.normal,
                depth: result.depth + radius_b,
                point_a: result.witness_a,
                point_b: result.witness_b - result.normal * radius_b,
            })
        }
    }
}

fn triangle_support(verts: &[Vector3<f64>; 3], dir: Vector3<f64>) -> Vector3<f64> {
    verts.iter().copied().max_by(|a, b| a.dot(&dir).partial_cmp(&b.dot(&dir)).unwrap()).unwrap()
}

fn triangle_normal(verts: &[Vector3<f64>; 3]) -> Vector3<f64> {
    (verts[1] - verts[0]).cross(&(verts[2] - verts[0])).normalize()
}

fn generate_manifold_triangle(
    triangle: &crate::shape::mesh::Triangle,
    pos_a: Vector3<f64>,
    rot_a: UnitQuaternion<f64>,
    shape_b: &Shape,
    pos_b: Vector3<f64>,
    rot_b: UnitQuaternion<f64>,
    sub_b: SubShapeId,
    hit: &ShapePairHit,
) -> Manifold {
    let world_face = vec![
        pos_a + rot_a * triangle.vertices[0],
        pos_a + rot_a * triangle.vertices[1],
        pos_a + rot_a * triangle.vertices[2],
    ];
    let local_dir_b = rot_b.inverse() * (-hit.normal);
    let face_b = shape_b.supporting_face(local_dir_b, sub_b);
    if face_b.len() >= 3 {
        let world_b: Vec<Vector3<f64>> = face_b.iter().map(|p| pos_b + rot_b * p).collect();
        collide::clip_faces_pub(&world_face, &world_b, hit.normal)
    } else {
        let mut points = smallvec::SmallVec::new();
        points.push(ManifoldPoint { local_a: hit.point_a, local_b: hit.point_b, depth: hit.depth });
        Manifold { normal: hit.normal, points }
    }
}

/// Approximates the "contact normal lies near the plane of an inactive
/// edge" rejection rule (spec.md §4.5): if the contact point sits close to
/// one of the triangle's edges and that edge is flagged inactive, and the
/// contact normal diverges from the triangle's own face normal (meaning the
/// generating shape is grazing the seam rather than the face itself), the
/// contact is suppressed.
fn suppresses_via_inactive_edge(triangle: &crate::shape::mesh::Triangle, hit: &ShapePairHit) -> bool {
    let face_normal = triangle.normal();
    if hit.normal.dot(&face_normal) > 0.999 {
        return false;
    }
    for edge in 0..3 {
        if triangle.edge_is_active(edge) {
            continue;
        }
        let a = triangle.vertices[edge];
        let b = triangle.vertices[(edge + 1) % 3];
        if point_segment_distance(hit.point_a, a, b) < EDGE_PROXIMITY {
            return true;
        }
    }
    false
}

fn point_segment_distance(p: Vector3<f64>, a: Vector3<f64>, b: Vector3<f64>) -> f64 {
    let ab = b - a;
    let len_sq = ab.norm_squared();
    if len_sq < 1e-18 {
        return (p - a).norm();
    }
    let t = ((p - a).dot(&ab) / len_sq).clamp(0.0, 1.0);
    (p - (a + ab * t)).norm()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::{BodySettings, MotionType};
    use crate::listener::NullContactListener;
    use crate::shape::Shape;

    #[test]
    fn sphere_on_plane_creates_a_contact() {
        let mut bodies = BodyPool::new();
        let floor = bodies
            .create(BodySettings {
                shape: Shape::plane(Vector3::y(), 0.0, 10.0).unwrap(),
                motion_type: MotionType::Static,
                ..Default::default()
            })
            .unwrap();
        let ball = bodies
            .create(BodySettings {
                shape: Shape::sphere(1.0).unwrap(),
                motion_type: MotionType::Dynamic,
                position: Vector3::new(0.0, 0.5, 0.0),
                ..Default::default()
            })
            .unwrap();

        let mut contacts = ContactCache::new();
        let mut listener = NullContactListener;
        let settings = SolverSettings::default();
        let stats = run(&mut bodies, &mut contacts, &mut listener, &settings, &[(floor, ball)]);
        assert_eq!(stats.contacts_created, 1);
        assert_eq!(contacts.len(), 1);
    }

    #[test]
    fn separated_spheres_create_no_contact() {
        let mut bodies = BodyPool::new();
        let a = bodies.create(BodySettings { shape: Shape::sphere(1.0).unwrap(), motion_type: MotionType::Dynamic, ..Default::default() }).unwrap();
        let b = bodies
            .create(BodySettings {
                shape: Shape::sphere(1.0).unwrap(),
                motion_type: MotionType::Dynamic,
                position: Vector3::new(10.0, 0.0, 0.0),
                ..Default::default()
            })
            .unwrap();
        let mut contacts = ContactCache::new();
        let mut listener = NullContactListener;
        let settings = SolverSettings::default();
        let stats = run(&mut bodies, &mut contacts, &mut listener, &settings, &[(a, b)]);
        assert_eq!(stats.contacts_created, 0);
    }

    #[test]
    fn persisted_contact_warm_starts_from_prior_impulse() {
        let mut bodies = BodyPool::new();
        let floor = bodies
            .create(BodySettings { shape: Shape::plane(Vector3::y(), 0.0, 10.0).unwrap(), motion_type: MotionType::Static, ..Default::default() })
            .unwrap();
        let ball = bodies
            .create(BodySettings { shape: Shape::sphere(1.0).unwrap(), motion_type: MotionType::Dynamic, position: Vector3::new(0.0, 0.5, 0.0), ..Default::default() })
            .unwrap();
        let mut contacts = ContactCache::new();
        let mut listener = NullContactListener;
        let settings = SolverSettings::default();
        run(&mut bodies, &mut contacts, &mut listener, &settings, &[(floor, ball)]);
        let index = contacts.find(floor, SubShapeId::EMPTY, ball, SubShapeId::EMPTY).unwrap();
        contacts.get_mut(index).unwrap().points[0].normal_impulse = 42.0;

        let stats = run(&mut bodies, &mut contacts, &mut listener, &settings, &[(floor, ball)]);
        assert_eq!(stats.contacts_persisted, 1);
        let index = contacts.find(floor, SubShapeId::EMPTY, ball, SubShapeId::EMPTY).unwrap();
        assert_eq!(contacts.get(index).unwrap().points[0].normal_impulse, 42.0);
    }
}
