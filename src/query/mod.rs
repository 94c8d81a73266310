//! The read-only query layer: `cast_ray`, `cast_shape`, `collide_shape`,
//! `collide_point`, plus `collide_shape_with_internal_edge_removal`. Each
//! takes a [`Collector`], the query shape/transform, and a
//! [`QueryFilter`] (spec.md §6).
//!
//! A thin driver that walks every candidate a broadphase query yields and
//! hands precise shape-vs-shape results to a caller-supplied collector,
//! built on `crate::collide`'s cast/collide primitives, which already do all
//! the actual GJK/EPA work; this module only adds body-level bookkeeping
//! (filtering by layer/group, tagging hits with the struck `BodyId`) on
//! top of them.

use crate::body::{BodyId, BodyPool};
use crate::broadphase::{BroadPhaseTree, CollisionGroupFilter, ObjectLayerId, QueryFilter};
use crate::collide::{self, Collector, Hit};
use crate::math::Aabb3;
use crate::shape::{ConvexRadiusMode, Shape, SubShapeId};
use nalgebra::{UnitQuaternion, Vector3};

/// Settings shared by every shape-based query (cast or static collide).
#[derive(Debug, Clone, Copy)]
pub struct QuerySettings {
    /// Distance tolerance passed through to GJK/EPA (spec.md §4.2).
    pub collision_tolerance: f64,
    /// If set, a cast treats the moving shape as shrunk to its convex core
    /// and re-inflates by the convex radius only at the very end (spec.md
    /// §9 open question — preserved as a settable flag, not resolved).
    pub use_shrunken_shape_and_convex_radius: bool,
    /// If set, a `TriangleMesh` query only considers triangle edges marked
    /// active (non-internal); used by ordinary shape casts. The KCC's
    /// internal-edge-removal entry point below forces this off.
    pub collide_only_with_active_edges: bool,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            collision_tolerance: 1.0e-4,
            use_shrunken_shape_and_convex_radius: false,
            collide_only_with_active_edges: true,
        }
    }
}

fn world_aabb_for(shape: &Shape, position: Vector3<f64>, rotation: UnitQuaternion<f64>) -> Aabb3 {
    shape.aabb(position, rotation)
}

fn body_passes(bodies: &BodyPool, id: BodyId, filter: &dyn QueryFilter) -> bool {
    let Some(body) = bodies.get(id) else { return false };
    if body.pooled || body.sensor {
        return false;
    }
    filter.allows(body.object_layer, body.collision_filter)
}

/// Casts a ray from `origin` along `direction` (not required to be unit
/// length; `direction`'s length is the ray's maximum length) against every
/// body in `trees`, reporting every hit that passes `filter` to `collector`.
pub fn cast_ray(trees: &[BroadPhaseTree], bodies: &BodyPool, origin: Vector3<f64>, direction: Vector3<f64>, settings: &QuerySettings, filter: &dyn QueryFilter, collector: &mut dyn Collector) {
    for tree in trees {
        if collector.should_early_out() {
            return;
        }
        tree.cast_ray(origin, direction, |bits| {
            if collector.should_early_out() {
                return;
            }
            let id = BodyId::from_bits(bits);
            if !body_passes(bodies, id, filter) { return; }
            let Some(body) = bodies.get(id) else { return };
            if let Some(shape_hit) = collide::raycast(origin, direction, &body.shape, body.position, body.rotation, settings.collision_tolerance) {
                let fraction = ray_fraction(origin, direction, shape_hit.point_b);
                collector.add_hit(Hit {
                    point_a: shape_hit.point_a,
                    point_b: shape_hit.point_b,
                    normal: shape_hit.normal,
                    depth: shape_hit.depth,
                    fraction,
                    sub_shape_a: SubShapeId::EMPTY,
                    sub_shape_b: SubShapeId::EMPTY,
                    body: Some(id),
                });
            }
        });
    }
}

fn ray_fraction(origin: Vector3<f64>, direction: Vector3<f64>, point: Vector3<f64>) -> f64 {
    let len_sq = direction.norm_squared();
    if len_sq <= 1e-18 {
        return 0.0;
    }
    ((point - origin).dot(&direction) / len_sq).clamp(0.0, 1.0)
}

/// Casts `shape` (placed at `start_position`/`rotation`) along `displacement`
/// against every body in `trees`, reporting every hit that passes `filter`.
pub fn cast_shape(
    trees: &[BroadPhaseTree],
    bodies: &BodyPool,
    shape: &Shape,
    start_position: Vector3<f64>,
    rotation: UnitQuaternion<f64>,
    displacement: Vector3<f64>,
    settings: &QuerySettings,
    filter: &dyn QueryFilter,
    collector: &mut dyn Collector,
) {
    let swept = world_aabb_for(shape, start_position, rotation).swept(displacement);
    for tree in trees {
        if collector.should_early_out() {
            return;
        }
        tree.cast_aabb(&swept, displacement, |bits| {
            if collector.should_early_out() {
                return;
            }
            let id = BodyId::from_bits(bits);
            if !body_passes(bodies, id, filter) { return; }
            let Some(body) = bodies.get(id) else { return };
            if let Some(shape_hit) = collide::shape_cast(shape, start_position, rotation, displacement, &body.shape, body.position, body.rotation, settings.collision_tolerance) {
                let fraction = ray_fraction(start_position, displacement, shape_hit.point_a);
                collector.add_hit(Hit {
                    point_a: shape_hit.point_a,
                    point_b: shape_hit.point_b,
                    normal: shape_hit.normal,
                    depth: shape_hit.depth,
                    fraction,
                    sub_shape_a: SubShapeId::EMPTY,
                    sub_shape_b: SubShapeId::EMPTY,
                    body: Some(id),
                });
            }
        });
    }
}

/// Static overlap query: finds every body whose shape overlaps `shape`
/// placed at `position`/`rotation`, with zero displacement.
pub fn collide_shape(trees: &[BroadPhaseTree], bodies: &BodyPool, shape: &Shape, position: Vector3<f64>, rotation: UnitQuaternion<f64>, settings: &QuerySettings, filter: &dyn QueryFilter, collector: &mut dyn Collector) {
    let aabb = world_aabb_for(shape, position, rotation);
    for tree in trees {
        if collector.should_early_out() {
            return;
        }
        tree.intersect_aabb(&aabb, |bits| {
            if collector.should_early_out() {
                return;
            }
            let id = BodyId::from_bits(bits);
            if !body_passes(bodies, id, filter) { return; }
            let Some(body) = bodies.get(id) else { return };
            if let Some(shape_hit) = collide::collide_convex(shape, position, rotation, &body.shape, body.position, body.rotation, settings.collision_tolerance) {
                collector.add_hit(Hit {
                    point_a: shape_hit.point_a,
                    point_b: shape_hit.point_b,
                    normal: shape_hit.normal,
                    depth: shape_hit.depth,
                    fraction: 0.0,
                    sub_shape_a: SubShapeId::EMPTY,
                    sub_shape_b: SubShapeId::EMPTY,
                    body: Some(id),
                });
            }
        });
    }
}

/// Point-in-shape query: finds every body whose shape contains `point`,
/// modeled as `collide_shape` with a zero-radius sphere (the usual way a
/// point query is expressed against a GJK-based collide routine, since a
/// lone point has no face/edge to test against directly).
pub fn collide_point(trees: &[BroadPhaseTree], bodies: &BodyPool, point: Vector3<f64>, settings: &QuerySettings, filter: &dyn QueryFilter, collector: &mut dyn Collector) {
    let point_shape = Shape::Sphere(crate::shape::Sphere { radius: 0.0 });
    collide_shape(trees, bodies, &point_shape, point, UnitQuaternion::identity(), settings, filter, collector);
}

/// Same as [`collide_shape`], but forces `collect_only_active_edges = false`
/// (the KCC needs every triangle edge considered, active or not, so a
/// sliding contact against a mesh seam is never silently dropped) — this
/// override is deliberate and preserved from the reference implementation
/// rather than resolved away (spec.md §9).
pub fn collide_shape_with_internal_edge_removal(
    trees: &[BroadPhaseTree],
    bodies: &BodyPool,
    shape: &Shape,
    position: Vector3<f64>,
    rotation: UnitQuaternion<f64>,
    settings: &QuerySettings,
    filter: &dyn QueryFilter,
    collector: &mut dyn Collector,
) {
    let forced = QuerySettings { collide_only_with_active_edges: false, ..*settings };
    collide_shape(trees, bodies, shape, position, rotation, &forced, filter, collector);
}

/// Supporting-point-in-a-direction helper for the KCC's plane-constraint
/// construction: the deepest point of `shape` along `direction`, including
/// convex radius, in world space.
pub fn deepest_point(shape: &Shape, position: Vector3<f64>, rotation: UnitQuaternion<f64>, direction: Vector3<f64>) -> Vector3<f64> {
    let local = rotation.inverse() * direction;
    position + rotation * shape.support_point(local, ConvexRadiusMode::IncludeConvexRadius)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::{BodyPool, BodySettings, MotionType};
    use crate::broadphase::{BroadPhaseLayerId, DefaultQueryFilter, LayerTable};
    use crate::collide::ClosestHitCollector;
    use std::collections::HashSet;

    fn one_layer_setup() -> (LayerTable, ObjectLayerId, BroadPhaseLayerId) {
        let mut layers = LayerTable::default();
        let bp = layers.add_broadphase_layer();
        let layer = layers.add_object_layer(bp).unwrap();
        layers.enable_collision(layer, layer).unwrap();
        (layers, layer, bp)
    }

    #[test]
    fn cast_ray_hits_a_sphere() {
        let (layers, layer, bp) = one_layer_setup();
        let mut bodies = BodyPool::new();
        let id = bodies
            .create(BodySettings { shape: Shape::sphere(1.0).unwrap(), motion_type: MotionType::Static, object_layer: layer, position: Vector3::new(5.0, 0.0, 0.0), ..Default::default() })
            .unwrap();
        let mut tree = BroadPhaseTree::new();
        let body = bodies.get(id).unwrap();
        tree.insert(body.world_aabb(), id.to_bits());
        let trees = [tree];

        let filter = DefaultQueryFilter { layers: &layers, query_layer: layer, query_groups: CollisionGroupFilter::default(), exclude: HashSet::new() };
        let mut collector = ClosestHitCollector::default();
        cast_ray(&trees, &bodies, Vector3::zeros(), Vector3::new(20.0, 0.0, 0.0), &QuerySettings::default(), &filter, &mut collector);

        let hit = collector.hit.expect("ray should hit the sphere");
        assert_eq!(hit.body, Some(id));
        assert!((hit.point_a.x - 4.0).abs() < 0.1, "expected to hit near x=4, got {hit:?}");
        let _ = bp;
    }

    #[test]
    fn collide_shape_finds_overlapping_body() {
        let (layers, layer, _bp) = one_layer_setup();
        let mut bodies = BodyPool::new();
        let id = bodies.create(BodySettings { shape: Shape::sphere(1.0).unwrap(), motion_type: MotionType::Static, object_layer: layer, position: Vector3::zeros(), ..Default::default() }).unwrap();
        let mut tree = BroadPhaseTree::new();
        let body = bodies.get(id).unwrap();
        tree.insert(body.world_aabb(), id.to_bits());
        let trees = [tree];

        let filter = DefaultQueryFilter { layers: &layers, query_layer: layer, query_groups: CollisionGroupFilter::default(), exclude: HashSet::new() };
        let mut collector = crate::collide::AllHitsCollector::default();
        let probe = Shape::sphere(0.5).unwrap();
        collide_shape(&trees, &bodies, &probe, Vector3::new(1.0, 0.0, 0.0), UnitQuaternion::identity(), &QuerySettings::default(), &filter, &mut collector);
        assert_eq!(collector.hits.len(), 1);
    }
}
