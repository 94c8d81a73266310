//! Continuous collision detection: a linear-cast sub-pass for bodies whose
//! swept displacement this step would otherwise tunnel through thin
//! geometry, run between velocity integration and the discrete narrowphase.
//!
//! Grounded on spec.md §4.9. Implementation is a thin driver over
//! `crate::collide::shape_cast` against the broadphase's swept-AABB query,
//! clamping the body's position to the time of impact and seeding a
//! `created_by_ccd` contact so the ordinary narrowphase/solver pick it up
//! next step without special-casing CCD contacts anywhere else.

use crate::body::{BodyId, BodyPool, CombineMode, MotionQuality, MotionType};
use crate::broadphase::BroadPhaseTree;
use crate::collide::shape_cast;
use crate::config::CcdSettings;
use crate::contact::ContactCache;
use crate::shape::SubShapeId;
use nalgebra::Vector3;

/// Aggregate counters for one CCD sub-pass, folded into `StepStats`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CcdStats {
    pub bodies_cast: u32,
    pub hits: u32,
}

/// Runs the CCD sub-pass: for every `LinearCast` dynamic body whose
/// displacement this step exceeds `threshold * min_half_extent`, casts its
/// shape along the displacement against every tree in `trees`, clamps its
/// position to the earliest time of impact, and (if a hit occurred) seeds a
/// contact so the following narrowphase/solver see it immediately.
///
/// Kinematic and static bodies are never advanced by this pass (spec.md
/// §4.9) — they are only ever the *target* of another body's cast, which
/// happens naturally since they are left in the broadphase at their
/// already-integrated position.
pub fn run(bodies: &mut BodyPool, contacts: &mut ContactCache, trees: &[BroadPhaseTree], settings: &CcdSettings, dt: f64, tolerance: f64, candidates: &[BodyId]) -> CcdStats {
    let mut stats = CcdStats::default();

    for &id in candidates {
        let Some(body) = bodies.get(id) else { continue };
        if !matches!(body.motion_type, MotionType::Dynamic) || !matches!(body.motion.motion_quality, MotionQuality::LinearCast) {
            continue;
        }
        let displacement = body.motion.linear_velocity * dt;
        let half_extent = min_half_extent(body);
        if displacement.norm() <= settings.linear_cast_threshold * half_extent {
            continue;
        }
        stats.bodies_cast += 1;

        let start_pos = body.position;
        let rot = body.rotation;
        let shape = body.shape.clone();
        let self_id = body.id;

        let mut best: Option<(f64, BodyId, Vector3<f64>)> = None;
        let swept_aabb = {
            let aabb0 = shape.aabb(start_pos, rot);
            aabb0.swept(displacement)
        };
        for tree in trees {
            tree.intersect_aabb(&swept_aabb, |user_data| {
                let other_id = BodyId::from_bits(user_data);
                if other_id.index == self_id.index {
                    return;
                }
                let Some(other) = bodies.get(other_id) else { return };
                if other.pooled {
                    return;
                }
                if let Some(hit) = shape_cast(&shape, start_pos, rot, displacement, &other.shape, other.position, other.rotation, tolerance) {
                    let fraction = hit_fraction(start_pos, displacement, hit.point_a);
                    if best.map(|(f, _, _)| fraction < f).unwrap_or(true) {
                        best = Some((fraction, other_id, hit.normal));
                    }
                }
            });
        }

        if let Some((fraction, other_id, normal)) = best {
            stats.hits += 1;
            let clamped_fraction = (fraction - settings.penetration_tolerance / displacement.norm().max(1e-9)).clamp(0.0, 1.0);
            if let Some(body) = bodies.get_mut(self_id) {
                body.position = start_pos + displacement * clamped_fraction;
            }
            let (friction, restitution) = match (bodies.get(self_id), bodies.get(other_id)) {
                (Some(a), Some(b)) => (
                    CombineMode::combine(a.material.friction, b.material.friction, a.material.friction_combine, b.material.friction_combine),
                    CombineMode::combine(a.material.restitution, b.material.restitution, a.material.restitution_combine, b.material.restitution_combine),
                ),
                _ => (0.2, 0.0),
            };
            let index = contacts.create(bodies, self_id, SubShapeId::EMPTY, other_id, SubShapeId::EMPTY, false);
            if let Some(contact) = contacts.get_mut(index) {
                contact.created_by_ccd = true;
                contact.normal_local_b = if let Some(other) = bodies.get(other_id) { other.rotation.inverse() * normal } else { normal };
                contact.friction = friction;
                contact.restitution = restitution;
            }
        }
    }

    stats
}

fn min_half_extent(body: &crate::body::Body) -> f64 {
    let aabb = body.shape.aabb_identity();
    let extents = aabb.half_extents();
    extents.x.min(extents.y).min(extents.z).max(1e-6)
}

fn hit_fraction(start: Vector3<f64>, displacement: Vector3<f64>, point: Vector3<f64>) -> f64 {
    let len = displacement.norm();
    if len <= 1e-12 {
        return 0.0;
    }
    ((point - start).dot(&displacement) / (len * len)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::{BodySettings, MotionQuality, MotionType};
    use crate::broadphase::ObjectLayerId;
    use crate::shape::Shape;

    #[test]
    fn slow_bodies_are_skipped() {
        let mut bodies = BodyPool::new();
        let id = bodies
            .create(BodySettings { shape: Shape::sphere(0.5).unwrap(), motion_type: MotionType::Dynamic, motion_quality: MotionQuality::LinearCast, object_layer: ObjectLayerId(0), ..Default::default() })
            .unwrap();
        let mut contacts = ContactCache::new();
        let settings = CcdSettings::default();
        let stats = run(&mut bodies, &mut contacts, &[], &settings, 1.0 / 60.0, 1e-4, &[id]);
        assert_eq!(stats.bodies_cast, 0);
    }
}
