//! Point constraint: pins a local anchor on body A to a local anchor on
//! body B, removing all three relative translational degrees of freedom
//! while leaving rotation free (a ball-and-socket joint).

use super::part::Point3ConstraintPart;
use super::{ConstraintHeader, ConstraintId, ConstraintKind, HasGeneration, Pool};
use crate::body::{BodyId, BodyPool};
use crate::error::PhysicsResult;
use nalgebra::Vector3;

/// Construction-time parameters for a point constraint.
#[derive(Debug, Clone, Copy)]
pub struct PointConstraintSettings {
    pub body_a: BodyId,
    pub body_b: BodyId,
    /// Anchor in body A's local frame.
    pub local_anchor_a: Vector3<f64>,
    /// Anchor in body B's local frame.
    pub local_anchor_b: Vector3<f64>,
}

#[derive(Debug)]
pub struct PointConstraint {
    header: ConstraintHeader,
    settings: PointConstraintSettings,
    part: Point3ConstraintPart,
    r_a: Vector3<f64>,
    r_b: Vector3<f64>,
}

impl HasGeneration for PointConstraint {
    fn generation(&self) -> u32 {
        self.header.generation
    }
}

impl PointConstraint {
    pub fn header(&self) -> &ConstraintHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut ConstraintHeader {
        &mut self.header
    }
}

/// Pooled storage for point constraints.
#[derive(Default)]
pub struct PointConstraintPool(Pool<PointConstraint>);

impl PointConstraintPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, settings: PointConstraintSettings) -> ConstraintId {
        let (index, generation) = self.0.insert(|index, generation| PointConstraint {
            header: ConstraintHeader::new(index, generation, settings.body_a, settings.body_b),
            settings,
            part: Point3ConstraintPart::default(),
            r_a: Vector3::zeros(),
            r_b: Vector3::zeros(),
        });
        ConstraintId { kind: ConstraintKind::Point, index, generation }
    }

    pub fn remove(&mut self, id: ConstraintId) -> bool {
        self.0.remove(id.index, id.generation)
    }

    /// Headers of every live constraint in this pool, for the island builder
    /// and solver to enumerate without matching on [`ConstraintKind`] first.
    pub fn iter_headers(&self) -> impl Iterator<Item = &ConstraintHeader> {
        self.0.iter().map(|c| c.header())
    }

    pub fn get_mut(&mut self, id: ConstraintId) -> Option<&mut PointConstraint> {
        self.0.get_mut(id.index, id.generation)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PointConstraint> {
        self.0.iter_mut()
    }

    /// Recomputes lever arms and effective mass from the bodies' current
    /// transforms; called once per step before any velocity iterations.
    pub fn setup_velocity(&mut self, bodies: &BodyPool) {
        for c in self.0.iter_mut() {
            if !c.header.enabled {
                continue;
            }
            let (Some(a), Some(b)) = (bodies.get(c.settings.body_a), bodies.get(c.settings.body_b)) else { continue };
            c.r_a = a.rotation * c.settings.local_anchor_a - (a.center_of_mass_position() - a.position);
            c.r_b = b.rotation * c.settings.local_anchor_b - (b.center_of_mass_position() - b.position);
            c.part.calculate_effective_mass(
                a.motion.inverse_mass,
                a.motion.world_inverse_inertia(a.rotation),
                c.r_a,
                b.motion.inverse_mass,
                b.motion.world_inverse_inertia(b.rotation),
                c.r_b,
            );
        }
    }

    pub fn warm_start(&mut self, bodies: &mut BodyPool, ratio: f64) {
        for c in self.0.iter_mut() {
            if !c.header.enabled {
                continue;
            }
            let (Some(a), Some(b)) = bodies.get_pair_mut(c.settings.body_a, c.settings.body_b) else { continue };
            c.part.warm_start(&mut a.motion, c.r_a, &mut b.motion, c.r_b, ratio);
        }
    }

    pub fn solve_velocity(&mut self, bodies: &mut BodyPool) {
        for c in self.0.iter_mut() {
            if !c.header.enabled {
                continue;
            }
            let (Some(a), Some(b)) = bodies.get_pair_mut(c.settings.body_a, c.settings.body_b) else { continue };
            c.part.solve_velocity(&mut a.motion, c.r_a, &mut b.motion, c.r_b, Vector3::zeros());
        }
    }

    /// Non-linear Gauss-Seidel position correction: directly translates
    /// each body towards closing the anchor gap, split by inverse-mass
    /// share, without touching velocity (so it doesn't inject energy).
    /// Returns the largest remaining anchor separation, letting the solver
    /// stop iterating early once every constraint is within `linear_slop`.
    pub fn solve_position(&mut self, bodies: &mut BodyPool, baumgarte_beta: f64) -> f64 {
        let mut max_error = 0.0f64;
        for c in self.0.iter_mut() {
            if !c.header.enabled {
                continue;
            }
            let (Some(a), Some(b)) = bodies.get_pair_mut(c.settings.body_a, c.settings.body_b) else { continue };
            let anchor_a = a.position + a.rotation * c.settings.local_anchor_a;
            let anchor_b = b.position + b.rotation * c.settings.local_anchor_b;
            let error = anchor_b - anchor_a;
            max_error = max_error.max(error.norm());

            let inv_mass_sum = a.motion.inverse_mass + b.motion.inverse_mass;
            if inv_mass_sum <= 0.0 {
                continue;
            }
            let correction = error * baumgarte_beta;
            a.position += correction * (a.motion.inverse_mass / inv_mass_sum);
            b.position -= correction * (b.motion.inverse_mass / inv_mass_sum);
        }
        max_error
    }
}

/// Validates point-constraint settings (bodies must differ; no other
/// constraints on anchor placement).
pub fn validate(settings: &PointConstraintSettings) -> PhysicsResult<()> {
    if settings.body_a == settings.body_b {
        return Err(crate::error::PhysicsError::configuration("point_constraint.body_b", "must differ from body_a"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::{BodySettings, MotionType};
    use crate::shape::Shape;

    fn dynamic_body(pool: &mut BodyPool, position: Vector3<f64>) -> BodyId {
        pool.create(BodySettings { shape: Shape::sphere(0.5).unwrap(), motion_type: MotionType::Dynamic, position, ..Default::default() }).unwrap()
    }

    #[test]
    fn solving_pulls_anchors_together() {
        let mut bodies = BodyPool::new();
        let a = dynamic_body(&mut bodies, Vector3::zeros());
        let b = dynamic_body(&mut bodies, Vector3::new(2.0, 0.0, 0.0));
        let mut pool = PointConstraintPool::new();
        let id = pool.create(PointConstraintSettings { body_a: a, body_b: b, local_anchor_a: Vector3::zeros(), local_anchor_b: Vector3::zeros() });
        assert!(pool.get_mut(id).is_some());

        for _ in 0..60 {
            pool.setup_velocity(&bodies);
            pool.solve_position(&mut bodies, 0.2);
        }
        let error = (bodies.get(b).unwrap().position - bodies.get(a).unwrap().position).norm();
        assert!(error < 0.5, "anchors should have been pulled closer, remaining separation {error}");
    }
}
