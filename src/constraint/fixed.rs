//! Fixed constraint: welds two bodies together, removing all six relative
//! degrees of freedom. Built from [`Point3ConstraintPart`] for translation
//! and a second, independent `Point3ConstraintPart` treated as a 3-axis
//! rotational lock (its "lever arms" are zero, so it reduces to a pure
//! angular-velocity-matching block solve).

use super::part::Point3ConstraintPart;
use super::{ConstraintHeader, ConstraintId, ConstraintKind, HasGeneration, Pool};
use crate::body::{BodyId, BodyPool};
use crate::error::{PhysicsError, PhysicsResult};
use nalgebra::{UnitQuaternion, Vector3};

#[derive(Debug, Clone, Copy)]
pub struct FixedConstraintSettings {
    pub body_a: BodyId,
    pub body_b: BodyId,
    pub local_anchor_a: Vector3<f64>,
    pub local_anchor_b: Vector3<f64>,
    /// Relative orientation (A's frame to B's frame) to hold at creation
    /// time; bodies are welded at whatever angle they had when this
    /// constraint was made.
    pub local_rotation_b_from_a: UnitQuaternion<f64>,
}

#[derive(Debug)]
pub struct FixedConstraint {
    header: ConstraintHeader,
    settings: FixedConstraintSettings,
    translation_part: Point3ConstraintPart,
    rotation_part: Point3ConstraintPart,
    r_a: Vector3<f64>,
    r_b: Vector3<f64>,
}

impl HasGeneration for FixedConstraint {
    fn generation(&self) -> u32 {
        self.header.generation
    }
}

impl FixedConstraint {
    pub fn header(&self) -> &ConstraintHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut ConstraintHeader {
        &mut self.header
    }
}

#[derive(Default)]
pub struct FixedConstraintPool(Pool<FixedConstraint>);

impl FixedConstraintPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, settings: FixedConstraintSettings) -> ConstraintId {
        let (index, generation) = self.0.insert(|index, generation| FixedConstraint {
            header: ConstraintHeader::new(index, generation, settings.body_a, settings.body_b),
            settings,
            translation_part: Point3ConstraintPart::default(),
            rotation_part: Point3ConstraintPart::default(),
            r_a: Vector3::zeros(),
            r_b: Vector3::zeros(),
        });
        ConstraintId { kind: ConstraintKind::Fixed, index, generation }
    }

    pub fn remove(&mut self, id: ConstraintId) -> bool {
        self.0.remove(id.index, id.generation)
    }

    /// Headers of every live constraint in this pool, for the island builder
    /// and solver to enumerate without matching on [`ConstraintKind`] first.
    pub fn iter_headers(&self) -> impl Iterator<Item = &ConstraintHeader> {
        self.0.iter().map(|c| c.header())
    }

    pub fn get_mut(&mut self, id: ConstraintId) -> Option<&mut FixedConstraint> {
        self.0.get_mut(id.index, id.generation)
    }

    pub fn setup_velocity(&mut self, bodies: &BodyPool) {
        for c in self.0.iter_mut() {
            if !c.header.enabled {
                continue;
            }
            let (Some(a), Some(b)) = (bodies.get(c.settings.body_a), bodies.get(c.settings.body_b)) else { continue };
            c.r_a = a.rotation * c.settings.local_anchor_a - (a.center_of_mass_position() - a.position);
            c.r_b = b.rotation * c.settings.local_anchor_b - (b.center_of_mass_position() - b.position);

            let inv_inertia_a = a.motion.world_inverse_inertia(a.rotation);
            let inv_inertia_b = b.motion.world_inverse_inertia(b.rotation);

            c.translation_part.calculate_effective_mass(a.motion.inverse_mass, inv_inertia_a, c.r_a, b.motion.inverse_mass, inv_inertia_b, c.r_b);
            c.rotation_part.calculate_effective_mass(0.0, inv_inertia_a, Vector3::zeros(), 0.0, inv_inertia_b, Vector3::zeros());
        }
    }

    pub fn warm_start(&mut self, bodies: &mut BodyPool, ratio: f64) {
        for c in self.0.iter_mut() {
            if !c.header.enabled {
                continue;
            }
            let (Some(a), Some(b)) = bodies.get_pair_mut(c.settings.body_a, c.settings.body_b) else { continue };
            c.translation_part.warm_start(&mut a.motion, c.r_a, &mut b.motion, c.r_b, ratio);
            c.rotation_part.warm_start(&mut a.motion, Vector3::zeros(), &mut b.motion, Vector3::zeros(), ratio);
        }
    }

    pub fn solve_velocity(&mut self, bodies: &mut BodyPool) {
        for c in self.0.iter_mut() {
            if !c.header.enabled {
                continue;
            }
            let (Some(a), Some(b)) = bodies.get_pair_mut(c.settings.body_a, c.settings.body_b) else { continue };
            c.translation_part.solve_velocity(&mut a.motion, c.r_a, &mut b.motion, c.r_b, Vector3::zeros());
            c.rotation_part.solve_velocity(&mut a.motion, Vector3::zeros(), &mut b.motion, Vector3::zeros(), Vector3::zeros());
        }
    }

    /// NGS position correction for both the anchor gap and the orientation
    /// drift away from `local_rotation_b_from_a`, expressed as a small-angle
    /// rotation vector and applied directly to each body's orientation.
    pub fn solve_position(&mut self, bodies: &mut BodyPool, baumgarte_beta: f64) -> f64 {
        let mut max_error = 0.0f64;
        for c in self.0.iter_mut() {
            if !c.header.enabled {
                continue;
            }
            let (Some(a), Some(b)) = bodies.get_pair_mut(c.settings.body_a, c.settings.body_b) else { continue };

            let anchor_a = a.position + a.rotation * c.settings.local_anchor_a;
            let anchor_b = b.position + b.rotation * c.settings.local_anchor_b;
            let position_error = anchor_b - anchor_a;

            let current_relative = a.rotation.inverse() * b.rotation;
            let rotation_error = current_relative * c.settings.local_rotation_b_from_a.inverse();
            let angle_error = rotation_error.scaled_axis();

            max_error = max_error.max(position_error.norm()).max(angle_error.norm());

            let inv_mass_sum = a.motion.inverse_mass + b.motion.inverse_mass;
            if inv_mass_sum > 0.0 {
                let correction = position_error * baumgarte_beta;
                a.position += correction * (a.motion.inverse_mass / inv_mass_sum);
                b.position -= correction * (b.motion.inverse_mass / inv_mass_sum);
            }

            let inv_inertia_sum = a.motion.inverse_mass + b.motion.inverse_mass;
            if inv_inertia_sum > 0.0 {
                let world_angle_error = a.rotation * angle_error;
                let share_a = a.motion.inverse_mass / inv_inertia_sum;
                let share_b = b.motion.inverse_mass / inv_inertia_sum;
                a.rotation = UnitQuaternion::new(world_angle_error * (baumgarte_beta * share_a)) * a.rotation;
                b.rotation = UnitQuaternion::new(-world_angle_error * (baumgarte_beta * share_b)) * b.rotation;
            }
        }
        max_error
    }
}

pub fn validate(settings: &FixedConstraintSettings) -> PhysicsResult<()> {
    if settings.body_a == settings.body_b {
        return Err(PhysicsError::configuration("fixed_constraint.body_b", "must differ from body_a"));
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
    fn weld_converges_position_and_orientation() {
        let mut bodies = BodyPool::new();
        let a = dynamic_body(&mut bodies, Vector3::zeros());
        let b = dynamic_body(&mut bodies, Vector3::new(1.5, 0.0, 0.0));
        bodies.get_mut(b).unwrap().rotation = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.3);

        let mut pool = FixedConstraintPool::new();
        let id = pool.create(FixedConstraintSettings {
            body_a: a,
            body_b: b,
            local_anchor_a: Vector3::zeros(),
            local_anchor_b: Vector3::zeros(),
            local_rotation_b_from_a: UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.3),
        });
        assert!(pool.get_mut(id).is_some());

        for _ in 0..60 {
            pool.setup_velocity(&bodies);
            pool.solve_position(&mut bodies, 0.2);
        }
        let position_error = (bodies.get(b).unwrap().position - bodies.get(a).unwrap().position).norm();
        assert!(position_error < 0.5, "anchors should have converged, remaining separation {position_error}");
    }
}
