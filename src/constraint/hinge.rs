//! Hinge constraint: pins an anchor point (like [`super::point`]) and locks
//! every rotation except spin about a single hinge axis, optionally limited
//! or driven by a motor along that axis.

use super::part::{AxisConstraintPart, Point3ConstraintPart};
use super::{ConstraintHeader, ConstraintId, ConstraintKind, HasGeneration, Pool};
use crate::body::{BodyId, BodyPool};
use crate::error::{PhysicsError, PhysicsResult};
use nalgebra::Vector3;

#[derive(Debug, Clone, Copy)]
pub struct HingeConstraintSettings {
    pub body_a: BodyId,
    pub body_b: BodyId,
    pub local_anchor_a: Vector3<f64>,
    pub local_anchor_b: Vector3<f64>,
    /// Hinge axis in body A's local frame.
    pub local_axis_a: Vector3<f64>,
    /// Matching hinge axis in body B's local frame.
    pub local_axis_b: Vector3<f64>,
    /// Limits on rotation about the hinge axis, in radians.
    pub limits: Option<(f64, f64)>,
    pub motor: Option<HingeMotor>,
}

#[derive(Debug, Clone, Copy)]
pub struct HingeMotor {
    pub target_velocity: f64,
    pub max_torque: f64,
}

#[derive(Debug)]
pub struct HingeConstraint {
    header: ConstraintHeader,
    settings: HingeConstraintSettings,
    point_part: Point3ConstraintPart,
    /// Locks rotation about the two axes perpendicular to the hinge axis.
    perp_parts: [AxisConstraintPart; 2],
    axis_part: AxisConstraintPart,
    r_a: Vector3<f64>,
    r_b: Vector3<f64>,
    world_axis: Vector3<f64>,
    perp_axes: [Vector3<f64>; 2],
    current_angle: f64,
}

impl HasGeneration for HingeConstraint {
    fn generation(&self) -> u32 {
        self.header.generation
    }
}

impl HingeConstraint {
    pub fn header(&self) -> &ConstraintHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut ConstraintHeader {
        &mut self.header
    }
}

#[derive(Default)]
pub struct HingeConstraintPool(Pool<HingeConstraint>);

impl HingeConstraintPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, settings: HingeConstraintSettings) -> ConstraintId {
        let (index, generation) = self.0.insert(|index, generation| HingeConstraint {
            header: ConstraintHeader::new(index, generation, settings.body_a, settings.body_b),
            settings,
            point_part: Point3ConstraintPart::default(),
            perp_parts: [AxisConstraintPart::default(); 2],
            axis_part: AxisConstraintPart::default(),
            r_a: Vector3::zeros(),
            r_b: Vector3::zeros(),
            world_axis: Vector3::x(),
            perp_axes: [Vector3::y(), Vector3::z()],
            current_angle: 0.0,
        });
        ConstraintId { kind: ConstraintKind::Hinge, index, generation }
    }

    pub fn remove(&mut self, id: ConstraintId) -> bool {
        self.0.remove(id.index, id.generation)
    }

    pub fn get_mut(&mut self, id: ConstraintId) -> Option<&mut HingeConstraint> {
        self.0.get_mut(id.index, id.generation)
    }

    /// Headers of every live constraint in this pool, for the island builder
    /// and solver to enumerate without matching on [`ConstraintKind`] first.
    pub fn iter_headers(&self) -> impl Iterator<Item = &ConstraintHeader> {
        self.0.iter().map(|c| c.header())
    }

    pub fn setup_velocity(&mut self, bodies: &BodyPool) {
        for c in self.0.iter_mut() {
            if !c.header.enabled {
                continue;
            }
            let (Some(a), Some(b)) = (bodies.get(c.settings.body_a), bodies.get(c.settings.body_b)) else { continue };
            c.r_a = a.rotation * c.settings.local_anchor_a - (a.center_of_mass_position() - a.position);
            c.r_b = b.rotation * c.settings.local_anchor_b - (b.center_of_mass_position() - b.position);

            let axis_a = (a.rotation * c.settings.local_axis_a).normalize();
            let axis_b = (b.rotation * c.settings.local_axis_b).normalize();
            c.world_axis = axis_a;
            let (t1, t2) = perpendicular_basis(axis_a);
            c.perp_axes = [t1, t2];
            c.current_angle = axis_a.cross(&axis_b).dot(&t1).atan2(axis_a.dot(&axis_b));

            let inv_inertia_a = a.motion.world_inverse_inertia(a.rotation);
            let inv_inertia_b = b.motion.world_inverse_inertia(b.rotation);

            c.point_part.calculate_effective_mass(a.motion.inverse_mass, inv_inertia_a, c.r_a, b.motion.inverse_mass, inv_inertia_b, c.r_b);
            for (i, perp) in c.perp_axes.into_iter().enumerate() {
                c.perp_parts[i].calculate_effective_mass(0.0, inv_inertia_a, Vector3::zeros(), 0.0, inv_inertia_b, Vector3::zeros(), perp);
            }
            c.axis_part.calculate_effective_mass(0.0, inv_inertia_a, Vector3::zeros(), 0.0, inv_inertia_b, Vector3::zeros(), c.world_axis);
        }
    }

    pub fn warm_start(&mut self, bodies: &mut BodyPool, ratio: f64) {
        for c in self.0.iter_mut() {
            if !c.header.enabled {
                continue;
            }
            let (Some(a), Some(b)) = bodies.get_pair_mut(c.settings.body_a, c.settings.body_b) else { continue };
            c.point_part.warm_start(&mut a.motion, c.r_a, &mut b.motion, c.r_b, ratio);
            for (part, axis) in c.perp_parts.iter().zip(c.perp_axes) {
                part.warm_start(&mut a.motion, Vector3::zeros(), &mut b.motion, Vector3::zeros(), axis, ratio);
            }
            c.axis_part.warm_start(&mut a.motion, Vector3::zeros(), &mut b.motion, Vector3::zeros(), c.world_axis, ratio);
        }
    }

    pub fn solve_velocity(&mut self, bodies: &mut BodyPool) {
        for c in self.0.iter_mut() {
            if !c.header.enabled {
                continue;
            }
            let (Some(a), Some(b)) = bodies.get_pair_mut(c.settings.body_a, c.settings.body_b) else { continue };

            c.point_part.solve_velocity(&mut a.motion, c.r_a, &mut b.motion, c.r_b, Vector3::zeros());
            for (part, axis) in c.perp_parts.iter_mut().zip(c.perp_axes) {
                part.solve_velocity(&mut a.motion, Vector3::zeros(), &mut b.motion, Vector3::zeros(), axis, 0.0, f64::NEG_INFINITY, f64::INFINITY);
            }

            if let Some(motor) = c.settings.motor {
                let max_impulse = motor.max_torque.abs();
                c.axis_part.solve_velocity(
                    &mut a.motion,
                    Vector3::zeros(),
                    &mut b.motion,
                    Vector3::zeros(),
                    c.world_axis,
                    motor.target_velocity,
                    -max_impulse,
                    max_impulse,
                );
            } else if let Some((min, max)) = c.settings.limits {
                if c.current_angle > max {
                    c.axis_part.solve_velocity(&mut a.motion, Vector3::zeros(), &mut b.motion, Vector3::zeros(), c.world_axis, 0.0, 0.0, f64::INFINITY);
                } else if c.current_angle < min {
                    c.axis_part.solve_velocity(&mut a.motion, Vector3::zeros(), &mut b.motion, Vector3::zeros(), c.world_axis, 0.0, f64::NEG_INFINITY, 0.0);
                }
            }
        }
    }

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

fn perpendicular_basis(axis: Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
    let seed = if axis.x.abs() < 0.9 { Vector3::x() } else { Vector3::y() };
    let t1 = axis.cross(&seed).normalize();
    let t2 = axis.cross(&t1);
    (t1, t2)
}

pub fn validate(settings: &HingeConstraintSettings) -> PhysicsResult<()> {
    if settings.body_a == settings.body_b {
        return Err(PhysicsError::configuration("hinge_constraint.body_b", "must differ from body_a"));
    }
    if settings.local_axis_a.norm() < 1e-9 || settings.local_axis_b.norm() < 1e-9 {
        return Err(PhysicsError::configuration("hinge_constraint.local_axis", "must be non-zero"));
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
    fn anchors_converge_under_position_solve() {
        let mut bodies = BodyPool::new();
        let a = dynamic_body(&mut bodies, Vector3::zeros());
        let b = dynamic_body(&mut bodies, Vector3::new(1.5, 0.0, 0.0));
        let mut pool = HingeConstraintPool::new();
        let id = pool.create(HingeConstraintSettings {
            body_a: a,
            body_b: b,
            local_anchor_a: Vector3::zeros(),
            local_anchor_b: Vector3::zeros(),
            local_axis_a: Vector3::z(),
            local_axis_b: Vector3::z(),
            limits: None,
            motor: None,
        });
        assert!(pool.get_mut(id).is_some());

        for _ in 0..60 {
            pool.setup_velocity(&bodies);
            pool.solve_position(&mut bodies, 0.2);
        }
        let error = (bodies.get(b).unwrap().position - bodies.get(a).unwrap().position).norm();
        assert!(error < 0.5, "anchors should have converged, remaining separation {error}");
    }
}
