//! Slider (prismatic) constraint: bodies translate freely along a shared
//! axis but cannot rotate relative to each other or drift off that axis.
//! Built from a 3-axis rotational lock plus two perpendicular translational
//! rows, leaving the axis itself free (optionally limited/motorized).

use super::part::{AxisConstraintPart, Point3ConstraintPart};
use super::{ConstraintHeader, ConstraintId, ConstraintKind, HasGeneration, Pool};
use crate::body::{BodyId, BodyPool};
use crate::error::{PhysicsError, PhysicsResult};
use nalgebra::Vector3;

#[derive(Debug, Clone, Copy)]
pub struct SliderConstraintSettings {
    pub body_a: BodyId,
    pub body_b: BodyId,
    pub local_anchor_a: Vector3<f64>,
    pub local_anchor_b: Vector3<f64>,
    /// Slide axis in body A's local frame.
    pub local_axis_a: Vector3<f64>,
    pub limits: Option<(f64, f64)>,
    pub motor: Option<SliderMotor>,
}

#[derive(Debug, Clone, Copy)]
pub struct SliderMotor {
    pub target_velocity: f64,
    pub max_force: f64,
}

#[derive(Debug)]
pub struct SliderConstraint {
    header: ConstraintHeader,
    settings: SliderConstraintSettings,
    rotation_part: Point3ConstraintPart,
    perp_parts: [AxisConstraintPart; 2],
    axis_part: AxisConstraintPart,
    r_a: Vector3<f64>,
    r_b: Vector3<f64>,
    world_axis: Vector3<f64>,
    perp_axes: [Vector3<f64>; 2],
    current_translation: f64,
}

impl HasGeneration for SliderConstraint {
    fn generation(&self) -> u32 {
        self.header.generation
    }
}

impl SliderConstraint {
    pub fn header(&self) -> &ConstraintHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut ConstraintHeader {
        &mut self.header
    }
}

#[derive(Default)]
pub struct SliderConstraintPool(Pool<SliderConstraint>);

impl SliderConstraintPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, settings: SliderConstraintSettings) -> ConstraintId {
        let (index, generation) = self.0.insert(|index, generation| SliderConstraint {
            header: ConstraintHeader::new(index, generation, settings.body_a, settings.body_b),
            settings,
            rotation_part: Point3ConstraintPart::default(),
            perp_parts: [AxisConstraintPart::default(); 2],
            axis_part: AxisConstraintPart::default(),
            r_a: Vector3::zeros(),
            r_b: Vector3::zeros(),
            world_axis: Vector3::x(),
            perp_axes: [Vector3::y(), Vector3::z()],
            current_translation: 0.0,
        });
        ConstraintId { kind: ConstraintKind::Slider, index, generation }
    }

    pub fn remove(&mut self, id: ConstraintId) -> bool {
        self.0.remove(id.index, id.generation)
    }

    /// Headers of every live constraint in this pool, for the island builder
    /// and solver to enumerate without matching on [`ConstraintKind`] first.
    pub fn iter_headers(&self) -> impl Iterator<Item = &ConstraintHeader> {
        self.0.iter().map(|c| c.header())
    }

    pub fn get_mut(&mut self, id: ConstraintId) -> Option<&mut SliderConstraint> {
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

            let axis = (a.rotation * c.settings.local_axis_a).normalize();
            c.world_axis = axis;
            let seed = if axis.x.abs() < 0.9 { Vector3::x() } else { Vector3::y() };
            let t1 = axis.cross(&seed).normalize();
            let t2 = axis.cross(&t1);
            c.perp_axes = [t1, t2];

            let anchor_a = a.position + a.rotation * c.settings.local_anchor_a;
            let anchor_b = b.position + b.rotation * c.settings.local_anchor_b;
            c.current_translation = (anchor_b - anchor_a).dot(&axis);

            let inv_inertia_a = a.motion.world_inverse_inertia(a.rotation);
            let inv_inertia_b = b.motion.world_inverse_inertia(b.rotation);

            c.rotation_part.calculate_effective_mass(0.0, inv_inertia_a, Vector3::zeros(), 0.0, inv_inertia_b, Vector3::zeros());
            for (i, perp) in c.perp_axes.into_iter().enumerate() {
                c.perp_parts[i].calculate_effective_mass(a.motion.inverse_mass, inv_inertia_a, c.r_a, b.motion.inverse_mass, inv_inertia_b, c.r_b, perp);
            }
            c.axis_part.calculate_effective_mass(a.motion.inverse_mass, inv_inertia_a, c.r_a, b.motion.inverse_mass, inv_inertia_b, c.r_b, axis);
        }
    }

    pub fn warm_start(&mut self, bodies: &mut BodyPool, ratio: f64) {
        for c in self.0.iter_mut() {
            if !c.header.enabled {
                continue;
            }
            let (Some(a), Some(b)) = bodies.get_pair_mut(c.settings.body_a, c.settings.body_b) else { continue };
            c.rotation_part.warm_start(&mut a.motion, Vector3::zeros(), &mut b.motion, Vector3::zeros(), ratio);
            for (part, axis) in c.perp_parts.iter().zip(c.perp_axes) {
                part.warm_start(&mut a.motion, c.r_a, &mut b.motion, c.r_b, axis, ratio);
            }
            c.axis_part.warm_start(&mut a.motion, c.r_a, &mut b.motion, c.r_b, c.world_axis, ratio);
        }
    }

    pub fn solve_velocity(&mut self, bodies: &mut BodyPool) {
        for c in self.0.iter_mut() {
            if !c.header.enabled {
                continue;
            }
            let (Some(a), Some(b)) = bodies.get_pair_mut(c.settings.body_a, c.settings.body_b) else { continue };

            c.rotation_part.solve_velocity(&mut a.motion, Vector3::zeros(), &mut b.motion, Vector3::zeros(), Vector3::zeros());
            for (part, axis) in c.perp_parts.iter_mut().zip(c.perp_axes) {
                part.solve_velocity(&mut a.motion, c.r_a, &mut b.motion, c.r_b, axis, 0.0, f64::NEG_INFINITY, f64::INFINITY);
            }

            if let Some(motor) = c.settings.motor {
                let max_impulse = motor.max_force.abs();
                c.axis_part.solve_velocity(&mut a.motion, c.r_a, &mut b.motion, c.r_b, c.world_axis, motor.target_velocity, -max_impulse, max_impulse);
            } else if let Some((min, max)) = c.settings.limits {
                if c.current_translation > max {
                    c.axis_part.solve_velocity(&mut a.motion, c.r_a, &mut b.motion, c.r_b, c.world_axis, 0.0, 0.0, f64::INFINITY);
                } else if c.current_translation < min {
                    c.axis_part.solve_velocity(&mut a.motion, c.r_a, &mut b.motion, c.r_b, c.world_axis, 0.0, f64::NEG_INFINITY, 0.0);
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
            let delta = anchor_b - anchor_a;
            let axis = (a.rotation * c.settings.local_axis_a).normalize();
            // only the component perpendicular to the slide axis is an error
            let perp_error = delta - axis * delta.dot(&axis);
            max_error = max_error.max(perp_error.norm());

            let inv_mass_sum = a.motion.inverse_mass + b.motion.inverse_mass;
            if inv_mass_sum <= 0.0 {
                continue;
            }
            let correction = perp_error * baumgarte_beta;
            a.position += correction * (a.motion.inverse_mass / inv_mass_sum);
            b.position -= correction * (b.motion.inverse_mass / inv_mass_sum);
        }
        max_error
    }
}

pub fn validate(settings: &SliderConstraintSettings) -> PhysicsResult<()> {
    if settings.body_a == settings.body_b {
        return Err(PhysicsError::configuration("slider_constraint.body_b", "must differ from body_a"));
    }
    if settings.local_axis_a.norm() < 1e-9 {
        return Err(PhysicsError::configuration("slider_constraint.local_axis_a", "must be non-zero"));
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
    fn perpendicular_drift_is_corrected() {
        let mut bodies = BodyPool::new();
        let a = dynamic_body(&mut bodies, Vector3::zeros());
        let b = dynamic_body(&mut bodies, Vector3::new(1.0, 0.3, 0.0));
        let mut pool = SliderConstraintPool::new();
        let id = pool.create(SliderConstraintSettings {
            body_a: a,
            body_b: b,
            local_anchor_a: Vector3::zeros(),
            local_anchor_b: Vector3::zeros(),
            local_axis_a: Vector3::x(),
            limits: None,
            motor: None,
        });
        assert!(pool.get_mut(id).is_some());

        for _ in 0..60 {
            pool.setup_velocity(&bodies);
            pool.solve_position(&mut bodies, 0.2);
        }
        let remaining_y = (bodies.get(b).unwrap().position.y - bodies.get(a).unwrap().position.y).abs();
        assert!(remaining_y < 0.1, "perpendicular drift should shrink, got {remaining_y}");
    }
}
