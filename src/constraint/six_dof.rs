//! Six-DOF constraint: the most general joint, independently classifying
//! each of the three translational and three rotational axes as free,
//! limited, or fixed — every other joint kind in this module is a special
//! case of this one, kept separate for the cheaper fixed-shape solves.

use super::part::AxisConstraintPart;
use super::{ConstraintHeader, ConstraintId, ConstraintKind, HasGeneration, Pool};
use crate::body::{BodyId, BodyPool};
use crate::error::{PhysicsError, PhysicsResult};
use nalgebra::Vector3;

/// How a single axis of a six-DOF constraint behaves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AxisMode {
    Free,
    Limited { min: f64, max: f64 },
    Fixed,
}

#[derive(Debug, Clone, Copy)]
pub struct SixDofConstraintSettings {
    pub body_a: BodyId,
    pub body_b: BodyId,
    pub local_anchor_a: Vector3<f64>,
    pub local_anchor_b: Vector3<f64>,
    /// Axis classification in body A's local frame order: [x, y, z].
    pub translation_axes: [AxisMode; 3],
    pub rotation_axes: [AxisMode; 3],
}

struct AxisRow {
    part: AxisConstraintPart,
    world_axis: Vector3<f64>,
    current_value: f64,
}

impl Default for AxisRow {
    fn default() -> Self {
        Self { part: AxisConstraintPart::default(), world_axis: Vector3::x(), current_value: 0.0 }
    }
}

#[derive(Default)]
pub struct SixDofConstraint {
    header_: Option<ConstraintHeader>,
    settings: Option<SixDofConstraintSettings>,
    translation_rows: [AxisRow; 3],
    rotation_rows: [AxisRow; 3],
    r_a: Vector3<f64>,
    r_b: Vector3<f64>,
}

impl HasGeneration for SixDofConstraint {
    fn generation(&self) -> u32 {
        self.header_.map(|h| h.generation).unwrap_or(0)
    }
}

impl SixDofConstraint {
    pub fn header(&self) -> &ConstraintHeader {
        self.header_.as_ref().expect("six-dof constraint header missing")
    }

    pub fn header_mut(&mut self) -> &mut ConstraintHeader {
        self.header_.as_mut().expect("six-dof constraint header missing")
    }
}

#[derive(Default)]
pub struct SixDofConstraintPool(Pool<SixDofConstraint>);

impl SixDofConstraintPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, settings: SixDofConstraintSettings) -> ConstraintId {
        let (index, generation) = self.0.insert(|index, generation| SixDofConstraint {
            header_: Some(ConstraintHeader::new(index, generation, settings.body_a, settings.body_b)),
            settings: Some(settings),
            translation_rows: Default::default(),
            rotation_rows: Default::default(),
            r_a: Vector3::zeros(),
            r_b: Vector3::zeros(),
        });
        ConstraintId { kind: ConstraintKind::SixDof, index, generation }
    }

    pub fn remove(&mut self, id: ConstraintId) -> bool {
        self.0.remove(id.index, id.generation)
    }

    /// Headers of every live constraint in this pool, for the island builder
    /// and solver to enumerate without matching on [`ConstraintKind`] first.
    pub fn iter_headers(&self) -> impl Iterator<Item = &ConstraintHeader> {
        self.0.iter().map(|c| c.header())
    }

    pub fn get_mut(&mut self, id: ConstraintId) -> Option<&mut SixDofConstraint> {
        self.0.get_mut(id.index, id.generation)
    }

    pub fn setup_velocity(&mut self, bodies: &BodyPool) {
        for c in self.0.iter_mut() {
            let Some(header) = c.header_ else { continue };
            if !header.enabled {
                continue;
            }
            let settings = c.settings.as_ref().expect("settings present once header is set");
            let (Some(a), Some(b)) = (bodies.get(settings.body_a), bodies.get(settings.body_b)) else { continue };
            c.r_a = a.rotation * settings.local_anchor_a - (a.center_of_mass_position() - a.position);
            c.r_b = b.rotation * settings.local_anchor_b - (b.center_of_mass_position() - b.position);

            let anchor_a = a.position + a.rotation * settings.local_anchor_a;
            let anchor_b = b.position + b.rotation * settings.local_anchor_b;
            let delta = anchor_b - anchor_a;

            let relative_rotation = a.rotation.inverse() * b.rotation;
            let angle_error = relative_rotation.scaled_axis();

            let inv_inertia_a = a.motion.world_inverse_inertia(a.rotation);
            let inv_inertia_b = b.motion.world_inverse_inertia(b.rotation);

            for i in 0..3 {
                let local_axis = Vector3::ith(i, 1.0);
                let row = &mut c.translation_rows[i];
                row.world_axis = a.rotation * local_axis;
                row.current_value = delta.dot(&row.world_axis);
                row.part.calculate_effective_mass(a.motion.inverse_mass, inv_inertia_a, c.r_a, b.motion.inverse_mass, inv_inertia_b, c.r_b, row.world_axis);
            }
            for i in 0..3 {
                let local_axis = Vector3::ith(i, 1.0);
                let row = &mut c.rotation_rows[i];
                row.world_axis = a.rotation * local_axis;
                row.current_value = angle_error.dot(&local_axis);
                row.part.calculate_effective_mass(0.0, inv_inertia_a, Vector3::zeros(), 0.0, inv_inertia_b, Vector3::zeros(), row.world_axis);
            }
        }
    }

    pub fn warm_start(&mut self, bodies: &mut BodyPool, ratio: f64) {
        for c in self.0.iter_mut() {
            let Some(header) = c.header_ else { continue };
            if !header.enabled {
                continue;
            }
            let settings = c.settings.as_ref().expect("settings present once header is set");
            let (Some(a), Some(b)) = bodies.get_pair_mut(settings.body_a, settings.body_b) else { continue };
            for row in c.translation_rows.iter() {
                row.part.warm_start(&mut a.motion, c.r_a, &mut b.motion, c.r_b, row.world_axis, ratio);
            }
            for row in c.rotation_rows.iter() {
                row.part.warm_start(&mut a.motion, Vector3::zeros(), &mut b.motion, Vector3::zeros(), row.world_axis, ratio);
            }
        }
    }

    pub fn solve_velocity(&mut self, bodies: &mut BodyPool) {
        for c in self.0.iter_mut() {
            let Some(header) = c.header_ else { continue };
            if !header.enabled {
                continue;
            }
            let settings = c.settings.as_ref().expect("settings present once header is set");
            let (Some(a), Some(b)) = bodies.get_pair_mut(settings.body_a, settings.body_b) else { continue };

            for (row, mode) in c.translation_rows.iter_mut().zip(settings.translation_axes) {
                solve_axis(row, mode, &mut a.motion, c.r_a, &mut b.motion, c.r_b);
            }
            for (row, mode) in c.rotation_rows.iter_mut().zip(settings.rotation_axes) {
                solve_axis(row, mode, &mut a.motion, Vector3::zeros(), &mut b.motion, Vector3::zeros());
            }
        }
    }

    pub fn solve_position(&mut self, bodies: &mut BodyPool, baumgarte_beta: f64) -> f64 {
        let mut max_error = 0.0f64;
        for c in self.0.iter_mut() {
            let Some(header) = c.header_ else { continue };
            if !header.enabled {
                continue;
            }
            let settings = c.settings.as_ref().expect("settings present once header is set");
            let (Some(a), Some(b)) = bodies.get_pair_mut(settings.body_a, settings.body_b) else { continue };

            let anchor_a = a.position + a.rotation * settings.local_anchor_a;
            let anchor_b = b.position + b.rotation * settings.local_anchor_b;
            let delta = anchor_b - anchor_a;

            let mut error = Vector3::zeros();
            for (row, mode) in c.translation_rows.iter().zip(settings.translation_axes) {
                if mode == AxisMode::Fixed {
                    error += row.world_axis * delta.dot(&row.world_axis);
                }
            }
            max_error = max_error.max(error.norm());

            let inv_mass_sum = a.motion.inverse_mass + b.motion.inverse_mass;
            if inv_mass_sum > 0.0 {
                let correction = error * baumgarte_beta;
                a.position += correction * (a.motion.inverse_mass / inv_mass_sum);
                b.position -= correction * (b.motion.inverse_mass / inv_mass_sum);
            }
        }
        max_error
    }
}

fn solve_axis(
    row: &mut AxisRow,
    mode: AxisMode,
    motion_a: &mut crate::body::MotionProperties,
    r_a: Vector3<f64>,
    motion_b: &mut crate::body::MotionProperties,
    r_b: Vector3<f64>,
) {
    match mode {
        AxisMode::Free => {}
        AxisMode::Fixed => {
            row.part.solve_velocity(motion_a, r_a, motion_b, r_b, row.world_axis, 0.0, f64::NEG_INFINITY, f64::INFINITY);
        }
        AxisMode::Limited { min, max } => {
            if row.current_value > max {
                row.part.solve_velocity(motion_a, r_a, motion_b, r_b, row.world_axis, 0.0, 0.0, f64::INFINITY);
            } else if row.current_value < min {
                row.part.solve_velocity(motion_a, r_a, motion_b, r_b, row.world_axis, 0.0, f64::NEG_INFINITY, 0.0);
            }
        }
    }
}

pub fn validate(settings: &SixDofConstraintSettings) -> PhysicsResult<()> {
    if settings.body_a == settings.body_b {
        return Err(PhysicsError::configuration("six_dof_constraint.body_b", "must differ from body_a"));
    }
    for axis in settings.translation_axes.iter().chain(settings.rotation_axes.iter()) {
        if let AxisMode::Limited { min, max } = axis {
            if min > max {
                return Err(PhysicsError::configuration("six_dof_constraint.axis_limit", *min));
            }
        }
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
    fn fixed_axis_stops_separating_velocity() {
        let mut bodies = BodyPool::new();
        let a = dynamic_body(&mut bodies, Vector3::zeros());
        let b = dynamic_body(&mut bodies, Vector3::new(1.0, 0.0, 0.0));
        bodies.get_mut(b).unwrap().motion.linear_velocity = Vector3::new(5.0, 0.0, 0.0);

        let mut pool = SixDofConstraintPool::new();
        let id = pool.create(SixDofConstraintSettings {
            body_a: a,
            body_b: b,
            local_anchor_a: Vector3::zeros(),
            local_anchor_b: Vector3::zeros(),
            translation_axes: [AxisMode::Fixed, AxisMode::Fixed, AxisMode::Fixed],
            rotation_axes: [AxisMode::Free, AxisMode::Free, AxisMode::Free],
        });
        assert!(pool.get_mut(id).is_some());

        pool.setup_velocity(&bodies);
        for _ in 0..8 {
            pool.solve_velocity(&mut bodies);
        }
        let relative = (bodies.get(b).unwrap().motion.linear_velocity - bodies.get(a).unwrap().motion.linear_velocity).norm();
        assert!(relative < 1e-6, "fixed translation axes should cancel relative velocity, got {relative}");
    }
}
