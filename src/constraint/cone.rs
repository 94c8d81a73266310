//! Cone constraint: a point constraint plus a single swing-angle limit,
//! restricting body B's reference axis to stay within a cone of half-angle
//! `max_angle` around body A's reference axis (a simplified shoulder joint).

use super::part::Point3ConstraintPart;
use super::{ConstraintHeader, ConstraintId, ConstraintKind, HasGeneration, Pool};
use crate::body::{BodyId, BodyPool};
use crate::error::{PhysicsError, PhysicsResult};
use nalgebra::Vector3;

#[derive(Debug, Clone, Copy)]
pub struct ConeConstraintSettings {
    pub body_a: BodyId,
    pub body_b: BodyId,
    pub local_anchor_a: Vector3<f64>,
    pub local_anchor_b: Vector3<f64>,
    pub local_twist_axis_a: Vector3<f64>,
    pub local_twist_axis_b: Vector3<f64>,
    /// Half-angle of the permitted swing cone, in radians.
    pub max_angle: f64,
}

#[derive(Debug)]
pub struct ConeConstraint {
    header: ConstraintHeader,
    settings: ConeConstraintSettings,
    point_part: Point3ConstraintPart,
    swing_effective_mass: f64,
    swing_total_impulse: f64,
    swing_axis: Vector3<f64>,
    swing_angle: f64,
    r_a: Vector3<f64>,
    r_b: Vector3<f64>,
}

impl HasGeneration for ConeConstraint {
    fn generation(&self) -> u32 {
        self.header.generation
    }
}

impl ConeConstraint {
    pub fn header(&self) -> &ConstraintHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut ConstraintHeader {
        &mut self.header
    }
}

#[derive(Default)]
pub struct ConeConstraintPool(Pool<ConeConstraint>);

impl ConeConstraintPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, settings: ConeConstraintSettings) -> ConstraintId {
        let (index, generation) = self.0.insert(|index, generation| ConeConstraint {
            header: ConstraintHeader::new(index, generation, settings.body_a, settings.body_b),
            settings,
            point_part: Point3ConstraintPart::default(),
            swing_effective_mass: 0.0,
            swing_total_impulse: 0.0,
            swing_axis: Vector3::x(),
            swing_angle: 0.0,
            r_a: Vector3::zeros(),
            r_b: Vector3::zeros(),
        });
        ConstraintId { kind: ConstraintKind::Cone, index, generation }
    }

    pub fn remove(&mut self, id: ConstraintId) -> bool {
        self.0.remove(id.index, id.generation)
    }

    /// Headers of every live constraint in this pool, for the island builder
    /// and solver to enumerate without matching on [`ConstraintKind`] first.
    pub fn iter_headers(&self) -> impl Iterator<Item = &ConstraintHeader> {
        self.0.iter().map(|c| c.header())
    }

    pub fn get_mut(&mut self, id: ConstraintId) -> Option<&mut ConeConstraint> {
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

            let twist_a = (a.rotation * c.settings.local_twist_axis_a).normalize();
            let twist_b = (b.rotation * c.settings.local_twist_axis_b).normalize();
            c.swing_angle = twist_a.dot(&twist_b).clamp(-1.0, 1.0).acos();
            c.swing_axis = twist_a.cross(&twist_b).normalize_or_zero_axis();

            let inv_inertia_a = a.motion.world_inverse_inertia(a.rotation);
            let inv_inertia_b = b.motion.world_inverse_inertia(b.rotation);

            c.point_part.calculate_effective_mass(a.motion.inverse_mass, inv_inertia_a, c.r_a, b.motion.inverse_mass, inv_inertia_b, c.r_b);

            let rxn_a = c.swing_axis;
            let rxn_b = c.swing_axis;
            let inv_eff = rxn_a.dot(&(inv_inertia_a * rxn_a)) + rxn_b.dot(&(inv_inertia_b * rxn_b));
            c.swing_effective_mass = if inv_eff > 1e-12 { 1.0 / inv_eff } else { 0.0 };
        }
    }

    pub fn warm_start(&mut self, bodies: &mut BodyPool, ratio: f64) {
        for c in self.0.iter_mut() {
            if !c.header.enabled {
                continue;
            }
            let (Some(a), Some(b)) = bodies.get_pair_mut(c.settings.body_a, c.settings.body_b) else { continue };
            c.point_part.warm_start(&mut a.motion, c.r_a, &mut b.motion, c.r_b, ratio);
            let impulse = c.swing_total_impulse * ratio;
            if impulse != 0.0 {
                let inv_inertia_a = a.motion.world_inverse_inertia(a.rotation);
                let inv_inertia_b = b.motion.world_inverse_inertia(b.rotation);
                a.motion.angular_velocity -= inv_inertia_a * (c.swing_axis * impulse);
                b.motion.angular_velocity += inv_inertia_b * (c.swing_axis * impulse);
            }
        }
    }

    pub fn solve_velocity(&mut self, bodies: &mut BodyPool) {
        for c in self.0.iter_mut() {
            if !c.header.enabled {
                continue;
            }
            let (Some(a), Some(b)) = bodies.get_pair_mut(c.settings.body_a, c.settings.body_b) else { continue };
            c.point_part.solve_velocity(&mut a.motion, c.r_a, &mut b.motion, c.r_b, Vector3::zeros());

            if c.swing_angle <= c.settings.max_angle {
                continue;
            }
            let relative_angular = (b.motion.angular_velocity - a.motion.angular_velocity).dot(&c.swing_axis);
            let lambda = -c.swing_effective_mass * relative_angular;
            let old = c.swing_total_impulse;
            let new_total = (old + lambda).max(0.0);
            let applied = new_total - old;
            c.swing_total_impulse = new_total;
            if applied != 0.0 {
                let inv_inertia_a = a.motion.world_inverse_inertia(a.rotation);
                let inv_inertia_b = b.motion.world_inverse_inertia(b.rotation);
                a.motion.angular_velocity -= inv_inertia_a * (c.swing_axis * applied);
                b.motion.angular_velocity += inv_inertia_b * (c.swing_axis * applied);
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

trait NormalizeOrZeroAxis {
    fn normalize_or_zero_axis(self) -> Vector3<f64>;
}

impl NormalizeOrZeroAxis for Vector3<f64> {
    fn normalize_or_zero_axis(self) -> Vector3<f64> {
        let n = self.norm();
        if n > 1e-9 {
            self / n
        } else {
            Vector3::zeros()
        }
    }
}

pub fn validate(settings: &ConeConstraintSettings) -> PhysicsResult<()> {
    if settings.body_a == settings.body_b {
        return Err(PhysicsError::configuration("cone_constraint.body_b", "must differ from body_a"));
    }
    if !(0.0..=std::f64::consts::PI).contains(&settings.max_angle) {
        return Err(PhysicsError::configuration("cone_constraint.max_angle", settings.max_angle));
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
        let mut pool = ConeConstraintPool::new();
        let id = pool.create(ConeConstraintSettings {
            body_a: a,
            body_b: b,
            local_anchor_a: Vector3::zeros(),
            local_anchor_b: Vector3::zeros(),
            local_twist_axis_a: Vector3::x(),
            local_twist_axis_b: Vector3::x(),
            max_angle: 0.5,
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
