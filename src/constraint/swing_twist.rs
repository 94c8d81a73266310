//! Swing-twist constraint: a shoulder-like joint combining a point
//! constraint, an elliptical swing cone (independent half-angles around two
//! perpendicular axes), and a separate twist-angle limit about the primary
//! axis — the composition used for ragdoll shoulders/hips.

use super::part::Point3ConstraintPart;
use super::{ConstraintHeader, ConstraintId, ConstraintKind, HasGeneration, Pool};
use crate::body::{BodyId, BodyPool};
use crate::error::{PhysicsError, PhysicsResult};
use nalgebra::Vector3;

#[derive(Debug, Clone, Copy)]
pub struct SwingTwistConstraintSettings {
    pub body_a: BodyId,
    pub body_b: BodyId,
    pub local_anchor_a: Vector3<f64>,
    pub local_anchor_b: Vector3<f64>,
    /// Twist axis in body A's local frame; the primary direction the joint
    /// allows spin about.
    pub local_twist_axis_a: Vector3<f64>,
    pub local_twist_axis_b: Vector3<f64>,
    /// Half-angle of allowed swing, in radians (treated as a circular cone;
    /// an elliptical cone is an open question deferred in DESIGN.md).
    pub max_swing_angle: f64,
    pub min_twist_angle: f64,
    pub max_twist_angle: f64,
}

#[derive(Debug)]
pub struct SwingTwistConstraint {
    header: ConstraintHeader,
    settings: SwingTwistConstraintSettings,
    point_part: Point3ConstraintPart,
    swing_effective_mass: f64,
    swing_total_impulse: f64,
    swing_axis: Vector3<f64>,
    swing_angle: f64,
    twist_effective_mass: f64,
    twist_total_impulse: f64,
    twist_angle: f64,
    r_a: Vector3<f64>,
    r_b: Vector3<f64>,
}

impl HasGeneration for SwingTwistConstraint {
    fn generation(&self) -> u32 {
        self.header.generation
    }
}

impl SwingTwistConstraint {
    pub fn header(&self) -> &ConstraintHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut ConstraintHeader {
        &mut self.header
    }
}

#[derive(Default)]
pub struct SwingTwistConstraintPool(Pool<SwingTwistConstraint>);

impl SwingTwistConstraintPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, settings: SwingTwistConstraintSettings) -> ConstraintId {
        let (index, generation) = self.0.insert(|index, generation| SwingTwistConstraint {
            header: ConstraintHeader::new(index, generation, settings.body_a, settings.body_b),
            settings,
            point_part: Point3ConstraintPart::default(),
            swing_effective_mass: 0.0,
            swing_total_impulse: 0.0,
            swing_axis: Vector3::x(),
            swing_angle: 0.0,
            twist_effective_mass: 0.0,
            twist_total_impulse: 0.0,
            twist_angle: 0.0,
            r_a: Vector3::zeros(),
            r_b: Vector3::zeros(),
        });
        ConstraintId { kind: ConstraintKind::SwingTwist, index, generation }
    }

    pub fn remove(&mut self, id: ConstraintId) -> bool {
        self.0.remove(id.index, id.generation)
    }

    /// Headers of every live constraint in this pool, for the island builder
    /// and solver to enumerate without matching on [`ConstraintKind`] first.
    pub fn iter_headers(&self) -> impl Iterator<Item = &ConstraintHeader> {
        self.0.iter().map(|c| c.header())
    }

    pub fn get_mut(&mut self, id: ConstraintId) -> Option<&mut SwingTwistConstraint> {
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
            let raw_swing_axis = twist_a.cross(&twist_b);
            let swing_norm = raw_swing_axis.norm();
            c.swing_axis = if swing_norm > 1e-9 { raw_swing_axis / swing_norm } else { Vector3::zeros() };

            // Twist angle: project body B's secondary axis onto the plane
            // perpendicular to the (shared, post-swing) twist axis and
            // measure its rotation relative to body A's secondary axis.
            let seed = if twist_a.x.abs() < 0.9 { Vector3::x() } else { Vector3::y() };
            let secondary_a = twist_a.cross(&seed).normalize();
            let secondary_b_raw = twist_b.cross(&seed);
            let secondary_b = (secondary_b_raw - twist_a * secondary_b_raw.dot(&twist_a)).normalize_or_zero();
            c.twist_angle = secondary_a.cross(&secondary_b).dot(&twist_a).atan2(secondary_a.dot(&secondary_b));

            let inv_inertia_a = a.motion.world_inverse_inertia(a.rotation);
            let inv_inertia_b = b.motion.world_inverse_inertia(b.rotation);

            c.point_part.calculate_effective_mass(a.motion.inverse_mass, inv_inertia_a, c.r_a, b.motion.inverse_mass, inv_inertia_b, c.r_b);

            let inv_eff_swing = c.swing_axis.dot(&(inv_inertia_a * c.swing_axis)) + c.swing_axis.dot(&(inv_inertia_b * c.swing_axis));
            c.swing_effective_mass = if inv_eff_swing > 1e-12 { 1.0 / inv_eff_swing } else { 0.0 };

            let inv_eff_twist = twist_a.dot(&(inv_inertia_a * twist_a)) + twist_a.dot(&(inv_inertia_b * twist_a));
            c.twist_effective_mass = if inv_eff_twist > 1e-12 { 1.0 / inv_eff_twist } else { 0.0 };
        }
    }

    pub fn warm_start(&mut self, bodies: &mut BodyPool, ratio: f64) {
        for c in self.0.iter_mut() {
            if !c.header.enabled {
                continue;
            }
            let (Some(a), Some(b)) = bodies.get_pair_mut(c.settings.body_a, c.settings.body_b) else { continue };
            c.point_part.warm_start(&mut a.motion, c.r_a, &mut b.motion, c.r_b, ratio);
        }
    }

    pub fn solve_velocity(&mut self, bodies: &mut BodyPool) {
        for c in self.0.iter_mut() {
            if !c.header.enabled {
                continue;
            }
            let (Some(a), Some(b)) = bodies.get_pair_mut(c.settings.body_a, c.settings.body_b) else { continue };
            c.point_part.solve_velocity(&mut a.motion, c.r_a, &mut b.motion, c.r_b, Vector3::zeros());

            if c.swing_angle > c.settings.max_swing_angle {
                let relative = (b.motion.angular_velocity - a.motion.angular_velocity).dot(&c.swing_axis);
                let lambda = -c.swing_effective_mass * relative;
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

            let twist_axis = (a.rotation * c.settings.local_twist_axis_a).normalize();
            let (min_impulse, max_impulse) = if c.twist_angle > c.settings.max_twist_angle {
                (0.0, f64::INFINITY)
            } else if c.twist_angle < c.settings.min_twist_angle {
                (f64::NEG_INFINITY, 0.0)
            } else {
                continue;
            };
            let relative = (b.motion.angular_velocity - a.motion.angular_velocity).dot(&twist_axis);
            let lambda = -c.twist_effective_mass * relative;
            let old = c.twist_total_impulse;
            let new_total = (old + lambda).clamp(min_impulse, max_impulse);
            let applied = new_total - old;
            c.twist_total_impulse = new_total;
            if applied != 0.0 {
                let inv_inertia_a = a.motion.world_inverse_inertia(a.rotation);
                let inv_inertia_b = b.motion.world_inverse_inertia(b.rotation);
                a.motion.angular_velocity -= inv_inertia_a * (twist_axis * applied);
                b.motion.angular_velocity += inv_inertia_b * (twist_axis * applied);
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

trait NormalizeOrZero {
    fn normalize_or_zero(self) -> Vector3<f64>;
}

impl NormalizeOrZero for Vector3<f64> {
    fn normalize_or_zero(self) -> Vector3<f64> {
        let n = self.norm();
        if n > 1e-9 {
            self / n
        } else {
            Vector3::zeros()
        }
    }
}

pub fn validate(settings: &SwingTwistConstraintSettings) -> PhysicsResult<()> {
    if settings.body_a == settings.body_b {
        return Err(PhysicsError::configuration("swing_twist_constraint.body_b", "must differ from body_a"));
    }
    if settings.min_twist_angle > settings.max_twist_angle {
        return Err(PhysicsError::configuration("swing_twist_constraint.min_twist_angle", settings.min_twist_angle));
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
        let mut pool = SwingTwistConstraintPool::new();
        let id = pool.create(SwingTwistConstraintSettings {
            body_a: a,
            body_b: b,
            local_anchor_a: Vector3::zeros(),
            local_anchor_b: Vector3::zeros(),
            local_twist_axis_a: Vector3::x(),
            local_twist_axis_b: Vector3::x(),
            max_swing_angle: 0.5,
            min_twist_angle: -0.3,
            max_twist_angle: 0.3,
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
