//! Distance constraint: keeps the separation between two anchor points
//! within `[min_distance, max_distance]`, optionally as a soft spring.

use super::part::AxisConstraintPart;
use super::{ConstraintHeader, ConstraintId, ConstraintKind, HasGeneration, Pool};
use crate::body::{BodyId, BodyPool};
use crate::error::{PhysicsError, PhysicsResult};
use nalgebra::Vector3;

#[derive(Debug, Clone, Copy)]
pub struct DistanceConstraintSettings {
    pub body_a: BodyId,
    pub body_b: BodyId,
    pub local_anchor_a: Vector3<f64>,
    pub local_anchor_b: Vector3<f64>,
    pub min_distance: f64,
    pub max_distance: f64,
    /// `None` for a rigid rod at `max_distance`; `Some` softens the limit
    /// into a spring with this stiffness (N/m) and damping ratio.
    pub spring: Option<DistanceSpring>,
}

#[derive(Debug, Clone, Copy)]
pub struct DistanceSpring {
    pub stiffness: f64,
    pub damping: f64,
}

#[derive(Debug)]
pub struct DistanceConstraint {
    header: ConstraintHeader,
    settings: DistanceConstraintSettings,
    part: AxisConstraintPart,
    axis: Vector3<f64>,
    r_a: Vector3<f64>,
    r_b: Vector3<f64>,
    separation: f64,
}

impl HasGeneration for DistanceConstraint {
    fn generation(&self) -> u32 {
        self.header.generation
    }
}

impl DistanceConstraint {
    pub fn header(&self) -> &ConstraintHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut ConstraintHeader {
        &mut self.header
    }
}

#[derive(Default)]
pub struct DistanceConstraintPool(Pool<DistanceConstraint>);

impl DistanceConstraintPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, settings: DistanceConstraintSettings) -> ConstraintId {
        let (index, generation) = self.0.insert(|index, generation| DistanceConstraint {
            header: ConstraintHeader::new(index, generation, settings.body_a, settings.body_b),
            settings,
            part: AxisConstraintPart::default(),
            axis: Vector3::x(),
            r_a: Vector3::zeros(),
            r_b: Vector3::zeros(),
            separation: 0.0,
        });
        ConstraintId { kind: ConstraintKind::Distance, index, generation }
    }

    pub fn remove(&mut self, id: ConstraintId) -> bool {
        self.0.remove(id.index, id.generation)
    }

    pub fn get_mut(&mut self, id: ConstraintId) -> Option<&mut DistanceConstraint> {
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
            let anchor_a = a.position + a.rotation * c.settings.local_anchor_a;
            let anchor_b = b.position + b.rotation * c.settings.local_anchor_b;
            let delta = anchor_b - anchor_a;
            c.separation = delta.norm();
            c.axis = if c.separation > 1e-9 { delta / c.separation } else { Vector3::x() };
            c.r_a = anchor_a - a.center_of_mass_position();
            c.r_b = anchor_b - b.center_of_mass_position();
            c.part.calculate_effective_mass(
                a.motion.inverse_mass,
                a.motion.world_inverse_inertia(a.rotation),
                c.r_a,
                b.motion.inverse_mass,
                b.motion.world_inverse_inertia(b.rotation),
                c.r_b,
                c.axis,
            );
        }
    }

    pub fn warm_start(&mut self, bodies: &mut BodyPool, ratio: f64) {
        for c in self.0.iter_mut() {
            if !c.header.enabled {
                continue;
            }
            let (Some(a), Some(b)) = bodies.get_pair_mut(c.settings.body_a, c.settings.body_b) else { continue };
            c.part.warm_start(&mut a.motion, c.r_a, &mut b.motion, c.r_b, c.axis, ratio);
        }
    }

    /// Solves the distance row. A soft spring relaxes the (min,max) range
    /// into a bias proportional to the rest-length violation; a rigid
    /// distance instead clamps the impulse sign by which limit is active.
    pub fn solve_velocity(&mut self, bodies: &mut BodyPool, dt: f64) {
        for c in self.0.iter_mut() {
            if !c.header.enabled {
                continue;
            }
            let (Some(a), Some(b)) = bodies.get_pair_mut(c.settings.body_a, c.settings.body_b) else { continue };

            let (bias, min_impulse, max_impulse) = match c.settings.spring {
                Some(spring) => {
                    let rest = c.settings.max_distance;
                    let error = c.separation - rest;
                    let omega = (spring.stiffness.max(0.0)).sqrt();
                    let bias = error * omega * spring.damping.clamp(0.0, 2.0) / dt.max(1e-6);
                    (bias, f64::NEG_INFINITY, f64::INFINITY)
                }
                None => {
                    if c.separation > c.settings.max_distance {
                        ((c.separation - c.settings.max_distance) / dt.max(1e-6), 0.0, f64::INFINITY)
                    } else if c.separation < c.settings.min_distance {
                        ((c.separation - c.settings.min_distance) / dt.max(1e-6), f64::NEG_INFINITY, 0.0)
                    } else {
                        continue;
                    }
                }
            };

            c.part.solve_velocity(&mut a.motion, c.r_a, &mut b.motion, c.r_b, c.axis, bias, min_impulse, max_impulse);
        }
    }

    /// Baumgarte-corrects any remaining `(min, max)` violation directly on
    /// position, mirroring every other constraint kind's `solve_position`.
    /// A spring never position-corrects: it is deliberately soft.
    pub fn solve_position(&mut self, bodies: &mut BodyPool, baumgarte_beta: f64) -> f64 {
        let mut max_error = 0.0f64;
        for c in self.0.iter_mut() {
            if !c.header.enabled || c.settings.spring.is_some() {
                continue;
            }
            let (Some(a), Some(b)) = (bodies.get(c.settings.body_a), bodies.get(c.settings.body_b)) else { continue };
            let anchor_a = a.position + a.rotation * c.settings.local_anchor_a;
            let anchor_b = b.position + b.rotation * c.settings.local_anchor_b;
            let separation = (anchor_b - anchor_a).norm();

            let error = if separation > c.settings.max_distance {
                separation - c.settings.max_distance
            } else if separation < c.settings.min_distance {
                separation - c.settings.min_distance
            } else {
                continue;
            };
            max_error = max_error.max(error.abs());

            let inv_mass_sum = a.motion.inverse_mass + b.motion.inverse_mass;
            if inv_mass_sum <= 0.0 {
                continue;
            }
            let correction = c.axis * (error * baumgarte_beta);
            let (Some(a), Some(b)) = bodies.get_pair_mut(c.settings.body_a, c.settings.body_b) else { continue };
            a.position += correction * (a.motion.inverse_mass / inv_mass_sum);
            b.position -= correction * (b.motion.inverse_mass / inv_mass_sum);
        }
        max_error
    }
}

pub fn validate(settings: &DistanceConstraintSettings) -> PhysicsResult<()> {
    if settings.body_a == settings.body_b {
        return Err(PhysicsError::configuration("distance_constraint.body_b", "must differ from body_a"));
    }
    if settings.min_distance < 0.0 || settings.min_distance > settings.max_distance {
        return Err(PhysicsError::configuration("distance_constraint.min_distance", settings.min_distance));
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
    fn rigid_rod_stops_separation_growing_past_max() {
        let mut bodies = BodyPool::new();
        let a = dynamic_body(&mut bodies, Vector3::zeros());
        let b = dynamic_body(&mut bodies, Vector3::new(1.0, 0.0, 0.0));
        bodies.get_mut(b).unwrap().motion.linear_velocity = Vector3::new(5.0, 0.0, 0.0);

        let mut pool = DistanceConstraintPool::new();
        let id = pool.create(DistanceConstraintSettings {
            body_a: a,
            body_b: b,
            local_anchor_a: Vector3::zeros(),
            local_anchor_b: Vector3::zeros(),
            min_distance: 0.0,
            max_distance: 1.0,
            spring: None,
        });
        assert!(pool.get_mut(id).is_some());

        pool.setup_velocity(&bodies);
        pool.solve_velocity(&mut bodies, 1.0 / 60.0);
        let relative = (bodies.get(b).unwrap().motion.linear_velocity - bodies.get(a).unwrap().motion.linear_velocity).dot(&Vector3::x());
        assert!(relative <= 1e-6, "separating velocity should have been clamped, got {relative}");
    }

    #[test]
    fn position_solve_pulls_overstretched_rod_back_to_max_distance() {
        let mut bodies = BodyPool::new();
        let a = dynamic_body(&mut bodies, Vector3::zeros());
        let b = dynamic_body(&mut bodies, Vector3::new(2.0, 0.0, 0.0));

        let mut pool = DistanceConstraintPool::new();
        let id = pool.create(DistanceConstraintSettings {
            body_a: a,
            body_b: b,
            local_anchor_a: Vector3::zeros(),
            local_anchor_b: Vector3::zeros(),
            min_distance: 0.0,
            max_distance: 1.0,
            spring: None,
        });
        assert!(pool.get_mut(id).is_some());

        for _ in 0..60 {
            pool.setup_velocity(&bodies);
            pool.solve_position(&mut bodies, 0.2);
        }
        let separation = (bodies.get(b).unwrap().position - bodies.get(a).unwrap().position).norm();
        assert!((separation - 1.0).abs() < 0.05, "expected separation near 1.0, got {separation}");
    }

    #[test]
    fn spring_never_position_corrects() {
        let mut bodies = BodyPool::new();
        let a = dynamic_body(&mut bodies, Vector3::zeros());
        let b = dynamic_body(&mut bodies, Vector3::new(2.0, 0.0, 0.0));

        let mut pool = DistanceConstraintPool::new();
        pool.create(DistanceConstraintSettings {
            body_a: a,
            body_b: b,
            local_anchor_a: Vector3::zeros(),
            local_anchor_b: Vector3::zeros(),
            min_distance: 0.0,
            max_distance: 1.0,
            spring: Some(DistanceSpring { stiffness: 10.0, damping: 0.5 }),
        });

        pool.setup_velocity(&bodies);
        let error = pool.solve_position(&mut bodies, 0.2);
        assert_eq!(error, 0.0);
        assert_eq!(bodies.get(b).unwrap().position, Vector3::new(2.0, 0.0, 0.0));
    }
}
