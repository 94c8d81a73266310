//! Contact constraint solving: sequential impulses over the contact cache's
//! cached points, using the same `AxisConstraintPart` row math the joint
//! constraints use, but operating directly on [`ContactCache`] storage
//! since a contact's accumulated impulses persist there (not in a separate
//! constraint pool) for warm starting across steps.
//!
//! Grounded on spec.md §4.6 ("Contact") and §4.8 ("Solver"); the per-row
//! math itself is `crate::constraint::part::AxisConstraintPart`, reused
//! verbatim rather than reimplemented.

use crate::body::BodyPool;
use crate::config::SolverSettings;
use crate::constraint::part::{self, AxisConstraintPart};
use crate::contact::ContactCache;
use nalgebra::Vector3;
use smallvec::SmallVec;

/// Per-point scratch state computed once in [`setup`] and consumed by
/// [`warm_start`]/[`solve_velocity`]/[`solve_position`] for the rest of the
/// step. Not persisted in the contact cache: only the accumulated impulses
/// (on `ContactPoint` itself) survive between steps.
struct PointRows {
    normal: AxisConstraintPart,
    tangent: [AxisConstraintPart; 2],
    normal_axis: Vector3<f64>,
    tangent_axes: [Vector3<f64>; 2],
    r_a: Vector3<f64>,
    r_b: Vector3<f64>,
    /// Target closing velocity along the normal after restitution, computed
    /// once from the pre-solve relative velocity (spec.md §4.6: restitution
    /// applies to "the bounce velocity", not to every iteration's velocity).
    restitution_bias: f64,
}

/// Per-contact scratch built by [`setup`], indexed in the same order as the
/// `contact_indices` slice passed in.
#[derive(Default)]
pub struct ContactSolverState {
    rows: Vec<(u32, SmallVec<[PointRows; 4]>)>,
}

fn tangent_basis(normal: Vector3<f64>) -> [Vector3<f64>; 2] {
    let reference = if normal.x.abs() < 0.9 { Vector3::x() } else { Vector3::y() };
    let t1 = normal.cross(&reference).normalize();
    let t2 = normal.cross(&t1);
    [t1, t2]
}

/// Builds Jacobian rows and the one-shot restitution target for every point
/// of every contact named in `contact_indices`, from the bodies' current
/// (post-gravity, pre-impulse) velocities. Mirrors
/// `PointConstraintPool::setup_velocity`'s "recompute lever arms from
/// current transforms" pattern, generalized to three rows per point.
pub fn setup(bodies: &BodyPool, contacts: &ContactCache, contact_indices: &[u32], settings: &SolverSettings) -> ContactSolverState {
    let mut state = ContactSolverState::default();
    for &index in contact_indices {
        let Some(contact) = contacts.get(index) else { continue };
        if contact.sensor || !contact.can_receive_impulses {
            continue;
        }
        let (Some(a), Some(b)) = (bodies.get(contact.body_a), bodies.get(contact.body_b)) else { continue };

        let normal = (b.rotation * contact.normal_local_b).normalize();
        let tangents = tangent_basis(normal);
        let mut rows = SmallVec::new();
        for point in &contact.points {
            let world_a = a.position + a.rotation * point.local_a;
            let world_b = b.position + b.rotation * point.local_b;
            let r_a = world_a - a.center_of_mass_position();
            let r_b = world_b - b.center_of_mass_position();

            let mut normal_row = AxisConstraintPart::default();
            normal_row.calculate_effective_mass(
                a.motion.inverse_mass,
                a.motion.world_inverse_inertia(a.rotation),
                r_a,
                b.motion.inverse_mass,
                b.motion.world_inverse_inertia(b.rotation),
                r_b,
                normal,
            );

            let mut tangent_rows = [AxisConstraintPart::default(), AxisConstraintPart::default()];
            for (row, axis) in tangent_rows.iter_mut().zip(tangents) {
                row.calculate_effective_mass(
                    a.motion.inverse_mass,
                    a.motion.world_inverse_inertia(a.rotation),
                    r_a,
                    b.motion.inverse_mass,
                    b.motion.world_inverse_inertia(b.rotation),
                    r_b,
                    axis,
                );
            }

            let closing_velocity = part::relative_velocity(&a.motion, r_a, &b.motion, r_b, normal);
            let restitution_bias = if closing_velocity < -settings.restitution_velocity_threshold {
                -contact.restitution * closing_velocity
            } else {
                0.0
            };

            rows.push(PointRows {
                normal: normal_row,
                tangent: tangent_rows,
                normal_axis: normal,
                tangent_axes: tangents,
                r_a,
                r_b,
                restitution_bias,
            });
        }
        state.rows.push((index, rows));
    }
    state
}

/// Applies each point's previous-step accumulated impulse, scaled by
/// `ratio = dt / previous_dt`, as this step's warm-start baseline.
pub fn warm_start(bodies: &mut BodyPool, contacts: &mut ContactCache, state: &ContactSolverState, ratio: f64) {
    for (index, rows) in &state.rows {
        let Some(contact) = contacts.get_mut(*index) else { continue };
        let (Some(a), Some(b)) = bodies.get_pair_mut(contact.body_a, contact.body_b) else { continue };
        for (point, row) in contact.points.iter_mut().zip(rows) {
            point.normal_impulse *= ratio;
            point.tangent_impulse[0] *= ratio;
            point.tangent_impulse[1] *= ratio;
            part::apply_impulse(&mut a.motion, row.r_a, &mut b.motion, row.r_b, row.normal_axis, point.normal_impulse);
            part::apply_impulse(&mut a.motion, row.r_a, &mut b.motion, row.r_b, row.tangent_axes[0], point.tangent_impulse[0]);
            part::apply_impulse(&mut a.motion, row.r_a, &mut b.motion, row.r_b, row.tangent_axes[1], point.tangent_impulse[1]);
        }
    }
}

/// Solves one clamped row, mirroring `AxisConstraintPart::solve_velocity`'s
/// lambda/clamp/delta-apply shape but reading/writing the accumulator that
/// lives on `ContactPoint` instead of inside the row itself (so the
/// accumulator survives warm-starting into the next step without this
/// module having to own contact storage).
fn solve_row(
    motion_a: &mut crate::body::motion::MotionProperties,
    r_a: Vector3<f64>,
    motion_b: &mut crate::body::motion::MotionProperties,
    r_b: Vector3<f64>,
    axis: Vector3<f64>,
    effective_mass: f64,
    bias: f64,
    min_impulse: f64,
    max_impulse: f64,
    accumulated: &mut f64,
) {
    let relative_velocity = part::relative_velocity(motion_a, r_a, motion_b, r_b, axis);
    let lambda = -effective_mass * (relative_velocity + bias);
    let old = *accumulated;
    let new_total = (old + lambda).clamp(min_impulse, max_impulse);
    let applied = new_total - old;
    *accumulated = new_total;
    part::apply_impulse(motion_a, r_a, motion_b, r_b, axis, applied);
}

/// One Gauss-Seidel velocity iteration over every point: normal row first
/// (clamped non-negative, biased by the cached restitution target), then
/// the two friction rows (Coulomb-clamped to the *current* normal impulse,
/// per spec.md §4.6).
pub fn solve_velocity(bodies: &mut BodyPool, contacts: &mut ContactCache, state: &ContactSolverState) {
    for (index, rows) in &state.rows {
        let Some(contact) = contacts.get_mut(*index) else { continue };
        let friction = contact.friction;
        let (Some(a), Some(b)) = bodies.get_pair_mut(contact.body_a, contact.body_b) else { continue };
        for (point, row) in contact.points.iter_mut().zip(rows) {
            solve_row(
                &mut a.motion,
                row.r_a,
                &mut b.motion,
                row.r_b,
                row.normal_axis,
                row.normal.effective_mass(),
                -row.restitution_bias,
                0.0,
                f64::INFINITY,
                &mut point.normal_impulse,
            );

            let limit = friction * point.normal_impulse;
            for i in 0..2 {
                solve_row(
                    &mut a.motion,
                    row.r_a,
                    &mut b.motion,
                    row.r_b,
                    row.tangent_axes[i],
                    row.tangent[i].effective_mass(),
                    0.0,
                    -limit,
                    limit,
                    &mut point.tangent_impulse[i],
                );
            }
        }
    }
}

/// Non-linear Gauss-Seidel position correction along each point's normal,
/// recomputing world points fresh (same pattern as
/// `PointConstraintPool::solve_position`). Returns the largest remaining
/// penetration, for the solver's early-termination sweep.
pub fn solve_position(bodies: &mut BodyPool, contacts: &ContactCache, contact_indices: &[u32], settings: &SolverSettings, baumgarte_beta: f64) -> f64 {
    let mut max_error = 0.0f64;
    for &index in contact_indices {
        let Some(contact) = contacts.get(index) else { continue };
        if contact.sensor || !contact.can_receive_impulses {
            continue;
        }
        let (body_a, body_b) = (contact.body_a, contact.body_b);
        let normal = {
            let Some(b) = bodies.get(body_b) else { continue };
            (b.rotation * contact.normal_local_b).normalize()
        };
        for point in &contact.points {
            let (inv_mass_a, inv_mass_b, world_a, world_b) = {
                let (Some(a), Some(b)) = (bodies.get(body_a), bodies.get(body_b)) else { continue };
                (a.motion.inverse_mass, b.motion.inverse_mass, a.position + a.rotation * point.local_a, b.position + b.rotation * point.local_b)
            };
            let separation = (world_b - world_a).dot(&normal);
            let penetration = -separation;
            max_error = max_error.max(penetration.max(0.0));
            if penetration <= settings.linear_slop {
                continue;
            }
            let inv_mass_sum = inv_mass_a + inv_mass_b;
            if inv_mass_sum <= 0.0 {
                continue;
            }
            let correction = (penetration - settings.linear_slop).min(settings.max_linear_correction) * baumgarte_beta;
            let (Some(a), Some(b)) = bodies.get_pair_mut(body_a, body_b) else { continue };
            a.position -= normal * (correction * inv_mass_a / inv_mass_sum);
            b.position += normal * (correction * inv_mass_b / inv_mass_sum);
        }
    }
    max_error
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::{BodyId, BodySettings, MotionType};
    use crate::shape::{Shape, SubShapeId};
    use nalgebra::Vector3;

    fn make_bodies() -> (BodyPool, BodyId, BodyId) {
        let mut bodies = BodyPool::new();
        let floor = bodies
            .create(BodySettings { shape: Shape::cuboid(Vector3::new(5.0, 0.5, 5.0), 0.0).unwrap(), motion_type: MotionType::Static, position: Vector3::new(0.0, -0.5, 0.0), ..Default::default() })
            .unwrap();
        let ball = bodies
            .create(BodySettings { shape: Shape::sphere(0.5).unwrap(), motion_type: MotionType::Dynamic, position: Vector3::new(0.0, 0.4, 0.0), ..Default::default() })
            .unwrap();
        bodies.get_mut(ball).unwrap().motion.linear_velocity = Vector3::new(0.0, -2.0, 0.0);
        (bodies, floor, ball)
    }

    #[test]
    fn normal_impulse_stops_a_penetrating_ball() {
        let (mut bodies, floor, ball) = make_bodies();
        let mut contacts = ContactCache::new();
        let index = contacts.create(&mut bodies, floor, SubShapeId::EMPTY, ball, SubShapeId::EMPTY, false);
        {
            let c = contacts.get_mut(index).unwrap();
            c.normal_local_b = Vector3::y();
            c.friction = 0.0;
            c.restitution = 0.0;
            c.points.push(crate::contact::ContactPoint { local_a: Vector3::new(0.0, 0.5, 0.0), local_b: Vector3::new(0.0, -0.5, 0.0), depth: 0.1, normal_impulse: 0.0, tangent_impulse: [0.0, 0.0] });
        }
        let settings = SolverSettings::default();
        let indices = [index];
        let state = setup(&bodies, &contacts, &indices, &settings);
        warm_start(&mut bodies, &mut contacts, &state, 1.0);
        for _ in 0..10 {
            solve_velocity(&mut bodies, &mut contacts, &state);
        }
        assert!(bodies.get(ball).unwrap().motion.linear_velocity.y >= -1e-6, "normal impulse should arrest downward velocity");
    }
}
