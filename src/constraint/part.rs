//! Reusable single-axis velocity/position constraint building blocks.
//!
//! Every joint in this module is assembled from one or more of these 1D
//! "parts" rather than a bespoke Jacobian per joint kind. The teacher
//! crate's `rigid_body::constraints` does not itself factor its joints this
//! way — `ContactConstraint`, `BallSocketJoint` and `HingeJoint` each inline
//! their own Jacobian math — so this single-axis-part abstraction is an
//! external, Bullet/Jolt-style pattern layered on top of the teacher's
//! per-body effective-mass formula rather than something carried over from
//! it.

use crate::body::MotionProperties;
use nalgebra::{Matrix3, Vector3};

/// A single scalar velocity constraint row: `J * v + bias <= / == / >= 0`
/// enforced along a world-space axis with lever arms `r_a`/`r_b` from each
/// body's center of mass.
#[derive(Debug, Clone, Copy, Default)]
pub struct AxisConstraintPart {
    effective_mass: f64,
    total_impulse: f64,
}

impl AxisConstraintPart {
    /// Recomputes the effective mass for this axis; call once per step
    /// before any `solve_velocity` calls, since lever arms are fixed for the
    /// duration of the step (setup once, then iterate).
    pub fn calculate_effective_mass(
        &mut self,
        inv_mass_a: f64,
        inv_inertia_a: Matrix3<f64>,
        r_a: Vector3<f64>,
        inv_mass_b: f64,
        inv_inertia_b: Matrix3<f64>,
        r_b: Vector3<f64>,
        axis: Vector3<f64>,
    ) {
        let rxn_a = r_a.cross(&axis);
        let rxn_b = r_b.cross(&axis);
        let inv_effective_mass = inv_mass_a + inv_mass_b + rxn_a.dot(&(inv_inertia_a * rxn_a)) + rxn_b.dot(&(inv_inertia_b * rxn_b));
        self.effective_mass = if inv_effective_mass > 1e-12 { 1.0 / inv_effective_mass } else { 0.0 };
    }

    /// Resets the accumulated impulse (call once per step before warm
    /// starting, or at creation).
    pub fn reset_impulse(&mut self) {
        self.total_impulse = 0.0;
    }

    pub fn total_impulse(&self) -> f64 {
        self.total_impulse
    }

    /// The effective mass computed by the last [`Self::calculate_effective_mass`]
    /// call, exposed so callers that manage their own impulse accumulator
    /// (the contact solver, which persists impulses on `ContactPoint`
    /// instead of here) can drive the same row math without going through
    /// `solve_velocity`'s internal `total_impulse` bookkeeping.
    pub(crate) fn effective_mass(&self) -> f64 {
        self.effective_mass
    }

    /// Applies a previously accumulated impulse without resolving the
    /// constraint, so velocities carry over between steps (warm start).
    pub fn warm_start(
        &self,
        motion_a: &mut MotionProperties,
        r_a: Vector3<f64>,
        motion_b: &mut MotionProperties,
        r_b: Vector3<f64>,
        axis: Vector3<f64>,
        ratio: f64,
    ) {
        let impulse = self.total_impulse * ratio;
        apply_impulse(motion_a, r_a, motion_b, r_b, axis, impulse);
    }

    /// Solves this row for one velocity iteration, optionally clamped to
    /// `[min_impulse, max_impulse]` (both infinite for an equality
    /// constraint), and applies the resulting delta impulse to both
    /// bodies. `bias` folds in Baumgarte position correction / restitution
    /// target velocity; pass `0.0` for a pure velocity-only row.
    pub fn solve_velocity(
        &mut self,
        motion_a: &mut MotionProperties,
        r_a: Vector3<f64>,
        motion_b: &mut MotionProperties,
        r_b: Vector3<f64>,
        axis: Vector3<f64>,
        bias: f64,
        min_impulse: f64,
        max_impulse: f64,
    ) -> f64 {
        let relative_velocity = relative_velocity(motion_a, r_a, motion_b, r_b, axis);
        let lambda = -self.effective_mass * (relative_velocity + bias);
        let old = self.total_impulse;
        let new_total = (old + lambda).clamp(min_impulse, max_impulse);
        let applied = new_total - old;
        self.total_impulse = new_total;
        apply_impulse(motion_a, r_a, motion_b, r_b, axis, applied);
        applied
    }
}

pub(crate) fn relative_velocity(motion_a: &MotionProperties, r_a: Vector3<f64>, motion_b: &MotionProperties, r_b: Vector3<f64>, axis: Vector3<f64>) -> f64 {
    let va = motion_a.linear_velocity + motion_a.angular_velocity.cross(&r_a);
    let vb = motion_b.linear_velocity + motion_b.angular_velocity.cross(&r_b);
    (vb - va).dot(&axis)
}

pub(crate) fn apply_impulse(motion_a: &mut MotionProperties, r_a: Vector3<f64>, motion_b: &mut MotionProperties, r_b: Vector3<f64>, axis: Vector3<f64>, impulse: f64) {
    if impulse == 0.0 {
        return;
    }
    let p = axis * impulse;
    motion_a.linear_velocity -= p * motion_a.inverse_mass;
    motion_b.linear_velocity += p * motion_b.inverse_mass;
    // Angular response uses the world-space inverse inertia of each body;
    // callers pass identity-frame bodies' diagonal directly when they have
    // no principal-frame rotation, matching `MotionProperties::world_inverse_inertia`.
    motion_a.angular_velocity -= Matrix3::from_diagonal(&motion_a.inverse_inertia_diagonal) * r_a.cross(&p);
    motion_b.angular_velocity += Matrix3::from_diagonal(&motion_b.inverse_inertia_diagonal) * r_b.cross(&p);
}

/// A 3-DOF point constraint: drives the world-space gap between two
/// anchor points to zero using a single 3x3 block solve per iteration,
/// rather than three independent scalar rows (which would fight each
/// other whenever the two bodies' inertia isn't axis-aligned).
#[derive(Debug, Clone, Copy, Default)]
pub struct Point3ConstraintPart {
    /// Inverse of the combined 3x3 effective mass matrix.
    inverse_effective_mass: Matrix3<f64>,
    total_impulse: Vector3<f64>,
}

impl Point3ConstraintPart {
    pub fn calculate_effective_mass(&mut self, inv_mass_a: f64, inv_inertia_a: Matrix3<f64>, r_a: Vector3<f64>, inv_mass_b: f64, inv_inertia_b: Matrix3<f64>, r_b: Vector3<f64>) {
        let skew_a = skew(r_a);
        let skew_b = skew(r_b);
        let k = Matrix3::identity() * (inv_mass_a + inv_mass_b) - skew_a * inv_inertia_a * skew_a - skew_b * inv_inertia_b * skew_b;
        self.inverse_effective_mass = k.try_inverse().unwrap_or_else(Matrix3::zeros);
    }

    pub fn reset_impulse(&mut self) {
        self.total_impulse = Vector3::zeros();
    }

    pub fn warm_start(&self, motion_a: &mut MotionProperties, r_a: Vector3<f64>, motion_b: &mut MotionProperties, r_b: Vector3<f64>, ratio: f64) {
        apply_impulse3(motion_a, r_a, motion_b, r_b, self.total_impulse * ratio);
    }

    /// Solves towards `bias` (typically a Baumgarte-scaled position error,
    /// zero for a velocity-only pass) and applies the resulting impulse.
    pub fn solve_velocity(&mut self, motion_a: &mut MotionProperties, r_a: Vector3<f64>, motion_b: &mut MotionProperties, r_b: Vector3<f64>, bias: Vector3<f64>) {
        let va = motion_a.linear_velocity + motion_a.angular_velocity.cross(&r_a);
        let vb = motion_b.linear_velocity + motion_b.angular_velocity.cross(&r_b);
        let relative_velocity = vb - va + bias;
        let impulse = -(self.inverse_effective_mass * relative_velocity);
        self.total_impulse += impulse;
        apply_impulse3(motion_a, r_a, motion_b, r_b, impulse);
    }
}

fn skew(v: Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

fn apply_impulse3(motion_a: &mut MotionProperties, r_a: Vector3<f64>, motion_b: &mut MotionProperties, r_b: Vector3<f64>, impulse: Vector3<f64>) {
    motion_a.linear_velocity -= impulse * motion_a.inverse_mass;
    motion_b.linear_velocity += impulse * motion_b.inverse_mass;
    motion_a.angular_velocity -= Matrix3::from_diagonal(&motion_a.inverse_inertia_diagonal) * r_a.cross(&impulse);
    motion_b.angular_velocity += Matrix3::from_diagonal(&motion_b.inverse_inertia_diagonal) * r_b.cross(&impulse);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dynamic_motion(inv_mass: f64) -> MotionProperties {
        MotionProperties { inverse_mass: inv_mass, inverse_inertia_diagonal: Vector3::repeat(inv_mass), ..Default::default() }
    }

    #[test]
    fn solve_velocity_drives_relative_velocity_towards_bias() {
        let mut part = AxisConstraintPart::default();
        let mut a = dynamic_motion(1.0);
        let mut b = dynamic_motion(1.0);
        a.linear_velocity = Vector3::new(-1.0, 0.0, 0.0);
        b.linear_velocity = Vector3::new(1.0, 0.0, 0.0);
        part.calculate_effective_mass(a.inverse_mass, Matrix3::from_diagonal(&a.inverse_inertia_diagonal), Vector3::zeros(), b.inverse_mass, Matrix3::from_diagonal(&b.inverse_inertia_diagonal), Vector3::zeros(), Vector3::x());
        for _ in 0..8 {
            part.solve_velocity(&mut a, Vector3::zeros(), &mut b, Vector3::zeros(), Vector3::x(), 0.0, f64::NEG_INFINITY, f64::INFINITY);
        }
        let relative = (b.linear_velocity - a.linear_velocity).dot(&Vector3::x());
        assert!(relative.abs() < 1e-6, "relative velocity should converge to zero, got {relative}");
    }

    #[test]
    fn point3_part_converges_relative_velocity_to_zero() {
        let mut part = Point3ConstraintPart::default();
        let mut a = dynamic_motion(1.0);
        let mut b = dynamic_motion(1.0);
        a.linear_velocity = Vector3::new(-1.0, 0.5, 0.0);
        b.linear_velocity = Vector3::new(1.0, -0.5, 0.2);
        part.calculate_effective_mass(a.inverse_mass, Matrix3::from_diagonal(&a.inverse_inertia_diagonal), Vector3::zeros(), b.inverse_mass, Matrix3::from_diagonal(&b.inverse_inertia_diagonal), Vector3::zeros());
        for _ in 0..8 {
            part.solve_velocity(&mut a, Vector3::zeros(), &mut b, Vector3::zeros(), Vector3::zeros());
        }
        let relative = b.linear_velocity - a.linear_velocity;
        assert!(relative.norm() < 1e-6, "relative velocity should converge to zero, got {relative}");
    }
}
