//! Per-body motion state: velocities, forces, damping, DOF mask, sleep-test
//! spheres.

use nalgebra::{Matrix3, UnitQuaternion, Vector3};

/// How a body's motion is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotionType {
    /// Never moves; infinite mass, zero velocity always.
    Static,
    /// Moves only as the host application sets its transform/velocity; not
    /// pushed by dynamic bodies.
    Kinematic,
    /// Simulated: integrated by the solver under forces and contacts.
    Dynamic,
}

/// Discrete vs. continuous motion integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotionQuality {
    /// Standard per-step integration; may tunnel through thin geometry at
    /// high speed.
    Discrete,
    /// Eligible for the CCD linear-cast sub-pass.
    LinearCast,
}

/// Bitmask selecting which of a body's six degrees of freedom the solver is
/// allowed to change: bit 0-2 are translation (x,y,z), bit 3-5 rotation
/// (x,y,z).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DofMask(pub u8);

impl DofMask {
    /// All six degrees of freedom allowed (the common case).
    pub const ALL: DofMask = DofMask(0b111111);

    pub fn translation_allowed(&self, axis: usize) -> bool {
        (self.0 & (1 << axis)) != 0
    }

    pub fn rotation_allowed(&self, axis: usize) -> bool {
        (self.0 & (1 << (axis + 3))) != 0
    }

    /// Zeros out the components of `v` whose translation DOF is locked.
    pub fn mask_linear(&self, v: Vector3<f64>) -> Vector3<f64> {
        Vector3::new(
            if self.translation_allowed(0) { v.x } else { 0.0 },
            if self.translation_allowed(1) { v.y } else { 0.0 },
            if self.translation_allowed(2) { v.z } else { 0.0 },
        )
    }

    /// Zeros out the components of `v` whose rotational DOF is locked.
    pub fn mask_angular(&self, v: Vector3<f64>) -> Vector3<f64> {
        Vector3::new(
            if self.rotation_allowed(0) { v.x } else { 0.0 },
            if self.rotation_allowed(1) { v.y } else { 0.0 },
            if self.rotation_allowed(2) { v.z } else { 0.0 },
        )
    }
}

impl Default for DofMask {
    fn default() -> Self {
        DofMask::ALL
    }
}

/// One of the three growing bounding spheres the sleep test tracks on
/// characteristic points of a body; a body whose tracked point wanders
/// outside its sphere resets the sleep timer (spec.md §3).
#[derive(Debug, Clone, Copy, Default)]
pub struct SleepSphere {
    /// Center the sphere was last reset at.
    pub center: Vector3<f64>,
    /// Current radius.
    pub radius: f64,
}

impl SleepSphere {
    /// Updates the sphere with a new tracked point; returns whether the
    /// point escaped the sphere (triggering a sleep-timer reset).
    pub fn update(&mut self, point: Vector3<f64>, max_radius: f64) -> bool {
        let dist = (point - self.center).norm();
        if dist > max_radius {
            self.center = point;
            self.radius = 0.0;
            true
        } else {
            self.radius = self.radius.max(dist);
            false
        }
    }
}

/// Velocities, forces, damping and sleep bookkeeping for one body. Only
/// meaningful for `Dynamic`/`Kinematic` bodies; `Static` bodies keep this at
/// its default (all-zero) value and the engine never mutates it.
#[derive(Debug, Clone)]
pub struct MotionProperties {
    /// Linear velocity in world space.
    pub linear_velocity: Vector3<f64>,
    /// Angular velocity in world space.
    pub angular_velocity: Vector3<f64>,
    /// Accumulated force for the current step.
    pub accumulated_force: Vector3<f64>,
    /// Accumulated torque for the current step.
    pub accumulated_torque: Vector3<f64>,
    /// Inverse mass (`0` for infinite/static).
    pub inverse_mass: f64,
    /// Inverse inertia diagonal in the principal frame.
    pub inverse_inertia_diagonal: Vector3<f64>,
    /// Rotation mapping body-space into the principal inertia frame.
    pub inertia_frame: UnitQuaternion<f64>,
    /// Linear velocity damping per second, `v *= (1 - damping)^dt`-style.
    pub linear_damping: f64,
    /// Angular velocity damping per second.
    pub angular_damping: f64,
    /// Maximum linear speed; velocities are clamped to this each step.
    pub max_linear_velocity: f64,
    /// Maximum angular speed.
    pub max_angular_velocity: f64,
    /// Degrees of freedom the solver may change.
    pub allowed_dofs: DofMask,
    /// Scales gravity's contribution to this body (0 disables gravity).
    pub gravity_factor: f64,
    /// Discrete vs. continuous collision.
    pub motion_quality: MotionQuality,
    /// Three characteristic-point sleep spheres.
    pub sleep_spheres: [SleepSphere; 3],
    /// Seconds this body has continuously been under the sleep thresholds.
    pub sleep_timer: f64,
    /// Whether this body is allowed to sleep at all.
    pub allow_sleeping: bool,
}

impl Default for MotionProperties {
    fn default() -> Self {
        Self {
            linear_velocity: Vector3::zeros(),
            angular_velocity: Vector3::zeros(),
            accumulated_force: Vector3::zeros(),
            accumulated_torque: Vector3::zeros(),
            inverse_mass: 0.0,
            inverse_inertia_diagonal: Vector3::zeros(),
            inertia_frame: UnitQuaternion::identity(),
            linear_damping: 0.0,
            angular_damping: 0.0,
            max_linear_velocity: 500.0,
            max_angular_velocity: 47.0,
            allowed_dofs: DofMask::ALL,
            gravity_factor: 1.0,
            motion_quality: MotionQuality::Discrete,
            sleep_spheres: Default::default(),
            sleep_timer: 0.0,
            allow_sleeping: true,
        }
    }
}

impl MotionProperties {
    /// World-space inverse inertia tensor, rotated by `body_rotation *
    /// inertia_frame` from the stored principal diagonal.
    pub fn world_inverse_inertia(&self, body_rotation: UnitQuaternion<f64>) -> Matrix3<f64> {
        let frame = body_rotation * self.inertia_frame;
        let r = frame.to_rotation_matrix().into_inner();
        let diag = Matrix3::from_diagonal(&self.inverse_inertia_diagonal);
        r * diag * r.transpose()
    }

    /// Clamps velocities to `max_linear_velocity`/`max_angular_velocity`.
    pub fn clamp_velocities(&mut self) {
        let lin_speed = self.linear_velocity.norm();
        if lin_speed > self.max_linear_velocity && lin_speed > 0.0 {
            self.linear_velocity *= self.max_linear_velocity / lin_speed;
        }
        let ang_speed = self.angular_velocity.norm();
        if ang_speed > self.max_angular_velocity && ang_speed > 0.0 {
            self.angular_velocity *= self.max_angular_velocity / ang_speed;
        }
    }

    /// Applies damping for a time step of `dt` seconds.
    pub fn apply_damping(&mut self, dt: f64) {
        self.linear_velocity *= (1.0 - self.linear_damping * dt).clamp(0.0, 1.0);
        self.angular_velocity *= (1.0 - self.angular_damping * dt).clamp(0.0, 1.0);
    }

    /// Whether this body is currently slower than both sleep thresholds.
    pub fn is_slow(&self, linear_threshold: f64, angular_threshold: f64) -> bool {
        self.linear_velocity.norm() < linear_threshold && self.angular_velocity.norm() < angular_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dof_mask_locks_requested_axes() {
        let mask = DofMask(0b001001); // tx + rx only
        let v = Vector3::new(1.0, 2.0, 3.0);
        assert_eq!(mask.mask_linear(v), Vector3::new(1.0, 0.0, 0.0));
        assert_eq!(mask.mask_angular(v), Vector3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn velocity_clamp_preserves_direction() {
        let mut mp = MotionProperties { max_linear_velocity: 1.0, ..Default::default() };
        mp.linear_velocity = Vector3::new(10.0, 0.0, 0.0);
        mp.clamp_velocities();
        assert!((mp.linear_velocity.norm() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn sleep_sphere_resets_on_escape() {
        let mut sphere = SleepSphere::default();
        assert!(!sphere.update(Vector3::new(0.01, 0.0, 0.0), 0.05));
        assert!(sphere.update(Vector3::new(1.0, 0.0, 0.0), 0.05));
    }
}
