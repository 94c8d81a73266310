//! World-level configuration: gravity, solver iteration counts, CCD and
//! sleep thresholds, and the broadphase/object layer registries.
//!
//! One `*Settings` struct per concern, each `Default`-able, assembled into
//! one root struct — narrowed to the knobs this engine actually has a use
//! for; there is no deformable, vehicle, or parallel-threads sub-config
//! here, since those subsystems do not exist in this crate.

use crate::broadphase::{BroadPhaseLayerId, LayerTable, ObjectLayerId};
use crate::error::{PhysicsError, PhysicsResult};
use nalgebra::Vector3;

/// Root configuration for a [`crate::world::World`].
///
/// Built with [`WorldSettings::builder`], mirroring this corpus's
/// `PhysicsConfig::default()` assembly of independently-defaulted
/// sub-configs.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WorldSettings {
    /// Acceleration applied to every active dynamic body each step, scaled
    /// by its `gravity_factor`.
    pub gravity: Vector3<f64>,
    /// Continuous collision detection thresholds.
    pub ccd: CcdSettings,
    /// Constraint solver iteration counts and stabilization parameters.
    pub solver: SolverSettings,
    /// Sleep-test thresholds and timers.
    pub sleep: SleepSettings,
    /// Broadphase/object layer registry and collision matrix.
    pub layers: LayerTable,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            gravity: Vector3::new(0.0, -9.81, 0.0),
            ccd: CcdSettings::default(),
            solver: SolverSettings::default(),
            sleep: SleepSettings::default(),
            layers: LayerTable::default(),
        }
    }
}

impl WorldSettings {
    /// Starts a [`WorldSettingsBuilder`] seeded with engine defaults.
    pub fn builder() -> WorldSettingsBuilder {
        WorldSettingsBuilder { settings: WorldSettings::default() }
    }
}

/// Builder for [`WorldSettings`]; every setter returns `Self` for chaining
/// and `build()` validates cross-field invariants.
pub struct WorldSettingsBuilder {
    settings: WorldSettings,
}

impl WorldSettingsBuilder {
    /// Overrides gravity (default `[0, -9.81, 0]`).
    pub fn gravity(mut self, gravity: Vector3<f64>) -> Self {
        self.settings.gravity = gravity;
        self
    }

    /// Overrides the CCD sub-settings.
    pub fn ccd(mut self, ccd: CcdSettings) -> Self {
        self.settings.ccd = ccd;
        self
    }

    /// Overrides the solver sub-settings.
    pub fn solver(mut self, solver: SolverSettings) -> Self {
        self.settings.solver = solver;
        self
    }

    /// Overrides the sleep sub-settings.
    pub fn sleep(mut self, sleep: SleepSettings) -> Self {
        self.settings.sleep = sleep;
        self
    }

    /// Registers a new broadphase layer (e.g. "static", "dynamic", "debris").
    pub fn add_broadphase_layer(mut self) -> (Self, BroadPhaseLayerId) {
        let id = self.settings.layers.add_broadphase_layer();
        (self, id)
    }

    /// Registers a new object layer mapped into an existing broadphase
    /// layer.
    pub fn add_object_layer(mut self, broadphase_layer: BroadPhaseLayerId) -> PhysicsResult<(Self, ObjectLayerId)> {
        let id = self.settings.layers.add_object_layer(broadphase_layer)?;
        Ok((self, id))
    }

    /// Enables collision between two object layers.
    pub fn enable_collision(mut self, a: ObjectLayerId, b: ObjectLayerId) -> PhysicsResult<Self> {
        self.settings.layers.enable_collision(a, b)?;
        Ok(self)
    }

    /// Validates and finalizes the settings.
    pub fn build(self) -> PhysicsResult<WorldSettings> {
        self.settings.solver.validate()?;
        self.settings.ccd.validate()?;
        self.settings.sleep.validate()?;
        Ok(self.settings)
    }
}

/// Continuous collision detection thresholds.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct CcdSettings {
    /// A body moving more than this fraction of its own extent in one step
    /// is considered fast enough to need a linear-cast sub-pass, even if
    /// its motion quality isn't `LinearCast`-tagged explicitly as a hard
    /// requirement — the flag on the body is what actually gates the pass,
    /// this threshold only decides whether the cast was *necessary*.
    pub linear_cast_threshold: f64,
    /// Extra contact margin kept around a swept cast so the TOI solve has
    /// a small penetration budget instead of landing exactly on contact.
    pub penetration_tolerance: f64,
}

impl Default for CcdSettings {
    fn default() -> Self {
        Self {
            linear_cast_threshold: 0.05,
            penetration_tolerance: 0.02,
        }
    }
}

impl CcdSettings {
    fn validate(&self) -> PhysicsResult<()> {
        if !(self.linear_cast_threshold > 0.0) {
            return Err(PhysicsError::configuration("ccd.linear_cast_threshold", self.linear_cast_threshold));
        }
        if !(self.penetration_tolerance >= 0.0) {
            return Err(PhysicsError::configuration("ccd.penetration_tolerance", self.penetration_tolerance));
        }
        Ok(())
    }
}

/// Constraint solver iteration counts and stabilization parameters, shared
/// by every constraint kind unless a per-constraint override is set.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct SolverSettings {
    /// Velocity-solve iterations per step.
    pub velocity_iterations: u32,
    /// Position-correction (Baumgarte) iterations per step.
    pub position_iterations: u32,
    /// Baumgarte stabilization factor in `[0, 1]`.
    pub baumgarte_beta: f64,
    /// Penetration allowed to remain uncorrected before Baumgarte engages
    /// (prevents jitter from correcting out float noise).
    pub linear_slop: f64,
    /// GJK/EPA distance tolerance; also used as the narrowphase's
    /// `collisionTolerance`.
    pub collision_tolerance: f64,
    /// Relative velocity below which restitution is not applied, to avoid
    /// resting contacts bouncing forever on floating-point noise.
    pub restitution_velocity_threshold: f64,
    /// Maximum linear correction applied by a single position iteration.
    pub max_linear_correction: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            velocity_iterations: 10,
            position_iterations: 2,
            baumgarte_beta: 0.2,
            linear_slop: 0.005,
            collision_tolerance: 1e-4,
            restitution_velocity_threshold: 1.0,
            max_linear_correction: 0.2,
        }
    }
}

impl SolverSettings {
    fn validate(&self) -> PhysicsResult<()> {
        if self.velocity_iterations == 0 {
            return Err(PhysicsError::configuration("solver.velocity_iterations", self.velocity_iterations));
        }
        if !(0.0..=1.0).contains(&self.baumgarte_beta) {
            return Err(PhysicsError::configuration("solver.baumgarte_beta", self.baumgarte_beta));
        }
        if !(self.collision_tolerance > 0.0) {
            return Err(PhysicsError::configuration("solver.collision_tolerance", self.collision_tolerance));
        }
        Ok(())
    }
}

/// Sleep-test thresholds and timers.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct SleepSettings {
    /// Linear speed below which a body is considered "slow" for sleeping.
    pub linear_velocity_threshold: f64,
    /// Angular speed below which a body is considered "slow" for sleeping.
    pub angular_velocity_threshold: f64,
    /// Seconds a body must stay under both thresholds before it sleeps.
    pub time_before_sleep: f64,
    /// Radius growth rate of the three sleep-test spheres; a body whose
    /// tracked points wander outside their sphere resets its sleep timer.
    pub sleep_sphere_radius: f64,
}

impl Default for SleepSettings {
    fn default() -> Self {
        Self {
            linear_velocity_threshold: 0.03,
            angular_velocity_threshold: 0.05,
            time_before_sleep: 0.5,
            sleep_sphere_radius: 0.05,
        }
    }
}

impl SleepSettings {
    fn validate(&self) -> PhysicsResult<()> {
        if !(self.time_before_sleep >= 0.0) {
            return Err(PhysicsError::configuration("sleep.time_before_sleep", self.time_before_sleep));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        let settings = WorldSettings::builder().build().unwrap();
        assert_eq!(settings.gravity.y, -9.81);
        assert_eq!(settings.solver.velocity_iterations, 10);
    }

    #[test]
    fn builder_rejects_zero_velocity_iterations() {
        let mut solver = SolverSettings::default();
        solver.velocity_iterations = 0;
        let err = WorldSettings::builder().solver(solver).build();
        assert!(err.is_err());
    }

    #[test]
    fn builder_wires_layers_through() {
        let (builder, bp) = WorldSettings::builder().add_broadphase_layer();
        let (builder, a) = builder.add_object_layer(bp).unwrap();
        let (builder, b) = builder.add_object_layer(bp).unwrap();
        let builder = builder.enable_collision(a, b).unwrap();
        let settings = builder.build().unwrap();
        assert!(settings.layers.collision_enabled(a, b));
    }
}
