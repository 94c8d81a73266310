//! Error types for the physics engine.
//!
//! Errors only occur at construction boundaries (shapes, world settings,
//! bodies). Once a world exists, a simulation step never fails: degenerate
//! geometry and non-convergent iterative solves fall back to a best-effort
//! result and are reported through `tracing`, not through `Result`.

use thiserror::Error;

/// Result type alias for fallible physics-engine operations.
pub type PhysicsResult<T> = Result<T, PhysicsError>;

/// Errors returned by construction-time APIs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PhysicsError {
    /// A shape could not be constructed from the given parameters.
    #[error("invalid shape: {0}")]
    InvalidShape(String),

    /// A world/body/constraint configuration value was rejected.
    #[error("invalid configuration: {parameter} = {value}")]
    Configuration {
        /// Name of the offending parameter.
        parameter: String,
        /// String rendering of the offending value.
        value: String,
    },

    /// A `Dynamic` body was created with a shape that has no well-defined
    /// mass distribution (e.g. a triangle mesh) and no
    /// `mass_properties_override`.
    #[error("mass properties undefined for this shape; provide a mass_properties_override")]
    MassUndefined,

    /// Referenced an object layer that was never registered with
    /// `WorldSettings::add_object_layer`.
    #[error("unregistered object layer {0:?}")]
    UnknownObjectLayer(ObjectLayerId),

    /// Referenced a broadphase layer that was never registered with
    /// `WorldSettings::add_broadphase_layer`.
    #[error("unregistered broadphase layer {0:?}")]
    UnknownBroadphaseLayer(BroadPhaseLayerId),

    /// Internal-only marker for "this contact's geometry degenerated to a
    /// zero-impulse fallback" (e.g. a zero-length contact normal, or an
    /// effective mass that did not invert cleanly). Never returned from a
    /// public API — the step that hits this path logs it through `tracing`
    /// and carries on per spec.md §7 ("inside the step, no error is
    /// fatal"); the variant exists so that internal helpers which are
    /// naturally `Result`-shaped (building an `AxisConstraintPart` row from
    /// degenerate geometry) have a named case to match on instead of
    /// silently returning a zero row.
    #[error("degenerate contact geometry, falling back to a zero-impulse contact")]
    Degenerate,
}

impl PhysicsError {
    /// Builds a [`PhysicsError::Configuration`] from a parameter name and a
    /// `Display`-able value.
    pub fn configuration(parameter: impl Into<String>, value: impl ToString) -> Self {
        Self::Configuration {
            parameter: parameter.into(),
            value: value.to_string(),
        }
    }
}

use crate::broadphase::{BroadPhaseLayerId, ObjectLayerId};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_error_renders_parameter_and_value() {
        let err = PhysicsError::configuration("linear_damping", -1.0);
        assert!(err.to_string().contains("linear_damping"));
        assert!(err.to_string().contains("-1"));
    }

    #[test]
    fn mass_undefined_has_stable_message() {
        let err = PhysicsError::MassUndefined;
        assert!(err.to_string().contains("mass_properties_override"));
    }
}
