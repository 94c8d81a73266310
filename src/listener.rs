//! The contact listener interface: a trait with optional methods (default
//! no-op implementations) fired synchronously during narrowphase and CCD.
//!
//! Grounded on spec.md §6 ("Listener") and §9's REDESIGN FLAGS ("listener
//! callbacks" -> a trait with a default impl rather than an ad-hoc object
//! with optional fields). Callbacks must not re-enter `World::update` —
//! nothing in this crate hands a listener a `&mut World`, only the narrow
//! per-callback state spec.md names, which structurally rules that out.

use crate::body::BodyId;
use crate::collide::Manifold;
use crate::shape::SubShapeId;

/// Per-contact overrides a listener may apply inside `on_contact_added`/
/// `on_contact_persisted`, read back by the narrowphase/solver for this
/// contact only (not persisted onto the body's material).
#[derive(Debug, Clone, Copy)]
pub struct ContactSettings {
    /// Friction coefficient to use for this contact, seeded from the two
    /// bodies' combined material friction.
    pub combined_friction: f64,
    /// Restitution coefficient to use for this contact, seeded from the two
    /// bodies' combined material restitution.
    pub combined_restitution: f64,
    /// Whether this contact may push a kinematic character controller.
    pub can_push_character: bool,
    /// Whether this contact may receive solver impulses at all (a listener
    /// can set this `false` to make an otherwise-solid contact pass
    /// through, e.g. a one-way platform).
    pub can_receive_impulses: bool,
}

impl Default for ContactSettings {
    fn default() -> Self {
        Self { combined_friction: 0.0, combined_restitution: 0.0, can_push_character: true, can_receive_impulses: true }
    }
}

/// Host-application hook into the contact lifecycle. Every method has a
/// default (permissive / no-op) implementation; implementors override only
/// what they need, per spec.md §6.
pub trait ContactListener {
    /// Called before narrowphase runs on a broadphase pair; returning
    /// `false` skips narrowphase for this pair entirely this step.
    fn on_body_pair_validate(&mut self, _body_a: BodyId, _body_b: BodyId) -> bool {
        true
    }

    /// Called once a manifold has been computed for a specific sub-shape
    /// pair, before it is committed to the contact cache; returning `false`
    /// discards this contact for this step.
    fn on_contact_validate(&mut self, _body_a: BodyId, _body_b: BodyId, _sub_a: SubShapeId, _sub_b: SubShapeId) -> bool {
        true
    }

    /// A new contact was created this step.
    fn on_contact_added(&mut self, _body_a: BodyId, _body_b: BodyId, _manifold: &Manifold, _settings: &mut ContactSettings) {}

    /// An existing contact persisted (both bodies were still touching).
    fn on_contact_persisted(&mut self, _body_a: BodyId, _body_b: BodyId, _manifold: &Manifold, _settings: &mut ContactSettings) {}

    /// A contact that existed last step was not refreshed and is being
    /// destroyed.
    fn on_contact_removed(&mut self, _body_a: BodyId, _body_b: BodyId, _sub_a: SubShapeId, _sub_b: SubShapeId) {}
}

/// The default listener: accepts every pair, applies no per-contact
/// overrides. Used when a caller has nothing to hook.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullContactListener;

impl ContactListener for NullContactListener {}
