//! Bodies: the simulated objects themselves, their pooled storage, and the
//! generational handle scheme used throughout the crate.
//!
//! Grounded on spec.md §3 ("Body") and §9's REDESIGN FLAGS ("pooled objects
//! with generational ids" -> explicit `{index, generation}` struct rather
//! than a packed 52-bit-safe integer — see DESIGN.md for the Open Question
//! resolution).

pub mod motion;

pub use motion::{DofMask, MotionProperties, MotionQuality, MotionType, SleepSphere};

use crate::broadphase::{CollisionGroupFilter, ObjectLayerId};
use crate::broadphase::dbvt::NodeHandle;
use crate::contact::ContactKey;
use crate::error::{PhysicsError, PhysicsResult};
use crate::shape::{MassProperties, Shape};
use nalgebra::{UnitQuaternion, Vector3};

/// Opaque handle to a [`Body`]: an arena index plus a generation counter
/// that detects use of a stale id after the slot has been reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BodyId {
    /// Index into the body pool.
    pub index: u32,
    /// Generation at the time this id was issued.
    pub generation: u32,
}

impl BodyId {
    /// Sentinel value meaning "no body" (e.g. an unused constraint slot).
    pub const INVALID: BodyId = BodyId { index: u32::MAX, generation: 0 };

    /// Packs this id into the `u64` payload the broadphase tree's leaves
    /// carry, so a tree visitor can recover the body a leaf belongs to
    /// without a side table.
    pub fn to_bits(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    /// Inverse of [`BodyId::to_bits`].
    pub fn from_bits(bits: u64) -> BodyId {
        BodyId { index: (bits & 0xFFFF_FFFF) as u32, generation: (bits >> 32) as u32 }
    }
}

/// How two bodies' friction or restitution values are combined into one
/// per-contact coefficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CombineMode {
    /// `(a + b) / 2`.
    Average,
    /// `sqrt(a * b)`.
    GeometricMean,
    /// `min(a, b)`.
    Min,
    /// `max(a, b)`.
    Max,
    /// `a * b`.
    Multiply,
}

impl CombineMode {
    /// Combines two material coefficients per this mode. The pairing is
    /// resolved by favoring the "most restrictive" choice when the two
    /// bodies request different modes: `Max` beats `Multiply`/`Average`
    /// beats `GeometricMean` beats `Min`, matching the common convention
    /// that a higher-friction/higher-restitution material shouldn't be
    /// silently diluted by its partner's quieter combine rule.
    pub fn combine(a: f64, b: f64, mode_a: CombineMode, mode_b: CombineMode) -> f64 {
        let mode = Self::resolve(mode_a, mode_b);
        match mode {
            CombineMode::Average => (a + b) * 0.5,
            CombineMode::GeometricMean => (a * b).max(0.0).sqrt(),
            CombineMode::Min => a.min(b),
            CombineMode::Max => a.max(b),
            CombineMode::Multiply => a * b,
        }
    }

    fn resolve(a: CombineMode, b: CombineMode) -> CombineMode {
        fn rank(m: CombineMode) -> u8 {
            match m {
                CombineMode::Max => 4,
                CombineMode::Multiply => 3,
                CombineMode::Average => 2,
                CombineMode::GeometricMean => 1,
                CombineMode::Min => 0,
            }
        }
        if rank(a) >= rank(b) { a } else { b }
    }
}

/// Surface material: friction/restitution plus their per-body combine
/// modes.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Material {
    /// Coulomb friction coefficient.
    pub friction: f64,
    /// Coefficient of restitution in `[0, 1]`.
    pub restitution: f64,
    /// How this body's friction combines with its contact partner's.
    pub friction_combine: CombineMode,
    /// How this body's restitution combines with its contact partner's.
    pub restitution_combine: CombineMode,
}

impl Default for Material {
    fn default() -> Self {
        Self { friction: 0.2, restitution: 0.0, friction_combine: CombineMode::Average, restitution_combine: CombineMode::Average }
    }
}

/// One simulated object: transform, shape, mass, material, filtering flags,
/// and the bookkeeping fields (contact list head, island/active/CCD index)
/// the rest of the engine threads through.
#[derive(Debug, Clone)]
pub struct Body {
    /// This body's own id (duplicated here for convenience since callbacks
    /// often only have a `&Body`).
    pub id: BodyId,
    /// Static / Kinematic / Dynamic.
    pub motion_type: MotionType,
    /// World-space position of the shape's origin (not the center of
    /// mass).
    pub position: Vector3<f64>,
    /// World-space orientation.
    pub rotation: UnitQuaternion<f64>,
    /// Object layer, used for broadphase/narrowphase filtering.
    pub object_layer: ObjectLayerId,
    /// Broadphase tree node, once inserted.
    pub broadphase_node: Option<NodeHandle>,
    /// Collision shape.
    pub shape: Shape,
    /// Cached mass properties (from the shape, or a user override).
    pub mass_properties: MassProperties,
    /// Velocities/forces/damping/sleep state; meaningless for `Static`
    /// bodies (kept at default).
    pub motion: MotionProperties,
    /// Surface material.
    pub material: Material,
    /// Collision group/mask filter.
    pub collision_filter: CollisionGroupFilter,
    /// Produces contacts and fires listener callbacks, but never
    /// contributes to the solver.
    pub sensor: bool,
    /// Suppresses contacts against inactive internal mesh edges.
    pub enhanced_internal_edge_removal: bool,
    /// Opt-in manifold reduction: contacts from different sub-shapes whose
    /// normals are near-parallel are merged, deepest wins.
    pub use_manifold_reduction: bool,
    /// Whether this body may go to sleep.
    pub allow_sleeping: bool,
    /// Whether this body is currently asleep (absent from the active list).
    pub sleeping: bool,
    /// Head of this body's intrusive contact list; `None` if it has no
    /// contacts.
    pub head_contact: Option<ContactKey>,
    /// Index into the current step's island list, if active.
    pub island_index: Option<u32>,
    /// Index into the world's active-body list, if active.
    pub active_index: Option<u32>,
    /// Index into the CCD pass's per-step array, if eligible this step.
    pub ccd_index: Option<u32>,
    /// Constraint ids referencing this body.
    pub constraint_ids: Vec<crate::constraint::ConstraintId>,
    /// Opaque host-application payload.
    pub user_data: u64,
    /// Set once this slot has been returned to the free list.
    pub pooled: bool,
}

impl Body {
    /// World-space center of mass: `position + rotate(rotation,
    /// shape.center_of_mass)` (spec.md §3 invariant).
    pub fn center_of_mass_position(&self) -> Vector3<f64> {
        self.position + self.rotation * self.mass_properties.center_of_mass
    }

    /// World-space AABB enclosing the transformed shape.
    pub fn world_aabb(&self) -> crate::math::Aabb3 {
        self.shape.aabb(self.position, self.rotation)
    }

    /// World-space velocity of the material point currently at `world_point`.
    pub fn velocity_at_point(&self, world_point: Vector3<f64>) -> Vector3<f64> {
        let r = world_point - self.center_of_mass_position();
        self.motion.linear_velocity + self.motion.angular_velocity.cross(&r)
    }

    /// Whether this body currently participates in the active simulation
    /// (non-static and not asleep).
    pub fn is_active(&self) -> bool {
        !matches!(self.motion_type, MotionType::Static) && !self.sleeping
    }
}

/// Construction-time parameters for [`crate::world::World::create_body`].
#[derive(Debug, Clone)]
pub struct BodySettings {
    pub shape: Shape,
    pub object_layer: ObjectLayerId,
    pub motion_type: MotionType,
    pub position: Vector3<f64>,
    pub rotation: UnitQuaternion<f64>,
    pub motion_quality: MotionQuality,
    pub allowed_dofs: DofMask,
    pub gravity_factor: f64,
    pub linear_damping: f64,
    pub angular_damping: f64,
    pub max_linear_velocity: f64,
    pub max_angular_velocity: f64,
    pub friction: f64,
    pub restitution: f64,
    pub friction_combine: CombineMode,
    pub restitution_combine: CombineMode,
    pub collision_filter: CollisionGroupFilter,
    pub use_manifold_reduction: bool,
    pub allow_sleeping: bool,
    pub sensor: bool,
    pub enhanced_internal_edge_removal: bool,
    pub mass_properties_override: Option<MassProperties>,
    pub user_data: u64,
}

impl Default for BodySettings {
    fn default() -> Self {
        Self {
            shape: Shape::Empty,
            object_layer: ObjectLayerId(0),
            motion_type: MotionType::Static,
            position: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
            motion_quality: MotionQuality::Discrete,
            allowed_dofs: DofMask::ALL,
            gravity_factor: 1.0,
            linear_damping: 0.0,
            angular_damping: 0.0,
            max_linear_velocity: 500.0,
            max_angular_velocity: 47.0,
            friction: 0.2,
            restitution: 0.0,
            friction_combine: CombineMode::Average,
            restitution_combine: CombineMode::Average,
            collision_filter: CollisionGroupFilter::default(),
            use_manifold_reduction: false,
            allow_sleeping: true,
            sensor: false,
            enhanced_internal_edge_removal: false,
            mass_properties_override: None,
            user_data: 0,
        }
    }
}

/// Pooled storage for bodies: index reuse with a free list, generation
/// counters preserved across reuse so stale handles are detected.
#[derive(Debug, Default)]
pub struct BodyPool {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
}

#[derive(Debug)]
enum Slot {
    Occupied(Body),
    Free { generation: u32 },
}

impl BodyPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates `settings` and inserts a new body, taking a free slot if
    /// one exists or growing the pool otherwise.
    pub fn create(&mut self, settings: BodySettings) -> PhysicsResult<BodyId> {
        let mass_properties = match settings.motion_type {
            MotionType::Dynamic => match settings.mass_properties_override {
                Some(mp) => mp,
                None => settings.shape.mass_properties(1.0).ok_or(PhysicsError::MassUndefined)?,
            },
            _ => settings.mass_properties_override.unwrap_or_else(MassProperties::zero),
        };

        if settings.linear_damping < 0.0 {
            return Err(PhysicsError::configuration("linear_damping", settings.linear_damping));
        }
        if settings.angular_damping < 0.0 {
            return Err(PhysicsError::configuration("angular_damping", settings.angular_damping));
        }
        if !settings.position.iter().all(|c| c.is_finite()) {
            return Err(PhysicsError::configuration("position", "non-finite"));
        }

        let mut motion = MotionProperties {
            linear_damping: settings.linear_damping,
            angular_damping: settings.angular_damping,
            max_linear_velocity: settings.max_linear_velocity,
            max_angular_velocity: settings.max_angular_velocity,
            allowed_dofs: settings.allowed_dofs,
            gravity_factor: settings.gravity_factor,
            motion_quality: settings.motion_quality,
            allow_sleeping: settings.allow_sleeping,
            ..MotionProperties::default()
        };
        if matches!(settings.motion_type, MotionType::Dynamic) {
            motion.inverse_mass = mass_properties.inverse_mass();
            let inv_inertia = mass_properties.inverse_inertia();
            // Diagonalizing a general tensor is out of scope for this
            // constructor path; shapes built from symmetric primitives
            // already return a diagonal body-space inertia, which covers
            // every primitive this crate ships.
            motion.inverse_inertia_diagonal =
                Vector3::new(inv_inertia.m11, inv_inertia.m22, inv_inertia.m33);
        }

        let body = Body {
            id: BodyId::INVALID,
            motion_type: settings.motion_type,
            position: settings.position,
            rotation: settings.rotation,
            object_layer: settings.object_layer,
            broadphase_node: None,
            shape: settings.shape,
            mass_properties,
            motion,
            material: Material {
                friction: settings.friction,
                restitution: settings.restitution,
                friction_combine: settings.friction_combine,
                restitution_combine: settings.restitution_combine,
            },
            collision_filter: settings.collision_filter,
            sensor: settings.sensor,
            enhanced_internal_edge_removal: settings.enhanced_internal_edge_removal,
            use_manifold_reduction: settings.use_manifold_reduction,
            allow_sleeping: settings.allow_sleeping,
            sleeping: false,
            head_contact: None,
            island_index: None,
            active_index: None,
            ccd_index: None,
            constraint_ids: Vec::new(),
            user_data: settings.user_data,
            pooled: false,
        };

        let id = if let Some(index) = self.free_list.pop() {
            let generation = match &self.slots[index as usize] {
                Slot::Free { generation } => *generation,
                Slot::Occupied(_) => unreachable!("free list pointed at occupied slot"),
            };
            let mut body = body;
            body.id = BodyId { index, generation };
            self.slots[index as usize] = Slot::Occupied(body);
            BodyId { index, generation }
        } else {
            let index = self.slots.len() as u32;
            let mut body = body;
            body.id = BodyId { index, generation: 0 };
            self.slots.push(Slot::Occupied(body));
            BodyId { index, generation: 0 }
        };

        Ok(id)
    }

    /// Returns a slot to the free list, bumping its generation so existing
    /// ids become stale.
    pub fn remove(&mut self, id: BodyId) -> bool {
        match self.slots.get_mut(id.index as usize) {
            Some(Slot::Occupied(body)) if body.id.generation == id.generation => {
                self.slots[id.index as usize] = Slot::Free { generation: id.generation.wrapping_add(1) };
                self.free_list.push(id.index);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, id: BodyId) -> Option<&Body> {
        match self.slots.get(id.index as usize) {
            Some(Slot::Occupied(body)) if body.id.generation == id.generation => Some(body),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, id: BodyId) -> Option<&mut Body> {
        match self.slots.get_mut(id.index as usize) {
            Some(Slot::Occupied(body)) if body.id.generation == id.generation => Some(body),
            _ => None,
        }
    }

    /// Borrows two distinct bodies mutably at once via `split_at_mut` on the
    /// backing slice, the way a sequential-impulse solver needs to touch both
    /// ends of a contact in one pass. Returns `None` for either id that is
    /// absent/stale; panics if
    /// `a.index == b.index` (a constraint or contact between a body and
    /// itself is never constructed).
    pub fn get_pair_mut(&mut self, a: BodyId, b: BodyId) -> (Option<&mut Body>, Option<&mut Body>) {
        assert_ne!(a.index, b.index, "cannot borrow the same body twice");
        let (lo_idx, hi_idx, swapped) = if a.index < b.index { (a.index, b.index, false) } else { (b.index, a.index, true) };
        let (left, right) = self.slots.split_at_mut(hi_idx as usize);
        let lo = match &mut left[lo_idx as usize] {
            Slot::Occupied(body) if body.id.generation == if swapped { b.generation } else { a.generation } => Some(body),
            _ => None,
        };
        let hi = match &mut right[0] {
            Slot::Occupied(body) if body.id.generation == if swapped { a.generation } else { b.generation } => Some(body),
            _ => None,
        };
        if swapped { (hi, lo) } else { (lo, hi) }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Body> {
        self.slots.iter().filter_map(|s| match s {
            Slot::Occupied(b) => Some(b),
            Slot::Free { .. } => None,
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Body> {
        self.slots.iter_mut().filter_map(|s| match s {
            Slot::Occupied(b) => Some(b),
            Slot::Free { .. } => None,
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Upper bound on live `BodyId::index` values (including freed slots),
    /// for scratch arrays indexed directly by body index, e.g. the island
    /// builder's union-find parent array.
    pub fn capacity_hint(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_of_mass_matches_invariant() {
        let mut settings = BodySettings { shape: Shape::sphere(1.0).unwrap(), motion_type: MotionType::Dynamic, ..Default::default() };
        settings.position = Vector3::new(1.0, 2.0, 3.0);
        let mut pool = BodyPool::new();
        let id = pool.create(settings).unwrap();
        let body = pool.get(id).unwrap();
        assert_eq!(body.center_of_mass_position(), body.position + body.rotation * body.mass_properties.center_of_mass);
    }

    #[test]
    fn stale_id_after_reuse_is_absent() {
        let mut pool = BodyPool::new();
        let a = pool.create(BodySettings::default()).unwrap();
        pool.remove(a);
        let b = pool.create(BodySettings::default()).unwrap();
        assert_eq!(a.index, b.index);
        assert_ne!(a.generation, b.generation);
        assert!(pool.get(a).is_none());
        assert!(pool.get(b).is_some());
    }

    #[test]
    fn dynamic_body_without_mass_for_mesh_fails() {
        let mesh = crate::shape::TriangleMesh::new(vec![crate::shape::Triangle {
            vertices: [Vector3::zeros(), Vector3::x(), Vector3::y()],
            active_edges: 0b111,
            material_index: 0,
        }])
        .unwrap();
        let settings = BodySettings { shape: Shape::TriangleMesh(mesh), motion_type: MotionType::Dynamic, ..Default::default() };
        let mut pool = BodyPool::new();
        assert!(pool.create(settings).is_err());
    }

    #[test]
    fn static_body_has_zero_velocity_always() {
        let settings = BodySettings { motion_type: MotionType::Static, ..Default::default() };
        let mut pool = BodyPool::new();
        let id = pool.create(settings).unwrap();
        let body = pool.get(id).unwrap();
        assert_eq!(body.motion.linear_velocity, Vector3::zeros());
        assert_eq!(body.motion.angular_velocity, Vector3::zeros());
    }

    #[test]
    fn get_pair_mut_borrows_both_regardless_of_order() {
        let mut pool = BodyPool::new();
        let a = pool.create(BodySettings::default()).unwrap();
        let b = pool.create(BodySettings::default()).unwrap();

        let (ba, bb) = pool.get_pair_mut(a, b);
        ba.unwrap().position.x = 1.0;
        bb.unwrap().position.x = 2.0;

        let (bb2, ba2) = pool.get_pair_mut(b, a);
        assert_eq!(bb2.unwrap().position.x, 2.0);
        assert_eq!(ba2.unwrap().position.x, 1.0);
    }
}
