//! The top-level simulation handle: owns every body, contact, constraint
//! and broadphase tree, and drives one step of the pipeline described in
//! spec.md §2 (integrate -> broadphase -> narrowphase -> islands -> solve
//! -> CCD -> sleep) from a single [`World::update`] call.
//!
//! One struct owns every subsystem; a single `update` entry point is
//! instrumented with `tracing` spans per phase, generalized to a
//! broadphase-layer/constraint-kind-agnostic pipeline rather than a fixed
//! one.

use crate::body::{Body, BodyId, BodyPool, BodySettings, MotionType};
use crate::broadphase::{BroadPhaseLayerId, BroadPhaseTree, ObjectLayerId};
use crate::ccd;
use crate::config::WorldSettings;
use crate::constraint::cone::{self, ConeConstraintSettings};
use crate::constraint::distance::{self, DistanceConstraintSettings};
use crate::constraint::fixed::{self, FixedConstraintSettings};
use crate::constraint::hinge::{self, HingeConstraintSettings};
use crate::constraint::point::{self, PointConstraintSettings};
use crate::constraint::six_dof::{self, SixDofConstraintSettings};
use crate::constraint::slider::{self, SliderConstraintSettings};
use crate::constraint::swing_twist::{self, SwingTwistConstraintSettings};
use crate::constraint::{ConstraintId, ConstraintSet};
use crate::contact::ContactCache;
use crate::error::{PhysicsError, PhysicsResult};
use crate::island::IslandBuilder;
use crate::listener::ContactListener;
use crate::narrowphase;
use crate::solver;
use nalgebra::{UnitQuaternion, Vector3};
use std::collections::HashSet;

/// Aggregate counters for one [`World::update`] call, folding in the
/// narrowphase and CCD sub-passes' own stats plus island/active-body
/// counts (spec.md §7 NEW: ambient telemetry, not part of the original
/// distilled spec but the kind of thing every step-based engine in this
/// corpus surfaces).
#[derive(Debug, Clone, Copy, Default)]
pub struct StepStats {
    pub active_bodies: u32,
    pub islands: u32,
    pub narrowphase: narrowphase::NarrowPhaseStats,
    pub ccd: ccd::CcdStats,
    pub contacts_removed: u32,
    pub bodies_put_to_sleep: u32,
}

/// Owns the whole simulation: bodies, contacts, constraints, one broadphase
/// tree per registered broadphase layer, and the scratch state (island
/// builder, previous step's `dt`) that needs to persist between steps.
pub struct World {
    settings: WorldSettings,
    bodies: BodyPool,
    contacts: ContactCache,
    constraints: ConstraintSet,
    trees: Vec<BroadPhaseTree>,
    islands: IslandBuilder,
    active: Vec<BodyId>,
    previous_dt: f64,
}

impl World {
    /// Creates a world with the given settings; one broadphase tree is
    /// allocated per layer already registered on `settings.layers`.
    pub fn new(settings: WorldSettings) -> Self {
        let tree_count = settings.layers.broadphase_layer_count() as usize;
        Self {
            settings,
            bodies: BodyPool::new(),
            contacts: ContactCache::new(),
            constraints: ConstraintSet::new(),
            trees: (0..tree_count).map(|_| BroadPhaseTree::new()).collect(),
            islands: IslandBuilder::new(),
            active: Vec::new(),
            previous_dt: 1.0 / 60.0,
        }
    }

    pub fn settings(&self) -> &WorldSettings {
        &self.settings
    }

    pub fn bodies(&self) -> &BodyPool {
        &self.bodies
    }

    pub fn contacts(&self) -> &ContactCache {
        &self.contacts
    }

    pub fn constraints(&self) -> &ConstraintSet {
        &self.constraints
    }

    /// Broadphase trees, one per registered broadphase layer, indexed by
    /// `BroadPhaseLayerId.0`. Exposed for the query layer, which needs to
    /// cast against all of them.
    pub fn trees(&self) -> &[BroadPhaseTree] {
        &self.trees
    }

    fn tree_for(&mut self, layer: BroadPhaseLayerId) -> &mut BroadPhaseTree {
        &mut self.trees[layer.0 as usize]
    }

    // ---- Body lifecycle -------------------------------------------------

    /// Validates and inserts a new body, placing it in the broadphase tree
    /// its object layer maps to and, if active, the active-body list.
    pub fn create_body(&mut self, settings: BodySettings) -> PhysicsResult<BodyId> {
        let layer = self.settings.layers.broadphase_layer_of(settings.object_layer)?;
        let id = self.bodies.create(settings)?;
        let Some(body) = self.bodies.get_mut(id) else { unreachable!("just created") };
        let aabb = body.world_aabb();
        let node = self.trees[layer.0 as usize].insert(aabb, id.to_bits());
        body.broadphase_node = Some(node);
        if body.is_active() {
            body.active_index = Some(self.active.len() as u32);
            self.active.push(id);
        }
        Ok(id)
    }

    /// Removes a body: destroys every contact touching it (firing
    /// `on_contact_removed`), unregisters every constraint referencing it
    /// from both its own pool and the other endpoint's `constraint_ids`,
    /// removes it from its broadphase tree and the active list, then frees
    /// its pool slot.
    pub fn remove_body(&mut self, id: BodyId, listener: &mut dyn ContactListener) -> bool {
        let Some(body) = self.bodies.get(id) else { return false };
        let broadphase_node = body.broadphase_node;
        let active_index = body.active_index;
        let object_layer = body.object_layer;
        let constraint_ids = body.constraint_ids.clone();

        self.contacts.destroy_all_for_body(&mut self.bodies, id, |_, contact| {
            listener.on_contact_removed(contact.body_a, contact.body_b, contact.sub_shape_a, contact.sub_shape_b);
        });

        for constraint_id in constraint_ids {
            self.remove_constraint(constraint_id);
        }

        if let Some(node) = broadphase_node {
            if let Ok(layer) = self.settings.layers.broadphase_layer_of(object_layer) {
                self.trees[layer.0 as usize].remove(node);
            }
        }
        if let Some(index) = active_index {
            self.swap_remove_active(index);
        }

        self.bodies.remove(id)
    }

    fn swap_remove_active(&mut self, index: u32) {
        let last = self.active.len() as u32 - 1;
        self.active.swap(index as usize, last as usize);
        self.active.pop();
        if let Some(&moved) = self.active.get(index as usize) {
            if let Some(body) = self.bodies.get_mut(moved) {
                body.active_index = Some(index);
            }
        }
    }

    pub fn get_body(&self, id: BodyId) -> Option<&Body> {
        self.bodies.get(id)
    }

    pub fn get_body_mut(&mut self, id: BodyId) -> Option<&mut Body> {
        self.bodies.get_mut(id)
    }

    // ---- Body mutators (spec.md §6) -------------------------------------

    /// Sets a body's world position, refreshing its broadphase placement.
    pub fn set_position(&mut self, id: BodyId, position: Vector3<f64>) {
        if let Some(body) = self.bodies.get_mut(id) {
            body.position = position;
        }
        self.refresh_broadphase(id);
    }

    /// Sets a body's world orientation, refreshing its broadphase placement.
    pub fn set_rotation(&mut self, id: BodyId, rotation: UnitQuaternion<f64>) {
        if let Some(body) = self.bodies.get_mut(id) {
            body.rotation = rotation;
        }
        self.refresh_broadphase(id);
    }

    /// Sets both position and orientation at once and refreshes broadphase
    /// placement a single time, rather than twice via separate setters.
    pub fn set_transform(&mut self, id: BodyId, position: Vector3<f64>, rotation: UnitQuaternion<f64>) {
        if let Some(body) = self.bodies.get_mut(id) {
            body.position = position;
            body.rotation = rotation;
        }
        self.refresh_broadphase(id);
    }

    fn refresh_broadphase(&mut self, id: BodyId) {
        let Some(body) = self.bodies.get(id) else { return };
        let Some(node) = body.broadphase_node else { return };
        let aabb = body.world_aabb();
        let Ok(layer) = self.settings.layers.broadphase_layer_of(body.object_layer) else { return };
        self.trees[layer.0 as usize].update(node, aabb, Vector3::zeros());
    }

    /// Changes a body's motion type; if `wake` is set and the body was
    /// asleep, it is moved back onto the active list.
    pub fn set_motion_type(&mut self, id: BodyId, motion_type: MotionType, wake: bool) {
        if let Some(body) = self.bodies.get_mut(id) {
            body.motion_type = motion_type;
        }
        if wake {
            self.wake(id);
        } else {
            self.sync_active_membership(id);
        }
    }

    /// Moves a body to a different object layer, which may mean moving it
    /// into a different broadphase tree entirely.
    pub fn set_object_layer(&mut self, id: BodyId, object_layer: ObjectLayerId) -> PhysicsResult<()> {
        let new_layer = self.settings.layers.broadphase_layer_of(object_layer)?;
        let Some(body) = self.bodies.get(id) else { return Ok(()) };
        let old_layer = self.settings.layers.broadphase_layer_of(body.object_layer).ok();
        let old_node = body.broadphase_node;
        let aabb = body.world_aabb();

        if old_layer != Some(new_layer) {
            if let (Some(old_layer), Some(old_node)) = (old_layer, old_node) {
                self.trees[old_layer.0 as usize].remove(old_node);
            }
            let node = self.trees[new_layer.0 as usize].insert(aabb, id.to_bits());
            if let Some(body) = self.bodies.get_mut(id) {
                body.broadphase_node = Some(node);
            }
        }
        if let Some(body) = self.bodies.get_mut(id) {
            body.object_layer = object_layer;
        }
        Ok(())
    }

    pub fn set_linear_velocity(&mut self, id: BodyId, velocity: Vector3<f64>) {
        if let Some(body) = self.bodies.get_mut(id) {
            body.motion.linear_velocity = velocity;
        }
    }

    pub fn set_angular_velocity(&mut self, id: BodyId, velocity: Vector3<f64>) {
        if let Some(body) = self.bodies.get_mut(id) {
            body.motion.angular_velocity = velocity;
        }
    }

    pub fn add_linear_velocity(&mut self, id: BodyId, delta: Vector3<f64>) {
        if let Some(body) = self.bodies.get_mut(id) {
            body.motion.linear_velocity += delta;
        }
    }

    pub fn add_angular_velocity(&mut self, id: BodyId, delta: Vector3<f64>) {
        if let Some(body) = self.bodies.get_mut(id) {
            body.motion.angular_velocity += delta;
        }
    }

    pub fn add_force(&mut self, id: BodyId, force: Vector3<f64>) {
        if let Some(body) = self.bodies.get_mut(id) {
            body.motion.accumulated_force += force;
        }
    }

    pub fn add_torque(&mut self, id: BodyId, torque: Vector3<f64>) {
        if let Some(body) = self.bodies.get_mut(id) {
            body.motion.accumulated_torque += torque;
        }
    }

    /// Applies an instantaneous impulse at the center of mass.
    pub fn add_impulse(&mut self, id: BodyId, impulse: Vector3<f64>) {
        if let Some(body) = self.bodies.get_mut(id) {
            let inv_mass = body.motion.inverse_mass;
            body.motion.linear_velocity += impulse * inv_mass;
        }
    }

    pub fn add_angular_impulse(&mut self, id: BodyId, impulse: Vector3<f64>) {
        if let Some(body) = self.bodies.get_mut(id) {
            let rotation = body.rotation;
            let inv_inertia = body.motion.world_inverse_inertia(rotation);
            body.motion.angular_velocity += inv_inertia * impulse;
        }
    }

    /// Applies `force` as though acting at `world_position`, splitting it
    /// into a direct linear contribution plus the torque its lever arm
    /// from the center of mass produces.
    pub fn add_force_at_position(&mut self, id: BodyId, force: Vector3<f64>, world_position: Vector3<f64>) {
        let Some(body) = self.bodies.get_mut(id) else { return };
        let r = world_position - body.center_of_mass_position();
        body.motion.accumulated_force += force;
        body.motion.accumulated_torque += r.cross(&force);
    }

    pub fn add_impulse_at_position(&mut self, id: BodyId, impulse: Vector3<f64>, world_position: Vector3<f64>) {
        let Some(body) = self.bodies.get_mut(id) else { return };
        let r = world_position - body.center_of_mass_position();
        let inv_mass = body.motion.inverse_mass;
        let rotation = body.rotation;
        let inv_inertia = body.motion.world_inverse_inertia(rotation);
        body.motion.linear_velocity += impulse * inv_mass;
        body.motion.angular_velocity += inv_inertia * r.cross(&impulse);
    }

    /// Replaces a body's shape, recomputing mass properties for dynamic
    /// bodies unless `mass_override` is given, and refreshing broadphase.
    pub fn update_shape(&mut self, id: BodyId, shape: crate::shape::Shape, mass_override: Option<crate::shape::MassProperties>) -> PhysicsResult<()> {
        let Some(body) = self.bodies.get_mut(id) else { return Ok(()) };
        let motion_type = body.motion_type;
        let mass_properties = match motion_type {
            MotionType::Dynamic => match mass_override {
                Some(mp) => mp,
                None => shape.mass_properties(1.0).ok_or(PhysicsError::MassUndefined)?,
            },
            _ => mass_override.unwrap_or_else(crate::shape::MassProperties::zero),
        };
        body.shape = shape;
        body.mass_properties = mass_properties;
        if matches!(motion_type, MotionType::Dynamic) {
            body.motion.inverse_mass = mass_properties.inverse_mass();
            let inv_inertia = mass_properties.inverse_inertia();
            body.motion.inverse_inertia_diagonal = Vector3::new(inv_inertia.m11, inv_inertia.m22, inv_inertia.m33);
        }
        self.refresh_broadphase(id);
        Ok(())
    }

    /// Sets a kinematic body's velocities so that it reaches `target_position`/
    /// `target_rotation` after `dt` seconds of ordinary integration, the
    /// standard way to drive a `Kinematic` body from waypoint to waypoint
    /// without teleporting it (spec.md §6 `moveKinematic`).
    pub fn move_kinematic(&mut self, id: BodyId, target_position: Vector3<f64>, target_rotation: UnitQuaternion<f64>, dt: f64) {
        let Some(body) = self.bodies.get_mut(id) else { return };
        if dt <= 0.0 {
            return;
        }
        body.motion.linear_velocity = (target_position - body.position) / dt;
        let delta = target_rotation * body.rotation.inverse();
        let (axis, angle) = delta.axis_angle().map(|(a, ang)| (a.into_inner(), ang)).unwrap_or((Vector3::z(), 0.0));
        body.motion.angular_velocity = axis * (angle / dt);
    }

    /// Puts a body to sleep immediately, removing it from the active list.
    pub fn sleep(&mut self, id: BodyId) {
        let Some(body) = self.bodies.get_mut(id) else { return };
        if !matches!(body.motion_type, MotionType::Dynamic) || body.sleeping {
            return;
        }
        body.sleeping = true;
        body.motion.linear_velocity = Vector3::zeros();
        body.motion.angular_velocity = Vector3::zeros();
        let index = body.active_index.take();
        if let Some(index) = index {
            self.swap_remove_active(index);
        }
    }

    /// Wakes a body and puts it back on the active list, if it was asleep.
    pub fn wake(&mut self, id: BodyId) {
        let Some(body) = self.bodies.get_mut(id) else { return };
        if !body.sleeping {
            self.sync_active_membership(id);
            return;
        }
        body.sleeping = false;
        body.motion.sleep_timer = 0.0;
        self.sync_active_membership(id);
    }

    fn sync_active_membership(&mut self, id: BodyId) {
        let Some(body) = self.bodies.get(id) else { return };
        let should_be_active = body.is_active();
        let is_active = body.active_index.is_some();
        if should_be_active && !is_active {
            let index = self.active.len() as u32;
            self.active.push(id);
            if let Some(body) = self.bodies.get_mut(id) {
                body.active_index = Some(index);
            }
        } else if !should_be_active && is_active {
            if let Some(body) = self.bodies.get_mut(id) {
                if let Some(index) = body.active_index.take() {
                    self.swap_remove_active(index);
                }
            }
        }
    }

    /// Wakes every sleeping dynamic body whose broadphase AABB overlaps
    /// `aabb` (spec.md §6 `wakeInAABB`), e.g. after teleporting a large
    /// kinematic body into a resting pile.
    pub fn wake_in_aabb(&mut self, aabb: crate::math::Aabb3) {
        let mut to_wake = Vec::new();
        for tree in &self.trees {
            tree.intersect_aabb(&aabb, |bits| to_wake.push(BodyId::from_bits(bits)));
        }
        for id in to_wake {
            if self.bodies.get(id).map(|b| b.sleeping).unwrap_or(false) {
                self.wake(id);
            }
        }
    }

    // ---- Constraint lifecycle --------------------------------------------

    pub fn create_point_constraint(&mut self, settings: PointConstraintSettings) -> PhysicsResult<ConstraintId> {
        point::validate(&settings)?;
        let (body_a, body_b) = (settings.body_a, settings.body_b);
        let id = self.constraints.point.create(settings);
        self.attach_constraint(id, body_a, body_b);
        Ok(id)
    }

    pub fn create_distance_constraint(&mut self, settings: DistanceConstraintSettings) -> PhysicsResult<ConstraintId> {
        distance::validate(&settings)?;
        let (body_a, body_b) = (settings.body_a, settings.body_b);
        let id = self.constraints.distance.create(settings);
        self.attach_constraint(id, body_a, body_b);
        Ok(id)
    }

    pub fn create_hinge_constraint(&mut self, settings: HingeConstraintSettings) -> PhysicsResult<ConstraintId> {
        hinge::validate(&settings)?;
        let (body_a, body_b) = (settings.body_a, settings.body_b);
        let id = self.constraints.hinge.create(settings);
        self.attach_constraint(id, body_a, body_b);
        Ok(id)
    }

    pub fn create_fixed_constraint(&mut self, settings: FixedConstraintSettings) -> PhysicsResult<ConstraintId> {
        fixed::validate(&settings)?;
        let (body_a, body_b) = (settings.body_a, settings.body_b);
        let id = self.constraints.fixed.create(settings);
        self.attach_constraint(id, body_a, body_b);
        Ok(id)
    }

    pub fn create_slider_constraint(&mut self, settings: SliderConstraintSettings) -> PhysicsResult<ConstraintId> {
        slider::validate(&settings)?;
        let (body_a, body_b) = (settings.body_a, settings.body_b);
        let id = self.constraints.slider.create(settings);
        self.attach_constraint(id, body_a, body_b);
        Ok(id)
    }

    pub fn create_cone_constraint(&mut self, settings: ConeConstraintSettings) -> PhysicsResult<ConstraintId> {
        cone::validate(&settings)?;
        let (body_a, body_b) = (settings.body_a, settings.body_b);
        let id = self.constraints.cone.create(settings);
        self.attach_constraint(id, body_a, body_b);
        Ok(id)
    }

    pub fn create_swing_twist_constraint(&mut self, settings: SwingTwistConstraintSettings) -> PhysicsResult<ConstraintId> {
        swing_twist::validate(&settings)?;
        let (body_a, body_b) = (settings.body_a, settings.body_b);
        let id = self.constraints.swing_twist.create(settings);
        self.attach_constraint(id, body_a, body_b);
        Ok(id)
    }

    pub fn create_six_dof_constraint(&mut self, settings: SixDofConstraintSettings) -> PhysicsResult<ConstraintId> {
        six_dof::validate(&settings)?;
        let (body_a, body_b) = (settings.body_a, settings.body_b);
        let id = self.constraints.six_dof.create(settings);
        self.attach_constraint(id, body_a, body_b);
        Ok(id)
    }

    fn attach_constraint(&mut self, id: ConstraintId, body_a: BodyId, body_b: BodyId) {
        if let Some(body) = self.bodies.get_mut(body_a) {
            body.constraint_ids.push(id);
        }
        if let Some(body) = self.bodies.get_mut(body_b) {
            body.constraint_ids.push(id);
        }
    }

    /// Removes a constraint from its kind's pool and both bodies'
    /// `constraint_ids` back-references.
    pub fn remove_constraint(&mut self, id: ConstraintId) -> bool {
        let endpoints: Vec<BodyId> = self
            .constraints
            .iter_all()
            .find(|(candidate, _)| *candidate == id)
            .map(|(_, header)| vec![header.body_a, header.body_b])
            .unwrap_or_default();
        for body_id in endpoints {
            if let Some(body) = self.bodies.get_mut(body_id) {
                body.constraint_ids.retain(|&c| c != id);
            }
        }
        self.constraints.remove(id)
    }

    // ---- The step pipeline (spec.md §2) ----------------------------------

    /// Advances the simulation by `dt` seconds, running the full pipeline:
    /// integrate velocities, broadphase, narrowphase, islands, solve, CCD,
    /// sleep update, accumulator clear.
    pub fn update(&mut self, listener: &mut dyn ContactListener, dt: f64) -> StepStats {
        let step_span = tracing::info_span!("physics.step", dt);
        let _enter = step_span.enter();
        let mut stats = StepStats::default();

        self.integrate_velocities(dt);

        let pairs = {
            let _span = tracing::debug_span!("broadphase").entered();
            self.refit_and_collect_pairs()
        };

        {
            let _span = tracing::debug_span!("narrowphase").entered();
            stats.narrowphase = narrowphase::run(&mut self.bodies, &mut self.contacts, listener, &self.settings.solver, &pairs);
        }

        let ccd_candidates: Vec<BodyId> = self.active.clone();
        {
            let _span = tracing::debug_span!("ccd").entered();
            stats.ccd = ccd::run(&mut self.bodies, &mut self.contacts, &self.trees, &self.settings.ccd, dt, self.settings.solver.collision_tolerance, &ccd_candidates);
        }

        let mut removed = 0u32;
        self.contacts.sweep_unprocessed(&mut self.bodies, |_, contact| {
            listener.on_contact_removed(contact.body_a, contact.body_b, contact.sub_shape_a, contact.sub_shape_b);
            removed += 1;
        });
        stats.contacts_removed = removed;

        let islands = {
            let _span = tracing::debug_span!("islands").entered();
            self.islands.build(&self.bodies, &self.contacts, &self.constraints)
        };
        stats.islands = islands.len() as u32;

        {
            let _span = tracing::debug_span!("solve").entered();
            self.solve_islands(&islands, dt);
        }

        self.refresh_all_broadphase_positions();

        {
            let _span = tracing::debug_span!("sleep").entered();
            stats.bodies_put_to_sleep = self.update_sleep_state(&islands, dt);
        }

        self.clear_accumulators();
        self.previous_dt = dt;
        stats.active_bodies = self.active.len() as u32;
        stats
    }

    /// Integrates gravity/external forces into every active dynamic body's
    /// velocity and applies damping; runs before broadphase so that this
    /// step's swept AABBs already reflect the new velocity.
    fn integrate_velocities(&mut self, dt: f64) {
        let gravity = self.settings.gravity;
        for &id in &self.active {
            let Some(body) = self.bodies.get_mut(id) else { continue };
            if !matches!(body.motion_type, MotionType::Dynamic) {
                continue;
            }
            let inv_mass = body.motion.inverse_mass;
            if inv_mass > 0.0 {
                body.motion.linear_velocity += gravity * (body.motion.gravity_factor * dt);
                body.motion.linear_velocity += body.motion.accumulated_force * (inv_mass * dt);
                let rotation = body.rotation;
                let inv_inertia = body.motion.world_inverse_inertia(rotation);
                body.motion.angular_velocity += inv_inertia * body.motion.accumulated_torque * dt;
            }
            body.motion.apply_damping(dt);
            body.motion.clamp_velocities();
            let allowed = body.motion.allowed_dofs;
            body.motion.linear_velocity = allowed.mask_linear(body.motion.linear_velocity);
            body.motion.angular_velocity = allowed.mask_angular(body.motion.angular_velocity);
        }
    }

    /// Refits every body's broadphase placement to its pre-solve position,
    /// then collects every candidate contact pair this step. Scans *every*
    /// non-pooled body, not just active ones: a persistent contact between
    /// two sleeping bodies (or a sleeping body and a static one) must still
    /// be re-detected every step, or `ContactCache::sweep_unprocessed` would
    /// destroy it for having gone unmarked, waking the island for no reason
    /// the next time either body actually moves.
    fn refit_and_collect_pairs(&mut self) -> Vec<(BodyId, BodyId)> {
        for &id in &self.active {
            self.refresh_broadphase(id);
        }

        let mut pairs: HashSet<(BodyId, BodyId)> = HashSet::new();

        for tree in &self.trees {
            for (a_bits, b_bits) in tree.collect_pairs() {
                self.push_pair(&mut pairs, BodyId::from_bits(a_bits), BodyId::from_bits(b_bits));
            }
        }

        // Cross-layer pairs: `collect_pairs` never leaves a single tree, so
        // any pair spanning two broadphase layers (e.g. a dynamic body in
        // the "dynamic" tree against a static body in the "static" tree)
        // has to be found by querying every other tree against each body's
        // own fattened AABB, the same pattern `ccd::run` already uses.
        let bodies_with_layer: Vec<(BodyId, crate::math::Aabb3, BroadPhaseLayerId)> = self
            .bodies
            .iter()
            .filter(|b| !b.pooled)
            .filter_map(|b| {
                let layer = self.settings.layers.broadphase_layer_of(b.object_layer).ok()?;
                Some((b.id, b.world_aabb(), layer))
            })
            .collect();

        for (id, aabb, own_layer) in &bodies_with_layer {
            for (layer_index, tree) in self.trees.iter().enumerate() {
                if layer_index == own_layer.0 as usize {
                    continue;
                }
                tree.intersect_aabb(aabb, |other_bits| {
                    let other_id = BodyId::from_bits(other_bits);
                    self.push_pair(&mut pairs, *id, other_id);
                });
            }
        }

        let mut sorted: Vec<(BodyId, BodyId)> = pairs.into_iter().collect();
        sorted.sort_by_key(|(a, b)| (a.index, b.index));
        sorted
    }

    fn push_pair(&self, pairs: &mut HashSet<(BodyId, BodyId)>, a: BodyId, b: BodyId) {
        if a.index == b.index {
            return;
        }
        let (Some(body_a), Some(body_b)) = (self.bodies.get(a), self.bodies.get(b)) else { return };
        if matches!(body_a.motion_type, MotionType::Static) && matches!(body_b.motion_type, MotionType::Static) {
            return;
        }
        if !self.settings.layers.collision_enabled(body_a.object_layer, body_b.object_layer) {
            return;
        }
        if !body_a.collision_filter.allows(&body_b.collision_filter) {
            return;
        }
        let key = if a.index < b.index { (a, b) } else { (b, a) };
        pairs.insert(key);
    }

    /// Runs warm start / velocity iterations / position integration /
    /// position iterations for this step. Constraint pools solve every
    /// enabled constraint of their kind in one global pass (there is no
    /// per-island filtering at that layer), so constraints are solved once
    /// per iteration rather than once per island; only the contact solver,
    /// whose entry points take an explicit index slice, is scoped to the
    /// contacts belonging to islands that are not fully asleep (spec.md
    /// §4.7 — a sleeping island's contacts stay untouched so they don't
    /// nudge its bodies back awake).
    fn solve_islands(&mut self, islands: &[crate::island::Island], dt: f64) {
        let ratio = if self.previous_dt > 1e-9 { dt / self.previous_dt } else { 1.0 };

        let mut awake_bodies = Vec::new();
        let mut awake_contacts = Vec::new();
        for island in islands {
            if island.all_sleeping(&self.bodies) {
                continue;
            }
            awake_bodies.extend(island.bodies.iter().copied());
            awake_contacts.extend(island.contacts.iter().copied());
        }
        awake_contacts.sort_unstable();

        let state = solver::setup(&self.bodies, &self.contacts, &awake_contacts, &self.settings.solver);

        self.constraints.setup_velocity(&self.bodies);
        solver::warm_start(&mut self.bodies, &mut self.contacts, &state, ratio);
        self.constraints.warm_start(&mut self.bodies, ratio);

        for _ in 0..self.settings.solver.velocity_iterations {
            for &kind in &ordered_kinds() {
                self.constraints.solve_velocity_kind(kind, &mut self.bodies, dt);
            }
            solver::solve_velocity(&mut self.bodies, &mut self.contacts, &state);
        }

        self.integrate_positions(&awake_bodies, dt);

        for _ in 0..self.settings.solver.position_iterations {
            let mut max_error = 0.0f64;
            for &kind in &ordered_kinds() {
                max_error = max_error.max(self.constraints.solve_position_kind(kind, &mut self.bodies, self.settings.solver.baumgarte_beta));
            }
            max_error = max_error.max(solver::solve_position(&mut self.bodies, &self.contacts, &awake_contacts, &self.settings.solver, self.settings.solver.baumgarte_beta));
            if max_error <= self.settings.solver.linear_slop {
                break;
            }
        }
    }

    /// Integrates each listed dynamic body's position from its
    /// post-velocity-solve velocity: linear position by Euler step,
    /// orientation by exact axis-angle quaternion integration (not the
    /// common first-order `q += 0.5*omega*q*dt` approximation, which drifts
    /// off the unit sphere under sustained rotation).
    fn integrate_positions(&mut self, body_ids: &[BodyId], dt: f64) {
        for &id in body_ids {
            let Some(body) = self.bodies.get_mut(id) else { continue };
            if !matches!(body.motion_type, MotionType::Dynamic) {
                continue;
            }
            body.position += body.motion.linear_velocity * dt;
            let angular_speed = body.motion.angular_velocity.norm();
            if angular_speed > 1e-12 {
                let axis = body.motion.angular_velocity / angular_speed;
                let delta = UnitQuaternion::from_axis_angle(&nalgebra::Unit::new_unchecked(axis), angular_speed * dt);
                body.rotation = (delta * body.rotation).normalize();
            }
        }
    }

    fn refresh_all_broadphase_positions(&mut self) {
        let ids: Vec<BodyId> = self.active.clone();
        for id in ids {
            self.refresh_broadphase(id);
        }
    }

    /// Updates each active body's sleep timer from its current speed and
    /// sleep-sphere escape test, putting it to sleep once an entire island
    /// has stayed slow for `time_before_sleep` seconds (spec.md §4.4: sleep
    /// is decided per-island, not per-body, so one fast body keeps its
    /// whole island awake).
    fn update_sleep_state(&mut self, islands: &[crate::island::Island], dt: f64) -> u32 {
        let sleep = self.settings.sleep;
        let mut put_to_sleep = 0u32;

        for island in islands {
            let mut island_is_slow = true;
            for &id in &island.bodies {
                let Some(body) = self.bodies.get_mut(id) else { continue };
                if !matches!(body.motion_type, MotionType::Dynamic) || !body.motion.allow_sleeping {
                    island_is_slow = false;
                    continue;
                }
                let slow = body.motion.is_slow(sleep.linear_velocity_threshold, sleep.angular_velocity_threshold);
                let points = characteristic_points(body);
                let mut escaped = false;
                for (sphere, point) in body.motion.sleep_spheres.iter_mut().zip(points) {
                    escaped |= sphere.update(point, sleep.sleep_sphere_radius);
                }
                if !slow || escaped {
                    island_is_slow = false;
                }
            }
            if island_is_slow {
                for &id in &island.bodies {
                    if let Some(body) = self.bodies.get_mut(id) {
                        if matches!(body.motion_type, MotionType::Dynamic) {
                            body.motion.sleep_timer += dt;
                        }
                    }
                }
            } else {
                for &id in &island.bodies {
                    if let Some(body) = self.bodies.get_mut(id) {
                        body.motion.sleep_timer = 0.0;
                    }
                }
            }

            let ready = island.bodies.iter().all(|&id| {
                self.bodies
                    .get(id)
                    .map(|b| !matches!(b.motion_type, MotionType::Dynamic) || (b.motion.allow_sleeping && b.motion.sleep_timer >= sleep.time_before_sleep))
                    .unwrap_or(true)
            }) && island_is_slow
                && !island.bodies.is_empty();

            if ready {
                for &id in &island.bodies {
                    if self.bodies.get(id).map(|b| matches!(b.motion_type, MotionType::Dynamic) && !b.sleeping).unwrap_or(false) {
                        self.sleep(id);
                        put_to_sleep += 1;
                    }
                }
            }
        }
        put_to_sleep
    }

    /// Clears the per-step force/torque accumulators every body carries,
    /// matching the common "forces are not persistent" convention (a host
    /// application calling `add_force` must do so every step it wants that
    /// force applied).
    fn clear_accumulators(&mut self) {
        for body in self.bodies.iter_mut() {
            body.motion.accumulated_force = Vector3::zeros();
            body.motion.accumulated_torque = Vector3::zeros();
        }
    }
}

/// Every constraint kind that can appear in an island's sorted constraint
/// list, in a fixed dispatch order so solving is deterministic regardless
/// of hash-map iteration order anywhere upstream.
fn ordered_kinds() -> [crate::constraint::ConstraintKind; 8] {
    use crate::constraint::ConstraintKind::*;
    [Point, Distance, Hinge, Fixed, Slider, Cone, SwingTwist, SixDof]
}

/// The three world-space points the sleep test tracks on a body (spec.md
/// §3: "three growing bounding spheres tracking three characteristic
/// points on the body"). The center of mass alone is blind to rotation
/// about itself, so the other two points are offset from it along the
/// body's local X and Y axes by its shape's bounding radius: a body
/// spinning in place moves these two points even though its center of mass
/// never leaves its sleep sphere.
fn characteristic_points(body: &Body) -> [Vector3<f64>; 3] {
    let center = body.center_of_mass_position();
    let radius = body.shape.aabb_identity().half_extents().norm().max(1e-6);
    [center, center + body.rotation * Vector3::new(radius, 0.0, 0.0), center + body.rotation * Vector3::new(0.0, radius, 0.0)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::BodySettings;
    use crate::listener::NullContactListener;
    use crate::shape::Shape;

    fn settings_with_one_layer() -> WorldSettings {
        let (builder, bp) = WorldSettings::builder().add_broadphase_layer();
        let (builder, default_layer) = builder.add_object_layer(bp).unwrap();
        let builder = builder.enable_collision(default_layer, default_layer).unwrap();
        builder.build().unwrap()
    }

    fn default_layer(_world: &World) -> ObjectLayerId {
        ObjectLayerId(0)
    }

    #[test]
    fn sphere_settles_on_a_static_floor() {
        let mut world = World::new(settings_with_one_layer());
        let layer = default_layer(&world);
        let floor = world
            .create_body(BodySettings {
                shape: Shape::cuboid(Vector3::new(5.0, 0.5, 5.0), 0.0).unwrap(),
                motion_type: MotionType::Static,
                object_layer: layer,
                position: Vector3::new(0.0, -0.5, 0.0),
                ..Default::default()
            })
            .unwrap();
        let ball = world
            .create_body(BodySettings {
                shape: Shape::sphere(0.5).unwrap(),
                motion_type: MotionType::Dynamic,
                object_layer: layer,
                position: Vector3::new(0.0, 2.0, 0.0),
                ..Default::default()
            })
            .unwrap();

        let mut listener = NullContactListener;
        for _ in 0..300 {
            world.update(&mut listener, 1.0 / 60.0);
        }

        let ball_body = world.get_body(ball).unwrap();
        assert!((ball_body.position.y - 0.5).abs() < 0.05, "ball should have settled on the floor, y = {}", ball_body.position.y);
        let _ = floor;
    }

    #[test]
    fn two_spheres_head_on_conserve_momentum() {
        let mut world = World::new(settings_with_one_layer());
        let layer = default_layer(&world);
        let a = world
            .create_body(BodySettings { shape: Shape::sphere(0.5).unwrap(), motion_type: MotionType::Dynamic, object_layer: layer, position: Vector3::new(-3.0, 0.0, 0.0), ..Default::default() })
            .unwrap();
        let b = world
            .create_body(BodySettings { shape: Shape::sphere(0.5).unwrap(), motion_type: MotionType::Dynamic, object_layer: layer, position: Vector3::new(3.0, 0.0, 0.0), ..Default::default() })
            .unwrap();
        world.set_linear_velocity(a, Vector3::new(2.0, 0.0, 0.0));
        world.set_linear_velocity(b, Vector3::new(-2.0, 0.0, 0.0));

        let mass_a = 1.0 / world.get_body(a).unwrap().motion.inverse_mass;
        let mass_b = 1.0 / world.get_body(b).unwrap().motion.inverse_mass;
        let initial_momentum = mass_a * Vector3::new(2.0, 0.0, 0.0) + mass_b * Vector3::new(-2.0, 0.0, 0.0);

        let mut listener = NullContactListener;
        for _ in 0..120 {
            world.update(&mut listener, 1.0 / 60.0);
        }

        let final_momentum = mass_a * world.get_body(a).unwrap().motion.linear_velocity + mass_b * world.get_body(b).unwrap().motion.linear_velocity;
        assert!((final_momentum - initial_momentum).norm() < 0.2, "momentum should be approximately conserved, got {final_momentum:?} vs {initial_momentum:?}");
    }

    #[test]
    fn removing_a_body_cleans_up_contacts_and_constraints() {
        let mut world = World::new(settings_with_one_layer());
        let layer = default_layer(&world);
        let a = world.create_body(BodySettings { shape: Shape::sphere(0.5).unwrap(), motion_type: MotionType::Dynamic, object_layer: layer, ..Default::default() }).unwrap();
        let b = world
            .create_body(BodySettings { shape: Shape::sphere(0.5).unwrap(), motion_type: MotionType::Dynamic, object_layer: layer, position: Vector3::new(1.0, 0.0, 0.0), ..Default::default() })
            .unwrap();
        let constraint = world.create_point_constraint(PointConstraintSettings { body_a: a, body_b: b, local_anchor_a: Vector3::zeros(), local_anchor_b: Vector3::zeros() }).unwrap();

        let mut listener = NullContactListener;
        assert!(world.remove_body(a, &mut listener));
        assert!(world.get_body(a).is_none());
        assert!(!world.constraints.iter_all().any(|(id, _)| id == constraint));
        assert!(world.get_body(b).unwrap().constraint_ids.is_empty());
    }

    #[test]
    fn sleeping_body_removes_it_from_the_active_list() {
        let mut world = World::new(settings_with_one_layer());
        let layer = default_layer(&world);
        let a = world.create_body(BodySettings { shape: Shape::sphere(0.5).unwrap(), motion_type: MotionType::Dynamic, object_layer: layer, ..Default::default() }).unwrap();
        assert_eq!(world.active.len(), 1);
        world.sleep(a);
        assert!(world.active.is_empty());
        assert!(world.get_body(a).unwrap().sleeping);
        world.wake(a);
        assert_eq!(world.active.len(), 1);
        assert!(!world.get_body(a).unwrap().sleeping);
    }

    #[test]
    fn box_stack_comes_to_rest() {
        let mut world = World::new(settings_with_one_layer());
        let layer = default_layer(&world);
        world
            .create_body(BodySettings {
                shape: Shape::cuboid(Vector3::new(10.0, 0.5, 10.0), 0.0).unwrap(),
                motion_type: MotionType::Static,
                object_layer: layer,
                position: Vector3::new(0.0, -0.5, 0.0),
                ..Default::default()
            })
            .unwrap();

        let mut boxes = Vec::new();
        for i in 0..5 {
            let id = world
                .create_body(BodySettings {
                    shape: Shape::cuboid(Vector3::new(1.0, 1.0, 1.0), 0.0).unwrap(),
                    motion_type: MotionType::Dynamic,
                    object_layer: layer,
                    position: Vector3::new(0.0, 1.0 + 2.0 * i as f64, 0.0),
                    ..Default::default()
                })
                .unwrap();
            boxes.push(id);
        }

        let mut listener = NullContactListener;
        for _ in 0..180 {
            world.update(&mut listener, 1.0 / 60.0);
        }

        for id in boxes {
            let body = world.get_body(id).unwrap();
            assert!(body.motion.angular_velocity.norm() < 0.02, "box {id:?} angular speed too high: {}", body.motion.angular_velocity.norm());
            assert!(body.motion.linear_velocity.norm() < 0.02, "box {id:?} linear speed too high: {}", body.motion.linear_velocity.norm());
        }
    }

    #[test]
    fn hinge_pendulum_swings_under_gravity() {
        let (builder, bp) = WorldSettings::builder().add_broadphase_layer();
        let (builder, layer) = builder.add_object_layer(bp).unwrap();
        let builder = builder.enable_collision(layer, layer).unwrap();
        let mut world = World::new(builder.build().unwrap());

        let anchor = world
            .create_body(BodySettings { shape: Shape::sphere(0.1).unwrap(), motion_type: MotionType::Static, object_layer: layer, position: Vector3::new(0.0, 10.0, 0.0), ..Default::default() })
            .unwrap();
        let arm = world
            .create_body(BodySettings {
                shape: Shape::cuboid(Vector3::new(0.5, 0.5, 0.5), 0.0).unwrap(),
                motion_type: MotionType::Dynamic,
                object_layer: layer,
                position: Vector3::new(3.0, 10.0, 0.0),
                ..Default::default()
            })
            .unwrap();

        world
            .create_hinge_constraint(HingeConstraintSettings {
                body_a: anchor,
                body_b: arm,
                local_anchor_a: Vector3::new(1.0, 0.0, 0.0),
                local_anchor_b: Vector3::new(-1.0, 0.0, 0.0),
                local_axis_a: Vector3::new(0.0, 0.0, 1.0),
                local_axis_b: Vector3::new(0.0, 0.0, 1.0),
                limits: None,
                motor: None,
            })
            .unwrap();

        let mut listener = NullContactListener;
        for _ in 0..120 {
            world.update(&mut listener, 1.0 / 60.0);
        }

        let arm_body = world.get_body(arm).unwrap();
        assert!(arm_body.position.y < 10.0, "pendulum should have swung down, y = {}", arm_body.position.y);
        assert!(arm_body.motion.angular_velocity.norm() > 1e-3, "pendulum should still be swinging");

        let anchor_world = anchor_world_point(&world, anchor, Vector3::new(1.0, 0.0, 0.0));
        let arm_world = anchor_world_point(&world, arm, Vector3::new(-1.0, 0.0, 0.0));
        assert!((anchor_world - arm_world).norm() <= 1e-2, "hinge anchors should stay coincident, separation = {}", (anchor_world - arm_world).norm());
    }

    fn anchor_world_point(world: &World, id: BodyId, local_anchor: Vector3<f64>) -> Vector3<f64> {
        let body = world.get_body(id).unwrap();
        body.position + body.rotation * local_anchor
    }

    #[test]
    fn fast_bullet_does_not_tunnel_through_a_wall() {
        let (builder, bp) = WorldSettings::builder().add_broadphase_layer();
        let (builder, layer) = builder.add_object_layer(bp).unwrap();
        let builder = builder.enable_collision(layer, layer).unwrap();
        let settings = builder.gravity(Vector3::zeros()).build().unwrap();
        let mut world = World::new(settings);
        world
            .create_body(BodySettings {
                shape: Shape::cuboid(Vector3::new(0.2, 5.0, 5.0), 0.0).unwrap(),
                motion_type: MotionType::Static,
                object_layer: layer,
                position: Vector3::new(10.0, 0.0, 0.0),
                restitution: 1.0,
                ..Default::default()
            })
            .unwrap();
        let bullet = world
            .create_body(BodySettings {
                shape: Shape::sphere(0.1).unwrap(),
                motion_type: MotionType::Dynamic,
                object_layer: layer,
                position: Vector3::new(-10.0, 0.0, 0.0),
                motion_quality: crate::body::MotionQuality::LinearCast,
                restitution: 1.0,
                ..Default::default()
            })
            .unwrap();
        world.set_linear_velocity(bullet, Vector3::new(300.0, 0.0, 0.0));

        let mut listener = NullContactListener;
        world.update(&mut listener, 1.0 / 60.0);

        let body = world.get_body(bullet).unwrap();
        assert!(body.position.x < 10.0, "bullet should not have tunneled through the wall, x = {}", body.position.x);
        assert!(body.motion.linear_velocity.x <= 1e-6, "bullet should have bounced back or stopped, vx = {}", body.motion.linear_velocity.x);
    }
}
