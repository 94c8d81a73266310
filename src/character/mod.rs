//! Kinematic character controller (KCC): an alternative movement model for
//! a single "character" shape that does not go through the rigid-body
//! pipeline (spec.md §4.10). Owns its own position, orientation and desired
//! velocity, and advances itself by sweeping and sliding against the same
//! broadphase/narrowphase primitives every other body uses, through the
//! query layer.
//!
//! Grounded on the query layer ([`crate::query`]) for every shape test it
//! performs, and on the teacher crate's "controller drives its own
//! mini-solver" shape for `solve_constraints` (a handful of plane
//! constraints resolved by direct projection rather than full
//! sequential-impulse, since the character itself has no angular state and
//! never receives an impulse back).

use crate::body::{BodyId, BodyPool, MotionType};
use crate::broadphase::{BroadPhaseTree, QueryFilter};
use crate::collide::{AllHitsCollector, ClosestHitCollector, Collector};
use crate::query::{self, QuerySettings};
use crate::shape::{Shape, SubShapeId};
use nalgebra::{UnitQuaternion, Vector3};
use smallvec::SmallVec;

/// Ground contact classification (spec.md §4.10's state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroundState {
    /// No ground contact found within the supporting volume.
    InAir,
    /// Touching something, but nothing flat enough within the supporting
    /// volume to count as ground (e.g. a single steep, unsupported face).
    NotSupported,
    /// Standing on one or more contacts steeper than `max_slope_angle` that
    /// nonetheless jointly block downward motion (corner support).
    OnSteepGround,
    /// Standing on a contact within `max_slope_angle` of `up`.
    OnGround,
}

/// Tunables for one character's movement, analogous to the teacher crate's
/// per-subsystem settings structs (spec.md §4.10 plus glossary "character
/// padding").
#[derive(Debug, Clone)]
pub struct CharacterSettings {
    /// The character's collision shape (typically a capsule).
    pub shape: Shape,
    /// World-space up axis; slope angles and ground classification are
    /// measured against it.
    pub up: Vector3<f64>,
    /// Offset along `up` from the character's center below which a contact
    /// is considered part of the supporting volume (negative: below
    /// center).
    pub supporting_volume_offset: f64,
    /// Contacts whose normal is within this angle (radians) of `up` are
    /// walkable ground; steeper ones are "steep ground".
    pub max_slope_angle: f64,
    /// Margin kept between the shape and surfaces to avoid zero-distance
    /// numerical contact (glossary: "character padding").
    pub character_padding: f64,
    /// Upper bound on `moveShape`'s collect/solve/sweep/advance loop.
    pub max_collision_iterations: u32,
    /// Upper bound on the per-iteration plane-constraint solve.
    pub max_constraint_iterations: u32,
    /// Distance tolerance forwarded to the query layer's GJK/EPA calls.
    pub collision_tolerance: f64,
    /// Fraction of remaining penetration corrected per step when a contact
    /// is found already overlapping at the start of `moveShape`.
    pub penetration_recovery_speed: f64,
    /// Assumed mass of the character itself, used only to size the impulse
    /// applied to contacted dynamic bodies (spec.md §4.10 step 6); the
    /// character's own velocity is never affected by this mass since it
    /// moves kinematically.
    pub mass: f64,
    /// Maximum impulse per second the character may apply to a contacted
    /// dynamic body.
    pub max_strength: f64,
    /// Sweep distance used by the stick-to-floor pass when the character
    /// leaves the ground while moving horizontally.
    pub stick_to_floor_step_down: Vector3<f64>,
    /// Sweep-up distance tried when stair-walking is attempted.
    pub walk_stairs_step_up: Vector3<f64>,
    /// Minimum horizontal progress a stair-walk attempt must make to be
    /// accepted.
    pub walk_stairs_min_step_forward: f64,
    /// Forward probe distance used to validate the landing surface.
    pub walk_stairs_step_forward_test: f64,
    /// Cosine threshold: a steep contact counts as "now behind" the
    /// character only if the forward direction points away from it by at
    /// least this much.
    pub walk_stairs_cos_angle_forward_contact: f64,
}

impl Default for CharacterSettings {
    fn default() -> Self {
        Self {
            shape: Shape::capsule(0.5, 0.3).unwrap_or(Shape::Empty),
            up: Vector3::y(),
            supporting_volume_offset: -0.05,
            max_slope_angle: 50f64.to_radians(),
            character_padding: 0.02,
            max_collision_iterations: 5,
            max_constraint_iterations: 15,
            collision_tolerance: 1.0e-3,
            penetration_recovery_speed: 1.0,
            mass: 70.0,
            max_strength: 100.0,
            stick_to_floor_step_down: Vector3::new(0.0, -0.5, 0.0),
            walk_stairs_step_up: Vector3::new(0.0, 0.4, 0.0),
            walk_stairs_min_step_forward: 0.02,
            walk_stairs_step_forward_test: 0.15,
            walk_stairs_cos_angle_forward_contact: 0.1,
        }
    }
}

/// One plane constraint collected during `moveShape` (spec.md §4.10 step 2c):
/// the character may not move such that it ends up on the far side of
/// `normal` from `point`.
#[derive(Debug, Clone, Copy)]
struct PlaneConstraint {
    normal: Vector3<f64>,
    /// Positive: already penetrating by this much; constraint solve biases
    /// velocity outward by this amount scaled by `penetration_recovery_speed`.
    penetration: f64,
    /// World-space contact point on the character's own surface, used to
    /// test membership in the supporting volume.
    point: Vector3<f64>,
    body: Option<BodyId>,
    sub_shape: SubShapeId,
}

/// One contact tracked across steps for add/persist/remove callbacks,
/// keyed by `(bodyId, subShapeId)` (spec.md §4.10 step 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacterContactKey {
    pub body: BodyId,
    pub sub_shape: SubShapeId,
}

/// Callbacks fired as the character's contact set changes. Default
/// implementations are no-ops, mirroring [`crate::listener::ContactListener`].
pub trait CharacterContactListener {
    fn on_contact_added(&mut self, _contact: CharacterContactKey, _normal: Vector3<f64>) {}
    fn on_contact_persisted(&mut self, _contact: CharacterContactKey, _normal: Vector3<f64>) {}
    fn on_contact_removed(&mut self, _contact: CharacterContactKey) {}
}

/// No-op listener, for callers that don't need character contact callbacks.
pub struct NullCharacterContactListener;
impl CharacterContactListener for NullCharacterContactListener {}

/// The kinematic character controller itself.
pub struct Character {
    settings: CharacterSettings,
    position: Vector3<f64>,
    rotation: UnitQuaternion<f64>,
    linear_velocity: Vector3<f64>,
    ground_state: GroundState,
    ground_normal: Vector3<f64>,
    ground_body: Option<BodyId>,
    /// Steep-slope normals recorded by the last `update`, used to cancel
    /// the component of next step's desired velocity that drives into them
    /// (spec.md §4.10 step 1).
    steep_normals: SmallVec<[Vector3<f64>; 4]>,
    tracked_contacts: std::collections::HashSet<CharacterContactKey>,
    /// Optional kinematic body mirroring the character in the world, so
    /// ordinary queries/sensors can see it (spec.md §4.10, last paragraph).
    inner_body: Option<BodyId>,
}

impl Character {
    pub fn new(settings: CharacterSettings, position: Vector3<f64>, rotation: UnitQuaternion<f64>) -> Self {
        Self {
            settings,
            position,
            rotation,
            linear_velocity: Vector3::zeros(),
            ground_state: GroundState::InAir,
            ground_normal: Vector3::zeros(),
            ground_body: None,
            steep_normals: SmallVec::new(),
            tracked_contacts: std::collections::HashSet::new(),
            inner_body: None,
        }
    }

    pub fn position(&self) -> Vector3<f64> {
        self.position
    }

    pub fn set_position(&mut self, position: Vector3<f64>) {
        self.position = position;
    }

    pub fn rotation(&self) -> UnitQuaternion<f64> {
        self.rotation
    }

    pub fn set_rotation(&mut self, rotation: UnitQuaternion<f64>) {
        self.rotation = rotation;
    }

    pub fn linear_velocity(&self) -> Vector3<f64> {
        self.linear_velocity
    }

    pub fn set_linear_velocity(&mut self, velocity: Vector3<f64>) {
        self.linear_velocity = velocity;
    }

    pub fn ground_state(&self) -> GroundState {
        self.ground_state
    }

    pub fn ground_normal(&self) -> Vector3<f64> {
        self.ground_normal
    }

    pub fn is_supported(&self) -> bool {
        matches!(self.ground_state, GroundState::OnGround | GroundState::OnSteepGround)
    }

    /// Registers (or re-fetches) a kinematic body in `world` mirroring this
    /// character, so ordinary body queries and sensors can see it. Its own
    /// collisions never feed back into character motion.
    pub fn attach_inner_body(&mut self, world: &mut crate::world::World, object_layer: crate::broadphase::ObjectLayerId) -> crate::error::PhysicsResult<BodyId> {
        let id = world.create_body(crate::body::BodySettings {
            shape: self.settings.shape.clone(),
            motion_type: MotionType::Kinematic,
            object_layer,
            position: self.position,
            rotation: self.rotation,
            sensor: true,
            ..Default::default()
        })?;
        self.inner_body = Some(id);
        Ok(id)
    }

    /// Syncs the inner body's transform/velocity to the character's current
    /// state; call after every [`Character::update`].
    pub fn sync_inner_body(&self, world: &mut crate::world::World) {
        if let Some(id) = self.inner_body {
            world.set_transform(id, self.position, self.rotation);
            world.set_linear_velocity(id, self.linear_velocity);
        }
    }

    /// Advances the character by `dt` (spec.md §4.10's seven numbered
    /// steps).
    pub fn update(&mut self, dt: f64, gravity: Vector3<f64>, trees: &[BroadPhaseTree], bodies: &mut BodyPool, listener: &mut dyn CharacterContactListener, filter: &dyn QueryFilter) {
        if dt <= 0.0 {
            return;
        }

        self.cancel_velocity_into_steep_slopes();

        let mut velocity = self.linear_velocity;
        if !self.is_supported() {
            velocity += gravity * dt;
        }

        let final_contacts = self.move_shape(dt, velocity, trees, bodies, filter);

        self.update_ground_state(&final_contacts);

        if !self.is_supported() && self.linear_velocity.xz_norm(self.settings.up) > 1e-6 {
            self.stick_to_floor(trees, bodies, filter);
        }

        if matches!(self.ground_state, GroundState::OnSteepGround | GroundState::NotSupported) {
            let up = self.settings.up;
            let horizontal_intent = (self.linear_velocity - up * self.linear_velocity.dot(&up)) * dt;
            if horizontal_intent.norm() > 1.0e-6 {
                self.walk_stairs(horizontal_intent, trees, bodies, filter);
            }
        }

        self.apply_impulses_to_contacts(dt, &final_contacts, bodies);
        self.fire_contact_callbacks(&final_contacts, listener);
    }

    fn cancel_velocity_into_steep_slopes(&mut self) {
        for normal in self.steep_normals.clone() {
            let closing = self.linear_velocity.dot(&normal);
            if closing < 0.0 {
                self.linear_velocity -= normal * closing;
            }
        }
    }

    /// spec.md §4.10 step 2: collect/discard/solve/sweep/advance, repeated
    /// until the whole step's displacement is consumed or the iteration cap
    /// is hit. Returns the contact set gathered on the final iteration, used
    /// for ground-state classification and impulse application.
    fn move_shape(&mut self, dt: f64, desired_velocity: Vector3<f64>, trees: &[BroadPhaseTree], bodies: &mut BodyPool, filter: &dyn QueryFilter) -> Vec<PlaneConstraint> {
        let mut remaining = dt;
        let mut velocity = desired_velocity;
        let mut last_contacts = Vec::new();

        let mut exhausted = true;
        for _ in 0..self.settings.max_collision_iterations {
            if remaining <= 1.0e-9 {
                exhausted = false;
                break;
            }

            let mut contacts = self.collect_contacts(trees, bodies, filter);
            discard_opposing_contacts(&mut contacts);
            last_contacts = contacts.clone();

            velocity = self.solve_constraints(velocity, &contacts);

            let displacement = velocity * remaining;
            if displacement.norm() < 1.0e-9 {
                exhausted = false;
                break;
            }

            let achieved = self.sweep_and_clamp(displacement, trees, bodies, filter);
            self.position += achieved;

            let fraction = if displacement.norm() > 1e-12 { (achieved.norm() / displacement.norm()).clamp(0.0, 1.0) } else { 1.0 };
            remaining *= 1.0 - fraction;
            if fraction >= 0.999 {
                exhausted = false;
                break;
            }
        }
        if exhausted {
            tracing::warn!(max_iterations = self.settings.max_collision_iterations, "character move_shape hit its collision iteration cap with time remaining");
        }

        self.linear_velocity = velocity;
        last_contacts
    }

    fn collect_contacts(&self, trees: &[BroadPhaseTree], bodies: &BodyPool, filter: &dyn QueryFilter) -> Vec<PlaneConstraint> {
        let mut collector = AllHitsCollector::default();
        let settings = QuerySettings { collision_tolerance: self.settings.collision_tolerance, ..QuerySettings::default() };
        query::collide_shape(trees, bodies, &self.settings.shape, self.position, self.rotation, &settings, filter, &mut collector);

        let out: Vec<PlaneConstraint> = collector
            .hits
            .iter()
            .filter(|hit| hit.depth > -self.settings.character_padding)
            .map(|hit| PlaneConstraint {
                normal: hit.normal,
                penetration: (hit.depth + self.settings.character_padding).max(0.0),
                point: hit.point_a,
                body: hit.body,
                sub_shape: hit.sub_shape_b,
            })
            .collect();

        out
    }

    /// Resolves `velocity` against every collected plane constraint by
    /// direct projection: single-plane slide removes only the offending
    /// normal component; when a second constraint would then be violated,
    /// project onto the edge both planes share instead (two-plane edge
    /// slide). A velocity reversal mid-solve aborts the loop early (spec.md
    /// §4.10, state-machine paragraph: "prevents corner jitter").
    fn solve_constraints(&self, velocity: Vector3<f64>, contacts: &[PlaneConstraint]) -> Vector3<f64> {
        let mut v = velocity;
        let up = self.settings.up;
        let max_cos = self.settings.max_slope_angle.cos();

        let mut planes: Vec<Vector3<f64>> = Vec::with_capacity(contacts.len() * 2);
        for c in contacts {
            planes.push(c.normal);
            if c.normal.dot(&up) < max_cos {
                let horizontal = c.normal - up * c.normal.dot(&up);
                if horizontal.norm() > 1e-6 {
                    planes.push(horizontal.normalize());
                }
            }
        }

        let mut converged = false;
        for _ in 0..self.settings.max_constraint_iterations {
            let previous = v;
            let mut violated: Option<usize> = None;
            for (i, n) in planes.iter().enumerate() {
                if v.dot(n) < -1.0e-9 {
                    violated = Some(i);
                    break;
                }
            }
            let Some(i) = violated else {
                converged = true;
                break;
            };
            let n_i = planes[i];
            v -= n_i * v.dot(&n_i);

            if let Some(j) = planes.iter().enumerate().position(|(k, n)| k != i && v.dot(n) < -1.0e-9) {
                let n_j = planes[j];
                let edge = n_i.cross(&n_j);
                if edge.norm() > 1.0e-6 {
                    let edge = edge.normalize();
                    v = edge * v.dot(&edge);
                } else {
                    v = Vector3::zeros();
                }
            }

            if v.dot(&previous) < -1.0e-9 {
                v = Vector3::zeros();
                converged = true;
                break;
            }
        }
        if !converged && !planes.is_empty() {
            tracing::warn!(max_iterations = self.settings.max_constraint_iterations, plane_count = planes.len(), "character plane-constraint solve did not converge");
        }

        let max_penetration = contacts.iter().map(|c| c.penetration).fold(0.0f64, f64::max);
        if max_penetration > 0.0 {
            if let Some(deepest) = contacts.iter().max_by(|a, b| a.penetration.partial_cmp(&b.penetration).unwrap()) {
                v += deepest.normal * (max_penetration * self.settings.penetration_recovery_speed).min(max_penetration);
            }
        }

        v
    }

    fn sweep_and_clamp(&self, displacement: Vector3<f64>, trees: &[BroadPhaseTree], bodies: &BodyPool, filter: &dyn QueryFilter) -> Vector3<f64> {
        let mut collector = ClosestHitCollector::default();
        let settings = QuerySettings { collision_tolerance: self.settings.collision_tolerance, ..QuerySettings::default() };
        query::cast_shape(trees, bodies, &self.settings.shape, self.position, self.rotation, displacement, &settings, filter, &mut collector);
        match collector.hit {
            Some(hit) => displacement * hit.fraction,
            None => displacement,
        }
    }

    /// spec.md §4.10 step 3: a contact is "supporting" when it lies within
    /// the supporting volume (below `supporting_volume_offset` along `up`)
    /// and its normal is within `max_slope_angle` of `up`. If no contact
    /// individually qualifies but a cluster of steep contacts still blocks
    /// a small downward probe velocity, a corner-support test reclassifies
    /// the state as `OnSteepGround` rather than `NotSupported`.
    fn update_ground_state(&mut self, contacts: &[PlaneConstraint]) {
        self.steep_normals.clear();
        self.ground_body = None;
        self.ground_normal = Vector3::zeros();

        if contacts.is_empty() {
            self.ground_state = GroundState::InAir;
            return;
        }

        let up = self.settings.up;
        let max_cos = self.settings.max_slope_angle.cos();
        let supporting_volume_top = self.settings.supporting_volume_offset;
        let mut best: Option<&PlaneConstraint> = None;
        for c in contacts {
            let height = (c.point - self.position).dot(&up);
            if height > supporting_volume_top {
                continue;
            }
            if c.normal.dot(&up) >= max_cos {
                if best.map(|b| c.normal.dot(&up) > b.normal.dot(&up)).unwrap_or(true) {
                    best = Some(c);
                }
            } else {
                self.steep_normals.push(c.normal);
            }
        }

        if let Some(ground) = best {
            self.ground_state = GroundState::OnGround;
            self.ground_normal = ground.normal;
            self.ground_body = ground.body;
            return;
        }

        // Corner-support test: try a small downward probe velocity against
        // every steep constraint; if it is fully absorbed, the cluster
        // jointly blocks downward motion even though none of them alone is
        // walkable.
        let probe = -up * 0.1;
        let resolved = self.solve_constraints(probe, contacts);
        if resolved.norm() < 1.0e-4 {
            self.ground_state = GroundState::OnSteepGround;
            if let Some(steepest) = contacts.iter().max_by(|a, b| a.normal.dot(&up).partial_cmp(&b.normal.dot(&up)).unwrap()) {
                self.ground_normal = steepest.normal;
                self.ground_body = steepest.body;
            }
        } else {
            self.ground_state = GroundState::NotSupported;
        }
    }

    /// spec.md §4.10 step 4: when the character leaves the ground this step
    /// while carrying horizontal velocity, sweep `stick_to_floor_step_down`
    /// and move to the first hit rather than leaving it airborne from a
    /// single frame's rounding.
    fn stick_to_floor(&mut self, trees: &[BroadPhaseTree], bodies: &BodyPool, filter: &dyn QueryFilter) {
        let mut collector = ClosestHitCollector::default();
        let settings = QuerySettings { collision_tolerance: self.settings.collision_tolerance, ..QuerySettings::default() };
        query::cast_shape(trees, bodies, &self.settings.shape, self.position, self.rotation, self.settings.stick_to_floor_step_down, &settings, filter, &mut collector);
        if let Some(hit) = collector.hit {
            if hit.normal.dot(&self.settings.up) >= self.settings.max_slope_angle.cos() {
                self.position += self.settings.stick_to_floor_step_down * hit.fraction;
                self.ground_state = GroundState::OnGround;
                self.ground_normal = hit.normal;
                self.ground_body = hit.body;
            }
        }
    }

    /// spec.md §4.10 step 5: when horizontal intent is blocked by steep
    /// ground, try stepping up, moving horizontally, and stepping back down
    /// onto a walkable landing; commits the attempt only if every check
    /// passes.
    pub fn walk_stairs(&mut self, horizontal_intent: Vector3<f64>, trees: &[BroadPhaseTree], bodies: &BodyPool, filter: &dyn QueryFilter) -> bool {
        if !matches!(self.ground_state, GroundState::OnSteepGround | GroundState::NotSupported) || horizontal_intent.norm() < 1.0e-6 {
            return false;
        }
        let forward = horizontal_intent.normalize();
        let original_position = self.position;
        let settings = QuerySettings { collision_tolerance: self.settings.collision_tolerance, ..QuerySettings::default() };

        let mut up_collector = ClosestHitCollector::default();
        query::cast_shape(trees, bodies, &self.settings.shape, self.position, self.rotation, self.settings.walk_stairs_step_up, &settings, filter, &mut up_collector);
        let up_displacement = match up_collector.hit {
            Some(hit) => self.settings.walk_stairs_step_up * hit.fraction,
            None => self.settings.walk_stairs_step_up,
        };
        let elevated = self.position + up_displacement;

        let forward_distance = horizontal_intent.norm().max(self.settings.walk_stairs_min_step_forward);
        let horizontal_displacement = forward * forward_distance;
        let mut fwd_collector = ClosestHitCollector::default();
        query::cast_shape(trees, bodies, &self.settings.shape, elevated, self.rotation, horizontal_displacement, &settings, filter, &mut fwd_collector);
        let achieved_horizontal = match fwd_collector.hit {
            Some(hit) => horizontal_displacement * hit.fraction,
            None => horizontal_displacement,
        };
        if achieved_horizontal.norm() < self.settings.walk_stairs_min_step_forward {
            return false;
        }

        let still_blocked = self.steep_normals.iter().any(|n| {
            let horizontal_normal = *n - self.settings.up * n.dot(&self.settings.up);
            horizontal_normal.norm() > 1e-6 && forward.dot(&horizontal_normal.normalize()) > -self.settings.walk_stairs_cos_angle_forward_contact
        });
        if still_blocked {
            return false;
        }

        let stepped_position = elevated + achieved_horizontal;
        let mut down_collector = ClosestHitCollector::default();
        let step_down = -self.settings.walk_stairs_step_up;
        query::cast_shape(trees, bodies, &self.settings.shape, stepped_position, self.rotation, step_down, &settings, filter, &mut down_collector);
        let Some(landing) = down_collector.hit else {
            self.position = original_position;
            return false;
        };
        if landing.normal.dot(&self.settings.up) < self.settings.max_slope_angle.cos() {
            self.position = original_position;
            return false;
        }

        self.position = stepped_position + step_down * landing.fraction;
        self.ground_state = GroundState::OnGround;
        self.ground_normal = landing.normal;
        self.ground_body = landing.body;
        true
    }

    /// spec.md §4.10 step 6: applies an effective-mass impulse to every
    /// contacted dynamic body, clamped by `max_strength * dt` and with the
    /// up-axis component removed (gravity is handled by the rigid-body
    /// pipeline, not by the character pushing against it).
    fn apply_impulses_to_contacts(&self, dt: f64, contacts: &[PlaneConstraint], bodies: &mut BodyPool) {
        for contact in contacts {
            let Some(body_id) = contact.body else { continue };
            let Some(body) = bodies.get_mut(body_id) else { continue };
            if !matches!(body.motion_type, MotionType::Dynamic) {
                continue;
            }
            let inv_mass = body.motion.inverse_mass;
            if inv_mass <= 0.0 {
                continue;
            }
            let normal = contact.normal;
            let closing_velocity = self.linear_velocity.dot(&normal) - body.motion.linear_velocity.dot(&normal);
            if closing_velocity >= 0.0 {
                continue;
            }
            let effective_mass = 1.0 / (1.0 / self.settings.mass + inv_mass);
            let max_impulse = self.settings.max_strength * dt;
            let impulse = (-closing_velocity * effective_mass).min(max_impulse);
            let mut delta = normal * (impulse * inv_mass);
            delta -= self.settings.up * delta.dot(&self.settings.up);
            body.motion.linear_velocity += delta;
        }
    }

    /// spec.md §4.10 step 7: compares this step's contact set against the
    /// tracked pool keyed by `(bodyId, subShapeId)` and fires added/
    /// persisted/removed callbacks.
    fn fire_contact_callbacks(&mut self, contacts: &[PlaneConstraint], listener: &mut dyn CharacterContactListener) {
        let mut seen = std::collections::HashSet::new();
        for c in contacts {
            let Some(body) = c.body else { continue };
            let key = CharacterContactKey { body, sub_shape: c.sub_shape };
            seen.insert(key);
            if self.tracked_contacts.insert(key) {
                listener.on_contact_added(key, c.normal);
            } else {
                listener.on_contact_persisted(key, c.normal);
            }
        }
        self.tracked_contacts.retain(|key| {
            if seen.contains(key) {
                true
            } else {
                listener.on_contact_removed(*key);
                false
            }
        });
    }
}

/// spec.md §4.10 step 2b: drops the weaker of any two contacts whose
/// normals face each other by more than the padding allowance, so the
/// character is never wedged to a standstill by two opposing surfaces that
/// are, numerically, the same gap.
fn discard_opposing_contacts(contacts: &mut Vec<PlaneConstraint>) {
    let mut drop = vec![false; contacts.len()];
    for i in 0..contacts.len() {
        if drop[i] {
            continue;
        }
        for j in (i + 1)..contacts.len() {
            if drop[j] {
                continue;
            }
            if contacts[i].normal.dot(&contacts[j].normal) < -0.999 {
                if contacts[i].penetration >= contacts[j].penetration {
                    drop[j] = true;
                } else {
                    drop[i] = true;
                    break;
                }
            }
        }
    }
    let mut kept = Vec::with_capacity(contacts.len());
    for (i, c) in contacts.drain(..).enumerate() {
        if !drop[i] {
            kept.push(c);
        }
    }
    *contacts = kept;
}

trait HorizontalNorm {
    fn xz_norm(&self, up: Vector3<f64>) -> f64;
}

impl HorizontalNorm for Vector3<f64> {
    fn xz_norm(&self, up: Vector3<f64>) -> f64 {
        (*self - up * self.dot(&up)).norm()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::BodySettings;
    use crate::broadphase::{CollisionGroupFilter, DefaultQueryFilter, LayerTable};

    fn one_layer() -> (LayerTable, crate::broadphase::ObjectLayerId) {
        let mut layers = LayerTable::default();
        let bp = layers.add_broadphase_layer();
        let layer = layers.add_object_layer(bp).unwrap();
        layers.enable_collision(layer, layer).unwrap();
        (layers, layer)
    }

    #[test]
    fn character_stands_on_a_flat_floor() {
        let (layers, layer) = one_layer();
        let mut bodies = BodyPool::new();
        let floor = bodies
            .create(BodySettings { shape: Shape::cuboid(Vector3::new(10.0, 0.5, 10.0), 0.0).unwrap(), motion_type: MotionType::Static, object_layer: layer, position: Vector3::new(0.0, -0.5, 0.0), ..Default::default() })
            .unwrap();
        let mut tree = BroadPhaseTree::new();
        let body = bodies.get(floor).unwrap();
        tree.insert(body.world_aabb(), floor.to_bits());
        let trees = [tree];

        let settings = CharacterSettings { shape: Shape::capsule(0.5, 0.3).unwrap(), ..Default::default() };
        let mut character = Character::new(settings, Vector3::new(0.0, 0.85, 0.0), UnitQuaternion::identity());
        let filter = DefaultQueryFilter { layers: &layers, query_layer: layer, query_groups: CollisionGroupFilter::default(), exclude: std::collections::HashSet::new() };
        let mut listener = NullCharacterContactListener;

        for _ in 0..30 {
            character.update(1.0 / 60.0, Vector3::new(0.0, -9.81, 0.0), &trees, &mut bodies, &mut listener, &filter);
        }

        assert!(character.is_supported(), "character should have found ground, state = {:?}", character.ground_state());
        assert!((character.position().y - 0.8).abs() < 0.1, "character should rest near y=0.8, got {}", character.position().y);
    }

    #[test]
    fn character_walks_up_a_single_step() {
        let (layers, layer) = one_layer();
        let mut bodies = BodyPool::new();
        let floor = bodies
            .create(BodySettings { shape: Shape::cuboid(Vector3::new(10.0, 0.5, 10.0), 0.0).unwrap(), motion_type: MotionType::Static, object_layer: layer, position: Vector3::new(0.0, -0.5, 0.0), ..Default::default() })
            .unwrap();
        let ledge = bodies
            .create(BodySettings {
                shape: Shape::cuboid(Vector3::new(9.0, 0.15, 10.0), 0.0).unwrap(),
                motion_type: MotionType::Static,
                object_layer: layer,
                position: Vector3::new(10.0, 0.15, 0.0),
                ..Default::default()
            })
            .unwrap();
        let mut tree = BroadPhaseTree::new();
        tree.insert(bodies.get(floor).unwrap().world_aabb(), floor.to_bits());
        tree.insert(bodies.get(ledge).unwrap().world_aabb(), ledge.to_bits());
        let trees = [tree];

        let settings = CharacterSettings { shape: Shape::capsule(0.5, 0.3).unwrap(), walk_stairs_step_up: Vector3::new(0.0, 0.4, 0.0), ..Default::default() };
        let mut character = Character::new(settings, Vector3::new(0.0, 0.85, 0.0), UnitQuaternion::identity());
        let filter = DefaultQueryFilter { layers: &layers, query_layer: layer, query_groups: CollisionGroupFilter::default(), exclude: std::collections::HashSet::new() };
        let mut listener = NullCharacterContactListener;

        let dt = 1.0 / 60.0;
        for _ in 0..60 {
            character.set_linear_velocity(Vector3::new(2.0, 0.0, 0.0));
            character.update(dt, Vector3::new(0.0, -9.81, 0.0), &trees, &mut bodies, &mut listener, &filter);
        }

        assert!(character.position().x >= 1.0, "character should have crossed onto the ledge, x = {}", character.position().x);
        assert!(character.position().y >= 0.30 - 0.05, "character should be standing on the ledge, y = {}", character.position().y);
    }
}
