//! Non-contact constraints: point, distance, hinge, fixed, slider, cone,
//! swing-twist and six-DOF joints between two bodies.
//!
//! Grounded on spec.md §3 ("Constraint"): per-kind settings plus pooled
//! state, sharing one velocity/position solve lifecycle across every joint
//! kind. Contacts are *not* stored here — `crate::contact::ContactCache`
//! owns those, since they are created/destroyed every step by the
//! narrowphase rather than explicitly
//! by the host application.

pub mod cone;
pub mod distance;
pub mod fixed;
pub mod hinge;
pub mod part;
pub mod point;
pub mod six_dof;
pub mod slider;
pub mod swing_twist;

use crate::body::BodyId;

/// Which per-kind pool a [`ConstraintId`] indexes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    Point,
    Distance,
    Hinge,
    Fixed,
    Slider,
    Cone,
    SwingTwist,
    SixDof,
}

/// Opaque handle to a constraint: which kind's pool, an arena index, and a
/// generation counter for stale-handle detection, mirroring [`crate::body::BodyId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstraintId {
    pub kind: ConstraintKind,
    pub index: u32,
    pub generation: u32,
}

/// Generic pooled arena shared by every constraint kind's concrete pool
/// type, following the same index-reuse-with-generation scheme as
/// [`crate::body::BodyPool`].
#[derive(Debug)]
pub(crate) struct Pool<T> {
    slots: Vec<Slot<T>>,
    free_list: Vec<u32>,
}

#[derive(Debug)]
enum Slot<T> {
    Occupied(T),
    Free { generation: u32 },
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self { slots: Vec::new(), free_list: Vec::new() }
    }
}

impl<T> Pool<T> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, make: impl FnOnce(u32, u32) -> T) -> (u32, u32) {
        if let Some(index) = self.free_list.pop() {
            let generation = match &self.slots[index as usize] {
                Slot::Free { generation } => *generation,
                Slot::Occupied(_) => unreachable!("free list pointed at occupied slot"),
            };
            self.slots[index as usize] = Slot::Occupied(make(index, generation));
            (index, generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot::Occupied(make(index, 0)));
            (index, 0)
        }
    }

    pub(crate) fn remove(&mut self, index: u32, generation: u32) -> bool
    where
        T: HasGeneration,
    {
        match self.slots.get(index as usize) {
            Some(Slot::Occupied(v)) if v.generation() == generation => {
                self.slots[index as usize] = Slot::Free { generation: generation.wrapping_add(1) };
                self.free_list.push(index);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn get(&self, index: u32, generation: u32) -> Option<&T>
    where
        T: HasGeneration,
    {
        match self.slots.get(index as usize) {
            Some(Slot::Occupied(v)) if v.generation() == generation => Some(v),
            _ => None,
        }
    }

    pub(crate) fn get_mut(&mut self, index: u32, generation: u32) -> Option<&mut T>
    where
        T: HasGeneration,
    {
        match self.slots.get_mut(index as usize) {
            Some(Slot::Occupied(v)) if v.generation() == generation => Some(v),
            _ => None,
        }
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut().filter_map(|s| match s {
            Slot::Occupied(v) => Some(v),
            Slot::Free { .. } => None,
        })
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().filter_map(|s| match s {
            Slot::Occupied(v) => Some(v),
            Slot::Free { .. } => None,
        })
    }
}

/// Implemented by every constraint kind's state struct so [`Pool`] can
/// check generations generically.
pub(crate) trait HasGeneration {
    fn generation(&self) -> u32;
}

/// Fields common to every constraint kind, embedded by value rather than
/// inherited (there is no trait-object dispatch here — the solver matches
/// on [`ConstraintKind`] and calls into the concrete pool directly).
#[derive(Debug, Clone, Copy)]
pub struct ConstraintHeader {
    pub index: u32,
    pub generation: u32,
    pub body_a: BodyId,
    pub body_b: BodyId,
    pub enabled: bool,
    /// Lower solves first within a solve pass, ties broken by insertion
    /// order (the index itself), per spec.md's determinism requirement.
    pub priority: i32,
}

impl ConstraintHeader {
    pub(crate) fn new(index: u32, generation: u32, body_a: BodyId, body_b: BodyId) -> Self {
        Self { index, generation, body_a, body_b, enabled: true, priority: 0 }
    }
}

/// Owns one pool per [`ConstraintKind`], so the island builder and solver
/// have a single aggregate to enumerate instead of eight loose fields
/// threaded through by hand.
#[derive(Default)]
pub struct ConstraintSet {
    pub point: point::PointConstraintPool,
    pub distance: distance::DistanceConstraintPool,
    pub hinge: hinge::HingeConstraintPool,
    pub fixed: fixed::FixedConstraintPool,
    pub slider: slider::SliderConstraintPool,
    pub cone: cone::ConeConstraintPool,
    pub swing_twist: swing_twist::SwingTwistConstraintPool,
    pub six_dof: six_dof::SixDofConstraintPool,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes a constraint from whichever pool `id.kind` names.
    pub fn remove(&mut self, id: ConstraintId) -> bool {
        match id.kind {
            ConstraintKind::Point => self.point.remove(id),
            ConstraintKind::Distance => self.distance.remove(id),
            ConstraintKind::Hinge => self.hinge.remove(id),
            ConstraintKind::Fixed => self.fixed.remove(id),
            ConstraintKind::Slider => self.slider.remove(id),
            ConstraintKind::Cone => self.cone.remove(id),
            ConstraintKind::SwingTwist => self.swing_twist.remove(id),
            ConstraintKind::SixDof => self.six_dof.remove(id),
        }
    }

    /// Every live constraint across all eight kind pools, tagged with a
    /// reconstructable [`ConstraintId`] and its shared [`ConstraintHeader`]
    /// (body pair, enabled flag, priority) — the island builder and solver's
    /// sort/dispatch step need only this, not each kind's full state.
    pub fn iter_all(&self) -> impl Iterator<Item = (ConstraintId, &ConstraintHeader)> + '_ {
        fn tag(kind: ConstraintKind) -> impl Fn(&ConstraintHeader) -> (ConstraintId, &ConstraintHeader) {
            move |h| (ConstraintId { kind, index: h.index, generation: h.generation }, h)
        }
        self.point
            .iter_headers()
            .map(tag(ConstraintKind::Point))
            .chain(self.distance.iter_headers().map(tag(ConstraintKind::Distance)))
            .chain(self.hinge.iter_headers().map(tag(ConstraintKind::Hinge)))
            .chain(self.fixed.iter_headers().map(tag(ConstraintKind::Fixed)))
            .chain(self.slider.iter_headers().map(tag(ConstraintKind::Slider)))
            .chain(self.cone.iter_headers().map(tag(ConstraintKind::Cone)))
            .chain(self.swing_twist.iter_headers().map(tag(ConstraintKind::SwingTwist)))
            .chain(self.six_dof.iter_headers().map(tag(ConstraintKind::SixDof)))
    }

    /// `setupVelocity` on every enabled constraint, any kind.
    pub fn setup_velocity(&mut self, bodies: &crate::body::BodyPool) {
        self.point.setup_velocity(bodies);
        self.distance.setup_velocity(bodies);
        self.hinge.setup_velocity(bodies);
        self.fixed.setup_velocity(bodies);
        self.slider.setup_velocity(bodies);
        self.cone.setup_velocity(bodies);
        self.swing_twist.setup_velocity(bodies);
        self.six_dof.setup_velocity(bodies);
    }

    /// `warmStartVelocity` on every enabled constraint, any kind.
    pub fn warm_start(&mut self, bodies: &mut crate::body::BodyPool, ratio: f64) {
        self.point.warm_start(bodies, ratio);
        self.distance.warm_start(bodies, ratio);
        self.hinge.warm_start(bodies, ratio);
        self.fixed.warm_start(bodies, ratio);
        self.slider.warm_start(bodies, ratio);
        self.cone.warm_start(bodies, ratio);
        self.swing_twist.warm_start(bodies, ratio);
        self.six_dof.warm_start(bodies, ratio);
    }

    /// One Gauss-Seidel `solveVelocity` pass over a single constraint kind,
    /// selected by `kind`. Dispatching per-kind (rather than always solving
    /// all eight) lets the solver interleave contact and user-constraint
    /// solving in priority order without forcing every kind through on
    /// every call.
    pub fn solve_velocity_kind(&mut self, kind: ConstraintKind, bodies: &mut crate::body::BodyPool, dt: f64) {
        match kind {
            ConstraintKind::Point => self.point.solve_velocity(bodies),
            ConstraintKind::Distance => self.distance.solve_velocity(bodies, dt),
            ConstraintKind::Hinge => self.hinge.solve_velocity(bodies),
            ConstraintKind::Fixed => self.fixed.solve_velocity(bodies),
            ConstraintKind::Slider => self.slider.solve_velocity(bodies),
            ConstraintKind::Cone => self.cone.solve_velocity(bodies),
            ConstraintKind::SwingTwist => self.swing_twist.solve_velocity(bodies),
            ConstraintKind::SixDof => self.six_dof.solve_velocity(bodies),
        }
    }

    /// One Baumgarte `solvePosition` pass over a single constraint kind;
    /// returns the largest position error it corrected, for the solver's
    /// early-termination sweep.
    pub fn solve_position_kind(&mut self, kind: ConstraintKind, bodies: &mut crate::body::BodyPool, baumgarte_beta: f64) -> f64 {
        match kind {
            ConstraintKind::Point => self.point.solve_position(bodies, baumgarte_beta),
            ConstraintKind::Distance => self.distance.solve_position(bodies, baumgarte_beta),
            ConstraintKind::Hinge => self.hinge.solve_position(bodies, baumgarte_beta),
            ConstraintKind::Fixed => self.fixed.solve_position(bodies, baumgarte_beta),
            ConstraintKind::Slider => self.slider.solve_position(bodies, baumgarte_beta),
            ConstraintKind::Cone => self.cone.solve_position(bodies, baumgarte_beta),
            ConstraintKind::SwingTwist => self.swing_twist.solve_position(bodies, baumgarte_beta),
            ConstraintKind::SixDof => self.six_dof.solve_position(bodies, baumgarte_beta),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::{BodyPool, BodySettings, MotionType};
    use crate::shape::Shape;
    use nalgebra::Vector3;

    #[test]
    fn iter_all_tags_constraints_with_their_kind() {
        let mut bodies = BodyPool::new();
        let a = bodies.create(BodySettings { shape: Shape::sphere(0.5).unwrap(), motion_type: MotionType::Dynamic, ..Default::default() }).unwrap();
        let b = bodies
            .create(BodySettings { shape: Shape::sphere(0.5).unwrap(), motion_type: MotionType::Dynamic, position: Vector3::new(1.0, 0.0, 0.0), ..Default::default() })
            .unwrap();

        let mut set = ConstraintSet::new();
        let point_id = set.point.create(point::PointConstraintSettings { body_a: a, body_b: b, local_anchor_a: Vector3::zeros(), local_anchor_b: Vector3::zeros() });
        let distance_id = set.distance.create(distance::DistanceConstraintSettings {
            body_a: a,
            body_b: b,
            local_anchor_a: Vector3::zeros(),
            local_anchor_b: Vector3::zeros(),
            min_distance: 0.0,
            max_distance: 1.0,
            spring: None,
        });

        let ids: Vec<ConstraintId> = set.iter_all().map(|(id, _)| id).collect();
        assert!(ids.contains(&point_id));
        assert!(ids.contains(&distance_id));
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn remove_dispatches_to_the_right_pool() {
        let mut bodies = BodyPool::new();
        let a = bodies.create(BodySettings { shape: Shape::sphere(0.5).unwrap(), motion_type: MotionType::Dynamic, ..Default::default() }).unwrap();
        let b = bodies
            .create(BodySettings { shape: Shape::sphere(0.5).unwrap(), motion_type: MotionType::Dynamic, position: Vector3::new(1.0, 0.0, 0.0), ..Default::default() })
            .unwrap();
        let mut set = ConstraintSet::new();
        let id = set.point.create(point::PointConstraintSettings { body_a: a, body_b: b, local_anchor_a: Vector3::zeros(), local_anchor_b: Vector3::zeros() });
        assert!(set.remove(id));
        assert_eq!(set.iter_all().count(), 0);
    }
}
