//! The contact cache: per-body-pair contact records with warm-startable
//! impulses, stored in a pooled arena and threaded onto each body via an
//! intrusive doubly-linked list so the island builder and solver can walk a
//! body's contacts without a side table.
//!
//! Grounded on spec.md §3 ("Contact") and §9's REDESIGN FLAGS ("linked list
//! of contacts per body" -> arena index pairs rather than raw pointers,
//! consistent with this crate's handle conventions elsewhere).

use crate::body::{BodyId, BodyPool};
use crate::shape::SubShapeId;
use nalgebra::Vector3;
use smallvec::SmallVec;

/// One point of a [`Contact`], carrying the warm-startable impulse
/// accumulators alongside its geometry.
#[derive(Debug, Clone, Copy)]
pub struct ContactPoint {
    /// Position in body A's local frame.
    pub local_a: Vector3<f64>,
    /// Position in body B's local frame.
    pub local_b: Vector3<f64>,
    /// Penetration depth at the time this point was last updated.
    pub depth: f64,
    /// Accumulated impulse along the contact normal.
    pub normal_impulse: f64,
    /// Accumulated impulse along the manifold's two friction tangents.
    pub tangent_impulse: [f64; 2],
}

impl ContactPoint {
    fn fresh(local_a: Vector3<f64>, local_b: Vector3<f64>, depth: f64) -> Self {
        Self { local_a, local_b, depth, normal_impulse: 0.0, tangent_impulse: [0.0, 0.0] }
    }
}

/// Identifies one end of a [`Contact`]'s intrusive list membership: `edges[0]`
/// belongs to `body_a`'s list, `edges[1]` to `body_b`'s.
#[derive(Debug, Clone, Copy, Default)]
struct ContactEdge {
    prev: Option<ContactKey>,
    next: Option<ContactKey>,
}

/// Handle naming a contact and which of its two bodies a traversal arrived
/// from, packed as `(index << 1) | which_body` per spec.md's data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContactKey(u32);

/// A [`ContactKey`] meaning "no contact" (an empty list head).
pub const INVALID_CONTACT_KEY: ContactKey = ContactKey(u32::MAX);

impl ContactKey {
    fn new(contact_index: u32, which_body: u8) -> Self {
        debug_assert!(contact_index < (u32::MAX >> 1));
        ContactKey((contact_index << 1) | (which_body as u32 & 1))
    }

    /// Index into the [`ContactCache`]'s arena.
    pub fn contact_index(self) -> u32 {
        self.0 >> 1
    }

    /// Which of the contact's two bodies this key was reached through: `0`
    /// for A, `1` for B.
    pub fn which_body(self) -> u8 {
        (self.0 & 1) as u8
    }

    fn other(self) -> Self {
        ContactKey::new(self.contact_index(), 1 - self.which_body())
    }
}

/// One cached contact between two shapes, identified by body pair and
/// sub-shape pair, persisting across steps so its points can be warm
/// started.
#[derive(Debug, Clone)]
pub struct Contact {
    pub body_a: BodyId,
    pub body_b: BodyId,
    pub sub_shape_a: SubShapeId,
    pub sub_shape_b: SubShapeId,
    /// Contact normal in body B's local frame, so it tracks B's rotation
    /// across steps without being recomputed from scratch every time.
    pub normal_local_b: Vector3<f64>,
    pub points: SmallVec<[ContactPoint; 4]>,
    /// Neither body actually contributes to the solver; contacts are still
    /// created and listener callbacks still fire.
    pub sensor: bool,
    /// Created by the CCD sub-pass rather than ordinary narrowphase.
    pub created_by_ccd: bool,
    /// Friction coefficient for this contact, combined from both bodies'
    /// materials and possibly overridden by the listener.
    pub friction: f64,
    /// Restitution coefficient for this contact, combined from both bodies'
    /// materials and possibly overridden by the listener.
    pub restitution: f64,
    /// Whether a kinematic character controller may be pushed by this
    /// contact (listener-overridable; narrowphase seeds it `true`).
    pub can_push_character: bool,
    /// Whether the solver should apply impulses at this contact at all
    /// (listener-overridable; narrowphase seeds it `true`).
    pub can_receive_impulses: bool,
    /// Set by the narrowphase each step this pair is still touching; swept
    /// at end-of-step so untouched contacts are destroyed.
    processed_this_frame: bool,
    edges: [ContactEdge; 2],
}

impl Contact {
    /// Body on the other end of this contact from `from`.
    pub fn other_body(&self, from: BodyId) -> BodyId {
        if from == self.body_a { self.body_b } else { self.body_a }
    }
}

enum Slot {
    Occupied(Contact),
    Free,
}

/// Pooled storage for contacts, with intrusive per-body linked lists kept
/// in sync through [`BodyPool`] on every structural change.
#[derive(Default)]
pub struct ContactCache {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
}

impl ContactCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up an existing contact for the given body/sub-shape pair,
    /// regardless of argument order.
    pub fn find(&self, body_a: BodyId, sub_a: SubShapeId, body_b: BodyId, sub_b: SubShapeId) -> Option<u32> {
        let (lo_body, lo_sub, hi_body, hi_sub) = canonical_order(body_a, sub_a, body_b, sub_b);
        self.slots.iter().enumerate().find_map(|(i, slot)| match slot {
            Slot::Occupied(c) if c.body_a == lo_body && c.sub_shape_a == lo_sub && c.body_b == hi_body && c.sub_shape_b == hi_sub => Some(i as u32),
            _ => None,
        })
    }

    /// Creates a new contact and links it into both bodies' intrusive
    /// lists. Bodies are reordered so `body_a.index <= body_b.index`,
    /// matching spec.md's "ordered pair, smaller id first" invariant.
    pub fn create(&mut self, bodies: &mut BodyPool, body_a: BodyId, sub_a: SubShapeId, body_b: BodyId, sub_b: SubShapeId, sensor: bool) -> u32 {
        let (lo_body, lo_sub, hi_body, hi_sub) = canonical_order(body_a, sub_a, body_b, sub_b);
        let contact = Contact {
            body_a: lo_body,
            body_b: hi_body,
            sub_shape_a: lo_sub,
            sub_shape_b: hi_sub,
            normal_local_b: Vector3::y(),
            points: SmallVec::new(),
            sensor,
            created_by_ccd: false,
            friction: 0.0,
            restitution: 0.0,
            can_push_character: true,
            can_receive_impulses: true,
            processed_this_frame: true,
            edges: [ContactEdge::default(), ContactEdge::default()],
        };

        let index = if let Some(index) = self.free_list.pop() {
            self.slots[index as usize] = Slot::Occupied(contact);
            index
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot::Occupied(contact));
            index
        };

        self.link(bodies, index, lo_body, 0);
        self.link(bodies, index, hi_body, 1);
        index
    }

    fn link(&mut self, bodies: &mut BodyPool, index: u32, body: BodyId, which_body: u8) {
        let key = ContactKey::new(index, which_body);
        let Some(b) = bodies.get_mut(body) else { return };
        let old_head = b.head_contact;
        b.head_contact = Some(key);
        self.edge_mut(key).next = old_head;
        if let Some(old_head) = old_head {
            self.edge_mut(old_head).prev = Some(key);
        }
    }

    fn unlink(&mut self, bodies: &mut BodyPool, index: u32, body: BodyId, which_body: u8) {
        let key = ContactKey::new(index, which_body);
        let edge = *self.edge_mut(key);
        match edge.prev {
            Some(prev) => self.edge_mut(prev).next = edge.next,
            None => {
                if let Some(b) = bodies.get_mut(body) {
                    b.head_contact = edge.next;
                }
            }
        }
        if let Some(next) = edge.next {
            self.edge_mut(next).prev = edge.prev;
        }
    }

    fn edge_mut(&mut self, key: ContactKey) -> &mut ContactEdge {
        match &mut self.slots[key.contact_index() as usize] {
            Slot::Occupied(c) => &mut c.edges[key.which_body() as usize],
            Slot::Free => unreachable!("edge_mut on freed contact"),
        }
    }

    pub fn get(&self, index: u32) -> Option<&Contact> {
        match self.slots.get(index as usize) {
            Some(Slot::Occupied(c)) => Some(c),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, index: u32) -> Option<&mut Contact> {
        match self.slots.get_mut(index as usize) {
            Some(Slot::Occupied(c)) => Some(c),
            _ => None,
        }
    }

    /// Destroys a contact, unlinking it from both bodies' lists. The caller
    /// is responsible for firing `on_contact_removed` first.
    pub fn destroy(&mut self, bodies: &mut BodyPool, index: u32) {
        let (body_a, body_b) = match self.get(index) {
            Some(c) => (c.body_a, c.body_b),
            None => return,
        };
        self.unlink(bodies, index, body_a, 0);
        self.unlink(bodies, index, body_b, 1);
        self.slots[index as usize] = Slot::Free;
        self.free_list.push(index);
    }

    /// Destroys every contact touching `body`, firing `on_remove` for each
    /// before it is unlinked.
    pub fn destroy_all_for_body(&mut self, bodies: &mut BodyPool, body: BodyId, mut on_remove: impl FnMut(u32, &Contact)) {
        let mut to_remove = Vec::new();
        let mut cursor = bodies.get(body).and_then(|b| b.head_contact);
        while let Some(key) = cursor {
            to_remove.push(key.contact_index());
            cursor = self.get(key.contact_index()).and_then(|c| c.edges[key.which_body() as usize].next);
        }
        for index in to_remove {
            if let Some(c) = self.get(index) {
                on_remove(index, c);
            }
            self.destroy(bodies, index);
        }
    }

    /// Marks a contact as touched this frame (called by the narrowphase
    /// whenever it refreshes an existing pair).
    pub fn mark_processed(&mut self, index: u32) {
        if let Some(c) = self.get_mut(index) {
            c.processed_this_frame = true;
        }
    }

    /// Iterates every contact currently attached to `body`, in list order,
    /// yielding `(contact_index, which_body)`.
    pub fn iter_for_body<'a>(&'a self, bodies: &BodyPool, body: BodyId) -> impl Iterator<Item = (u32, u8)> + 'a {
        let start = bodies.get(body).and_then(|b| b.head_contact);
        std::iter::successors(start, move |key| self.get(key.contact_index()).and_then(|c| c.edges[key.which_body() as usize].next))
            .map(|key| (key.contact_index(), key.which_body()))
    }

    /// End-of-step sweep: destroys every contact nobody touched this frame,
    /// firing `on_remove` before unlinking, and clears the processed flag
    /// on survivors for the next step.
    pub fn sweep_unprocessed(&mut self, bodies: &mut BodyPool, mut on_remove: impl FnMut(u32, &Contact)) {
        let stale: Vec<u32> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| match s {
                Slot::Occupied(c) if !c.processed_this_frame => Some(i as u32),
                _ => None,
            })
            .collect();
        for index in &stale {
            if let Some(c) = self.get(*index) {
                on_remove(*index, c);
            }
            self.destroy(bodies, *index);
        }
        for slot in &mut self.slots {
            if let Slot::Occupied(c) = slot {
                c.processed_this_frame = false;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every live contact with its arena index, for the solver (which needs
    /// a flat pass over the whole cache rather than one body's list).
    pub fn iter(&self) -> impl Iterator<Item = (u32, &Contact)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| match s {
            Slot::Occupied(c) => Some((i as u32, c)),
            Slot::Free => None,
        })
    }
}

fn canonical_order(body_a: BodyId, sub_a: SubShapeId, body_b: BodyId, sub_b: SubShapeId) -> (BodyId, SubShapeId, BodyId, SubShapeId) {
    if body_a.index <= body_b.index {
        (body_a, sub_a, body_b, sub_b)
    } else {
        (body_b, sub_b, body_a, sub_a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::{BodySettings, MotionType};
    use crate::shape::Shape;

    fn make_body(pool: &mut BodyPool) -> BodyId {
        pool.create(BodySettings { shape: Shape::sphere(1.0).unwrap(), motion_type: MotionType::Dynamic, ..Default::default() }).unwrap()
    }

    #[test]
    fn create_links_into_both_bodies_lists() {
        let mut bodies = BodyPool::new();
        let a = make_body(&mut bodies);
        let b = make_body(&mut bodies);
        let mut cache = ContactCache::new();
        let index = cache.create(&mut bodies, a, SubShapeId::EMPTY, b, SubShapeId::EMPTY, false);

        let from_a: Vec<_> = cache.iter_for_body(&bodies, a).collect();
        let from_b: Vec<_> = cache.iter_for_body(&bodies, b).collect();
        assert_eq!(from_a, vec![(index, 0)]);
        assert_eq!(from_b, vec![(index, 1)]);
    }

    #[test]
    fn canonical_order_puts_smaller_index_first() {
        let mut bodies = BodyPool::new();
        let a = make_body(&mut bodies);
        let b = make_body(&mut bodies);
        let mut cache = ContactCache::new();
        let index = cache.create(&mut bodies, b, SubShapeId::EMPTY, a, SubShapeId::EMPTY, false);
        let contact = cache.get(index).unwrap();
        assert_eq!(contact.body_a, a);
        assert_eq!(contact.body_b, b);
    }

    #[test]
    fn destroy_unlinks_from_both_bodies() {
        let mut bodies = BodyPool::new();
        let a = make_body(&mut bodies);
        let b = make_body(&mut bodies);
        let mut cache = ContactCache::new();
        let index = cache.create(&mut bodies, a, SubShapeId::EMPTY, b, SubShapeId::EMPTY, false);
        cache.destroy(&mut bodies, index);
        assert!(bodies.get(a).unwrap().head_contact.is_none());
        assert!(bodies.get(b).unwrap().head_contact.is_none());
        assert!(cache.get(index).is_none());
    }

    #[test]
    fn sweep_removes_only_unprocessed_contacts() {
        let mut bodies = BodyPool::new();
        let a = make_body(&mut bodies);
        let b = make_body(&mut bodies);
        let c = make_body(&mut bodies);
        let mut cache = ContactCache::new();
        let keep = cache.create(&mut bodies, a, SubShapeId::EMPTY, b, SubShapeId::EMPTY, false);
        let drop = cache.create(&mut bodies, a, SubShapeId::EMPTY, c, SubShapeId::EMPTY, false);
        cache.mark_processed(keep);
        // `drop` was created this step (processed_this_frame starts true),
        // so simulate it not being refreshed by clearing it directly.
        if let Some(contact) = cache.get_mut(drop) {
            contact.processed_this_frame = false;
        }
        let mut removed = Vec::new();
        cache.sweep_unprocessed(&mut bodies, |idx, _| removed.push(idx));
        assert_eq!(removed, vec![drop]);
        assert!(cache.get(keep).is_some());
    }

    #[test]
    fn find_matches_regardless_of_argument_order() {
        let mut bodies = BodyPool::new();
        let a = make_body(&mut bodies);
        let b = make_body(&mut bodies);
        let mut cache = ContactCache::new();
        cache.create(&mut bodies, a, SubShapeId::EMPTY, b, SubShapeId::EMPTY, false);
        assert!(cache.find(a, SubShapeId::EMPTY, b, SubShapeId::EMPTY).is_some());
        assert!(cache.find(b, SubShapeId::EMPTY, a, SubShapeId::EMPTY).is_some());
    }
}
