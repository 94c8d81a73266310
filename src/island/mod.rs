//! Island builder: groups active bodies into independent solve groups via
//! union-find over contacts and enabled constraints, so the solver (and, with
//! the `parallel` feature, rayon) can process unrelated groups of bodies
//! without cross-talk.
//!
//! Grounded on spec.md §4.7, reusing a scratch `Vec` step to step rather
//! than reallocating it, the same arena convention the broadphase tree uses
//! for its own working storage.
//! Static bodies are sinks: a contact or constraint touching one never
//! unions the two dynamic bodies on its either side together, since a static
//! body can simultaneously touch unrelated islands.

use crate::body::{BodyId, BodyPool};
use crate::constraint::{ConstraintId, ConstraintSet};
use crate::contact::ContactCache;

/// One independent group of bodies plus the contacts and constraints that
/// connect them, the unit the solver iterates over.
#[derive(Debug, Clone, Default)]
pub struct Island {
    /// Non-static bodies belonging to this island (static bodies are never
    /// listed as members even though they may border it).
    pub bodies: Vec<BodyId>,
    /// Contact cache indices touching this island.
    pub contacts: Vec<u32>,
    /// Constraint ids touching this island, sorted by `(priority asc,
    /// insertion index asc)` per spec.md §4.6.
    pub constraints: Vec<ConstraintId>,
}

impl Island {
    /// Whether every dynamic body in this island is currently asleep (a
    /// fully-static or fully-kinematic island with no dynamic member counts
    /// as "not sleeping" — it has nothing to wake, and nothing to skip).
    pub fn all_sleeping(&self, bodies: &BodyPool) -> bool {
        let mut any_dynamic = false;
        for &id in &self.bodies {
            if let Some(body) = bodies.get(id) {
                if matches!(body.motion_type, crate::body::MotionType::Dynamic) {
                    any_dynamic = true;
                    if !body.sleeping {
                        return false;
                    }
                }
            }
        }
        any_dynamic
    }
}

/// Union-find over body-pool slot indices, reused step to step via
/// [`IslandBuilder::build`] to avoid reallocating its scratch arrays every
/// step.
#[derive(Default)]
pub struct IslandBuilder {
    parent: Vec<u32>,
    rank: Vec<u8>,
}

impl IslandBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self, len: usize) {
        self.parent.clear();
        self.parent.extend(0..len as u32);
        self.rank.clear();
        self.rank.resize(len, 0);
    }

    fn find(&mut self, mut x: u32) -> u32 {
        while self.parent[x as usize] != x {
            let grandparent = self.parent[self.parent[x as usize] as usize];
            self.parent[x as usize] = grandparent;
            x = grandparent;
        }
        x
    }

    fn union(&mut self, a: u32, b: u32) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra as usize].cmp(&self.rank[rb as usize]) {
            std::cmp::Ordering::Less => self.parent[ra as usize] = rb,
            std::cmp::Ordering::Greater => self.parent[rb as usize] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb as usize] = ra;
                self.rank[ra as usize] += 1;
            }
        }
    }

    /// Builds this step's islands. Only non-static bodies participate in
    /// union-find; a contact or constraint with a static endpoint still
    /// attaches to whichever island its non-static endpoint lands in, but
    /// does not merge two otherwise-unrelated islands through that static
    /// body (spec.md §4.7: "static bodies act as sinks").
    pub fn build(&mut self, bodies: &BodyPool, contacts: &ContactCache, constraints: &ConstraintSet) -> Vec<Island> {
        let capacity = bodies.capacity_hint();
        self.reset(capacity);

        let is_dynamic_or_kinematic = |id: BodyId| bodies.get(id).map(|b| !matches!(b.motion_type, crate::body::MotionType::Static)).unwrap_or(false);

        for body in bodies.iter() {
            if matches!(body.motion_type, crate::body::MotionType::Static) {
                continue;
            }
            for (contact_index, which) in contacts.iter_for_body(bodies, body.id) {
                if which != 0 {
                    continue;
                }
                let Some(contact) = contacts.get(contact_index) else { continue };
                if is_dynamic_or_kinematic(contact.body_a) && is_dynamic_or_kinematic(contact.body_b) {
                    self.union(contact.body_a.index, contact.body_b.index);
                }
            }
        }
        for (_, header) in constraints.iter_all() {
            if !header.enabled {
                continue;
            }
            if is_dynamic_or_kinematic(header.body_a) && is_dynamic_or_kinematic(header.body_b) {
                self.union(header.body_a.index, header.body_b.index);
            }
        }

        let mut islands_by_root: std::collections::HashMap<u32, usize> = std::collections::HashMap::new();
        let mut islands: Vec<Island> = Vec::new();
        for body in bodies.iter() {
            if matches!(body.motion_type, crate::body::MotionType::Static) {
                continue;
            }
            let root = self.find(body.id.index);
            let slot = *islands_by_root.entry(root).or_insert_with(|| {
                islands.push(Island::default());
                islands.len() - 1
            });
            islands[slot].bodies.push(body.id);
        }

        // Attach contacts/constraints to every island touching either
        // endpoint; a static-vs-dynamic contact attaches only to the one
        // island its dynamic side belongs to, a dynamic-vs-dynamic contact
        // is already entirely inside one island by construction above.
        for body in bodies.iter() {
            if matches!(body.motion_type, crate::body::MotionType::Static) {
                continue;
            }
            let root = self.find(body.id.index);
            let slot = islands_by_root[&root];
            for (contact_index, which) in contacts.iter_for_body(bodies, body.id) {
                if which != 0 {
                    continue;
                }
                islands[slot].contacts.push(contact_index);
            }
        }
        let mut tagged: Vec<Vec<(ConstraintId, i32)>> = vec![Vec::new(); islands.len()];
        for (id, header) in constraints.iter_all() {
            if !header.enabled {
                continue;
            }
            let mut attached = std::collections::HashSet::new();
            for endpoint in [header.body_a, header.body_b] {
                if is_dynamic_or_kinematic(endpoint) {
                    let root = self.find(endpoint.index);
                    if let Some(&slot) = islands_by_root.get(&root) {
                        attached.insert(slot);
                    }
                }
            }
            for slot in attached {
                tagged[slot].push((id, header.priority));
            }
        }

        for (island, mut entries) in islands.iter_mut().zip(tagged) {
            entries.sort_by_key(|(id, priority)| (*priority, id.index));
            island.constraints = entries.into_iter().map(|(id, _)| id).collect();
        }

        islands
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::{BodySettings, MotionType};
    use crate::constraint::point::PointConstraintSettings;
    use crate::shape::{Shape, SubShapeId};
    use nalgebra::Vector3;

    fn dynamic(pool: &mut BodyPool, position: Vector3<f64>) -> BodyId {
        pool.create(BodySettings { shape: Shape::sphere(0.5).unwrap(), motion_type: MotionType::Dynamic, position, ..Default::default() }).unwrap()
    }

    fn static_body(pool: &mut BodyPool) -> BodyId {
        pool.create(BodySettings { shape: Shape::sphere(10.0).unwrap(), motion_type: MotionType::Static, ..Default::default() }).unwrap()
    }

    #[test]
    fn contact_unions_two_dynamic_bodies_into_one_island() {
        let mut bodies = BodyPool::new();
        let a = dynamic(&mut bodies, Vector3::zeros());
        let b = dynamic(&mut bodies, Vector3::new(1.0, 0.0, 0.0));
        let mut contacts = ContactCache::new();
        contacts.create(&mut bodies, a, SubShapeId::EMPTY, b, SubShapeId::EMPTY, false);

        let mut builder = IslandBuilder::new();
        let islands = builder.build(&bodies, &contacts, &ConstraintSet::new());
        assert_eq!(islands.len(), 1);
        assert_eq!(islands[0].bodies.len(), 2);
    }

    #[test]
    fn static_body_does_not_merge_the_dynamic_bodies_touching_it() {
        let mut bodies = BodyPool::new();
        let floor = static_body(&mut bodies);
        let a = dynamic(&mut bodies, Vector3::new(0.0, 1.0, 0.0));
        let b = dynamic(&mut bodies, Vector3::new(20.0, 1.0, 0.0));
        let mut contacts = ContactCache::new();
        contacts.create(&mut bodies, floor, SubShapeId::EMPTY, a, SubShapeId::EMPTY, false);
        contacts.create(&mut bodies, floor, SubShapeId::EMPTY, b, SubShapeId::EMPTY, false);

        let mut builder = IslandBuilder::new();
        let islands = builder.build(&bodies, &contacts, &ConstraintSet::new());
        assert_eq!(islands.len(), 2, "a and b should not share an island just because both touch the static floor");
    }

    #[test]
    fn disjoint_bodies_form_separate_islands() {
        let mut bodies = BodyPool::new();
        dynamic(&mut bodies, Vector3::zeros());
        dynamic(&mut bodies, Vector3::new(50.0, 0.0, 0.0));
        let contacts = ContactCache::new();
        let mut builder = IslandBuilder::new();
        let islands = builder.build(&bodies, &contacts, &ConstraintSet::new());
        assert_eq!(islands.len(), 2);
    }

    #[test]
    fn constraint_unions_like_a_contact_does() {
        let mut bodies = BodyPool::new();
        let a = dynamic(&mut bodies, Vector3::zeros());
        let b = dynamic(&mut bodies, Vector3::new(1.0, 0.0, 0.0));
        let mut set = ConstraintSet::new();
        set.point.create(PointConstraintSettings { body_a: a, body_b: b, local_anchor_a: Vector3::zeros(), local_anchor_b: Vector3::zeros() });
        let contacts = ContactCache::new();

        let mut builder = IslandBuilder::new();
        let islands = builder.build(&bodies, &contacts, &set);
        assert_eq!(islands.len(), 1);
        assert_eq!(islands[0].constraints.len(), 1);
    }

    #[test]
    fn all_sleeping_is_false_when_any_member_is_awake() {
        let mut bodies = BodyPool::new();
        let a = dynamic(&mut bodies, Vector3::zeros());
        let b = dynamic(&mut bodies, Vector3::new(1.0, 0.0, 0.0));
        bodies.get_mut(a).unwrap().sleeping = true;
        let island = Island { bodies: vec![a, b], contacts: vec![], constraints: vec![] };
        assert!(!island.all_sleeping(&bodies));
        bodies.get_mut(b).unwrap().sleeping = true;
        assert!(island.all_sleeping(&bodies));
    }
}
