//! Dynamic bounding-volume tree (DBVT): the per-layer spatial index the
//! broadphase uses for `insert`/`remove`/`update`/`intersect_aabb`/
//! `cast_ray`/`cast_aabb`/`collect_pairs`.
//!
//! This is a classic Box2D/Bullet-style dynamic AABB tree: leaves store a
//! *fattened* AABB so that small motion doesn't force a reinsertion, and
//! internal nodes are rebalanced with single/double rotations keyed on a
//! surface-area heuristic, keeping query cost close to O(log n).
//!
//! Node storage is its own arena (`Vec<Node>` plus a free list), not a
//! pointer graph: per the crate's handle conventions, a [`NodeHandle`] is an
//! index, never exposed as a raw pointer.

use crate::math::Aabb3;
use smallvec::SmallVec;
use std::collections::HashSet;

/// How much a leaf's AABB is fattened so that small motion can be absorbed
/// by `update` without a full remove+reinsert.
const AABB_MARGIN: f64 = 0.05;

const NULL_NODE: u32 = u32::MAX;

/// An opaque handle into a [`BroadPhaseTree`]. Stable across `update` calls
/// that do not trigger a reinsertion; `insert`/`remove` invalidate/allocate
/// handles explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle(u32);

#[derive(Debug, Clone, Copy)]
struct Node {
    aabb: Aabb3,
    parent: u32,
    children: [u32; 2],
    /// Height of the subtree rooted here; `0` for leaves, `-1` when free.
    height: i32,
    /// Opaque payload for leaves (a body's bits-packed id); unused on
    /// internal nodes.
    user_data: u64,
}

impl Node {
    fn is_leaf(&self) -> bool {
        self.children[0] == NULL_NODE
    }
}

/// A dynamic AABB tree over a single broadphase layer.
#[derive(Debug, Clone)]
pub struct BroadPhaseTree {
    nodes: Vec<Node>,
    root: u32,
    free_list: u32,
    leaf_count: usize,
}

impl Default for BroadPhaseTree {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadPhaseTree {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            root: NULL_NODE,
            free_list: NULL_NODE,
            leaf_count: 0,
        }
    }

    /// Number of leaves currently in the tree.
    pub fn len(&self) -> usize {
        self.leaf_count
    }

    /// Whether the tree has no leaves.
    pub fn is_empty(&self) -> bool {
        self.leaf_count == 0
    }

    /// The fattened AABB currently stored for a node (what queries test
    /// against, not the tight shape AABB the caller passed in).
    pub fn fat_aabb(&self, handle: NodeHandle) -> Aabb3 {
        self.nodes[handle.0 as usize].aabb
    }

    /// Opaque payload stored at a leaf (set at `insert` time).
    pub fn user_data(&self, handle: NodeHandle) -> u64 {
        self.nodes[handle.0 as usize].user_data
    }

    /// Inserts a new leaf with the given tight AABB, fattening it by
    /// [`AABB_MARGIN`], and returns a stable handle.
    pub fn insert(&mut self, aabb: Aabb3, user_data: u64) -> NodeHandle {
        let leaf = self.allocate_node();
        self.nodes[leaf as usize] = Node {
            aabb: aabb.expanded(AABB_MARGIN),
            parent: NULL_NODE,
            children: [NULL_NODE, NULL_NODE],
            height: 0,
            user_data,
        };
        self.insert_leaf(leaf);
        self.leaf_count += 1;
        NodeHandle(leaf)
    }

    /// Removes a leaf from the tree.
    pub fn remove(&mut self, handle: NodeHandle) {
        self.remove_leaf(handle.0);
        self.free_node(handle.0);
        self.leaf_count -= 1;
    }

    /// Updates a leaf's tight AABB. If the new AABB is still inside the
    /// stored fat AABB this is a no-op (the common case for slow-moving
    /// bodies); otherwise the leaf is removed and reinserted with a margin
    /// that additionally accounts for the displacement, so that a body
    /// moving in a consistent direction doesn't thrash every step.
    ///
    /// Returns whether a reinsertion happened.
    pub fn update(&mut self, handle: NodeHandle, new_aabb: Aabb3, displacement: nalgebra::Vector3<f64>) -> bool {
        let idx = handle.0 as usize;
        if self.nodes[idx].aabb.contains(&new_aabb) {
            return false;
        }
        self.remove_leaf(handle.0);
        let predicted = new_aabb.expanded(AABB_MARGIN).swept(displacement * 0.1);
        self.nodes[idx].aabb = predicted;
        self.insert_leaf(handle.0);
        true
    }

    /// Visits every leaf whose fat AABB overlaps `aabb`.
    pub fn intersect_aabb(&self, aabb: &Aabb3, mut visitor: impl FnMut(u64)) {
        self.query(
            |node_aabb| node_aabb.overlaps(aabb),
            |data| visitor(data),
        );
    }

    /// Visits every leaf whose fat AABB is crossed by the ray
    /// `origin + t * direction`, `t` in `[0, 1]`.
    pub fn cast_ray(&self, origin: nalgebra::Vector3<f64>, direction: nalgebra::Vector3<f64>, mut visitor: impl FnMut(u64)) {
        self.query(
            |node_aabb| node_aabb.cast_ray(origin, direction).is_some(),
            |data| visitor(data),
        );
    }

    /// Visits every leaf whose fat AABB overlaps the swept volume of `aabb`
    /// translated by `displacement`.
    pub fn cast_aabb(&self, aabb: &Aabb3, displacement: nalgebra::Vector3<f64>, visitor: impl FnMut(u64)) {
        let swept = aabb.swept(displacement);
        self.intersect_aabb(&swept, visitor);
    }

    /// All leaf-vs-leaf overlapping pairs in the tree, each pair reported
    /// once. The caller is expected to sort pairs by body id afterwards;
    /// this method only guarantees every *geometrically* overlapping pair
    /// of fat AABBs is reported, not any particular order.
    pub fn collect_pairs(&self) -> Vec<(u64, u64)> {
        let mut pairs = Vec::new();
        if self.root == NULL_NODE {
            return pairs;
        }
        let mut seen: HashSet<(u32, u32)> = HashSet::new();
        self.collect_pairs_from(self.root, &mut pairs, &mut seen);
        pairs
    }

    fn collect_pairs_from(&self, node: u32, pairs: &mut Vec<(u64, u64)>, seen: &mut HashSet<(u32, u32)>) {
        let n = &self.nodes[node as usize];
        if n.is_leaf() {
            return;
        }
        let (c0, c1) = (n.children[0], n.children[1]);
        self.collect_cross(c0, c1, pairs, seen);
        self.collect_pairs_from(c0, pairs, seen);
        self.collect_pairs_from(c1, pairs, seen);
    }

    fn collect_cross(&self, a: u32, b: u32, pairs: &mut Vec<(u64, u64)>, seen: &mut HashSet<(u32, u32)>) {
        let na = &self.nodes[a as usize];
        let nb = &self.nodes[b as usize];
        if !na.aabb.overlaps(&nb.aabb) {
            return;
        }
        match (na.is_leaf(), nb.is_leaf()) {
            (true, true) => {
                let key = if a < b { (a, b) } else { (b, a) };
                if seen.insert(key) {
                    pairs.push((na.user_data, nb.user_data));
                }
            }
            (true, false) => {
                self.collect_cross(a, nb.children[0], pairs, seen);
                self.collect_cross(a, nb.children[1], pairs, seen);
            }
            (false, true) => {
                self.collect_cross(na.children[0], b, pairs, seen);
                self.collect_cross(na.children[1], b, pairs, seen);
            }
            (false, false) => {
                self.collect_cross(na.children[0], nb.children[0], pairs, seen);
                self.collect_cross(na.children[0], nb.children[1], pairs, seen);
                self.collect_cross(na.children[1], nb.children[0], pairs, seen);
                self.collect_cross(na.children[1], nb.children[1], pairs, seen);
            }
        }
    }

    fn query(&self, test: impl Fn(&Aabb3) -> bool, mut visit: impl FnMut(u64)) {
        if self.root == NULL_NODE {
            return;
        }
        let mut stack: SmallVec<[u32; 64]> = SmallVec::new();
        stack.push(self.root);
        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx as usize];
            if !test(&node.aabb) {
                continue;
            }
            if node.is_leaf() {
                visit(node.user_data);
            } else {
                stack.push(node.children[0]);
                stack.push(node.children[1]);
            }
        }
    }

    fn allocate_node(&mut self) -> u32 {
        if self.free_list != NULL_NODE {
            let idx = self.free_list;
            self.free_list = self.nodes[idx as usize].parent;
            idx
        } else {
            self.nodes.push(Node {
                aabb: Aabb3::empty(),
                parent: NULL_NODE,
                children: [NULL_NODE, NULL_NODE],
                height: -1,
                user_data: 0,
            });
            (self.nodes.len() - 1) as u32
        }
    }

    fn free_node(&mut self, idx: u32) {
        self.nodes[idx as usize].height = -1;
        self.nodes[idx as usize].parent = self.free_list;
        self.free_list = idx;
    }

    fn insert_leaf(&mut self, leaf: u32) {
        if self.root == NULL_NODE {
            self.root = leaf;
            self.nodes[leaf as usize].parent = NULL_NODE;
            return;
        }

        let leaf_aabb = self.nodes[leaf as usize].aabb;
        let mut index = self.root;
        while !self.nodes[index as usize].is_leaf() {
            let node = &self.nodes[index as usize];
            let (c0, c1) = (node.children[0], node.children[1]);
            let combined = node.aabb.merge(&leaf_aabb);
            let area = node.aabb.surface_area();
            let combined_area = combined.surface_area();
            let inheritance_cost = 2.0 * (combined_area - area);

            let cost0 = self.descend_cost(c0, &leaf_aabb) + inheritance_cost;
            let cost1 = self.descend_cost(c1, &leaf_aabb) + inheritance_cost;

            index = if cost0 < cost1 { c0 } else { c1 };
        }

        let sibling = index;
        let old_parent = self.nodes[sibling as usize].parent;
        let new_parent = self.allocate_node();
        self.nodes[new_parent as usize] = Node {
            aabb: leaf_aabb.merge(&self.nodes[sibling as usize].aabb),
            parent: old_parent,
            children: [sibling, leaf],
            height: self.nodes[sibling as usize].height + 1,
            user_data: 0,
        };

        if old_parent != NULL_NODE {
            let which = if self.nodes[old_parent as usize].children[0] == sibling { 0 } else { 1 };
            self.nodes[old_parent as usize].children[which] = new_parent;
        } else {
            self.root = new_parent;
        }
        self.nodes[sibling as usize].parent = new_parent;
        self.nodes[leaf as usize].parent = new_parent;

        self.fix_upwards(new_parent);
    }

    /// Cost of placing the new leaf as a sibling of `node` (if `node` is a
    /// leaf) or of descending into `node`'s subtree (if internal): in both
    /// cases the extra surface area `node`'s own ancestor chain picks up.
    fn descend_cost(&self, node: u32, leaf_aabb: &Aabb3) -> f64 {
        let n = &self.nodes[node as usize];
        let combined = n.aabb.merge(leaf_aabb);
        if n.is_leaf() {
            combined.surface_area()
        } else {
            combined.surface_area() - n.aabb.surface_area()
        }
    }

    fn remove_leaf(&mut self, leaf: u32) {
        if self.root == leaf {
            self.root = NULL_NODE;
            return;
        }

        let parent = self.nodes[leaf as usize].parent;
        let grandparent = self.nodes[parent as usize].parent;
        let sibling = if self.nodes[parent as usize].children[0] == leaf {
            self.nodes[parent as usize].children[1]
        } else {
            self.nodes[parent as usize].children[0]
        };

        if grandparent != NULL_NODE {
            let which = if self.nodes[grandparent as usize].children[0] == parent { 0 } else { 1 };
            self.nodes[grandparent as usize].children[which] = sibling;
            self.nodes[sibling as usize].parent = grandparent;
            self.free_node(parent);
            self.fix_upwards(grandparent);
        } else {
            self.root = sibling;
            self.nodes[sibling as usize].parent = NULL_NODE;
            self.free_node(parent);
        }
    }

    /// Recomputes AABB/height along the path to the root after a structural
    /// change, applying one rotation at each level when it improves the
    /// surface-area heuristic (keeps the tree balanced without a full
    /// rebuild).
    fn fix_upwards(&mut self, mut index: u32) {
        while index != NULL_NODE {
            index = self.balance(index);

            let (c0, c1) = (self.nodes[index as usize].children[0], self.nodes[index as usize].children[1]);
            self.nodes[index as usize].height = 1 + self.nodes[c0 as usize].height.max(self.nodes[c1 as usize].height);
            self.nodes[index as usize].aabb = self.nodes[c0 as usize].aabb.merge(&self.nodes[c1 as usize].aabb);

            index = self.nodes[index as usize].parent;
        }
    }

    /// Single-step tree rotation balancing, Box2D-style: if a node's two
    /// subtrees differ in height by more than one, rotate the taller
    /// child's better grandchild up. Returns the (possibly new) index of
    /// the node that used to be at `index`.
    fn balance(&mut self, index: u32) -> u32 {
        let node = self.nodes[index as usize];
        if node.is_leaf() || node.height < 2 {
            return index;
        }

        let (a, b) = (node.children[0], node.children[1]);
        let balance = self.nodes[b as usize].height - self.nodes[a as usize].height;

        if balance > 1 {
            self.rotate(index, b, a)
        } else if balance < -1 {
            self.rotate(index, a, b)
        } else {
            index
        }
    }

    /// Rotates `heavy` up to replace `index`: `heavy` takes `index`'s old
    /// position in the tree, `index` becomes one of `heavy`'s two children
    /// (paired with `light_sibling`, `index`'s other original child), and
    /// `heavy`'s own two children are split between `heavy` and `index`
    /// by height so both sides stay as balanced as possible.
    fn rotate(&mut self, index: u32, heavy: u32, light_sibling: u32) -> u32 {
        let (f, g) = (self.nodes[heavy as usize].children[0], self.nodes[heavy as usize].children[1]);
        let parent = self.nodes[index as usize].parent;

        self.nodes[heavy as usize].parent = parent;
        if parent != NULL_NODE {
            let which = if self.nodes[parent as usize].children[0] == index { 0 } else { 1 };
            self.nodes[parent as usize].children[which] = heavy;
        } else {
            self.root = heavy;
        }

        self.nodes[index as usize].parent = heavy;
        self.nodes[light_sibling as usize].parent = index;

        let (keep_under_heavy, move_under_index) = if self.nodes[f as usize].height > self.nodes[g as usize].height {
            (f, g)
        } else {
            (g, f)
        };

        self.nodes[heavy as usize].children = [index, keep_under_heavy];
        self.nodes[index as usize].children = [light_sibling, move_under_index];
        self.nodes[keep_under_heavy as usize].parent = heavy;
        self.nodes[move_under_index as usize].parent = index;

        self.nodes[index as usize].aabb = self.nodes[light_sibling as usize].aabb.merge(&self.nodes[move_under_index as usize].aabb);
        self.nodes[index as usize].height = 1 + self.nodes[light_sibling as usize].height.max(self.nodes[move_under_index as usize].height);

        self.nodes[heavy as usize].aabb = self.nodes[index as usize].aabb.merge(&self.nodes[keep_under_heavy as usize].aabb);
        self.nodes[heavy as usize].height = 1 + self.nodes[index as usize].height.max(self.nodes[keep_under_heavy as usize].height);

        heavy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn leaf_aabb(center: f64) -> Aabb3 {
        Aabb3::from_center_half_extents(Vector3::new(center, 0.0, 0.0), Vector3::repeat(0.4))
    }

    #[test]
    fn insert_and_query_finds_overlapping_leaf() {
        let mut tree = BroadPhaseTree::new();
        let h0 = tree.insert(leaf_aabb(0.0), 0);
        let _h1 = tree.insert(leaf_aabb(10.0), 1);

        let mut hits = Vec::new();
        tree.intersect_aabb(&leaf_aabb(0.2), |d| hits.push(d));
        assert_eq!(hits, vec![0]);
        assert_eq!(tree.user_data(h0), 0);
    }

    #[test]
    fn remove_drops_leaf_from_queries() {
        let mut tree = BroadPhaseTree::new();
        let h0 = tree.insert(leaf_aabb(0.0), 42);
        tree.remove(h0);
        assert!(tree.is_empty());
        let mut hits = Vec::new();
        tree.intersect_aabb(&leaf_aabb(0.0), |d| hits.push(d));
        assert!(hits.is_empty());
    }

    #[test]
    fn update_within_fat_aabb_is_a_no_op() {
        let mut tree = BroadPhaseTree::new();
        let h0 = tree.insert(leaf_aabb(0.0), 7);
        let fat_before = tree.fat_aabb(h0);
        let moved = tree.update(h0, Aabb3::from_center_half_extents(Vector3::new(0.01, 0.0, 0.0), Vector3::repeat(0.4)), Vector3::zeros());
        assert!(!moved);
        assert_eq!(tree.fat_aabb(h0).min, fat_before.min);
    }

    #[test]
    fn update_outside_fat_aabb_reinsert_and_tight_aabb_is_enclosed() {
        let mut tree = BroadPhaseTree::new();
        let h0 = tree.insert(leaf_aabb(0.0), 7);
        let new_tight = Aabb3::from_center_half_extents(Vector3::new(50.0, 0.0, 0.0), Vector3::repeat(0.4));
        let moved = tree.update(h0, new_tight, Vector3::new(50.0, 0.0, 0.0));
        assert!(moved);
        assert!(tree.fat_aabb(h0).contains(&new_tight));
    }

    #[test]
    fn collect_pairs_finds_all_overlapping_combinations() {
        let mut tree = BroadPhaseTree::new();
        tree.insert(leaf_aabb(0.0), 0);
        tree.insert(leaf_aabb(0.3), 1);
        tree.insert(leaf_aabb(100.0), 2);

        let pairs = tree.collect_pairs();
        assert_eq!(pairs.len(), 1);
        let (a, b) = pairs[0];
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        assert_eq!((lo, hi), (0, 1));
    }

    #[test]
    fn cast_ray_finds_leaf_in_path() {
        let mut tree = BroadPhaseTree::new();
        tree.insert(leaf_aabb(5.0), 99);
        let mut hits = Vec::new();
        tree.cast_ray(Vector3::new(-10.0, 0.0, 0.0), Vector3::new(20.0, 0.0, 0.0), |d| hits.push(d));
        assert_eq!(hits, vec![99]);
    }

    #[test]
    fn many_insertions_keep_tree_queryable() {
        let mut tree = BroadPhaseTree::new();
        let mut handles = Vec::new();
        for i in 0..200 {
            let x = i as f64 * 0.5;
            handles.push(tree.insert(leaf_aabb(x), i as u64));
        }
        assert_eq!(tree.len(), 200);
        for i in 0..200 {
            let mut hits = Vec::new();
            tree.intersect_aabb(&leaf_aabb(i as f64 * 0.5), |d| hits.push(d));
            assert!(hits.contains(&(i as u64)));
        }
        for h in handles {
            tree.remove(h);
        }
        assert!(tree.is_empty());
    }
}
