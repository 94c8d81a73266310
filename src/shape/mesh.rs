//! Triangle mesh shape: a BVH of static triangles with per-triangle active-
//! edge flags and material indices.
//!
//! Built lazily as a flat median-split tree over triangle centroids
//! (adequate for the static, build-once meshes this shape represents —
//! meshes are never mutated after construction, so there is no
//! incremental-refit requirement the way the broadphase DBVT has).

use crate::error::{PhysicsError, PhysicsResult};
use crate::math::Aabb3;
use nalgebra::Vector3;

/// One triangle plus its per-edge "active" classification and material
/// index.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Triangle {
    /// World/shape-local vertex positions.
    pub vertices: [Vector3<f64>; 3],
    /// Bit `i` set means edge `i` (between `vertices[i]` and
    /// `vertices[(i+1)%3]`) is "active" — its dihedral angle against the
    /// neighbouring triangle is steep enough to generate real contacts.
    /// Edges below the threshold are inactive and may be suppressed by
    /// enhanced internal-edge removal.
    pub active_edges: u8,
    /// Index into a host-application material table; opaque to the engine.
    pub material_index: u16,
}

impl Triangle {
    pub fn aabb(&self) -> Aabb3 {
        Aabb3::from_points(self.vertices.iter().copied())
    }

    pub fn normal(&self) -> Vector3<f64> {
        let e1 = self.vertices[1] - self.vertices[0];
        let e2 = self.vertices[2] - self.vertices[0];
        let n = e1.cross(&e2);
        if n.norm() > 1e-12 { n.normalize() } else { Vector3::y() }
    }

    pub fn edge_is_active(&self, edge_index: usize) -> bool {
        (self.active_edges & (1 << edge_index)) != 0
    }

    pub fn centroid(&self) -> Vector3<f64> {
        (self.vertices[0] + self.vertices[1] + self.vertices[2]) / 3.0
    }
}

/// Derives `active_edges` for a soup of triangles from their dihedral
/// angles against edge-sharing neighbours: an edge is active when the angle
/// between the two triangles' normals is steeper than `threshold_cos`
/// (smaller cosine = steeper angle), matching spec.md §4.1's offline
/// derivation.
pub fn compute_active_edges(triangles: &mut [Triangle], threshold_cos: f64) {
    let n = triangles.len();
    // Map from an undirected vertex-position edge key to the (triangle,
    // edge-index) pairs that share it.
    let mut edge_owners: std::collections::HashMap<(EdgeKey, EdgeKey), Vec<(usize, usize)>> = std::collections::HashMap::new();
    for (ti, tri) in triangles.iter().enumerate() {
        for e in 0..3 {
            let a = EdgeKey::from_point(tri.vertices[e]);
            let b = EdgeKey::from_point(tri.vertices[(e + 1) % 3]);
            let key = if a <= b { (a, b) } else { (b, a) };
            edge_owners.entry(key).or_default().push((ti, e));
        }
    }

    let mut active = vec![0u8; n];
    for owners in edge_owners.values() {
        if owners.len() != 2 {
            // Boundary edges (no neighbour) are always active: there is no
            // interior seam to suppress.
            for &(ti, e) in owners {
                active[ti] |= 1 << e;
            }
            continue;
        }
        let (ta, ea) = owners[0];
        let (tb, eb) = owners[1];
        let cos_angle = triangles[ta].normal().dot(&triangles[tb].normal());
        if cos_angle < threshold_cos {
            active[ta] |= 1 << ea;
            active[tb] |= 1 << eb;
        }
    }
    for (tri, flags) in triangles.iter_mut().zip(active) {
        tri.active_edges = flags;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct EdgeKey(i64, i64, i64);

impl EdgeKey {
    fn from_point(p: Vector3<f64>) -> Self {
        const SCALE: f64 = 1.0e6;
        Self((p.x * SCALE).round() as i64, (p.y * SCALE).round() as i64, (p.z * SCALE).round() as i64)
    }
}

impl Eq for EdgeKey {}
impl PartialOrd for EdgeKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for EdgeKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.0, self.1, self.2).cmp(&(other.0, other.1, other.2))
    }
}
impl std::hash::Hash for EdgeKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
        self.1.hash(state);
        self.2.hash(state);
    }
}

#[derive(Debug, Clone)]
enum BvhNode {
    Leaf { aabb: Aabb3, triangle_index: u32 },
    Internal { aabb: Aabb3, left: Box<BvhNode>, right: Box<BvhNode> },
}

impl BvhNode {
    fn aabb(&self) -> Aabb3 {
        match self {
            BvhNode::Leaf { aabb, .. } => *aabb,
            BvhNode::Internal { aabb, .. } => *aabb,
        }
    }

    fn build(indices: &mut [u32], triangles: &[Triangle]) -> BvhNode {
        if indices.len() == 1 {
            return BvhNode::Leaf { aabb: triangles[indices[0] as usize].aabb(), triangle_index: indices[0] };
        }
        let aabb = indices.iter().fold(Aabb3::empty(), |acc, &i| acc.merge(&triangles[i as usize].aabb()));
        let extents = aabb.half_extents();
        let axis = if extents.x >= extents.y && extents.x >= extents.z {
            0
        } else if extents.y >= extents.z {
            1
        } else {
            2
        };
        indices.sort_by(|&a, &b| {
            triangles[a as usize].centroid()[axis]
                .partial_cmp(&triangles[b as usize].centroid()[axis])
                .unwrap()
        });
        let mid = indices.len() / 2;
        let (left_idx, right_idx) = indices.split_at_mut(mid);
        let left = BvhNode::build(left_idx, triangles);
        let right = BvhNode::build(right_idx, triangles);
        BvhNode::Internal { aabb, left: Box::new(left), right: Box::new(right) }
    }

    fn query(&self, test: &impl Fn(&Aabb3) -> bool, visit: &mut impl FnMut(u32)) {
        if !test(&self.aabb()) {
            return;
        }
        match self {
            BvhNode::Leaf { triangle_index, .. } => visit(*triangle_index),
            BvhNode::Internal { left, right, .. } => {
                left.query(test, visit);
                right.query(test, visit);
            }
        }
    }
}

/// A static triangle mesh: a BVH of triangles, each with active-edge flags
/// and a material index. Has no defined inertia; a `Dynamic` body using one
/// must supply a `mass_properties_override`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TriangleMesh {
    triangles: Vec<Triangle>,
    #[serde(skip)]
    bvh: Option<std::sync::Arc<BvhNode>>,
    aabb: Aabb3,
}

impl TriangleMesh {
    /// Builds a mesh, computing the BVH and validating non-emptiness per
    /// spec.md §7 ("a triangle mesh with zero triangles").
    pub fn new(triangles: Vec<Triangle>) -> PhysicsResult<Self> {
        if triangles.is_empty() {
            return Err(PhysicsError::InvalidShape("triangle mesh needs at least one triangle".into()));
        }
        let aabb = triangles.iter().fold(Aabb3::empty(), |acc, t| acc.merge(&t.aabb()));
        let mut indices: Vec<u32> = (0..triangles.len() as u32).collect();
        let bvh = BvhNode::build(&mut indices, &triangles);
        Ok(Self { triangles, bvh: Some(std::sync::Arc::new(bvh)), aabb })
    }

    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    pub fn aabb(&self) -> Aabb3 {
        self.aabb
    }

    /// Visits every triangle index whose AABB overlaps `query_aabb`.
    pub fn query_aabb(&self, query_aabb: &Aabb3, mut visit: impl FnMut(u32)) {
        if let Some(bvh) = &self.bvh {
            bvh.query(&|node_aabb| node_aabb.overlaps(query_aabb), &mut visit);
        }
    }
}

impl PartialEq for TriangleMesh {
    fn eq(&self, other: &Self) -> bool {
        self.triangles == other.triangles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tri(x: f64) -> Triangle {
        Triangle {
            vertices: [
                Vector3::new(x, 0.0, 0.0),
                Vector3::new(x + 1.0, 0.0, 0.0),
                Vector3::new(x, 1.0, 0.0),
            ],
            active_edges: 0,
            material_index: 0,
        }
    }

    #[test]
    fn rejects_empty_mesh() {
        assert!(TriangleMesh::new(vec![]).is_err());
    }

    #[test]
    fn query_finds_overlapping_triangle_only() {
        let mesh = TriangleMesh::new(vec![tri(0.0), tri(100.0)]).unwrap();
        let mut hits = Vec::new();
        mesh.query_aabb(&Aabb3::from_center_half_extents(Vector3::new(0.3, 0.3, 0.0), Vector3::repeat(0.2)), |i| hits.push(i));
        assert_eq!(hits, vec![0]);
    }

    #[test]
    fn boundary_edges_are_always_active() {
        let mut tris = vec![tri(0.0)];
        compute_active_edges(&mut tris, 0.9);
        assert_eq!(tris[0].active_edges, 0b111);
    }

    #[test]
    fn shared_edge_with_coplanar_neighbour_is_inactive() {
        // Two coplanar triangles sharing the edge from (1,0,0) to (0,1,0).
        let a = Triangle {
            vertices: [Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 0.0, 0.0), Vector3::new(0.0, 1.0, 0.0)],
            active_edges: 0,
            material_index: 0,
        };
        let b = Triangle {
            vertices: [Vector3::new(1.0, 0.0, 0.0), Vector3::new(1.0, 1.0, 0.0), Vector3::new(0.0, 1.0, 0.0)],
            active_edges: 0,
            material_index: 0,
        };
        let mut tris = vec![a, b];
        compute_active_edges(&mut tris, 0.9);
        // Edge 1 of `a` (vertex 1 -> vertex 2) is the shared seam.
        assert!(!tris[0].edge_is_active(1));
    }
}
