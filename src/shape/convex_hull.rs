//! Convex hull shape: pre-built vertices/faces/planes accepted as a
//! collision input. Building a hull from a point cloud is explicitly out of
//! scope (spec.md §1); this module only consumes an already-valid hull.

use crate::error::{PhysicsError, PhysicsResult};
use crate::math::Aabb3;
use crate::shape::mass::MassProperties;
use nalgebra::Vector3;

/// One planar face of a [`ConvexHull`], as an ordered loop of vertex indices
/// plus its outward plane.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HullFace {
    /// Indices into [`ConvexHull::vertices`], in winding order.
    pub vertex_indices: Vec<u32>,
    /// Outward unit normal.
    pub normal: Vector3<f64>,
    /// Plane constant such that `normal . x = constant` for points on the
    /// face.
    pub constant: f64,
}

/// A convex polyhedron given explicitly by its vertices and faces.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConvexHull {
    /// Vertex positions in shape-local space.
    pub vertices: Vec<Vector3<f64>>,
    /// Faces (ordered vertex loops) with their outward planes.
    pub faces: Vec<HullFace>,
    /// Minkowski-sum skin radius.
    pub convex_radius: f64,
}

impl ConvexHull {
    /// Validates and builds a convex hull from pre-computed geometry.
    /// Fails per spec.md §7 ("a convex hull built from fewer than four
    /// non-coplanar points") if there are fewer than four vertices or no
    /// faces.
    pub fn new(vertices: Vec<Vector3<f64>>, faces: Vec<HullFace>, convex_radius: f64) -> PhysicsResult<Self> {
        if vertices.len() < 4 {
            return Err(PhysicsError::InvalidShape(format!(
                "convex hull needs at least 4 vertices, got {}",
                vertices.len()
            )));
        }
        if faces.is_empty() {
            return Err(PhysicsError::InvalidShape("convex hull needs at least one face".into()));
        }
        if convex_radius < 0.0 {
            return Err(PhysicsError::InvalidShape("convex radius must be non-negative".into()));
        }
        Ok(Self { vertices, faces, convex_radius })
    }

    pub fn aabb(&self) -> Aabb3 {
        Aabb3::from_points(self.vertices.iter().copied()).expanded(self.convex_radius)
    }

    pub fn support_point(&self, direction: Vector3<f64>, mode: crate::shape::primitives::ConvexRadiusMode) -> Vector3<f64> {
        let mut best = self.vertices[0];
        let mut best_dot = best.dot(&direction);
        for v in &self.vertices[1..] {
            let d = v.dot(&direction);
            if d > best_dot {
                best_dot = d;
                best = *v;
            }
        }
        match mode {
            crate::shape::primitives::ConvexRadiusMode::ExcludeConvexRadius => best,
            crate::shape::primitives::ConvexRadiusMode::IncludeConvexRadius => {
                if direction.norm() > 1e-12 {
                    best + direction.normalize() * self.convex_radius
                } else {
                    best
                }
            }
        }
    }

    pub fn volume(&self) -> f64 {
        let centroid = self.vertices.iter().fold(Vector3::zeros(), |a, b| a + b) / self.vertices.len() as f64;
        let mut volume = 0.0;
        for face in &self.faces {
            // Fan-triangulate the face from its first vertex.
            if face.vertex_indices.len() < 3 {
                continue;
            }
            let v0 = self.vertices[face.vertex_indices[0] as usize] - centroid;
            for i in 1..face.vertex_indices.len() - 1 {
                let v1 = self.vertices[face.vertex_indices[i] as usize] - centroid;
                let v2 = self.vertices[face.vertex_indices[i + 1] as usize] - centroid;
                volume += v0.dot(&v1.cross(&v2)) / 6.0;
            }
        }
        volume.abs()
    }

    pub fn mass_properties(&self, density: f64) -> MassProperties {
        MassProperties::convex_hull(density, &self.vertices)
    }

    /// Returns the face whose plane normal is most aligned with `direction`.
    pub fn supporting_face(&self, direction: Vector3<f64>) -> &HullFace {
        self.faces
            .iter()
            .max_by(|a, b| a.normal.dot(&direction).partial_cmp(&b.normal.dot(&direction)).unwrap())
            .expect("convex hull always has at least one face")
    }

    pub fn surface_normal(&self, local_point: Vector3<f64>) -> Vector3<f64> {
        self.supporting_face(local_point).normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_tetrahedron() -> ConvexHull {
        let v = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(0.0, 0.0, 1.0),
        ];
        let faces = vec![HullFace { vertex_indices: vec![0, 1, 2], normal: Vector3::new(0.0, 0.0, -1.0), constant: 0.0 }];
        ConvexHull::new(v, faces, 0.0).unwrap()
    }

    #[test]
    fn rejects_too_few_vertices() {
        let v = vec![Vector3::zeros(), Vector3::x()];
        assert!(ConvexHull::new(v, vec![], 0.0).is_err());
    }

    #[test]
    fn accepts_valid_tetrahedron() {
        let hull = unit_tetrahedron();
        assert_eq!(hull.vertices.len(), 4);
    }

    #[test]
    fn support_point_picks_farthest_vertex() {
        let hull = unit_tetrahedron();
        let p = hull.support_point(Vector3::new(1.0, 0.0, 0.0), crate::shape::primitives::ConvexRadiusMode::ExcludeConvexRadius);
        assert_eq!(p, Vector3::new(1.0, 0.0, 0.0));
    }
}
