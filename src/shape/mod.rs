//! The shape library: a closed set of collision primitives behind a single
//! tagged enum, each exposing AABB/support/mass/face/normal/sub-shape
//! operations.
//!
//! Grounded on spec.md §4.1 and §9's REDESIGN FLAGS: "variant shapes through
//! per-shape modules with a shared contract" becomes a Rust `enum` matched
//! exhaustively rather than a runtime shape-type registry — there is no
//! `registerAllShapes()` here, every variant is known at compile time.

pub mod composite;
pub mod convex_hull;
pub mod mass;
pub mod mesh;
pub mod primitives;
pub mod subshape;

pub use composite::{Compound, CompoundChild, OffsetCenterOfMass, Plane, Transformed, COMPOUND_CHILD_BITS};
pub use convex_hull::{ConvexHull, HullFace};
pub use mass::MassProperties;
pub use mesh::{Triangle, TriangleMesh};
pub use primitives::{Capsule, ConvexRadiusMode, Cuboid, Cylinder, Sphere};
pub use subshape::SubShapeId;

use crate::error::{PhysicsError, PhysicsResult};
use crate::math::Aabb3;
use nalgebra::Vector3;

/// Number of bits a [`TriangleMesh`] consumes from a sub-shape path to name
/// one of its triangles.
pub const MESH_TRIANGLE_BITS: u32 = 32;

/// A collision shape: one of a closed set of convex primitives, composite
/// containers, or decorators.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Shape {
    /// A solid sphere.
    Sphere(Sphere),
    /// An (optionally rounded) box.
    Cuboid(Cuboid),
    /// A capsule (cylinder with hemispherical caps).
    Capsule(Capsule),
    /// A solid cylinder.
    Cylinder(Cylinder),
    /// A convex polyhedron from explicit vertices/faces.
    ConvexHull(ConvexHull),
    /// A static triangle mesh with a BVH.
    TriangleMesh(TriangleMesh),
    /// A finite clipped half-space.
    Plane(Plane),
    /// A rigid hierarchy of child shapes.
    Compound(Compound),
    /// A fixed local-transform decorator.
    Transformed(Transformed),
    /// A center-of-mass-offset decorator.
    OffsetCenterOfMass(OffsetCenterOfMass),
    /// A shape with no geometry: never collides, has zero mass.
    Empty,
}

impl Shape {
    /// Validating constructor for `Sphere`; rejects non-positive radius.
    pub fn sphere(radius: f64) -> PhysicsResult<Shape> {
        if !(radius > 0.0) {
            return Err(PhysicsError::InvalidShape(format!("sphere radius must be positive, got {radius}")));
        }
        Ok(Shape::Sphere(Sphere { radius }))
    }

    /// Validating constructor for `Cuboid`.
    pub fn cuboid(half_extents: Vector3<f64>, convex_radius: f64) -> PhysicsResult<Shape> {
        if half_extents.iter().any(|c| !(*c > 0.0)) {
            return Err(PhysicsError::InvalidShape("box half-extents must be positive".into()));
        }
        if convex_radius < 0.0 {
            return Err(PhysicsError::InvalidShape("convex radius must be non-negative".into()));
        }
        Ok(Shape::Cuboid(Cuboid { half_extents, convex_radius }))
    }

    /// Validating constructor for `Capsule`; rejects non-positive radius per
    /// spec.md §7.
    pub fn capsule(half_height: f64, radius: f64) -> PhysicsResult<Shape> {
        if !(radius > 0.0) {
            return Err(PhysicsError::InvalidShape(format!("capsule radius must be positive, got {radius}")));
        }
        if !(half_height >= 0.0) {
            return Err(PhysicsError::InvalidShape("capsule half-height must be non-negative".into()));
        }
        Ok(Shape::Capsule(Capsule { half_height, radius }))
    }

    /// Validating constructor for `Cylinder`.
    pub fn cylinder(half_height: f64, radius: f64) -> PhysicsResult<Shape> {
        if !(radius > 0.0) || !(half_height > 0.0) {
            return Err(PhysicsError::InvalidShape("cylinder half-height and radius must be positive".into()));
        }
        Ok(Shape::Cylinder(Cylinder { half_height, radius }))
    }

    /// Validating constructor for `Plane`.
    pub fn plane(normal: Vector3<f64>, constant: f64, half_extent: f64) -> PhysicsResult<Shape> {
        if normal.norm() < 1e-9 {
            return Err(PhysicsError::InvalidShape("plane normal must be non-zero".into()));
        }
        if !(half_extent > 0.0) {
            return Err(PhysicsError::InvalidShape("plane half-extent must be positive".into()));
        }
        Ok(Shape::Plane(Plane { normal: normal.normalize(), constant, half_extent }))
    }

    /// World-space AABB for this shape placed at `position`/`rotation`
    /// (identity scale; the engine does not support non-uniform runtime
    /// scaling beyond what `Transformed` already expresses).
    pub fn aabb(&self, position: Vector3<f64>, rotation: nalgebra::UnitQuaternion<f64>) -> Aabb3 {
        let local = self.aabb_identity();
        if rotation == nalgebra::UnitQuaternion::identity() {
            return Aabb3::new(local.min + position, local.max + position);
        }
        // Conservatively rotate the local AABB's 8 corners.
        let c = local.center();
        let e = local.half_extents();
        let mut result = Aabb3::empty();
        for sx in [-1.0, 1.0] {
            for sy in [-1.0, 1.0] {
                for sz in [-1.0, 1.0] {
                    let corner = c + Vector3::new(sx * e.x, sy * e.y, sz * e.z);
                    result.encapsulate_point(position + rotation * corner);
                }
            }
        }
        result
    }

    /// Local-space (identity-transform) AABB.
    pub fn aabb_identity(&self) -> Aabb3 {
        match self {
            Shape::Sphere(s) => s.aabb(),
            Shape::Cuboid(b) => b.aabb(),
            Shape::Capsule(c) => c.aabb(),
            Shape::Cylinder(c) => c.aabb(),
            Shape::ConvexHull(h) => h.aabb(),
            Shape::TriangleMesh(m) => m.aabb(),
            Shape::Plane(p) => p.aabb(),
            Shape::Compound(c) => c.aabb(),
            Shape::Transformed(t) => t.aabb(),
            Shape::OffsetCenterOfMass(o) => o.aabb(),
            Shape::Empty => Aabb3::empty(),
        }
    }

    /// Support function: the farthest point of this shape along `direction`
    /// in local space. Composite shapes do not have a single well-defined
    /// support point and panic if called directly; GJK/EPA only ever
    /// operate on convex leaves reached via `get_leaf_shape`.
    pub fn support_point(&self, direction: Vector3<f64>, mode: ConvexRadiusMode) -> Vector3<f64> {
        match self {
            Shape::Sphere(s) => s.support_point(direction, mode),
            Shape::Cuboid(b) => b.support_point(direction, mode),
            Shape::Capsule(c) => c.support_point(direction, mode),
            Shape::Cylinder(c) => c.support_point(direction, mode),
            Shape::ConvexHull(h) => h.support_point(direction, mode),
            Shape::Transformed(t) => t.support_point(direction, mode),
            Shape::Plane(_) | Shape::TriangleMesh(_) | Shape::Compound(_) | Shape::OffsetCenterOfMass(_) | Shape::Empty => {
                Vector3::zeros()
            }
        }
    }

    /// The Minkowski-sum convex radius used as a GJK/EPA margin; zero for
    /// shapes with sharp, exactly-modeled edges.
    pub fn convex_radius(&self) -> f64 {
        match self {
            Shape::Sphere(s) => s.convex_radius(),
            Shape::Cuboid(b) => b.convex_radius,
            Shape::Capsule(c) => c.convex_radius(),
            Shape::ConvexHull(h) => h.convex_radius,
            Shape::Transformed(t) => t.inner.convex_radius(),
            _ => 0.0,
        }
    }

    /// Center of mass in shape-local space.
    pub fn center_of_mass(&self) -> Vector3<f64> {
        match self {
            Shape::Transformed(t) => t.center_of_mass(),
            Shape::OffsetCenterOfMass(o) => o.center_of_mass(),
            Shape::Compound(c) => c.mass_properties(1.0).map(|m| m.center_of_mass).unwrap_or_else(Vector3::zeros),
            _ => Vector3::zeros(),
        }
    }

    /// Volume at unit scale.
    pub fn volume(&self) -> f64 {
        match self {
            Shape::Sphere(s) => s.volume(),
            Shape::Cuboid(b) => b.volume(),
            Shape::Capsule(c) => c.volume(),
            Shape::Cylinder(c) => c.volume(),
            Shape::ConvexHull(h) => h.volume(),
            Shape::Transformed(t) => t.volume(),
            Shape::OffsetCenterOfMass(o) => o.inner.volume(),
            Shape::Compound(c) => c.volume(),
            Shape::Plane(_) | Shape::TriangleMesh(_) | Shape::Empty => 0.0,
        }
    }

    /// Mass properties at the given density; `None` for shapes with no
    /// defined inertia distribution (triangle meshes, planes, empty), in
    /// which case a `Dynamic` body must supply a `mass_properties_override`
    /// (spec.md §7, "mass undefined").
    pub fn mass_properties(&self, density: f64) -> Option<MassProperties> {
        match self {
            Shape::Sphere(s) => Some(s.mass_properties(density)),
            Shape::Cuboid(b) => Some(b.mass_properties(density)),
            Shape::Capsule(c) => Some(c.mass_properties(density)),
            Shape::Cylinder(c) => Some(c.mass_properties(density)),
            Shape::ConvexHull(h) => Some(h.mass_properties(density)),
            Shape::Transformed(t) => t.mass_properties(density),
            Shape::OffsetCenterOfMass(o) => o.mass_properties(density),
            Shape::Compound(c) => c.mass_properties(density),
            Shape::Plane(_) | Shape::TriangleMesh(_) | Shape::Empty => None,
        }
    }

    /// Outward surface normal at a local-space point belonging to the
    /// sub-shape named by `sub_shape_id`.
    pub fn surface_normal(&self, local_point: Vector3<f64>, sub_shape_id: SubShapeId) -> Vector3<f64> {
        match self {
            Shape::Sphere(s) => s.surface_normal(local_point),
            Shape::Cuboid(b) => b.surface_normal(local_point),
            Shape::Capsule(c) => c.surface_normal(local_point),
            Shape::Cylinder(c) => c.surface_normal(local_point),
            Shape::ConvexHull(h) => h.surface_normal(local_point),
            Shape::Transformed(t) => t.surface_normal(local_point),
            Shape::Plane(p) => p.surface_normal(),
            Shape::TriangleMesh(m) => {
                let (tri_index, _) = sub_shape_id.pop(MESH_TRIANGLE_BITS);
                m.triangles().get(tri_index as usize).map(|t| t.normal()).unwrap_or_else(Vector3::y)
            }
            Shape::Compound(c) => {
                let (idx, remainder) = sub_shape_id.pop(COMPOUND_CHILD_BITS);
                let (child, pos, rot, rest) = c.descend(idx as usize, remainder);
                let local = rot.inverse() * (local_point - pos);
                rot * child.surface_normal(local, rest)
            }
            Shape::OffsetCenterOfMass(o) => o.inner.surface_normal(local_point, sub_shape_id),
            Shape::Empty => Vector3::y(),
        }
    }

    /// The polygonal face of this shape most aligned with `direction`, up to
    /// a small vertex cap, used to build stable manifold points via face
    /// clipping. Only convex primitives with flat faces return more than a
    /// single point; curved shapes (sphere/capsule/cylinder side) return an
    /// empty polygon, signalling the narrowphase should fall back to a
    /// point contact.
    pub fn supporting_face(&self, direction: Vector3<f64>, sub_shape_id: SubShapeId) -> Vec<Vector3<f64>> {
        match self {
            Shape::Cuboid(b) => b.supporting_face(direction),
            Shape::ConvexHull(h) => {
                let face = h.supporting_face(direction);
                face.vertex_indices.iter().map(|&i| h.vertices[i as usize]).collect()
            }
            Shape::Transformed(t) => {
                let local_dir = t.local_rotation.inverse() * direction;
                t.inner
                    .supporting_face(local_dir, sub_shape_id)
                    .into_iter()
                    .map(|p| t.local_position + t.local_rotation * p)
                    .collect()
            }
            Shape::TriangleMesh(m) => {
                let (tri_index, _) = sub_shape_id.pop(MESH_TRIANGLE_BITS);
                m.triangles().get(tri_index as usize).map(|t| t.vertices.to_vec()).unwrap_or_default()
            }
            Shape::Plane(p) => {
                // Build the clipped rectangle's four corners in the plane.
                let n = p.normal;
                let tangent = if n.x.abs() < 0.9 { n.cross(&Vector3::x()) } else { n.cross(&Vector3::y()) }.normalize();
                let bitangent = n.cross(&tangent);
                let origin = n * p.constant;
                let e = p.half_extent;
                vec![
                    origin + tangent * e + bitangent * e,
                    origin - tangent * e + bitangent * e,
                    origin - tangent * e - bitangent * e,
                    origin + tangent * e - bitangent * e,
                ]
            }
            Shape::Compound(c) => {
                let (idx, remainder) = sub_shape_id.pop(COMPOUND_CHILD_BITS);
                let (child, pos, rot, rest) = c.descend(idx as usize, remainder);
                let local_dir = rot.inverse() * direction;
                child.supporting_face(local_dir, rest).into_iter().map(|p_| pos + rot * p_).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Descends to the leaf shape named by `sub_shape_id`, returning the
    /// leaf and the remaining (empty, for a true leaf) path. Used by the
    /// narrowphase to fetch the concrete convex shape a manifold point
    /// belongs to.
    pub fn get_leaf_shape<'a>(&'a self, sub_shape_id: SubShapeId) -> (&'a Shape, SubShapeId) {
        match self {
            Shape::Compound(c) => {
                let (idx, remainder) = sub_shape_id.pop(COMPOUND_CHILD_BITS);
                let (child, _pos, _rot, rest) = c.descend(idx as usize, remainder);
                child.get_leaf_shape(rest)
            }
            Shape::Transformed(t) => t.inner.get_leaf_shape(sub_shape_id),
            Shape::OffsetCenterOfMass(o) => o.inner.get_leaf_shape(sub_shape_id),
            _ => (self, sub_shape_id),
        }
    }

    /// Descends to the leaf shape, accumulating the world transform along
    /// the way, for composite shapes whose children carry their own
    /// placement. Returns `(leaf_shape, world_position, world_rotation,
    /// remainder)`.
    pub fn get_sub_shape_transformed_shape<'a>(
        &'a self,
        sub_shape_id: SubShapeId,
        accumulated_position: Vector3<f64>,
        accumulated_rotation: nalgebra::UnitQuaternion<f64>,
    ) -> (&'a Shape, Vector3<f64>, nalgebra::UnitQuaternion<f64>, SubShapeId) {
        match self {
            Shape::Compound(c) => {
                let (idx, remainder) = sub_shape_id.pop(COMPOUND_CHILD_BITS);
                let (child, pos, rot, rest) = c.descend(idx as usize, remainder);
                let world_pos = accumulated_position + accumulated_rotation * pos;
                let world_rot = accumulated_rotation * rot;
                child.get_sub_shape_transformed_shape(rest, world_pos, world_rot)
            }
            Shape::Transformed(t) => {
                let world_pos = accumulated_position + accumulated_rotation * t.local_position;
                let world_rot = accumulated_rotation * t.local_rotation;
                t.inner.get_sub_shape_transformed_shape(sub_shape_id, world_pos, world_rot)
            }
            Shape::OffsetCenterOfMass(o) => o.inner.get_sub_shape_transformed_shape(sub_shape_id, accumulated_position, accumulated_rotation),
            _ => (self, accumulated_position, accumulated_rotation, sub_shape_id),
        }
    }

    /// Whether this shape kind ever participates in collision (an `Empty`
    /// shape never does).
    pub fn is_empty(&self) -> bool {
        matches!(self, Shape::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::UnitQuaternion;

    #[test]
    fn sphere_constructor_rejects_non_positive_radius() {
        assert!(Shape::sphere(0.0).is_err());
        assert!(Shape::sphere(-1.0).is_err());
        assert!(Shape::sphere(1.0).is_ok());
    }

    #[test]
    fn cuboid_aabb_at_identity_matches_local() {
        let b = Shape::cuboid(Vector3::new(1.0, 2.0, 3.0), 0.0).unwrap();
        let world = b.aabb(Vector3::zeros(), UnitQuaternion::identity());
        assert_eq!(world, b.aabb_identity());
    }

    #[test]
    fn empty_shape_has_empty_aabb_and_zero_volume() {
        assert_eq!(Shape::Empty.volume(), 0.0);
        let aabb = Shape::Empty.aabb_identity();
        assert!(aabb.min.x > aabb.max.x);
    }

    #[test]
    fn compound_get_leaf_shape_descends_into_child() {
        let child = Shape::sphere(1.0).unwrap();
        let compound = Shape::Compound(Compound {
            children: vec![CompoundChild {
                local_position: Vector3::new(1.0, 0.0, 0.0),
                local_rotation: UnitQuaternion::identity(),
                shape: Box::new(child),
            }],
        });
        let id = SubShapeId::EMPTY.push(0, COMPOUND_CHILD_BITS);
        let (leaf, remainder) = compound.get_leaf_shape(id);
        assert!(matches!(leaf, Shape::Sphere(_)));
        assert!(remainder.is_empty());
    }

    #[test]
    fn triangle_mesh_requires_override_for_mass() {
        let mesh = TriangleMesh::new(vec![Triangle {
            vertices: [Vector3::zeros(), Vector3::x(), Vector3::y()],
            active_edges: 0b111,
            material_index: 0,
        }])
        .unwrap();
        let shape = Shape::TriangleMesh(mesh);
        assert!(shape.mass_properties(1.0).is_none());
    }
}
