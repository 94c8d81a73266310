//! Minimal math primitives the crate needs beyond what `nalgebra` provides.
//!
//! Vectors, quaternions and matrices are `nalgebra` types throughout the
//! crate; axis-aligned bounding boxes and rays are not, so this module
//! defines the small amount of additional geometry the rest of the engine
//! is built on.

use nalgebra::{Isometry3, UnitQuaternion, Vector3};

/// Axis-aligned bounding box in world or local space.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Aabb3 {
    /// Minimum corner.
    pub min: Vector3<f64>,
    /// Maximum corner.
    pub max: Vector3<f64>,
}

impl Aabb3 {
    /// An AABB that contains nothing; the identity element of [`Aabb3::merge`].
    pub fn empty() -> Self {
        Self {
            min: Vector3::repeat(f64::INFINITY),
            max: Vector3::repeat(f64::NEG_INFINITY),
        }
    }

    /// Builds an AABB from an explicit min/max corner pair.
    pub fn new(min: Vector3<f64>, max: Vector3<f64>) -> Self {
        Self { min, max }
    }

    /// Builds an AABB from a center and half-extents.
    pub fn from_center_half_extents(center: Vector3<f64>, half_extents: Vector3<f64>) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// Builds the AABB enclosing a point cloud.
    pub fn from_points(points: impl IntoIterator<Item = Vector3<f64>>) -> Self {
        let mut aabb = Self::empty();
        for p in points {
            aabb.encapsulate_point(p);
        }
        aabb
    }

    /// Center point of the box.
    pub fn center(&self) -> Vector3<f64> {
        (self.min + self.max) * 0.5
    }

    /// Half-extents of the box along each axis.
    pub fn half_extents(&self) -> Vector3<f64> {
        (self.max - self.min) * 0.5
    }

    /// Surface area, used as the DBVT's quality heuristic (SAH).
    pub fn surface_area(&self) -> f64 {
        let e = self.max - self.min;
        if e.x < 0.0 || e.y < 0.0 || e.z < 0.0 {
            return 0.0;
        }
        2.0 * (e.x * e.y + e.y * e.z + e.z * e.x)
    }

    /// Whether this AABB overlaps `other`, corners inclusive.
    pub fn overlaps(&self, other: &Aabb3) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Whether this AABB fully contains `other`.
    pub fn contains(&self, other: &Aabb3) -> bool {
        self.min.x <= other.min.x
            && self.min.y <= other.min.y
            && self.min.z <= other.min.z
            && self.max.x >= other.max.x
            && self.max.y >= other.max.y
            && self.max.z >= other.max.z
    }

    /// Whether a point lies inside this AABB.
    pub fn contains_point(&self, point: Vector3<f64>) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
            && point.z >= self.min.z
            && point.z <= self.max.z
    }

    /// Grows the box symmetrically by `margin` along every axis.
    pub fn expanded(&self, margin: f64) -> Aabb3 {
        let m = Vector3::repeat(margin);
        Aabb3::new(self.min - m, self.max + m)
    }

    /// The union of two AABBs.
    pub fn merge(&self, other: &Aabb3) -> Aabb3 {
        Aabb3::new(self.min.inf(&other.min), self.max.sup(&other.max))
    }

    /// Grows this AABB in place to include `point`.
    pub fn encapsulate_point(&mut self, point: Vector3<f64>) {
        self.min = self.min.inf(&point);
        self.max = self.max.sup(&point);
    }

    /// Translates the box by a swept displacement, returning the AABB of the
    /// swept volume (used for CCD and broadphase `cast_aabb` queries).
    pub fn swept(&self, displacement: Vector3<f64>) -> Aabb3 {
        let shifted = Aabb3::new(self.min + displacement, self.max + displacement);
        self.merge(&shifted)
    }

    /// Ray/AABB slab test; returns the entry fraction in `[0, max_fraction]`
    /// if the ray hits, scaled so that `1.0` corresponds to `direction`'s
    /// full length (i.e. `direction` is *not* assumed normalized).
    pub fn cast_ray(&self, origin: Vector3<f64>, direction: Vector3<f64>) -> Option<f64> {
        let mut t_min = 0.0f64;
        let mut t_max = 1.0f64;
        for axis in 0..3 {
            let o = origin[axis];
            let d = direction[axis];
            let lo = self.min[axis];
            let hi = self.max[axis];
            if d.abs() < 1e-12 {
                if o < lo || o > hi {
                    return None;
                }
            } else {
                let inv_d = 1.0 / d;
                let mut t0 = (lo - o) * inv_d;
                let mut t1 = (hi - o) * inv_d;
                if t0 > t1 {
                    std::mem::swap(&mut t0, &mut t1);
                }
                t_min = t_min.max(t0);
                t_max = t_max.min(t1);
                if t_min > t_max {
                    return None;
                }
            }
        }
        Some(t_min)
    }
}

/// A ray for raycast queries: `origin + t * direction`, `t` in `[0, 1]`.
#[derive(Debug, Clone, Copy)]
pub struct Ray3 {
    /// Ray origin in world space.
    pub origin: Vector3<f64>,
    /// Ray direction, scaled so that `t = 1` is the end of the cast.
    pub direction: Vector3<f64>,
}

impl Ray3 {
    /// Builds a ray from an origin and an (unnormalized) displacement.
    pub fn new(origin: Vector3<f64>, direction: Vector3<f64>) -> Self {
        Self { origin, direction }
    }

    /// Point at parameter `t`.
    pub fn point_at(&self, t: f64) -> Vector3<f64> {
        self.origin + self.direction * t
    }
}

/// A rigid transform (position + orientation), used throughout the shape
/// library to place a shape's local frame in world space.
pub type Transform3 = Isometry3<f64>;

/// Builds a [`Transform3`] from a position and orientation.
pub fn transform3(position: Vector3<f64>, rotation: UnitQuaternion<f64>) -> Transform3 {
    Isometry3::from_parts(position.into(), rotation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_is_symmetric_and_touches_count_as_overlapping() {
        let a = Aabb3::new(Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 1.0, 1.0));
        let b = Aabb3::new(Vector3::new(1.0, 0.0, 0.0), Vector3::new(2.0, 1.0, 1.0));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
    }

    #[test]
    fn merge_contains_both_inputs() {
        let a = Aabb3::new(Vector3::new(-1.0, 0.0, 0.0), Vector3::new(0.0, 1.0, 1.0));
        let b = Aabb3::new(Vector3::new(0.5, -2.0, 0.0), Vector3::new(3.0, 1.0, 1.0));
        let m = a.merge(&b);
        assert!(m.contains(&a));
        assert!(m.contains(&b));
    }

    #[test]
    fn ray_hits_box_from_outside() {
        let aabb = Aabb3::from_center_half_extents(Vector3::zeros(), Vector3::repeat(1.0));
        let t = aabb.cast_ray(Vector3::new(-5.0, 0.0, 0.0), Vector3::new(10.0, 0.0, 0.0));
        assert!(t.is_some());
        assert_relative_eq_t(t.unwrap(), 0.4);
    }

    #[test]
    fn ray_misses_box() {
        let aabb = Aabb3::from_center_half_extents(Vector3::zeros(), Vector3::repeat(1.0));
        let t = aabb.cast_ray(Vector3::new(-5.0, 5.0, 0.0), Vector3::new(10.0, 0.0, 0.0));
        assert!(t.is_none());
    }

    fn assert_relative_eq_t(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }
}
