//! Atomic convex primitives: sphere, box, capsule, cylinder.
//!
//! Each exposes the support-function/AABB/mass contract `Shape` dispatches
//! to. Box, capsule and cylinder carry a convex radius: the "true" shape is
//! the Minkowski sum of a shrunken core with a sphere of that radius, so GJK
//! can work on a strictly-convex core and EPA adds the radius back in as a
//! margin (see `ConvexRadiusMode`).

use crate::math::Aabb3;
use crate::shape::mass::MassProperties;
use nalgebra::{Unit, Vector3};

/// Whether a support query should report the shrunken convex core, or the
/// core expanded by the convex radius (used when the caller needs the true
/// outer surface rather than the GJK-friendly inner body).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvexRadiusMode {
    /// Report the inner, strictly-convex core (GJK operates on this).
    ExcludeConvexRadius,
    /// Report the core expanded by the convex radius (true outer surface).
    IncludeConvexRadius,
}

/// A solid sphere centered at the shape origin.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Sphere {
    /// Sphere radius.
    pub radius: f64,
}

impl Sphere {
    pub fn aabb(&self) -> Aabb3 {
        Aabb3::from_center_half_extents(Vector3::zeros(), Vector3::repeat(self.radius))
    }

    pub fn support_point(&self, direction: Vector3<f64>, mode: ConvexRadiusMode) -> Vector3<f64> {
        match mode {
            // A sphere's core, absent its radius, is a single point at the
            // origin; the radius itself is carried entirely as convex
            // radius so GJK on two spheres degenerates to a point test.
            ConvexRadiusMode::ExcludeConvexRadius => Vector3::zeros(),
            ConvexRadiusMode::IncludeConvexRadius => {
                let dir = unit_or(direction, Vector3::x());
                dir.into_inner() * self.radius
            }
        }
    }

    pub fn convex_radius(&self) -> f64 {
        self.radius
    }

    pub fn volume(&self) -> f64 {
        4.0 / 3.0 * std::f64::consts::PI * self.radius.powi(3)
    }

    pub fn mass_properties(&self, density: f64) -> MassProperties {
        MassProperties::sphere(density, self.radius)
    }

    pub fn surface_normal(&self, local_point: Vector3<f64>) -> Vector3<f64> {
        unit_or(local_point, Vector3::y()).into_inner()
    }
}

/// An (optionally rounded) box, the Minkowski sum of an inner box with a
/// sphere of `convex_radius`.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Cuboid {
    /// Half-extents of the *inner* (core) box, before adding convex radius.
    pub half_extents: Vector3<f64>,
    /// Minkowski-sum skin radius.
    pub convex_radius: f64,
}

impl Cuboid {
    pub fn aabb(&self) -> Aabb3 {
        Aabb3::from_center_half_extents(Vector3::zeros(), self.half_extents + Vector3::repeat(self.convex_radius))
    }

    pub fn support_point(&self, direction: Vector3<f64>, mode: ConvexRadiusMode) -> Vector3<f64> {
        let core = Vector3::new(
            self.half_extents.x * direction.x.signum_or_zero(),
            self.half_extents.y * direction.y.signum_or_zero(),
            self.half_extents.z * direction.z.signum_or_zero(),
        );
        match mode {
            ConvexRadiusMode::ExcludeConvexRadius => core,
            ConvexRadiusMode::IncludeConvexRadius => {
                let dir = unit_or(direction, Vector3::x());
                core + dir.into_inner() * self.convex_radius
            }
        }
    }

    pub fn volume(&self) -> f64 {
        8.0 * self.half_extents.x * self.half_extents.y * self.half_extents.z
    }

    pub fn mass_properties(&self, density: f64) -> MassProperties {
        MassProperties::cuboid(density, self.half_extents)
    }

    pub fn surface_normal(&self, local_point: Vector3<f64>) -> Vector3<f64> {
        let d = (local_point.component_div(&self.half_extents.map(|c| c.max(1e-9)))).abs();
        let axis = if d.x >= d.y && d.x >= d.z {
            Vector3::x() * local_point.x.signum_or_zero()
        } else if d.y >= d.z {
            Vector3::y() * local_point.y.signum_or_zero()
        } else {
            Vector3::z() * local_point.z.signum_or_zero()
        };
        axis
    }

    /// The (up to 4) vertices of the face most aligned with `direction`,
    /// used for manifold generation against this box.
    pub fn supporting_face(&self, direction: Vector3<f64>) -> Vec<Vector3<f64>> {
        let e = self.half_extents;
        let ax = direction.x.abs();
        let ay = direction.y.abs();
        let az = direction.z.abs();
        if ax >= ay && ax >= az {
            let sx = e.x * direction.x.signum_or_zero();
            vec![
                Vector3::new(sx, e.y, e.z),
                Vector3::new(sx, -e.y, e.z),
                Vector3::new(sx, -e.y, -e.z),
                Vector3::new(sx, e.y, -e.z),
            ]
        } else if ay >= az {
            let sy = e.y * direction.y.signum_or_zero();
            vec![
                Vector3::new(e.x, sy, e.z),
                Vector3::new(-e.x, sy, e.z),
                Vector3::new(-e.x, sy, -e.z),
                Vector3::new(e.x, sy, -e.z),
            ]
        } else {
            let sz = e.z * direction.z.signum_or_zero();
            vec![
                Vector3::new(e.x, e.y, sz),
                Vector3::new(-e.x, e.y, sz),
                Vector3::new(-e.x, -e.y, sz),
                Vector3::new(e.x, -e.y, sz),
            ]
        }
    }
}

/// A capsule: a cylinder of `half_height` capped by hemispheres of `radius`,
/// oriented along the local Y axis.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Capsule {
    /// Half-height of the cylindrical section (excludes the caps).
    pub half_height: f64,
    /// Cap/cylinder radius.
    pub radius: f64,
}

impl Capsule {
    pub fn aabb(&self) -> Aabb3 {
        Aabb3::from_center_half_extents(
            Vector3::zeros(),
            Vector3::new(self.radius, self.half_height + self.radius, self.radius),
        )
    }

    pub fn support_point(&self, direction: Vector3<f64>, mode: ConvexRadiusMode) -> Vector3<f64> {
        // The core is the line segment between the two cap centers; radius
        // is carried entirely as convex radius, same treatment as Sphere.
        let segment_point = Vector3::new(0.0, self.half_height * direction.y.signum_or_zero(), 0.0);
        match mode {
            ConvexRadiusMode::ExcludeConvexRadius => segment_point,
            ConvexRadiusMode::IncludeConvexRadius => {
                let dir = unit_or(direction, Vector3::y());
                segment_point + dir.into_inner() * self.radius
            }
        }
    }

    pub fn convex_radius(&self) -> f64 {
        self.radius
    }

    pub fn volume(&self) -> f64 {
        std::f64::consts::PI * self.radius * self.radius * (2.0 * self.half_height)
            + 4.0 / 3.0 * std::f64::consts::PI * self.radius.powi(3)
    }

    pub fn mass_properties(&self, density: f64) -> MassProperties {
        MassProperties::capsule(density, self.half_height, self.radius)
    }

    pub fn surface_normal(&self, local_point: Vector3<f64>) -> Vector3<f64> {
        let clamped_y = local_point.y.clamp(-self.half_height, self.half_height);
        let closest = Vector3::new(0.0, clamped_y, 0.0);
        unit_or(local_point - closest, Vector3::y()).into_inner()
    }
}

/// A solid cylinder oriented along the local Y axis (no convex radius; a
/// sharp-edged shape unlike box/capsule).
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Cylinder {
    /// Half-height along Y.
    pub half_height: f64,
    /// Radius of the circular cross-section.
    pub radius: f64,
}

impl Cylinder {
    pub fn aabb(&self) -> Aabb3 {
        Aabb3::from_center_half_extents(Vector3::zeros(), Vector3::new(self.radius, self.half_height, self.radius))
    }

    pub fn support_point(&self, direction: Vector3<f64>, _mode: ConvexRadiusMode) -> Vector3<f64> {
        let y = self.half_height * direction.y.signum_or_zero();
        let radial = Vector3::new(direction.x, 0.0, direction.z);
        let radial = if radial.norm() > 1e-12 { radial.normalize() * self.radius } else { Vector3::zeros() };
        Vector3::new(radial.x, y, radial.z)
    }

    pub fn volume(&self) -> f64 {
        std::f64::consts::PI * self.radius * self.radius * (2.0 * self.half_height)
    }

    pub fn mass_properties(&self, density: f64) -> MassProperties {
        MassProperties::cylinder(density, self.half_height, self.radius)
    }

    pub fn surface_normal(&self, local_point: Vector3<f64>) -> Vector3<f64> {
        let radial = Vector3::new(local_point.x, 0.0, local_point.z);
        let cap_distance = (local_point.y.abs() - self.half_height).abs();
        let side_distance = (radial.norm() - self.radius).abs();
        if cap_distance < side_distance {
            Vector3::new(0.0, local_point.y.signum_or_zero(), 0.0)
        } else {
            unit_or(radial, Vector3::x()).into_inner()
        }
    }
}

fn unit_or(v: Vector3<f64>, fallback: Vector3<f64>) -> Unit<Vector3<f64>> {
    Unit::try_new(v, 1e-12).unwrap_or_else(|| Unit::new_unchecked(fallback))
}

trait SignumOrZero {
    fn signum_or_zero(self) -> f64;
}

impl SignumOrZero for f64 {
    fn signum_or_zero(self) -> f64 {
        if self > 0.0 {
            1.0
        } else if self < 0.0 {
            -1.0
        } else {
            1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sphere_support_with_radius_lies_on_surface() {
        let s = Sphere { radius: 2.0 };
        let p = s.support_point(Vector3::new(1.0, 0.0, 0.0), ConvexRadiusMode::IncludeConvexRadius);
        assert!((p.norm() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn cuboid_support_picks_correct_corner() {
        let b = Cuboid { half_extents: Vector3::new(1.0, 2.0, 3.0), convex_radius: 0.0 };
        let p = b.support_point(Vector3::new(1.0, -1.0, 1.0), ConvexRadiusMode::ExcludeConvexRadius);
        assert_eq!(p, Vector3::new(1.0, -2.0, 3.0));
    }

    #[test]
    fn capsule_volume_is_cylinder_plus_sphere() {
        let c = Capsule { half_height: 1.0, radius: 0.5 };
        assert!(c.volume() > 0.0);
    }
}
