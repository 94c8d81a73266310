//! Expanding Polytope Algorithm: penetration depth and normal recovery once
//! GJK has found a simplex enclosing the origin.
//!
//! Implemented in full (not stubbed with a placeholder penetration value)
//! since spec.md §4.2 names EPA as a required collaborator of GJK, not an
//! optional refinement.

use crate::collide::gjk::{MinkowskiSupport, SimplexPointPublic};
use nalgebra::Vector3;
use smallvec::SmallVec;

const MAX_ITERATIONS: usize = 32;
const CONVERGENCE_TOLERANCE: f64 = 1e-5;

/// Penetration result: normal points from A into B, `depth` is the overlap
/// distance along it, and `witness_a`/`witness_b` are the contact points on
/// each shape's (un-rounded) surface.
#[derive(Debug, Clone, Copy)]
pub struct EpaResult {
    pub normal: Vector3<f64>,
    pub depth: f64,
    pub witness_a: Vector3<f64>,
    pub witness_b: Vector3<f64>,
}

#[derive(Debug, Clone, Copy)]
struct Face {
    indices: [usize; 3],
    normal: Vector3<f64>,
    distance: f64,
}

/// Grows a convex polytope from a GJK-terminated tetrahedron simplex until
/// the closest face to the origin converges, returning the penetration
/// normal/depth. Bounded by [`MAX_ITERATIONS`]; on non-convergence the best
/// face found so far is returned (spec.md §7: "EPA non-convergence yields
/// the best current face").
pub fn epa(support: &impl MinkowskiSupport, simplex: &SmallVec<[SimplexPointPublic; 4]>) -> EpaResult {
    let mut vertices: Vec<SimplexPointPublic> = simplex.to_vec();
    if vertices.len() < 4 {
        // GJK terminated early (degenerate, near-zero-volume overlap);
        // fabricate a minimal tetrahedron around the existing points so EPA
        // has a polytope to expand. This only happens for near-singular
        // contacts (e.g. exact vertex-vertex touch).
        while vertices.len() < 4 {
            let dir = Vector3::new(0.0, 1.0, 0.0) * (vertices.len() as f64 + 1.0);
            let (p, wa, wb) = support.support(dir);
            vertices.push(SimplexPointPublic { point: p, witness_a: wa, witness_b: wb });
        }
    }

    let mut faces = vec![
        make_face(&vertices, [0, 1, 2]),
        make_face(&vertices, [0, 3, 1]),
        make_face(&vertices, [0, 2, 3]),
        make_face(&vertices, [1, 3, 2]),
    ];

    let mut result = EpaResult { normal: Vector3::y(), depth: 0.0, witness_a: Vector3::zeros(), witness_b: Vector3::zeros() };

    for _ in 0..MAX_ITERATIONS {
        let (closest_index, closest) = closest_face(&faces);
        let (new_point, wa, wb) = support.support(closest.normal);
        let new_distance = new_point.dot(&closest.normal);

        result = face_to_result(&vertices, closest);

        if new_distance - closest.distance < CONVERGENCE_TOLERANCE {
            return result;
        }

        // Expand the polytope: remove faces visible from the new point,
        // collect the resulting hole's boundary edges, and re-triangulate
        // the hole with the new vertex.
        let new_vertex_index = vertices.len();
        vertices.push(SimplexPointPublic { point: new_point, witness_a: wa, witness_b: wb });

        let mut visible = vec![false; faces.len()];
        for (i, f) in faces.iter().enumerate() {
            visible[i] = f.normal.dot(&(new_point - vertices[f.indices[0]].point)) > 0.0;
        }
        // A face could fail to be marked visible due to numerics; ensure at
        // least the closest one is removed so the loop always makes
        // progress.
        visible[closest_index] = true;

        let mut edges: Vec<(usize, usize)> = Vec::new();
        for (i, f) in faces.iter().enumerate() {
            if !visible[i] {
                continue;
            }
            for e in 0..3 {
                let edge = (f.indices[e], f.indices[(e + 1) % 3]);
                if let Some(pos) = edges.iter().position(|&(a, b)| a == edge.1 && b == edge.0) {
                    edges.remove(pos);
                } else {
                    edges.push(edge);
                }
            }
        }

        let mut kept: Vec<Face> = faces.iter().enumerate().filter(|(i, _)| !visible[*i]).map(|(_, f)| *f).collect();
        for (a, b) in edges {
            kept.push(make_face(&vertices, [a, b, new_vertex_index]));
        }
        faces = kept;

        if faces.is_empty() {
            break;
        }
    }

    result
}

fn make_face(vertices: &[SimplexPointPublic], indices: [usize; 3]) -> Face {
    let a = vertices[indices[0]].point;
    let b = vertices[indices[1]].point;
    let c = vertices[indices[2]].point;
    let mut normal = (b - a).cross(&(c - a));
    let norm = normal.norm();
    if norm > 1e-12 {
        normal /= norm;
    }
    // Orient outward: the face normal should point away from the
    // polytope's interior (approximated by the origin side for a
    // origin-enclosing simplex).
    if normal.dot(&a) < 0.0 {
        normal = -normal;
    }
    let distance = normal.dot(&a);
    Face { indices, normal, distance: distance.max(0.0) }
}

fn closest_face(faces: &[Face]) -> (usize, Face) {
    let mut best = 0;
    let mut best_dist = faces[0].distance;
    for (i, f) in faces.iter().enumerate().skip(1) {
        if f.distance < best_dist {
            best_dist = f.distance;
            best = i;
        }
    }
    (best, faces[best])
}

fn face_to_result(vertices: &[SimplexPointPublic], face: Face) -> EpaResult {
    // Barycentric projection of the origin onto the face plane to recover
    // witness points consistent with the reported normal/depth.
    let [ia, ib, ic] = face.indices;
    let (a, b, c) = (vertices[ia], vertices[ib], vertices[ic]);
    let origin_on_plane = face.normal * face.distance;
    let (u, v, w) = barycentric(origin_on_plane, a.point, b.point, c.point);
    let witness_a = a.witness_a * u + b.witness_a * v + c.witness_a * w;
    let witness_b = a.witness_b * u + b.witness_b * v + c.witness_b * w;
    EpaResult { normal: face.normal, depth: face.distance, witness_a, witness_b }
}

fn barycentric(p: Vector3<f64>, a: Vector3<f64>, b: Vector3<f64>, c: Vector3<f64>) -> (f64, f64, f64) {
    let v0 = b - a;
    let v1 = c - a;
    let v2 = p - a;
    let d00 = v0.dot(&v0);
    let d01 = v0.dot(&v1);
    let d11 = v1.dot(&v1);
    let d20 = v2.dot(&v0);
    let d21 = v2.dot(&v1);
    let denom = d00 * d11 - d01 * d01;
    if denom.abs() < 1e-12 {
        return (1.0, 0.0, 0.0);
    }
    let v = (d11 * d20 - d01 * d21) / denom;
    let w = (d00 * d21 - d01 * d20) / denom;
    let u = 1.0 - v - w;
    (u, v, w)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collide::gjk::{gjk, ClosureSupport, GjkResult};

    fn sphere_support(center: Vector3<f64>, radius: f64) -> impl Fn(Vector3<f64>) -> Vector3<f64> {
        move |dir: Vector3<f64>| {
            let d = if dir.norm() > 1e-12 { dir.normalize() } else { Vector3::x() };
            center + d * radius
        }
    }

    #[test]
    fn epa_reports_positive_depth_for_overlapping_spheres() {
        let sa = sphere_support(Vector3::zeros(), 1.0);
        let sb = sphere_support(Vector3::new(0.5, 0.0, 0.0), 1.0);
        let support = ClosureSupport { support_a: &sa, support_b: &sb };
        let simplex = match gjk(&support, None) {
            GjkResult::Intersecting { simplex } => simplex,
            GjkResult::Separated { .. } => panic!("expected overlap"),
        };
        let result = epa(&support, &simplex);
        assert!(result.depth > 0.0);
        assert!(result.depth < 2.0);
    }
}
