//! Narrowphase output types and the collector interface.
//!
//! Grounded on spec.md §4.2: collectors are mutable visitor objects with
//! `addHit`/`addMiss`/`shouldEarlyOut`/`reset` plus a writable
//! `earlyOutFraction`; this crate models that as a trait (`Collector`) with
//! three provided implementations (`ClosestHitCollector`, `AnyHitCollector`,
//! `AllHitsCollector`) — the detector owns detection state, the caller
//! supplies a sink.

use crate::body::BodyId;
use crate::shape::SubShapeId;
use nalgebra::Vector3;

/// One world-space contact point plus the two shapes' witness points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    /// World-space point on shape A's surface.
    pub point_a: Vector3<f64>,
    /// World-space point on shape B's surface.
    pub point_b: Vector3<f64>,
    /// Unit normal pointing from A into B.
    pub normal: Vector3<f64>,
    /// Penetration depth along `normal` (positive when overlapping,
    /// negative when `point_a`/`point_b` are the closest-point pair of a
    /// separated query).
    pub depth: f64,
    /// Fraction in `[0, 1]` along a cast's displacement at which this hit
    /// occurred; `0.0` for a static `collide_shape` query.
    pub fraction: f64,
    /// Sub-shape id on A, if known.
    pub sub_shape_a: SubShapeId,
    /// Sub-shape id on B, if known.
    pub sub_shape_b: SubShapeId,
    /// Body the hit shape belongs to, for query-level collectors that need
    /// to report which body was struck (unset — `None` — for narrowphase-
    /// internal shape-vs-shape calls which don't know body identity).
    pub body: Option<BodyId>,
}

/// Up to four manifold points approximating the true contact area between
/// two convex shapes, plus the shared contact normal.
#[derive(Debug, Clone)]
pub struct Manifold {
    /// Contact normal, pointing from A into B.
    pub normal: Vector3<f64>,
    /// Contact points (≤4), each with both shapes' local witness points and
    /// a penetration depth.
    pub points: smallvec::SmallVec<[ManifoldPoint; 4]>,
}

/// One point of a [`Manifold`].
#[derive(Debug, Clone, Copy)]
pub struct ManifoldPoint {
    /// Local-space position on shape A (in A's body frame).
    pub local_a: Vector3<f64>,
    /// Local-space position on shape B (in B's body frame).
    pub local_b: Vector3<f64>,
    /// Penetration depth at this point.
    pub depth: f64,
}

/// Visitor interface queries report hits to. Mirrors spec.md §4.2: `add_hit`
/// is the only hook every collector needs; `should_early_out` lets the
/// broadphase/narrowphase skip work once a query is already satisfied
/// (e.g. an `Any` collector after its first hit).
pub trait Collector {
    /// Reports one hit. Implementations that only want the closest/first
    /// hit filter here.
    fn add_hit(&mut self, hit: Hit);

    /// Whether the query driving this collector can stop early. The
    /// fraction/distance already found (if any) is exposed via
    /// `early_out_fraction` so the driver can prune subtrees/candidates
    /// whose best-possible fraction cannot beat it.
    fn should_early_out(&self) -> bool {
        false
    }

    /// The fraction/distance below which a candidate cannot possibly
    /// improve on what's already been collected; `f64::INFINITY` if
    /// nothing collected yet.
    fn early_out_fraction(&self) -> f64 {
        f64::INFINITY
    }

    /// Resets internal state so the collector can be reused across calls.
    fn reset(&mut self) {}
}

/// Keeps only the hit with the smallest `fraction` (ties broken by
/// insertion order, i.e. first-seen wins).
#[derive(Debug, Default, Clone)]
pub struct ClosestHitCollector {
    /// The best hit seen so far, if any.
    pub hit: Option<Hit>,
}

impl Collector for ClosestHitCollector {
    fn add_hit(&mut self, hit: Hit) {
        let better = match &self.hit {
            None => true,
            Some(existing) => hit.fraction < existing.fraction,
        };
        if better {
            self.hit = Some(hit);
        }
    }

    fn early_out_fraction(&self) -> f64 {
        self.hit.map(|h| h.fraction).unwrap_or(f64::INFINITY)
    }

    fn reset(&mut self) {
        self.hit = None;
    }
}

/// Stops at the first hit reported; further hits are ignored.
#[derive(Debug, Default, Clone)]
pub struct AnyHitCollector {
    /// The first hit reported, if any.
    pub hit: Option<Hit>,
}

impl Collector for AnyHitCollector {
    fn add_hit(&mut self, hit: Hit) {
        if self.hit.is_none() {
            self.hit = Some(hit);
        }
    }

    fn should_early_out(&self) -> bool {
        self.hit.is_some()
    }

    fn reset(&mut self) {
        self.hit = None;
    }
}

/// Appends every hit reported, in report order.
#[derive(Debug, Default, Clone)]
pub struct AllHitsCollector {
    /// Every hit reported so far.
    pub hits: Vec<Hit>,
}

impl Collector for AllHitsCollector {
    fn add_hit(&mut self, hit: Hit) {
        self.hits.push(hit);
    }

    fn reset(&mut self) {
        self.hits.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_hit(fraction: f64) -> Hit {
        Hit {
            point_a: Vector3::zeros(),
            point_b: Vector3::zeros(),
            normal: Vector3::y(),
            depth: 0.0,
            fraction,
            sub_shape_a: SubShapeId::EMPTY,
            sub_shape_b: SubShapeId::EMPTY,
            body: None,
        }
    }

    #[test]
    fn closest_keeps_smallest_fraction() {
        let mut c = ClosestHitCollector::default();
        c.add_hit(dummy_hit(0.8));
        c.add_hit(dummy_hit(0.2));
        c.add_hit(dummy_hit(0.5));
        assert_eq!(c.hit.unwrap().fraction, 0.2);
    }

    #[test]
    fn any_stops_after_first_hit() {
        let mut c = AnyHitCollector::default();
        assert!(!c.should_early_out());
        c.add_hit(dummy_hit(0.9));
        assert!(c.should_early_out());
        c.add_hit(dummy_hit(0.1));
        assert_eq!(c.hit.unwrap().fraction, 0.9);
    }

    #[test]
    fn all_collects_every_hit() {
        let mut c = AllHitsCollector::default();
        c.add_hit(dummy_hit(0.1));
        c.add_hit(dummy_hit(0.2));
        assert_eq!(c.hits.len(), 2);
    }
}
