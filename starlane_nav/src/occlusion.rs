// Line-of-sight checks for candidate connections.
//
// The connectivity builder asks a `LineOfSight` whether the straight segment
// between two node positions is clear. The engine ships `OcclusionSet`, a
// list of analytic occluders:
// - `Occluder::Sphere` blocks any segment passing strictly through it, in
//   either direction.
// - `Occluder::Plane` is one-sided: it blocks a segment that starts on the
//   front (normal) side and ends behind it, but not the reverse. The builder
//   tests both directions, so a one-sided occluder still removes the pair
//   entirely rather than leaving a one-directional connection.
//
// When raycasting is enabled the graph adds the footprint of every solid
// static obstacle and every live dynamic obstacle as a sphere occluder, on
// top of whatever occluders the owning application supplied at scan time.
//
// See also: `connect.rs` which calls `is_clear` for both directions,
// `graph.rs` which assembles the occluder set before each rebuild.
//
// **Critical constraint: determinism.** Tests are pure functions of the two
// endpoints and the occluder list.

use crate::types::Vec3;
use serde::{Deserialize, Serialize};

/// Anything that can answer "is the segment `from → to` unobstructed?".
pub trait LineOfSight {
    fn is_clear(&self, from: Vec3, to: Vec3) -> bool;
}

/// A single analytic occluder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Occluder {
    Sphere { center: Vec3, radius: f32 },
    /// Half-space boundary through `point`, facing `normal`.
    Plane { point: Vec3, normal: Vec3 },
}

impl Occluder {
    /// Returns `true` if this occluder blocks travel from `from` to `to`.
    pub fn blocks(&self, from: Vec3, to: Vec3) -> bool {
        match *self {
            Occluder::Sphere { center, radius } => {
                segment_distance_squared(from, to, center) < radius * radius
            }
            Occluder::Plane { point, normal } => {
                let front = (from - point).dot(normal);
                let back = (to - point).dot(normal);
                front > 0.0 && back < 0.0
            }
        }
    }
}

/// Squared distance from `p` to the segment `a → b`.
fn segment_distance_squared(a: Vec3, b: Vec3, p: Vec3) -> f32 {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq == 0.0 {
        return (p - a).length_squared();
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    (a + ab * t - p).length_squared()
}

/// A list of occluders; clear when none of them blocks.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OcclusionSet {
    pub occluders: Vec<Occluder>,
}

impl OcclusionSet {
    pub fn new(occluders: Vec<Occluder>) -> Self {
        Self { occluders }
    }

    pub fn push(&mut self, occluder: Occluder) {
        self.occluders.push(occluder);
    }
}

impl LineOfSight for OcclusionSet {
    fn is_clear(&self, from: Vec3, to: Vec3) -> bool {
        !self.occluders.iter().any(|o| o.blocks(from, to))
    }
}
