// Bucketed spatial index over node positions.
//
// Nodes are bucketed by `floor(position / cell_size)` per axis, computed in
// fixed-point space. The cell size equals the graph's maximum connection
// distance, so every valid neighbour of a node lies in the 3×3×3 block of
// buckets around it (Chebyshev ring 1).
//
// Nearest-node search starts at the query's own bucket and expands ring by
// ring. After ring `r` is scanned, anything in ring `r + 1` or beyond is at
// least `r × cell_size` away, so the search stops once the best match is
// within that bound, once the requested radius is covered, or once the
// ring bound is hit. Hitting the ring bound without a match is reported as
// `NearestResult::RingLimit`, never a panic.
//
// Buckets store `(NodeId, FixedCoord)` pairs so searches never go back to
// the node table for positions. The index never removes entries: unwalkable
// nodes stay indexed and are filtered by the caller's predicate, which keeps
// the indexed count equal to the node count.
//
// See also: `connect.rs` (candidate gathering), `graph.rs` (nearest-node
// queries and the count invariant), `store.rs` for the node arena.
//
// **Critical constraint: determinism.** The bucket map is never iterated to
// produce results. Rings are enumerated in a fixed order and ties on distance
// are broken by lower node id.

use crate::types::{FixedCoord, NodeId, PRECISION_F64, fixed_length};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// Integer bucket coordinate.
pub type CellKey = [i32; 3];

/// Entries of one bucket, in insertion order.
pub type Bucket = SmallVec<[(NodeId, FixedCoord); 8]>;

/// A successful nearest-node match.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NearestHit {
    pub node: NodeId,
    /// Distance from the query point in world units.
    pub distance: f32,
}

/// Outcome of a bounded nearest-node search.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NearestResult {
    Found(NearestHit),
    /// The whole search radius was covered without an acceptable node.
    OutOfRange,
    /// The ring bound was reached before the search radius was covered and
    /// nothing acceptable had been seen.
    RingLimit { rings: u32 },
}

#[derive(Clone, Debug)]
pub struct SpatialIndex {
    /// Cell edge in fixed-point units.
    cell: i64,
    buckets: FxHashMap<CellKey, Bucket>,
    len: usize,
}

impl SpatialIndex {
    /// Create an empty index with the given cell edge in world units.
    pub fn new(cell_size: f32) -> Self {
        let cell = (fixed_length(cell_size).round() as i64).max(1);
        Self {
            cell,
            buckets: FxHashMap::default(),
            len: 0,
        }
    }

    /// Total number of indexed entries.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn key_for(&self, pos: FixedCoord) -> CellKey {
        [
            (pos.x as i64).div_euclid(self.cell) as i32,
            (pos.y as i64).div_euclid(self.cell) as i32,
            (pos.z as i64).div_euclid(self.cell) as i32,
        ]
    }

    pub fn bucket(&self, key: CellKey) -> &[(NodeId, FixedCoord)] {
        self.buckets.get(&key).map(|b| b.as_slice()).unwrap_or(&[])
    }

    /// Append a node to the bucket for its position.
    pub fn insert(&mut self, id: NodeId, pos: FixedCoord) {
        let key = self.key_for(pos);
        self.buckets.entry(key).or_default().push((id, pos));
        self.len += 1;
    }

    /// Clear and reinsert every node. Used after bulk structural changes
    /// such as loading a snapshot.
    pub fn rebuild(&mut self, nodes: impl IntoIterator<Item = (NodeId, FixedCoord)>) {
        self.buckets.clear();
        self.len = 0;
        for (id, pos) in nodes {
            self.insert(id, pos);
        }
    }

    /// Number of rings needed to cover `radius` world units from any point
    /// inside a bucket.
    pub fn rings_for(&self, radius: f32) -> u32 {
        (fixed_length(radius) / self.cell as f64).ceil().max(0.0) as u32
    }

    /// Visit every bucket key at Chebyshev distance exactly `r` from
    /// `origin`, in a fixed order.
    pub fn for_each_ring_key(origin: CellKey, r: i32, mut f: impl FnMut(CellKey)) {
        if r == 0 {
            f(origin);
            return;
        }
        for dx in -r..=r {
            for dy in -r..=r {
                let on_shell = dx.abs() == r || dy.abs() == r;
                let key = |dz: i32| [origin[0] + dx, origin[1] + dy, origin[2] + dz];
                if on_shell {
                    for dz in -r..=r {
                        f(key(dz));
                    }
                } else {
                    f(key(-r));
                    f(key(r));
                }
            }
        }
    }

    /// Visit every entry in rings `0..=rings` around `pos`.
    pub fn for_each_near(
        &self,
        pos: FixedCoord,
        rings: u32,
        mut f: impl FnMut(NodeId, FixedCoord),
    ) {
        let origin = self.key_for(pos);
        for r in 0..=rings as i32 {
            Self::for_each_ring_key(origin, r, |key| {
                for &(id, p) in self.bucket(key) {
                    f(id, p);
                }
            });
        }
    }

    /// Closest entry accepted by `accept` within `max_radius` world units,
    /// expanding at most `max_rings` rings beyond the origin bucket.
    pub fn nearest(
        &self,
        pos: FixedCoord,
        max_radius: f32,
        max_rings: u32,
        accept: impl Fn(NodeId) -> bool,
    ) -> NearestResult {
        if self.is_empty() {
            return NearestResult::OutOfRange;
        }
        let origin = self.key_for(pos);
        let radius_sq = fixed_length(max_radius).powi(2);
        let needed = self.rings_for(max_radius);

        let mut best: Option<(i64, NodeId)> = None;
        for r in 0..=max_rings {
            Self::for_each_ring_key(origin, r as i32, |key| {
                for &(id, p) in self.bucket(key) {
                    let d = pos.distance_squared(p);
                    if d as f64 > radius_sq || !accept(id) {
                        continue;
                    }
                    let better = match best {
                        None => true,
                        Some((bd, bid)) => d < bd || (d == bd && id < bid),
                    };
                    if better {
                        best = Some((d, id));
                    }
                }
            });

            // Everything beyond ring r is at least r cells away.
            let bound = r as i64 * self.cell;
            if best.is_some_and(|(d, _)| d <= bound * bound) || r >= needed {
                break;
            }
            if r == max_rings && best.is_none() {
                return NearestResult::RingLimit { rings: max_rings };
            }
        }

        match best {
            Some((d, node)) => NearestResult::Found(NearestHit {
                node,
                distance: ((d as f64).sqrt() / PRECISION_F64) as f32,
            }),
            None => NearestResult::OutOfRange,
        }
    }
}
