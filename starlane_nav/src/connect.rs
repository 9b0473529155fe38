// Connectivity builder: computes each node's outgoing connections.
//
// For node A, candidates come from the spatial index rings implied by the
// maximum connection distance (ring 1 when the cell size equals that
// distance), or from every node in `ConnectMode::BruteForce`. A candidate B
// is connected when:
// - A ≠ B and both are walkable;
// - the Euclidean distance is ≤ the maximum connection distance;
// - no per-axis offset exceeds its configured limit (when limits are set);
// - with raycasting enabled, the line of sight is clear A→B *and* B→A.
//
// Every test is symmetric in A and B, so the adjacency is symmetric: B
// appears in A's list exactly when A appears in B's, with equal cost. The
// cost is the distance in fixed-point units, rounded.
//
// `rebuild_all()` is the full pass run after every structural change. It
// optionally fans out over rayon; results are collected in id order so the
// parallel and serial passes produce identical adjacency.
//
// See also: `spatial.rs` for ring enumeration, `occlusion.rs` for the
// line-of-sight seam, `graph.rs` which schedules the rebuild as a work item.
//
// **Critical constraint: determinism.** Each list is sorted by target id.

use crate::config::ConnectMode;
use crate::occlusion::LineOfSight;
use crate::spatial::SpatialIndex;
use crate::store::{Connection, ConnectionList, GraphStore, NavNode};
use crate::types::{NodeId, fixed_length};
use rayon::prelude::*;
use smallvec::SmallVec;

/// Validation parameters for one rebuild.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConnectParams {
    pub max_distance: f32,
    pub axis_limits: Option<[f32; 3]>,
    pub raycast: bool,
}

pub struct ConnectivityBuilder<'a, L: LineOfSight> {
    store: &'a GraphStore,
    index: &'a SpatialIndex,
    sight: &'a L,
    params: ConnectParams,
    max_distance_sq: f64,
    rings: u32,
}

impl<'a, L: LineOfSight + Sync> ConnectivityBuilder<'a, L> {
    pub fn new(
        store: &'a GraphStore,
        index: &'a SpatialIndex,
        sight: &'a L,
        params: ConnectParams,
    ) -> Self {
        Self {
            store,
            index,
            sight,
            params,
            max_distance_sq: fixed_length(params.max_distance).powi(2),
            rings: index.rings_for(params.max_distance).max(1),
        }
    }

    /// The connection from `a` to `b`, if the pair is valid.
    pub fn validate(&self, a: &NavNode, b: &NavNode) -> Option<Connection> {
        if a.id == b.id || !a.walkable || !b.walkable {
            return None;
        }
        let d_sq = a.position.distance_squared(b.position);
        if d_sq as f64 > self.max_distance_sq {
            return None;
        }
        if let Some(limits) = self.params.axis_limits {
            let offsets = a.position.axis_offsets(b.position);
            let over = offsets
                .iter()
                .zip(limits)
                .any(|(&off, limit)| limit > 0.0 && off > limit);
            if over {
                return None;
            }
        }
        if self.params.raycast {
            let (pa, pb) = (a.position.to_vec3(), b.position.to_vec3());
            if !self.sight.is_clear(pa, pb) || !self.sight.is_clear(pb, pa) {
                return None;
            }
        }
        Some(Connection {
            target: b.id,
            cost: (d_sq as f64).sqrt().round() as u32,
        })
    }

    /// Outgoing connections of `id`, using the spatial index for candidates.
    pub fn connect(&self, id: NodeId) -> ConnectionList {
        let Some(a) = self.store.node(id) else {
            return SmallVec::new();
        };
        if !a.walkable {
            return SmallVec::new();
        }
        let mut out = ConnectionList::new();
        self.index.for_each_near(a.position, self.rings, |cand, _| {
            if let Some(c) = self.store.node(cand).and_then(|b| self.validate(a, b)) {
                out.push(c);
            }
        });
        out.sort_unstable_by_key(|c| c.target);
        out.dedup_by_key(|c| c.target);
        out
    }

    /// Outgoing connections of `id`, testing every node in the store.
    pub fn connect_brute_force(&self, id: NodeId) -> ConnectionList {
        let Some(a) = self.store.node(id) else {
            return SmallVec::new();
        };
        if !a.walkable {
            return SmallVec::new();
        }
        // Store order is id order, so the result is already sorted.
        self.store.iter().filter_map(|b| self.validate(a, b)).collect()
    }

    /// Connection lists for every node, in id order.
    pub fn rebuild_all(&self, mode: ConnectMode, parallel: bool) -> Vec<ConnectionList> {
        let one = |n: usize| {
            let id = NodeId(n as u32);
            match mode {
                ConnectMode::Indexed => self.connect(id),
                ConnectMode::BruteForce => self.connect_brute_force(id),
            }
        };
        if parallel {
            (0..self.store.len()).into_par_iter().map(one).collect()
        } else {
            (0..self.store.len()).map(one).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::occlusion::{Occluder, OcclusionSet};
    use crate::types::{FixedCoord, NodeOrigin, NodeTag, Vec3};

    fn build(points: &[Vec3], cell: f32) -> (GraphStore, SpatialIndex) {
        let mut store = GraphStore::new();
        let mut index = SpatialIndex::new(cell);
        for &p in points {
            let id = store.add_node(p.to_fixed(), NodeTag::OpenSpace, NodeOrigin::Region);
            index.insert(id, p.to_fixed());
        }
        (store, index)
    }

    fn params(max_distance: f32) -> ConnectParams {
        ConnectParams {
            max_distance,
            axis_limits: None,
            raycast: true,
        }
    }

    fn targets(list: &ConnectionList) -> Vec<u32> {
        list.iter().map(|c| c.target.0).collect()
    }

    #[test]
    fn connects_within_distance_only() {
        let (store, index) = build(
            &[
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(10.0, 0.0, 0.0),
                Vec3::new(25.0, 0.0, 0.0),
            ],
            11.0,
        );
        let sight = OcclusionSet::default();
        let b = ConnectivityBuilder::new(&store, &index, &sight, params(11.0));
        assert_eq!(targets(&b.connect(NodeId(0))), vec![1]);
        assert_eq!(targets(&b.connect(NodeId(1))), vec![0]);
        assert!(b.connect(NodeId(2)).is_empty());
        assert_eq!(b.connect(NodeId(0))[0].cost, 10_000);
    }

    #[test]
    fn exact_threshold_is_inclusive() {
        let (store, index) = build(&[Vec3::ZERO, Vec3::new(0.0, 0.0, 11.0)], 11.0);
        let sight = OcclusionSet::default();
        let b = ConnectivityBuilder::new(&store, &index, &sight, params(11.0));
        assert_eq!(targets(&b.connect(NodeId(0))), vec![1]);
    }

    #[test]
    fn unwalkable_nodes_have_no_connections() {
        let (mut store, index) = build(&[Vec3::ZERO, Vec3::new(5.0, 0.0, 0.0)], 10.0);
        store.set_walkable(NodeId(1), false);
        let sight = OcclusionSet::default();
        let b = ConnectivityBuilder::new(&store, &index, &sight, params(10.0));
        assert!(b.connect(NodeId(0)).is_empty());
        assert!(b.connect(NodeId(1)).is_empty());
    }

    #[test]
    fn one_sided_occluder_removes_both_directions() {
        let (store, index) = build(&[Vec3::new(-3.0, 0.0, 0.0), Vec3::new(3.0, 0.0, 0.0)], 10.0);
        let sight = OcclusionSet::new(vec![Occluder::Plane {
            point: Vec3::ZERO,
            normal: Vec3::new(1.0, 0.0, 0.0),
        }]);
        let b = ConnectivityBuilder::new(&store, &index, &sight, params(10.0));
        assert!(b.connect(NodeId(0)).is_empty());
        assert!(b.connect(NodeId(1)).is_empty());

        // With raycasting off the occluder is ignored.
        let open = ConnectParams {
            raycast: false,
            ..params(10.0)
        };
        let b = ConnectivityBuilder::new(&store, &index, &sight, open);
        assert_eq!(targets(&b.connect(NodeId(0))), vec![1]);
    }

    #[test]
    fn axis_limits_reject_tall_offsets() {
        let (store, index) = build(
            &[Vec3::ZERO, Vec3::new(0.0, 8.0, 0.0), Vec3::new(8.0, 1.0, 0.0)],
            10.0,
        );
        let sight = OcclusionSet::default();
        let limited = ConnectParams {
            axis_limits: Some([0.0, 2.0, 0.0]),
            ..params(10.0)
        };
        let b = ConnectivityBuilder::new(&store, &index, &sight, limited);
        assert_eq!(targets(&b.connect(NodeId(0))), vec![2]);
    }

    #[test]
    fn indexed_and_brute_force_agree() {
        let mut points = Vec::new();
        for x in 0..6 {
            for y in 0..4 {
                for z in 0..3 {
                    // Jittered lattice so distances straddle the threshold.
                    let j = ((x * 7 + y * 3 + z * 5) % 4) as f32;
                    points.push(Vec3::new(x as f32 * 9.0 + j, y as f32 * 11.0, z as f32 * 10.0 - j));
                }
            }
        }
        let (store, index) = build(&points, 12.0);
        let sight = OcclusionSet::new(vec![Occluder::Sphere {
            center: Vec3::new(20.0, 15.0, 10.0),
            radius: 6.0,
        }]);
        let b = ConnectivityBuilder::new(&store, &index, &sight, params(12.0));
        let indexed = b.rebuild_all(ConnectMode::Indexed, false);
        let brute = b.rebuild_all(ConnectMode::BruteForce, false);
        let parallel = b.rebuild_all(ConnectMode::Indexed, true);
        assert_eq!(indexed, brute);
        assert_eq!(indexed, parallel);
        assert!(indexed.iter().any(|l| !l.is_empty()));
    }

    #[test]
    fn adjacency_is_symmetric_with_equal_costs() {
        let points: Vec<Vec3> = (0..40)
            .map(|n| {
                let t = n as f32 * 0.7;
                Vec3::new(t.cos() * 30.0, n as f32 * 1.5, t.sin() * 30.0)
            })
            .collect();
        let (store, index) = build(&points, 15.0);
        let sight = OcclusionSet::default();
        let b = ConnectivityBuilder::new(&store, &index, &sight, params(15.0));
        let lists = b.rebuild_all(ConnectMode::Indexed, false);
        for (n, list) in lists.iter().enumerate() {
            for c in list {
                let back = &lists[c.target.index()];
                let rev = back.iter().find(|r| r.target == NodeId(n as u32));
                assert_eq!(rev.map(|r| r.cost), Some(c.cost));
                let a = store.node(NodeId(n as u32)).unwrap().position;
                let d = a.distance(store.node(c.target).unwrap().position);
                assert!(d <= 15.0);
            }
        }
    }

    #[test]
    fn cost_is_rounded_fixed_distance() {
        let mut store = GraphStore::new();
        let mut index = SpatialIndex::new(10.0);
        for p in [FixedCoord::new(0, 0, 0), FixedCoord::new(1000, 1000, 1000)] {
            let id = store.add_node(p, NodeTag::OpenSpace, NodeOrigin::Region);
            index.insert(id, p);
        }
        let sight = OcclusionSet::default();
        let b = ConnectivityBuilder::new(&store, &index, &sight, params(10.0));
        // sqrt(3) * 1000 = 1732.05
        assert_eq!(b.connect(NodeId(0))[0].cost, 1732);
    }
}
