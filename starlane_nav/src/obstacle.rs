// Dynamic obstacle bookkeeping.
//
// Each live dynamic obstacle (a structure placed after the initial scan) has
// one `ObstacleRecord`, keyed by the caller's opaque `ObstacleKey`. The
// record is the audit trail for the obstacle's effect on the graph:
// - `approach`: ids of nodes created around the obstacle when it appeared.
// - `suppressed`: ids of pre-existing nodes inside its footprint that it
//   marked unwalkable.
// The two sets are disjoint. Across all live records the suppressed sets
// are pairwise disjoint too: a node already unwalkable when an obstacle
// arrives is not claimed by it.
//
// Overlapping obstacles hand nodes over rather than double-count them. On
// removal, a suppressed node still inside another live footprint moves to
// that record instead of becoming walkable, and a retired approach node is
// dropped from any other record that had suppressed it.
//
// See also: `graph.rs` for the insert/remove work items that drive these
// records, `waypoint.rs` for approach point generation.
//
// **Critical constraint: determinism.** Records are held in a `BTreeMap` and
// node sets in `BTreeSet`s so iteration follows key and id order.

use crate::types::{FixedCoord, NodeId, ObstacleKey, RegionId, Vec3, fixed_length};
use crate::waypoint::Footprint;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Geometry of a dynamic obstacle as supplied by the caller.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObstacleDescriptor {
    pub position: Vec3,
    /// Inner footprint radius; nodes within it are suppressed.
    pub radius: f32,
}

impl ObstacleDescriptor {
    pub fn new(position: Vec3, radius: f32) -> Self {
        Self { position, radius }
    }

    pub fn footprint(&self) -> Footprint {
        Footprint {
            center: self.position,
            radius: self.radius,
        }
    }

    /// Inclusive containment used for suppression, measured in fixed-point
    /// space so insert and remove agree on the boundary.
    pub fn covers(&self, p: FixedCoord) -> bool {
        p.fixed_distance(self.position.to_fixed()) <= fixed_length(self.radius)
    }
}

/// The effect one live obstacle has had on the graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObstacleRecord {
    pub key: ObstacleKey,
    pub descriptor: ObstacleDescriptor,
    pub region: RegionId,
    pub approach: BTreeSet<NodeId>,
    pub suppressed: BTreeSet<NodeId>,
}

impl ObstacleRecord {
    pub fn new(key: ObstacleKey, descriptor: ObstacleDescriptor, region: RegionId) -> Self {
        Self {
            key,
            descriptor,
            region,
            approach: BTreeSet::new(),
            suppressed: BTreeSet::new(),
        }
    }
}

/// All live obstacle records.
#[derive(Clone, Debug, Default)]
pub struct ObstacleRegistry {
    records: BTreeMap<ObstacleKey, ObstacleRecord>,
}

impl ObstacleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: ObstacleKey) -> bool {
        self.records.contains_key(&key)
    }

    pub fn get(&self, key: ObstacleKey) -> Option<&ObstacleRecord> {
        self.records.get(&key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ObstacleRecord> {
        self.records.values()
    }

    pub(crate) fn get_mut(&mut self, key: ObstacleKey) -> Option<&mut ObstacleRecord> {
        self.records.get_mut(&key)
    }

    /// Register a new record.
    ///
    /// Panics if the key is already live: inserting the same obstacle twice
    /// is a caller bookkeeping bug.
    pub fn insert(&mut self, record: ObstacleRecord) {
        assert!(
            !self.records.contains_key(&record.key),
            "obstacle {} inserted while already live",
            record.key
        );
        debug_assert!(record.approach.is_disjoint(&record.suppressed));
        self.records.insert(record.key, record);
    }

    /// Remove and return a record.
    ///
    /// Panics if the key is not live: removing an unknown obstacle is a
    /// caller bookkeeping bug.
    pub fn remove(&mut self, key: ObstacleKey) -> ObstacleRecord {
        match self.records.remove(&key) {
            Some(record) => record,
            None => panic!("obstacle {key} removed but not live"),
        }
    }

    /// The first live obstacle (in key order) whose footprint covers `node`
    /// at `p`. Records that own `node` as an approach node are skipped: an
    /// obstacle never suppresses its own approach nodes.
    pub fn covering(&self, node: NodeId, p: FixedCoord) -> Option<ObstacleKey> {
        self.records
            .values()
            .find(|r| !r.approach.contains(&node) && r.descriptor.covers(p))
            .map(|r| r.key)
    }

    /// Hand a suppressed node to another live record.
    pub fn adopt_suppressed(&mut self, key: ObstacleKey, node: NodeId) {
        if let Some(record) = self.records.get_mut(&key) {
            debug_assert!(!record.approach.contains(&node));
            record.suppressed.insert(node);
        }
    }

    /// Drop `node` from every record's suppressed set.
    pub fn forget_suppressed(&mut self, node: NodeId) {
        for record in self.records.values_mut() {
            record.suppressed.remove(&node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: u64, x: f32, r: f32) -> ObstacleRecord {
        ObstacleRecord::new(
            ObstacleKey(key),
            ObstacleDescriptor::new(Vec3::new(x, 0.0, 0.0), r),
            RegionId(0),
        )
    }

    #[test]
    fn insert_and_remove_roundtrip() {
        let mut reg = ObstacleRegistry::new();
        let mut rec = record(1, 0.0, 10.0);
        rec.suppressed.insert(NodeId(4));
        reg.insert(rec.clone());
        assert!(reg.contains(ObstacleKey(1)));
        assert_eq!(
            reg.get(ObstacleKey(1)).unwrap().suppressed,
            BTreeSet::from([NodeId(4)])
        );
        let back = reg.remove(ObstacleKey(1));
        assert_eq!(back, rec);
        assert!(reg.is_empty());
    }

    #[test]
    #[should_panic(expected = "inserted while already live")]
    fn double_insert_panics() {
        let mut reg = ObstacleRegistry::new();
        reg.insert(record(1, 0.0, 10.0));
        reg.insert(record(1, 5.0, 10.0));
    }

    #[test]
    #[should_panic(expected = "removed but not live")]
    fn unknown_remove_panics() {
        let mut reg = ObstacleRegistry::new();
        reg.remove(ObstacleKey(9));
    }

    fn at(x: f32) -> FixedCoord {
        Vec3::new(x, 0.0, 0.0).to_fixed()
    }

    #[test]
    fn covering_finds_first_in_key_order() {
        let mut reg = ObstacleRegistry::new();
        reg.insert(record(7, 0.0, 10.0));
        reg.insert(record(3, 5.0, 10.0));
        let n = NodeId(0);
        assert_eq!(reg.covering(n, at(4.0)), Some(ObstacleKey(3)));
        assert_eq!(reg.covering(n, at(-9.0)), Some(ObstacleKey(7)));
        assert_eq!(reg.covering(n, at(50.0)), None);
        // Footprint boundary is inclusive.
        assert_eq!(reg.covering(n, at(15.0)), Some(ObstacleKey(3)));
    }

    #[test]
    fn covering_skips_own_approach_nodes() {
        let mut reg = ObstacleRegistry::new();
        let mut rec = record(1, 0.0, 10.0);
        rec.approach.insert(NodeId(8));
        reg.insert(rec);
        assert_eq!(reg.covering(NodeId(8), at(1.0)), None);
        assert_eq!(reg.covering(NodeId(9), at(1.0)), Some(ObstacleKey(1)));
    }

    #[test]
    fn adopt_and_forget_move_suppressed_nodes() {
        let mut reg = ObstacleRegistry::new();
        reg.insert(record(1, 0.0, 10.0));
        let mut other = record(2, 0.0, 10.0);
        other.approach.insert(NodeId(8));
        reg.insert(other);

        reg.adopt_suppressed(ObstacleKey(1), NodeId(5));
        reg.adopt_suppressed(ObstacleKey(1), NodeId(8));
        assert_eq!(reg.get(ObstacleKey(1)).unwrap().suppressed.len(), 2);

        reg.forget_suppressed(NodeId(5));
        reg.forget_suppressed(NodeId(8));
        assert!(reg.iter().all(|r| r.suppressed.is_empty()));
        assert_eq!(
            reg.get(ObstacleKey(2)).unwrap().approach,
            BTreeSet::from([NodeId(8)])
        );
    }
}
