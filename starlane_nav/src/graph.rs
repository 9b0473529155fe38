// The navigation graph facade.
//
// `NavGraph` owns every piece of engine state: the node arena (`store.rs`),
// the spatial index (`spatial.rs`), the live obstacle records
// (`obstacle.rs`), the mutation queue (`queue.rs`), the scan geometry it was
// built from, and the degraded-condition counters (`error.rs`). It is the
// only thing that mutates any of them.
//
// ## Lifecycle
//
// The owning application drives the graph from its own scheduler:
//
//   let mut graph = NavGraph::scan(config, input)?;        // build + drain
//   let t = graph.submit_insert_obstacle(key, desc, region)?;
//   graph.process_next();                                  // or drain()
//   let view = graph.view()?;                              // queries
//
// Mutations are work items. `process_next()` applies exactly one item; a
// structural item (scan, insert, remove) queues a full connectivity rebuild
// at the front of the queue, so the rebuild always runs next under the same
// ticket. Queries go through `view()`, which returns
// `NavError::MutationPending` until the queue drains, so no caller ever
// observes a graph whose adjacency lags its walkable flags.
//
// ## Obstacle lifecycle
//
// Insert: walkable nodes inside the footprint (inclusive) are marked
// unwalkable and recorded as suppressed; approach nodes (a cube around the
// footprint, tagged like the containing region) are appended and indexed.
// Remove: approach nodes are marked unwalkable (never deleted); each
// suppressed node is restored unless another live footprint still covers
// it, in which case it is handed to that record. Inserting then removing
// one obstacle with nothing in between restores the walkable set and the
// adjacency of every pre-existing node exactly.
//
// ## Persistence
//
// `snapshot()` captures nodes, adjacency, live obstacle records and scan
// geometry as a `GraphSnapshot` (serde). `from_snapshot()` validates it,
// replays the nodes and rebuilds the spatial index from scratch. The queue
// is not persisted; snapshots are only taken of drained graphs.
//
// See also: `queue.rs` for tickets and states, `connect.rs` for the rebuild
// pass, `waypoint.rs` for generation, `config.rs` for every tunable.
//
// **Critical constraint: determinism.** Node ids are assigned in generation
// order, obstacle records iterate in key order, and the rebuild pass returns
// lists in id order, so identical inputs give identical graphs.

use crate::config::NavConfig;
use crate::connect::{ConnectParams, ConnectivityBuilder};
use crate::error::{Degradation, Diagnostics, NavError};
use crate::obstacle::{ObstacleDescriptor, ObstacleRecord, ObstacleRegistry};
use crate::occlusion::{Occluder, OcclusionSet};
use crate::queue::{MutationQueue, ScanInput, Ticket, WorkItem, WorkKind, WorkState};
use crate::spatial::{NearestHit, NearestResult, SpatialIndex};
use crate::store::{Connection, ConnectionList, GraphStore, NavNode};
use crate::types::{
    FixedCoord, NodeId, NodeOrigin, NodeTag, ObstacleKey, RegionId, TagMask, Vec3, fixed_length,
};
use crate::waypoint::{Footprint, ObstacleKind, Region, StaticObstacle, WaypointGenerator};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Query types
// ---------------------------------------------------------------------------

/// Filter for nearest-node queries.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NearestConstraint {
    pub walkable_only: bool,
    pub tags: TagMask,
    /// Search radius in world units; `None` uses
    /// `NavConfig::max_nearest_distance`.
    pub max_distance: Option<f32>,
}

impl Default for NearestConstraint {
    fn default() -> Self {
        Self::walkable()
    }
}

impl NearestConstraint {
    /// Walkable nodes of any tag.
    pub fn walkable() -> Self {
        Self {
            walkable_only: true,
            tags: TagMask::ALL,
            max_distance: None,
        }
    }

    /// Any node, walkable or not.
    pub fn any() -> Self {
        Self {
            walkable_only: false,
            ..Self::walkable()
        }
    }

    pub fn with_tags(mut self, tags: TagMask) -> Self {
        self.tags = tags;
        self
    }

    /// Limit the search to `distance` world units. Negative distances clamp
    /// to zero; a non-finite distance leaves the config's
    /// `max_nearest_distance` in force.
    pub fn within(mut self, distance: f32) -> Self {
        self.max_distance = distance.is_finite().then(|| distance.max(0.0));
        self
    }

    pub fn accepts(&self, node: &NavNode) -> bool {
        (node.walkable || !self.walkable_only) && self.tags.contains(node.tag)
    }
}

/// Summary counts for a drained graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub walkable: usize,
    /// Node count per tag, indexed by `NodeTag::index()`.
    pub per_tag: [usize; 4],
    /// Directed connection count (each undirected pair counts twice).
    pub connections: usize,
    pub buckets: usize,
    pub live_obstacles: usize,
    pub separation: f32,
    pub max_connection_distance: f32,
    pub rebuilds: u64,
}

/// A broken graph invariant found by `audit()`.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum Violation {
    #[error("spatial index holds {indexed} nodes but the store holds {stored}")]
    IndexCount { indexed: usize, stored: usize },

    #[error("{node} is both an approach and a suppressed node of obstacle {key}")]
    ApproachSuppressed { key: ObstacleKey, node: NodeId },

    #[error("{node} is suppressed by more than one obstacle")]
    SuppressedTwice { node: NodeId },

    #[error("{node} is suppressed but walkable")]
    SuppressedWalkable { node: NodeId },

    #[error("{node} is unwalkable but no live obstacle suppresses it")]
    UnclaimedUnwalkable { node: NodeId },

    #[error("approach {node} of obstacle {key} is unwalkable but not suppressed")]
    ApproachUnwalkable { key: ObstacleKey, node: NodeId },

    #[error("obstacle {key} refers to missing {node}")]
    MissingObstacleNode { key: ObstacleKey, node: NodeId },

    #[error("{from} -> {to} targets a node that does not exist")]
    DanglingConnection { from: NodeId, to: NodeId },

    #[error("{from} -> {to} touches an unwalkable node")]
    UnwalkableConnection { from: NodeId, to: NodeId },

    #[error("{from} -> {to} spans {distance:.3}, above the maximum {max:.3}")]
    TooLong {
        from: NodeId,
        to: NodeId,
        distance: f32,
        max: f32,
    },

    #[error("{from} -> {to} has no reverse connection with equal cost")]
    Asymmetric { from: NodeId, to: NodeId },

    #[error("{node} has unsorted or duplicate connections")]
    UnorderedConnections { node: NodeId },
}

// ---------------------------------------------------------------------------
// Persistence types
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotNode {
    pub position: FixedCoord,
    pub walkable: bool,
    pub tag: NodeTag,
    #[serde(default)]
    pub origin: NodeOrigin,
}

/// Outgoing connections of one node as `(target, cost)` pairs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotAdjacency {
    pub node: NodeId,
    pub connections: Vec<(NodeId, u32)>,
}

/// Serialized form of a drained graph. Nodes are listed in id order; only
/// nodes with at least one connection appear in `adjacency`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub node_count: usize,
    pub nodes: Vec<SnapshotNode>,
    pub adjacency: Vec<SnapshotAdjacency>,
    #[serde(default)]
    pub obstacles: Vec<ObstacleRecord>,
    #[serde(default)]
    pub regions: Vec<Region>,
    #[serde(default)]
    pub statics: Vec<StaticObstacle>,
    #[serde(default)]
    pub occluders: Vec<Occluder>,
    /// Absent in minimal snapshots; loading then falls back to the config's
    /// `default_separation`.
    #[serde(default)]
    pub separation: Option<f32>,
    /// Absent in minimal snapshots; loading then uses the separation plus
    /// `connection_epsilon`.
    #[serde(default)]
    pub max_connection_distance: Option<f32>,
}

// ---------------------------------------------------------------------------
// NavGraph
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct NavGraph {
    config: NavConfig,
    store: GraphStore,
    index: SpatialIndex,
    obstacles: ObstacleRegistry,
    queue: MutationQueue,
    regions: Vec<Region>,
    statics: Vec<StaticObstacle>,
    /// Application-supplied occluders from the scan.
    occluders: Vec<Occluder>,
    separation: f32,
    max_connection_distance: f32,
    diagnostics: Diagnostics,
}

impl NavGraph {
    /// An empty graph with no work queued. Use `submit_scan()` to schedule
    /// the initial build on the caller's own scheduler.
    pub fn new(config: NavConfig) -> Result<Self, NavError> {
        config.validate()?;
        let separation = config.default_separation;
        let max_connection_distance = separation + config.connection_epsilon;
        Ok(Self {
            index: SpatialIndex::new(max_connection_distance),
            config,
            store: GraphStore::new(),
            obstacles: ObstacleRegistry::new(),
            queue: MutationQueue::new(),
            regions: Vec::new(),
            statics: Vec::new(),
            occluders: Vec::new(),
            separation,
            max_connection_distance,
            diagnostics: Diagnostics::default(),
        })
    }

    /// Build a graph from scan geometry and drain the queue.
    pub fn scan(config: NavConfig, input: ScanInput) -> Result<Self, NavError> {
        let mut graph = Self::new(config)?;
        graph.submit_scan(input);
        graph.drain();
        Ok(graph)
    }

    pub fn config(&self) -> &NavConfig {
        &self.config
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    // -- Submission ---------------------------------------------------------

    /// Queue the initial full build. Only valid once, on an empty graph.
    pub fn submit_scan(&mut self, input: ScanInput) -> Ticket {
        self.queue.submit(WorkKind::Scan(input))
    }

    /// Queue insertion of a dynamic obstacle inside `region`. The region
    /// must come from an already-applied scan.
    ///
    /// Inserting a key that is live when the item is applied panics.
    pub fn submit_insert_obstacle(
        &mut self,
        key: ObstacleKey,
        descriptor: ObstacleDescriptor,
        region: RegionId,
    ) -> Result<Ticket, NavError> {
        if !self.regions.iter().any(|r| r.id == region) {
            return Err(NavError::UnknownRegion(region));
        }
        Ok(self.queue.submit(WorkKind::InsertObstacle {
            key,
            descriptor,
            region,
        }))
    }

    /// Queue removal of a dynamic obstacle.
    ///
    /// Removing a key that is not live when the item is applied panics.
    pub fn submit_remove_obstacle(&mut self, key: ObstacleKey) -> Ticket {
        self.queue.submit(WorkKind::RemoveObstacle { key })
    }

    /// Queue a standalone full connectivity rebuild.
    pub fn submit_rebuild(&mut self) -> Ticket {
        self.queue.submit(WorkKind::Rebuild)
    }

    // -- Processing ---------------------------------------------------------

    /// Apply the next work item to completion. Returns its ticket, or `None`
    /// if the queue was already drained.
    pub fn process_next(&mut self) -> Option<Ticket> {
        let WorkItem { ticket, kind, .. } = self.queue.pop()?;
        match kind {
            WorkKind::Scan(input) => {
                self.queue.set_state(ticket, WorkState::Applying);
                self.apply_scan(input);
                self.queue_reconnect(ticket);
            }
            WorkKind::InsertObstacle {
                key,
                descriptor,
                region,
            } => {
                self.queue.set_state(ticket, WorkState::Applying);
                self.apply_insert(key, descriptor, region);
                self.queue_reconnect(ticket);
            }
            WorkKind::RemoveObstacle { key } => {
                self.queue.set_state(ticket, WorkState::Applying);
                self.apply_remove(key);
                self.queue_reconnect(ticket);
            }
            WorkKind::Rebuild => self.reconnect(ticket),
        }
        Some(ticket)
    }

    /// Apply every queued item. Returns how many items ran.
    pub fn drain(&mut self) -> usize {
        let mut processed = 0;
        while self.process_next().is_some() {
            processed += 1;
        }
        processed
    }

    pub fn is_drained(&self) -> bool {
        self.queue.is_empty()
    }

    /// Items still waiting, follow-up rebuilds included.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn status(&self, ticket: Ticket) -> Option<WorkState> {
        self.queue.state(ticket)
    }

    fn queue_reconnect(&mut self, ticket: Ticket) {
        self.queue.follow_up(ticket, WorkKind::Rebuild);
        self.queue.set_state(ticket, WorkState::Reconnecting);
    }

    fn apply_scan(&mut self, input: ScanInput) {
        assert!(
            self.store.is_empty(),
            "scan applied to a graph that already has {} nodes",
            self.store.len()
        );
        let generated = WaypointGenerator::new(&self.config, &self.diagnostics).generate(
            &input.regions,
            &input.obstacles,
            input.separation,
        );
        self.separation = generated.separation;
        self.max_connection_distance = generated.max_connection_distance;
        self.index = SpatialIndex::new(self.max_connection_distance);
        for (tag, waypoint) in generated.waypoints.iter() {
            let pos = waypoint.position.to_fixed();
            let id = self.store.add_node(pos, tag, waypoint.origin);
            self.index.insert(id, pos);
        }
        log::info!(
            "scanned {} regions and {} obstacles: {} nodes, separation {:.3}, max connection distance {:.3}",
            input.regions.len(),
            input.obstacles.len(),
            self.store.len(),
            self.separation,
            self.max_connection_distance,
        );
        self.regions = input.regions;
        self.statics = input.obstacles;
        self.occluders = input.occluders;
    }

    fn apply_insert(&mut self, key: ObstacleKey, descriptor: ObstacleDescriptor, region: RegionId) {
        self.obstacles
            .insert(ObstacleRecord::new(key, descriptor, region));

        let mut suppressed = BTreeSet::new();
        let store = &self.store;
        self.index.for_each_near(
            descriptor.position.to_fixed(),
            self.index.rings_for(descriptor.radius),
            |id, pos| {
                if store.is_walkable(id) && descriptor.covers(pos) {
                    suppressed.insert(id);
                }
            },
        );
        for &id in &suppressed {
            self.store.set_walkable(id, false);
        }

        let tag = self
            .regions
            .iter()
            .find(|r| r.id == region)
            .map_or(NodeTag::OpenSpace, |r| r.tag);
        let blocked: Vec<Footprint> = self
            .statics
            .iter()
            .map(StaticObstacle::footprint)
            .chain(
                self.obstacles
                    .iter()
                    .filter(|r| r.key != key)
                    .map(|r| r.descriptor.footprint()),
            )
            .collect();
        let waypoints = WaypointGenerator::new(&self.config, &self.diagnostics).approach_waypoints(
            descriptor.position,
            descriptor.radius,
            &blocked,
        );
        let mut approach = BTreeSet::new();
        for waypoint in waypoints {
            let pos = waypoint.position.to_fixed();
            let id = self.store.add_node(pos, tag, waypoint.origin);
            self.index.insert(id, pos);
            approach.insert(id);
        }

        log::info!(
            "obstacle {key} inserted at {} (radius {:.1}): {} nodes suppressed, {} approach nodes added",
            descriptor.position,
            descriptor.radius,
            suppressed.len(),
            approach.len(),
        );
        if let Some(record) = self.obstacles.get_mut(key) {
            record.suppressed = suppressed;
            record.approach = approach;
        }
    }

    fn apply_remove(&mut self, key: ObstacleKey) {
        let record = self.obstacles.remove(key);
        for &id in &record.approach {
            self.store.set_walkable(id, false);
            self.obstacles.forget_suppressed(id);
        }

        let (mut restored, mut transferred) = (0, 0);
        for &id in &record.suppressed {
            let Some(pos) = self.store.node(id).map(|n| n.position) else {
                continue;
            };
            match self.obstacles.covering(id, pos) {
                Some(other) => {
                    self.obstacles.adopt_suppressed(other, id);
                    transferred += 1;
                }
                None => {
                    self.store.set_walkable(id, true);
                    restored += 1;
                }
            }
        }
        log::info!(
            "obstacle {key} removed: {restored} nodes restored, {transferred} handed to overlapping obstacles, {} approach nodes retired",
            record.approach.len(),
        );
    }

    /// Occluders for the rebuild: the scan's own, every solid static body,
    /// and every live dynamic footprint.
    fn occlusion(&self) -> OcclusionSet {
        let mut set = OcclusionSet::new(self.occluders.clone());
        let statics = self
            .statics
            .iter()
            .filter(|o| o.kind == ObstacleKind::Solid)
            .map(StaticObstacle::footprint);
        let dynamics = self.obstacles.iter().map(|r| r.descriptor.footprint());
        for f in statics.chain(dynamics) {
            set.push(Occluder::Sphere {
                center: f.center,
                radius: f.radius,
            });
        }
        set
    }

    fn reconnect(&mut self, ticket: Ticket) {
        self.queue.set_state(ticket, WorkState::Reconnecting);
        let sight = self.occlusion();
        let params = ConnectParams {
            max_distance: self.max_connection_distance,
            axis_limits: self.config.axis_limits,
            raycast: self.config.raycast,
        };
        let lists = ConnectivityBuilder::new(&self.store, &self.index, &sight, params)
            .rebuild_all(self.config.connect_mode, self.config.parallel_rebuild);
        self.store.replace_adjacency(lists);

        assert_eq!(
            self.index.len(),
            self.store.len(),
            "spatial index holds {} nodes but the store holds {}",
            self.index.len(),
            self.store.len()
        );
        self.diagnostics.record_rebuild();
        self.queue.set_state(ticket, WorkState::Committed);
        log::debug!(
            "{ticket} committed: {} nodes, {} connections",
            self.store.len(),
            self.store.connection_count()
        );
    }

    // -- Queries ------------------------------------------------------------

    /// Read access to a drained graph.
    pub fn view(&self) -> Result<NavView<'_>, NavError> {
        if !self.queue.is_empty() {
            return Err(NavError::MutationPending {
                pending: self.queue.len(),
            });
        }
        Ok(NavView { graph: self })
    }

    pub fn nearest(
        &self,
        pos: Vec3,
        constraint: &NearestConstraint,
    ) -> Result<Option<NearestHit>, NavError> {
        Ok(self.view()?.nearest(pos, constraint))
    }

    pub fn neighbors_of(&self, id: NodeId) -> Result<&[Connection], NavError> {
        self.view()?.neighbors_of(id)
    }

    pub fn audit(&self) -> Result<Vec<Violation>, NavError> {
        Ok(self.view()?.audit())
    }

    // -- Persistence --------------------------------------------------------

    pub fn snapshot(&self) -> Result<GraphSnapshot, NavError> {
        Ok(self.view()?.snapshot())
    }

    pub fn to_json(&self) -> Result<String, NavError> {
        Ok(serde_json::to_string(&self.snapshot()?)?)
    }

    pub fn from_json(json: &str, config: NavConfig) -> Result<Self, NavError> {
        let snapshot: GraphSnapshot = serde_json::from_str(json)?;
        Self::from_snapshot(config, snapshot)
    }

    /// Rebuild a graph from a snapshot: validate, replay nodes in id order,
    /// then rebuild the spatial index from scratch.
    pub fn from_snapshot(config: NavConfig, snapshot: GraphSnapshot) -> Result<Self, NavError> {
        config.validate()?;
        let bad = |msg: String| Err(NavError::Snapshot(msg));

        if snapshot.node_count != snapshot.nodes.len() {
            return bad(format!(
                "node_count is {} but {} nodes are listed",
                snapshot.node_count,
                snapshot.nodes.len()
            ));
        }
        let separation = snapshot.separation.unwrap_or(config.default_separation);
        if !(separation.is_finite() && separation > 0.0) {
            return bad(format!("separation must be positive, got {separation}"));
        }
        let max_connection_distance = snapshot
            .max_connection_distance
            .unwrap_or(separation + config.connection_epsilon);
        if !(max_connection_distance.is_finite() && max_connection_distance > 0.0) {
            return bad(format!(
                "max_connection_distance must be positive, got {max_connection_distance}"
            ));
        }

        let mut store = GraphStore::new();
        for node in &snapshot.nodes {
            let id = store.add_node(node.position, node.tag, node.origin);
            if !node.walkable {
                store.set_walkable(id, false);
            }
        }

        for adj in &snapshot.adjacency {
            if !store.contains(adj.node) {
                return bad(format!("adjacency listed for missing {}", adj.node));
            }
            let mut list: ConnectionList = adj
                .connections
                .iter()
                .map(|&(target, cost)| Connection { target, cost })
                .collect();
            if let Some(c) = list.iter().find(|c| !store.contains(c.target)) {
                return bad(format!("{} connects to missing {}", adj.node, c.target));
            }
            list.sort_unstable_by_key(|c| c.target);
            if list.windows(2).any(|w| w[0].target == w[1].target) {
                return bad(format!("{} lists a target more than once", adj.node));
            }
            store.set_connections(adj.node, list);
        }

        let mut obstacles = ObstacleRegistry::new();
        for record in snapshot.obstacles {
            if obstacles.contains(record.key) {
                return bad(format!("obstacle {} listed more than once", record.key));
            }
            if let Some(&id) = record
                .approach
                .iter()
                .chain(&record.suppressed)
                .find(|&&id| !store.contains(id))
            {
                return bad(format!("obstacle {} refers to missing {id}", record.key));
            }
            obstacles.insert(record);
        }

        let mut index = SpatialIndex::new(max_connection_distance);
        index.rebuild(store.iter().map(|n| (n.id, n.position)));
        log::info!(
            "loaded snapshot: {} nodes, {} connections, {} live obstacles",
            store.len(),
            store.connection_count(),
            obstacles.len()
        );

        Ok(Self {
            config,
            store,
            index,
            obstacles,
            queue: MutationQueue::new(),
            regions: snapshot.regions,
            statics: snapshot.statics,
            occluders: snapshot.occluders,
            separation,
            max_connection_distance,
            diagnostics: Diagnostics::default(),
        })
    }
}

// ---------------------------------------------------------------------------
// NavView
// ---------------------------------------------------------------------------

/// Read-only access to a drained graph. Obtained from `NavGraph::view()`.
#[derive(Clone, Copy, Debug)]
pub struct NavView<'a> {
    graph: &'a NavGraph,
}

impl<'a> NavView<'a> {
    /// Closest node accepted by `constraint`. A search that hits the ring
    /// bound without a match is reported and yields `None`.
    pub fn nearest(&self, pos: Vec3, constraint: &NearestConstraint) -> Option<NearestHit> {
        let g = self.graph;
        let radius = constraint
            .max_distance
            .unwrap_or(g.config.max_nearest_distance);
        let result = g.index.nearest(pos.to_fixed(), radius, g.config.max_search_rings, |id| {
            g.store.node(id).is_some_and(|n| constraint.accepts(n))
        });
        match result {
            NearestResult::Found(hit) => Some(hit),
            NearestResult::OutOfRange => None,
            NearestResult::RingLimit { rings } => {
                log::warn!("nearest-node search from {pos} exhausted {rings} rings without a match");
                g.diagnostics.record(Degradation::SearchExhausted);
                None
            }
        }
    }

    pub fn nearest_node(&self, pos: Vec3, constraint: &NearestConstraint) -> Option<NodeId> {
        self.nearest(pos, constraint).map(|hit| hit.node)
    }

    /// Outgoing connections of `id`, sorted by target.
    pub fn neighbors_of(&self, id: NodeId) -> Result<&'a [Connection], NavError> {
        self.graph
            .store
            .node(id)
            .map(|n| n.connections.as_slice())
            .ok_or(NavError::UnknownNode(id))
    }

    pub fn node(&self, id: NodeId) -> Option<&'a NavNode> {
        self.graph.store.node(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &'a NavNode> + 'a {
        self.graph.store.iter()
    }

    pub fn node_count(&self) -> usize {
        self.graph.store.len()
    }

    pub fn obstacle(&self, key: ObstacleKey) -> Option<&'a ObstacleRecord> {
        self.graph.obstacles.get(key)
    }

    pub fn obstacles(&self) -> impl Iterator<Item = &'a ObstacleRecord> + 'a {
        self.graph.obstacles.iter()
    }

    pub fn regions(&self) -> &'a [Region] {
        &self.graph.regions
    }

    pub fn separation(&self) -> f32 {
        self.graph.separation
    }

    pub fn max_connection_distance(&self) -> f32 {
        self.graph.max_connection_distance
    }

    pub fn stats(&self) -> GraphStats {
        let g = self.graph;
        let mut per_tag = [0; 4];
        let mut walkable = 0;
        for node in g.store.iter() {
            per_tag[node.tag.index()] += 1;
            if node.walkable {
                walkable += 1;
            }
        }
        GraphStats {
            nodes: g.store.len(),
            walkable,
            per_tag,
            connections: g.store.connection_count(),
            buckets: g.index.bucket_count(),
            live_obstacles: g.obstacles.len(),
            separation: g.separation,
            max_connection_distance: g.max_connection_distance,
            rebuilds: g.diagnostics.rebuilds(),
        }
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        let g = self.graph;
        let nodes = g
            .store
            .iter()
            .map(|n| SnapshotNode {
                position: n.position,
                walkable: n.walkable,
                tag: n.tag,
                origin: n.origin,
            })
            .collect();
        let adjacency = g
            .store
            .iter()
            .filter(|n| !n.connections.is_empty())
            .map(|n| SnapshotAdjacency {
                node: n.id,
                connections: n.connections.iter().map(|c| (c.target, c.cost)).collect(),
            })
            .collect();
        GraphSnapshot {
            node_count: g.store.len(),
            nodes,
            adjacency,
            obstacles: g.obstacles.iter().cloned().collect(),
            regions: g.regions.clone(),
            statics: g.statics.clone(),
            occluders: g.occluders.clone(),
            separation: Some(g.separation),
            max_connection_distance: Some(g.max_connection_distance),
        }
    }

    /// Check every structural invariant. An empty result means the graph is
    /// consistent.
    pub fn audit(&self) -> Vec<Violation> {
        let g = self.graph;
        let mut out = Vec::new();

        if g.index.len() != g.store.len() {
            out.push(Violation::IndexCount {
                indexed: g.index.len(),
                stored: g.store.len(),
            });
        }

        let mut suppressed = BTreeSet::new();
        for record in g.obstacles.iter() {
            let key = record.key;
            for &node in record.approach.iter().chain(&record.suppressed) {
                if !g.store.contains(node) {
                    out.push(Violation::MissingObstacleNode { key, node });
                }
            }
            for &node in record.approach.intersection(&record.suppressed) {
                out.push(Violation::ApproachSuppressed { key, node });
            }
            for &node in &record.suppressed {
                if !suppressed.insert(node) {
                    out.push(Violation::SuppressedTwice { node });
                }
                if g.store.is_walkable(node) {
                    out.push(Violation::SuppressedWalkable { node });
                }
            }
        }
        for record in g.obstacles.iter() {
            for &node in &record.approach {
                if g.store.contains(node) && !g.store.is_walkable(node) && !suppressed.contains(&node) {
                    out.push(Violation::ApproachUnwalkable {
                        key: record.key,
                        node,
                    });
                }
            }
        }

        let max = g.max_connection_distance;
        let max_sq = fixed_length(max).powi(2);
        for node in g.store.iter() {
            if !node.walkable && node.origin != NodeOrigin::Approach && !suppressed.contains(&node.id) {
                out.push(Violation::UnclaimedUnwalkable { node: node.id });
            }
            if node.connections.windows(2).any(|w| w[0].target >= w[1].target) {
                out.push(Violation::UnorderedConnections { node: node.id });
            }
            for c in &node.connections {
                let (from, to) = (node.id, c.target);
                let Some(target) = g.store.node(to) else {
                    out.push(Violation::DanglingConnection { from, to });
                    continue;
                };
                if !node.walkable || !target.walkable {
                    out.push(Violation::UnwalkableConnection { from, to });
                }
                if node.position.distance_squared(target.position) as f64 > max_sq {
                    out.push(Violation::TooLong {
                        from,
                        to,
                        distance: node.position.distance(target.position),
                        max,
                    });
                }
                let mirrored = target
                    .connections
                    .binary_search_by_key(&from, |r| r.target)
                    .is_ok_and(|i| target.connections[i].cost == c.cost);
                if !mirrored {
                    out.push(Violation::Asymmetric { from, to });
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectMode;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// One region of edge 1200 at the origin: 43 region nodes, separation 275.
    fn region() -> Region {
        Region::new(RegionId(0), Vec3::ZERO, 1200.0)
    }

    fn scanned(config: NavConfig) -> NavGraph {
        init_logger();
        NavGraph::scan(config, ScanInput::new(vec![region()], Vec::new())).unwrap()
    }

    fn adjacency(graph: &NavGraph) -> Vec<Vec<Connection>> {
        graph.view().unwrap().nodes().map(|n| n.connections.to_vec()).collect()
    }

    fn walkable(graph: &NavGraph) -> Vec<bool> {
        graph.view().unwrap().nodes().map(|n| n.walkable).collect()
    }

    fn insert(graph: &mut NavGraph, key: u64, at: Vec3, radius: f32) -> Ticket {
        graph
            .submit_insert_obstacle(ObstacleKey(key), ObstacleDescriptor::new(at, radius), RegionId(0))
            .unwrap()
    }

    /// Two regions plus a solid and a navigable static obstacle.
    fn busy_input() -> ScanInput {
        ScanInput::new(
            vec![
                Region::new(RegionId(0), Vec3::ZERO, 1200.0),
                Region::new(RegionId(1), Vec3::new(1200.0, 0.0, 0.0), 1200.0).with_tag(NodeTag::Nebula),
            ],
            vec![
                StaticObstacle::new(Vec3::new(600.0, 300.0, 0.0), 100.0, ObstacleKind::Solid),
                StaticObstacle::new(Vec3::new(-300.0, -300.0, 300.0), 150.0, ObstacleKind::System),
            ],
        )
    }

    #[test]
    fn scan_builds_connected_region() {
        let graph = scanned(NavConfig::default());
        let view = graph.view().unwrap();
        let stats = view.stats();
        assert_eq!(stats.nodes, 43);
        assert_eq!(stats.walkable, 43);
        assert_eq!(stats.per_tag[NodeTag::OpenSpace.index()], 43);
        assert_eq!(stats.rebuilds, 1);
        assert_eq!(view.separation(), 275.0);
        assert_eq!(view.max_connection_distance(), 276.0);

        // The center reaches the first step in all 14 directions.
        let center = view.neighbors_of(NodeId(0)).unwrap();
        assert!(center.len() >= 14);
        assert!(center.iter().all(|c| c.cost <= 276_000));
        assert!(view.audit().is_empty());
    }

    #[test]
    fn submitted_scan_walks_through_states() {
        init_logger();
        let mut graph = NavGraph::new(NavConfig::default()).unwrap();
        let t = graph.submit_scan(ScanInput::new(vec![region()], Vec::new()));
        assert_eq!(graph.status(t), Some(WorkState::Queued));
        assert!(graph.view().is_err());

        assert_eq!(graph.process_next(), Some(t));
        assert_eq!(graph.status(t), Some(WorkState::Reconnecting));
        assert_eq!(graph.pending(), 1);

        assert_eq!(graph.process_next(), Some(t));
        assert_eq!(graph.status(t), Some(WorkState::Committed));
        assert!(graph.is_drained());
        assert_eq!(graph.process_next(), None);
        assert_eq!(graph.view().unwrap().node_count(), 43);
    }

    #[test]
    fn obstacle_insert_and_remove_scenario() {
        let mut graph = scanned(NavConfig::default());
        let before_walkable = walkable(&graph);
        let before_adjacency = adjacency(&graph);
        let inside: Vec<NodeId> = graph
            .view()
            .unwrap()
            .nodes()
            .filter(|n| n.position.to_vec3().length() <= 50.0)
            .map(|n| n.id)
            .collect();
        assert_eq!(inside, vec![NodeId(0)]);

        let t = insert(&mut graph, 1, Vec3::ZERO, 50.0);
        assert_eq!(graph.status(t), Some(WorkState::Queued));
        assert!(matches!(
            graph.view(),
            Err(NavError::MutationPending { pending: 1 })
        ));
        assert!(graph.nearest(Vec3::ZERO, &NearestConstraint::walkable()).is_err());
        assert_eq!(graph.drain(), 2);
        assert_eq!(graph.status(t), Some(WorkState::Committed));

        {
            let view = graph.view().unwrap();
            assert_eq!(view.node_count(), 43 + 8);
            assert!(!view.node(NodeId(0)).unwrap().walkable);

            let record = view.obstacle(ObstacleKey(1)).unwrap();
            assert_eq!(record.suppressed, BTreeSet::from([NodeId(0)]));
            let expected: BTreeSet<NodeId> = (43..51).map(NodeId).collect();
            assert_eq!(record.approach, expected);
            for &id in &record.approach {
                let node = view.node(id).unwrap();
                assert!(node.walkable);
                assert_eq!(node.origin, NodeOrigin::Approach);
                assert!((node.position.to_vec3().length() - 75.0).abs() < 0.01);
                assert!(!view.neighbors_of(id).unwrap().is_empty());
            }
            assert!(view.neighbors_of(NodeId(0)).unwrap().is_empty());
            assert!(view.audit().is_empty());
        }

        graph.submit_remove_obstacle(ObstacleKey(1));
        graph.drain();
        let after_walkable = walkable(&graph);
        let after_adjacency = adjacency(&graph);
        assert_eq!(after_walkable.len(), 51);
        assert_eq!(&after_walkable[..43], &before_walkable[..]);
        assert!(after_walkable[43..].iter().all(|w| !w));
        assert_eq!(&after_adjacency[..43], &before_adjacency[..]);
        assert!(after_adjacency[43..].iter().all(Vec::is_empty));
        assert!(graph.view().unwrap().obstacle(ObstacleKey(1)).is_none());
        assert!(graph.audit().unwrap().is_empty());
    }

    #[test]
    fn nearest_exhausting_rings_returns_none_and_warns() {
        init_logger();
        let config = NavConfig {
            max_search_rings: 3,
            ..NavConfig::default()
        };
        let far = Region::new(RegionId(0), Vec3::new(-2000.0, -2000.0, -2000.0), 100.0);
        let graph = NavGraph::scan(config, ScanInput::new(vec![far], Vec::new())).unwrap();
        let view = graph.view().unwrap();
        assert_eq!(view.node_count(), 1);

        let hit = view.nearest(Vec3::new(1000.0, 1000.0, 1000.0), &NearestConstraint::walkable());
        assert!(hit.is_none());
        assert_eq!(graph.diagnostics().count(Degradation::SearchExhausted), 1);

        // Close to the node the same search succeeds.
        let hit = view.nearest(
            Vec3::new(-1990.0, -2000.0, -2000.0),
            &NearestConstraint::walkable(),
        );
        assert_eq!(hit.map(|h| h.node), Some(NodeId(0)));
    }

    #[test]
    fn nearest_skips_unwalkable_when_alternative_exists() {
        let mut graph = scanned(NavConfig::default());
        insert(&mut graph, 1, Vec3::ZERO, 50.0);
        graph.drain();
        let view = graph.view().unwrap();

        let hit = view.nearest(Vec3::ZERO, &NearestConstraint::walkable()).unwrap();
        assert_eq!(view.node(hit.node).unwrap().origin, NodeOrigin::Approach);
        assert!((hit.distance - 75.0).abs() < 0.01);

        let any = view.nearest(Vec3::ZERO, &NearestConstraint::any()).unwrap();
        assert_eq!(any.node, NodeId(0));
        assert_eq!(any.distance, 0.0);
    }

    #[test]
    fn nearest_honours_tags_and_distance() {
        init_logger();
        let input = ScanInput::new(
            vec![
                region(),
                Region::new(RegionId(1), Vec3::new(1200.0, 0.0, 0.0), 1200.0).with_tag(NodeTag::Nebula),
            ],
            Vec::new(),
        );
        let graph = NavGraph::scan(NavConfig::default(), input).unwrap();
        let view = graph.view().unwrap();

        let nebula = NearestConstraint::walkable().with_tags(TagMask::only(NodeTag::Nebula));
        let hit = view.nearest(Vec3::ZERO, &nebula).unwrap();
        assert_eq!(view.node(hit.node).unwrap().tag, NodeTag::Nebula);
        assert!((hit.distance - 375.0).abs() < 0.01);

        assert!(view.nearest(Vec3::ZERO, &nebula.within(300.0)).is_none());
        let none = NearestConstraint::walkable()
            .with_tags(TagMask::NONE)
            .within(1000.0);
        assert!(view.nearest_node(Vec3::ZERO, &none).is_none());
        assert_eq!(graph.diagnostics().count(Degradation::SearchExhausted), 0);
    }

    #[test]
    fn nearest_distance_limit_is_sanitized() {
        assert_eq!(NearestConstraint::walkable().within(-50.0).max_distance, Some(0.0));
        assert_eq!(NearestConstraint::walkable().within(f32::NAN).max_distance, None);
        assert_eq!(NearestConstraint::walkable().within(f32::INFINITY).max_distance, None);

        let graph = scanned(NavConfig::default());
        let view = graph.view().unwrap();
        let off_center = Vec3::new(10.0, 0.0, 0.0);
        let negative = NearestConstraint::walkable().within(-50.0);
        assert!(view.nearest(off_center, &negative).is_none());
        let nan = NearestConstraint::walkable().within(f32::NAN);
        assert_eq!(view.nearest_node(off_center, &nan), Some(NodeId(0)));
    }

    #[test]
    fn busy_graph_is_symmetric_and_within_distance() {
        init_logger();
        let graph = NavGraph::scan(NavConfig::default(), busy_input()).unwrap();
        let view = graph.view().unwrap();
        let stats = view.stats();
        assert!(stats.per_tag[NodeTag::System.index()] >= 9);
        assert!(stats.per_tag[NodeTag::Nebula.index()] > 0);
        assert!(stats.connections > 0);

        let max = view.max_connection_distance();
        for node in view.nodes() {
            for c in view.neighbors_of(node.id).unwrap() {
                let other = view.node(c.target).unwrap();
                assert!(node.position.distance(other.position) <= max + 1e-3);
                let back = view.neighbors_of(c.target).unwrap();
                assert!(back.iter().any(|r| r.target == node.id && r.cost == c.cost));
            }
        }
        assert_eq!(view.audit(), Vec::new());
    }

    #[test]
    fn connect_modes_agree_on_full_graph() {
        init_logger();
        let build = |connect_mode, parallel_rebuild| {
            let config = NavConfig {
                connect_mode,
                parallel_rebuild,
                ..NavConfig::default()
            };
            adjacency(&NavGraph::scan(config, busy_input()).unwrap())
        };
        let indexed = build(ConnectMode::Indexed, false);
        assert_eq!(indexed, build(ConnectMode::Indexed, true));
        assert_eq!(indexed, build(ConnectMode::BruteForce, false));
    }

    #[test]
    fn overlapping_obstacles_hand_over_suppressed_nodes() {
        let mut graph = scanned(NavConfig::default());
        let before_walkable = walkable(&graph);
        let before_adjacency = adjacency(&graph);

        insert(&mut graph, 1, Vec3::ZERO, 50.0);
        insert(&mut graph, 2, Vec3::new(40.0, 0.0, 0.0), 100.0);
        graph.drain();
        {
            let view = graph.view().unwrap();
            let a = view.obstacle(ObstacleKey(1)).unwrap();
            let b = view.obstacle(ObstacleKey(2)).unwrap();
            // The center already belongs to the first obstacle.
            assert_eq!(a.suppressed, BTreeSet::from([NodeId(0)]));
            // The second swallows the four +x approach nodes of the first.
            assert_eq!(b.suppressed.len(), 4);
            assert!(b.suppressed.is_subset(&a.approach));
            assert_eq!(b.approach.len(), 8);
            assert!(view.audit().is_empty());
        }

        graph.submit_remove_obstacle(ObstacleKey(1));
        graph.drain();
        {
            let view = graph.view().unwrap();
            let b = view.obstacle(ObstacleKey(2)).unwrap();
            // Still covered by the second footprint, so not restored.
            assert_eq!(b.suppressed, BTreeSet::from([NodeId(0)]));
            assert!(!view.node(NodeId(0)).unwrap().walkable);
            assert!(view.audit().is_empty());
        }

        graph.submit_remove_obstacle(ObstacleKey(2));
        graph.drain();
        let after_walkable = walkable(&graph);
        assert_eq!(&after_walkable[..43], &before_walkable[..]);
        assert!(after_walkable[43..].iter().all(|w| !w));
        assert_eq!(&adjacency(&graph)[..43], &before_adjacency[..]);
        assert!(graph.audit().unwrap().is_empty());
    }

    #[test]
    fn approach_nodes_take_region_tag_and_respect_boundary() {
        init_logger();
        let config = NavConfig {
            boundary_radius: 1000.0,
            ..NavConfig::default()
        };
        let tagged = region().with_tag(NodeTag::DeepNebula);
        let mut graph = NavGraph::scan(config, ScanInput::new(vec![tagged], Vec::new())).unwrap();
        let t = insert(&mut graph, 5, Vec3::new(980.0, 0.0, 0.0), 50.0);
        graph.drain();
        assert_eq!(graph.status(t), Some(WorkState::Committed));

        let view = graph.view().unwrap();
        let record = view.obstacle(ObstacleKey(5)).unwrap();
        assert_eq!(record.approach.len(), 4);
        for &id in &record.approach {
            assert_eq!(view.node(id).unwrap().tag, NodeTag::DeepNebula);
        }
        assert_eq!(graph.diagnostics().count(Degradation::OutOfBounds), 4);
    }

    #[test]
    fn unknown_region_is_rejected_at_submission() {
        let mut graph = scanned(NavConfig::default());
        let err = graph
            .submit_insert_obstacle(ObstacleKey(1), ObstacleDescriptor::new(Vec3::ZERO, 10.0), RegionId(9))
            .unwrap_err();
        assert!(matches!(err, NavError::UnknownRegion(RegionId(9))));
        assert!(graph.is_drained());
    }

    #[test]
    #[should_panic(expected = "inserted while already live")]
    fn double_insert_is_fatal() {
        let mut graph = scanned(NavConfig::default());
        insert(&mut graph, 1, Vec3::ZERO, 50.0);
        insert(&mut graph, 1, Vec3::ZERO, 50.0);
        graph.drain();
    }

    #[test]
    #[should_panic(expected = "removed but not live")]
    fn unknown_remove_is_fatal() {
        let mut graph = scanned(NavConfig::default());
        graph.submit_remove_obstacle(ObstacleKey(3));
        graph.drain();
    }

    #[test]
    fn standalone_rebuild_is_a_no_op_on_adjacency() {
        let mut graph = scanned(NavConfig::default());
        let before = adjacency(&graph);
        let t = graph.submit_rebuild();
        assert_eq!(graph.drain(), 1);
        assert_eq!(graph.status(t), Some(WorkState::Committed));
        assert_eq!(adjacency(&graph), before);
        assert_eq!(graph.view().unwrap().stats().rebuilds, 2);
    }

    #[test]
    fn unknown_node_neighbors_is_an_error() {
        let graph = scanned(NavConfig::default());
        let err = graph.neighbors_of(NodeId(999)).unwrap_err();
        assert!(matches!(err, NavError::UnknownNode(NodeId(999))));
    }

    #[test]
    fn json_snapshot_round_trip() {
        let mut graph = scanned(NavConfig::default());
        insert(&mut graph, 1, Vec3::ZERO, 50.0);
        graph.drain();

        let json = graph.to_json().unwrap();
        let mut restored = NavGraph::from_json(&json, NavConfig::default()).unwrap();
        assert_eq!(adjacency(&restored), adjacency(&graph));
        assert_eq!(walkable(&restored), walkable(&graph));
        {
            let (a, b) = (graph.view().unwrap(), restored.view().unwrap());
            assert_eq!(a.obstacle(ObstacleKey(1)), b.obstacle(ObstacleKey(1)));
            assert_eq!(b.stats().nodes, a.stats().nodes);
            assert_eq!(b.stats().buckets, a.stats().buckets);
            assert!(b.audit().is_empty());
        }

        // The restored record still drives removal.
        restored.submit_remove_obstacle(ObstacleKey(1));
        restored.drain();
        assert!(restored.view().unwrap().node(NodeId(0)).unwrap().walkable);
        assert!(restored.audit().unwrap().is_empty());
    }

    #[test]
    fn bincode_snapshot_round_trip() {
        let graph = NavGraph::scan(NavConfig::default(), busy_input()).unwrap();
        let snapshot = graph.snapshot().unwrap();
        let bytes = bincode::serialize(&snapshot).unwrap();
        let decoded: GraphSnapshot = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, snapshot);

        let restored = NavGraph::from_snapshot(NavConfig::default(), decoded).unwrap();
        assert_eq!(adjacency(&restored), adjacency(&graph));
    }

    #[test]
    fn snapshot_only_lists_connected_nodes() {
        let mut graph = scanned(NavConfig::default());
        insert(&mut graph, 1, Vec3::ZERO, 50.0);
        graph.drain();
        let snapshot = graph.snapshot().unwrap();
        assert_eq!(snapshot.node_count, 51);
        assert!(snapshot.adjacency.iter().all(|a| a.node != NodeId(0)));
        assert_eq!(snapshot.obstacles.len(), 1);
    }

    #[test]
    fn snapshot_without_optional_sections_loads() {
        let json = r#"{
            "node_count": 2,
            "nodes": [
                {"position": {"x": 0, "y": 0, "z": 0}, "walkable": true, "tag": "OpenSpace"},
                {"position": {"x": 5000, "y": 0, "z": 0}, "walkable": true, "tag": "Nebula"}
            ],
            "adjacency": [
                {"node": 0, "connections": [[1, 5000]]},
                {"node": 1, "connections": [[0, 5000]]}
            ]
        }"#;
        let graph = NavGraph::from_json(json, NavConfig::default()).unwrap();
        let view = graph.view().unwrap();
        assert_eq!(view.node_count(), 2);
        assert_eq!(view.separation(), 275.0);
        assert_eq!(view.max_connection_distance(), 276.0);
        assert_eq!(view.neighbors_of(NodeId(0)).unwrap()[0].cost, 5000);
        assert_eq!(view.node(NodeId(1)).unwrap().origin, NodeOrigin::Region);
        assert!(view.audit().is_empty());
    }

    #[test]
    fn malformed_snapshots_are_rejected() {
        let graph = scanned(NavConfig::default());
        let good = graph.snapshot().unwrap();

        let mut wrong_count = good.clone();
        wrong_count.node_count += 1;
        assert!(matches!(
            NavGraph::from_snapshot(NavConfig::default(), wrong_count),
            Err(NavError::Snapshot(_))
        ));

        let mut dangling = good.clone();
        dangling.adjacency[0].connections.push((NodeId(500), 1));
        assert!(matches!(
            NavGraph::from_snapshot(NavConfig::default(), dangling),
            Err(NavError::Snapshot(_))
        ));

        let mut duplicate = good.clone();
        let first = duplicate.adjacency[0].connections[0];
        duplicate.adjacency[0].connections.push(first);
        assert!(matches!(
            NavGraph::from_snapshot(NavConfig::default(), duplicate),
            Err(NavError::Snapshot(_))
        ));

        assert!(matches!(
            NavGraph::from_json("{not json", NavConfig::default()),
            Err(NavError::Json(_))
        ));
    }

    #[test]
    fn audit_reports_tampered_state() {
        let mut graph = scanned(NavConfig::default());
        graph.store.set_walkable(NodeId(3), false);
        let violations = graph.audit().unwrap();
        assert!(violations.contains(&Violation::UnclaimedUnwalkable { node: NodeId(3) }));
        assert!(
            violations
                .iter()
                .any(|v| matches!(v, Violation::UnwalkableConnection { .. }))
        );
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = NavConfig {
            boundary_radius: -1.0,
            ..NavConfig::default()
        };
        assert!(matches!(
            NavGraph::scan(config, ScanInput::default()),
            Err(NavError::Config(_))
        ));
    }
}
