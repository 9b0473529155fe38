// starlane_nav: spatial navigation graph engine.
//
// This crate generates, spatially indexes, and incrementally maintains a
// weighted waypoint graph covering a large continuous 3D volume. Mobile
// agents' path search runs over the graph; that search, rendering, and any
// game rules live in the owning application, which feeds region/obstacle
// geometry in and reads nearest-node and neighbour queries out.
//
// Module overview:
// - `graph.rs`:     NavGraph facade: scan, work-item submission/processing, queries, snapshots, audit.
// - `queue.rs`:     MutationQueue: ordered work items, tickets, per-ticket state.
// - `waypoint.rs`:  Waypoint Generator: region, shell, interior and approach points.
// - `shell.rs`:     Icosahedron/geodesic shell and cube point constructions.
// - `spatial.rs`:   Bucketed spatial index with ring-bounded nearest search.
// - `connect.rs`:   Connectivity Builder: candidate validation and the full rebuild pass.
// - `occlusion.rs`: LineOfSight seam and analytic occluders.
// - `obstacle.rs`:  Per-obstacle records of approach and suppressed nodes.
// - `store.rs`:     Append-only node arena and adjacency.
// - `config.rs`:    NavConfig: every tunable parameter.
// - `error.rs`:     NavError, degraded-condition counters.
// - `types.rs`:     Vec3, FixedCoord, ids, NodeTag, fixed-point precision.
//
// The engine has no host-runtime hooks: the owning application calls
// `NavGraph::scan()` and drives the mutation queue from its own scheduler.
// Logging goes through the `log` facade; installing a logger is the
// application's job.
//
// **Critical constraint: determinism.** Identical inputs and config give
// identical node ids, positions and adjacency, whether or not the rebuild
// runs in parallel. Positions are stored in fixed point. No hash map is ever
// iterated to produce observable order.

pub mod config;
pub mod connect;
pub mod error;
pub mod graph;
pub mod obstacle;
pub mod occlusion;
pub mod queue;
pub mod shell;
pub mod spatial;
pub mod store;
pub mod types;
pub mod waypoint;

pub use config::{ConnectMode, NavConfig};
pub use error::{Degradation, Diagnostics, NavError};
pub use graph::{GraphSnapshot, GraphStats, NavGraph, NavView, NearestConstraint, Violation};
pub use obstacle::{ObstacleDescriptor, ObstacleRecord};
pub use occlusion::{LineOfSight, Occluder, OcclusionSet};
pub use queue::{ScanInput, Ticket, WorkState};
pub use spatial::NearestHit;
pub use store::{Connection, NavNode};
pub use types::{FixedCoord, NodeId, NodeOrigin, NodeTag, ObstacleKey, RegionId, TagMask, Vec3};
pub use waypoint::{ObstacleKind, Region, StaticObstacle};
