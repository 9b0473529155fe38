// The mutation queue: ordered work items that change the graph.
//
// Every graph-affecting operation (the initial scan, obstacle insertion,
// obstacle removal, an explicit reconnect) is submitted as a `WorkItem` and
// applied by `NavGraph::process_next()` in submission order, one item fully
// completing before the next begins. There is no cancellation: once queued,
// an item always runs.
//
// Structural items do not reconnect the graph themselves. Applying one
// queues a `WorkKind::Rebuild` carrying the same ticket at the *front* of the
// queue, so the full connectivity pass runs as the very next item and the
// originating ticket only reaches `Committed` once adjacency is consistent.
//
// Per-ticket lifecycle, tracked in `states`:
//
//   Queued → Applying → Reconnecting → Committed
//
// A standalone rebuild skips `Applying`.
//
// See also: `graph.rs` which pops and applies items and rejects queries
// while the queue is not drained.
//
// **Critical constraint: determinism.** Items run strictly in `sequence`
// order except for follow-up rebuilds, which always run immediately after
// the item that queued them.

use crate::obstacle::ObstacleDescriptor;
use crate::occlusion::Occluder;
use crate::types::{ObstacleKey, RegionId};
use crate::waypoint::{Region, StaticObstacle};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;

/// Handle returned when work is submitted; used to poll its state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ticket(pub u64);

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ticket#{}", self.0)
    }
}

/// Where a submitted change is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkState {
    Queued,
    Applying,
    Reconnecting,
    Committed,
}

/// Geometry for the initial full build.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanInput {
    pub regions: Vec<Region>,
    pub obstacles: Vec<StaticObstacle>,
    /// Expected node separation. A computed separation that differs by more
    /// than the drift tolerance is reported; the computed value wins.
    pub separation: Option<f32>,
    /// Application-supplied occluders checked when raycasting is enabled.
    pub occluders: Vec<Occluder>,
}

impl ScanInput {
    pub fn new(regions: Vec<Region>, obstacles: Vec<StaticObstacle>) -> Self {
        Self {
            regions,
            obstacles,
            ..Self::default()
        }
    }
}

/// What a work item does when applied.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum WorkKind {
    Scan(ScanInput),
    InsertObstacle {
        key: ObstacleKey,
        descriptor: ObstacleDescriptor,
        region: RegionId,
    },
    RemoveObstacle {
        key: ObstacleKey,
    },
    /// Full connectivity pass over every node.
    Rebuild,
}

impl WorkKind {
    pub fn label(&self) -> &'static str {
        match self {
            WorkKind::Scan(_) => "scan",
            WorkKind::InsertObstacle { .. } => "insert-obstacle",
            WorkKind::RemoveObstacle { .. } => "remove-obstacle",
            WorkKind::Rebuild => "rebuild",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub ticket: Ticket,
    /// Monotonic counter over every item ever enqueued, follow-ups included.
    pub sequence: u64,
    pub kind: WorkKind,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MutationQueue {
    items: VecDeque<WorkItem>,
    states: BTreeMap<Ticket, WorkState>,
    next_ticket: u64,
    next_sequence: u64,
}

impl MutationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn item(&mut self, ticket: Ticket, kind: WorkKind) -> WorkItem {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        WorkItem {
            ticket,
            sequence,
            kind,
        }
    }

    /// Append a new item under a fresh ticket.
    pub fn submit(&mut self, kind: WorkKind) -> Ticket {
        let ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;
        log::debug!("{ticket} ({}) queued", kind.label());
        let item = self.item(ticket, kind);
        self.items.push_back(item);
        self.states.insert(ticket, WorkState::Queued);
        ticket
    }

    /// Queue a follow-up item for `ticket` ahead of everything else.
    pub fn follow_up(&mut self, ticket: Ticket, kind: WorkKind) {
        let item = self.item(ticket, kind);
        self.items.push_front(item);
    }

    pub fn pop(&mut self) -> Option<WorkItem> {
        self.items.pop_front()
    }

    pub fn set_state(&mut self, ticket: Ticket, state: WorkState) {
        log::debug!("{ticket} -> {state:?}");
        self.states.insert(ticket, state);
    }

    /// State of a submitted ticket; `None` for tickets this queue never
    /// issued.
    pub fn state(&self, ticket: Ticket) -> Option<WorkState> {
        self.states.get(&ticket).copied()
    }

    /// Number of items waiting to run, follow-ups included.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// `true` once every submitted item (and its follow-ups) has run.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
