// The graph store: an append-only node arena plus per-node adjacency.
//
// Nodes live in a `Vec<NavNode>` indexed by `NodeId`. Ids are assigned
// sequentially and never reused; "removing" a node only clears its
// `walkable` flag. Each node owns its outgoing `Connection`s, kept sorted by
// target id with at most one connection per target.
//
// Only the mutation pipeline in `graph.rs` holds a `&mut GraphStore`; every
// other component reads it by shared reference or refers to nodes by id.
//
// See also: `connect.rs` which computes adjacency, `spatial.rs` which indexes
// node positions, `graph.rs` for the snapshot format built from this store.
//
// **Critical constraint: determinism.** Node order is insertion order and
// adjacency order is target-id order.

use crate::types::{FixedCoord, NodeId, NodeOrigin, NodeTag};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// A directed connection to another node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    pub target: NodeId,
    /// Distance in fixed-point units (world distance × `PRECISION`).
    pub cost: u32,
}

/// Outgoing connections of one node, sorted by target.
pub type ConnectionList = SmallVec<[Connection; 8]>;

/// A node in the navigation graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NavNode {
    pub id: NodeId,
    pub position: FixedCoord,
    pub walkable: bool,
    pub tag: NodeTag,
    pub origin: NodeOrigin,
    pub connections: ConnectionList,
}

#[derive(Clone, Debug, Default)]
pub struct GraphStore {
    nodes: Vec<NavNode>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a walkable, unconnected node. Returns its id.
    pub fn add_node(&mut self, position: FixedCoord, tag: NodeTag, origin: NodeOrigin) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(NavNode {
            id,
            position,
            walkable: true,
            tag,
            origin,
            connections: SmallVec::new(),
        });
        id
    }

    pub fn node(&self, id: NodeId) -> Option<&NavNode> {
        self.nodes.get(id.index())
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id.index() < self.nodes.len()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NavNode> {
        self.nodes.iter()
    }

    pub fn is_walkable(&self, id: NodeId) -> bool {
        self.node(id).is_some_and(|n| n.walkable)
    }

    /// Flip a node's walkable flag. Returns the previous value.
    ///
    /// Panics if `id` is not in the store; ids only come from this store.
    pub fn set_walkable(&mut self, id: NodeId, walkable: bool) -> bool {
        let node = &mut self.nodes[id.index()];
        std::mem::replace(&mut node.walkable, walkable)
    }

    /// Replace every node's adjacency. `lists` must have one entry per node,
    /// in id order.
    pub fn replace_adjacency(&mut self, lists: Vec<ConnectionList>) {
        assert_eq!(
            lists.len(),
            self.nodes.len(),
            "adjacency rebuild produced {} lists for {} nodes",
            lists.len(),
            self.nodes.len()
        );
        for (node, list) in self.nodes.iter_mut().zip(lists) {
            debug_assert!(list.windows(2).all(|w| w[0].target < w[1].target));
            node.connections = list;
        }
    }

    pub fn set_connections(&mut self, id: NodeId, list: ConnectionList) {
        self.nodes[id.index()].connections = list;
    }

    pub fn connection_count(&self) -> usize {
        self.nodes.iter().map(|n| n.connections.len()).sum()
    }
}
