// Error taxonomy and degraded-condition counters.
//
// Three classes of trouble, handled three different ways:
// - Caller-facing recoverable errors (`NavError`): a query rejected because
//   mutations are still queued, an unknown id, a malformed snapshot or
//   config. Returned as `Result`.
// - Degraded-but-recoverable conditions (`Degradation`): a nearest-node
//   search hit its ring bound, a proposed waypoint was dropped, a computed
//   separation drifted. Logged with `log::warn!` and counted in
//   `Diagnostics`; the operation carries on without the offending point.
// - Contract violations (double insert, remove of an unknown key, index and
//   store disagreeing on node count): `assert!`/`panic!` at the call site.
//   These are caller bookkeeping bugs, not bad input.
//
// See also: `graph.rs`, which owns the `Diagnostics` instance and raises the
// contract assertions.

use crate::types::{NodeId, RegionId};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Recoverable errors returned to callers of the engine.
#[derive(Debug, Error)]
pub enum NavError {
    /// Queries are rejected until the mutation queue drains.
    #[error("graph has {pending} pending work item(s); drain the queue before querying")]
    MutationPending { pending: usize },

    #[error("{0} does not exist")]
    UnknownNode(NodeId),

    #[error("{0} is not a known region")]
    UnknownRegion(RegionId),

    #[error("invalid snapshot: {0}")]
    Snapshot(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// A degraded-but-recoverable condition. Each is warned about once per
/// occurrence and counted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Degradation {
    /// A nearest-node search ran out of rings before finding a match.
    SearchExhausted,
    /// A proposed waypoint fell outside the playable boundary sphere.
    OutOfBounds,
    /// A proposed waypoint fell inside another obstacle's footprint or a
    /// neighbouring navigable interior.
    InsideObstacle,
    /// A computed shell separation disagreed with the previous value.
    PrecisionDrift,
}

impl Degradation {
    const COUNT: usize = 4;

    fn slot(self) -> usize {
        match self {
            Degradation::SearchExhausted => 0,
            Degradation::OutOfBounds => 1,
            Degradation::InsideObstacle => 2,
            Degradation::PrecisionDrift => 3,
        }
    }
}

/// Counters for every `Degradation` raised by a graph, plus the number of
/// full connectivity rebuilds committed. Atomic so that read-only queries can
/// record through a shared reference.
#[derive(Debug, Default)]
pub struct Diagnostics {
    counts: [AtomicU64; Degradation::COUNT],
    rebuilds: AtomicU64,
}

impl Diagnostics {
    pub fn record(&self, kind: Degradation) {
        self.counts[kind.slot()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self, kind: Degradation) -> u64 {
        self.counts[kind.slot()].load(Ordering::Relaxed)
    }

    pub fn record_rebuild(&self) {
        self.rebuilds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rebuilds(&self) -> u64 {
        self.rebuilds.load(Ordering::Relaxed)
    }
}

impl Clone for Diagnostics {
    fn clone(&self) -> Self {
        let out = Diagnostics::default();
        for (dst, src) in out.counts.iter().zip(&self.counts) {
            dst.store(src.load(Ordering::Relaxed), Ordering::Relaxed);
        }
        out.rebuilds.store(self.rebuilds(), Ordering::Relaxed);
        out
    }
}
