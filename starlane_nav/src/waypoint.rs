// Waypoint generation for regions and obstacles.
//
// Produces the candidate points that the graph promotes to nodes. Inputs are
// a uniform grid of cubic `Region`s covering the playable volume and a set of
// spherical `StaticObstacle`s. Output is a `TaggedWaypoints` partition keyed
// by `NodeTag`.
//
// Passes:
// 1. **Separation.** With no obstacles the separation `d` is
//    `config.default_separation`. Otherwise `d` is the bare-icosahedron edge
//    of the smallest (densest) obstacle shell, clamped below by
//    `config.min_separation`. Every larger shell is subdivided down to `d`.
//    If a shell cannot reach `d` within `drift_tolerance`, or `d` differs
//    from a previously computed separation by more than the tolerance, a
//    precision-drift warning is raised and the newer value wins. The
//    maximum connection distance is `d + connection_epsilon`.
// 2. **Shells.** Each obstacle gets a geodesic shell around a sphere of
//    radius `radius × shell_multiplier` (see `shell.rs`). Shell points
//    outside the boundary sphere, or inside another obstacle, are dropped
//    with a warning. Shell points take the tag of the region containing
//    them.
// 3. **Interiors.** Navigable obstacles (`System`, `Nebula`, `DeepNebula`)
//    get their center plus an inscribed cube of radius
//    `radius × interior_fraction`, tagged by obstacle kind.
// 4. **Regions.** Each region's center plus points stepped outward by `d`
//    toward its 8 corner and 6 face directions while the step stays within
//    the region's half-diagonal. Stepped points outside the boundary are
//    discarded; the center is always kept. Region points strictly inside
//    any shell's circumscribing sphere are then removed, since the shell
//    covers that volume. A point already emitted by an earlier region
//    (steps landing exactly on a shared face) is emitted only once.
//
// `approach_waypoints()` is the single-obstacle variant used when a dynamic
// obstacle is inserted into a live graph: the 8 vertices of a cube around
// the obstacle's footprint.
//
// See also: `shell.rs` for the point constructions, `graph.rs` which turns
// waypoints into nodes, `config.rs` for every multiplier used here.
//
// **Critical constraint: determinism.** Output order is fixed: per tag,
// regions in input order, then shells in obstacle order, then interiors.

use crate::config::NavConfig;
use crate::error::{Degradation, Diagnostics};
use crate::shell::{self, Shell};
use crate::types::{FixedCoord, NodeOrigin, NodeTag, RegionId, Vec3};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

/// A cubic region of the playable volume.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: RegionId,
    pub center: Vec3,
    /// Edge length of the cube.
    pub size: f32,
    #[serde(default)]
    pub tag: NodeTag,
}

impl Region {
    pub fn new(id: RegionId, center: Vec3, size: f32) -> Self {
        Self {
            id,
            center,
            size,
            tag: NodeTag::OpenSpace,
        }
    }

    pub fn with_tag(mut self, tag: NodeTag) -> Self {
        self.tag = tag;
        self
    }

    pub fn half_diagonal(&self) -> f32 {
        self.size * 0.5 * 3.0f32.sqrt()
    }

    /// Axis-aligned containment, inclusive of the faces.
    pub fn contains(&self, p: Vec3) -> bool {
        let h = self.size * 0.5;
        (p.x - self.center.x).abs() <= h
            && (p.y - self.center.y).abs() <= h
            && (p.z - self.center.z).abs() <= h
    }
}

/// What a static obstacle is, which decides whether it has an interior.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObstacleKind {
    /// Impassable body: approach shell only.
    #[default]
    Solid,
    /// Traversable star system interior.
    System,
    Nebula,
    DeepNebula,
}

impl ObstacleKind {
    pub fn is_navigable(self) -> bool {
        self != ObstacleKind::Solid
    }

    /// Tag given to interior points. `None` for solid obstacles.
    pub fn interior_tag(self) -> Option<NodeTag> {
        match self {
            ObstacleKind::Solid => None,
            ObstacleKind::System => Some(NodeTag::System),
            ObstacleKind::Nebula => Some(NodeTag::Nebula),
            ObstacleKind::DeepNebula => Some(NodeTag::DeepNebula),
        }
    }
}

/// A spherical obstacle known at scan time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StaticObstacle {
    pub position: Vec3,
    /// Inner footprint radius.
    pub radius: f32,
    #[serde(default)]
    pub kind: ObstacleKind,
}

impl StaticObstacle {
    pub fn new(position: Vec3, radius: f32, kind: ObstacleKind) -> Self {
        Self {
            position,
            radius,
            kind,
        }
    }

    pub fn footprint(&self) -> Footprint {
        Footprint {
            center: self.position,
            radius: self.radius,
        }
    }
}

/// A sphere that waypoints must stay out of.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Footprint {
    pub center: Vec3,
    pub radius: f32,
}

impl Footprint {
    pub fn strictly_contains(&self, p: Vec3) -> bool {
        p.distance(self.center) < self.radius
    }
}

/// A candidate point before it becomes a node.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Waypoint {
    pub position: Vec3,
    pub origin: NodeOrigin,
}

/// Waypoints partitioned by tag.
#[derive(Clone, Debug, Default)]
pub struct TaggedWaypoints {
    parts: [Vec<Waypoint>; 4],
}

impl TaggedWaypoints {
    pub fn push(&mut self, tag: NodeTag, waypoint: Waypoint) {
        self.parts[tag.index()].push(waypoint);
    }

    pub fn get(&self, tag: NodeTag) -> &[Waypoint] {
        &self.parts[tag.index()]
    }

    pub fn len(&self) -> usize {
        self.parts.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All waypoints in tag order (`NodeTag::ALL`), then generation order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeTag, &Waypoint)> {
        NodeTag::ALL
            .into_iter()
            .flat_map(move |tag| self.parts[tag.index()].iter().map(move |w| (tag, w)))
    }
}

/// Everything a scan produces.
#[derive(Clone, Debug)]
pub struct GeneratedWaypoints {
    pub waypoints: TaggedWaypoints,
    pub separation: f32,
    pub max_connection_distance: f32,
}

/// The 8 corner directions followed by the 6 face directions.
pub fn propagation_directions() -> [Vec3; 14] {
    let c = 1.0 / 3.0f32.sqrt();
    [
        Vec3::new(-c, -c, -c),
        Vec3::new(-c, -c, c),
        Vec3::new(-c, c, -c),
        Vec3::new(-c, c, c),
        Vec3::new(c, -c, -c),
        Vec3::new(c, -c, c),
        Vec3::new(c, c, -c),
        Vec3::new(c, c, c),
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(-1.0, 0.0, 0.0),
        Vec3::new(0.0, 1.0, 0.0),
        Vec3::new(0.0, -1.0, 0.0),
        Vec3::new(0.0, 0.0, 1.0),
        Vec3::new(0.0, 0.0, -1.0),
    ]
}

/// Generates waypoints against one config, reporting degraded conditions to
/// the owning graph's diagnostics.
pub struct WaypointGenerator<'a> {
    config: &'a NavConfig,
    diagnostics: &'a Diagnostics,
}

impl<'a> WaypointGenerator<'a> {
    pub fn new(config: &'a NavConfig, diagnostics: &'a Diagnostics) -> Self {
        Self {
            config,
            diagnostics,
        }
    }

    fn in_bounds(&self, p: Vec3) -> bool {
        p.distance(self.config.boundary_center) <= self.config.boundary_radius
    }

    /// Full generation pass. `previous_separation` is the last separation
    /// this graph computed (or a caller-supplied expectation); a mismatch
    /// beyond `drift_tolerance` is reported.
    pub fn generate(
        &self,
        regions: &[Region],
        obstacles: &[StaticObstacle],
        previous_separation: Option<f32>,
    ) -> GeneratedWaypoints {
        let (separation, shells) = self.separation_and_shells(obstacles);
        let drifted = previous_separation
            .filter(|prev| (separation - prev).abs() > self.config.drift_tolerance);
        if let Some(prev) = drifted {
            log::warn!("separation drifted from {prev:.3} to {separation:.3}; using {separation:.3}");
            self.diagnostics.record(Degradation::PrecisionDrift);
        }

        let mut out = TaggedWaypoints::default();
        // Membership only; never iterated.
        let mut emitted = FxHashSet::default();
        for region in regions {
            self.region_pass(region, separation, &shells, &mut emitted, &mut out);
        }
        for (n, shell) in shells.iter().enumerate() {
            self.shell_pass(n, shell, obstacles, regions, &mut out);
        }
        for obstacle in obstacles {
            self.interior_pass(obstacle, &mut out);
        }

        GeneratedWaypoints {
            waypoints: out,
            separation,
            max_connection_distance: separation + self.config.connection_epsilon,
        }
    }

    /// Pick the separation and build one shell per obstacle.
    fn separation_and_shells(&self, obstacles: &[StaticObstacle]) -> (f32, Vec<Shell>) {
        if obstacles.is_empty() {
            return (self.config.default_separation, Vec::new());
        }
        let densest = obstacles
            .iter()
            .map(|o| shell::base_edge(o.radius * self.config.shell_multiplier))
            .fold(f32::INFINITY, f32::min);
        let mut separation = densest.max(self.config.min_separation);

        let tolerance = self.config.drift_tolerance;
        let shells: Vec<Shell> = obstacles
            .iter()
            .map(|o| {
                shell::shell_for_spacing(
                    o.position,
                    o.radius * self.config.shell_multiplier,
                    separation,
                    tolerance,
                )
            })
            .collect();

        for (o, s) in obstacles.iter().zip(&shells) {
            if s.spacing > separation + tolerance {
                log::warn!(
                    "shell around obstacle at {} has spacing {:.3} above separation {:.3} at frequency {}; widening separation",
                    o.position,
                    s.spacing,
                    separation,
                    s.frequency,
                );
                self.diagnostics.record(Degradation::PrecisionDrift);
                separation = s.spacing;
            }
        }
        (separation, shells)
    }

    fn region_pass(
        &self,
        region: &Region,
        d: f32,
        shells: &[Shell],
        emitted: &mut FxHashSet<FixedCoord>,
        out: &mut TaggedWaypoints,
    ) {
        let covered = |p: Vec3| shells.iter().any(|s| p.distance(s.center) < s.radius);
        let mut push = |out: &mut TaggedWaypoints, p: Vec3| {
            if emitted.insert(p.to_fixed()) {
                out.push(
                    region.tag,
                    Waypoint {
                        position: p,
                        origin: NodeOrigin::Region,
                    },
                );
            }
        };

        if !covered(region.center) {
            push(out, region.center);
        }
        let reach = region.half_diagonal();
        for dir in propagation_directions() {
            let mut step = 1u32;
            while step as f32 * d <= reach {
                let p = region.center + dir * (step as f32 * d);
                step += 1;
                if !self.in_bounds(p) {
                    continue;
                }
                if !covered(p) {
                    push(out, p);
                }
            }
        }
    }

    fn shell_pass(
        &self,
        own: usize,
        shell: &Shell,
        obstacles: &[StaticObstacle],
        regions: &[Region],
        out: &mut TaggedWaypoints,
    ) {
        for &p in &shell.points {
            if !self.in_bounds(p) {
                log::warn!("dropping shell waypoint {p}: outside playable boundary");
                self.diagnostics.record(Degradation::OutOfBounds);
                continue;
            }
            let blocked = obstacles
                .iter()
                .enumerate()
                .any(|(n, o)| n != own && o.footprint().strictly_contains(p));
            if blocked {
                log::warn!("dropping shell waypoint {p}: inside a neighbouring obstacle");
                self.diagnostics.record(Degradation::InsideObstacle);
                continue;
            }
            let tag = regions
                .iter()
                .find(|r| r.contains(p))
                .map_or(NodeTag::OpenSpace, |r| r.tag);
            out.push(
                tag,
                Waypoint {
                    position: p,
                    origin: NodeOrigin::Shell,
                },
            );
        }
    }

    fn interior_pass(&self, obstacle: &StaticObstacle, out: &mut TaggedWaypoints) {
        let Some(tag) = obstacle.kind.interior_tag() else {
            return;
        };
        let inner = obstacle.radius * self.config.interior_fraction;
        let points = std::iter::once(obstacle.position)
            .chain(shell::cube_vertices(obstacle.position, inner));
        for p in points {
            if !self.in_bounds(p) {
                log::warn!("dropping interior waypoint {p}: outside playable boundary");
                self.diagnostics.record(Degradation::OutOfBounds);
                continue;
            }
            out.push(
                tag,
                Waypoint {
                    position: p,
                    origin: NodeOrigin::Interior,
                },
            );
        }
    }

    /// Approach points for one dynamically inserted obstacle: the vertices
    /// of a cube inscribed in the sphere of `radius × approach_multiplier`.
    /// Points outside the boundary or inside any of `blocked` (navigable
    /// interiors and other live footprints) are dropped with a warning.
    pub fn approach_waypoints(
        &self,
        center: Vec3,
        radius: f32,
        blocked: &[Footprint],
    ) -> Vec<Waypoint> {
        let mut out = Vec::with_capacity(8);
        for p in shell::cube_vertices(center, radius * self.config.approach_multiplier) {
            if !self.in_bounds(p) {
                log::warn!("dropping approach waypoint {p}: outside playable boundary");
                self.diagnostics.record(Degradation::OutOfBounds);
                continue;
            }
            if blocked.iter().any(|f| f.strictly_contains(p)) {
                log::warn!("dropping approach waypoint {p}: inside a neighbouring obstacle");
                self.diagnostics.record(Degradation::InsideObstacle);
                continue;
            }
            out.push(Waypoint {
                position: p,
                origin: NodeOrigin::Approach,
            });
        }
        out
    }
}
