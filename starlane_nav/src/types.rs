// Core types shared across the navigation engine.
//
// Defines the float-space vector used for geometry (`Vec3`), the fixed-point
// coordinate nodes are stored at (`FixedCoord`), compact integer identifiers
// (`NodeId`, `RegionId`, `ObstacleKey`) and the coarse topography tag carried
// by every node (`NodeTag`, `TagMask`). All types derive `Serialize` and
// `Deserialize` for graph snapshots.
//
// Positions are quantized to `PRECISION` units per world unit (millimetre
// precision for a metre-scaled world). Connection costs are distances in the
// same fixed-point units, so a cost of 1000 is one world unit.
//
// See also: `store.rs` for the node arena that owns these positions,
// `spatial.rs` which buckets `FixedCoord`s by cell.
//
// **Critical constraint: determinism.** Node positions are compared and
// hashed in fixed-point space only. Floating-point values never decide
// identity, ordering or bucket membership.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

/// Fixed-point units per world unit.
pub const PRECISION: i32 = 1000;

/// `PRECISION` as a float, for conversions.
pub const PRECISION_F64: f64 = PRECISION as f64;

// ---------------------------------------------------------------------------
// Spatial types
// ---------------------------------------------------------------------------

/// A point or direction in continuous world space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn length_squared(self) -> f32 {
        self.dot(self)
    }

    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    pub fn distance(self, other: Self) -> f32 {
        (self - other).length()
    }

    /// Unit vector in the same direction. The zero vector stays zero.
    pub fn normalized(self) -> Self {
        let len = self.length();
        if len > 0.0 { self * (1.0 / len) } else { self }
    }

    /// Quantize to the fixed-point grid (round half away from zero).
    pub fn to_fixed(self) -> FixedCoord {
        FixedCoord::from_vec3(self)
    }
}

impl Add for Vec3 {
    type Output = Vec3;
    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;
    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;
    fn mul(self, rhs: f32) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Neg for Vec3 {
    type Output = Vec3;
    fn neg(self) -> Vec3 {
        Vec3::new(-self.x, -self.y, -self.z)
    }
}

impl fmt::Display for Vec3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3}, {:.3})", self.x, self.y, self.z)
    }
}

/// A node position in fixed-point units (`PRECISION` per world unit).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FixedCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl FixedCoord {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn from_vec3(v: Vec3) -> Self {
        let q = |c: f32| (c as f64 * PRECISION_F64).round() as i32;
        Self::new(q(v.x), q(v.y), q(v.z))
    }

    pub fn to_vec3(self) -> Vec3 {
        let f = |c: i32| (c as f64 / PRECISION_F64) as f32;
        Vec3::new(f(self.x), f(self.y), f(self.z))
    }

    /// Squared distance in fixed-point units. Exact.
    pub fn distance_squared(self, other: Self) -> i64 {
        let dx = self.x as i64 - other.x as i64;
        let dy = self.y as i64 - other.y as i64;
        let dz = self.z as i64 - other.z as i64;
        dx * dx + dy * dy + dz * dz
    }

    /// Distance in fixed-point units (world distance × `PRECISION`).
    pub fn fixed_distance(self, other: Self) -> f64 {
        (self.distance_squared(other) as f64).sqrt()
    }

    /// Distance in world units.
    pub fn distance(self, other: Self) -> f32 {
        (self.fixed_distance(other) / PRECISION_F64) as f32
    }

    /// Per-axis absolute offset in world units.
    pub fn axis_offsets(self, other: Self) -> [f32; 3] {
        let d = |a: i32, b: i32| ((a as i64 - b as i64).unsigned_abs() as f64 / PRECISION_F64) as f32;
        [d(self.x, other.x), d(self.y, other.y), d(self.z, other.z)]
    }
}

impl fmt::Display for FixedCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_vec3())
    }
}

/// World distance expressed in fixed-point units, for comparisons against
/// `FixedCoord::distance_squared`.
pub fn fixed_length(world: f32) -> f64 {
    world as f64 * PRECISION_F64
}

// ---------------------------------------------------------------------------
// Identifiers: plain integers.
// ---------------------------------------------------------------------------

/// Stable index of a node in the graph store. Never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// Identifier of a cubic region supplied by world-state management.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionId(pub u32);

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RegionId({})", self.0)
    }
}

/// Opaque handle identifying the owner of a dynamic obstacle (e.g. a
/// structure). The engine only compares keys; it never interprets them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObstacleKey(pub u64);

impl fmt::Display for ObstacleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObstacleKey({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// Node classification
// ---------------------------------------------------------------------------

/// Coarse topography classification of a node. Path-cost weighting by tag
/// happens in the search layer, not here.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeTag {
    #[default]
    OpenSpace,
    System,
    Nebula,
    DeepNebula,
}

impl NodeTag {
    pub const ALL: [NodeTag; 4] = [
        NodeTag::OpenSpace,
        NodeTag::System,
        NodeTag::Nebula,
        NodeTag::DeepNebula,
    ];

    pub fn index(self) -> usize {
        match self {
            NodeTag::OpenSpace => 0,
            NodeTag::System => 1,
            NodeTag::Nebula => 2,
            NodeTag::DeepNebula => 3,
        }
    }
}

/// Set of accepted tags for nearest-node queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TagMask(u8);

impl TagMask {
    pub const ALL: TagMask = TagMask(0b1111);
    pub const NONE: TagMask = TagMask(0);

    pub fn only(tag: NodeTag) -> Self {
        Self(1 << tag.index())
    }

    pub fn with(self, tag: NodeTag) -> Self {
        Self(self.0 | (1 << tag.index()))
    }

    pub fn contains(self, tag: NodeTag) -> bool {
        self.0 & (1 << tag.index()) != 0
    }
}

impl Default for TagMask {
    fn default() -> Self {
        Self::ALL
    }
}

/// Which pass created a node. Approach nodes are the only ones ever retired.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeOrigin {
    /// Propagated from a region center.
    #[default]
    Region,
    /// Icosahedral shell around a static obstacle.
    Shell,
    /// Inside a navigable obstacle interior.
    Interior,
    /// Added around a dynamic obstacle at insertion time.
    Approach,
}
