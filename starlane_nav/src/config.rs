// Data-driven engine configuration.
//
// All tunable parameters live in `NavConfig`, loaded from JSON by the owning
// application. The engine never uses magic numbers for geometry: shell and
// approach multipliers, separation fallbacks, search bounds and the
// connection epsilon are all read from here.
//
// See also: `waypoint.rs` (separation, multipliers, boundary), `spatial.rs`
// (search ring bound), `connect.rs` (connect mode, axis limits, raycast),
// `graph.rs` which owns the config for the lifetime of a graph.
//
// **Critical constraint: determinism.** Two graphs scanned from identical
// inputs with identical configs produce identical node tables and
// adjacency.

use crate::error::NavError;
use crate::shell::ICOSAHEDRON_CIRCUM_PER_IN;
use crate::types::Vec3;
use serde::{Deserialize, Serialize};

/// How the connectivity pass finds candidate neighbours.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectMode {
    /// Candidates come from the spatial index rings around each node.
    #[default]
    Indexed,
    /// Every node is tested against every other node. O(n²); only sensible
    /// for small graphs and for cross-checking the indexed pass.
    BruteForce,
}

/// Top-level engine configuration. Never mutated once a graph is built.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NavConfig {
    /// Center of the playable-volume boundary sphere.
    pub boundary_center: Vec3,

    /// Radius of the playable-volume boundary sphere. Generated waypoints
    /// outside it are discarded.
    pub boundary_radius: f32,

    /// Node separation used by the region pass when there are no obstacle
    /// shells to derive one from.
    pub default_separation: f32,

    /// Lower clamp for a separation derived from small obstacle shells.
    pub min_separation: f32,

    /// Added to the separation to get the maximum connection distance.
    pub connection_epsilon: f32,

    /// Obstacle radius multiplier giving the sphere the approach shell's
    /// icosahedron is circumscribed around.
    pub shell_multiplier: f32,

    /// Footprint multiplier giving the radius of the cube of approach nodes
    /// placed around a dynamically inserted obstacle.
    pub approach_multiplier: f32,

    /// Fraction of a navigable obstacle's radius used for its inscribed
    /// interior cube.
    pub interior_fraction: f32,

    /// Whether connections must pass a line-of-sight check both ways.
    pub raycast: bool,

    pub connect_mode: ConnectMode,

    /// Optional per-axis maximum offset between connected nodes. A zero or
    /// negative component disables the limit on that axis.
    pub axis_limits: Option<[f32; 3]>,

    /// Maximum number of Chebyshev rings a nearest-node search expands.
    pub max_search_rings: u32,

    /// Default search radius for nearest-node queries.
    pub max_nearest_distance: f32,

    /// Allowed difference between successive separation computations before
    /// a precision-drift warning is raised.
    pub drift_tolerance: f32,

    /// Run the full connectivity rebuild on the rayon thread pool.
    pub parallel_rebuild: bool,
}

impl Default for NavConfig {
    fn default() -> Self {
        Self {
            boundary_center: Vec3::ZERO,
            boundary_radius: 100_000.0,
            default_separation: 275.0,
            min_separation: 25.0,
            connection_epsilon: 1.0,
            shell_multiplier: 1.5,
            approach_multiplier: 1.5,
            interior_fraction: 0.5,
            raycast: true,
            connect_mode: ConnectMode::Indexed,
            axis_limits: None,
            max_search_rings: 16,
            max_nearest_distance: 100_000.0,
            drift_tolerance: 0.5,
            parallel_rebuild: true,
        }
    }
}

impl NavConfig {
    /// Parse a config from JSON. Missing fields take their default values.
    pub fn from_json(json: &str) -> Result<Self, NavError> {
        let config: NavConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configs the generator cannot work with.
    pub fn validate(&self) -> Result<(), NavError> {
        let positive = [
            ("boundary_radius", self.boundary_radius),
            ("default_separation", self.default_separation),
            ("min_separation", self.min_separation),
            ("shell_multiplier", self.shell_multiplier),
            ("approach_multiplier", self.approach_multiplier),
            ("interior_fraction", self.interior_fraction),
            ("max_nearest_distance", self.max_nearest_distance),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(NavError::Config(format!("{name} must be positive, got {value}")));
            }
        }
        if !(self.connection_epsilon.is_finite() && self.connection_epsilon >= 0.0) {
            return Err(NavError::Config("connection_epsilon must be non-negative".into()));
        }
        if !(self.drift_tolerance.is_finite() && self.drift_tolerance >= 0.0) {
            return Err(NavError::Config("drift_tolerance must be non-negative".into()));
        }
        // Shell and approach points must land outside the obstacle they
        // surround.
        if self.shell_multiplier * ICOSAHEDRON_CIRCUM_PER_IN <= 1.0 {
            return Err(NavError::Config(format!(
                "shell_multiplier must exceed {:.4} so shell points clear the obstacle, got {}",
                1.0 / ICOSAHEDRON_CIRCUM_PER_IN,
                self.shell_multiplier
            )));
        }
        if self.approach_multiplier <= 1.0 {
            return Err(NavError::Config(format!(
                "approach_multiplier must exceed 1, got {}",
                self.approach_multiplier
            )));
        }
        if self.interior_fraction >= 1.0 {
            return Err(NavError::Config(
                "interior_fraction must be below 1 so interior points stay inside".into(),
            ));
        }
        if self.max_search_rings == 0 {
            return Err(NavError::Config("max_search_rings must be at least 1".into()));
        }
        Ok(())
    }
}
