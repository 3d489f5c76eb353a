//! Navmesh agent movement in fixed-point space
//!
//! Loads convex-polygon navmeshes and moves agents across them. Positions are
//! mapped onto a 16-bit integer grid per mesh, so containment and crossing
//! tests are exact and every result is reproducible bit for bit.
//!
//! # Features
//!
//! - **Loading**: Polygon soups become meshes with linked neighbours, chained
//!   hard walls and supporting planes ([`Loader`])
//! - **Movement**: Agents move by impulse, slide along hard walls and never
//!   leave the mesh ([`MeshInstance::iterate_agent`])
//! - **Narrowings**: Groups of polygons admit a limited number of agents at a
//!   time, under a pluggable [`NarrowingPolicy`]
//! - **Traces**: Line-of-movement queries against the navmesh
//! - **Binary meshes**: Save and reload loaded meshes ([`binary_format`])
//! - **Connections**: Hard walls can be flagged as connecting; a move through
//!   one reports where it was heading ([`AgentStep::exit`])
//!
//! # Example
//!
//! ```rust,ignore
//! use navphys::{Agent, Loader, MeshInstance, MoveConfig};
//!
//! let mesh = Loader::new().load(&soup)?;
//! let mut instance = MeshInstance::new();
//! instance.link_mesh(None, Some(&mesh));
//!
//! let mut agent = Agent::new();
//! agent.fpos = glam::Vec2::new(0.5, 0.5);
//! instance.teleport_agent(&mesh, &mut agent, &MoveConfig::default());
//!
//! agent.fvel = glam::Vec2::new(0.8, 0.0);
//! instance.iterate_agent(&mesh, &mut agent, &MoveConfig::default());
//! ```

pub mod agent;
pub mod binary_format;
pub mod loader;
pub mod mesh;
pub mod mesh_instance;
pub mod narrowing;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_mesh_helpers;
pub mod trace;

pub use agent::*;
pub use loader::*;
pub use mesh::*;
pub use mesh_instance::*;
pub use narrowing::*;
pub use trace::*;

pub use navphys_common::{Error, Result};

/// Ceiling on wall-slide chaining and link traversal per move
pub const MAX_MOVE_DEPTH: u32 = 8;

/// Movement tuning shared by every mesh instance
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct MoveConfig {
    /// Remaining velocity (fixed units) below which a move stops
    pub min_move_length: f32,
    /// Velocity (fixed units) below which an agent does not move at all
    pub min_agent_speed: f32,
    /// How far the velocity may point away from a wall before sliding stops
    pub hug_tolerance: f32,
    /// Ticks an agent refused by a narrowing waits before asking again
    pub narrowing_cooldown_ticks: u32,
    /// Teleports outside the mesh land on the nearest polygon center instead
    /// of leaving the agent unplaced
    pub snap_outside_teleports: bool,
}

impl Default for MoveConfig {
    fn default() -> Self {
        Self {
            min_move_length: 0.001,
            min_agent_speed: 0.0001,
            hug_tolerance: 0.001,
            narrowing_cooldown_ticks: 0,
            snap_outside_teleports: true,
        }
    }
}

impl MoveConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_narrowing_cooldown(mut self, ticks: u32) -> Self {
        self.narrowing_cooldown_ticks = ticks;
        self
    }

    pub fn with_snap_outside_teleports(mut self, snap: bool) -> Self {
        self.snap_outside_teleports = snap;
        self
    }

    pub fn with_hug_tolerance(mut self, tolerance: f32) -> Self {
        self.hug_tolerance = tolerance;
        self
    }
}

#[cfg(test)]
mod narrowing_tests;
