//! Trace queries and body inspection results

use glam::Vec3;
use navphys_common::BodyHandle;

/// Upper bound on obstacles reported by a single trace
pub const MAX_TRACE_OBSTACLES: usize = 256;

/// What a trace tests against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceOptions {
    /// Walls of the navmesh
    pub navmesh: bool,
    /// Other bodies on the same map
    pub obstacles: bool,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            navmesh: true,
            obstacles: false,
        }
    }
}

impl TraceOptions {
    pub fn navmesh_only() -> Self {
        Self::default()
    }

    pub fn with_obstacles(mut self, obstacles: bool) -> Self {
        self.obstacles = obstacles;
        self
    }
}

/// Outcome of a body trace, world space
#[derive(Debug, Clone, PartialEq)]
pub struct TraceResult {
    /// A hard wall (or the traversal limit) stopped the trace
    pub hit: bool,
    /// Where the trace stopped; the destination when nothing was hit
    pub hit_point: Vec3,
    /// Inward normal of the wall that was hit, zero otherwise
    pub hit_normal: Vec3,
    /// Polygon the trace ended in
    pub hit_poly_id: Option<u32>,
    /// Dual traces only: the first leg already hit and the second was skipped
    pub first_trace_hit: bool,
    /// Bodies whose radius the segment passes through, nearest first
    pub bodies_hit: Vec<BodyHandle>,
}

impl TraceResult {
    /// A trace that reached `destination` untouched
    pub fn no_hit(destination: Vec3) -> Self {
        Self {
            hit: false,
            hit_point: destination,
            hit_normal: Vec3::ZERO,
            hit_poly_id: None,
            first_trace_hit: false,
            bodies_hit: Vec::new(),
        }
    }

    /// A trace stopped by the navmesh
    pub fn wall_hit(point: Vec3, normal: Vec3, poly_id: u32) -> Self {
        Self {
            hit: true,
            hit_point: point,
            hit_normal: normal,
            hit_poly_id: Some(poly_id),
            first_trace_hit: false,
            bodies_hit: Vec::new(),
        }
    }

    pub fn hit_wall(&self) -> bool {
        self.hit
    }

    pub fn hit_any_body(&self) -> bool {
        !self.bodies_hit.is_empty()
    }
}

/// Narrowing bookkeeping of a body, for inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct BodyInfo {
    pub poly_id: Option<u32>,
    pub narrowing_id: Option<u32>,
    pub narrowing_available: u32,
    pub narrowing_used: u32,
    pub blocking_narrowing_id: Option<u32>,
    pub blocking_narrowing_available: u32,
    pub blocking_narrowing_used: u32,
}
