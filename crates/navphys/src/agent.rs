//! Agent bodies moved across the navmesh

use glam::{IVec2, Vec2, Vec3};
use navphys_common::{MapTag, MeshInstanceHandle, SlotLink};

/// Per-tick outcome reported back to whoever owns the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum AgentState {
    /// Moved (or rested) without interference
    #[default]
    Clear,
    /// Overlapped another agent during the previous avoidance pass
    Colliding,
    /// Marked by the avoidance pass, becomes `Colliding` when iterated
    PendingColliding,
    /// A narrowing refused entry this tick
    BlockedByNarrowing,
    /// The agent's position is not inside any polygon of its mesh
    NotWithinPolygon,
    /// The agent's map has no mesh instance it can be placed on
    NoNavMesh,
}

/// A moving body.
///
/// `pos`, `vel`, `fpos`, `fvel` and `height` are in the space of the mesh
/// instance the agent is bound to; the `*3` fields are world space.
#[derive(Debug, Clone)]
pub struct Agent {
    /// Fixed-point position in mesh space
    pub pos: IVec2,
    /// Fixed-point velocity in mesh space, carried between ticks
    pub vel: IVec2,
    /// Float position in mesh space (XZ)
    pub fpos: Vec2,
    /// Float velocity in mesh space (XZ)
    pub fvel: Vec2,
    /// Height on the current polygon in mesh space
    pub height: f32,

    /// Polygon the agent is inside, `None` while unresolved
    pub poly_id: Option<u32>,
    /// Hard wall the agent is sliding along
    pub wall_id: Option<u32>,

    pub state: AgentState,
    pub ignore_narrowings: bool,
    /// Narrowing that refused the most recent move
    pub blocking_narrowing_id: Option<u32>,
    /// Ticks left during which the blocking narrowing stays closed to this agent
    pub block_cooldown: u32,
    /// Narrowing this agent is currently counted in
    pub occupied_narrowing: Option<u32>,

    /// Higher values win avoidance pushes
    pub priority: u16,
    /// Fraction of velocity kept each tick, 0..=1
    pub friction: f32,
    pub radius: f32,

    /// World position
    pub fpos3: Vec3,
    /// Impulses accumulated since the last tick, world space
    pub fvel3: Vec3,
    /// Velocity achieved by the last tick, world space
    pub velocity3: Vec3,
    /// Avoidance push gathered this tick, consumed by the next iterate
    pub avoidance_fvel3: Vec3,
    /// Avoidance push applied by the last iterate
    pub last_avoidance3: Vec3,

    /// World position the agent is placed at when it next binds
    pub teleport_target: Vec3,
    pub pending_teleport: bool,

    pub map: Option<SlotLink<MapTag>>,
    pub mesh_instance: Option<MeshInstanceHandle>,
    /// Epoch of `mesh_instance` when the agent was bound to it
    pub instance_epoch: u32,
}

impl Default for Agent {
    fn default() -> Self {
        Self {
            pos: IVec2::ZERO,
            vel: IVec2::ZERO,
            fpos: Vec2::ZERO,
            fvel: Vec2::ZERO,
            height: 0.0,
            poly_id: None,
            wall_id: None,
            state: AgentState::Clear,
            ignore_narrowings: false,
            blocking_narrowing_id: None,
            block_cooldown: 0,
            occupied_narrowing: None,
            priority: 0,
            friction: 0.6,
            radius: 1.0,
            fpos3: Vec3::ZERO,
            fvel3: Vec3::ZERO,
            velocity3: Vec3::ZERO,
            avoidance_fvel3: Vec3::ZERO,
            last_avoidance3: Vec3::ZERO,
            teleport_target: Vec3::ZERO,
            pending_teleport: true,
            map: None,
            mesh_instance: None,
            instance_epoch: 0,
        }
    }
}

impl Agent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the agent currently sits inside a polygon
    #[inline]
    pub fn is_resolved(&self) -> bool {
        self.poly_id.is_some()
    }

    /// Drops the binding to the current mesh instance.
    ///
    /// Narrowing bookkeeping must already have been released.
    pub fn unbind(&mut self) {
        self.mesh_instance = None;
        self.instance_epoch = 0;
        self.poly_id = None;
        self.wall_id = None;
        self.occupied_narrowing = None;
        self.blocking_narrowing_id = None;
        self.block_cooldown = 0;
        self.teleport_target = self.fpos3;
        self.pending_teleport = true;
    }

    /// Snapshot of the world-space state
    pub fn body_state(&self) -> BodyState {
        BodyState {
            position: self.fpos3,
            velocity: self.velocity3,
            avoidance: self.last_avoidance3,
            state: self.state,
        }
    }
}

/// World-space state of a body after the last tick
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct BodyState {
    pub position: Vec3,
    pub velocity: Vec3,
    pub avoidance: Vec3,
    pub state: AgentState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_agent() {
        let agent = Agent::new();
        assert!(!agent.is_resolved());
        assert_eq!(agent.friction, 0.6);
        assert_eq!(agent.radius, 1.0);
        assert_eq!(agent.state, AgentState::Clear);
        assert!(agent.pending_teleport);
    }

    #[test]
    fn test_unbind_keeps_world_position_as_target() {
        let mut agent = Agent::new();
        agent.fpos3 = Vec3::new(3.0, 1.0, 2.0);
        agent.poly_id = Some(4);
        agent.occupied_narrowing = Some(0);
        agent.pending_teleport = false;
        agent.unbind();
        assert_eq!(agent.poly_id, None);
        assert_eq!(agent.occupied_narrowing, None);
        assert_eq!(agent.teleport_target, Vec3::new(3.0, 1.0, 2.0));
        assert!(agent.pending_teleport);
    }
}
