//! A mesh placed in a map
//!
//! The instance owns the placement transform and the live narrowing occupancy;
//! the mesh itself is shared and passed in by reference on every call.

use glam::{IVec2, Vec2, Vec3};
use log::{debug, warn};
use navphys_common::{
    is_equal_approx, step_towards, FixedPoint, MapTag, MeshHandle, MeshInstanceHandle, RegionTag,
    SlotLink, Transform,
};
use rand::Rng;

use crate::agent::{Agent, AgentState};
use crate::mesh::{Mesh, MoveResult, TraceOutcome};
use crate::narrowing::{AdmissionRequest, CapacityPolicy, NarrowingInstance, NarrowingPolicy};
use crate::trace::{BodyInfo, TraceResult};
use crate::MoveConfig;

/// Unit steps towards the polygon center tried when rounding leaves a
/// position just outside its polygon
const SETTLE_STEPS: usize = 4;

/// How well a position fits an instance; lower compares better
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceFit {
    pub poly_id: u32,
    pub radius_mismatch: f32,
    pub height_diff: f32,
}

impl InstanceFit {
    pub fn is_better_than(&self, other: &InstanceFit) -> bool {
        (self.radius_mismatch, self.height_diff) < (other.radius_mismatch, other.height_diff)
    }
}

/// How one movement step of an agent ended
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AgentStep {
    pub result: MoveResult,
    /// Point past a connecting wall the move was heading for. Mesh space from
    /// `iterate_agent`, world space from `tick_agent`.
    pub exit: Option<Vec3>,
}

#[derive(Debug)]
pub struct MeshInstance {
    local_transform: Transform,
    region_transform: Transform,
    transform: Transform,
    mesh: Option<MeshHandle>,
    epoch: u32,
    agent_radius: f32,
    narrowings: Vec<NarrowingInstance>,
    policy: Box<dyn NarrowingPolicy>,
    pub map: Option<SlotLink<MapTag>>,
    pub region: Option<SlotLink<RegionTag>>,
}

impl Default for MeshInstance {
    fn default() -> Self {
        Self {
            local_transform: Transform::IDENTITY,
            region_transform: Transform::IDENTITY,
            transform: Transform::IDENTITY,
            mesh: None,
            epoch: 0,
            agent_radius: 1.0,
            narrowings: Vec::new(),
            policy: Box::new(CapacityPolicy::default()),
            map: None,
            region: None,
        }
    }
}

impl MeshInstance {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn mesh(&self) -> Option<MeshHandle> {
        self.mesh
    }

    /// Changes every time the linked mesh changes; agents bound under an
    /// older epoch hold stale polygon ids
    #[inline]
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// Combined region and local transform
    #[inline]
    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    #[inline]
    pub fn local_transform(&self) -> &Transform {
        &self.local_transform
    }

    pub fn set_transform(&mut self, local: Transform) {
        self.local_transform = local;
        self.transform = self.region_transform.compose(&self.local_transform);
    }

    pub fn set_region_transform(&mut self, region: Transform) {
        self.region_transform = region;
        self.transform = self.region_transform.compose(&self.local_transform);
    }

    /// Agent radius this instance was baked for
    #[inline]
    pub fn agent_radius(&self) -> f32 {
        self.agent_radius
    }

    pub fn set_agent_radius(&mut self, radius: f32) {
        self.agent_radius = radius.max(0.0);
    }

    pub fn set_narrowing_policy(&mut self, policy: Box<dyn NarrowingPolicy>) {
        self.policy = policy;
    }

    pub fn narrowing_instance(&self, narrowing_id: u32) -> Option<&NarrowingInstance> {
        self.narrowings.get(narrowing_id as usize)
    }

    pub fn narrowing_instances(&self) -> &[NarrowingInstance] {
        &self.narrowings
    }

    /// Links a mesh (or none) and resets the narrowing occupancy
    pub fn link_mesh(&mut self, handle: Option<MeshHandle>, mesh: Option<&Mesh>) {
        self.mesh = handle;
        self.epoch = match self.epoch.wrapping_add(1) {
            0 => 1,
            epoch => epoch,
        };
        self.narrowings = vec![NarrowingInstance::default(); mesh.map_or(0, Mesh::num_narrowings)];
        debug!(
            "mesh instance linked to {:?}, epoch {}, {} narrowings",
            handle,
            self.epoch,
            self.narrowings.len()
        );
    }

    /// Whether the agent's mesh-space state belongs to the current mesh
    #[inline]
    pub fn is_current(&self, agent: &Agent) -> bool {
        agent.instance_epoch == self.epoch
    }

    /// Binds an agent to this instance; it must be placed with
    /// `place_agent` before it can move
    pub fn bind_agent(&self, handle: MeshInstanceHandle, agent: &mut Agent) {
        agent.mesh_instance = Some(handle);
        agent.instance_epoch = self.epoch;
        agent.poly_id = None;
        agent.wall_id = None;
        agent.occupied_narrowing = None;
        agent.blocking_narrowing_id = None;
        agent.block_cooldown = 0;
    }

    /// Gives back the narrowing place held by the agent and clears its
    /// polygon
    pub fn release_agent(&mut self, agent: &mut Agent) {
        if let Some(narrowing_id) = agent.occupied_narrowing.take() {
            if self.is_current(agent) {
                self.release_narrowing(narrowing_id);
            }
        }
        agent.poly_id = None;
        agent.wall_id = None;
    }

    fn release_narrowing(&mut self, narrowing_id: u32) {
        match self.narrowings.get_mut(narrowing_id as usize) {
            Some(instance) => self.policy.release(instance),
            None => warn!("release of unknown narrowing {narrowing_id}"),
        }
    }

    /// Moves the agent's narrowing bookkeeping into `poly_id`.
    ///
    /// Returns false and changes nothing when the policy refuses entry.
    fn agent_enter_poly(&mut self, mesh: &Mesh, agent: &mut Agent, poly_id: u32, force: bool) -> bool {
        let new_narrowing = mesh.poly(poly_id).narrowing_id;

        if agent.ignore_narrowings {
            if let Some(old) = agent.occupied_narrowing.take() {
                self.release_narrowing(old);
            }
            agent.poly_id = Some(poly_id);
            return true;
        }

        if new_narrowing == agent.occupied_narrowing {
            agent.poly_id = Some(poly_id);
            return true;
        }

        if let Some(narrowing_id) = new_narrowing {
            let request = AdmissionRequest {
                narrowing_id,
                available: mesh.narrowing(narrowing_id).available,
                previous_available: agent
                    .occupied_narrowing
                    .map(|old| mesh.narrowing(old).available),
                force,
            };
            let Some(instance) = self.narrowings.get_mut(narrowing_id as usize) else {
                warn!("polygon {poly_id} names narrowing {narrowing_id} this instance does not track");
                return false;
            };
            if !self.policy.try_reserve(&request, instance) {
                return false;
            }
        }

        if let Some(old) = agent.occupied_narrowing.take() {
            self.release_narrowing(old);
        }
        agent.occupied_narrowing = new_narrowing;
        agent.poly_id = Some(poly_id);
        true
    }

    /// Resolves `agent.fpos` to a polygon and places the agent there,
    /// ignoring capacity.
    ///
    /// Keeps the current polygon when it still contains the point, and the
    /// exact fixed position when `fpos` is where the agent already is, so
    /// teleporting an agent onto itself changes nothing.
    pub fn teleport_agent(&mut self, mesh: &Mesh, agent: &mut Agent, config: &MoveConfig) {
        let current = agent.poly_id.filter(|&p| (p as usize) < mesh.num_polys());
        let staying = current.is_some() && is_equal_approx(mesh.to_float(agent.pos), agent.fpos);
        if !staying {
            agent.pos = mesh.to_fixed(agent.fpos);
        }
        agent.wall_id = None;

        let current = current.filter(|&p| mesh.poly_contains_point(p, agent.pos));
        let mut target = current.or_else(|| mesh.find_poly_within(agent.pos));

        if target.is_none() {
            warn!("teleport to {:?} lands outside the navmesh", agent.fpos);
            if config.snap_outside_teleports {
                target = mesh.nearest_poly(agent.pos);
                if let Some(poly_id) = target {
                    agent.pos = mesh.poly(poly_id).center;
                }
            }
        }

        match target {
            Some(poly_id) => {
                self.agent_enter_poly(mesh, agent, poly_id, true);
                agent.height = mesh.find_height_on_poly(poly_id, agent.pos);
            }
            None => {
                self.release_agent(agent);
                agent.state = AgentState::NotWithinPolygon;
            }
        }

        let fpos = mesh.to_float(agent.pos);
        if !is_equal_approx(fpos, agent.fpos) {
            agent.fpos = fpos;
        }
    }

    /// Advances one agent by one tick in mesh space.
    ///
    /// `agent.fvel` is read as this tick's impulse and replaced with the
    /// velocity that was actually achieved.
    pub fn iterate_agent(&mut self, mesh: &Mesh, agent: &mut Agent, config: &MoveConfig) -> AgentStep {
        agent.block_cooldown = agent.block_cooldown.saturating_sub(1);
        agent.vel += mesh.vel_to_fixed(agent.fvel);

        let (result, exit) = self.advance(mesh, agent, config);

        agent.vel = agent.vel.scaled(agent.friction);
        if let Some(poly_id) = agent.poly_id {
            agent.height = mesh.find_height_on_poly(poly_id, agent.pos);
        }
        let fpos = mesh.to_float(agent.pos);
        if !is_equal_approx(fpos, agent.fpos) {
            agent.fpos = fpos;
        }
        agent.fvel = mesh.vel_to_float(agent.vel);

        AgentStep {
            result,
            exit: exit.map(|p| {
                let p = mesh.to_float(p);
                Vec3::new(p.x, agent.height, p.y)
            }),
        }
    }

    fn advance(&mut self, mesh: &Mesh, agent: &mut Agent, config: &MoveConfig) -> (MoveResult, Option<IVec2>) {
        let poly_id = match agent.poly_id {
            Some(poly_id) => poly_id,
            None => match mesh.find_poly_within(agent.pos) {
                Some(poly_id) => {
                    self.agent_enter_poly(mesh, agent, poly_id, true);
                    poly_id
                }
                None => {
                    warn!("agent at {:?} is not within any polygon", agent.fpos);
                    agent.state = AgentState::NotWithinPolygon;
                    return (MoveResult::Ok, None);
                }
            },
        };

        if agent.vel.lengthf() < config.min_agent_speed {
            return (MoveResult::Ok, None);
        }

        let old_pos = agent.pos;
        let outcome = mesh.resolve_move(agent.pos, agent.vel, poly_id, agent.wall_id, config);
        if outcome.result == MoveResult::Limit {
            debug!(
                "move from {old_pos} hit the depth ceiling, stopped at {} in polygon {}",
                outcome.pos, outcome.poly_id
            );
        }
        let (pos, new_poly) = settle(mesh, outcome.pos, outcome.poly_id).unwrap_or_else(|| {
            debug!("move ended outside the navmesh at {:?}, reverted", outcome.pos);
            (old_pos, poly_id)
        });

        let target_narrowing = mesh.poly(new_poly).narrowing_id;
        let cooling_down = !agent.ignore_narrowings
            && agent.block_cooldown > 0
            && target_narrowing.is_some()
            && target_narrowing == agent.blocking_narrowing_id
            && target_narrowing != agent.occupied_narrowing;

        if !cooling_down && self.agent_enter_poly(mesh, agent, new_poly, false) {
            agent.pos = pos;
            agent.wall_id = outcome
                .wall_id
                .filter(|&w| mesh.wall(w).poly_id == new_poly);
            agent.vel = pos - old_pos;
            agent.blocking_narrowing_id = None;
        } else {
            agent.blocking_narrowing_id = target_narrowing;
            agent.vel = IVec2::ZERO;
            agent.state = AgentState::BlockedByNarrowing;
            if !cooling_down {
                agent.block_cooldown = config.narrowing_cooldown_ticks;
            }
            return (outcome.result, None);
        }
        (outcome.result, outcome.exit)
    }

    /// World-space tick: applies pending impulse and avoidance, iterates and
    /// publishes the world position
    pub fn tick_agent(&mut self, mesh: &Mesh, agent: &mut Agent, config: &MoveConfig) -> AgentStep {
        let impulse = self
            .transform
            .inverse_xform_vector(agent.fvel3 + agent.avoidance_fvel3);
        agent.fvel = Vec2::new(impulse.x, impulse.z);

        let step = self.iterate_agent(mesh, agent, config);

        agent.fpos3 = self.to_world(agent.fpos, agent.height);
        agent.velocity3 = self
            .transform
            .xform_vector(Vec3::new(agent.fvel.x, 0.0, agent.fvel.y));
        agent.last_avoidance3 = agent.avoidance_fvel3;
        agent.avoidance_fvel3 = Vec3::ZERO;
        agent.fvel3 = Vec3::ZERO;

        AgentStep {
            result: step.result,
            exit: step.exit.map(|p| self.transform.xform_point(p)),
        }
    }

    /// Places the agent at its world-space teleport target
    pub fn place_agent(&mut self, mesh: &Mesh, agent: &mut Agent, config: &MoveConfig) {
        let local = self.transform.inverse_xform_point(agent.teleport_target);
        agent.fpos = Vec2::new(local.x, local.z);
        self.teleport_agent(mesh, agent, config);
        agent.fpos3 = self.to_world(agent.fpos, agent.height);
        agent.pending_teleport = false;
    }

    /// Binds an agent arriving through a connecting wall of another instance
    /// and places it at `world_pos`, keeping its world-space velocity
    pub fn take_over_agent(
        &mut self,
        handle: MeshInstanceHandle,
        mesh: &Mesh,
        agent: &mut Agent,
        world_pos: Vec3,
        config: &MoveConfig,
    ) {
        let velocity = agent.velocity3;
        self.bind_agent(handle, agent);
        agent.teleport_target = world_pos;
        self.place_agent(mesh, agent, config);

        let local = self.transform.inverse_xform_vector(velocity);
        agent.vel = mesh.vel_to_fixed(Vec2::new(local.x, local.z));
        agent.fvel = mesh.vel_to_float(agent.vel);
        agent.velocity3 = velocity;
    }

    fn to_world(&self, fpos: Vec2, height: f32) -> Vec3 {
        self.transform.xform_point(Vec3::new(fpos.x, height, fpos.y))
    }

    fn to_mesh_fixed(&self, mesh: &Mesh, world: Vec3) -> IVec2 {
        let local = self.transform.inverse_xform_point(world);
        mesh.to_fixed(Vec2::new(local.x, local.z))
    }

    /// Which polygon holds `world_pos`, and how well this instance suits an
    /// agent of `radius` there
    pub fn fit_for(&self, mesh: &Mesh, world_pos: Vec3, radius: f32) -> Option<InstanceFit> {
        let local = self.transform.inverse_xform_point(world_pos);
        let p = mesh.to_fixed(Vec2::new(local.x, local.z));
        let poly_id = mesh.find_poly_within(p)?;
        Some(InstanceFit {
            poly_id,
            radius_mismatch: (self.agent_radius - radius).abs(),
            height_diff: (local.y - mesh.find_height_on_poly(poly_id, p)).abs(),
        })
    }

    /// Traces from the agent towards a world-space destination along the
    /// navmesh
    pub fn body_trace(&self, mesh: &Mesh, agent: &Agent, destination: Vec3) -> TraceResult {
        let mut result = TraceResult::no_hit(destination);
        let Some(poly_id) = agent.poly_id else {
            return result;
        };
        let to = self.to_mesh_fixed(mesh, destination);
        self.apply_trace(mesh, mesh.trace_segment(agent.pos, to, poly_id), &mut result);
        result
    }

    /// Traces agent to `intermediate`, then on to `destination`.
    ///
    /// The second leg is skipped when the first one hits.
    pub fn body_dual_trace(
        &self,
        mesh: &Mesh,
        agent: &Agent,
        intermediate: Vec3,
        destination: Vec3,
    ) -> TraceResult {
        let mut result = TraceResult::no_hit(destination);
        let Some(poly_id) = agent.poly_id else {
            return result;
        };

        let mid = self.to_mesh_fixed(mesh, intermediate);
        let first = mesh.trace_segment(agent.pos, mid, poly_id);
        if !first.is_clear() {
            result.first_trace_hit = true;
            self.apply_trace(mesh, first, &mut result);
            return result;
        }

        let to = self.to_mesh_fixed(mesh, destination);
        let second = mesh.trace_segment(mid, to, first.poly_id());
        self.apply_trace(mesh, second, &mut result);
        result
    }

    fn apply_trace(&self, mesh: &Mesh, outcome: TraceOutcome, result: &mut TraceResult) {
        match outcome {
            TraceOutcome::Clear { poly_id } => {
                result.hit_poly_id = Some(poly_id);
            }
            TraceOutcome::Slide {
                poly_id,
                wall_id,
                hit_point,
            } => {
                result.hit = true;
                result.hit_point = self.fixed_to_world(mesh, poly_id, hit_point);
                result.hit_normal = self.transform.xform_normal(mesh.wall_inward_normal(wall_id));
                result.hit_poly_id = Some(poly_id);
            }
            TraceOutcome::Limit { poly_id, hit_point } => {
                result.hit = true;
                result.hit_point = self.fixed_to_world(mesh, poly_id, hit_point);
                result.hit_normal = Vec3::ZERO;
                result.hit_poly_id = Some(poly_id);
            }
        }
    }

    fn fixed_to_world(&self, mesh: &Mesh, poly_id: u32, p: IVec2) -> Vec3 {
        self.to_world(mesh.to_float(p), mesh.find_height_on_poly(poly_id, p))
    }

    pub fn agent_get_info(&self, mesh: &Mesh, agent: &Agent) -> BodyInfo {
        let stats = |narrowing_id: Option<u32>| -> (u32, u32) {
            narrowing_id
                .filter(|&n| (n as usize) < mesh.num_narrowings())
                .map(|n| {
                    let used = self.narrowings.get(n as usize).map_or(0, |i| i.used);
                    (mesh.narrowing(n).available, used)
                })
                .unwrap_or((0, 0))
        };

        let poly_id = agent.poly_id.filter(|&p| (p as usize) < mesh.num_polys());
        let narrowing_id = poly_id.and_then(|p| mesh.poly(p).narrowing_id);
        let (narrowing_available, narrowing_used) = stats(narrowing_id);
        let (blocking_narrowing_available, blocking_narrowing_used) =
            stats(agent.blocking_narrowing_id);

        BodyInfo {
            poly_id,
            narrowing_id,
            narrowing_available,
            narrowing_used,
            blocking_narrowing_id: agent.blocking_narrowing_id,
            blocking_narrowing_available,
            blocking_narrowing_used,
        }
    }

    /// Random polygon center, weighted by polygon area, in world space
    pub fn choose_random_location<R: Rng + ?Sized>(&self, mesh: &Mesh, rng: &mut R) -> Option<Vec3> {
        let total = mesh.total_area();
        if mesh.is_empty() || !(total > 0.0) {
            return None;
        }

        let mut pick = rng.gen_range(0.0..total);
        let last = mesh.num_polys() as u32 - 1;
        let poly_id = (0..last)
            .find(|&poly_id| {
                let area = mesh.poly(poly_id).area;
                if pick < area {
                    return true;
                }
                pick -= area;
                false
            })
            .unwrap_or(last);

        Some(self.transform.xform_point(mesh.poly(poly_id).center3))
    }
}

/// Pulls a position that rounding left just outside `poly_id` back inside,
/// or finds the polygon that does contain it
fn settle(mesh: &Mesh, pos: IVec2, poly_id: u32) -> Option<(IVec2, u32)> {
    if mesh.poly_contains_point(poly_id, pos) {
        return Some((pos, poly_id));
    }

    let center = mesh.poly(poly_id).center;
    let mut nudged = pos;
    for _ in 0..SETTLE_STEPS {
        nudged = step_towards(nudged, center);
        if mesh.poly_contains_point(poly_id, nudged) {
            return Some((nudged, poly_id));
        }
    }

    mesh.find_poly_within(pos).map(|found| (pos, found))
}
