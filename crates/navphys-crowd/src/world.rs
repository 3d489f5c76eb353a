//! Handle-based registry of every simulation entity
//!
//! The world owns maps, meshes, mesh instances, regions and bodies, hands
//! out generation-checked handles for them and keeps the links between them
//! consistent: freeing an entity detaches everything that pointed at it, and
//! reloading a mesh invalidates the agents standing on it so they get
//! re-placed on the next tick.

use glam::Vec3;
use log::{debug, info, warn};
use navphys::binary_format::{load_mesh_from_binary, save_mesh_to_binary};
use navphys::{
    Agent, BodyInfo, BodyState, Loader, Mesh, MeshInstance, NarrowingPolicy, TraceOptions,
    TraceResult, MAX_TRACE_OBSTACLES,
};
use navphys_common::{
    closest_point_on_segment, np_fail_cond, np_unwrap, BodyHandle, BodyTag, Error, Handle,
    HandlePool, MapHandle, MapTag, MeshHandle, MeshInstanceHandle, MeshInstanceTag, MeshTag,
    PolySoup, RegionHandle, RegionTag, Result, SlotLink, Transform,
};
use rand::Rng;

use crate::config::SimulationConfig;
use crate::map::{usable_mesh, Map, TickContext};
use crate::region::Region;

fn invalid<T>(kind: &str, handle: Handle<T>) -> Error {
    Error::InvalidHandle(format!("{kind} {handle}"))
}

#[derive(Debug)]
pub struct World {
    maps: HandlePool<Map, MapTag>,
    meshes: HandlePool<Mesh, MeshTag>,
    mesh_instances: HandlePool<MeshInstance, MeshInstanceTag>,
    regions: HandlePool<Region, RegionTag>,
    bodies: HandlePool<Agent, BodyTag>,
    default_map: MapHandle,
    config: SimulationConfig,
}

impl World {
    pub fn new() -> Result<Self> {
        Self::with_config(SimulationConfig::default())
    }

    pub fn with_config(config: SimulationConfig) -> Result<Self> {
        let mut maps = HandlePool::new();
        let default_map = maps.insert(Map::new())?;
        Ok(Self {
            maps,
            meshes: HandlePool::new(),
            mesh_instances: HandlePool::new(),
            regions: HandlePool::new(),
            bodies: HandlePool::new(),
            default_map,
            config,
        })
    }

    /// Map that new bodies and mesh instances join
    #[inline]
    pub fn default_map(&self) -> MapHandle {
        self.default_map
    }

    #[inline]
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: SimulationConfig) {
        self.config = config;
    }

    pub fn safe_get_map(&self, handle: MapHandle) -> Option<&Map> {
        self.maps.get(handle)
    }

    pub fn safe_get_mesh(&self, handle: MeshHandle) -> Option<&Mesh> {
        self.meshes.get(handle)
    }

    pub fn safe_get_mesh_instance(&self, handle: MeshInstanceHandle) -> Option<&MeshInstance> {
        self.mesh_instances.get(handle)
    }

    pub fn safe_get_region(&self, handle: RegionHandle) -> Option<&Region> {
        self.regions.get(handle)
    }

    pub fn safe_get_body(&self, handle: BodyHandle) -> Option<&Agent> {
        self.bodies.get(handle)
    }

    pub fn num_bodies(&self) -> usize {
        self.bodies.len()
    }

    pub fn body_handles(&self) -> Vec<BodyHandle> {
        self.bodies.handles()
    }

    // Maps

    pub fn create_map(&mut self) -> Result<MapHandle> {
        self.maps.insert(Map::new())
    }

    /// Frees a map, leaving its bodies and mesh instances unattached
    pub fn free_map(&mut self, handle: MapHandle) -> Result<()> {
        np_fail_cond!(
            handle == self.default_map,
            Error::InvalidHandle("the default map cannot be freed".to_string())
        );
        let map = np_unwrap!(self.maps.remove(handle), invalid("map", handle));

        for body in map.body_handles() {
            if let Some(agent) = self.bodies.get_mut(body) {
                if let Some(instance) = agent.mesh_instance.and_then(|h| self.mesh_instances.get_mut(h)) {
                    instance.release_agent(agent);
                }
                agent.unbind();
                agent.map = None;
            }
        }
        for instance in map.mesh_instance_handles() {
            if let Some(instance) = self.mesh_instances.get_mut(instance) {
                instance.map = None;
            }
        }
        debug!("freed map {handle}");
        Ok(())
    }

    // Meshes

    pub fn create_mesh(&mut self) -> Result<MeshHandle> {
        self.meshes.insert(Mesh::default())
    }

    /// Frees a mesh; instances using it are left without one
    pub fn free_mesh(&mut self, handle: MeshHandle) -> Result<()> {
        np_fail_cond!(!self.meshes.contains(handle), invalid("mesh", handle));
        for (_, instance) in self.mesh_instances.iter_mut() {
            if instance.mesh() == Some(handle) {
                instance.link_mesh(None, None);
            }
        }
        self.meshes.remove(handle);
        Ok(())
    }

    /// Builds the mesh from a polygon soup.
    ///
    /// On failure the mesh is left empty. Either way every instance using it
    /// is relinked, so bodies standing on it get re-placed.
    pub fn mesh_load(&mut self, handle: MeshHandle, soup: &PolySoup) -> Result<()> {
        self.replace_mesh(handle, Loader::new().load(soup))
    }

    /// Replaces the mesh with one read from the binary mesh format
    pub fn mesh_load_binary(&mut self, handle: MeshHandle, bytes: &[u8]) -> Result<()> {
        self.replace_mesh(handle, load_mesh_from_binary(bytes))
    }

    pub fn mesh_save_binary(&self, handle: MeshHandle) -> Result<Vec<u8>> {
        let mesh = np_unwrap!(self.meshes.get(handle), invalid("mesh", handle));
        save_mesh_to_binary(mesh)
    }

    /// Toggles the wall of the mesh nearest to the mesh-space segment
    /// `from`..`to` between blocking and connecting. Bodies walking through a
    /// connecting wall are handed to the instance of the same map that best
    /// fits where they were heading.
    ///
    /// Only hard walls connect. Returns the wall and whether it now connects,
    /// or `None` when the nearest wall is not a hard one.
    pub fn mesh_toggle_wall_connection(
        &mut self,
        handle: MeshHandle,
        from: Vec3,
        to: Vec3,
    ) -> Result<Option<(u32, bool)>> {
        let mesh = np_unwrap!(self.meshes.get_mut(handle), invalid("mesh", handle));
        let Some(wall_id) = mesh.nearest_wall(from, to) else {
            return Ok(None);
        };
        if !mesh.is_hard_wall(wall_id) {
            debug!("wall {wall_id} of mesh {handle} nearest to {from}..{to} is not hard");
            return Ok(None);
        }
        let connecting = !mesh.is_connecting_wall(wall_id);
        mesh.set_wall_connection(wall_id, connecting)?;
        Ok(Some((wall_id, connecting)))
    }

    fn replace_mesh(&mut self, handle: MeshHandle, loaded: Result<Mesh>) -> Result<()> {
        let slot = np_unwrap!(self.meshes.get_mut(handle), invalid("mesh", handle));
        let outcome = match loaded {
            Ok(mesh) => {
                info!(
                    "mesh {handle} loaded: {} polygons, {} walls, {} narrowings",
                    mesh.num_polys(),
                    mesh.num_walls(),
                    mesh.num_narrowings()
                );
                *slot = mesh;
                Ok(())
            }
            Err(err) => {
                warn!("mesh {handle} failed to load, leaving it empty: {err}");
                *slot = Mesh::default();
                Err(err)
            }
        };

        let mesh = self.meshes.get(handle);
        for (_, instance) in self.mesh_instances.iter_mut() {
            if instance.mesh() == Some(handle) {
                instance.link_mesh(Some(handle), mesh);
            }
        }
        outcome
    }

    // Mesh instances

    /// Creates a mesh instance attached to the default map
    pub fn create_mesh_instance(&mut self) -> Result<MeshInstanceHandle> {
        let handle = self.mesh_instances.insert(MeshInstance::new())?;
        self.mesh_set_map(handle, Some(self.default_map))?;
        Ok(handle)
    }

    pub fn free_mesh_instance(&mut self, handle: MeshInstanceHandle) -> Result<()> {
        np_fail_cond!(!self.mesh_instances.contains(handle), invalid("mesh instance", handle));
        self.mesh_set_map(handle, None)?;
        self.mesh_set_region(handle, None)?;
        self.mesh_instances.remove(handle);
        Ok(())
    }

    pub fn mesh_instance_set_mesh(
        &mut self,
        handle: MeshInstanceHandle,
        mesh: Option<MeshHandle>,
    ) -> Result<()> {
        let mesh_ref = match mesh {
            Some(m) => Some(np_unwrap!(self.meshes.get(m), invalid("mesh", m))),
            None => None,
        };
        let instance = np_unwrap!(
            self.mesh_instances.get_mut(handle),
            invalid("mesh instance", handle)
        );
        instance.link_mesh(mesh, mesh_ref);
        Ok(())
    }

    /// Moves a mesh instance to another map (or none). Bodies standing on it
    /// are re-placed on their next tick.
    pub fn mesh_set_map(&mut self, handle: MeshInstanceHandle, map: Option<MapHandle>) -> Result<()> {
        if let Some(m) = map {
            np_fail_cond!(!self.maps.contains(m), invalid("map", m));
        }
        let instance = np_unwrap!(
            self.mesh_instances.get_mut(handle),
            invalid("mesh instance", handle)
        );
        if instance.map.map(|link| link.handle) == map {
            return Ok(());
        }

        if let Some(link) = instance.map.take() {
            if let Some(old) = self.maps.get_mut(link.handle) {
                old.remove_mesh_instance(link.slot);
            }
        }
        if let Some(m) = map {
            if let Some(new) = self.maps.get_mut(m) {
                let slot = new.add_mesh_instance(handle);
                instance.map = Some(SlotLink::new(m, slot));
            }
        }
        Ok(())
    }

    /// Attaches a mesh instance to a region (or none), composing the region
    /// transform over the instance's own
    pub fn mesh_set_region(
        &mut self,
        handle: MeshInstanceHandle,
        region: Option<RegionHandle>,
    ) -> Result<()> {
        if let Some(r) = region {
            np_fail_cond!(!self.regions.contains(r), invalid("region", r));
        }
        let instance = np_unwrap!(
            self.mesh_instances.get_mut(handle),
            invalid("mesh instance", handle)
        );
        if instance.region.map(|link| link.handle) == region {
            return Ok(());
        }

        if let Some(link) = instance.region.take() {
            if let Some(old) = self.regions.get_mut(link.handle) {
                old.remove_mesh_instance(link.slot);
            }
        }
        let mut region_transform = Transform::IDENTITY;
        if let Some(r) = region {
            if let Some(new) = self.regions.get_mut(r) {
                let slot = new.add_mesh_instance(handle);
                instance.region = Some(SlotLink::new(r, slot));
                region_transform = *new.transform();
            }
        }
        instance.set_region_transform(region_transform);
        Ok(())
    }

    pub fn mesh_instance_set_transform(
        &mut self,
        handle: MeshInstanceHandle,
        transform: Transform,
    ) -> Result<()> {
        let instance = np_unwrap!(
            self.mesh_instances.get_mut(handle),
            invalid("mesh instance", handle)
        );
        instance.set_transform(transform);
        Ok(())
    }

    pub fn mesh_instance_set_agent_radius(&mut self, handle: MeshInstanceHandle, radius: f32) -> Result<()> {
        let instance = np_unwrap!(
            self.mesh_instances.get_mut(handle),
            invalid("mesh instance", handle)
        );
        instance.set_agent_radius(radius);
        Ok(())
    }

    pub fn mesh_instance_set_narrowing_policy(
        &mut self,
        handle: MeshInstanceHandle,
        policy: Box<dyn NarrowingPolicy>,
    ) -> Result<()> {
        let instance = np_unwrap!(
            self.mesh_instances.get_mut(handle),
            invalid("mesh instance", handle)
        );
        instance.set_narrowing_policy(policy);
        Ok(())
    }

    // Regions

    pub fn create_region(&mut self) -> Result<RegionHandle> {
        self.regions.insert(Region::new())
    }

    pub fn free_region(&mut self, handle: RegionHandle) -> Result<()> {
        let region = np_unwrap!(self.regions.remove(handle), invalid("region", handle));
        for member in region.mesh_instance_handles() {
            if let Some(instance) = self.mesh_instances.get_mut(member) {
                instance.region = None;
                instance.set_region_transform(Transform::IDENTITY);
            }
        }
        Ok(())
    }

    /// Moves a region; every member instance follows
    pub fn region_set_transform(&mut self, handle: RegionHandle, transform: Transform) -> Result<()> {
        let region = np_unwrap!(self.regions.get_mut(handle), invalid("region", handle));
        region.set_transform(transform);
        for member in region.mesh_instance_handles() {
            if let Some(instance) = self.mesh_instances.get_mut(member) {
                instance.set_region_transform(transform);
            }
        }
        Ok(())
    }

    // Bodies

    /// Creates a body on the default map. Its priority starts out as its slot
    /// index.
    pub fn create_body(&mut self) -> Result<BodyHandle> {
        let handle = self.bodies.insert(Agent::new())?;
        if let Some(agent) = self.bodies.get_mut(handle) {
            agent.priority = (handle.index() & 0xffff) as u16;
        }
        self.body_set_map(handle, Some(self.default_map))?;
        Ok(handle)
    }

    pub fn free_body(&mut self, handle: BodyHandle) -> Result<()> {
        self.body_set_map(handle, None)?;
        self.bodies.remove(handle);
        Ok(())
    }

    /// Moves a body to another map (or none)
    pub fn body_set_map(&mut self, handle: BodyHandle, map: Option<MapHandle>) -> Result<()> {
        if let Some(m) = map {
            np_fail_cond!(!self.maps.contains(m), invalid("map", m));
        }
        let agent = np_unwrap!(self.bodies.get_mut(handle), invalid("body", handle));
        if agent.map.map(|link| link.handle) == map {
            return Ok(());
        }

        if let Some(instance) = agent.mesh_instance.and_then(|h| self.mesh_instances.get_mut(h)) {
            instance.release_agent(agent);
        }
        agent.unbind();

        if let Some(link) = agent.map.take() {
            if let Some(old) = self.maps.get_mut(link.handle) {
                old.remove_body(link.slot);
            }
        }
        if let Some(m) = map {
            if let Some(new) = self.maps.get_mut(m) {
                let slot = new.add_body(handle);
                agent.map = Some(SlotLink::new(m, slot));
            }
        }
        Ok(())
    }

    /// Requests a teleport; the body is re-placed on its map's next tick.
    ///
    /// A body that stays on its current instance keeps its binding, so a
    /// teleport onto its own position leaves it on the same polygon.
    pub fn body_teleport(&mut self, handle: BodyHandle, position: Vec3) -> Result<()> {
        let agent = np_unwrap!(self.bodies.get_mut(handle), invalid("body", handle));
        agent.teleport_target = position;
        agent.fpos3 = position;
        agent.pending_teleport = true;
        Ok(())
    }

    /// Adds a world-space impulse, consumed by the next tick
    pub fn body_add_impulse(&mut self, handle: BodyHandle, impulse: Vec3) -> Result<()> {
        let agent = np_unwrap!(self.bodies.get_mut(handle), invalid("body", handle));
        agent.fvel3 += impulse;
        Ok(())
    }

    /// Sets the carried-velocity fraction (clamped to [0, 1]) and whether the
    /// body ignores narrowing capacities
    pub fn body_set_params(&mut self, handle: BodyHandle, friction: f32, ignore_narrowings: bool) -> Result<()> {
        let agent = np_unwrap!(self.bodies.get_mut(handle), invalid("body", handle));
        agent.friction = friction.clamp(0.0, 1.0);
        agent.ignore_narrowings = ignore_narrowings;
        Ok(())
    }

    pub fn body_set_radius(&mut self, handle: BodyHandle, radius: f32) -> Result<()> {
        let agent = np_unwrap!(self.bodies.get_mut(handle), invalid("body", handle));
        agent.radius = radius.max(0.0);
        Ok(())
    }

    /// Rank used by avoidance: of an overlapping pair, the body with the
    /// larger value is pushed harder
    pub fn body_set_priority(&mut self, handle: BodyHandle, priority: u16) -> Result<()> {
        let agent = np_unwrap!(self.bodies.get_mut(handle), invalid("body", handle));
        agent.priority = priority;
        Ok(())
    }

    /// The instance and mesh a body is currently placed on
    fn placement(&self, agent: &Agent) -> Option<(&MeshInstance, &Mesh)> {
        let instance = self.mesh_instances.get(agent.mesh_instance?)?;
        if !instance.is_current(agent) {
            return None;
        }
        let mesh = usable_mesh(instance, &self.meshes)?;
        Some((instance, mesh))
    }

    /// Traces from the body towards `destination`.
    ///
    /// An unplaced body traces nothing and reports the destination as
    /// reached. With obstacles enabled, other bodies of the same map whose
    /// radius the (possibly shortened) segment passes within are reported
    /// nearest first.
    pub fn body_trace(
        &self,
        handle: BodyHandle,
        destination: Vec3,
        options: TraceOptions,
    ) -> Result<TraceResult> {
        let agent = np_unwrap!(self.bodies.get(handle), invalid("body", handle));

        let mut result = match (options.navmesh, self.placement(agent)) {
            (true, Some((instance, mesh))) => instance.body_trace(mesh, agent, destination),
            _ => TraceResult::no_hit(destination),
        };
        if options.obstacles {
            result.bodies_hit = self.trace_obstacles(handle, agent, result.hit_point);
        }
        Ok(result)
    }

    pub fn body_dual_trace(
        &self,
        handle: BodyHandle,
        intermediate: Vec3,
        destination: Vec3,
    ) -> Result<TraceResult> {
        let agent = np_unwrap!(self.bodies.get(handle), invalid("body", handle));
        Ok(match self.placement(agent) {
            Some((instance, mesh)) => instance.body_dual_trace(mesh, agent, intermediate, destination),
            None => TraceResult::no_hit(destination),
        })
    }

    fn trace_obstacles(&self, handle: BodyHandle, agent: &Agent, end: Vec3) -> Vec<BodyHandle> {
        let Some(map) = agent.map.and_then(|link| self.maps.get(link.handle)) else {
            return Vec::new();
        };
        let start = agent.fpos3;

        let mut hits: Vec<(f32, BodyHandle)> = map
            .body_handles()
            .into_iter()
            .filter(|&other| other != handle)
            .filter_map(|other| {
                let body = self.bodies.get(other)?;
                let closest = closest_point_on_segment(body.fpos3, start, end);
                (closest.distance_squared(body.fpos3) < body.radius * body.radius)
                    .then(|| (closest.distance_squared(start), other))
            })
            .collect();

        hits.sort_by(|a, b| a.0.total_cmp(&b.0));
        hits.truncate(MAX_TRACE_OBSTACLES);
        hits.into_iter().map(|(_, other)| other).collect()
    }

    pub fn body_get_info(&self, handle: BodyHandle) -> Result<BodyInfo> {
        let agent = np_unwrap!(self.bodies.get(handle), invalid("body", handle));
        Ok(self
            .placement(agent)
            .map(|(instance, mesh)| instance.agent_get_info(mesh, agent))
            .unwrap_or_default())
    }

    pub fn body_get_state(&self, handle: BodyHandle) -> Result<BodyState> {
        let agent = np_unwrap!(self.bodies.get(handle), invalid("body", handle));
        Ok(agent.body_state())
    }

    /// Random polygon center of the mesh the body stands on
    pub fn body_choose_random_location<R: Rng + ?Sized>(
        &self,
        handle: BodyHandle,
        rng: &mut R,
    ) -> Result<Option<Vec3>> {
        let agent = np_unwrap!(self.bodies.get(handle), invalid("body", handle));
        Ok(self
            .placement(agent)
            .and_then(|(instance, mesh)| instance.choose_random_location(mesh, rng)))
    }

    // Ticking

    /// Advances every map by one tick
    pub fn tick_update(&mut self) -> Result<()> {
        for map in self.maps.handles() {
            self.map_tick_update(map)?;
        }
        Ok(())
    }

    /// Advances a single map by one tick
    pub fn map_tick_update(&mut self, handle: MapHandle) -> Result<()> {
        let map = np_unwrap!(self.maps.get_mut(handle), invalid("map", handle));
        let mut ctx = TickContext {
            meshes: &self.meshes,
            mesh_instances: &mut self.mesh_instances,
            config: &self.config,
        };
        map.tick(&mut self.bodies, &mut ctx);
        Ok(())
    }
}
