//! Maps: the unit of simulation
//!
//! A map owns the set of mesh instances bodies can stand on and the set of
//! bodies it simulates. Each tick runs the broad phase, turns overlaps into
//! avoidance pushes, keeps every body bound to the best-fitting mesh instance
//! and finally moves it.

use glam::Vec3;
use log::debug;
use navphys::{Agent, AgentState, Mesh, MeshInstance};
use navphys_common::{
    BodyHandle, BodyTag, HandlePool, MeshInstanceHandle, MeshInstanceTag, MeshTag,
    TrackedPooledList,
};

use crate::config::SimulationConfig;
use crate::sap::{Intersection, Sap};

/// Registries a map reads and updates while ticking
pub(crate) struct TickContext<'a> {
    pub meshes: &'a HandlePool<Mesh, MeshTag>,
    pub mesh_instances: &'a mut HandlePool<MeshInstance, MeshInstanceTag>,
    pub config: &'a SimulationConfig,
}

#[derive(Debug, Clone, Default)]
pub struct Map {
    mesh_instances: TrackedPooledList<MeshInstanceHandle>,
    bodies: TrackedPooledList<BodyHandle>,
    sap: Sap<BodyHandle>,
}

impl Map {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a mesh instance and returns the slot it occupies
    pub fn add_mesh_instance(&mut self, handle: MeshInstanceHandle) -> u32 {
        self.mesh_instances.insert(handle)
    }

    pub fn remove_mesh_instance(&mut self, slot: u32) -> bool {
        self.mesh_instances.free(slot)
    }

    /// Adds a body and returns the slot it occupies
    pub fn add_body(&mut self, handle: BodyHandle) -> u32 {
        self.bodies.insert(handle)
    }

    pub fn remove_body(&mut self, slot: u32) -> bool {
        self.bodies.free(slot)
    }

    pub fn mesh_instance_handles(&self) -> Vec<MeshInstanceHandle> {
        self.mesh_instances.iter().map(|(_, h)| *h).collect()
    }

    pub fn body_handles(&self) -> Vec<BodyHandle> {
        self.bodies.iter().map(|(_, h)| *h).collect()
    }

    #[inline]
    pub fn num_bodies(&self) -> usize {
        self.bodies.active_len()
    }

    #[inline]
    pub fn num_mesh_instances(&self) -> usize {
        self.mesh_instances.active_len()
    }

    /// Overlapping body pairs found by the last tick
    pub fn intersections(&self) -> &[Intersection<BodyHandle>] {
        self.sap.intersections()
    }

    /// Whether `instance` is attached to this map under `handle`
    fn owns_instance(&self, handle: MeshInstanceHandle, instance: &MeshInstance) -> bool {
        instance
            .map
            .is_some_and(|link| self.mesh_instances.get(link.slot) == Some(&handle))
    }

    pub(crate) fn tick(&mut self, bodies: &mut HandlePool<Agent, BodyTag>, ctx: &mut TickContext<'_>) {
        let handles = self.body_handles();

        let intersections = self.sap.update(
            handles
                .iter()
                .filter_map(|&h| bodies.get(h).map(|agent| (h, agent.fpos3, agent.radius))),
        );
        apply_avoidance(bodies, intersections, ctx.config);

        for handle in handles {
            let Some(agent) = bodies.get_mut(handle) else {
                continue;
            };
            agent.state = match agent.state {
                AgentState::PendingColliding => AgentState::Colliding,
                _ => AgentState::Clear,
            };
            self.iterate_body(agent, ctx);
        }
    }

    fn iterate_body(&self, agent: &mut Agent, ctx: &mut TickContext<'_>) {
        if !self.refresh_binding(agent, ctx) {
            agent.state = AgentState::NoNavMesh;
            agent.fvel3 = Vec3::ZERO;
            agent.avoidance_fvel3 = Vec3::ZERO;
            agent.velocity3 = Vec3::ZERO;
            agent.last_avoidance3 = Vec3::ZERO;
            return;
        }

        let Some(handle) = agent.mesh_instance else {
            return;
        };
        let Some(instance) = ctx.mesh_instances.get_mut(handle) else {
            return;
        };
        let Some(mesh) = usable_mesh(instance, ctx.meshes) else {
            return;
        };
        let step = instance.tick_agent(mesh, agent, &ctx.config.movement);
        if let Some(exit) = step.exit {
            self.hand_over(handle, agent, exit, ctx);
        }
    }

    /// Moves a body that walked through a connecting wall onto the instance
    /// that best fits where it was heading. Without a taker it stays where
    /// the wall stopped it.
    fn hand_over(
        &self,
        from: MeshInstanceHandle,
        agent: &mut Agent,
        exit: Vec3,
        ctx: &mut TickContext<'_>,
    ) {
        let meshes = ctx.meshes;
        let Some(to) = self.best_fit(exit, agent.radius, Some(from), ctx) else {
            return;
        };
        let Some(mesh) = ctx.mesh_instances.get(to).and_then(|i| usable_mesh(i, meshes)) else {
            return;
        };

        if let Some(instance) = ctx.mesh_instances.get_mut(from) {
            instance.release_agent(agent);
        }
        agent.unbind();
        if let Some(instance) = ctx.mesh_instances.get_mut(to) {
            debug!("body crossed from {from:?} to {to:?} at {exit}");
            instance.take_over_agent(to, mesh, agent, exit, &ctx.config.movement);
        }
    }

    /// Keeps the body bound to a live, current mesh instance of this map,
    /// re-placing it when the old binding went stale.
    ///
    /// Returns false when the map has no usable mesh instance.
    fn refresh_binding(&self, agent: &mut Agent, ctx: &mut TickContext<'_>) -> bool {
        if let Some(handle) = agent.mesh_instance {
            let valid = ctx.mesh_instances.get(handle).is_some_and(|instance| {
                self.owns_instance(handle, instance)
                    && instance.is_current(agent)
                    && usable_mesh(instance, ctx.meshes).is_some()
            });
            if valid {
                if agent.pending_teleport {
                    self.apply_teleport(handle, agent, ctx);
                }
                return true;
            }

            if let Some(instance) = ctx.mesh_instances.get_mut(handle) {
                instance.release_agent(agent);
            }
            debug!("body lost its binding to {handle:?}, re-placing at {}", agent.fpos3);
            agent.unbind();
        }

        let Some(handle) = self.best_instance_for(agent.teleport_target, agent.radius, ctx) else {
            return false;
        };
        let Some(instance) = ctx.mesh_instances.get_mut(handle) else {
            return false;
        };
        let Some(mesh) = usable_mesh(instance, ctx.meshes) else {
            return false;
        };
        instance.bind_agent(handle, agent);
        instance.place_agent(mesh, agent, &ctx.config.movement);
        true
    }

    /// Carries out a teleport requested for a body that is still bound.
    ///
    /// When the current instance still fits the target best the body is
    /// placed on it without rebinding, so it keeps its polygon when it lands
    /// where it already stands.
    fn apply_teleport(&self, current: MeshInstanceHandle, agent: &mut Agent, ctx: &mut TickContext<'_>) {
        let meshes = ctx.meshes;
        let target = agent.teleport_target;
        let handle = self
            .best_instance_for(target, agent.radius, ctx)
            .unwrap_or(current);

        if handle != current {
            if let Some(instance) = ctx.mesh_instances.get_mut(current) {
                instance.release_agent(agent);
            }
            agent.unbind();
            agent.teleport_target = target;
        }

        let Some(instance) = ctx.mesh_instances.get_mut(handle) else {
            return;
        };
        let Some(mesh) = usable_mesh(instance, meshes) else {
            return;
        };
        if handle != current {
            instance.bind_agent(handle, agent);
        }
        instance.place_agent(mesh, agent, &ctx.config.movement);
    }

    /// Picks the instance whose mesh best fits a body at `target`.
    ///
    /// Falls back to the first instance with a loaded mesh when none contains
    /// the point, so the teleport can still snap onto it.
    fn best_instance_for(
        &self,
        target: Vec3,
        radius: f32,
        ctx: &TickContext<'_>,
    ) -> Option<MeshInstanceHandle> {
        self.best_fit(target, radius, None, ctx).or_else(|| {
            self.mesh_instances
                .iter()
                .map(|(_, &handle)| handle)
                .find(|&handle| {
                    ctx.mesh_instances
                        .get(handle)
                        .and_then(|instance| usable_mesh(instance, ctx.meshes))
                        .is_some()
                })
        })
    }

    /// Instance other than `exclude` whose mesh contains `target` and fits a
    /// body of `radius` best
    fn best_fit(
        &self,
        target: Vec3,
        radius: f32,
        exclude: Option<MeshInstanceHandle>,
        ctx: &TickContext<'_>,
    ) -> Option<MeshInstanceHandle> {
        let mut best = None;

        for (_, &handle) in self.mesh_instances.iter() {
            if exclude == Some(handle) {
                continue;
            }
            let Some(instance) = ctx.mesh_instances.get(handle) else {
                continue;
            };
            let Some(mesh) = usable_mesh(instance, ctx.meshes) else {
                continue;
            };

            if let Some(fit) = instance.fit_for(mesh, target, radius) {
                let better = match &best {
                    Some((_, current)) => fit.is_better_than(current),
                    None => true,
                };
                if better {
                    best = Some((handle, fit));
                }
            }
        }

        best.map(|(handle, _)| handle)
    }
}

/// The loaded mesh behind an instance, if it has one
pub(crate) fn usable_mesh<'a>(
    instance: &MeshInstance,
    meshes: &'a HandlePool<Mesh, MeshTag>,
) -> Option<&'a Mesh> {
    instance
        .mesh()
        .and_then(|handle| meshes.get(handle))
        .filter(|mesh| !mesh.is_empty())
}

/// Pushes every overlapping pair apart in proportion to the overlap.
///
/// Priority is a rank: of a pair, the body with the larger value is pushed
/// `low_priority_push_factor` times as far, and on a tie the second one is.
fn apply_avoidance(
    bodies: &mut HandlePool<Agent, BodyTag>,
    intersections: &[Intersection<BodyHandle>],
    config: &SimulationConfig,
) {
    for hit in intersections {
        let (Some(a), Some(b)) = (bodies.get(hit.a), bodies.get(hit.b)) else {
            continue;
        };

        let radii = a.radius + b.radius;
        if radii <= 0.0 {
            continue;
        }

        let overlap = (1.0 - hit.distance / radii) * config.avoidance_push;
        let push = if hit.distance > 0.0 {
            hit.offset * (overlap / hit.distance)
        } else {
            Vec3::new(overlap, 0.0, 0.0)
        };

        let factor = config.low_priority_push_factor;
        let (scale_a, scale_b) = if a.priority > b.priority {
            (factor, 1.0)
        } else {
            (1.0, factor)
        };

        if let Some(a) = bodies.get_mut(hit.a) {
            a.avoidance_fvel3 -= push * scale_a;
            a.state = AgentState::PendingColliding;
        }
        if let Some(b) = bodies.get_mut(hit.b) {
            b.avoidance_fvel3 += push * scale_b;
            b.state = AgentState::PendingColliding;
        }
    }
}
