//! Crowd simulation on top of navphys meshes
//!
//! This crate owns every simulation entity behind generation-checked handles
//! and advances them tick by tick: overlapping bodies push each other apart,
//! each body is kept on the best-fitting mesh instance of its map and then
//! moved along the navmesh.
//!
//! # Features
//!
//! - **World Registry**: Create, link and free maps, meshes, mesh instances,
//!   regions and bodies through typed handles
//! - **Broad Phase**: Sweep-and-prune over body spheres with adaptive axis
//! - **Avoidance**: Overlap-proportional pushes weighted by body priority
//! - **Regions**: Move groups of mesh instances under one transform
//! - **Handover**: Bodies leaving through a connecting wall move on to the
//!   best-fitting neighbour instance of their map
//! - **Traces**: Navmesh traces plus optional body obstacles
//!
//! # Example
//!
//! ```rust,ignore
//! use navphys_crowd::World;
//!
//! let mut world = World::new()?;
//!
//! let mesh = world.create_mesh()?;
//! world.mesh_load(mesh, &soup)?;
//! let instance = world.create_mesh_instance()?;
//! world.mesh_instance_set_mesh(instance, Some(mesh))?;
//!
//! let body = world.create_body()?;
//! world.body_teleport(body, glam::Vec3::new(0.5, 0.0, 0.5))?;
//! world.tick_update()?;
//!
//! world.body_add_impulse(body, glam::Vec3::new(0.8, 0.0, 0.0))?;
//! world.tick_update()?;
//! let state = world.body_get_state(body)?;
//! ```
//!
//! # Architecture
//!
//! - [`World`]: Handle registry and the public operation surface
//! - [`Map`]: Bodies and mesh instances simulated together
//! - [`Region`]: Shared transform for a group of mesh instances
//! - [`Sap`]: Sweep-and-prune broad phase
//! - [`SimulationConfig`]: Avoidance and movement tuning

pub mod config;
pub mod map;
pub mod region;
pub mod sap;
pub mod world;

pub use config::*;
pub use map::*;
pub use region::*;
pub use sap::*;
pub use world::*;

pub use navphys_common::{Error, Result};

#[cfg(test)]
mod world_tests;
