//! Regions group mesh instances under one shared transform

use navphys_common::{MeshInstanceHandle, Transform, TrackedPooledList};

/// A movable frame that mesh instances can be attached to.
///
/// The region only tracks membership; the world pushes its transform into
/// each member instance whenever either side changes.
#[derive(Debug, Clone, Default)]
pub struct Region {
    transform: Transform,
    mesh_instances: TrackedPooledList<MeshInstanceHandle>,
}

impl Region {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
    }

    /// Adds a member and returns the slot it occupies
    pub fn add_mesh_instance(&mut self, handle: MeshInstanceHandle) -> u32 {
        self.mesh_instances.insert(handle)
    }

    pub fn remove_mesh_instance(&mut self, slot: u32) -> bool {
        self.mesh_instances.free(slot)
    }

    pub fn mesh_instance_handles(&self) -> Vec<MeshInstanceHandle> {
        self.mesh_instances.iter().map(|(_, h)| *h).collect()
    }

    pub fn num_mesh_instances(&self) -> usize {
        self.mesh_instances.active_len()
    }
}
