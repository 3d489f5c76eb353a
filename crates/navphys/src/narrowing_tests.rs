//! Narrowing capacity tests
//!
//! Uses the corridor mesh: two rooms joined by a corridor polygon that is
//! declared as a narrowing.

#[cfg(test)]
mod tests {
    use crate::test_mesh_helpers::corridor_soup;
    use crate::{Agent, AgentState, Loader, Mesh, MeshInstance, MoveConfig};
    use glam::Vec2;
    use navphys_common::Result;

    const CORRIDOR: u32 = 1;

    fn setup(capacity: u32) -> Result<(Mesh, MeshInstance)> {
        let mesh = Loader::new().load(&corridor_soup(capacity))?;
        let mut instance = MeshInstance::new();
        instance.link_mesh(None, Some(&mesh));
        Ok((mesh, instance))
    }

    fn place(instance: &mut MeshInstance, mesh: &Mesh, x: f32, z: f32) -> Agent {
        let mut agent = Agent::new();
        agent.instance_epoch = instance.epoch();
        agent.fpos = Vec2::new(x, z);
        instance.teleport_agent(mesh, &mut agent, &MoveConfig::default());
        agent
    }

    fn push(
        instance: &mut MeshInstance,
        mesh: &Mesh,
        agent: &mut Agent,
        vx: f32,
        config: &MoveConfig,
    ) {
        agent.state = AgentState::Clear;
        agent.fvel = Vec2::new(vx, 0.0);
        instance.iterate_agent(mesh, agent, config);
    }

    fn used(instance: &MeshInstance) -> u32 {
        instance.narrowing_instance(0).map_or(0, |n| n.used)
    }

    #[test]
    fn test_capacity_one_admits_one() -> Result<()> {
        let (mesh, mut instance) = setup(1)?;
        let config = MoveConfig::default();

        let mut first = place(&mut instance, &mesh, 3.5, 2.0);
        let mut second = place(&mut instance, &mesh, 3.5, 2.2);

        push(&mut instance, &mesh, &mut first, 1.0, &config);
        assert_eq!(first.poly_id, Some(CORRIDOR));
        assert_eq!(used(&instance), 1);

        let before = second.pos;
        push(&mut instance, &mesh, &mut second, 1.0, &config);
        assert_eq!(second.state, AgentState::BlockedByNarrowing);
        assert_eq!(second.poly_id, Some(0));
        assert_eq!(second.pos, before);
        assert_eq!(second.fvel, Vec2::ZERO);
        assert_eq!(second.blocking_narrowing_id, Some(0));
        assert_eq!(used(&instance), 1);

        let info = instance.agent_get_info(&mesh, &second);
        assert_eq!(info.blocking_narrowing_available, 1);
        assert_eq!(info.blocking_narrowing_used, 1);
        assert_eq!(info.narrowing_id, None);

        // the first agent leaves into the right room, freeing the place
        push(&mut instance, &mesh, &mut first, 2.5, &config);
        assert_eq!(first.poly_id, Some(2));
        assert_eq!(used(&instance), 0);

        push(&mut instance, &mesh, &mut second, 1.0, &config);
        assert_eq!(second.poly_id, Some(CORRIDOR));
        assert_eq!(second.state, AgentState::Clear);
        assert_eq!(second.blocking_narrowing_id, None);
        assert_eq!(used(&instance), 1);

        let info = instance.agent_get_info(&mesh, &second);
        assert_eq!(info.narrowing_id, Some(0));
        assert_eq!(info.narrowing_used, 1);
        Ok(())
    }

    #[test]
    fn test_teleport_forces_entry_and_release_balances() -> Result<()> {
        let (mesh, mut instance) = setup(1)?;
        let mut agents: Vec<Agent> = (0..3)
            .map(|i| place(&mut instance, &mesh, 4.5 + i as f32 * 0.5, 2.0))
            .collect();
        assert!(agents.iter().all(|a| a.poly_id == Some(CORRIDOR)));
        assert_eq!(used(&instance), 3);

        for agent in &mut agents {
            instance.release_agent(agent);
            assert_eq!(agent.poly_id, None);
        }
        assert_eq!(used(&instance), 0);
        Ok(())
    }

    #[test]
    fn test_moving_within_narrowing_keeps_count() -> Result<()> {
        let (mesh, mut instance) = setup(1)?;
        let config = MoveConfig::default();
        let mut agent = place(&mut instance, &mesh, 4.5, 2.0);
        push(&mut instance, &mesh, &mut agent, 0.5, &config);
        assert_eq!(agent.poly_id, Some(CORRIDOR));
        assert_eq!(used(&instance), 1);
        Ok(())
    }

    #[test]
    fn test_cooldown_delays_retry() -> Result<()> {
        let (mesh, mut instance) = setup(1)?;
        let config = MoveConfig::default().with_narrowing_cooldown(3);

        let mut holder = place(&mut instance, &mesh, 5.0, 2.0);
        let mut waiter = place(&mut instance, &mesh, 3.5, 2.0);

        push(&mut instance, &mesh, &mut waiter, 1.0, &config);
        assert_eq!(waiter.state, AgentState::BlockedByNarrowing);
        assert_eq!(waiter.block_cooldown, 3);

        push(&mut instance, &mesh, &mut holder, 3.0, &config);
        assert_eq!(used(&instance), 0);

        // space is free, but the waiter sits out the rest of its cooldown
        for _ in 0..2 {
            push(&mut instance, &mesh, &mut waiter, 1.0, &config);
            assert_eq!(waiter.state, AgentState::BlockedByNarrowing);
            assert_eq!(waiter.poly_id, Some(0));
        }
        push(&mut instance, &mesh, &mut waiter, 1.0, &config);
        assert_eq!(waiter.poly_id, Some(CORRIDOR));
        Ok(())
    }

    #[test]
    fn test_ignore_narrowings() -> Result<()> {
        let (mesh, mut instance) = setup(1)?;
        let config = MoveConfig::default();
        let _holder = place(&mut instance, &mesh, 5.0, 2.0);

        let mut ghost = place(&mut instance, &mesh, 3.5, 2.0);
        ghost.ignore_narrowings = true;
        push(&mut instance, &mesh, &mut ghost, 1.0, &config);
        assert_eq!(ghost.poly_id, Some(CORRIDOR));
        assert_eq!(ghost.state, AgentState::Clear);
        assert_eq!(used(&instance), 1);
        Ok(())
    }

    #[test]
    fn test_relink_resets_occupancy() -> Result<()> {
        let (mesh, mut instance) = setup(2)?;
        let mut agent = place(&mut instance, &mesh, 5.0, 2.0);
        assert_eq!(used(&instance), 1);

        let old_epoch = instance.epoch();
        instance.link_mesh(None, Some(&mesh));
        assert_ne!(instance.epoch(), old_epoch);
        assert_eq!(used(&instance), 0);

        // stale agents release nothing
        instance.release_agent(&mut agent);
        assert_eq!(used(&instance), 0);
        Ok(())
    }
}
