//! World-level simulation tests
//!
//! Drive the full tick pipeline through the public handle API: placement,
//! avoidance, narrowings, relinking and entity lifetime.

#[cfg(test)]
mod tests {
    use crate::{SimulationConfig, World};
    use glam::Vec3;
    use navphys::test_mesh_helpers::{corridor_soup, grid_soup, single_quad_soup, two_quad_soup};
    use navphys::{AgentState, TraceOptions};
    use navphys_common::{
        BodyHandle, Error, MeshHandle, MeshInstanceHandle, PolySoup, Result, Transform,
    };
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn world_with(soup: &PolySoup) -> Result<(World, MeshHandle, MeshInstanceHandle)> {
        let mut world = World::new()?;
        let mesh = world.create_mesh()?;
        world.mesh_load(mesh, soup)?;
        let instance = world.create_mesh_instance()?;
        world.mesh_instance_set_mesh(instance, Some(mesh))?;
        Ok((world, mesh, instance))
    }

    fn spawn(world: &mut World, x: f32, z: f32) -> Result<BodyHandle> {
        let body = world.create_body()?;
        world.body_teleport(body, Vec3::new(x, 0.0, z))?;
        Ok(body)
    }

    fn position(world: &World, body: BodyHandle) -> Result<Vec3> {
        Ok(world.body_get_state(body)?.position)
    }

    #[test]
    fn test_placement_and_impulse_across_edge() -> Result<()> {
        let (mut world, _, _) = world_with(&two_quad_soup())?;
        let body = spawn(&mut world, 0.5, 0.5)?;

        world.tick_update()?;
        assert_eq!(world.body_get_info(body)?.poly_id, Some(0));
        assert_eq!(world.body_get_state(body)?.state, AgentState::Clear);
        assert!(!world.safe_get_body(body).unwrap().pending_teleport);

        world.body_add_impulse(body, Vec3::new(0.8, 0.0, 0.0))?;
        world.tick_update()?;
        assert_eq!(world.body_get_info(body)?.poly_id, Some(1));
        let pos = position(&world, body)?;
        assert!((pos - Vec3::new(1.3, 0.0, 0.5)).length() < 1e-3);
        Ok(())
    }

    #[test]
    fn test_stale_handles_are_rejected() -> Result<()> {
        let mut world = World::new()?;
        let body = world.create_body()?;
        world.free_body(body)?;

        assert!(world.safe_get_body(body).is_none());
        assert!(matches!(
            world.body_add_impulse(body, Vec3::X),
            Err(Error::InvalidHandle(_))
        ));
        assert!(world.free_body(body).is_err());

        let reused = world.create_body()?;
        assert_eq!(reused.index(), body.index());
        assert_ne!(reused, body);
        assert!(world.body_get_state(body).is_err());
        assert!(world.body_get_state(reused).is_ok());
        Ok(())
    }

    #[test]
    fn test_avoidance_pushes_larger_priority_value_harder() -> Result<()> {
        let (mut world, _, _) = world_with(&single_quad_soup(10.0))?;
        let first = spawn(&mut world, 5.0, 5.0)?;
        let second = spawn(&mut world, 5.5, 5.0)?;
        assert!(world.safe_get_body(first).unwrap().priority < world.safe_get_body(second).unwrap().priority);

        world.tick_update()?;

        // overlap (1 - 0.5 / 2) * 0.3, doubled for the larger priority value
        let a = position(&world, first)?;
        let b = position(&world, second)?;
        assert!((5.0 - a.x - 0.225).abs() < 0.01);
        assert!((b.x - 5.5 - 0.45).abs() < 0.01);
        assert!((a.z - 5.0).abs() < 0.01);

        for body in [first, second] {
            assert_eq!(world.body_get_state(body)?.state, AgentState::Colliding);
        }
        assert!(world.body_get_state(first)?.avoidance.x < 0.0);
        assert_eq!(world.safe_get_map(world.default_map()).unwrap().intersections().len(), 1);
        Ok(())
    }

    #[test]
    fn test_raised_priority_value_is_pushed_harder() -> Result<()> {
        let (mut world, _, _) = world_with(&single_quad_soup(10.0))?;
        let first = spawn(&mut world, 5.0, 5.0)?;
        let second = spawn(&mut world, 5.5, 5.0)?;
        world.body_set_priority(first, 100)?;

        world.tick_update()?;
        let a = position(&world, first)?;
        let b = position(&world, second)?;
        assert!((5.0 - a.x - 0.45).abs() < 0.01);
        assert!((b.x - 5.5 - 0.225).abs() < 0.01);
        Ok(())
    }

    #[test]
    fn test_equal_priorities_push_second_body_harder() -> Result<()> {
        let (mut world, _, _) = world_with(&single_quad_soup(10.0))?;
        let first = spawn(&mut world, 5.0, 5.0)?;
        let second = spawn(&mut world, 5.5, 5.0)?;
        for body in [first, second] {
            world.body_set_priority(body, 7)?;
        }

        world.tick_update()?;
        let hit = world.safe_get_map(world.default_map()).unwrap().intersections()[0];
        let (pushed, held) = (position(&world, hit.b)?, position(&world, hit.a)?);
        let moved = |p: Vec3| (p.x - 5.0).abs().min((p.x - 5.5).abs());
        assert!((moved(pushed) - 0.45).abs() < 0.01);
        assert!((moved(held) - 0.225).abs() < 0.01);
        Ok(())
    }

    #[test]
    fn test_teleport_onto_own_position_keeps_polygon() -> Result<()> {
        let (mut world, _, instance) = world_with(&two_quad_soup())?;
        let body = spawn(&mut world, 1.25, 0.5)?;
        world.body_set_params(body, 0.0, false)?;
        world.tick_update()?;
        assert_eq!(world.body_get_info(body)?.poly_id, Some(1));

        // comes to rest on the shared edge, still owned by the right quad
        world.body_add_impulse(body, Vec3::new(-0.249988, 0.0, 0.0))?;
        world.tick_update()?;
        assert_eq!(world.body_get_info(body)?.poly_id, Some(1));
        let resting = position(&world, body)?;
        assert!((resting.x - 1.0).abs() < 1e-3);

        world.body_teleport(body, resting)?;
        world.tick_update()?;
        assert_eq!(world.body_get_info(body)?.poly_id, Some(1));
        assert_eq!(world.safe_get_body(body).unwrap().mesh_instance, Some(instance));
        assert!((position(&world, body)? - resting).length() < 1e-5);
        Ok(())
    }

    #[test]
    fn test_teleport_moves_body_to_other_instance() -> Result<()> {
        let (mut world, mesh, near) = world_with(&single_quad_soup(1.0))?;
        let far = world.create_mesh_instance()?;
        world.mesh_instance_set_mesh(far, Some(mesh))?;
        world.mesh_instance_set_transform(far, Transform::from_translation(Vec3::new(10.0, 0.0, 0.0)))?;

        let body = spawn(&mut world, 0.5, 0.5)?;
        world.tick_update()?;
        assert_eq!(world.safe_get_body(body).unwrap().mesh_instance, Some(near));

        world.body_teleport(body, Vec3::new(10.25, 0.0, 0.5))?;
        world.tick_update()?;
        assert_eq!(world.safe_get_body(body).unwrap().mesh_instance, Some(far));
        assert!((position(&world, body)? - Vec3::new(10.25, 0.0, 0.5)).length() < 1e-3);
        Ok(())
    }

    #[test]
    fn test_connecting_wall_hands_body_to_neighbour_instance() -> Result<()> {
        let (mut world, mesh, left) = world_with(&single_quad_soup(1.0))?;
        let right = world.create_mesh_instance()?;
        world.mesh_instance_set_mesh(right, Some(mesh))?;
        world.mesh_instance_set_transform(right, Transform::from_translation(Vec3::new(1.0, 0.0, 0.0)))?;

        let body = spawn(&mut world, 0.5, 0.5)?;
        world.body_set_params(body, 0.0, false)?;
        world.tick_update()?;
        assert_eq!(world.safe_get_body(body).unwrap().mesh_instance, Some(left));

        // a plain hard wall holds the body at the seam
        world.body_add_impulse(body, Vec3::new(1.0, 0.0, 0.0))?;
        world.tick_update()?;
        assert!((position(&world, body)?.x - 1.0).abs() < 1e-3);
        assert_eq!(world.safe_get_body(body).unwrap().mesh_instance, Some(left));

        let toggled =
            world.mesh_toggle_wall_connection(mesh, Vec3::new(1.0, 0.0, 0.2), Vec3::new(1.0, 0.0, 0.8))?;
        let (wall, connecting) = toggled.unwrap();
        assert!(connecting);
        assert!(world.safe_get_mesh(mesh).unwrap().is_connecting_wall(wall));

        world.body_add_impulse(body, Vec3::new(0.5, 0.0, 0.0))?;
        world.tick_update()?;
        assert_eq!(world.safe_get_body(body).unwrap().mesh_instance, Some(right));
        assert_eq!(world.body_get_info(body)?.poly_id, Some(0));
        assert!((position(&world, body)? - Vec3::new(1.5, 0.0, 0.5)).length() < 1e-3);

        // the new instance moves it on from there
        world.body_add_impulse(body, Vec3::new(0.3, 0.0, 0.0))?;
        world.tick_update()?;
        assert!((position(&world, body)?.x - 1.8).abs() < 1e-3);

        // toggling again closes the seam
        let toggled =
            world.mesh_toggle_wall_connection(mesh, Vec3::new(1.0, 0.0, 0.2), Vec3::new(1.0, 0.0, 0.8))?;
        assert_eq!(toggled, Some((wall, false)));
        Ok(())
    }

    #[test]
    fn test_only_hard_walls_toggle() -> Result<()> {
        let (mut world, mesh, _) = world_with(&two_quad_soup())?;
        // the shared edge links two polygons
        let toggled =
            world.mesh_toggle_wall_connection(mesh, Vec3::new(1.0, 0.0, 0.3), Vec3::new(1.0, 0.0, 0.7))?;
        assert_eq!(toggled, None);
        assert!(world.safe_get_mesh(mesh).unwrap().wall_connections().is_empty());

        let stale = MeshHandle::from_parts(40, 1);
        assert!(matches!(
            world.mesh_toggle_wall_connection(stale, Vec3::ZERO, Vec3::X),
            Err(Error::InvalidHandle(_))
        ));
        Ok(())
    }


    #[test]
    fn test_separated_bodies_stay_clear() -> Result<()> {
        let (mut world, _, _) = world_with(&single_quad_soup(10.0))?;
        let first = spawn(&mut world, 2.0, 2.0)?;
        let second = spawn(&mut world, 6.0, 6.0)?;
        world.tick_update()?;
        for body in [first, second] {
            let state = world.body_get_state(body)?;
            assert_eq!(state.state, AgentState::Clear);
            assert_eq!(state.avoidance, Vec3::ZERO);
        }
        Ok(())
    }

    #[test]
    fn test_narrowing_blocks_second_body() -> Result<()> {
        let (mut world, _, _) = world_with(&corridor_soup(1))?;
        let first = spawn(&mut world, 3.5, 2.0)?;
        let second = spawn(&mut world, 3.5, 1.8)?;
        for body in [first, second] {
            world.body_set_radius(body, 0.05)?;
        }
        world.tick_update()?;

        for body in [first, second] {
            world.body_add_impulse(body, Vec3::new(1.0, 0.0, 0.0))?;
        }
        let before = position(&world, second)?;
        world.tick_update()?;

        let info = world.body_get_info(first)?;
        assert_eq!(info.poly_id, Some(1));
        assert_eq!(info.narrowing_id, Some(0));
        assert_eq!(info.narrowing_used, 1);

        let info = world.body_get_info(second)?;
        assert_eq!(info.poly_id, Some(0));
        assert_eq!(info.blocking_narrowing_id, Some(0));
        assert_eq!(info.blocking_narrowing_used, 1);
        assert_eq!(world.body_get_state(second)?.state, AgentState::BlockedByNarrowing);
        assert!((position(&world, second)? - before).length() < 1e-3);
        Ok(())
    }

    #[test]
    fn test_mesh_reload_replaces_bodies() -> Result<()> {
        let (mut world, mesh, instance) = world_with(&corridor_soup(1))?;
        let body = spawn(&mut world, 5.0, 2.0)?;
        world.tick_update()?;
        assert_eq!(world.body_get_info(body)?.narrowing_used, 1);

        let epoch = world.safe_get_mesh_instance(instance).unwrap().epoch();
        world.mesh_load(mesh, &corridor_soup(1))?;
        assert_ne!(world.safe_get_mesh_instance(instance).unwrap().epoch(), epoch);
        // stale until the next tick re-places it
        assert_eq!(world.body_get_info(body)?.poly_id, None);

        world.tick_update()?;
        let info = world.body_get_info(body)?;
        assert_eq!(info.poly_id, Some(1));
        assert_eq!(info.narrowing_used, 1);
        assert!((position(&world, body)? - Vec3::new(5.0, 0.0, 2.0)).length() < 1e-3);
        Ok(())
    }

    #[test]
    fn test_failed_load_empties_mesh() -> Result<()> {
        let (mut world, mesh, _) = world_with(&two_quad_soup())?;
        let body = spawn(&mut world, 0.5, 0.5)?;
        world.tick_update()?;

        assert!(world.mesh_load(mesh, &PolySoup::new()).is_err());
        assert!(world.safe_get_mesh(mesh).unwrap().is_empty());

        world.tick_update()?;
        assert_eq!(world.body_get_state(body)?.state, AgentState::NoNavMesh);
        assert_eq!(world.body_get_info(body)?.poly_id, None);
        Ok(())
    }

    #[test]
    fn test_binary_mesh_through_world() -> Result<()> {
        let (mut world, mesh, _) = world_with(&grid_soup(3, 2, 1.0))?;
        let bytes = world.mesh_save_binary(mesh)?;

        let copy = world.create_mesh()?;
        world.mesh_load_binary(copy, &bytes)?;
        assert_eq!(world.safe_get_mesh(copy).unwrap().num_polys(), 6);

        assert!(world.mesh_load_binary(copy, &bytes[..8]).is_err());
        assert!(world.safe_get_mesh(copy).unwrap().is_empty());
        Ok(())
    }

    #[test]
    fn test_region_moves_member_instances() -> Result<()> {
        let (mut world, _, instance) = world_with(&two_quad_soup())?;
        let region = world.create_region()?;
        world.region_set_transform(region, Transform::from_translation(Vec3::new(10.0, 0.0, 0.0)))?;
        world.mesh_set_region(instance, Some(region))?;

        let body = spawn(&mut world, 10.5, 0.5)?;
        world.tick_update()?;
        assert_eq!(world.body_get_info(body)?.poly_id, Some(0));

        world.region_set_transform(region, Transform::from_translation(Vec3::new(20.0, 0.0, 0.0)))?;
        world.tick_update()?;
        assert!((position(&world, body)? - Vec3::new(20.5, 0.0, 0.5)).length() < 1e-3);

        world.free_region(region)?;
        assert!(world.safe_get_mesh_instance(instance).unwrap().region.is_none());
        assert!(world
            .safe_get_mesh_instance(instance)
            .unwrap()
            .transform()
            .is_identity());
        Ok(())
    }

    #[test]
    fn test_body_on_map_without_meshes() -> Result<()> {
        let (mut world, _, _) = world_with(&two_quad_soup())?;
        let body = spawn(&mut world, 0.5, 0.5)?;
        let other = world.create_map()?;
        world.body_set_map(body, Some(other))?;
        assert_eq!(world.safe_get_map(world.default_map()).unwrap().num_bodies(), 0);
        assert_eq!(world.safe_get_map(other).unwrap().num_bodies(), 1);

        world.tick_update()?;
        assert_eq!(world.body_get_state(body)?.state, AgentState::NoNavMesh);

        world.free_map(other)?;
        assert!(world.safe_get_body(body).unwrap().map.is_none());
        assert!(world.free_map(world.default_map()).is_err());
        Ok(())
    }

    #[test]
    fn test_freeing_instance_unplaces_bodies() -> Result<()> {
        let (mut world, _, instance) = world_with(&two_quad_soup())?;
        let body = spawn(&mut world, 0.5, 0.5)?;
        world.tick_update()?;

        world.free_mesh_instance(instance)?;
        assert_eq!(world.safe_get_map(world.default_map()).unwrap().num_mesh_instances(), 0);
        world.tick_update()?;
        assert_eq!(world.body_get_state(body)?.state, AgentState::NoNavMesh);
        Ok(())
    }

    #[test]
    fn test_obstacle_trace() -> Result<()> {
        let (mut world, _, _) = world_with(&single_quad_soup(10.0))?;
        let tracer = spawn(&mut world, 1.0, 5.0)?;
        let near = spawn(&mut world, 5.0, 5.3)?;
        let far = spawn(&mut world, 8.0, 5.0)?;
        world.tick_update()?;

        let options = TraceOptions::default().with_obstacles(true);
        let result = world.body_trace(tracer, Vec3::new(9.5, 0.0, 5.0), options)?;
        assert!(!result.hit);
        assert_eq!(result.bodies_hit, vec![near, far]);

        let short = world.body_trace(tracer, Vec3::new(3.0, 0.0, 5.0), options)?;
        assert!(short.bodies_hit.is_empty());

        let walls_only = world.body_trace(tracer, Vec3::new(9.5, 0.0, 5.0), TraceOptions::navmesh_only())?;
        assert!(walls_only.bodies_hit.is_empty());

        // the wall shortens the segment before obstacles are gathered
        let blocked = world.body_trace(far, Vec3::new(14.0, 0.0, 5.0), options)?;
        assert!(blocked.hit);
        assert!((blocked.hit_point.x - 10.0).abs() < 1e-3);
        assert!(blocked.bodies_hit.is_empty());
        Ok(())
    }

    #[test]
    fn test_dual_trace_and_unplaced_queries() -> Result<()> {
        let (mut world, _, _) = world_with(&two_quad_soup())?;
        let body = spawn(&mut world, 0.5, 0.5)?;

        let mut rng = ChaCha8Rng::seed_from_u64(3);
        assert!(world.body_choose_random_location(body, &mut rng)?.is_none());
        let unplaced = world.body_trace(body, Vec3::new(0.5, 0.0, 4.0), TraceOptions::default())?;
        assert!(!unplaced.hit);

        world.tick_update()?;
        let result = world.body_dual_trace(body, Vec3::new(0.5, 0.0, -3.0), Vec3::new(1.5, 0.0, 0.5))?;
        assert!(result.first_trace_hit);
        assert!(world.body_choose_random_location(body, &mut rng)?.is_some());
        Ok(())
    }

    #[test]
    fn test_params_are_clamped() -> Result<()> {
        let mut world = World::new()?;
        let body = world.create_body()?;
        world.body_set_params(body, 2.0, true)?;
        let agent = world.safe_get_body(body).unwrap();
        assert_eq!(agent.friction, 1.0);
        assert!(agent.ignore_narrowings);
        Ok(())
    }

    #[test]
    fn test_ticks_are_reproducible() -> Result<()> {
        let run = || -> Result<Vec<Vec3>> {
            let (mut world, _, _) = world_with(&grid_soup(6, 6, 2.0))?;
            world.set_config(SimulationConfig::default().with_avoidance_push(0.5));
            let mut rng = ChaCha8Rng::seed_from_u64(99);
            let bodies: Vec<BodyHandle> = (0..16)
                .map(|_| {
                    let x = rng.gen_range(0.5..11.5);
                    let z = rng.gen_range(0.5..11.5);
                    spawn(&mut world, x, z)
                })
                .collect::<Result<_>>()?;

            for _ in 0..50 {
                for &body in &bodies {
                    let impulse = Vec3::new(rng.gen_range(-1.0..1.0), 0.0, rng.gen_range(-1.0..1.0));
                    world.body_add_impulse(body, impulse)?;
                }
                world.tick_update()?;
            }
            bodies.iter().map(|&b| position(&world, b)).collect()
        };

        let first = run()?;
        assert_eq!(first, run()?);
        for p in first {
            assert!((-0.01..=12.01).contains(&p.x) && (-0.01..=12.01).contains(&p.z));
        }
        Ok(())
    }
}
