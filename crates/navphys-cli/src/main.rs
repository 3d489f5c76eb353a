//! CLI utility for inspecting navphys meshes and running crowd simulations

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use glam::Vec3;
use log::info;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use navphys::binary_format::{load_mesh_from_file, save_mesh_to_file};
use navphys::{AgentState, BodyState, Loader, Mesh};
use navphys_common::{MeshHandle, MeshInstanceHandle, PolySoup};
use navphys_crowd::{SimulationConfig, World};

/// A CLI utility for navphys navmesh movement and crowd simulation
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print statistics of a mesh
    Info {
        /// Input mesh (OBJ polygon soup or binary mesh)
        #[clap(long, value_parser)]
        mesh: PathBuf,
    },

    /// Load an OBJ polygon soup and save it as a binary mesh
    Convert {
        /// Input OBJ file
        #[clap(long, value_parser)]
        input: PathBuf,

        /// Output binary mesh file
        #[clap(long, value_parser)]
        output: PathBuf,

        /// Distance under which vertices are merged
        #[clap(long, default_value = "0.00001")]
        weld_tolerance: f32,
    },

    /// Run a seeded crowd of wandering bodies on a mesh
    Simulate {
        /// Input mesh (OBJ polygon soup or binary mesh)
        #[clap(long, value_parser)]
        mesh: PathBuf,

        /// Number of bodies
        #[clap(long, default_value = "32")]
        agents: u32,

        /// Number of ticks to run
        #[clap(long, default_value = "300")]
        ticks: u32,

        /// Random seed for spawn points and goals
        #[clap(long, default_value = "1")]
        seed: u64,

        /// Impulse applied towards each body's goal per tick
        #[clap(long, default_value = "0.3")]
        speed: f32,

        /// Body radius
        #[clap(long, default_value = "0.5")]
        radius: f32,

        /// Simulation config as JSON
        #[clap(long, value_parser)]
        config: Option<PathBuf>,

        /// Write the final body states as JSON
        #[clap(long, value_parser)]
        output: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct BodyReport {
    body: u32,
    #[serde(flatten)]
    state: BodyState,
    poly_id: Option<u32>,
}

fn is_obj(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("obj"))
}

fn load_mesh(path: &Path) -> Result<Mesh> {
    if is_obj(path) {
        let soup = PolySoup::from_obj(path)
            .map_err(|e| anyhow!("Failed to read {}: {}", path.display(), e))?;
        Loader::new()
            .load(&soup)
            .map_err(|e| anyhow!("Failed to build mesh: {}", e))
    } else {
        load_mesh_from_file(path).map_err(|e| anyhow!("Failed to load binary mesh: {}", e))
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Commands::Info { mesh } => print_info(&mesh),
        Commands::Convert {
            input,
            output,
            weld_tolerance,
        } => convert(&input, &output, weld_tolerance),
        Commands::Simulate {
            mesh,
            agents,
            ticks,
            seed,
            speed,
            radius,
            config,
            output,
        } => simulate(
            &mesh,
            agents,
            ticks,
            seed,
            speed,
            radius,
            config.as_deref(),
            output.as_deref(),
        ),
    }
}

fn print_info(path: &Path) -> Result<()> {
    let mesh = load_mesh(path)?;
    let mapping = mesh.mapping();
    let hard_walls = (0..mesh.num_walls() as u32)
        .filter(|&w| mesh.is_hard_wall(w))
        .count();

    println!("Mesh: {}", path.display());
    println!("  vertices:   {}", mesh.num_verts());
    println!("  polygons:   {}", mesh.num_polys());
    println!(
        "  walls:      {} ({} hard, {} connecting)",
        mesh.num_walls(),
        hard_walls,
        mesh.wall_connections().len()
    );
    println!("  narrowings: {}", mesh.num_narrowings());
    println!("  area:       {:.3}", mesh.total_area());
    println!(
        "  fixed unit: {:?} world units",
        mapping.unit_size()
    );
    Ok(())
}

fn convert(input: &Path, output: &Path, weld_tolerance: f32) -> Result<()> {
    println!("Loading polygon soup from {}...", input.display());
    let soup = PolySoup::from_obj(input)
        .map_err(|e| anyhow!("Failed to read {}: {}", input.display(), e))?;
    println!(
        "Soup loaded: {} vertices, {} polygons",
        soup.vert_count(),
        soup.poly_count()
    );

    let mesh = Loader::new()
        .with_weld_tolerance(weld_tolerance)
        .load(&soup)
        .map_err(|e| anyhow!("Failed to build mesh: {}", e))?;

    save_mesh_to_file(&mesh, output)
        .map_err(|e| anyhow!("Failed to save {}: {}", output.display(), e))?;
    println!(
        "Saved {} polygons to {}",
        mesh.num_polys(),
        output.display()
    );
    Ok(())
}

/// Random polygon center of the simulated mesh
fn random_point(
    world: &World,
    instance: MeshInstanceHandle,
    mesh: MeshHandle,
    rng: &mut ChaCha8Rng,
) -> Result<Vec3> {
    let instance = world
        .safe_get_mesh_instance(instance)
        .ok_or_else(|| anyhow!("mesh instance vanished"))?;
    let mesh = world
        .safe_get_mesh(mesh)
        .ok_or_else(|| anyhow!("mesh vanished"))?;
    instance
        .choose_random_location(mesh, rng)
        .ok_or_else(|| anyhow!("mesh has no area to spawn on"))
}

#[allow(clippy::too_many_arguments)]
fn simulate(
    mesh_path: &Path,
    agents: u32,
    ticks: u32,
    seed: u64,
    speed: f32,
    radius: f32,
    config_path: Option<&Path>,
    output: Option<&Path>,
) -> Result<()> {
    let config = match config_path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            serde_json::from_str::<SimulationConfig>(&text)
                .with_context(|| format!("Invalid config: {}", path.display()))?
        }
        None => SimulationConfig::default(),
    };

    let mut world = World::with_config(config)?;
    let mesh = world.create_mesh()?;
    if is_obj(mesh_path) {
        let soup = PolySoup::from_obj(mesh_path)
            .map_err(|e| anyhow!("Failed to read {}: {}", mesh_path.display(), e))?;
        world.mesh_load(mesh, &soup).context("Failed to build mesh")?;
    } else {
        let bytes = std::fs::read(mesh_path)
            .with_context(|| format!("Failed to read {}", mesh_path.display()))?;
        world
            .mesh_load_binary(mesh, &bytes)
            .context("Failed to load binary mesh")?;
    }
    let instance = world.create_mesh_instance()?;
    world.mesh_instance_set_mesh(instance, Some(mesh))?;

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut bodies = Vec::with_capacity(agents as usize);
    let mut goals = Vec::with_capacity(agents as usize);
    for _ in 0..agents {
        let start = random_point(&world, instance, mesh, &mut rng)?;
        let jitter = Vec3::new(rng.gen_range(-0.2..0.2), 0.0, rng.gen_range(-0.2..0.2));
        let body = world.create_body()?;
        world.body_set_radius(body, radius)?;
        world.body_teleport(body, start + jitter)?;
        bodies.push(body);
        goals.push(random_point(&world, instance, mesh, &mut rng)?);
    }
    info!("spawned {} bodies", bodies.len());

    println!("Simulating {} bodies for {} ticks...", bodies.len(), ticks);
    for _ in 0..ticks {
        for (&body, goal) in bodies.iter().zip(goals.iter_mut()) {
            let position = world.body_get_state(body)?.position;
            let to_goal = (*goal - position) * Vec3::new(1.0, 0.0, 1.0);
            if to_goal.length() < 0.5 {
                *goal = random_point(&world, instance, mesh, &mut rng)?;
                continue;
            }
            world.body_add_impulse(body, to_goal.normalize_or_zero() * speed)?;
        }
        world.tick_update()?;
    }

    let mut reports = Vec::with_capacity(bodies.len());
    for &body in &bodies {
        reports.push(BodyReport {
            body: body.raw(),
            state: world.body_get_state(body)?,
            poly_id: world.body_get_info(body)?.poly_id,
        });
    }

    let count = |state: AgentState| reports.iter().filter(|r| r.state.state == state).count();
    println!("Final states:");
    println!("  clear:               {}", count(AgentState::Clear));
    println!("  colliding:           {}", count(AgentState::Colliding));
    println!("  blocked by narrowing: {}", count(AgentState::BlockedByNarrowing));
    println!("  not within polygon:  {}", count(AgentState::NotWithinPolygon));
    println!("  no navmesh:          {}", count(AgentState::NoNavMesh));

    if let Some(output_path) = output {
        println!("Saving body states to {}...", output_path.display());
        let mut file = File::create(output_path)
            .with_context(|| format!("Failed to create output file: {}", output_path.display()))?;
        serde_json::to_writer_pretty(&mut file, &reports)?;
        writeln!(file)?;
    }

    Ok(())
}
