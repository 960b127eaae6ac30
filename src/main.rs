//! Scrap Arena headless driver
//!
//! Loads the demo part catalog and vehicle, spawns two vehicles and feeds
//! a seeded stream of synthetic contacts through the arena. The contact
//! stream stands in for a real narrow phase.
//!
//! Usage: `scrap-arena [steps] [seed] [basic|merge-rows]`

use std::path::{Path, PathBuf};

use glam::DVec2;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;

use scrap_arena::sim::{
    ActorId, Arena, Category, ContactImpulse, ExplodeOptions, FreeBodyWorld, GridQuery,
    ScriptedContact, SpawnOptions, SteeringInput, VehicleEvent, VehicleTemplate, WorldManifold,
};
use scrap_arena::{FillAlgorithm, PartCatalog, Result, Tuning};

const DEFAULT_STEPS: u64 = 600;
const DEFAULT_SEED: u64 = 42;
/// Chance per step that some vehicle is struck
const CONTACT_CHANCE: f64 = 0.15;
/// Steps between pilot input changes
const INPUT_PERIOD: u64 = 45;
/// A vehicle below this share of its starting cells is scrapped and respawned
const WRECK_FRACTION: f64 = 0.35;

fn demo_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("demos")
}

#[cfg(not(target_arch = "wasm32"))]
fn main() {
    env_logger::init();
    log::info!("Scrap Arena (headless) starting...");

    let mut args = std::env::args().skip(1);
    let steps = args.next().and_then(|s| s.parse().ok()).unwrap_or(DEFAULT_STEPS);
    let seed = args.next().and_then(|s| s.parse().ok()).unwrap_or(DEFAULT_SEED);
    let fill = args.next().and_then(|s| FillAlgorithm::from_str(&s));

    if let Err(e) = run(steps, seed, fill) {
        log::error!("Demo failed: {}", e);
        std::process::exit(1);
    }
}

#[cfg(target_arch = "wasm32")]
fn main() {}

fn run(steps: u64, seed: u64, fill: Option<FillAlgorithm>) -> Result<()> {
    let dir = demo_dir();
    let mut tuning = Tuning::load(&dir.join("tuning.json"))?;
    if let Some(fill) = fill {
        tuning.fill_algorithm = fill;
    }
    log::info!(
        "Grid {}x{} ({} fill), seed {}",
        tuning.grid_size,
        tuning.grid_size,
        tuning.fill_algorithm.as_str(),
        seed
    );

    let parts = PartCatalog::from_json(&std::fs::read_to_string(dir.join("junkyard.json"))?)?;
    let template = VehicleTemplate::load(&dir.join("scout.json"))?;

    let physics = FreeBodyWorld::new(tuning.density);
    let mut arena = Arena::new(tuning, parts, physics);
    let wall = arena.add_static(Category::ARENA, DVec2::new(0.0, 10.0));

    let spawns = [(DVec2::new(-3.0, 0.0), 0.0), (DVec2::new(3.0, 0.0), std::f64::consts::PI)];
    let mut fleet = Vec::new();
    for (position, angle) in spawns {
        let id = arena.add_vehicle(&template)?;
        if let Some(vehicle) = arena.vehicle_mut(id) {
            vehicle.subscribe(move |event| log_vehicle_event(id, event));
        }
        arena.spawn_vehicle(
            id,
            SpawnOptions {
                position: Some(position),
                angle: Some(angle),
            },
        )?;
        let cells = arena.vehicle(id).map_or(0, |v| v.cell_count());
        fleet.push((id, position, angle, cells));
    }

    let mut rng = Pcg32::seed_from_u64(seed);
    let mut detachments = 0usize;
    let mut wrecks = 0usize;

    for step in 0..steps {
        if step % INPUT_PERIOD == 0 {
            for &(id, ..) in &fleet {
                arena.set_input(id, random_input(&mut rng))?;
            }
        }

        if rng.random_bool(CONTACT_CHANCE) {
            let (victim, ..) = fleet[rng.random_range(0..fleet.len())];
            let striker = fleet
                .iter()
                .map(|&(id, ..)| id)
                .find(|&id| id != victim && rng.random_bool(0.5))
                .unwrap_or(wall);
            if let Some(contact) = random_contact(&arena, &mut rng, striker, victim) {
                arena.physics_mut().queue_contact(contact);
            }
        }

        let report = arena.step()?;
        for (id, detached) in &report.damage {
            detachments += detached.atoms.len();
            log::debug!(
                "Step {}: vehicle {} lost {} atoms, {} gizmos",
                report.tick,
                id,
                detached.atoms.len(),
                detached.gizmos.len()
            );
        }

        for &(id, position, angle, cells) in &fleet {
            let Some(vehicle) = arena.vehicle(id) else {
                continue;
            };
            if vehicle.is_dying() {
                continue;
            }
            if vehicle.is_alive() {
                if (vehicle.cell_count() as f64) < cells as f64 * WRECK_FRACTION {
                    wrecks += 1;
                    arena.kill_vehicle(id, ExplodeOptions { spawn_scrap: true })?;
                }
            } else {
                // Exploded during the last step
                arena.spawn_vehicle(
                    id,
                    SpawnOptions {
                        position: Some(position),
                        angle: Some(angle),
                    },
                )?;
                if let Some(pilot) = arena.pilot(id) {
                    log::info!("Vehicle {} respawned, envelope {:?}", id, pilot.envelope());
                }
            }
        }
    }

    for &(id, ..) in &fleet {
        if let Some(vehicle) = arena.vehicle(id) {
            let t = vehicle.transform();
            log::info!(
                "Vehicle {}: {} cells, {} rects, at ({:.2}, {:.2}) facing {:.2}",
                id,
                vehicle.cell_count(),
                vehicle.rects().len(),
                t.position.x,
                t.position.y,
                t.angle
            );
        }
    }
    log::info!(
        "{} steps: {} atoms detached, {} vehicles wrecked",
        steps,
        detachments,
        wrecks
    );
    Ok(())
}

fn log_vehicle_event(id: ActorId, event: &VehicleEvent) {
    match event {
        VehicleEvent::ShapeLoss { atoms, gizmos } if !gizmos.is_empty() => {
            log::info!(
                "Vehicle {} lost gizmos {:?} ({} atoms)",
                id,
                gizmos,
                atoms.len()
            );
        }
        VehicleEvent::ScrapSpawn { pieces } => {
            log::debug!("Vehicle {} shed {} pieces of scrap", id, pieces.len());
        }
        VehicleEvent::Spawn | VehicleEvent::Kill => log::info!("Vehicle {} {}", id, event.name()),
        _ => {}
    }
}

fn random_input(rng: &mut Pcg32) -> SteeringInput {
    use std::f64::consts::PI;
    SteeringInput {
        face_heading: rng.random_range(-PI..PI),
        thrust_heading: rng.random_range(-PI..PI),
        thrust_power: rng.random(),
    }
}

/// A strike on a random live cell of `victim`, arriving from a random side
fn random_contact(
    arena: &Arena<FreeBodyWorld>,
    rng: &mut Pcg32,
    striker: ActorId,
    victim: ActorId,
) -> Option<ScriptedContact> {
    let vehicle = arena.vehicle(victim)?;
    let n = vehicle.grid_size();
    let live: Vec<(usize, usize)> = (0..n)
        .flat_map(|j| (0..n).map(move |i| (i, j)))
        .filter(|&(i, j)| vehicle.live_atom(i, j).is_some())
        .collect();
    if live.is_empty() {
        return None;
    }
    let (i, j) = live[rng.random_range(0..live.len())];

    // Direction of travel of the striker, into the victim
    let normal = DVec2::from_angle(rng.random_range(0.0..std::f64::consts::TAU));
    let center = vehicle.cell_world_position(DVec2::new(i as f64 + 0.5, j as f64 + 0.5));
    let point = center - normal * (vehicle.cell_size() / 2.0);
    let impulse = rng.random_range(0.5..30.0);

    Some(ScriptedContact {
        first: striker,
        second: victim,
        begin: true,
        end: true,
        point_count: 1,
        manifold: WorldManifold {
            points: [point, point],
            normal,
        },
        impulse: ContactImpulse {
            normal: [impulse, 0.0],
            tangent: [impulse * 0.1, 0.0],
        },
    })
}
