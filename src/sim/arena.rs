//! Arena: vehicles, collision routing and the per-step ordering
//!
//! One `step` runs, in order:
//! 0. explode vehicles killed since the last step
//! 1. push pending collision shapes to the physics backend
//! 2. integrate (the backend reports contacts to the router)
//! 3. read body transforms back into the vehicle models
//! 4. fire collision events; damage and cascades resolve here
//! 5. allocate thruster coefficients from each pilot's input
//! 6. apply thruster forces
//!
//! Damage from every collision of a step is applied before that step's
//! thruster allocation and before the next integration.

use std::collections::BTreeMap;

use glam::DVec2;

use super::collision::{ActorId, Category, CollisionRouter};
use super::impact::{COLLISION_DAMAGE_EVENT, ImpactDamage};
use super::physics::{BodyState, PhysicsBackend};
use super::template::VehicleTemplate;
use super::thruster::{MouseLookPilot, Steering, SteeringInput, thruster_forces};
use super::vehicle::{Detached, ExplodeOptions, SpawnOptions, VehicleModel};
use crate::catalog::PartCatalog;
use crate::error::{ArenaError, Result, Transition};
use crate::settings::Tuning;

#[derive(Debug)]
struct VehicleSlot {
    model: VehicleModel,
    pilot: MouseLookPilot,
    input: SteeringInput,
    body: BodyState,
    /// Set by `kill_vehicle`; the vehicle is dying until it runs
    explosion: Option<ExplodeOptions>,
}

/// A collision event other than vehicle damage that fired this step
#[derive(Debug, Clone, PartialEq)]
pub struct FiredEvent {
    pub actor: ActorId,
    pub event: String,
    pub other: Option<ActorId>,
}

/// What happened during one step
#[derive(Debug, Default)]
pub struct StepReport {
    pub tick: u64,
    /// Parts each vehicle lost to collisions
    pub damage: Vec<(ActorId, Detached)>,
    pub steering: Vec<(ActorId, Steering)>,
    pub fired: Vec<FiredEvent>,
    /// Thruster forces handed to the backend
    pub forces_applied: usize,
}

pub struct Arena<P: PhysicsBackend> {
    tuning: Tuning,
    parts: PartCatalog,
    physics: P,
    router: CollisionRouter,
    /// Keyed by actor id for a stable update order
    vehicles: BTreeMap<ActorId, VehicleSlot>,
    impact: ImpactDamage,
    next_actor: u32,
    tick: u64,
}

impl<P: PhysicsBackend> Arena<P> {
    pub fn new(tuning: Tuning, mut parts: PartCatalog, physics: P) -> Self {
        parts.freeze();
        let impact = ImpactDamage::new(&tuning);
        Self {
            tuning,
            parts,
            physics,
            router: CollisionRouter::new(),
            vehicles: BTreeMap::new(),
            impact,
            next_actor: 1,
            tick: 0,
        }
    }

    // === Accessors ===

    pub fn tuning(&self) -> &Tuning {
        &self.tuning
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn physics(&self) -> &P {
        &self.physics
    }

    pub fn physics_mut(&mut self) -> &mut P {
        &mut self.physics
    }

    pub fn router(&self) -> &CollisionRouter {
        &self.router
    }

    pub fn vehicle(&self, id: ActorId) -> Option<&VehicleModel> {
        self.vehicles.get(&id).map(|s| &s.model)
    }

    pub fn vehicle_mut(&mut self, id: ActorId) -> Option<&mut VehicleModel> {
        self.vehicles.get_mut(&id).map(|s| &mut s.model)
    }

    pub fn pilot(&self, id: ActorId) -> Option<&MouseLookPilot> {
        self.vehicles.get(&id).map(|s| &s.pilot)
    }

    pub fn vehicle_ids(&self) -> impl Iterator<Item = ActorId> + '_ {
        self.vehicles.keys().copied()
    }

    fn slot_mut(&mut self, id: ActorId) -> Result<&mut VehicleSlot> {
        self.vehicles.get_mut(&id).ok_or(ArenaError::UnknownActor(id.0))
    }

    // === Actors ===

    fn allocate_actor(&mut self) -> ActorId {
        let id = ActorId(self.next_actor);
        self.next_actor += 1;
        id
    }

    /// Non-vehicle body such as a wall
    pub fn add_static(&mut self, category: Category, position: DVec2) -> ActorId {
        let id = self.allocate_actor();
        self.router.add_actor(id, category);
        self.physics.add_body(id, position, 0.0);
        id
    }

    /// Load a vehicle. It has a body but takes no part in the simulation
    /// until spawned.
    pub fn add_vehicle(&mut self, template: &VehicleTemplate) -> Result<ActorId> {
        let id = self.allocate_actor();
        let mut model = VehicleModel::new(id.0, &self.tuning);
        model.load(template, &self.parts)?;

        self.router.add_actor(id, Category::VEHICLE);
        self.router.register_collision_event(id, COLLISION_DAMAGE_EVENT)?;
        self.physics.add_body(id, DVec2::ZERO, 0.0);

        let mut pilot = MouseLookPilot::new(&self.tuning);
        pilot.refresh(&model);
        self.vehicles.insert(
            id,
            VehicleSlot {
                model,
                pilot,
                input: SteeringInput::default(),
                body: BodyState::default(),
                explosion: None,
            },
        );
        Ok(id)
    }

    pub fn spawn_vehicle(&mut self, id: ActorId, opts: SpawnOptions) -> Result<()> {
        let slot = self
            .vehicles
            .get_mut(&id)
            .ok_or(ArenaError::UnknownActor(id.0))?;
        slot.model.spawn(opts)?;
        slot.input = SteeringInput {
            face_heading: slot.model.transform().angle,
            thrust_heading: slot.model.transform().angle,
            thrust_power: 0,
        };

        let transform = *slot.model.transform();
        self.physics.reset_body(id, transform.position, transform.angle);
        // The center of mass must be current before the first step
        let geometry = *slot.model.geometry();
        if let Some(rects) = slot.model.take_shape_update() {
            self.physics.update_shape(id, rects, &geometry);
        }
        if let Some(state) = self.physics.body_state(id) {
            slot.body = state;
        }
        Ok(())
    }

    /// The vehicle stops taking hits right away and explodes at the start
    /// of the next step
    pub fn kill_vehicle(&mut self, id: ActorId, opts: ExplodeOptions) -> Result<()> {
        let slot = self.slot_mut(id)?;
        if !slot.model.is_alive() || slot.model.is_dying() {
            return Err(ArenaError::Lifecycle {
                vehicle: id.0,
                transition: Transition::Kill,
                reason: "vehicle is already dead or dying",
            });
        }
        slot.model.mark_dying();
        slot.explosion = Some(opts);
        Ok(())
    }

    /// Unload a dead vehicle and drop its body
    pub fn remove_vehicle(&mut self, id: ActorId) -> Result<()> {
        self.slot_mut(id)?.model.unload()?;
        self.vehicles.remove(&id);
        self.router.remove_actor(id);
        self.physics.remove_body(id);
        log::info!("Vehicle {} removed from the arena", id);
        Ok(())
    }

    pub fn set_input(&mut self, id: ActorId, input: SteeringInput) -> Result<()> {
        self.slot_mut(id)?.input = input;
        Ok(())
    }

    /// Listen for an extra collision event on any actor; fired events
    /// are listed in the step report
    pub fn register_collision_event(&mut self, id: ActorId, name: &str) -> Result<bool> {
        self.router.register_collision_event(id, name)
    }

    pub fn unregister_collision_event(&mut self, id: ActorId, name: &str) -> bool {
        // Vehicle damage stays wired for as long as the vehicle exists
        if name == COLLISION_DAMAGE_EVENT && self.vehicles.contains_key(&id) {
            return false;
        }
        self.router.unregister_collision_event(id, name)
    }

    // === Simulation ===

    pub fn step(&mut self) -> Result<StepReport> {
        let mut report = StepReport {
            tick: self.tick,
            ..Default::default()
        };

        for (&id, slot) in self.vehicles.iter_mut() {
            if let Some(opts) = slot.explosion.take() {
                slot.model.explode(opts)?;
                log::debug!("Vehicle {} exploded", id);
            }
        }

        self.sync_shapes();
        self.physics.step(self.tuning.dt, &mut self.router);

        for (&id, slot) in self.vehicles.iter_mut() {
            if let Some(state) = self.physics.body_state(id) {
                slot.model.set_transform(state.position, state.angle);
                slot.body = state;
            }
        }

        let vehicles = &mut self.vehicles;
        let impact = &mut self.impact;
        self.router.fire_collision_events(|dispatch| {
            if dispatch.event != COLLISION_DAMAGE_EVENT {
                report.fired.push(FiredEvent {
                    actor: dispatch.actor,
                    event: dispatch.event.to_string(),
                    other: dispatch.report.other,
                });
                return;
            }
            let Some(slot) = vehicles.get_mut(&dispatch.actor) else {
                return;
            };
            if let Some(detached) = impact.handle(&mut slot.model, dispatch.report) {
                if !detached.is_empty() {
                    report.damage.push((dispatch.actor, detached));
                }
            }
        })?;

        for (&id, slot) in self.vehicles.iter_mut() {
            if !slot.model.is_alive() {
                continue;
            }
            let steering = slot.pilot.steer(&mut slot.model, &slot.body, &slot.input);
            report.steering.push((id, steering));

            for (force, point) in thruster_forces(&slot.model) {
                self.physics.apply_force(id, force, point);
                report.forces_applied += 1;
            }
        }

        self.tick += 1;
        Ok(report)
    }

    /// Hand every changed collision shape to the backend
    fn sync_shapes(&mut self) {
        for (&id, slot) in self.vehicles.iter_mut() {
            let geometry = *slot.model.geometry();
            if let Some(rects) = slot.model.take_shape_update() {
                log::debug!("Vehicle {} shape rebuilt: {} rects", id, rects.len());
                self.physics.update_shape(id, rects, &geometry);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::FillAlgorithm;
    use crate::sim::collision::{ContactImpulse, WorldManifold};
    use crate::sim::damage::Hit;
    use crate::sim::physics::{FreeBodyWorld, ScriptedContact};
    use crate::sim::rect::CellRect;
    use crate::sim::template::GizmoInstance;
    use crate::sim::testing::{parts, record, ship, tuning};
    use crate::sim::vehicle::{GridGeometry, VehicleEvent};

    /// Free-body world that remembers every request
    #[derive(Default)]
    struct RecordingBackend {
        world: FreeBodyWorld,
        shapes: Vec<(ActorId, Vec<CellRect>)>,
        forces: Vec<(ActorId, DVec2, DVec2)>,
        steps: usize,
    }

    impl PhysicsBackend for RecordingBackend {
        fn add_body(&mut self, actor: ActorId, position: DVec2, angle: f64) {
            self.world.add_body(actor, position, angle);
        }
        fn remove_body(&mut self, actor: ActorId) -> bool {
            self.world.remove_body(actor)
        }
        fn update_shape(&mut self, actor: ActorId, rects: &[CellRect], geometry: &GridGeometry) {
            self.shapes.push((actor, rects.to_vec()));
            self.world.update_shape(actor, rects, geometry);
        }
        fn reset_body(&mut self, actor: ActorId, position: DVec2, angle: f64) {
            self.world.reset_body(actor, position, angle);
        }
        fn body_state(&self, actor: ActorId) -> Option<BodyState> {
            self.world.body_state(actor)
        }
        fn apply_force(&mut self, actor: ActorId, force: DVec2, point: DVec2) {
            self.forces.push((actor, force, point));
            self.world.apply_force(actor, force, point);
        }
        fn step(&mut self, dt: f64, router: &mut CollisionRouter) {
            self.steps += 1;
            self.world.step(dt, router);
        }
    }

    fn backend() -> RecordingBackend {
        RecordingBackend {
            world: FreeBodyWorld::new(1.0),
            ..Default::default()
        }
    }

    /// 2x2 block: core top left, a weak atom top right, sturdy hull below
    fn square() -> VehicleTemplate {
        VehicleTemplate::from_rows(&["12", "33"], 2, &[(1, 20.0), (2, 5.0), (3, 20.0)])
            .with_gizmo(GizmoInstance::new("core", DVec2::ZERO, 0.0).claiming(&[[0, 0]]))
    }

    fn square_arena(fill: FillAlgorithm) -> (Arena<RecordingBackend>, ActorId) {
        let tuning = Tuning {
            grid_size: 2,
            fill_algorithm: fill,
            ..Tuning::default()
        };
        let mut arena = Arena::new(tuning, parts(), backend());
        let id = arena.add_vehicle(&square()).unwrap();
        arena.spawn_vehicle(id, SpawnOptions::default()).unwrap();
        (arena, id)
    }

    fn hit_weak_atom(arena: &mut Arena<RecordingBackend>, id: ActorId) -> Vec<VehicleEvent> {
        let vehicle = arena.vehicle_mut(id).unwrap();
        let events = record(vehicle);
        let weak = vehicle.atom_at(1, 0).unwrap();
        let mut hit = Hit::default();
        hit.push(weak, 5.0);
        vehicle.receive_hit(&hit);
        assert!(vehicle.atom(weak).unwrap().is_destroyed());
        events.take()
    }

    #[test]
    fn test_weak_atom_hit_rebuilds_shape_with_one_less_rect() {
        let (mut arena, id) = square_arena(FillAlgorithm::Basic);
        assert_eq!(arena.physics().shapes.last().unwrap().1.len(), 4);

        let events = hit_weak_atom(&mut arena, id);
        let loss = events
            .iter()
            .find_map(|e| match e {
                VehicleEvent::ShapeLoss { atoms, gizmos } => Some((atoms.len(), gizmos.len())),
                _ => None,
            })
            .unwrap();
        assert_eq!(loss, (1, 0));

        arena.step().unwrap();
        let (actor, rects) = arena.physics().shapes.last().unwrap();
        assert_eq!(*actor, id);
        assert_eq!(rects.len(), 3);
    }

    #[test]
    fn test_merged_rows_split_when_a_corner_goes() {
        let (mut arena, id) = square_arena(FillAlgorithm::MergeRows);
        assert_eq!(arena.physics().shapes.last().unwrap().1.len(), 1);
        hit_weak_atom(&mut arena, id);
        arena.step().unwrap();
        assert_eq!(arena.physics().shapes.last().unwrap().1.len(), 2);
    }

    #[test]
    fn test_shape_is_pushed_once_per_change() {
        let (mut arena, _) = square_arena(FillAlgorithm::Basic);
        let pushed = arena.physics().shapes.len();
        arena.step().unwrap();
        arena.step().unwrap();
        assert_eq!(arena.physics().shapes.len(), pushed);
    }

    fn ship_arena() -> (Arena<RecordingBackend>, ActorId, ActorId) {
        let mut arena = Arena::new(tuning(), parts(), backend());
        let wall = arena.add_static(Category::ARENA, DVec2::new(-10.0, 0.0));
        let ship = arena.add_vehicle(&ship()).unwrap();
        arena.spawn_vehicle(ship, SpawnOptions::default()).unwrap();
        (arena, wall, ship)
    }

    /// Wall pushing the ship from the left, at the center of cell (i, j)
    fn wall_contact(arena: &Arena<RecordingBackend>, wall: ActorId, ship: ActorId, i: usize, j: usize, impulse: f64) -> ScriptedContact {
        let v = arena.vehicle(ship).unwrap();
        let point = v.cell_world_position(DVec2::new(i as f64 + 0.5, j as f64 + 0.5));
        ScriptedContact {
            first: wall,
            second: ship,
            begin: true,
            end: false,
            point_count: 1,
            manifold: WorldManifold {
                points: [point, point],
                normal: DVec2::X,
            },
            impulse: ContactImpulse {
                normal: [impulse, 0.0],
                tangent: [0.0, 0.0],
            },
        }
    }

    #[test]
    fn test_collision_damage_resolves_before_thrust() {
        let (mut arena, wall, ship) = ship_arena();
        arena
            .set_input(
                ship,
                SteeringInput {
                    face_heading: 0.0,
                    thrust_heading: std::f64::consts::PI,
                    thrust_power: 255,
                },
            )
            .unwrap();

        // Smash the thruster column
        let contact = wall_contact(&arena, wall, ship, 3, 2, 60.0);
        arena.physics_mut().world.queue_contact(contact);
        let report = arena.step().unwrap();

        assert_eq!(report.damage.len(), 1);
        let (victim, detached) = &report.damage[0];
        assert_eq!(*victim, ship);
        assert!(!detached.gizmos.is_empty());

        // The detached thruster was never fired
        let v = arena.vehicle(ship).unwrap();
        let lost = v.thrusters().iter().find(|t| !t.is_base()).unwrap();
        assert!(!lost.attached);
        assert_eq!(lost.coeff, 0.0);
        assert_eq!(report.forces_applied, v.thrusters().iter().filter(|t| t.coeff > 0.0).count());

        // Contact records went back to the pools
        assert_eq!(arena.router().live_records(), 0);
    }

    #[test]
    fn test_weak_contacts_and_scrap_do_nothing() {
        let (mut arena, wall, ship) = ship_arena();
        let contact = wall_contact(&arena, wall, ship, 1, 3, 0.5);
        arena.physics_mut().world.queue_contact(contact);

        let scrap = arena.add_static(Category::SCRAP, DVec2::ZERO);
        let mut heavy = wall_contact(&arena, wall, ship, 1, 2, 80.0);
        heavy.first = scrap;
        arena.physics_mut().world.queue_contact(heavy);

        let report = arena.step().unwrap();
        assert!(report.damage.is_empty());
        let v = arena.vehicle(ship).unwrap();
        assert!(v.atoms().iter().all(|a| a.hp == a.max_hp));
    }

    #[test]
    fn test_extra_collision_events_are_reported() {
        let (mut arena, wall, ship) = ship_arena();
        assert!(arena.register_collision_event(wall, "collision:begin").unwrap());
        assert!(!arena.unregister_collision_event(ship, COLLISION_DAMAGE_EVENT));

        let contact = wall_contact(&arena, wall, ship, 1, 3, 0.5);
        arena.physics_mut().world.queue_contact(contact);
        let report = arena.step().unwrap();
        assert_eq!(
            report.fired,
            vec![FiredEvent {
                actor: wall,
                event: "collision:begin".into(),
                other: Some(ship),
            }]
        );
    }

    #[test]
    fn test_vehicle_lifecycle_through_the_arena() {
        let (mut arena, _, ship) = ship_arena();
        assert!(matches!(
            arena.remove_vehicle(ship),
            Err(ArenaError::Lifecycle { .. })
        ));

        arena
            .kill_vehicle(ship, ExplodeOptions { spawn_scrap: true })
            .unwrap();
        assert!(matches!(
            arena.kill_vehicle(ship, ExplodeOptions::default()),
            Err(ArenaError::Lifecycle { .. })
        ));

        // Dying until the next step: still alive but deaf to hits
        let v = arena.vehicle_mut(ship).unwrap();
        assert!(v.is_alive() && v.is_dying());
        let hull = v.atom_at(1, 2).unwrap();
        let mut hit = Hit::default();
        hit.push(hull, 100.0);
        assert!(v.receive_hit(&hit).is_empty());
        assert!(!v.atom(hull).unwrap().is_destroyed());

        let report = arena.step().unwrap();
        let v = arena.vehicle(ship).unwrap();
        assert!(!v.is_alive() && !v.is_dying());
        assert_eq!(v.cell_count(), 0);
        assert!(report.steering.is_empty());
        assert_eq!(report.forces_applied, 0);

        assert_eq!(arena.vehicle_ids().collect::<Vec<_>>(), vec![ship]);
        let bodies = arena.physics().world.body_count();
        arena.remove_vehicle(ship).unwrap();
        assert!(arena.vehicle(ship).is_none());
        assert_eq!(arena.vehicle_ids().count(), 0);
        assert_eq!(arena.physics().world.body_count(), bodies - 1);
        assert!(!arena.router().has_actor(ship));
        assert!(matches!(
            arena.spawn_vehicle(ship, SpawnOptions::default()),
            Err(ArenaError::UnknownActor(_))
        ));
    }

    #[test]
    fn test_thrust_moves_the_body() {
        let (mut arena, _, ship) = ship_arena();
        arena
            .set_input(
                ship,
                SteeringInput {
                    face_heading: 0.0,
                    thrust_heading: 0.0,
                    thrust_power: 255,
                },
            )
            .unwrap();
        for _ in 0..10 {
            arena.step().unwrap();
        }
        let v = arena.vehicle(ship).unwrap();
        assert!(v.transform().position.x > 0.0);
        assert!(!arena.physics().forces.is_empty());
        assert_eq!(arena.physics().steps, 10);
        assert_eq!(arena.tick(), 10);
    }

    #[test]
    fn test_determinism() {
        let run = || {
            let (mut arena, wall, ship) = ship_arena();
            arena
                .set_input(
                    ship,
                    SteeringInput {
                        face_heading: 1.0,
                        thrust_heading: -0.5,
                        thrust_power: 200,
                    },
                )
                .unwrap();
            for step in 0..30 {
                if step % 7 == 0 {
                    let contact = wall_contact(&arena, wall, ship, 1, 2 + step % 3, 12.0);
                    arena.physics_mut().world.queue_contact(contact);
                }
                arena.step().unwrap();
            }
            let v = arena.vehicle(ship).unwrap();
            (
                *v.transform(),
                v.atoms().iter().map(|a| a.hp).collect::<Vec<_>>(),
            )
        };
        assert_eq!(run(), run());
    }
}
