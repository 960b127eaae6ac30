//! Physics collaborator interface
//!
//! The rigid-body engine is external. The arena talks to it through
//! [`PhysicsBackend`]:
//! - shape updates as a list of grid rectangles
//! - world-space forces applied at world-space points
//! - body state readback after each step
//! - contact callbacks fed into the collision router during `step`
//!
//! [`FreeBodyWorld`] is a minimal backend without collision detection.
//! It integrates forces and replays scripted contacts, which is enough
//! for the headless driver and for tests.

use std::collections::BTreeMap;

use glam::DVec2;

use super::collision::{ActorId, CollisionRouter, ContactImpulse, RawContact, WorldManifold};
use super::rect::CellRect;
use super::vehicle::GridGeometry;

/// Body state the simulation reads back after a step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyState {
    /// Body origin (grid center) in world units
    pub position: DVec2,
    pub angle: f64,
    pub linear_velocity: DVec2,
    pub angular_velocity: f64,
    pub inverse_inertia: f64,
}

impl Default for BodyState {
    fn default() -> Self {
        Self {
            position: DVec2::ZERO,
            angle: 0.0,
            linear_velocity: DVec2::ZERO,
            angular_velocity: 0.0,
            inverse_inertia: 0.0,
        }
    }
}

/// Mass, centroid and rotational inertia of a rectangle set at uniform
/// density
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MassProperties {
    pub mass: f64,
    /// Local coordinates
    pub center: DVec2,
    /// About `center`
    pub inertia: f64,
}

impl MassProperties {
    pub fn from_rects(rects: &[CellRect], geometry: &GridGeometry, density: f64) -> Self {
        let cell = geometry.cell_size;
        let mut mass = 0.0;
        let mut moment = DVec2::ZERO;
        // Inertia about the local origin
        let mut inertia_origin = 0.0;

        for rect in rects.iter().filter(|r| !r.is_empty()) {
            let w = rect.width as f64 * cell;
            let h = rect.height as f64 * cell;
            let m = w * h * density;
            let c = geometry.cell_to_local(DVec2::new(
                rect.left as f64 + rect.width as f64 / 2.0,
                rect.top as f64 + rect.height as f64 / 2.0,
            ));
            mass += m;
            moment += c * m;
            inertia_origin += m * (w * w + h * h) / 12.0 + m * c.length_squared();
        }

        if mass <= 0.0 {
            return Self::default();
        }
        let center = moment / mass;
        Self {
            mass,
            center,
            inertia: inertia_origin - mass * center.length_squared(),
        }
    }
}

/// Everything the simulation needs from the rigid-body engine
pub trait PhysicsBackend {
    fn add_body(&mut self, actor: ActorId, position: DVec2, angle: f64);
    fn remove_body(&mut self, actor: ActorId) -> bool;
    /// Replace the body's fixtures, one convex box per rectangle
    fn update_shape(&mut self, actor: ActorId, rects: &[CellRect], geometry: &GridGeometry);
    /// Teleport and zero the body's motion
    fn reset_body(&mut self, actor: ActorId, position: DVec2, angle: f64);
    fn body_state(&self, actor: ActorId) -> Option<BodyState>;
    fn apply_force(&mut self, actor: ActorId, force: DVec2, point: DVec2);
    /// Integrate one step, reporting contacts to `router`
    fn step(&mut self, dt: f64, router: &mut CollisionRouter);
}

/// A narrow-phase result to replay on the next step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScriptedContact {
    /// Engine order; the manifold normal points from `first` to `second`
    pub first: ActorId,
    pub second: ActorId,
    pub begin: bool,
    pub end: bool,
    pub point_count: usize,
    pub manifold: WorldManifold,
    pub impulse: ContactImpulse,
}

impl RawContact for ScriptedContact {
    fn point_count(&self) -> usize {
        self.point_count
    }

    fn world_manifold(&self) -> WorldManifold {
        self.manifold
    }
}

#[derive(Debug, Clone)]
struct FreeBody {
    state: BodyState,
    mass: MassProperties,
    force: DVec2,
    torque: f64,
}

/// Force integrator with scripted contacts
#[derive(Debug, Default)]
pub struct FreeBodyWorld {
    bodies: BTreeMap<ActorId, FreeBody>,
    pending: Vec<ScriptedContact>,
    density: f64,
    steps: u64,
}

impl FreeBodyWorld {
    pub fn new(density: f64) -> Self {
        Self {
            density,
            ..Default::default()
        }
    }

    /// Contact reported during the next step
    pub fn queue_contact(&mut self, contact: ScriptedContact) {
        self.pending.push(contact);
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn mass(&self, actor: ActorId) -> Option<MassProperties> {
        self.bodies.get(&actor).map(|b| b.mass)
    }
}

impl PhysicsBackend for FreeBodyWorld {
    fn add_body(&mut self, actor: ActorId, position: DVec2, angle: f64) {
        self.bodies.insert(
            actor,
            FreeBody {
                state: BodyState {
                    position,
                    angle,
                    ..Default::default()
                },
                mass: MassProperties::default(),
                force: DVec2::ZERO,
                torque: 0.0,
            },
        );
    }

    fn remove_body(&mut self, actor: ActorId) -> bool {
        self.bodies.remove(&actor).is_some()
    }

    fn update_shape(&mut self, actor: ActorId, rects: &[CellRect], geometry: &GridGeometry) {
        if let Some(body) = self.bodies.get_mut(&actor) {
            body.mass = MassProperties::from_rects(rects, geometry, self.density);
            body.state.inverse_inertia = if body.mass.inertia > 0.0 {
                1.0 / body.mass.inertia
            } else {
                0.0
            };
        }
    }

    fn reset_body(&mut self, actor: ActorId, position: DVec2, angle: f64) {
        if let Some(body) = self.bodies.get_mut(&actor) {
            body.state.position = position;
            body.state.angle = angle;
            body.state.linear_velocity = DVec2::ZERO;
            body.state.angular_velocity = 0.0;
            body.force = DVec2::ZERO;
            body.torque = 0.0;
        }
    }

    fn body_state(&self, actor: ActorId) -> Option<BodyState> {
        self.bodies.get(&actor).map(|b| b.state)
    }

    fn apply_force(&mut self, actor: ActorId, force: DVec2, point: DVec2) {
        let Some(body) = self.bodies.get_mut(&actor) else {
            return;
        };
        let com = body.state.position + DVec2::from_angle(body.state.angle).rotate(body.mass.center);
        body.force += force;
        body.torque += (point - com).perp_dot(force);
    }

    fn step(&mut self, dt: f64, router: &mut CollisionRouter) {
        // Semi-implicit Euler about the center of mass
        for body in self.bodies.values_mut() {
            if body.mass.mass > 0.0 {
                let rotation = DVec2::from_angle(body.state.angle);
                let com = body.state.position + rotation.rotate(body.mass.center);

                body.state.linear_velocity += body.force / body.mass.mass * dt;
                body.state.angular_velocity += body.torque * body.state.inverse_inertia * dt;

                let new_com = com + body.state.linear_velocity * dt;
                body.state.angle += body.state.angular_velocity * dt;
                body.state.position =
                    new_com - DVec2::from_angle(body.state.angle).rotate(body.mass.center);
            }
            body.force = DVec2::ZERO;
            body.torque = 0.0;
        }

        for contact in std::mem::take(&mut self.pending) {
            if contact.begin {
                router.begin_contact(contact.first, contact.second);
            }
            router.post_solve(contact.first, contact.second, &contact, &contact.impulse);
            if contact.end {
                router.end_contact(contact.first, contact.second);
            }
        }
        self.steps += 1;
    }
}
