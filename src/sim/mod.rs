//! Deterministic simulation module
//!
//! Everything that touches vehicle state lives here. The module stays
//! deterministic:
//! - Fixed timestep only
//! - Stable iteration order (by actor id)
//! - No rendering, input or platform dependencies

pub mod arena;
pub mod collision;
pub mod damage;
pub mod impact;
pub mod physics;
pub mod rect;
pub mod shape;
pub mod template;
pub mod thruster;
pub mod vehicle;

#[cfg(test)]
pub(crate) mod testing;

pub use arena::{Arena, FiredEvent, StepReport};
pub use collision::{
    ActorId, ArgumentMask, Category, CollisionDispatch, CollisionEvent, CollisionReport,
    CollisionRouter, ComputeStats, ConditionMask, ContactImpulse, ContactReport, RawContact,
    WorldManifold,
};
pub use damage::{DamageEngine, DamagePolicy, GridQuery, Hit, RadialPolicy};
pub use impact::{COLLISION_DAMAGE_EVENT, ImpactDamage};
pub use physics::{BodyState, FreeBodyWorld, MassProperties, PhysicsBackend, ScriptedContact};
pub use rect::CellRect;
pub use shape::ShapeSimplifier;
pub use template::{AtomTemplate, GizmoInstance, VehicleTemplate};
pub use thruster::{
    MouseLookPilot, Steering, SteeringInput, ThrustEnvelope, Thruster, TorqueController, Wrench,
    iterate_once, thruster_forces,
};
pub use vehicle::{
    AtomId, Detached, ExplodeOptions, GizmoId, SpawnOptions, VehicleEvent, VehicleModel,
};
