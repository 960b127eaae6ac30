//! Scrap Arena - destructible grid-built vehicles for a 2D physics arena
//!
//! Core modules:
//! - `sim`: Damage, shape simplification, vehicle model, collision routing, thrusters
//! - `catalog`: Part templates shared by every vehicle
//! - `settings`: Data-driven tuning
//! - `events`: Game-level publish/subscribe
//! - `pool`: Reference-counted scratch records
//!
//! The rigid-body integrator is not part of this crate. It is reached
//! through [`sim::PhysicsBackend`].

pub mod catalog;
pub mod error;
pub mod events;
pub mod pool;
pub mod settings;
pub mod sim;

pub use catalog::PartCatalog;
pub use error::{ArenaError, Result};
pub use settings::{FillAlgorithm, Tuning};

/// Reference configuration constants
pub mod consts {
    /// Fixed simulation timestep (60 Hz)
    pub const SIM_DT: f64 = 1.0 / 60.0;
    /// Mass per square world unit of hull
    pub const HULL_DENSITY: f64 = 1.0;

    /// Cells per side of a vehicle grid
    pub const GRID_SIZE: usize = 24;
    /// World units per grid cell
    pub const CELL_SIZE: f64 = 0.2;

    /// Minimum average normal impulse that damages a vehicle
    pub const IMPULSE_DAMAGE_THRESHOLD: f64 = 1.0;
    /// Collision damage radius is `sqrt(impulse) * DAMAGE_RADIUS_SCALE`
    pub const DAMAGE_RADIUS_SCALE: f64 = 0.5;
    /// Damage multiplier for hardened hull
    pub const HARDENED_DAMAGE_MODIFIER: f64 = 0.1;
    /// Atoms with more max hp than this are hardened hull
    pub const HARDENED_HP_THRESHOLD: f64 = 6.0;

    /// Template name of the synthetic base thrusters
    pub const BASE_THRUSTER_TEMPLATE: &str = "base-thruster";
    /// Force of a base thruster before the core overrides it
    pub const BASE_THRUSTER_FORCE: f64 = 2.0;
}

/// Normalized angle to [-π, π)
#[inline]
pub fn normalize_angle(mut angle: f64) -> f64 {
    use std::f64::consts::PI;
    while angle >= PI {
        angle -= 2.0 * PI;
    }
    while angle < -PI {
        angle += 2.0 * PI;
    }
    angle
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_normalize_angle() {
        assert!((normalize_angle(3.0 * PI) - (-PI)).abs() < 1e-9);
        assert!((normalize_angle(-3.0 * PI / 2.0) - PI / 2.0).abs() < 1e-9);
        assert!((normalize_angle(0.25) - 0.25).abs() < 1e-12);
    }
}
