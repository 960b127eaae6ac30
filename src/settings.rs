//! Tuning knobs for damage, shape and steering
//!
//! Loaded from JSON when a file is supplied, otherwise the reference
//! configuration in [`crate::consts`] is used.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::consts::*;
use crate::error::Result;

/// Strategy used to turn the hole-filled occupancy grid into rectangles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FillAlgorithm {
    /// One rectangle per filled cell
    Basic,
    /// Horizontal runs, then vertical merging of identical runs
    #[default]
    MergeRows,
}

impl FillAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            FillAlgorithm::Basic => "basic",
            FillAlgorithm::MergeRows => "merge-rows",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "basic" => Some(FillAlgorithm::Basic),
            "merge-rows" | "mergerows" | "merge" => Some(FillAlgorithm::MergeRows),
            _ => None,
        }
    }
}

/// Relative weights of the (forward, right, torque) axes in the thruster allocator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisWeights {
    pub forward: f64,
    pub right: f64,
    pub torque: f64,
}

impl Default for AxisWeights {
    fn default() -> Self {
        Self {
            forward: 1.0,
            right: 1.0,
            torque: 7.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Tuning {
    // === Grid ===
    /// Cells per side of the vehicle grid
    pub grid_size: usize,
    /// World units per cell
    pub cell_size: f64,
    /// Rectangle decomposition for collision shapes
    pub fill_algorithm: FillAlgorithm,

    // === Time ===
    /// Fixed simulation timestep (seconds)
    pub dt: f64,
    /// Mass per square world unit of vehicle hull
    pub density: f64,

    // === Collision damage ===
    /// Average normal impulse below which a collision does no damage
    pub impulse_damage_threshold: f64,
    /// Damage radius is `sqrt(impulse) * damage_radius_scale` cells
    pub damage_radius_scale: f64,
    /// Damage multiplier for hardened atoms
    pub hardened_damage_modifier: f64,
    /// Atoms with max hp above this are hardened
    pub hardened_hp_threshold: f64,

    // === Steering ===
    pub axis_weights: AxisWeights,
    /// Allocator runs at most `factor * thruster_count` iterations
    pub allocator_iteration_factor: usize,
    /// Heading error (radians) under which the controller tries to freeze rotation
    pub heading_deadband: f64,
    /// Slack (radians) when comparing brake distance against remaining angle
    pub brake_tolerance: f64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            grid_size: GRID_SIZE,
            cell_size: CELL_SIZE,
            fill_algorithm: FillAlgorithm::MergeRows,

            dt: SIM_DT,
            density: HULL_DENSITY,

            impulse_damage_threshold: IMPULSE_DAMAGE_THRESHOLD,
            damage_radius_scale: DAMAGE_RADIUS_SCALE,
            hardened_damage_modifier: HARDENED_DAMAGE_MODIFIER,
            hardened_hp_threshold: HARDENED_HP_THRESHOLD,

            axis_weights: AxisWeights::default(),
            allocator_iteration_factor: 2,
            heading_deadband: 0.01,
            brake_tolerance: 0.01,
        }
    }
}

impl Tuning {
    /// Parse tuning from a JSON string; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load tuning from a JSON file, falling back to defaults if it can't be read
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(json) => {
                let tuning = Self::from_json(&json)?;
                log::info!("Loaded tuning from {}", path.display());
                Ok(tuning)
            }
            Err(e) => {
                log::warn!("Using default tuning ({}: {})", path.display(), e);
                Ok(Self::default())
            }
        }
    }

    /// Whether an atom with the given max hp counts as hardened hull
    pub fn is_hardened(&self, max_hp: f64) -> bool {
        max_hp > self.hardened_hp_threshold
    }
}
