//! Part catalog ("junkyard")
//!
//! Shared gizmo templates looked up by name when vehicles load. The
//! catalog is built once, then frozen; vehicles only ever read it.

use std::collections::HashMap;

use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::consts::{BASE_THRUSTER_FORCE, BASE_THRUSTER_TEMPLATE};
use crate::error::{ArenaError, Result};

const REQUIRED_KEYS: [&str; 3] = ["manifest", "assets", "gizmos"];

/// Kind-specific template data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GizmoKindTemplate {
    Core {
        /// Damage the core can absorb across all of its atoms
        #[serde(rename = "maxHp")]
        max_hp: f64,
        /// Total force of the base thrusters
        #[serde(rename = "baseForce", default)]
        base_force: Option<f64>,
        /// Total torque of the base thrusters
        #[serde(rename = "baseTorque", default)]
        base_torque: f64,
    },
    Thruster {
        force: f64,
        /// Offset (cells) from the gizmo origin, applied before rotation
        #[serde(rename = "thrustOffset", default)]
        thrust_offset: DVec2,
    },
    Weapon,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GizmoTemplate {
    #[serde(flatten)]
    pub kind: GizmoKindTemplate,
    /// Registration point (cells)
    #[serde(default)]
    pub reg: DVec2,
    #[serde(default)]
    pub graphics: Option<String>,
}

impl GizmoTemplate {
    pub fn base_thruster() -> Self {
        Self {
            kind: GizmoKindTemplate::Thruster {
                force: BASE_THRUSTER_FORCE,
                thrust_offset: DVec2::ZERO,
            },
            reg: DVec2::ZERO,
            graphics: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PartCatalog {
    templates: HashMap<String, GizmoTemplate>,
    frozen: bool,
}

impl Default for PartCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl PartCatalog {
    /// An unfrozen catalog holding only the base thruster template
    pub fn new() -> Self {
        let mut templates = HashMap::new();
        templates.insert(BASE_THRUSTER_TEMPLATE.to_string(), GizmoTemplate::base_thruster());
        Self {
            templates,
            frozen: false,
        }
    }

    /// Build, load and freeze a catalog from junkyard JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let mut catalog = Self::new();
        catalog.load_json(json)?;
        catalog.freeze();
        Ok(catalog)
    }

    /// Register a template. A name that is already present keeps its first
    /// definition and returns `Ok(false)`.
    pub fn register(&mut self, name: &str, template: GizmoTemplate) -> Result<bool> {
        if self.frozen {
            return Err(ArenaError::CatalogFrozen(name.to_string()));
        }
        if self.templates.contains_key(name) {
            log::debug!("Ignoring duplicate gizmo template '{}'", name);
            return Ok(false);
        }
        self.templates.insert(name.to_string(), template);
        Ok(true)
    }

    /// Add every template from junkyard JSON (top level must be exactly
    /// `manifest`, `assets` and `gizmos`)
    pub fn load_json(&mut self, json: &str) -> Result<()> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        check_top_level_keys(&value)?;

        let gizmos: HashMap<String, GizmoTemplate> =
            serde_json::from_value(value["gizmos"].clone())?;

        // Sorted so duplicate handling doesn't depend on hash order
        let mut names: Vec<_> = gizmos.keys().cloned().collect();
        names.sort();
        for name in names {
            self.register(&name, gizmos[&name].clone())?;
        }

        log::info!("Part catalog holds {} templates", self.templates.len());
        Ok(())
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn lookup(&self, name: &str) -> Option<&GizmoTemplate> {
        self.templates.get(name)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

fn check_top_level_keys(value: &serde_json::Value) -> Result<()> {
    let Some(obj) = value.as_object() else {
        return Err(ArenaError::CatalogMissingKeys(REQUIRED_KEYS.join(", ")));
    };

    let missing: Vec<&str> = REQUIRED_KEYS
        .iter()
        .copied()
        .filter(|k| !obj.contains_key(*k))
        .collect();
    if !missing.is_empty() {
        return Err(ArenaError::CatalogMissingKeys(missing.join(", ")));
    }

    let mut extra: Vec<&str> = obj
        .keys()
        .map(String::as_str)
        .filter(|k| !REQUIRED_KEYS.contains(k))
        .collect();
    if !extra.is_empty() {
        extra.sort();
        return Err(ArenaError::CatalogUnexpectedKeys(extra.join(", ")));
    }

    Ok(())
}
