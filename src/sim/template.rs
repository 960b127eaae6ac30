//! Vehicle template data
//!
//! A vehicle file carries two documents side by side:
//! - `vehicle`: a dense row-major array of atom template ids (0 = empty)
//!   plus the list of gizmo instances and the cells they claim
//! - `atoms`: the atom template catalog keyed by id

use std::collections::HashMap;
use std::path::Path;

use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::error::{ArenaError, Result};

/// Size and durability of one kind of atom
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomTemplate {
    pub w: usize,
    pub h: usize,
    pub hp: f64,
    #[serde(default)]
    pub graphics: Option<String>,
}

/// One gizmo placed on a vehicle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GizmoInstance {
    /// Name of the template in the part catalog
    #[serde(rename = "modelName")]
    pub model_name: String,
    /// Position in cells from the top left of the grid
    pub position: DVec2,
    /// Radians, 0 is forward
    #[serde(default)]
    pub angle: f64,
    /// (i, j) of a cell inside each atom this gizmo claims
    #[serde(default)]
    pub atoms: Vec<[usize; 2]>,
    /// Overrides the template's graphics id
    #[serde(rename = "gfxID", default)]
    pub gfx_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleLayout {
    /// Row-major atom template ids, one per grid cell
    pub atoms: Vec<u32>,
    #[serde(default)]
    pub gizmos: Vec<GizmoInstance>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleTemplate {
    pub vehicle: VehicleLayout,
    pub atoms: HashMap<u32, AtomTemplate>,
}

impl VehicleTemplate {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let template = Self::from_json(&json)?;
        log::info!(
            "Loaded vehicle template {} ({} gizmos)",
            path.display(),
            template.vehicle.gizmos.len()
        );
        Ok(template)
    }

    pub fn atom_template(&self, id: u32) -> Result<&AtomTemplate> {
        self.atoms.get(&id).ok_or(ArenaError::UnknownAtomTemplate(id))
    }

    /// Build a template from ASCII rows: each character is an atom id
    /// digit, `.` is empty. Every id maps to a 1x1 atom with the given hp.
    pub fn from_rows(rows: &[&str], grid_size: usize, hp: &[(u32, f64)]) -> Self {
        let mut cells = vec![0u32; grid_size * grid_size];
        for (j, row) in rows.iter().enumerate().take(grid_size) {
            for (i, c) in row.chars().enumerate().take(grid_size) {
                if let Some(id) = c.to_digit(10) {
                    cells[j * grid_size + i] = id;
                }
            }
        }
        let atoms = hp
            .iter()
            .map(|&(id, hp)| {
                (
                    id,
                    AtomTemplate {
                        w: 1,
                        h: 1,
                        hp,
                        graphics: None,
                    },
                )
            })
            .collect();
        Self {
            vehicle: VehicleLayout {
                atoms: cells,
                gizmos: Vec::new(),
            },
            atoms,
        }
    }

    pub fn with_gizmo(mut self, gizmo: GizmoInstance) -> Self {
        self.vehicle.gizmos.push(gizmo);
        self
    }
}

impl GizmoInstance {
    pub fn new(model_name: &str, position: DVec2, angle: f64) -> Self {
        Self {
            model_name: model_name.to_string(),
            position,
            angle,
            atoms: Vec::new(),
            gfx_id: None,
        }
    }

    pub fn claiming(mut self, cells: &[[usize; 2]]) -> Self {
        self.atoms.extend_from_slice(cells);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vehicle_json() {
        let json = r#"{
            "vehicle": {
                "atoms": [1, 0, 0, 2],
                "gizmos": [
                    { "modelName": "core-small", "position": [0, 0], "angle": 0, "atoms": [[0, 0]] },
                    { "modelName": "thruster-a", "position": [1, 1], "angle": 3.14, "atoms": [[1, 1]], "gfxID": "blue" }
                ]
            },
            "atoms": {
                "1": { "w": 1, "h": 1, "hp": 10, "graphics": "hull" },
                "2": { "w": 1, "h": 1, "hp": 3 }
            }
        }"#;
        let t = VehicleTemplate::from_json(json).unwrap();
        assert_eq!(t.vehicle.atoms, vec![1, 0, 0, 2]);
        assert_eq!(t.vehicle.gizmos.len(), 2);
        assert_eq!(t.vehicle.gizmos[1].position, DVec2::new(1.0, 1.0));
        assert_eq!(t.vehicle.gizmos[1].gfx_id.as_deref(), Some("blue"));
        assert_eq!(t.atom_template(1).unwrap().graphics.as_deref(), Some("hull"));
        assert_eq!(t.atom_template(2).unwrap().hp, 3.0);
        assert!(matches!(
            t.atom_template(9),
            Err(ArenaError::UnknownAtomTemplate(9))
        ));
    }

    #[test]
    fn test_from_rows() {
        let t = VehicleTemplate::from_rows(&["12", ".1"], 3, &[(1, 5.0), (2, 8.0)]);
        assert_eq!(t.vehicle.atoms, vec![1, 2, 0, 0, 1, 0, 0, 0, 0]);
        assert_eq!(t.atoms.len(), 2);
    }
}
