//! Shared test fixtures

use std::cell::RefCell;
use std::f64::consts::PI;
use std::rc::Rc;

use glam::DVec2;

use super::template::{GizmoInstance, VehicleTemplate};
use super::vehicle::{SpawnOptions, VehicleEvent, VehicleModel};
use crate::catalog::{GizmoKindTemplate, GizmoTemplate, PartCatalog};
use crate::settings::Tuning;

pub fn parts() -> PartCatalog {
    let mut catalog = PartCatalog::new();
    catalog
        .register(
            "core",
            GizmoTemplate {
                kind: GizmoKindTemplate::Core {
                    max_hp: 10.0,
                    base_force: Some(4.0),
                    base_torque: 2.0,
                },
                reg: DVec2::ZERO,
                graphics: None,
            },
        )
        .unwrap();
    catalog
        .register(
            "thruster",
            GizmoTemplate {
                kind: GizmoKindTemplate::Thruster {
                    force: 3.0,
                    thrust_offset: DVec2::new(0.5, 0.5),
                },
                reg: DVec2::ZERO,
                graphics: Some("flame".into()),
            },
        )
        .unwrap();
    catalog.freeze();
    catalog
}

pub fn tuning() -> Tuning {
    Tuning {
        grid_size: 8,
        ..Tuning::default()
    }
}

/// 3x3 block: core in the middle (hp 2 gets promoted), a two-atom
/// thruster on the right column, plain hull elsewhere
pub fn ship() -> VehicleTemplate {
    VehicleTemplate::from_rows(&["", "", ".112", ".132", ".112"], 8, &[(1, 4.0), (2, 3.0), (3, 2.0)])
        .with_gizmo(GizmoInstance::new("core", DVec2::new(2.0, 3.0), 0.0).claiming(&[[2, 3]]))
        .with_gizmo(
            GizmoInstance::new("thruster", DVec2::new(3.0, 3.0), PI).claiming(&[[3, 2], [3, 3]]),
        )
}

pub fn loaded(id: u32) -> VehicleModel {
    let mut v = VehicleModel::new(id, &tuning());
    v.load(&ship(), &parts()).unwrap();
    v
}

pub fn alive(id: u32) -> VehicleModel {
    let mut v = loaded(id);
    v.spawn(SpawnOptions::default()).unwrap();
    v
}

pub fn record(v: &mut VehicleModel) -> Rc<RefCell<Vec<VehicleEvent>>> {
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = log.clone();
    v.subscribe(move |e| sink.borrow_mut().push(e.clone()));
    log
}
