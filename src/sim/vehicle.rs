//! Destructible vehicle model
//!
//! A vehicle is a square grid of atoms. Gizmos (core, thrusters, weapons)
//! claim atoms; when a gizmo's atoms are all destroyed the gizmo detaches
//! and takes any remaining atoms with it. Every structural change is
//! followed by one reconciliation pass: cell count, collision shape,
//! center of mass, base thrusters, thruster torques.
//!
//! Lifecycle: unloaded -> loaded -> alive -> dead -> unloaded.

use std::f64::consts::{FRAC_PI_2, PI, SQRT_2};

use glam::DVec2;
use serde::{Deserialize, Serialize};

use super::damage::{GridQuery, Hit};
use super::rect::CellRect;
use super::shape::ShapeSimplifier;
use super::template::VehicleTemplate;
use super::thruster::{Thruster, ThrusterSource};
use crate::catalog::{GizmoKindTemplate, PartCatalog};
use crate::error::{ArenaError, Result, Transition};
use crate::events::{EventBus, SubscriptionId};
use crate::settings::Tuning;

/// Index into a vehicle's atom list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AtomId(pub usize);

/// Index into a vehicle's gizmo list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GizmoId(pub usize);

/// Grid dimensions and the mapping between cells and local coordinates.
///
/// Local (0, 0) is the grid center; cell (0, 0) is its top left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridGeometry {
    pub grid_size: usize,
    pub cell_size: f64,
    /// Registration point in world units
    pub reg: DVec2,
}

impl GridGeometry {
    pub fn new(grid_size: usize, cell_size: f64) -> Self {
        let half = grid_size as f64 / 2.0 * cell_size;
        Self {
            grid_size,
            cell_size,
            reg: DVec2::splat(half),
        }
    }

    pub fn from_tuning(tuning: &Tuning) -> Self {
        Self::new(tuning.grid_size, tuning.cell_size)
    }

    #[inline]
    pub fn cell_count(&self) -> usize {
        self.grid_size * self.grid_size
    }

    #[inline]
    pub fn index(&self, i: usize, j: usize) -> Option<usize> {
        (i < self.grid_size && j < self.grid_size).then_some(j * self.grid_size + i)
    }

    pub fn cell_to_local(&self, cell: DVec2) -> DVec2 {
        cell * self.cell_size - self.reg
    }

    pub fn local_to_cell(&self, local: DVec2) -> DVec2 {
        (local + self.reg) / self.cell_size
    }
}

/// Smallest destructible unit of hull
#[derive(Debug, Clone, PartialEq)]
pub struct Atom {
    pub i: usize,
    pub j: usize,
    pub w: usize,
    pub h: usize,
    pub hp: f64,
    pub max_hp: f64,
    /// Atom template id, doubles as the graphics id
    pub template: u32,
    pub gizmo: Option<GizmoId>,
}

impl Atom {
    pub fn area(&self) -> usize {
        self.w * self.h
    }

    pub fn is_destroyed(&self) -> bool {
        self.hp <= 0.0
    }

    /// Center in cell coordinates
    pub fn center_cell(&self) -> DVec2 {
        DVec2::new(
            self.i as f64 + self.w as f64 / 2.0,
            self.j as f64 + self.h as f64 / 2.0,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GizmoKind {
    Core {
        max_hp: f64,
        base_force: f64,
        base_torque: f64,
    },
    /// Index into the vehicle's thruster list
    Thruster { thruster: usize },
    Weapon,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Gizmo {
    pub template: String,
    pub graphics: Option<String>,
    /// Cells from the top left of the grid
    pub position: DVec2,
    pub angle: f64,
    pub reg: DVec2,
    pub attached: bool,
    pub atoms: Vec<AtomId>,
    pub kind: GizmoKind,
}

impl Gizmo {
    pub fn is_core(&self) -> bool {
        matches!(self.kind, GizmoKind::Core { .. })
    }

    /// The core never dies on its own; anything else dies with its last atom
    pub fn is_dead(&self, atoms: &[Atom]) -> bool {
        !self.is_core() && self.atoms.iter().all(|a| atoms[a.0].is_destroyed())
    }
}

/// Rigid transform of the vehicle body in the world
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: DVec2,
    pub angle: f64,
}

impl Transform {
    pub fn local_to_world(&self, local: DVec2) -> DVec2 {
        DVec2::from_angle(self.angle).rotate(local) + self.position
    }

    pub fn world_to_local(&self, world: DVec2) -> DVec2 {
        DVec2::from_angle(-self.angle).rotate(world - self.position)
    }

    /// Rotate a local direction into the world
    pub fn rotate(&self, local: DVec2) -> DVec2 {
        DVec2::from_angle(self.angle).rotate(local)
    }
}

/// An atom leaving the vehicle as loose scrap
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrapPiece {
    pub atom: AtomId,
    /// World position of the atom's center
    pub position: DVec2,
    /// Local offset of the atom's center from the center of mass
    pub offset: DVec2,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VehicleEvent {
    AtomsLoaded,
    GizmosLoaded,
    ShapeLoss {
        atoms: Vec<AtomId>,
        gizmos: Vec<GizmoId>,
    },
    Spawn,
    Kill,
    ThrustersUpdate,
    ScrapSpawn {
        pieces: Vec<ScrapPiece>,
    },
}

impl VehicleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            VehicleEvent::AtomsLoaded => "atoms:load",
            VehicleEvent::GizmosLoaded => "gizmos:load",
            VehicleEvent::ShapeLoss { .. } => "shape:loss",
            VehicleEvent::Spawn => "spawn",
            VehicleEvent::Kill => "kill",
            VehicleEvent::ThrustersUpdate => "thrusters:update",
            VehicleEvent::ScrapSpawn { .. } => "scrap:spawn",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpawnOptions {
    pub position: Option<DVec2>,
    pub angle: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExplodeOptions {
    /// Tear off every remaining atom as scrap
    pub spawn_scrap: bool,
}

/// Parts destroyed by one damage event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detached {
    pub atoms: Vec<AtomId>,
    pub gizmos: Vec<GizmoId>,
}

impl Detached {
    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty() && self.gizmos.is_empty()
    }
}

#[derive(Debug)]
pub struct VehicleModel {
    id: u32,
    geometry: GridGeometry,

    atoms: Vec<Atom>,
    /// One entry per cell; a multi-cell atom appears in every cell it covers
    cells: Vec<Option<AtomId>>,
    gizmos: Vec<Gizmo>,
    /// Loaded thrusters first, base thrusters after
    thrusters: Vec<Thruster>,
    core: Option<GizmoId>,
    /// Area of live atoms
    cell_count: usize,

    loaded: bool,
    alive: bool,
    dying: bool,

    transform: Transform,
    local_com: DVec2,
    simplifier: ShapeSimplifier,
    shape_pending: bool,
    thrusters_revision: u64,

    events: EventBus<VehicleEvent>,
}

impl VehicleModel {
    pub fn new(id: u32, tuning: &Tuning) -> Self {
        let geometry = GridGeometry::from_tuning(tuning);
        Self {
            id,
            geometry,
            atoms: Vec::new(),
            cells: vec![None; geometry.cell_count()],
            gizmos: Vec::new(),
            thrusters: Vec::new(),
            core: None,
            cell_count: 0,
            loaded: false,
            alive: false,
            dying: false,
            transform: Transform::default(),
            local_com: DVec2::ZERO,
            simplifier: ShapeSimplifier::new(tuning.grid_size, tuning.fill_algorithm),
            shape_pending: false,
            thrusters_revision: 0,
            events: EventBus::new(),
        }
    }

    // === Accessors ===

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn is_dying(&self) -> bool {
        self.dying
    }

    /// Ignore further hits until the vehicle is killed or respawned
    pub fn mark_dying(&mut self) {
        self.dying = true;
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    pub fn atom(&self, id: AtomId) -> Option<&Atom> {
        self.atoms.get(id.0)
    }

    pub fn gizmos(&self) -> &[Gizmo] {
        &self.gizmos
    }

    pub fn gizmo(&self, id: GizmoId) -> Option<&Gizmo> {
        self.gizmos.get(id.0)
    }

    pub fn core(&self) -> Option<GizmoId> {
        self.core
    }

    pub fn thrusters(&self) -> &[Thruster] {
        &self.thrusters
    }

    pub fn thrusters_mut(&mut self) -> &mut [Thruster] {
        &mut self.thrusters
    }

    /// Bumped whenever thruster geometry or attachment changes
    pub fn thrusters_revision(&self) -> u64 {
        self.thrusters_revision
    }

    pub fn cell_count(&self) -> usize {
        self.cell_count
    }

    pub fn local_com(&self) -> DVec2 {
        self.local_com
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn set_transform(&mut self, position: DVec2, angle: f64) {
        self.transform = Transform { position, angle };
    }

    /// Current collision rectangles
    pub fn rects(&self) -> &[CellRect] {
        self.simplifier.rects()
    }

    /// Rectangles to hand to the physics body, once per change
    pub fn take_shape_update(&mut self) -> Option<&[CellRect]> {
        if !self.shape_pending {
            return None;
        }
        self.shape_pending = false;
        Some(self.simplifier.rects())
    }

    pub fn subscribe(&mut self, callback: impl FnMut(&VehicleEvent) + 'static) -> SubscriptionId {
        self.events.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    // === Spatial queries ===

    /// Atom covering (i, j), destroyed or not
    pub fn atom_at(&self, i: usize, j: usize) -> Option<AtomId> {
        self.geometry.index(i, j).and_then(|a| self.cells[a])
    }

    pub fn cell_local_position(&self, cell: DVec2) -> DVec2 {
        self.geometry.cell_to_local(cell)
    }

    pub fn cell_world_position(&self, cell: DVec2) -> DVec2 {
        self.transform.local_to_world(self.geometry.cell_to_local(cell))
    }

    // === Lifecycle ===

    fn lifecycle(&self, transition: Transition, reason: &'static str) -> ArenaError {
        ArenaError::Lifecycle {
            vehicle: self.id,
            transition,
            reason,
        }
    }

    /// Build atoms and gizmos from a template. On failure the vehicle is
    /// left unloaded.
    pub fn load(&mut self, template: &VehicleTemplate, parts: &PartCatalog) -> Result<()> {
        if self.loaded {
            return Err(self.lifecycle(Transition::Load, "vehicle already has data loaded"));
        }

        if let Err(e) = self.build(template, parts) {
            self.clear_data();
            return Err(e);
        }

        self.rebuild_shape(true);
        self.events.publish(&VehicleEvent::AtomsLoaded);

        self.reset_base_thrusters();
        self.loaded = true;
        self.thrusters_revision += 1;
        self.events.publish(&VehicleEvent::GizmosLoaded);

        log::info!(
            "Vehicle {} loaded: {} atoms, {} gizmos, {} cells",
            self.id,
            self.atoms.len(),
            self.gizmos.len(),
            self.cell_count
        );
        Ok(())
    }

    fn build(&mut self, template: &VehicleTemplate, parts: &PartCatalog) -> Result<()> {
        let n = self.geometry.grid_size;
        let layout = &template.vehicle;
        if layout.atoms.len() != self.geometry.cell_count() {
            return Err(ArenaError::GridSizeMismatch {
                expected: self.geometry.cell_count(),
                actual: layout.atoms.len(),
            });
        }

        // Atoms
        for (index, &id) in layout.atoms.iter().enumerate() {
            if id == 0 {
                continue;
            }
            let data = template.atom_template(id)?;
            let (i, j) = (index % n, index / n);
            if data.w == 0 || data.h == 0 || i + data.w > n || j + data.h > n {
                return Err(ArenaError::AtomOutOfGrid {
                    i,
                    j,
                    w: data.w,
                    h: data.h,
                    grid: n,
                });
            }

            let atom_id = AtomId(self.atoms.len());
            for jj in j..j + data.h {
                for ii in i..i + data.w {
                    let cell = &mut self.cells[jj * n + ii];
                    if cell.is_some() {
                        return Err(ArenaError::AtomOverlap { i: ii, j: jj });
                    }
                    *cell = Some(atom_id);
                }
            }

            self.atoms.push(Atom {
                i,
                j,
                w: data.w,
                h: data.h,
                hp: data.hp,
                max_hp: data.hp,
                template: id,
                gizmo: None,
            });
            self.cell_count += data.w * data.h;
        }

        // Gizmos
        for (index, instance) in layout.gizmos.iter().enumerate() {
            let part = parts
                .lookup(&instance.model_name)
                .ok_or_else(|| ArenaError::UnknownGizmoTemplate(instance.model_name.clone()))?;
            let gizmo_id = GizmoId(self.gizmos.len());

            let kind = match &part.kind {
                GizmoKindTemplate::Core {
                    max_hp,
                    base_force,
                    base_torque,
                } => {
                    if self.core.is_some() {
                        return Err(ArenaError::MultipleCores { index });
                    }
                    let base_force = match base_force {
                        Some(f) if *f != 0.0 => *f,
                        _ => return Err(ArenaError::BadBaseForce(instance.model_name.clone())),
                    };
                    self.core = Some(gizmo_id);
                    GizmoKind::Core {
                        max_hp: *max_hp,
                        base_force,
                        base_torque: *base_torque,
                    }
                }
                GizmoKindTemplate::Thruster {
                    force,
                    thrust_offset,
                } => {
                    let thruster = Thruster::new(
                        ThrusterSource::Gizmo(gizmo_id),
                        instance.position,
                        instance.angle,
                        *force,
                    )
                    .with_mount(part.reg, *thrust_offset);
                    self.thrusters.push(thruster);
                    GizmoKind::Thruster {
                        thruster: self.thrusters.len() - 1,
                    }
                }
                GizmoKindTemplate::Weapon => GizmoKind::Weapon,
            };

            let mut gizmo = Gizmo {
                template: instance.model_name.clone(),
                graphics: instance.gfx_id.clone().or_else(|| part.graphics.clone()),
                position: instance.position,
                angle: instance.angle,
                reg: part.reg,
                attached: true,
                atoms: Vec::new(),
                kind,
            };

            for &[i, j] in &instance.atoms {
                let atom_id = self.atom_at(i, j).ok_or_else(|| ArenaError::MissingAtom {
                    i,
                    j,
                    gizmo: instance.model_name.clone(),
                })?;
                let atom = &mut self.atoms[atom_id.0];
                if atom.gizmo.is_some() {
                    return Err(ArenaError::AtomAlreadyClaimed { i, j });
                }
                atom.gizmo = Some(gizmo_id);

                // Core atoms only go down with the whole core
                if let GizmoKind::Core { max_hp, .. } = gizmo.kind {
                    if atom.max_hp < max_hp {
                        atom.max_hp = f64::INFINITY;
                        atom.hp = f64::INFINITY;
                    }
                }
                gizmo.atoms.push(atom_id);
            }

            self.gizmos.push(gizmo);
        }

        if self.core.is_none() {
            return Err(ArenaError::MissingCore);
        }
        Ok(())
    }

    /// Restore every atom and gizmo and bring the vehicle to life
    pub fn spawn(&mut self, opts: SpawnOptions) -> Result<()> {
        if !self.loaded {
            return Err(self.lifecycle(Transition::Spawn, "vehicle is not loaded"));
        }
        if self.alive {
            return Err(self.lifecycle(Transition::Spawn, "vehicle is already spawned"));
        }

        if let Some(position) = opts.position {
            self.transform.position = position;
        }
        if let Some(angle) = opts.angle {
            self.transform.angle = angle;
        }

        self.cell_count = 0;
        for atom in &mut self.atoms {
            atom.hp = atom.max_hp;
            self.cell_count += atom.area();
        }
        for gizmo in &mut self.gizmos {
            gizmo.attached = true;
        }
        for thruster in &mut self.thrusters {
            thruster.attached = true;
            thruster.coeff = 0.0;
        }

        self.alive = true;
        self.dying = false;
        self.rebuild_shape(true);
        self.reset_base_thrusters();
        self.thrusters_revision += 1;
        self.events.publish(&VehicleEvent::Spawn);

        log::info!(
            "Vehicle {} spawned at ({:.2}, {:.2})",
            self.id,
            self.transform.position.x,
            self.transform.position.y
        );
        Ok(())
    }

    pub fn kill(&mut self) -> Result<()> {
        if !self.alive {
            return Err(self.lifecycle(Transition::Kill, "vehicle is already dead"));
        }
        self.alive = false;
        self.dying = false;
        self.events.publish(&VehicleEvent::Kill);
        log::info!("Vehicle {} killed", self.id);
        Ok(())
    }

    /// Kill the vehicle, optionally tearing off everything left as scrap
    pub fn explode(&mut self, opts: ExplodeOptions) -> Result<()> {
        self.kill()?;
        if !opts.spawn_scrap {
            return Ok(());
        }

        let mut remaining = Vec::new();
        for (index, atom) in self.atoms.iter_mut().enumerate() {
            if !atom.is_destroyed() {
                atom.hp = 0.0;
                self.cell_count = self.cell_count.saturating_sub(atom.area());
                remaining.push(AtomId(index));
            }
        }
        let mut detached = 0;
        for index in 0..self.gizmos.len() {
            if self.gizmos[index].attached {
                self.detach_gizmo(GizmoId(index));
                detached += 1;
            }
        }

        log::info!(
            "Vehicle {} exploded into {} pieces ({} gizmos detached)",
            self.id,
            remaining.len(),
            detached
        );
        self.publish_scrap(&remaining);
        Ok(())
    }

    pub fn unload(&mut self) -> Result<()> {
        if !self.loaded {
            return Err(self.lifecycle(Transition::Unload, "vehicle is not loaded"));
        }
        if self.alive {
            return Err(self.lifecycle(Transition::Unload, "vehicle is still spawned"));
        }
        self.clear_data();
        log::info!("Vehicle {} unloaded", self.id);
        Ok(())
    }

    fn clear_data(&mut self) {
        self.atoms.clear();
        self.cells.iter_mut().for_each(|c| *c = None);
        self.gizmos.clear();
        self.thrusters.clear();
        self.core = None;
        self.cell_count = 0;
        self.local_com = DVec2::ZERO;
        self.shape_pending = false;
        self.loaded = false;
    }

    // === Damage ===

    /// Apply a hit from any source. Ignored while dead or dying.
    pub fn receive_hit(&mut self, hit: &Hit) -> Detached {
        let mut batch = Detached::default();
        if !self.alive || self.dying || hit.is_empty() {
            return batch;
        }

        for (atom, damage) in hit.iter() {
            self.damage_into(atom, damage, &mut batch);
        }
        if !batch.is_empty() {
            self.detach_parts(&batch);
            self.publish_scrap(&batch.atoms);
        }
        batch
    }

    /// Damage a single atom and reconcile immediately
    pub fn apply_damage(&mut self, atom: AtomId, amount: f64) -> Detached {
        let mut batch = Detached::default();
        self.damage_into(atom, amount, &mut batch);
        if !batch.is_empty() {
            self.detach_parts(&batch);
        }
        batch
    }

    /// Damage without reconciliation; destroyed parts are added to `batch`
    fn damage_into(&mut self, atom_id: AtomId, amount: f64, batch: &mut Detached) {
        let Some(atom) = self.atoms.get_mut(atom_id.0) else {
            return;
        };
        if atom.is_destroyed() {
            return;
        }

        atom.hp -= amount;
        if atom.hp <= 0.0 {
            atom.hp = 0.0;
            batch.atoms.push(atom_id);
        }

        let Some(gizmo_id) = atom.gizmo else {
            return;
        };
        let gizmo = &self.gizmos[gizmo_id.0];
        if !gizmo.attached || !gizmo.is_dead(&self.atoms) {
            return;
        }

        // Cascade: a dead gizmo takes all of its atoms with it
        for &owned in &gizmo.atoms {
            let atom = &mut self.atoms[owned.0];
            if atom.hp > 0.0 {
                atom.hp = 0.0;
                batch.atoms.push(owned);
            }
        }
        self.detach_gizmo(gizmo_id);
        batch.gizmos.push(gizmo_id);
    }

    fn detach_gizmo(&mut self, id: GizmoId) {
        let gizmo = &mut self.gizmos[id.0];
        gizmo.attached = false;
        if let GizmoKind::Thruster { thruster } = gizmo.kind {
            let thruster = &mut self.thrusters[thruster];
            thruster.attached = false;
            thruster.coeff = 0.0;
        }
    }

    /// Reconcile after a batch of destroyed parts
    fn detach_parts(&mut self, batch: &Detached) {
        let lost: usize = batch.atoms.iter().map(|a| self.atoms[a.0].area()).sum();
        self.cell_count = self.cell_count.saturating_sub(lost);

        log::debug!(
            "Vehicle {} lost {} atoms ({} cells) and {} gizmos",
            self.id,
            batch.atoms.len(),
            lost,
            batch.gizmos.len()
        );
        self.events.publish(&VehicleEvent::ShapeLoss {
            atoms: batch.atoms.clone(),
            gizmos: batch.gizmos.clone(),
        });

        self.rebuild_shape(false);
        self.reset_base_thrusters();
        self.thrusters_revision += 1;
        self.events.publish(&VehicleEvent::ThrustersUpdate);
    }

    fn publish_scrap(&mut self, atoms: &[AtomId]) {
        if atoms.is_empty() {
            return;
        }
        let pieces = atoms
            .iter()
            .map(|&id| {
                let center = self.atoms[id.0].center_cell();
                ScrapPiece {
                    atom: id,
                    position: self.cell_world_position(center),
                    offset: self.cell_local_position(center) - self.local_com,
                }
            })
            .collect();
        self.events.publish(&VehicleEvent::ScrapSpawn { pieces });
    }

    // === Geometry ===

    /// Simplify the live occupancy and recompute the center of mass.
    /// `force` queues a physics shape update even if nothing changed.
    fn rebuild_shape(&mut self, force: bool) {
        let occupied: Vec<bool> = self
            .cells
            .iter()
            .map(|c| c.is_some_and(|a| !self.atoms[a.0].is_destroyed()))
            .collect();
        let changed = self.simplifier.simplify(&occupied);
        self.shape_pending |= changed || force;

        // Uniform density: area-weighted centroid of the rectangles
        let rects = self.simplifier.rects();
        let area: f64 = rects.iter().map(|r| r.area() as f64).sum();
        if area > 0.0 {
            let moment: DVec2 = rects
                .iter()
                .map(|r| {
                    let center = DVec2::new(
                        r.left as f64 + r.width as f64 / 2.0,
                        r.top as f64 + r.height as f64 / 2.0,
                    );
                    self.geometry.cell_to_local(center) * r.area() as f64
                })
                .sum();
            self.local_com = moment / area;
        }
    }

    /// Replace the eight base thrusters around the current center of mass,
    /// then re-derive every thruster's geometry and torque
    fn reset_base_thrusters(&mut self) {
        self.thrusters.retain(|t| !t.is_base());

        let core = self.core.and_then(|id| self.gizmos.get(id.0)).map(|g| &g.kind);
        if let Some(&GizmoKind::Core {
            base_force,
            base_torque,
            ..
        }) = core
        {
            // Two thrusters per direction, four per turning direction
            let force = base_force / 2.0;
            let torque = base_torque / 4.0;
            // Each thruster's force meets its lever at 135 degrees
            let radius = torque / (force * (3.0 * PI / 4.0).sin());
            let offset = radius / (SQRT_2 * self.geometry.cell_size);

            let com = self.geometry.local_to_cell(self.local_com);
            let (front, back) = (com.x + offset, com.x - offset);
            let (left, right) = (com.y - offset, com.y + offset);

            let (forward, backward, port, starboard) = (0.0, PI, 3.0 * FRAC_PI_2, FRAC_PI_2);
            let layout = [
                (front, left, backward),
                (front, left, starboard),
                (front, right, backward),
                (front, right, port),
                (back, left, forward),
                (back, left, starboard),
                (back, right, forward),
                (back, right, port),
            ];
            for (x, y, angle) in layout {
                self.thrusters.push(Thruster::new(
                    ThrusterSource::Base,
                    DVec2::new(x, y),
                    angle,
                    force,
                ));
            }
        }

        for thruster in &mut self.thrusters {
            thruster.init(&self.geometry);
            thruster.compute_torque(self.local_com);
        }
    }
}

impl GridQuery for VehicleModel {
    fn grid_size(&self) -> usize {
        self.geometry.grid_size
    }

    fn cell_size(&self) -> f64 {
        self.geometry.cell_size
    }

    fn live_atom(&self, i: usize, j: usize) -> Option<AtomId> {
        self.atom_at(i, j)
            .filter(|a| !self.atoms[a.0].is_destroyed())
    }

    fn world_to_cell(&self, world: DVec2) -> DVec2 {
        self.geometry
            .local_to_cell(self.transform.world_to_local(world))
    }
}
