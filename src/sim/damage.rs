//! Damage engine
//!
//! Converts a world-space hit into per-atom damage. Work happens in a
//! grid-sized buffer allocated once; each hit only resets the cells
//! inside the union of its policies' rectangles.
//!
//! Damage is accumulated per cell, so an atom spanning several cells in
//! the working rectangle is reported once per covered cell.

use glam::DVec2;

use super::rect::CellRect;
use super::vehicle::AtomId;

/// Read access to a vehicle grid
pub trait GridQuery {
    fn grid_size(&self) -> usize;
    fn cell_size(&self) -> f64;
    /// Atom covering (i, j), if it still has hp
    fn live_atom(&self, i: usize, j: usize) -> Option<AtomId>;
    /// World position to fractional cell coordinates
    fn world_to_cell(&self, world: DVec2) -> DVec2;
}

/// Atoms hit and the damage each one takes (parallel arrays)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Hit {
    pub atoms: Vec<AtomId>,
    pub damage_values: Vec<f64>,
}

impl Hit {
    pub fn clear(&mut self) {
        self.atoms.clear();
        self.damage_values.clear();
    }

    pub fn push(&mut self, atom: AtomId, damage: f64) {
        self.atoms.push(atom);
        self.damage_values.push(damage);
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (AtomId, f64)> + '_ {
        self.atoms.iter().copied().zip(self.damage_values.iter().copied())
    }

    /// Total damage aimed at one atom
    pub fn total_for(&self, atom: AtomId) -> f64 {
        self.iter().filter(|(a, _)| *a == atom).map(|(_, d)| d).sum()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct BufferCell {
    atom: Option<AtomId>,
    damage: f64,
}

#[derive(Debug, Clone)]
struct DamageBuffer {
    size: usize,
    cells: Vec<BufferCell>,
}

impl DamageBuffer {
    fn new(size: usize) -> Self {
        Self {
            size,
            cells: vec![BufferCell::default(); size * size],
        }
    }

    #[inline]
    fn index(&self, i: i32, j: i32) -> usize {
        j as usize * self.size + i as usize
    }

    /// Reset cells in `rect`, binding each to the live atom under it
    fn reset(&mut self, rect: &CellRect, grid: &impl GridQuery) {
        for (i, j) in rect.cells() {
            let index = self.index(i, j);
            self.cells[index] = BufferCell {
                atom: grid.live_atom(i as usize, j as usize),
                damage: 0.0,
            };
        }
    }

    /// Occupied cells in `rect` with their center point in cell coordinates
    fn occupied_mut<'a>(
        &'a mut self,
        rect: &CellRect,
    ) -> impl Iterator<Item = (DVec2, &'a mut BufferCell)> + 'a {
        let size = self.size.max(1);
        let (left, right) = (rect.left.max(0) as usize, rect.right().max(0) as usize);
        let (top, rows) = (rect.top.max(0) as usize, rect.height.max(0) as usize);
        self.cells
            .chunks_mut(size)
            .enumerate()
            .skip(top)
            .take(rows)
            .flat_map(move |(j, row)| {
                row.get_mut(left..=right).into_iter().flat_map(move |span| {
                    span.iter_mut()
                        .enumerate()
                        .map(move |(k, cell)| (left + k, j, cell))
                })
            })
            .filter_map(|(i, j, cell)| {
                cell.atom
                    .is_some()
                    .then(|| (DVec2::new(i as f64 + 0.5, j as f64 + 0.5), cell))
            })
    }
}

/// Radial falloff around the hit point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadialPolicy {
    /// Radius in cells; unset (or non-positive) means "use the base damage"
    pub radius: Option<f64>,
    pub damage_modifier: f64,
}

impl Default for RadialPolicy {
    fn default() -> Self {
        Self {
            radius: None,
            damage_modifier: 1.0,
        }
    }
}

impl RadialPolicy {
    pub fn with_radius(mut self, radius: f64) -> Self {
        self.radius = Some(radius);
        self
    }

    pub fn with_damage_modifier(mut self, modifier: f64) -> Self {
        self.damage_modifier = modifier;
        self
    }

    pub fn effective_radius(&self, base_damage: f64) -> f64 {
        match self.radius {
            Some(r) if r > 0.0 => r,
            _ => base_damage,
        }
    }

    /// Unnormalized Gaussian with sigma equal to the radius, rounded up.
    /// Zero outside the radius.
    pub fn damage_at(&self, base_damage: f64, radius: f64, distance_sq: f64) -> f64 {
        let radius_sq = radius * radius;
        if radius <= 0.0 || distance_sq > radius_sq {
            return 0.0;
        }
        (base_damage * self.damage_modifier * (-0.5 * distance_sq / radius_sq).exp()).ceil()
    }

    fn affected_rect(&self, position: DVec2, base_damage: f64, grid_size: usize) -> CellRect {
        let radius = self.effective_radius(base_damage);
        if radius <= 0.0 {
            return CellRect::default();
        }
        let n = grid_size as i32;
        CellRect::from_lrtb(
            (position.x - radius).floor() as i32,
            (position.x + radius).floor() as i32,
            (position.y - radius).floor() as i32,
            (position.y + radius).floor() as i32,
        )
        .clip(&CellRect::new(0, 0, n, n))
    }
}

/// The closed set of damage distributions
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DamagePolicy {
    Radial(RadialPolicy),
}

impl DamagePolicy {
    fn affected_rect(&self, position: DVec2, base_damage: f64, grid_size: usize) -> CellRect {
        match self {
            DamagePolicy::Radial(p) => p.affected_rect(position, base_damage, grid_size),
        }
    }

    fn execute(&self, position: DVec2, base_damage: f64, rect: &CellRect, buffer: &mut DamageBuffer) {
        match self {
            DamagePolicy::Radial(p) => {
                let radius = p.effective_radius(base_damage);
                for (center, cell) in buffer.occupied_mut(rect) {
                    let distance_sq = center.distance_squared(position);
                    cell.damage += p.damage_at(base_damage, radius, distance_sq);
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct DamageEngine {
    policies: Vec<DamagePolicy>,
    buffer: DamageBuffer,
    /// Working rectangle of the last hit
    rect: CellRect,
}

impl DamageEngine {
    pub fn new(grid_size: usize) -> Self {
        Self {
            policies: Vec::new(),
            buffer: DamageBuffer::new(grid_size),
            rect: CellRect::default(),
        }
    }

    /// Policies run in the order they were added, all with the same base damage
    pub fn with_policy(mut self, policy: DamagePolicy) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn policies(&self) -> &[DamagePolicy] {
        &self.policies
    }

    /// First radial policy, for per-hit radius adjustments
    pub fn radial_mut(&mut self) -> Option<&mut RadialPolicy> {
        self.policies.iter_mut().map(|p| match p {
            DamagePolicy::Radial(r) => r,
        }).next()
    }

    /// Working rectangle of the most recent hit
    pub fn last_rect(&self) -> CellRect {
        self.rect
    }

    /// Damage from a world-space hit. `out` is cleared first.
    pub fn compute(
        &mut self,
        grid: &impl GridQuery,
        world_pos: DVec2,
        base_damage: f64,
        out: &mut Hit,
    ) {
        let position = grid.world_to_cell(world_pos);
        self.compute_at_cell(grid, position, base_damage, out);
    }

    /// Damage from a hit already expressed in cell coordinates
    pub fn compute_at_cell(
        &mut self,
        grid: &impl GridQuery,
        position: DVec2,
        base_damage: f64,
        out: &mut Hit,
    ) {
        out.clear();
        self.rect = CellRect::default();
        if self.policies.is_empty() || !position.is_finite() {
            return;
        }

        if self.buffer.size != grid.grid_size() {
            self.buffer = DamageBuffer::new(grid.grid_size());
        }

        let size = self.buffer.size;
        self.rect = self
            .policies
            .iter()
            .map(|p| p.affected_rect(position, base_damage, size))
            .fold(CellRect::default(), |acc, r| acc.combine(&r));
        if self.rect.is_empty() {
            return;
        }

        self.buffer.reset(&self.rect, grid);
        for policy in &self.policies {
            policy.execute(position, base_damage, &self.rect, &mut self.buffer);
        }

        for (i, j) in self.rect.cells() {
            let cell = self.buffer.cells[self.buffer.index(i, j)];
            if let Some(atom) = cell.atom {
                if cell.damage > 0.0 {
                    out.push(atom, cell.damage);
                }
            }
        }

        log::debug!(
            "Hit at ({:.2}, {:.2}) base {:.2}: {} cells damaged in {:?}",
            position.x,
            position.y,
            base_damage,
            out.len(),
            self.rect
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Square grid where every cell holds its own 1x1 atom
    struct SolidGrid {
        n: usize,
        dead: Vec<(usize, usize)>,
    }

    impl GridQuery for SolidGrid {
        fn grid_size(&self) -> usize {
            self.n
        }
        fn cell_size(&self) -> f64 {
            1.0
        }
        fn live_atom(&self, i: usize, j: usize) -> Option<AtomId> {
            (!self.dead.contains(&(i, j))).then_some(AtomId(j * self.n + i))
        }
        fn world_to_cell(&self, world: DVec2) -> DVec2 {
            world
        }
    }

    fn radial(radius: f64) -> DamageEngine {
        DamageEngine::new(8).with_policy(DamagePolicy::Radial(RadialPolicy::default().with_radius(radius)))
    }

    #[test]
    fn test_gaussian_falloff_points() {
        let p = RadialPolicy::default().with_damage_modifier(2.0);
        assert_eq!(p.damage_at(5.0, 3.0, 0.0), 10.0);
        let at_edge = (10.0 * (-0.5f64).exp()).ceil();
        assert_eq!(p.damage_at(5.0, 3.0, 9.0), at_edge);
        assert_eq!(p.damage_at(5.0, 3.0, 9.0001), 0.0);
    }

    #[test]
    fn test_center_hit_takes_full_damage() {
        let grid = SolidGrid { n: 8, dead: vec![] };
        let mut engine = radial(1.5);
        let mut hit = Hit::default();
        engine.compute(&grid, DVec2::new(3.5, 3.5), 10.0, &mut hit);

        assert_eq!(hit.total_for(AtomId(3 * 8 + 3)), 10.0);
        // ceil(10 * e^(-1 / 4.5)) one cell away
        assert_eq!(hit.total_for(AtomId(3 * 8 + 4)), 9.0);
        // Diagonal at distance sqrt(2) < 1.5 is in range, two cells away is not
        assert_eq!(hit.total_for(AtomId(2 * 8 + 2)), 7.0);
        assert_eq!(hit.total_for(AtomId(3 * 8 + 5)), 0.0);
    }

    #[test]
    fn test_radius_defaults_to_base_damage() {
        let grid = SolidGrid { n: 8, dead: vec![] };
        let mut engine =
            DamageEngine::new(8).with_policy(DamagePolicy::Radial(RadialPolicy::default()));
        let mut hit = Hit::default();
        engine.compute(&grid, DVec2::new(0.5, 0.5), 2.0, &mut hit);
        assert_eq!(engine.last_rect(), CellRect::from_lrtb(0, 2, 0, 2));
        assert!(hit.total_for(AtomId(2)) > 0.0);
        assert_eq!(hit.total_for(AtomId(3)), 0.0);
    }

    #[test]
    fn test_far_corner_hit_stays_inside_the_grid() {
        let grid = SolidGrid { n: 8, dead: vec![] };
        let mut engine = radial(1.0);
        let mut hit = Hit::default();
        engine.compute(&grid, DVec2::new(7.5, 7.5), 3.0, &mut hit);
        assert_eq!(engine.last_rect(), CellRect::from_lrtb(6, 7, 6, 7));
        // The corner cell plus its left and upper neighbours
        assert_eq!(hit.len(), 3);
        assert_eq!(hit.total_for(AtomId(7 * 8 + 7)), 3.0);
        assert_eq!(hit.total_for(AtomId(6 * 8 + 6)), 0.0);
    }

    #[test]
    fn test_dead_cells_are_skipped() {
        let grid = SolidGrid { n: 8, dead: vec![(3, 3)] };
        let mut engine = radial(1.0);
        let mut hit = Hit::default();
        engine.compute(&grid, DVec2::new(3.5, 3.5), 3.0, &mut hit);
        assert!(!hit.atoms.contains(&AtomId(3 * 8 + 3)));
        assert_eq!(hit.len(), 4);
    }

    #[test]
    fn test_off_grid_and_degenerate_hits_are_empty() {
        let grid = SolidGrid { n: 8, dead: vec![] };
        let mut hit = Hit::default();

        radial(1.0).compute(&grid, DVec2::new(-20.0, 4.0), 5.0, &mut hit);
        assert!(hit.is_empty());

        // Zero radius falls back to a zero base damage
        let mut engine = radial(0.0);
        engine.compute(&grid, DVec2::new(4.5, 4.5), 0.0, &mut hit);
        assert!(hit.is_empty());
    }

    #[test]
    fn test_policies_accumulate() {
        let grid = SolidGrid { n: 8, dead: vec![] };
        let mut engine = DamageEngine::new(8)
            .with_policy(DamagePolicy::Radial(RadialPolicy::default().with_radius(1.0)))
            .with_policy(DamagePolicy::Radial(
                RadialPolicy::default().with_radius(3.0).with_damage_modifier(0.5),
            ));
        let mut hit = Hit::default();
        engine.compute(&grid, DVec2::new(4.5, 4.5), 4.0, &mut hit);

        // 4 from the tight blast plus 2 from the wide one
        assert_eq!(hit.total_for(AtomId(4 * 8 + 4)), 6.0);
        // Union rect spans the wider policy
        assert_eq!(engine.last_rect(), CellRect::from_lrtb(1, 7, 1, 7));
    }

    /// Grid with one 2x1 atom at (2, 2)-(3, 2)
    struct WideAtomGrid;

    impl GridQuery for WideAtomGrid {
        fn grid_size(&self) -> usize {
            6
        }
        fn cell_size(&self) -> f64 {
            1.0
        }
        fn live_atom(&self, i: usize, j: usize) -> Option<AtomId> {
            (j == 2 && (i == 2 || i == 3)).then_some(AtomId(0))
        }
        fn world_to_cell(&self, world: DVec2) -> DVec2 {
            world
        }
    }

    #[test]
    fn test_multi_cell_atom_is_reported_per_cell() {
        let mut engine = DamageEngine::new(6)
            .with_policy(DamagePolicy::Radial(RadialPolicy::default().with_radius(2.0)));
        let mut hit = Hit::default();
        engine.compute(&WideAtomGrid, DVec2::new(3.0, 2.5), 2.0, &mut hit);

        // Hit point sits on the shared edge: both cells report the same damage
        assert_eq!(hit.len(), 2);
        assert_eq!(hit.atoms, vec![AtomId(0), AtomId(0)]);
        assert_eq!(hit.damage_values[0], hit.damage_values[1]);
        assert_eq!(hit.total_for(AtomId(0)), 2.0 * hit.damage_values[0]);
    }
}
