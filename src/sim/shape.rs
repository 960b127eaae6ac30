//! Grid shape simplification
//!
//! Turns a vehicle's occupancy grid into a small set of rectangles for
//! the physics collaborator to build convex fixtures from:
//! 1. Fill holes along rows and along columns independently
//! 2. Keep cells filled in both passes
//! 3. Extract horizontal runs, then merge runs of identical extent upward
//!
//! The previous hole-filled grid is remembered so an unchanged shape
//! skips rectangle extraction entirely.

use super::rect::CellRect;
use crate::settings::FillAlgorithm;

#[derive(Debug, Clone)]
pub struct ShapeSimplifier {
    grid_size: usize,
    algorithm: FillAlgorithm,
    /// Hole-filled occupancy from the last call (comparison key)
    cells: Vec<bool>,
    /// Scratch for the row and column passes
    rows: Vec<bool>,
    cols: Vec<bool>,
    /// Runs indexed by their starting cell
    slots: Vec<Option<CellRect>>,
    rects: Vec<CellRect>,
    rebuilds: usize,
}

impl ShapeSimplifier {
    pub fn new(grid_size: usize, algorithm: FillAlgorithm) -> Self {
        let n = grid_size * grid_size;
        Self {
            grid_size,
            algorithm,
            cells: Vec::new(),
            rows: vec![false; n],
            cols: vec![false; n],
            slots: vec![None; n],
            rects: Vec::new(),
            rebuilds: 0,
        }
    }

    /// Recompute the rectangle set from row-major occupancy.
    ///
    /// Returns true when the hole-filled shape differs from the previous call.
    pub fn simplify(&mut self, occupied: &[bool]) -> bool {
        let n = self.grid_size;
        debug_assert_eq!(occupied.len(), n * n);

        self.rows.copy_from_slice(occupied);
        self.cols.copy_from_slice(occupied);
        fill_rows(&mut self.rows, n);
        fill_cols(&mut self.cols, n);

        let unchanged = self.cells.len() == occupied.len()
            && self
                .cells
                .iter()
                .zip(self.rows.iter().zip(self.cols.iter()))
                .all(|(&c, (&r, &k))| c == (r && k));
        if unchanged {
            return false;
        }

        self.cells.clear();
        self.cells
            .extend(self.rows.iter().zip(self.cols.iter()).map(|(&r, &k)| r && k));

        match self.algorithm {
            FillAlgorithm::Basic => self.extract_cells(),
            FillAlgorithm::MergeRows => self.extract_merged_rows(),
        }
        self.rebuilds += 1;
        true
    }

    pub fn rects(&self) -> &[CellRect] {
        &self.rects
    }

    /// How many times rectangles have actually been rebuilt
    pub fn rebuild_count(&self) -> usize {
        self.rebuilds
    }

    pub fn grid_size(&self) -> usize {
        self.grid_size
    }

    fn extract_cells(&mut self) {
        let n = self.grid_size;
        self.rects.clear();
        for (a, _) in self.cells.iter().enumerate().filter(|(_, c)| **c) {
            self.rects
                .push(CellRect::new((a % n) as i32, (a / n) as i32, 1, 1));
        }
    }

    fn extract_merged_rows(&mut self) {
        let n = self.grid_size;
        self.slots.iter_mut().for_each(|s| *s = None);

        // Horizontal runs, stored at the run's first cell
        for r in 0..n {
            let mut run: Option<usize> = None;
            for c in 0..n {
                let a = r * n + c;
                if self.cells[a] {
                    match run {
                        Some(start) => {
                            if let Some(rect) = self.slots[start].as_mut() {
                                rect.width += 1;
                            }
                        }
                        None => {
                            self.slots[a] = Some(CellRect::new(c as i32, r as i32, 1, 1));
                            run = Some(a);
                        }
                    }
                } else {
                    run = None;
                }
            }
        }

        // Bottom to top: absorb the run directly below when it starts at the
        // same column with the same width
        if n >= 2 {
            for r in (0..n - 1).rev() {
                for c in 0..n {
                    let a = r * n + c;
                    let b = a + n;
                    if let (Some(upper), Some(lower)) = (self.slots[a], self.slots[b]) {
                        if upper.width == lower.width {
                            if let Some(rect) = self.slots[a].as_mut() {
                                rect.height += lower.height;
                            }
                            self.slots[b] = None;
                        }
                    }
                }
            }
        }

        self.rects.clear();
        self.rects.extend(self.slots.iter().flatten().copied());
    }
}

/// Fill the span between the first and last filled cell of every row
pub fn fill_rows(cells: &mut [bool], n: usize) {
    for j in 0..n {
        let row = &mut cells[j * n..(j + 1) * n];
        fill_span(row.iter_mut());
    }
}

/// Fill the span between the first and last filled cell of every column
pub fn fill_cols(cells: &mut [bool], n: usize) {
    for i in 0..n {
        fill_span(cells.iter_mut().skip(i).step_by(n));
    }
}

fn fill_span<'a>(line: impl Iterator<Item = &'a mut bool>) {
    let mut line: Vec<&mut bool> = line.collect();
    let Some(first) = line.iter().position(|c| **c) else {
        // Entirely empty
        return;
    };
    // Some filled cell exists, so rposition can't miss
    let last = line.iter().rposition(|c| **c).unwrap_or(first);
    for c in line[first..=last].iter_mut() {
        **c = true;
    }
}

/// Row pass AND column pass, without extracting rectangles
pub fn hole_filled(occupied: &[bool], n: usize) -> Vec<bool> {
    let mut rows = occupied.to_vec();
    let mut cols = occupied.to_vec();
    fill_rows(&mut rows, n);
    fill_cols(&mut cols, n);
    rows.iter().zip(cols.iter()).map(|(&r, &c)| r && c).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn grid(rows: &[&str]) -> Vec<bool> {
        rows.iter()
            .flat_map(|r| r.chars().map(|c| c == '#'))
            .collect()
    }

    fn coverage(rects: &[CellRect], n: usize) -> Vec<u32> {
        let mut counts = vec![0u32; n * n];
        for r in rects {
            for (i, j) in r.cells() {
                counts[j as usize * n + i as usize] += 1;
            }
        }
        counts
    }

    #[test]
    fn test_empty_grid_has_no_rects() {
        let mut s = ShapeSimplifier::new(4, FillAlgorithm::MergeRows);
        assert!(s.simplify(&[false; 16]));
        assert!(s.rects().is_empty());
    }

    #[test]
    fn test_solid_grid_is_one_rect() {
        let mut s = ShapeSimplifier::new(5, FillAlgorithm::MergeRows);
        s.simplify(&[true; 25]);
        assert_eq!(s.rects(), &[CellRect::new(0, 0, 5, 5)]);
    }

    #[test]
    fn test_single_interior_hole_fills() {
        let cells = grid(&["####", "#.##", "####", "####"]);
        let mut s = ShapeSimplifier::new(4, FillAlgorithm::MergeRows);
        s.simplify(&cells);
        assert_eq!(s.rects(), &[CellRect::new(0, 0, 4, 4)]);
    }

    #[test]
    fn test_notch_on_edge_is_not_filled() {
        // The gap at the row end is outside the row's filled span
        let cells = grid(&["###.", "####", "####", "####"]);
        let filled = hole_filled(&cells, 4);
        assert!(!filled[3]);

        let mut s = ShapeSimplifier::new(4, FillAlgorithm::MergeRows);
        s.simplify(&cells);
        assert_eq!(
            s.rects(),
            &[CellRect::new(0, 0, 3, 1), CellRect::new(0, 1, 4, 3)]
        );
    }

    #[test]
    fn test_and_of_passes_keeps_isolated_cells_apart() {
        // Diagonal cells: the row pass and column pass each fill nothing new
        // where the other pass disagrees
        let cells = grid(&["#...", "....", "....", "...#"]);
        let filled = hole_filled(&cells, 4);
        assert_eq!(filled, cells);
    }

    #[test]
    fn test_unchanged_shape_skips_rebuild() {
        let mut s = ShapeSimplifier::new(4, FillAlgorithm::MergeRows);
        let a = grid(&["###.", "###.", "###.", "...."]);
        assert!(s.simplify(&a));
        assert_eq!(s.rebuild_count(), 1);

        // A ring fills to the same solid block
        let b = grid(&["###.", "#.#.", "###.", "...."]);
        assert_ne!(a, b);
        assert!(!s.simplify(&b));
        assert_eq!(s.rebuild_count(), 1);
        assert_eq!(s.rects(), &[CellRect::new(0, 0, 3, 3)]);

        let mut c = a.clone();
        c[0] = false;
        assert!(s.simplify(&c));
        assert_eq!(s.rebuild_count(), 2);
    }

    #[test]
    fn test_merge_rows_uses_fewer_rects_than_basic() {
        let cells = grid(&[".##.", "####", "####", ".##."]);
        let mut basic = ShapeSimplifier::new(4, FillAlgorithm::Basic);
        let mut merged = ShapeSimplifier::new(4, FillAlgorithm::MergeRows);
        basic.simplify(&cells);
        merged.simplify(&cells);
        assert_eq!(basic.rects().len(), 12);
        assert_eq!(merged.rects().len(), 3);
        assert_eq!(coverage(merged.rects(), 4), coverage(basic.rects(), 4));
    }

    proptest! {
        #[test]
        fn prop_rects_cover_filled_cells_exactly(
            n in 1usize..9,
            bits in proptest::collection::vec(any::<bool>(), 64),
        ) {
            let cells: Vec<bool> = bits[..n * n].to_vec();
            let mut s = ShapeSimplifier::new(n, FillAlgorithm::MergeRows);
            s.simplify(&cells);

            let filled = hole_filled(&cells, n);
            let counts = coverage(s.rects(), n);
            for a in 0..n * n {
                prop_assert_eq!(counts[a], u32::from(filled[a]));
            }
            // Occupied cells are never dropped
            for a in 0..n * n {
                prop_assert!(!cells[a] || filled[a]);
            }
        }

        #[test]
        fn prop_simplify_is_idempotent_after_hole_fill(
            n in 1usize..9,
            bits in proptest::collection::vec(any::<bool>(), 64),
        ) {
            let cells: Vec<bool> = bits[..n * n].to_vec();
            let filled = hole_filled(&cells, n);

            let mut a = ShapeSimplifier::new(n, FillAlgorithm::MergeRows);
            let mut b = ShapeSimplifier::new(n, FillAlgorithm::MergeRows);
            a.simplify(&cells);
            b.simplify(&filled);
            prop_assert_eq!(a.rects(), b.rects());
            prop_assert_eq!(hole_filled(&filled, n), filled);
        }
    }
}
