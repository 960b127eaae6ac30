//! Axis-aligned rectangles over grid cells
//!
//! Right and bottom are inclusive and derived from the stored
//! left/top/width/height.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CellRect {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

impl CellRect {
    pub fn new(left: i32, top: i32, width: i32, height: i32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Build from inclusive edges. An inverted range gives a non-positive size.
    pub fn from_lrtb(left: i32, right: i32, top: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            width: right - left + 1,
            height: bottom - top + 1,
        }
    }

    #[inline]
    pub fn right(&self) -> i32 {
        self.left + self.width - 1
    }

    #[inline]
    pub fn bottom(&self) -> i32 {
        self.top + self.height - 1
    }

    #[inline]
    pub fn area(&self) -> i32 {
        if self.is_empty() {
            0
        } else {
            self.width * self.height
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Smallest rectangle containing both
    pub fn combine(&self, other: &CellRect) -> CellRect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        CellRect::from_lrtb(
            self.left.min(other.left),
            self.right().max(other.right()),
            self.top.min(other.top),
            self.bottom().max(other.bottom()),
        )
    }

    /// Intersection (possibly empty)
    pub fn clip(&self, other: &CellRect) -> CellRect {
        CellRect::from_lrtb(
            self.left.max(other.left),
            self.right().min(other.right()),
            self.top.max(other.top),
            self.bottom().min(other.bottom()),
        )
    }

    /// Every (i, j) in the rectangle, row by row
    pub fn cells(&self) -> impl Iterator<Item = (i32, i32)> + use<> {
        let (left, right, top, bottom) = (self.left, self.right(), self.top, self.bottom());
        (top..=bottom).flat_map(move |j| (left..=right).map(move |i| (i, j)))
    }
}
