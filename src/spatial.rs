//! Broad-phase spatial hash grid.
//!
//! The grid is rebuilt from scratch every tick. Rebuild computes each live
//! entity's integer cell in parallel, sorts the `(cell, index)` pairs so that
//! every cell's members are contiguous, and records one range per occupied
//! cell. Nothing is carried over from the previous tick.
//!
//! Queries return every entity in the cells overlapping an axis-aligned box
//! of half-extent `radius` around a point. That over-approximates the true
//! neighbourhood, so callers re-check exact distances.
//!
//! ```ignore
//! let mut grid = SpatialHashGrid::new(1.0);
//! grid.rebuild(&positions, &live, 1.0);
//! for j in grid.query_neighbors(positions[i], 0.5) {
//!     // exact test
//! }
//! ```

use glam::{I64Vec3, IVec3, Vec3};
use rayon::prelude::*;
use std::collections::HashMap;
use std::ops::Range;

/// Uniform hash grid over live entity positions.
#[derive(Clone, Debug)]
pub struct SpatialHashGrid {
    cell_size: f32,
    /// `(cell, entity)` pairs sorted by cell, then entity index.
    entries: Vec<(IVec3, u32)>,
    /// Range of `entries` belonging to each occupied cell.
    cells: HashMap<IVec3, Range<u32>>,
    skipped: usize,
}

impl SpatialHashGrid {
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size: sanitize_cell_size(cell_size),
            entries: Vec::new(),
            cells: HashMap::new(),
            skipped: 0,
        }
    }

    #[inline]
    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Integer cell containing a position.
    #[inline]
    pub fn cell_of(&self, position: Vec3) -> IVec3 {
        (position / self.cell_size).floor().as_ivec3()
    }

    /// Clear and reinsert every live entity.
    ///
    /// Entities with a non-finite position are left out; their count is
    /// available from [`skipped`](Self::skipped). Returns the number inserted.
    pub fn rebuild(&mut self, positions: &[Vec3], live: &[bool], cell_size: f32) -> usize {
        self.cell_size = sanitize_cell_size(cell_size);
        let inv = 1.0 / self.cell_size;

        self.entries.clear();
        self.cells.clear();

        self.entries.par_extend(
            positions
                .par_iter()
                .zip(live.par_iter())
                .enumerate()
                .filter_map(|(i, (p, &alive))| {
                    (alive && p.is_finite()).then(|| ((*p * inv).floor().as_ivec3(), i as u32))
                }),
        );

        let live_total = live.iter().take(positions.len()).filter(|&&a| a).count();
        self.skipped = live_total - self.entries.len();

        self.entries
            .par_sort_unstable_by_key(|&(cell, index)| (cell.x, cell.y, cell.z, index));

        let mut start = 0usize;
        while start < self.entries.len() {
            let cell = self.entries[start].0;
            let mut end = start + 1;
            while end < self.entries.len() && self.entries[end].0 == cell {
                end += 1;
            }
            self.cells.insert(cell, start as u32..end as u32);
            start = end;
        }

        self.entries.len()
    }

    /// Entities in the cells overlapping the box of half-extent `radius` around `position`.
    pub fn query_neighbors(&self, position: Vec3, radius: f32) -> Vec<usize> {
        let mut out = Vec::new();
        self.query_neighbors_into(position, radius, &mut out);
        out
    }

    /// Like [`query_neighbors`](Self::query_neighbors), reusing `out`. `out` is cleared first.
    pub fn query_neighbors_into(&self, position: Vec3, radius: f32, out: &mut Vec<usize>) {
        out.clear();
        if !position.is_finite() || !radius.is_finite() || radius < 0.0 {
            return;
        }
        let lo = self.cell_of(position - Vec3::splat(radius));
        let hi = self.cell_of(position + Vec3::splat(radius));
        let span = hi.as_i64vec3() - lo.as_i64vec3() + I64Vec3::ONE;
        let box_cells = span.x * span.y * span.z;

        // Scanning occupied cells beats enumerating a huge mostly-empty box.
        if box_cells > self.cells.len() as i64 {
            for (cell, range) in &self.cells {
                if cell.cmpge(lo).all() && cell.cmple(hi).all() {
                    self.push_range(range, out);
                }
            }
            return;
        }

        for z in lo.z..=hi.z {
            for y in lo.y..=hi.y {
                for x in lo.x..=hi.x {
                    if let Some(range) = self.cells.get(&IVec3::new(x, y, z)) {
                        self.push_range(range, out);
                    }
                }
            }
        }
    }

    #[inline]
    fn push_range(&self, range: &Range<u32>, out: &mut Vec<usize>) {
        out.extend(
            self.entries[range.start as usize..range.end as usize]
                .iter()
                .map(|&(_, index)| index as usize),
        );
    }

    /// Number of entities inserted by the last rebuild.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of occupied cells.
    #[inline]
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Live entities left out of the last rebuild because of a non-finite position.
    #[inline]
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Largest number of entities sharing one cell.
    pub fn max_occupancy(&self) -> usize {
        self.cells
            .values()
            .map(|r| (r.end - r.start) as usize)
            .max()
            .unwrap_or(0)
    }
}

#[inline]
fn sanitize_cell_size(cell_size: f32) -> f32 {
    if cell_size.is_finite() && cell_size > 0.0 {
        cell_size
    } else {
        1.0
    }
}
