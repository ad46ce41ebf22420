// rt_light_grid.rs — uniform light grid: geometry, per-cell light lists, dedup bitmap

use rayon::prelude::*;

use rtgrid_common::q_shared::Vec3;

use crate::rt_local::*;

/// Below this many cells the rewind/snapshot loops stay on the calling thread.
const PARALLEL_CELL_THRESHOLD: usize = 16384;

// ============================================================
// Grid geometry
// ============================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GridGeometry {
    /// World-space cell coordinate of the grid origin.
    pub min_cell: [i32; 3],
    pub size: [i32; 3],
    pub cells: usize,
}

impl GridGeometry {
    /// Quantize world bounds to whole cells: mins round down, maxs round up.
    pub fn compute(mins: &Vec3, maxs: &Vec3, cell_size: f32) -> Result<Self, String> {
        if !(cell_size > 0.0) {
            return Err(format!("bad light grid cell size {}", cell_size));
        }
        if mins.iter().chain(maxs.iter()).any(|v| !v.is_finite()) {
            return Err(format!("non-finite map bounds {:?} {:?}", mins, maxs));
        }

        let mut min_cell = [0i32; 3];
        let mut size = [0i32; 3];
        let mut total: i64 = 1;
        for i in 0..3 {
            if mins[i] > maxs[i] {
                return Err(format!("inverted map bounds on axis {}: {} > {}", i, mins[i], maxs[i]));
            }
            let lo = (mins[i] / cell_size).floor();
            let hi = (maxs[i] / cell_size).ceil();
            let extent = hi - lo;
            if lo < i32::MIN as f32 || hi > i32::MAX as f32 || extent > MAX_LIGHT_CLUSTERS as f32 {
                return Err(format!(
                    "map too large for light grid: axis {} spans {} cells (max {})",
                    i, extent, MAX_LIGHT_CLUSTERS
                ));
            }
            min_cell[i] = lo as i32;
            size[i] = extent as i32;
            total *= size[i] as i64;
        }

        if total > MAX_LIGHT_CLUSTERS as i64 {
            return Err(format!(
                "map too large for light grid: {}x{}x{} = {} cells (max {})",
                size[0], size[1], size[2], total, MAX_LIGHT_CLUSTERS
            ));
        }

        Ok(Self {
            min_cell,
            size,
            cells: total as usize,
        })
    }

    /// Linear index of a grid-relative cell, or -1 outside the grid.
    pub fn cell_index(&self, cell: [i32; 3]) -> i32 {
        if cell[0] < 0
            || cell[1] < 0
            || cell[2] < 0
            || cell[0] >= self.size[0]
            || cell[1] >= self.size[1]
            || cell[2] >= self.size[2]
        {
            return -1;
        }

        cell[0] + cell[1] * self.size[0] + cell[2] * self.size[0] * self.size[1]
    }

    /// Index for an absolute (world-space) cell coordinate.
    pub fn world_cell_index(&self, x: i32, y: i32, z: i32) -> i32 {
        self.cell_index([x - self.min_cell[0], y - self.min_cell[1], z - self.min_cell[2]])
    }

    /// Grid-relative coordinate of a linear index.
    pub fn cell_coords(&self, index: usize) -> [i32; 3] {
        let sx = self.size[0].max(1) as usize;
        let sy = self.size[1].max(1) as usize;
        [
            (index % sx) as i32,
            ((index / sx) % sy) as i32,
            (index / (sx * sy)) as i32,
        ]
    }
}

// ============================================================
// Cells
// ============================================================

/// One grid cell as the ray tracing shader reads it.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightCell {
    pub num_point_lights: u8,
    pub num_emissive_surfaces: u8,
    pub point_lights: [u8; MAX_VISIBLE_POINT_LIGHTS],
    pub emissive_surfaces: [u8; MAX_VISIBLE_SURFACE_LIGHTS],
}

impl LightCell {
    pub fn point_lights(&self) -> &[u8] {
        &self.point_lights[..self.num_point_lights as usize]
    }

    pub fn emissive_surfaces(&self) -> &[u8] {
        &self.emissive_surfaces[..self.num_emissive_surfaces as usize]
    }
}

/// Counts recorded at the end of static light loading.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct CellCounts {
    point_lights: u8,
    emissive_surfaces: u8,
}

#[derive(Debug, Default)]
pub struct LightCells {
    cells: Vec<LightCell>,
    static_counts: Vec<CellCounts>,
}

impl LightCells {
    pub fn reset(&mut self, num_cells: usize) {
        self.cells.clear();
        self.cells.resize(num_cells, bytemuck::Zeroable::zeroed());
        self.static_counts.clear();
        self.static_counts.resize(num_cells, CellCounts::default());
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cells(&self) -> &[LightCell] {
        &self.cells
    }

    pub fn cell(&self, index: usize) -> &LightCell {
        &self.cells[index]
    }

    /// Zero static and current counts everywhere.
    pub fn clear_counts(&mut self) {
        for cell in &mut self.cells {
            cell.num_point_lights = 0;
            cell.num_emissive_surfaces = 0;
        }
        for counts in &mut self.static_counts {
            *counts = CellCounts::default();
        }
    }

    /// Returns false when the cell has no free point light slot.
    pub fn add_point_light(&mut self, index: usize, light: usize) -> bool {
        let cell = &mut self.cells[index];
        let n = cell.num_point_lights as usize;
        if n >= MAX_VISIBLE_POINT_LIGHTS {
            return false;
        }
        cell.point_lights[n] = light as u8;
        cell.num_point_lights += 1;
        true
    }

    /// Returns false when the cell has no free emissive surface slot.
    pub fn add_surface_light(&mut self, index: usize, surface: usize) -> bool {
        let cell = &mut self.cells[index];
        let n = cell.num_emissive_surfaces as usize;
        if n >= MAX_VISIBLE_SURFACE_LIGHTS {
            return false;
        }
        cell.emissive_surfaces[n] = surface as u8;
        cell.num_emissive_surfaces += 1;
        true
    }

    /// Record current counts as the static baseline.
    pub fn snapshot_static(&mut self) {
        let snap = |(counts, cell): (&mut CellCounts, &LightCell)| {
            counts.point_lights = cell.num_point_lights;
            counts.emissive_surfaces = cell.num_emissive_surfaces;
        };

        if self.cells.len() >= PARALLEL_CELL_THRESHOLD {
            self.static_counts.par_iter_mut().zip(self.cells.par_iter()).for_each(snap);
        } else {
            self.static_counts.iter_mut().zip(self.cells.iter()).for_each(snap);
        }
    }

    /// Drop everything added since the static snapshot.
    pub fn rewind(&mut self) {
        let rewind = |(cell, counts): (&mut LightCell, &CellCounts)| {
            cell.num_point_lights = counts.point_lights;
            cell.num_emissive_surfaces = counts.emissive_surfaces;
        };

        if self.cells.len() >= PARALLEL_CELL_THRESHOLD {
            self.cells.par_iter_mut().zip(self.static_counts.par_iter()).for_each(rewind);
        } else {
            self.cells.iter_mut().zip(self.static_counts.iter()).for_each(rewind);
        }
    }

    /// Cells bucketed by emissive surface count: slot 0 holds empty cells,
    /// slot `1 + n / group` holds cells with `n > 0` surfaces.
    pub fn emissive_histogram(&self, group: usize) -> Vec<usize> {
        let group = group.max(1);
        let mut histogram = vec![0usize; 1 + MAX_VISIBLE_SURFACE_LIGHTS.div_ceil(group)];
        let last = histogram.len() - 1;
        for cell in &self.cells {
            let n = cell.num_emissive_surfaces as usize;
            let slot = if n == 0 { 0 } else { 1 + n / group };
            histogram[slot.min(last)] += 1;
        }
        histogram
    }
}

// ============================================================
// Cluster dedup bitmap
// ============================================================

/// One bit per grid cell. Cleared before each light is inserted so a
/// light lands in a cell at most once no matter how many leafs cover it.
#[derive(Debug, Default)]
pub struct ClusterBitMap {
    bits: Vec<u32>,
}

impl ClusterBitMap {
    pub fn reset(&mut self, num_cells: usize) {
        self.bits.clear();
        self.bits.resize(num_cells.div_ceil(32), 0);
    }

    pub fn clear(&mut self) {
        self.bits.fill(0);
    }

    /// Returns true if the bit was not set yet (and sets it).
    pub fn check_or_set(&mut self, cell_index: usize) -> bool {
        let Some(word) = self.bits.get_mut(cell_index / 32) else {
            return false;
        };
        let bit = 1u32 << (cell_index % 32);
        if *word & bit != 0 {
            return false;
        }
        *word |= bit;
        true
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    // ============================================================
    // Grid geometry
    // ============================================================

    #[test]
    fn test_compute_grid_rounds_outward() {
        let g = GridGeometry::compute(&[-130.0, 0.0, 10.0], &[129.0, 128.0, 250.0], 128.0).unwrap();
        assert_eq!(g.min_cell, [-2, 0, 0]);
        assert_eq!(g.size, [4, 1, 2]);
        assert_eq!(g.cells, 8);
    }

    #[test]
    fn test_compute_grid_too_many_cells() {
        // 1024^3 cells
        let max = 1024.0 * 128.0;
        let err = GridGeometry::compute(&[0.0; 3], &[max, max, max], 128.0).unwrap_err();
        assert!(err.contains("too large"));
    }

    #[test]
    fn test_compute_grid_at_capacity() {
        // 64^3 == MAX_LIGHT_CLUSTERS is still accepted
        let max = 64.0 * 128.0;
        let g = GridGeometry::compute(&[0.0; 3], &[max, max, max], 128.0).unwrap();
        assert_eq!(g.cells, MAX_LIGHT_CLUSTERS);
    }

    #[test]
    fn test_compute_grid_rejects_bad_input() {
        assert!(GridGeometry::compute(&[0.0; 3], &[1.0; 3], 0.0).is_err());
        assert!(GridGeometry::compute(&[10.0; 3], &[-10.0; 3], 128.0).is_err());
        assert!(GridGeometry::compute(&[f32::NAN, 0.0, 0.0], &[1.0; 3], 128.0).is_err());
    }

    #[test]
    fn test_compute_grid_inverted_within_one_cell() {
        // Both bounds round to cell 0
        let err = GridGeometry::compute(&[0.0, 10.0, 0.0], &[128.0, -10.0, 128.0], 128.0).unwrap_err();
        assert!(err.contains("inverted"), "{}", err);
        assert!(err.contains("axis 1"), "{}", err);
    }

    #[test]
    fn test_cell_index_out_of_range() {
        let g = GridGeometry::compute(&[0.0; 3], &[384.0, 256.0, 128.0], 128.0).unwrap();
        assert_eq!(g.size, [3, 2, 1]);
        for cell in [[-1, 0, 0], [0, -1, 0], [0, 0, -1], [3, 0, 0], [0, 2, 0], [0, 0, 1], [i32::MIN, 0, 0]] {
            assert_eq!(g.cell_index(cell), -1, "{:?}", cell);
        }
    }

    #[test]
    fn test_cell_index_bijection() {
        let g = GridGeometry::compute(&[-256.0, 0.0, -128.0], &[384.0, 384.0, 256.0], 128.0).unwrap();
        let mut seen = HashSet::new();
        for z in 0..g.size[2] {
            for y in 0..g.size[1] {
                for x in 0..g.size[0] {
                    let idx = g.cell_index([x, y, z]);
                    assert!(idx >= 0 && (idx as usize) < g.cells);
                    assert!(seen.insert(idx));
                    assert_eq!(g.cell_coords(idx as usize), [x, y, z]);
                }
            }
        }
        assert_eq!(seen.len(), g.cells);
    }

    #[test]
    fn test_world_cell_index_applies_origin() {
        let g = GridGeometry::compute(&[-256.0, 0.0, 0.0], &[256.0, 128.0, 128.0], 128.0).unwrap();
        assert_eq!(g.world_cell_index(-2, 0, 0), 0);
        assert_eq!(g.world_cell_index(1, 0, 0), 3);
        assert_eq!(g.world_cell_index(2, 0, 0), -1);
    }

    // ============================================================
    // Cells
    // ============================================================

    #[test]
    fn test_light_cell_layout() {
        assert_eq!(std::mem::size_of::<LightCell>(), 2 + MAX_VISIBLE_POINT_LIGHTS + MAX_VISIBLE_SURFACE_LIGHTS);
    }

    #[test]
    fn test_cell_capacity() {
        let mut cells = LightCells::default();
        cells.reset(1);
        for i in 0..MAX_VISIBLE_POINT_LIGHTS {
            assert!(cells.add_point_light(0, i));
        }
        assert!(!cells.add_point_light(0, 99));
        assert_eq!(cells.cell(0).point_lights().len(), MAX_VISIBLE_POINT_LIGHTS);

        for i in 0..MAX_VISIBLE_SURFACE_LIGHTS {
            assert!(cells.add_surface_light(0, i));
        }
        assert!(!cells.add_surface_light(0, 0));
        assert_eq!(cells.cell(0).num_emissive_surfaces as usize, MAX_VISIBLE_SURFACE_LIGHTS);
    }

    #[test]
    fn test_rewind_restores_snapshot() {
        let mut cells = LightCells::default();
        cells.reset(3);
        cells.add_point_light(0, 0);
        cells.add_surface_light(2, 4);
        cells.snapshot_static();

        for i in 1..10 {
            cells.add_point_light(0, i);
            cells.add_point_light(1, i);
            cells.add_surface_light(2, i);
        }
        cells.rewind();

        assert_eq!(cells.cell(0).point_lights(), &[0]);
        assert!(cells.cell(1).point_lights().is_empty());
        assert_eq!(cells.cell(2).emissive_surfaces(), &[4]);
    }

    #[test]
    fn test_rewind_large_grid() {
        let mut cells = LightCells::default();
        cells.reset(PARALLEL_CELL_THRESHOLD + 7);
        cells.add_point_light(5, 1);
        cells.snapshot_static();
        cells.add_point_light(5, 2);
        cells.add_point_light(PARALLEL_CELL_THRESHOLD + 6, 2);
        cells.rewind();
        assert_eq!(cells.cell(5).point_lights(), &[1]);
        assert!(cells.cell(PARALLEL_CELL_THRESHOLD + 6).point_lights().is_empty());
    }

    #[test]
    fn test_clear_counts() {
        let mut cells = LightCells::default();
        cells.reset(2);
        cells.add_point_light(1, 3);
        cells.snapshot_static();
        cells.clear_counts();
        assert!(cells.cell(1).point_lights().is_empty());

        // The baseline went too
        cells.add_point_light(1, 4);
        cells.rewind();
        assert!(cells.cell(1).point_lights().is_empty());
    }

    #[test]
    fn test_emissive_histogram() {
        let mut cells = LightCells::default();
        cells.reset(4);
        cells.add_surface_light(1, 0);
        for i in 0..5 {
            cells.add_surface_light(2, i);
        }
        let h = cells.emissive_histogram(4);
        assert_eq!(h[0], 2); // cells 0 and 3
        assert_eq!(h[1], 1); // 1 surface
        assert_eq!(h[2], 1); // 5 surfaces
        assert_eq!(h.iter().sum::<usize>(), 4);
    }

    #[test]
    fn test_emissive_histogram_full_cell_lands_in_last_slot() {
        let mut cells = LightCells::default();
        cells.reset(2);
        for i in 0..MAX_VISIBLE_SURFACE_LIGHTS {
            cells.add_surface_light(0, i);
        }

        let h = cells.emissive_histogram(1);
        assert_eq!(h.len(), 1 + MAX_VISIBLE_SURFACE_LIGHTS);
        assert_eq!(h[0], 1);
        assert_eq!(h[MAX_VISIBLE_SURFACE_LIGHTS], 1);
        assert_eq!(h.iter().sum::<usize>(), 2);
    }

    // ============================================================
    // Bitmap
    // ============================================================

    #[test]
    fn test_bitmap_check_or_set() {
        let mut bm = ClusterBitMap::default();
        bm.reset(70);
        assert!(bm.check_or_set(0));
        assert!(!bm.check_or_set(0));
        assert!(bm.check_or_set(69));
        assert!(!bm.check_or_set(69));
        bm.clear();
        assert!(bm.check_or_set(0));
        assert!(bm.check_or_set(69));
    }

    #[test]
    fn test_bitmap_out_of_range_is_never_new() {
        let mut bm = ClusterBitMap::default();
        bm.reset(32);
        assert!(!bm.check_or_set(32));
    }
}
