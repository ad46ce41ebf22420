// rt_leaf_vis.rs — which BSP leafs a light or emissive surface can reach

use rtgrid_common::q_shared::*;
use rtgrid_common::qfiles::{vis_row_bytes, MAX_MAP_LEAFS};

use crate::rt_local::*;
use crate::rt_model::{check_vis_bit, WorldModel};

// ============================================================
// Leaf accumulator
// ============================================================

/// Collects unique leaf indices in discovery order.
///
/// `added` is a bitset addressed by leaf index; `leafs` is the dense
/// output. Clearing only touches the bits that were set.
#[derive(Debug)]
pub struct LeafAccum {
    added: Vec<u64>,
    leafs: Vec<u32>,
}

impl Default for LeafAccum {
    fn default() -> Self {
        Self::with_capacity(MAX_MAP_LEAFS + 1)
    }
}

impl LeafAccum {
    pub fn with_capacity(num_leafs: usize) -> Self {
        Self {
            added: vec![0; num_leafs.div_ceil(64)],
            leafs: Vec::new(),
        }
    }

    pub fn prepare(&mut self) {
        for &leaf in &self.leafs {
            self.added[leaf as usize / 64] &= !(1u64 << (leaf % 64));
        }
        self.leafs.clear();
    }

    /// Returns false if `leaf` was already collected.
    pub fn add(&mut self, leaf: usize) -> bool {
        let word = leaf / 64;
        if word >= self.added.len() {
            self.added.resize(word + 1, 0);
        }
        let bit = 1u64 << (leaf % 64);
        if self.added[word] & bit != 0 {
            return false;
        }
        self.added[word] |= bit;
        self.leafs.push(leaf as u32);
        true
    }

    /// Add every leaf in the PVS of `leaf`. Returns how many were new.
    pub fn add_potentially_visible(&mut self, world: &WorldModel, leaf: usize) -> usize {
        let mut added = 0;
        for visible in world.pvs_leafs(leaf) {
            if self.add(visible) {
                added += 1;
            }
        }
        added
    }

    pub fn leafs(&self) -> &[u32] {
        &self.leafs
    }

    pub fn len(&self) -> usize {
        self.leafs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leafs.is_empty()
    }
}

// ============================================================
// Per-surface leaf cache
// ============================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeafCacheStats {
    pub pvs_walks: usize,
    pub hits: usize,
    pub misses: usize,
    pub fat_pvs_queries: usize,
}

/// Memoized leaf sets for static world surfaces.
///
/// All sets live in one pool; `spans` maps a surface to its slice of the
/// pool. A new map resets the whole arena.
#[derive(Debug, Default)]
pub struct SurfaceLeafCache {
    spans: Vec<Option<(u32, u32)>>,
    pool: Vec<u32>,

    // surface -> leafs that list it as a mark surface, in leaf order
    direct_start: Vec<u32>,
    direct_leafs: Vec<u32>,

    stats: LeafCacheStats,
}

impl SurfaceLeafCache {
    /// Drop every cached set and index the new world's mark surfaces.
    pub fn reset(&mut self, world: &WorldModel) {
        let num_surfaces = world.num_surfaces();

        self.spans.clear();
        self.spans.resize(num_surfaces, None);
        self.pool.clear();
        self.stats = LeafCacheStats::default();

        let mut counts = vec![0u32; num_surfaces + 1];
        for leaf in 1..=world.num_leafs() {
            for &surf in world.leaf_mark_surfaces(leaf) {
                counts[surf + 1] += 1;
            }
        }
        for i in 0..num_surfaces {
            counts[i + 1] += counts[i];
        }

        let mut fill = counts.clone();
        self.direct_leafs.clear();
        self.direct_leafs.resize(counts[num_surfaces] as usize, 0);
        for leaf in 1..=world.num_leafs() {
            for &surf in world.leaf_mark_surfaces(leaf) {
                self.direct_leafs[fill[surf] as usize] = leaf as u32;
                fill[surf] += 1;
            }
        }
        self.direct_start = counts;
    }

    pub fn num_surfaces(&self) -> usize {
        self.spans.len()
    }

    pub fn stats(&self) -> LeafCacheStats {
        self.stats
    }

    pub fn is_cached(&self, surf: usize) -> bool {
        self.spans.get(surf).is_some_and(|s| s.is_some())
    }

    /// Leafs that reference `surf` directly.
    pub fn direct_leafs(&self, surf: usize) -> &[u32] {
        if surf + 1 >= self.direct_start.len() {
            return &[];
        }
        let start = self.direct_start[surf] as usize;
        let end = self.direct_start[surf + 1] as usize;
        &self.direct_leafs[start..end]
    }

    /// Leafs a static world surface can light: every leaf that references
    /// it plus their PVS. Computed on first use, then served from the arena.
    pub fn static_surface_leafs(
        &mut self,
        world: &WorldModel,
        accum: &mut LeafAccum,
        surf: usize,
        verbose: bool,
    ) -> &[u32] {
        if surf >= self.spans.len() {
            return &[];
        }

        if let Some((start, len)) = self.spans[surf] {
            self.stats.hits += 1;
            return &self.pool[start as usize..(start + len) as usize];
        }

        self.stats.misses += 1;
        accum.prepare();

        let mut leafs_direct = 0i32;
        let mut leafs_pvs = 0i32;
        let mut trace = if verbose {
            format!("Collecting visible leafs for surface {}:", surf)
        } else {
            String::new()
        };

        let start = self.direct_start[surf] as usize;
        let end = self.direct_start[surf + 1] as usize;
        for i in start..end {
            let leaf = self.direct_leafs[i] as usize;
            leafs_direct += 1;
            if accum.add(leaf) {
                if verbose {
                    trace.push_str(&format!(" {}", leaf));
                }
            } else {
                // reached earlier through PVS but it is a direct leaf
                leafs_pvs -= 1;
            }

            self.stats.pvs_walks += 1;
            leafs_pvs += accum.add_potentially_visible(world, leaf) as i32;
        }

        if verbose {
            vid_printf(
                PRINT_DEVELOPER,
                &format!("{} (sum={}, direct={}, pvs={})\n", trace, accum.len(), leafs_direct, leafs_pvs),
            );
        }

        let pool_start = self.pool.len() as u32;
        self.pool.extend_from_slice(accum.leafs());
        self.spans[surf] = Some((pool_start, accum.len() as u32));
        &self.pool[pool_start as usize..]
    }

    /// Leafs a surface of a moving model can light, from a sphere around its
    /// transformed bounds. Not cached; the result lives in `accum`.
    pub fn moving_surface_leafs<'a>(
        &mut self,
        world: &WorldModel,
        services: &dyn LightServices,
        accum: &'a mut LeafAccum,
        surf: usize,
        transform: &Matrix3x4,
        trace: bool,
    ) -> &'a [u32] {
        accum.prepare();
        let Some(s) = world.surfaces.get(surf) else {
            return accum.leafs();
        };

        let bbox_center = [
            (s.mins[0] + s.maxs[0]) * 0.5,
            (s.mins[1] + s.maxs[1]) * 0.5,
            (s.mins[2] + s.maxs[2]) * 0.5,
        ];
        let bbox_size = vector_subtract(&s.maxs, &s.mins);
        let radius = 0.5 * vector_length(&bbox_size);
        let origin = matrix3x4_transform_point(transform, &bbox_center);

        self.stats.fat_pvs_queries += 1;
        let visbytes = services.fat_pvs(&origin, radius, false, false);
        if visbytes.len() < vis_row_bytes(world.num_leafs()) {
            rtgrid_common::com_printf_throttled!(
                10,
                "Short fat PVS for surface {}: {} bytes",
                surf,
                visbytes.len()
            );
        }

        let mut line = if trace {
            format!(
                "Collecting visible leafs for moving surface {}: {},{},{} {}:",
                surf, origin[0], origin[1], origin[2], radius
            )
        } else {
            String::new()
        };

        for i in 0..world.num_leafs() {
            if !check_vis_bit(&visbytes, i) {
                continue;
            }
            if accum.add(i + 1) && trace {
                line.push_str(&format!(" {}", i + 1));
            }
        }

        if trace {
            vid_printf(PRINT_ALL, &format!("{} (sum={})\n", line, accum.len()));
        }

        accum.leafs()
    }
}

/// Leafs a point light can reach: the PVS of the leaf containing its origin.
pub fn point_light_leafs<'a>(world: &WorldModel, accum: &'a mut LeafAccum, origin: &Vec3) -> &'a [u32] {
    let leaf = world.point_in_leaf(origin);
    accum.prepare();
    accum.add_potentially_visible(world, leaf);
    accum.leafs()
}

// ============================================================
// Tests
// ============================================================
